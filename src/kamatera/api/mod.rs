//! Request/response plumbing for the Kamatera console API.
//!
//! Every call goes through [`ApiClient`], which classifies the transport
//! outcome and applies the bounded retry policy. The HTTP layer itself sits
//! behind the [`Transport`] trait so tests can script responses without a
//! network.

mod http;
pub mod models;

use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info};

pub use http::{ApiCredentials, DEFAULT_API_URL, HttpTransport};

/// HTTP verb used by an [`ApiRequest`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Method {
    /// `GET`
    Get,
    /// `POST`
    Post,
    /// `PUT`
    Put,
    /// `DELETE`
    Delete,
}

/// Payload attached to an [`ApiRequest`].
#[derive(Clone, Debug, PartialEq)]
pub enum RequestBody {
    /// No body.
    Empty,
    /// JSON encoded body.
    Json(serde_json::Value),
    /// URL-encoded form fields.
    Form(Vec<(String, String)>),
}

/// A single call against the console API, relative to the base URL.
#[derive(Clone, Debug, PartialEq)]
pub struct ApiRequest {
    /// HTTP verb.
    pub method: Method,
    /// Path beginning with `/`.
    pub path: String,
    /// Request payload.
    pub body: RequestBody,
}

impl ApiRequest {
    /// Builds a body-less `GET` request.
    #[must_use]
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            path: path.into(),
            body: RequestBody::Empty,
        }
    }

    /// Builds a `POST` request carrying a JSON document.
    #[must_use]
    pub fn post_json(path: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            method: Method::Post,
            path: path.into(),
            body: RequestBody::Json(body),
        }
    }

    /// Builds a `PUT` request carrying form fields.
    #[must_use]
    pub fn put_form(path: impl Into<String>, fields: &[(&str, &str)]) -> Self {
        Self {
            method: Method::Put,
            path: path.into(),
            body: RequestBody::Form(owned_fields(fields)),
        }
    }

    /// Builds a `DELETE` request carrying form fields.
    #[must_use]
    pub fn delete_form(path: impl Into<String>, fields: &[(&str, &str)]) -> Self {
        Self {
            method: Method::Delete,
            path: path.into(),
            body: RequestBody::Form(owned_fields(fields)),
        }
    }
}

fn owned_fields(fields: &[(&str, &str)]) -> Vec<(String, String)> {
    fields
        .iter()
        .map(|(key, value)| ((*key).to_owned(), (*value).to_owned()))
        .collect()
}

/// Raw status and body returned by the transport.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ApiResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response body as text.
    pub body: String,
}

/// Network level failure: DNS, connect, TLS, or body read.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("{message}")]
pub struct TransportError {
    /// Description of the failure.
    pub message: String,
}

impl TransportError {
    /// Wraps a failure description.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Future returned by [`Transport::send`].
pub type TransportFuture<'a> =
    Pin<Box<dyn Future<Output = Result<ApiResponse, TransportError>> + Send + 'a>>;

/// Capability to deliver a request and return the raw response.
pub trait Transport: Send + Sync {
    /// Sends `request` and returns the status and body, or a transport failure.
    fn send<'a>(&'a self, request: &'a ApiRequest) -> TransportFuture<'a>;
}

/// Errors surfaced by API calls once classification and retries are done.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ApiError {
    /// 404 from the console; never retried.
    #[error("{context}: Kamatera resource not found")]
    NotFound {
        /// Call that failed.
        context: String,
    },
    /// 500 from the console; never retried, body kept verbatim.
    #[error("{context}: Kamatera API responded with the following error: {body}")]
    ServerFault {
        /// Call that failed.
        context: String,
        /// Response body returned by the console.
        body: String,
    },
    /// Any other non-2xx status after the retry budget was spent.
    #[error("{context}: invalid status code {status}")]
    InvalidStatus {
        /// Call that failed.
        context: String,
        /// Last status code observed.
        status: u16,
    },
    /// Network failure after the retry budget was spent.
    #[error("{context}: {message}")]
    Transport {
        /// Call that failed.
        context: String,
        /// Transport failure description.
        message: String,
    },
    /// The body could not be decoded into the expected shape.
    #[error("{context}: invalid JSON response: {message}")]
    Protocol {
        /// Call that failed.
        context: String,
        /// Decoder error message.
        message: String,
    },
}

/// Outcome of one request, before any retry decision.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum Classified {
    Success(String),
    NotFound,
    ServerFault(String),
    OtherStatus(u16),
}

pub(crate) fn classify(response: ApiResponse) -> Classified {
    match response.status {
        200..=299 => Classified::Success(response.body),
        404 => Classified::NotFound,
        500 => Classified::ServerFault(response.body),
        other => {
            info!(status = other, body = %response.body, "unexpected response from Kamatera API");
            Classified::OtherStatus(other)
        }
    }
}

/// Which delay schedule a bounded call follows between attempts.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CallStyle {
    /// Submissions and catalog reads: `attempt * 6s`.
    Submit,
    /// Listings and operation submissions: `2s + attempt * 3s`.
    Fetch,
}

/// Bounded retry policy applied to every request/response call.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Per-attempt step for [`CallStyle::Submit`].
    pub submit_step: Duration,
    /// Fixed base for [`CallStyle::Fetch`].
    pub fetch_base: Duration,
    /// Per-attempt step for [`CallStyle::Fetch`].
    pub fetch_step: Duration,
}

impl RetryPolicy {
    /// Ten attempts with the console's customary linear backoff.
    #[must_use]
    pub const fn standard() -> Self {
        Self {
            max_attempts: 10,
            submit_step: Duration::from_secs(6),
            fetch_base: Duration::from_secs(2),
            fetch_step: Duration::from_secs(3),
        }
    }

    /// Policy with no delays, used by tests.
    #[must_use]
    pub const fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            submit_step: Duration::ZERO,
            fetch_base: Duration::ZERO,
            fetch_step: Duration::ZERO,
        }
    }

    /// Delay before the zero-based `attempt`. The first attempt never waits.
    #[must_use]
    pub fn delay(&self, style: CallStyle, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        match style {
            CallStyle::Submit => self.submit_step.saturating_mul(attempt),
            CallStyle::Fetch => self
                .fetch_base
                .saturating_add(self.fetch_step.saturating_mul(attempt)),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::standard()
    }
}

/// Console API client applying classification and bounded retries.
#[derive(Clone, Debug)]
pub struct ApiClient<T> {
    transport: T,
    retry: RetryPolicy,
}

impl<T: Transport> ApiClient<T> {
    /// Wraps a transport with the given retry policy.
    #[must_use]
    pub const fn new(transport: T, retry: RetryPolicy) -> Self {
        Self { transport, retry }
    }

    /// Returns the retry policy in force.
    #[must_use]
    pub const fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Returns the underlying transport.
    #[must_use]
    pub const fn transport(&self) -> &T {
        &self.transport
    }

    /// Sends `request` under the bounded policy and decodes a `2xx` body.
    ///
    /// 404 and 500 fail on the spot. Other statuses, transport failures, and
    /// undecodable bodies are retried until the attempt budget runs out, at
    /// which point the last error is returned.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] describing the fatal or final failure.
    pub async fn call<R: DeserializeOwned>(
        &self,
        request: &ApiRequest,
        style: CallStyle,
        context: &str,
    ) -> Result<R, ApiError> {
        let started = Instant::now();
        let mut last_error = None;

        for attempt in 0..self.retry.max_attempts {
            let delay = self.retry.delay(style, attempt);
            if !delay.is_zero() {
                sleep(delay).await;
            }
            debug!(
                context,
                attempt = attempt + 1,
                max_attempts = self.retry.max_attempts,
                elapsed_ms = started.elapsed().as_millis(),
                "calling Kamatera API"
            );

            let failure = match self.send_once(request).await {
                Err(err) => {
                    debug!(context, error = %err, "transport failure");
                    ApiError::Transport {
                        context: context.to_owned(),
                        message: err.message,
                    }
                }
                Ok(Classified::Success(body)) => match serde_json::from_str::<R>(&body) {
                    Ok(decoded) => return Ok(decoded),
                    Err(err) => {
                        debug!(context, error = %err, "failed to decode response body");
                        ApiError::Protocol {
                            context: context.to_owned(),
                            message: err.to_string(),
                        }
                    }
                },
                Ok(Classified::NotFound) => {
                    return Err(ApiError::NotFound {
                        context: context.to_owned(),
                    });
                }
                Ok(Classified::ServerFault(body)) => {
                    return Err(ApiError::ServerFault {
                        context: context.to_owned(),
                        body,
                    });
                }
                Ok(Classified::OtherStatus(status)) => {
                    info!(
                        context,
                        status,
                        attempt = attempt + 1,
                        max_attempts = self.retry.max_attempts,
                        "got invalid status code, retrying"
                    );
                    ApiError::InvalidStatus {
                        context: context.to_owned(),
                        status,
                    }
                }
            };
            last_error = Some(failure);
        }

        Err(last_error.unwrap_or_else(|| ApiError::Transport {
            context: context.to_owned(),
            message: String::from("retry policy permits no attempts"),
        }))
    }

    /// Sends `request` exactly once and classifies the response.
    pub(crate) async fn send_once(
        &self,
        request: &ApiRequest,
    ) -> Result<Classified, TransportError> {
        self.transport.send(request).await.map(classify)
    }
}
