//! `reqwest` implementation of [`Transport`].

use reqwest::header::ACCEPT;

use super::{ApiRequest, ApiResponse, Method, RequestBody, Transport, TransportError, TransportFuture};

/// Production console endpoint.
pub const DEFAULT_API_URL: &str = "https://console.kamatera.com";

const USER_AGENT: &str = concat!("kamatera-driver/", env!("CARGO_PKG_VERSION"));

/// Client id and secret sent as `AuthClientId` / `AuthSecret` headers.
#[derive(Clone, Eq, PartialEq)]
pub struct ApiCredentials {
    /// API client identifier.
    pub client_id: String,
    /// API secret.
    pub secret: String,
}

impl std::fmt::Debug for ApiCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiCredentials")
            .field("client_id", &self.client_id)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Transport that talks HTTPS to the console.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    credentials: ApiCredentials,
}

impl HttpTransport {
    /// Builds a transport rooted at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] when the HTTP client cannot be initialised.
    pub fn new(
        base_url: impl Into<String>,
        credentials: ApiCredentials,
    ) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|err| TransportError::new(err.to_string()))?;
        let raw_url = base_url.into();
        Ok(Self {
            client,
            base_url: raw_url.trim_end_matches('/').to_owned(),
            credentials,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

impl Transport for HttpTransport {
    fn send<'a>(&'a self, request: &'a ApiRequest) -> TransportFuture<'a> {
        Box::pin(async move {
            let url = self.url(&request.path);
            let builder = match request.method {
                Method::Get => self.client.get(&url),
                Method::Post => self.client.post(&url),
                Method::Put => self.client.put(&url),
                Method::Delete => self.client.delete(&url),
            }
            .header("AuthClientId", &self.credentials.client_id)
            .header("AuthSecret", &self.credentials.secret)
            .header(ACCEPT, "application/json");

            let prepared = match &request.body {
                RequestBody::Empty => builder,
                RequestBody::Json(value) => builder.json(value),
                RequestBody::Form(fields) => builder.form(fields),
            };

            let response = prepared
                .send()
                .await
                .map_err(|err| TransportError::new(format!("request to {url} failed: {err}")))?;
            let status = response.status().as_u16();
            let body = response
                .text()
                .await
                .map_err(|err| TransportError::new(format!("failed to read response body: {err}")))?;

            Ok(ApiResponse { status, body })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_trailing_slash_from_base_url() {
        let transport = HttpTransport::new(
            "https://console.example.test/",
            ApiCredentials {
                client_id: String::from("id"),
                secret: String::from("secret"),
            },
        )
        .expect("client should build");
        assert_eq!(
            transport.url("/service/servers"),
            "https://console.example.test/service/servers"
        );
    }

    #[test]
    fn credentials_debug_hides_secret() {
        let credentials = ApiCredentials {
            client_id: String::from("client"),
            secret: String::from("hunter2"),
        };
        let rendered = format!("{credentials:?}");
        assert!(!rendered.contains("hunter2"), "secret leaked: {rendered}");
        assert!(rendered.contains("client"));
    }
}
