//! Polling of provider jobs ("commands" in the console) to a terminal status.

use std::fmt;
use std::time::{Duration, Instant};

use tokio::time::sleep;
use tracing::{debug, info};

use super::api::models::JobRecord;
use super::api::{ApiError, ApiRequest, Classified, Transport};
use super::{DriverError, KamateraDriver};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(1800);

/// Opaque handle of a provider job.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct JobId(pub u64);

impl JobId {
    /// Returns the raw numeric handle.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    fn status_path(self) -> String {
        format!("/service/queue/{}", self.0)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Observed job status.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum JobStatus {
    /// The queue does not know the job yet.
    Pending,
    /// Any non-terminal status reported by the console.
    Running(String),
    /// Terminal success.
    Complete,
    /// Terminal failure.
    Error,
    /// Terminal cancellation.
    Cancelled,
}

impl JobStatus {
    /// Maps the raw `status` field.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        match raw {
            "complete" => Self::Complete,
            "error" => Self::Error,
            "cancelled" => Self::Cancelled,
            other => Self::Running(other.to_owned()),
        }
    }

    /// Returns `true` for complete, error, and cancelled.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Error | Self::Cancelled)
    }
}

/// Fixed-delay wait with an overall deadline.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct WaitPolicy {
    /// Delay before each poll.
    pub poll_interval: Duration,
    /// Give up once this much time has passed.
    pub timeout: Duration,
}

impl WaitPolicy {
    /// Returns the deadline for a wait starting now.
    ///
    /// A timeout too large to represent never expires.
    #[must_use]
    pub fn deadline(&self) -> Deadline {
        Deadline(Instant::now().checked_add(self.timeout))
    }
}

/// Point in time after which a wait gives up.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    /// Returns `true` once the deadline lies in the past.
    #[must_use]
    pub fn has_passed(self) -> bool {
        self.0.is_some_and(|at| Instant::now() > at)
    }

    /// Returns `true` when the deadline can never pass.
    #[must_use]
    pub const fn is_unbounded(self) -> bool {
        self.0.is_none()
    }
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            timeout: DEFAULT_WAIT_TIMEOUT,
        }
    }
}

impl<T, R> KamateraDriver<T, R>
where
    T: Transport,
{
    /// Polls `job` until it reaches a terminal status.
    ///
    /// A 404 means the queue has not picked the job up yet and counts as
    /// pending. A 500 is returned immediately as [`ApiError::ServerFault`].
    /// Other failures (transport, unexpected status, undecodable body) are
    /// tolerated up to the retry policy's attempt limit in a row.
    pub(super) async fn wait_for_job(
        &self,
        job: JobId,
        action: &str,
    ) -> Result<JobRecord, DriverError> {
        let request = ApiRequest::get(job.status_path());
        let context = format!("get Kamatera command info ({job})");
        let max_failures = self.client.retry_policy().max_attempts;
        let wait = self.settings.wait;
        let started = Instant::now();
        let deadline = wait.deadline();
        let mut polls: u32 = 0;
        let mut failures: u32 = 0;

        loop {
            sleep(wait.poll_interval).await;
            if deadline.has_passed() {
                return Err(DriverError::Timeout {
                    action: format!("{action} (command id {job})"),
                });
            }
            polls = polls.saturating_add(1);
            debug!(
                %job,
                polls,
                elapsed_ms = started.elapsed().as_millis(),
                "polling Kamatera command"
            );

            let failure = match self.client.send_once(&request).await {
                Err(err) => ApiError::Transport {
                    context: context.clone(),
                    message: err.message,
                },
                Ok(Classified::NotFound) => {
                    info!(%job, "waiting for command to start...");
                    continue;
                }
                Ok(Classified::ServerFault(body)) => {
                    return Err(ApiError::ServerFault { context, body }.into());
                }
                Ok(Classified::OtherStatus(status)) => ApiError::InvalidStatus {
                    context: context.clone(),
                    status,
                },
                Ok(Classified::Success(body)) => match serde_json::from_str::<JobRecord>(&body) {
                    Ok(record) => {
                        failures = 0;
                        debug!(%job, status = %record.status, log = record.log_text(), "command status");
                        match JobStatus::parse(&record.status) {
                            JobStatus::Complete => return Ok(record),
                            JobStatus::Error => {
                                return Err(DriverError::JobFailed {
                                    action: action.to_owned(),
                                    job_id: job.get(),
                                });
                            }
                            JobStatus::Cancelled => {
                                return Err(DriverError::JobCancelled {
                                    action: action.to_owned(),
                                    job_id: job.get(),
                                });
                            }
                            JobStatus::Pending | JobStatus::Running(_) => continue,
                        }
                    }
                    Err(err) => ApiError::Protocol {
                        context: context.clone(),
                        message: err.to_string(),
                    },
                },
            };

            failures = failures.saturating_add(1);
            if failures >= max_failures {
                return Err(failure.into());
            }
            info!(%job, error = %failure, failures, max_failures, "retrying command status");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kamatera::test_driver;
    use crate::test_support::{ScriptedRunner, ScriptedTransport};
    use rstest::rstest;

    #[rstest]
    #[case("complete", JobStatus::Complete, true)]
    #[case("error", JobStatus::Error, true)]
    #[case("cancelled", JobStatus::Cancelled, true)]
    #[case("running", JobStatus::Running(String::from("running")), false)]
    #[case("", JobStatus::Running(String::new()), false)]
    fn parses_raw_status(#[case] raw: &str, #[case] expected: JobStatus, #[case] terminal: bool) {
        let status = JobStatus::parse(raw);
        assert_eq!(status, expected);
        assert_eq!(status.is_terminal(), terminal);
    }

    #[tokio::test]
    async fn polls_until_complete() {
        let transport = ScriptedTransport::new();
        transport.push_json(200, r#"{"status":"running"}"#);
        transport.push_json(200, r#"{"status":"running"}"#);
        transport.push_json(200, r#"{"status":"complete","log":"done"}"#);
        let driver = test_driver(transport.clone(), ScriptedRunner::new());

        let record = driver
            .wait_for_job(JobId(42), "create server")
            .await
            .expect("job should complete");

        assert_eq!(record.log_text(), "done");
        assert_eq!(transport.requests().len(), 3);
        assert!(
            transport
                .requests()
                .iter()
                .all(|request| request.path == "/service/queue/42")
        );
    }

    #[tokio::test]
    async fn not_found_counts_as_pending() {
        let transport = ScriptedTransport::new();
        for _ in 0..12 {
            transport.push_json(404, "not found");
        }
        transport.push_json(200, r#"{"status":"complete"}"#);
        let driver = test_driver(transport.clone(), ScriptedRunner::new());

        let result = driver.wait_for_job(JobId(7), "create server").await;

        assert!(result.is_ok(), "unexpected outcome: {result:?}");
        assert_eq!(transport.requests().len(), 13);
    }

    #[rstest]
    #[case::error("error")]
    #[case::cancelled("cancelled")]
    #[tokio::test]
    async fn terminal_failures_abort(#[case] status: &str) {
        let transport = ScriptedTransport::new();
        transport.push_json(200, &format!(r#"{{"status":"{status}"}}"#));
        let driver = test_driver(transport, ScriptedRunner::new());

        let err = driver
            .wait_for_job(JobId(9), "create server")
            .await
            .expect_err("job should fail");

        let expected = if status == "error" {
            DriverError::JobFailed {
                action: String::from("create server"),
                job_id: 9,
            }
        } else {
            DriverError::JobCancelled {
                action: String::from("create server"),
                job_id: 9,
            }
        };
        let message = err.to_string();
        assert_eq!(err, expected);
        assert!(
            message.contains("failed") || message.contains("cancelled"),
            "{message}"
        );
    }

    #[tokio::test]
    async fn server_fault_is_fatal() {
        let transport = ScriptedTransport::new();
        transport.push_json(500, "queue exploded");
        let driver = test_driver(transport.clone(), ScriptedRunner::new());

        let err = driver
            .wait_for_job(JobId(1), "power operation")
            .await
            .expect_err("500 should be fatal");

        assert!(err.to_string().contains("queue exploded"), "{err}");
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn consecutive_bad_statuses_are_bounded() {
        let transport = ScriptedTransport::new();
        for _ in 0..10 {
            transport.push_json(502, "bad gateway");
        }
        let driver = test_driver(transport.clone(), ScriptedRunner::new());

        let err = driver
            .wait_for_job(JobId(3), "create server")
            .await
            .expect_err("should give up");

        assert!(err.to_string().contains("invalid status code 502"), "{err}");
        assert_eq!(transport.requests().len(), 10);
    }

    #[tokio::test]
    async fn reports_timeout_when_deadline_passes() {
        let transport = ScriptedTransport::new();
        transport.push_json(200, r#"{"status":"running"}"#);
        let mut driver = test_driver(transport, ScriptedRunner::new());
        driver.settings.wait = WaitPolicy {
            poll_interval: Duration::from_millis(5),
            timeout: Duration::ZERO,
        };

        let err = driver
            .wait_for_job(JobId(5), "create server")
            .await
            .expect_err("should time out");

        assert!(matches!(err, DriverError::Timeout { .. }), "{err:?}");
    }

    #[test]
    fn oversized_timeout_never_expires() {
        let policy = WaitPolicy {
            poll_interval: Duration::ZERO,
            timeout: Duration::from_secs(u64::MAX),
        };

        let deadline = policy.deadline();

        assert!(deadline.is_unbounded());
        assert!(!deadline.has_passed());
    }

    #[tokio::test]
    async fn oversized_timeout_still_polls_to_completion() {
        let transport = ScriptedTransport::new();
        transport.push_json(200, r#"{"status":"running"}"#);
        transport.push_json(200, r#"{"status":"complete"}"#);
        let mut driver = test_driver(transport.clone(), ScriptedRunner::new());
        driver.settings.wait = WaitPolicy {
            poll_interval: Duration::ZERO,
            timeout: Duration::from_secs(u64::MAX),
        };

        let result = driver.wait_for_job(JobId(1), "create server").await;

        assert!(result.is_ok(), "unexpected outcome: {result:?}");
        assert_eq!(transport.requests().len(), 2);
    }
}
