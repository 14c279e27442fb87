//! Power transitions and termination.

use std::fmt;

use tracing::{debug, info};

use super::api::{ApiError, ApiRequest, CallStyle, Transport};
use super::job::JobId;
use super::{DriverError, KamateraDriver};

const POWER_ACTION: &str = "power operation";

/// Power directive accepted by the console.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PowerAction {
    /// Power on.
    On,
    /// Power off.
    Off,
    /// Reboot.
    Restart,
}

impl PowerAction {
    /// Returns the form value sent as `power`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::On => "on",
            Self::Off => "off",
            Self::Restart => "restart",
        }
    }
}

impl fmt::Display for PowerAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<T, R> KamateraDriver<T, R>
where
    T: Transport,
{
    /// Submits `action` and waits for the resulting job.
    ///
    /// A server fault while waiting restarts the operation from id
    /// resolution, at most `power_attempts` times in total.
    pub(super) async fn power(&mut self, action: PowerAction) -> Result<(), DriverError> {
        let attempts = self.settings.power_attempts.max(1);
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let server_id = self.server_id().await?;
            debug!(power = %action, %server_id, attempt, "initiating power operation");
            let job = self.submit_power(&server_id, action).await?;
            info!("waiting for Kamatera power operation to complete");
            info!(command_id = %job, "track progress in the Kamatera console");

            match self.wait_for_job(job, POWER_ACTION).await {
                Ok(_) => {
                    info!(power = %action, "Kamatera power operation completed successfully");
                    return Ok(());
                }
                Err(DriverError::Api(fault @ ApiError::ServerFault { .. })) => {
                    if attempt >= attempts {
                        return Err(DriverError::PowerRetriesExhausted {
                            power: action.as_str().to_owned(),
                            attempts,
                            source: fault,
                        });
                    }
                    info!(error = %fault, attempt, attempts, "restarting power operation");
                }
                Err(other) => return Err(other),
            }
        }
    }

    async fn submit_power(&self, server_id: &str, action: PowerAction) -> Result<JobId, ApiError> {
        let request = ApiRequest::put_form(
            format!("/service/server/{server_id}/power"),
            &[("power", action.as_str())],
        );
        let job: u64 = self
            .client
            .call(&request, CallStyle::Fetch, "run Kamatera power operation")
            .await?;
        Ok(JobId(job))
    }

    /// Requests termination of the server without waiting for the job.
    pub(super) async fn terminate(&mut self) -> Result<JobId, DriverError> {
        let server_id = self.server_id().await?;
        debug!(%server_id, "removing Kamatera server");
        let request = ApiRequest::delete_form(
            format!("/service/server/{server_id}/terminate"),
            &[("confirm", "1"), ("force", "1")],
        );
        let job: u64 = self
            .client
            .call(&request, CallStyle::Fetch, "remove Kamatera server")
            .await?;
        let job_id = JobId(job);
        info!(
            command_id = %job_id,
            "Kamatera remove server started, track progress in the Kamatera console"
        );
        Ok(job_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kamatera::api::{Method, RequestBody};
    use crate::kamatera::test_driver;
    use crate::test_support::{ScriptedRunner, ScriptedTransport};
    use rstest::rstest;

    fn driver_with_id(
        transport: ScriptedTransport,
    ) -> KamateraDriver<ScriptedTransport, ScriptedRunner> {
        let mut driver = test_driver(transport, ScriptedRunner::new());
        driver.record.server_name = Some(String::from("worker-abcdef"));
        driver.record.server_id = Some(String::from("srv-9"));
        driver
    }

    fn form(fields: &[(&str, &str)]) -> RequestBody {
        RequestBody::Form(
            fields
                .iter()
                .map(|(key, value)| ((*key).to_owned(), (*value).to_owned()))
                .collect(),
        )
    }

    #[rstest]
    #[case::on(PowerAction::On, "on")]
    #[case::off(PowerAction::Off, "off")]
    #[case::restart(PowerAction::Restart, "restart")]
    #[tokio::test]
    async fn submits_and_waits(#[case] action: PowerAction, #[case] value: &str) {
        let transport = ScriptedTransport::new();
        transport.push_json(200, "77");
        transport.push_json(200, r#"{"status":"complete"}"#);
        let mut driver = driver_with_id(transport.clone());

        driver.power(action).await.expect("power should succeed");

        let requests = transport.requests();
        assert_eq!(requests.len(), 2);
        let submit = requests.first().expect("submit request");
        assert_eq!(submit.method, Method::Put);
        assert_eq!(submit.path, "/service/server/srv-9/power");
        assert_eq!(submit.body, form(&[("power", value)]));
        assert_eq!(
            requests.get(1).map(|request| request.path.as_str()),
            Some("/service/queue/77")
        );
    }

    #[tokio::test]
    async fn server_fault_restarts_operation() {
        let transport = ScriptedTransport::new();
        transport.push_json(200, "1");
        transport.push_json(500, "queue busy");
        transport.push_json(200, "2");
        transport.push_json(200, r#"{"status":"complete"}"#);
        let mut driver = driver_with_id(transport.clone());

        driver
            .power(PowerAction::Restart)
            .await
            .expect("second attempt should succeed");

        let paths: Vec<String> = transport
            .requests()
            .into_iter()
            .map(|request| request.path)
            .collect();
        assert_eq!(
            paths,
            vec![
                "/service/server/srv-9/power",
                "/service/queue/1",
                "/service/server/srv-9/power",
                "/service/queue/2",
            ]
        );
    }

    #[tokio::test]
    async fn server_fault_restarts_are_bounded() {
        let transport = ScriptedTransport::new();
        for job in 1..=3 {
            transport.push_json(200, &job.to_string());
            transport.push_json(500, "queue busy");
        }
        let mut driver = driver_with_id(transport.clone());

        let err = driver
            .power(PowerAction::Off)
            .await
            .expect_err("restarts should run out");

        let DriverError::PowerRetriesExhausted {
            ref power,
            attempts,
            ..
        } = err
        else {
            panic!("expected PowerRetriesExhausted, got {err:?}");
        };
        assert_eq!(power, "off");
        assert_eq!(attempts, 3);
        assert!(err.to_string().contains("queue busy"), "{err}");
        assert_eq!(transport.requests().len(), 6);
    }

    #[tokio::test]
    async fn failed_job_is_not_restarted() {
        let transport = ScriptedTransport::new();
        transport.push_json(200, "5");
        transport.push_json(200, r#"{"status":"error"}"#);
        let mut driver = driver_with_id(transport.clone());

        let err = driver.power(PowerAction::On).await.expect_err("job failed");

        assert_eq!(
            err,
            DriverError::JobFailed {
                action: String::from("power operation"),
                job_id: 5,
            }
        );
        assert_eq!(transport.requests().len(), 2);
    }

    #[tokio::test]
    async fn terminate_sends_confirm_and_force() {
        let transport = ScriptedTransport::new();
        transport.push_json(200, "314");
        let mut driver = driver_with_id(transport.clone());

        let job = driver.terminate().await.expect("terminate should succeed");

        assert_eq!(job, JobId(314));
        let requests = transport.requests();
        let request = requests.first().expect("one request");
        assert_eq!(request.method, Method::Delete);
        assert_eq!(request.path, "/service/server/srv-9/terminate");
        assert_eq!(request.body, form(&[("confirm", "1"), ("force", "1")]));
    }
}
