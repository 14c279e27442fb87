//! Kamatera implementation of [`MachineDriver`].
//!
//! Every console operation is an asynchronous job: the submission returns a
//! numeric handle that is polled until it reaches a terminal status. Creation
//! additionally waits for the server to report running and installs the
//! local SSH key with the one-time root password.

pub mod api;
mod bootstrap;
pub mod catalog;
mod error;
mod job;
mod locate;
mod power;
pub mod provision;
mod state;

use std::net::{Ipv4Addr, SocketAddrV4};

use tracing::info;

use crate::driver::{DriverFuture, MachineDriver, MachineState};
use crate::request::ServerRequest;
use crate::ssh::{CommandRunner, SshSettings};
use crate::store::MachineRecord;

use api::{ApiClient, Transport};

pub use error::DriverError;
pub use job::{Deadline, JobId, JobStatus, WaitPolicy};
pub use power::PowerAction;
pub use provision::{OneTimePassword, Provisioned, ResumeJob, extract_ipv4};
pub use state::PowerReading;

/// Name reported to the host.
pub const DRIVER_NAME: &str = "kamatera";
/// Docker daemon TLS port used in the machine URL.
pub const DOCKER_PORT: u16 = 2376;
/// Default number of power operation attempts after server faults.
pub const DEFAULT_POWER_ATTEMPTS: u32 = 3;

/// Per-machine driver settings.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DriverSettings {
    /// Local machine name; prefix of the generated server name.
    pub machine_name: String,
    /// SSH client settings for the bootstrap.
    pub ssh: SshSettings,
    /// Poll interval and deadline for job, state and SSH waits.
    pub wait: WaitPolicy,
    /// Upper bound on power operation restarts after server faults.
    pub power_attempts: u32,
}

/// What [`MachineDriver::create`] should do.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CreatePlan {
    /// Validate `ServerRequest` against the catalog and submit a new server.
    Fresh(ServerRequest),
    /// Skip submission and wait for an already submitted create job.
    Resume(ResumeJob),
}

/// Driver for one machine backed by a Kamatera server.
pub struct KamateraDriver<T, R> {
    client: ApiClient<T>,
    runner: R,
    settings: DriverSettings,
    record: MachineRecord,
}

impl<T, R> KamateraDriver<T, R>
where
    T: Transport,
    R: CommandRunner,
{
    /// Builds a driver from its collaborators and the remembered record.
    #[must_use]
    pub const fn new(
        client: ApiClient<T>,
        runner: R,
        settings: DriverSettings,
        record: MachineRecord,
    ) -> Self {
        Self {
            client,
            runner,
            settings,
            record,
        }
    }

    /// State to persist after an operation.
    #[must_use]
    pub const fn record(&self) -> &MachineRecord {
        &self.record
    }

    /// Driver settings in force.
    #[must_use]
    pub const fn settings(&self) -> &DriverSettings {
        &self.settings
    }

    /// Runs the full creation workflow and returns the provisioned server.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError`] from validation, submission, the job wait, or
    /// the SSH bootstrap.
    pub async fn create_machine(&mut self, plan: CreatePlan) -> Result<Provisioned, DriverError> {
        let provisioned = match plan {
            CreatePlan::Fresh(request) => {
                let spec = self.validate_against_catalog(&request).await?;
                self.provision(&spec).await?
            }
            CreatePlan::Resume(job) => {
                info!(command_id = %job.job_id, "resuming Kamatera create server command");
                self.complete(job).await?
            }
        };
        self.bootstrap(&provisioned).await?;
        Ok(provisioned)
    }

    /// Requests termination and returns the job handle without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError`] when the id cannot be resolved or the request
    /// fails.
    pub async fn remove_machine(&mut self) -> Result<JobId, DriverError> {
        self.terminate().await
    }

    /// Address recorded at creation.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::NotProvisioned`] when no address is recorded.
    pub fn address(&self) -> Result<Ipv4Addr, DriverError> {
        self.record
            .ip_address
            .ok_or_else(|| DriverError::NotProvisioned {
                machine: self.settings.machine_name.clone(),
            })
    }

    /// Docker endpoint `tcp://<ip>:2376`, available only while running.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::NotRunning`] for any other state.
    pub async fn docker_url(&self) -> Result<String, DriverError> {
        let state = self.machine_state().await?;
        if state != MachineState::Running {
            return Err(DriverError::NotRunning {
                state: state.to_string(),
            });
        }
        let address = SocketAddrV4::new(self.address()?, DOCKER_PORT);
        Ok(format!("tcp://{address}"))
    }
}

impl<T, R> MachineDriver for KamateraDriver<T, R>
where
    T: Transport,
    R: CommandRunner,
{
    type Error = DriverError;
    type CreatePlan = CreatePlan;

    fn driver_name(&self) -> &'static str {
        DRIVER_NAME
    }

    fn create(&mut self, plan: CreatePlan) -> DriverFuture<'_, (), DriverError> {
        Box::pin(async move { self.create_machine(plan).await.map(|_| ()) })
    }

    fn remove(&mut self) -> DriverFuture<'_, (), DriverError> {
        Box::pin(async move { self.remove_machine().await.map(|_| ()) })
    }

    fn start(&mut self) -> DriverFuture<'_, (), DriverError> {
        Box::pin(self.power(PowerAction::On))
    }

    fn stop(&mut self) -> DriverFuture<'_, (), DriverError> {
        Box::pin(self.power(PowerAction::Off))
    }

    fn restart(&mut self) -> DriverFuture<'_, (), DriverError> {
        Box::pin(self.power(PowerAction::Restart))
    }

    fn state(&self) -> DriverFuture<'_, MachineState, DriverError> {
        Box::pin(self.machine_state())
    }

    fn url(&self) -> DriverFuture<'_, String, DriverError> {
        Box::pin(self.docker_url())
    }

    fn ssh_hostname(&self) -> Result<String, DriverError> {
        self.address().map(|address| address.to_string())
    }
}

#[cfg(test)]
pub(crate) fn test_driver<R: CommandRunner>(
    transport: crate::test_support::ScriptedTransport,
    runner: R,
) -> KamateraDriver<crate::test_support::ScriptedTransport, R> {
    use std::time::Duration;

    let settings = DriverSettings {
        machine_name: String::from("worker"),
        ssh: SshSettings::for_machine_dir(camino::Utf8Path::new(
            "/nonexistent/kamatera-driver/machines/worker",
        )),
        wait: WaitPolicy {
            poll_interval: Duration::ZERO,
            timeout: Duration::from_secs(5),
        },
        power_attempts: DEFAULT_POWER_ATTEMPTS,
    };
    KamateraDriver::new(
        ApiClient::new(transport, api::RetryPolicy::immediate(10)),
        runner,
        settings,
        MachineRecord::new("worker"),
    )
}

#[cfg(test)]
mod tests;
