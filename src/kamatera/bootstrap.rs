//! Post-creation SSH bootstrap: wait for the server to run, then install the
//! local public key with the one-time password.

use tokio::time::sleep;
use tracing::{debug, info};

use super::api::Transport;
use super::job::Deadline;
use super::provision::Provisioned;
use super::{DriverError, KamateraDriver};
use crate::driver::MachineState;
use crate::ssh::{self, CommandRunner, SessionOutcome};

impl<T, R> KamateraDriver<T, R>
where
    T: Transport,
    R: CommandRunner,
{
    /// Installs the machine's public key on the freshly created server.
    ///
    /// Both the running wait and the SSH retries share one deadline taken
    /// from the wait policy.
    pub(super) async fn bootstrap(&self, provisioned: &Provisioned) -> Result<(), DriverError> {
        debug!("generating SSH key...");
        let public_key = ssh::ensure_keypair(&self.runner, &self.settings.ssh)?;

        let deadline = self.settings.wait.deadline();
        self.wait_until_running(deadline).await?;

        debug!("copying SSH key to the server and performing initialization");
        let mut attempts: u32 = 0;
        loop {
            sleep(self.settings.wait.poll_interval).await;
            if deadline.has_passed() {
                return Err(DriverError::Timeout {
                    action: format!("SSH access to {}", provisioned.address),
                });
            }
            attempts = attempts.saturating_add(1);

            let outcome = ssh::install_public_key(
                &self.runner,
                &self.settings.ssh,
                provisioned.address,
                provisioned.password.expose(),
                &public_key,
            )?;
            match outcome {
                SessionOutcome::Installed => {
                    info!(attempts, "SSH initialization completed successfully");
                    return Ok(());
                }
                SessionOutcome::Unreachable {
                    status_text,
                    stderr,
                } => {
                    debug!(attempts, status = %status_text, stderr = %stderr.trim(), "SSH failure");
                }
            }
        }
    }

    async fn wait_until_running(&self, deadline: Deadline) -> Result<(), DriverError> {
        debug!("waiting for server status...");
        loop {
            sleep(self.settings.wait.poll_interval).await;
            if deadline.has_passed() {
                return Err(DriverError::Timeout {
                    action: String::from("server to reach running state"),
                });
            }
            let state = self.machine_state().await?;
            debug!(%state, "server state");
            if state == MachineState::Running {
                return Ok(());
            }
        }
    }
}
