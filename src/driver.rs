//! Lifecycle contract a machine-provisioning host expects from a provider
//! plugin.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

/// Coarse machine state reported to the host.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MachineState {
    /// Powered on.
    Running,
    /// Powered off.
    Stopped,
    /// Not observable yet.
    Starting,
    /// Any unexpected power state.
    Error,
}

impl fmt::Display for MachineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Running => "Running",
            Self::Stopped => "Stopped",
            Self::Starting => "Starting",
            Self::Error => "Error",
        })
    }
}

/// Future returned by driver operations.
pub type DriverFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// Operations implemented by a machine driver.
///
/// A driver owns a single machine. Operations take `&mut self` where they may
/// update what the driver remembers about it (for example the resolved
/// provider id).
pub trait MachineDriver {
    /// Provider specific error type.
    type Error: std::error::Error + Send + Sync + 'static;
    /// What `create` needs to know: a fresh request or a job to resume.
    type CreatePlan: Send;

    /// Short provider name.
    fn driver_name(&self) -> &'static str;

    /// Creates the machine and makes it reachable over SSH.
    fn create(&mut self, plan: Self::CreatePlan) -> DriverFuture<'_, (), Self::Error>;

    /// Requests deletion of the machine.
    fn remove(&mut self) -> DriverFuture<'_, (), Self::Error>;

    /// Powers the machine on.
    fn start(&mut self) -> DriverFuture<'_, (), Self::Error>;

    /// Powers the machine off.
    fn stop(&mut self) -> DriverFuture<'_, (), Self::Error>;

    /// Reboots the machine.
    fn restart(&mut self) -> DriverFuture<'_, (), Self::Error>;

    /// Stops the machine without a graceful shutdown where the provider
    /// supports one; defaults to [`MachineDriver::stop`].
    fn kill(&mut self) -> DriverFuture<'_, (), Self::Error> {
        self.stop()
    }

    /// Reports the current state.
    fn state(&self) -> DriverFuture<'_, MachineState, Self::Error>;

    /// Returns the Docker endpoint URL; the machine must be running.
    fn url(&self) -> DriverFuture<'_, String, Self::Error>;

    /// Returns the host name or address to SSH into.
    ///
    /// # Errors
    ///
    /// Returns the driver error when no address is known.
    fn ssh_hostname(&self) -> Result<String, Self::Error>;
}
