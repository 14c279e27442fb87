//! Error types for the Kamatera driver.

use thiserror::Error;

use super::api::ApiError;
use super::catalog::ValidationError;
use crate::config::ConfigError;
use crate::ssh::BootstrapError;

/// Errors raised by the Kamatera driver.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum DriverError {
    /// Raised when configuration is incomplete or inconsistent.
    #[error("configuration error: {0}")]
    Config(String),
    /// Raised when the requested server does not fit the provider catalog.
    #[error("invalid server options: {0}")]
    Validation(#[from] ValidationError),
    /// Wrapper for classified API failures.
    #[error(transparent)]
    Api(#[from] ApiError),
    /// Raised when a provider job ends with status `error`.
    #[error("Kamatera {action} failed (command id {job_id})")]
    JobFailed {
        /// Operation the job performed.
        action: String,
        /// Provider job handle.
        job_id: u64,
    },
    /// Raised when a provider job ends with status `cancelled`.
    #[error("Kamatera {action} cancelled (command id {job_id})")]
    JobCancelled {
        /// Operation the job performed.
        action: String,
        /// Provider job handle.
        job_id: u64,
    },
    /// Raised when a wait exceeds its deadline.
    #[error("timeout waiting for {action}")]
    Timeout {
        /// What was being waited on.
        action: String,
    },
    /// Raised when the create response did not carry a job handle.
    #[error("create server response did not contain a command id")]
    MissingJobId,
    /// Raised when the completed create job log holds no IPv4 address.
    #[error("could not find the server IP address in the log of command {job_id}")]
    MissingAddress {
        /// Provider job handle.
        job_id: u64,
    },
    /// Raised when an operation needs a machine that was never created.
    #[error("machine {machine} has no Kamatera server recorded")]
    NotProvisioned {
        /// Local machine name.
        machine: String,
    },
    /// Raised when no server with the recorded name exists.
    #[error("failed to find Kamatera server ID for {server_name}")]
    ServerNotFound {
        /// Generated server name that was looked up.
        server_name: String,
    },
    /// Raised when an operation requires a running machine.
    #[error("machine is not running (state: {state})")]
    NotRunning {
        /// State observed instead.
        state: String,
    },
    /// Raised when the power operation kept hitting server faults.
    #[error("power operation {power} gave up after {attempts} attempts: {source}")]
    PowerRetriesExhausted {
        /// Power directive.
        power: String,
        /// Attempts made.
        attempts: u32,
        /// Last failure observed.
        #[source]
        source: ApiError,
    },
    /// Raised when the SSH bootstrap fails.
    #[error("SSH bootstrap failed: {0}")]
    Bootstrap(#[from] BootstrapError),
}

impl From<ConfigError> for DriverError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value.to_string())
    }
}
