//! Machine driver for Kamatera cloud servers.
//!
//! The crate implements the lifecycle a machine-provisioning host expects
//! from a provider plugin (create, state, start, stop, restart, remove) on
//! top of Kamatera's asynchronous job API. Creation validates the request
//! against the live catalog, submits the server, waits for the create job
//! (bounded by a deadline), and installs a generated SSH key using the
//! one-time root password.

pub mod config;
pub mod content;
pub mod driver;
pub mod kamatera;
pub mod request;
pub mod ssh;
pub mod store;
pub mod test_support;

pub use config::{ConfigError, KamateraConfig};
pub use driver::{MachineDriver, MachineState};
pub use kamatera::{CreatePlan, DriverError, KamateraDriver};
pub use request::{RequestError, ServerRequest};
pub use store::{MachineRecord, MachineStore};
