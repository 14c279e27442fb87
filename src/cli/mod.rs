//! Command-line interface definitions for the `kamatera-driver` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::{Args, Parser};

/// Top-level CLI for the `kamatera-driver` binary.
#[derive(Debug, Parser)]
#[command(
    name = "kamatera-driver",
    about = "Provision and manage a single machine on Kamatera",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Create the server and install the machine SSH key.
    #[command(name = "create", about = "Create the server and install the machine SSH key")]
    Create(CreateCommand),
    /// Request termination of the server.
    #[command(name = "remove", about = "Request termination of the server")]
    Remove(MachineArgs),
    /// Power the server on.
    #[command(name = "start", about = "Power the server on")]
    Start(MachineArgs),
    /// Power the server off.
    #[command(name = "stop", about = "Power the server off")]
    Stop(MachineArgs),
    /// Reboot the server.
    #[command(name = "restart", about = "Reboot the server")]
    Restart(MachineArgs),
    /// Stop the server without waiting for a graceful shutdown.
    #[command(name = "kill", about = "Stop the server immediately")]
    Kill(MachineArgs),
    /// Print the machine state.
    #[command(name = "state", about = "Print Running, Stopped, Starting or Error")]
    State(MachineArgs),
    /// Print the Docker endpoint URL.
    #[command(name = "url", about = "Print the Docker endpoint of a running machine")]
    Url(MachineArgs),
    /// Print the address to SSH into.
    #[command(name = "ssh-hostname", about = "Print the address to SSH into")]
    SshHostname(MachineArgs),
}

/// Selects the local machine record.
#[derive(Debug, Args)]
pub(crate) struct MachineArgs {
    /// Local machine name; also the prefix of the Kamatera server name.
    #[arg(long, value_name = "NAME")]
    pub(crate) machine: String,
}

/// Arguments for the `kamatera-driver create` subcommand.
///
/// Every override replaces the value loaded from `kamatera.toml` or the
/// `KAMATERA_*` environment for this invocation only.
#[derive(Debug, Args)]
pub(crate) struct CreateCommand {
    #[command(flatten)]
    pub(crate) target: MachineArgs,
    /// Datacenter code, for example `EU` or `US-NY2`.
    #[arg(long, value_name = "CODE")]
    pub(crate) datacenter: Option<String>,
    /// CPU class: cores followed by the type letter, for example `2B`.
    #[arg(long, value_name = "CPU")]
    pub(crate) cpu: Option<String>,
    /// RAM in MB.
    #[arg(long, value_name = "MB")]
    pub(crate) ram: Option<u32>,
    /// Primary disk size in GB.
    #[arg(long, value_name = "GB")]
    pub(crate) disk_size: Option<u32>,
    /// Disk image description.
    #[arg(long, value_name = "IMAGE")]
    pub(crate) image: Option<String>,
    /// Billing mode, `hourly` or `monthly`.
    #[arg(long, value_name = "MODE")]
    pub(crate) billing: Option<String>,
    /// Server tag; repeat to add several.
    #[arg(long = "tag", value_name = "TAG")]
    pub(crate) tags: Vec<String>,
    /// Wait for an already submitted create job instead of submitting one.
    ///
    /// The server name and password of that job must be supplied through
    /// `KAMATERA_RESUME_SERVER_NAME` and `KAMATERA_RESUME_PASSWORD`.
    #[arg(long, value_name = "JOB_ID")]
    pub(crate) resume_job_id: Option<u64>,
}
