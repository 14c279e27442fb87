//! SSH key generation and password-authenticated key installation.
//!
//! The first contact with a new server happens with the one-time root
//! password, driven through `sshpass` so no terminal is required. The only
//! remote command run over that session appends the locally generated public
//! key to `authorized_keys`, after which key authentication takes over.
//!
//! Host keys are pinned on first contact (`StrictHostKeyChecking=accept-new`)
//! into a known-hosts file private to the machine. The very first handshake
//! still trusts whatever key the address presents.

use std::ffi::OsString;
use std::net::Ipv4Addr;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use shell_escape::unix::escape;
use thiserror::Error;
use tracing::debug;

use crate::content::read_utf8_file;

mod runner;

pub use runner::{CommandError, CommandOutput, CommandRunner, ProcessCommandRunner};

/// Default remote user for the bootstrap session.
pub const DEFAULT_SSH_USER: &str = "root";
/// Default SSH port.
pub const DEFAULT_SSH_PORT: u16 = 22;
/// File name of the generated private key inside the machine directory.
pub const KEY_FILE_NAME: &str = "id_rsa";
/// File name of the pinned host keys inside the machine directory.
pub const KNOWN_HOSTS_FILE_NAME: &str = "known_hosts";

const PASSWORD_ENV: &str = "SSHPASS";
const DEFAULT_CONNECT_TIMEOUT_SECS: u32 = 10;

// `ssh` reports connection problems with 255; `sshpass` uses 5 for a
// rejected password and 6 for an unknown host key. All three are expected
// while the server is still booting.
const UNREACHABLE_EXIT_CODES: [i32; 3] = [255, 5, 6];

/// Expands a leading `~/` prefix to the user's home directory.
///
/// When `HOME` is unset the input is returned unchanged.
#[must_use]
pub fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/")
        && let Some(home) = std::env::var_os("HOME")
    {
        return format!("{}/{rest}", home.to_string_lossy());
    }
    path.to_owned()
}

/// SSH client settings for one machine.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SshSettings {
    /// Remote user.
    pub user: String,
    /// Remote port.
    pub port: u16,
    /// Private key path; the public key lives next to it with a `.pub` suffix.
    pub key_path: Utf8PathBuf,
    /// Known-hosts file used to pin the server's host key.
    pub known_hosts_path: Utf8PathBuf,
    /// Path to the `ssh` executable.
    pub ssh_bin: String,
    /// Path to the `sshpass` executable.
    pub sshpass_bin: String,
    /// Path to the `ssh-keygen` executable.
    pub keygen_bin: String,
    /// Seconds `ssh` waits for the TCP connection.
    pub connect_timeout_secs: u32,
}

impl SshSettings {
    /// Builds settings with keys and known hosts stored under `machine_dir`.
    #[must_use]
    pub fn for_machine_dir(machine_dir: &Utf8Path) -> Self {
        Self {
            user: DEFAULT_SSH_USER.to_owned(),
            port: DEFAULT_SSH_PORT,
            key_path: machine_dir.join(KEY_FILE_NAME),
            known_hosts_path: machine_dir.join(KNOWN_HOSTS_FILE_NAME),
            ssh_bin: String::from("ssh"),
            sshpass_bin: String::from("sshpass"),
            keygen_bin: String::from("ssh-keygen"),
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
        }
    }

    /// Returns the public key path.
    #[must_use]
    pub fn public_key_path(&self) -> Utf8PathBuf {
        Utf8PathBuf::from(format!("{}.pub", self.key_path))
    }
}

/// Errors raised while preparing keys or running the bootstrap session.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum BootstrapError {
    /// Raised when a helper program cannot be started.
    #[error(transparent)]
    Spawn(#[from] CommandError),
    /// Raised when the key directory cannot be prepared.
    #[error("failed to prepare key directory {path}: {message}")]
    KeyDirectory {
        /// Directory that could not be created.
        path: Utf8PathBuf,
        /// Underlying error message.
        message: String,
    },
    /// Raised when `ssh-keygen` exits unsuccessfully.
    #[error("ssh-keygen exited with status {status_text}: {stderr}")]
    KeyGeneration {
        /// Exit status text.
        status_text: String,
        /// Captured stderr.
        stderr: String,
    },
    /// Raised when the public key cannot be read back.
    #[error("failed to read public key {path}: {message}")]
    KeyRead {
        /// Public key path.
        path: Utf8PathBuf,
        /// Underlying error message.
        message: String,
    },
    /// Raised when a derived public key cannot be written next to the
    /// private key.
    #[error("failed to write public key {path}: {message}")]
    KeyWrite {
        /// Public key path.
        path: Utf8PathBuf,
        /// Underlying error message.
        message: String,
    },
    /// Raised when the remote command runs and fails.
    #[error("remote key installation exited with status {status_text}: {stderr}")]
    RemoteCommand {
        /// Exit status text.
        status_text: String,
        /// Captured stderr.
        stderr: String,
    },
}

/// Outcome of one bootstrap attempt that did not hit a fatal error.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SessionOutcome {
    /// The key was appended to `authorized_keys`.
    Installed,
    /// The server could not be reached or refused the password yet.
    Unreachable {
        /// Exit status text.
        status_text: String,
        /// Captured stderr.
        stderr: String,
    },
}

/// Generates the keypair unless it already exists and returns the public
/// key text.
///
/// A private key without its public half is kept; the public half is
/// derived from it with `ssh-keygen -y` and written back.
///
/// # Errors
///
/// Returns [`BootstrapError`] when the key directory, key generation, or the
/// public key read or write fails.
pub fn ensure_keypair<R>(runner: &R, settings: &SshSettings) -> Result<String, BootstrapError>
where
    R: CommandRunner + ?Sized,
{
    let public_path = settings.public_key_path();
    match (settings.key_path.is_file(), public_path.is_file()) {
        (true, true) => debug!(path = %settings.key_path, "reusing existing SSH key"),
        (true, false) => return derive_public_key(runner, settings, &public_path),
        (false, _) => generate_keypair(runner, settings)?,
    }

    let text = read_utf8_file(&public_path).map_err(|message| BootstrapError::KeyRead {
        path: public_path.clone(),
        message,
    })?;
    Ok(text.trim().to_owned())
}

fn generate_keypair<R>(runner: &R, settings: &SshSettings) -> Result<(), BootstrapError>
where
    R: CommandRunner + ?Sized,
{
    if let Some(parent) = settings.key_path.parent()
        && !parent.as_str().is_empty()
    {
        Dir::create_ambient_dir_all(parent, ambient_authority()).map_err(|err| {
            BootstrapError::KeyDirectory {
                path: parent.to_path_buf(),
                message: err.to_string(),
            }
        })?;
    }
    debug!(path = %settings.key_path, "generating SSH key");
    let args = [
        OsString::from("-t"),
        OsString::from("rsa"),
        OsString::from("-N"),
        OsString::new(),
        OsString::from("-f"),
        OsString::from(settings.key_path.as_str()),
        OsString::from("-q"),
    ];
    let output = runner.run(&settings.keygen_bin, &args, &[])?;
    if !output.is_success() {
        return Err(BootstrapError::KeyGeneration {
            status_text: output.status_text(),
            stderr: output.stderr,
        });
    }
    Ok(())
}

fn derive_public_key<R>(
    runner: &R,
    settings: &SshSettings,
    public_path: &Utf8Path,
) -> Result<String, BootstrapError>
where
    R: CommandRunner + ?Sized,
{
    debug!(path = %settings.key_path, "deriving missing public SSH key");
    let args = [
        OsString::from("-y"),
        OsString::from("-f"),
        OsString::from(settings.key_path.as_str()),
    ];
    let output = runner.run(&settings.keygen_bin, &args, &[])?;
    if !output.is_success() {
        return Err(BootstrapError::KeyGeneration {
            status_text: output.status_text(),
            stderr: output.stderr,
        });
    }

    let public_key = output.stdout.trim().to_owned();
    let write_error = |message: String| BootstrapError::KeyWrite {
        path: public_path.to_path_buf(),
        message,
    };
    let parent = public_path
        .parent()
        .filter(|dir| !dir.as_str().is_empty())
        .unwrap_or_else(|| Utf8Path::new("."));
    let file_name = public_path
        .file_name()
        .ok_or_else(|| write_error(String::from("path has no file name")))?;
    let dir = Dir::open_ambient_dir(parent, ambient_authority())
        .map_err(|err| write_error(err.to_string()))?;
    dir.write(file_name, format!("{public_key}\n"))
        .map_err(|err| write_error(err.to_string()))?;
    Ok(public_key)
}

/// Builds the remote command that appends `public_key` to
/// `~/.ssh/authorized_keys`.
#[must_use]
pub fn authorized_keys_command(public_key: &str) -> String {
    let inner = format!(
        "mkdir -p .ssh && echo {} >> .ssh/authorized_keys",
        escape(public_key.into())
    );
    format!("bash -c {}", escape(inner.into()))
}

/// Arguments passed to `sshpass` for a password session running
/// `remote_command` on `host`.
#[must_use]
pub fn password_session_args(
    settings: &SshSettings,
    host: Ipv4Addr,
    remote_command: &str,
) -> Vec<OsString> {
    let options = [
        String::from("StrictHostKeyChecking=accept-new"),
        format!("UserKnownHostsFile={}", settings.known_hosts_path),
        format!("ConnectTimeout={}", settings.connect_timeout_secs),
        String::from("PubkeyAuthentication=no"),
        String::from("PreferredAuthentications=password"),
        String::from("NumberOfPasswordPrompts=1"),
    ];

    let mut args = vec![
        OsString::from("-e"),
        OsString::from(&settings.ssh_bin),
        OsString::from("-p"),
        OsString::from(settings.port.to_string()),
    ];
    for option in options {
        args.push(OsString::from("-o"));
        args.push(OsString::from(option));
    }
    args.push(OsString::from(format!("{}@{host}", settings.user)));
    args.push(OsString::from(remote_command));
    args
}

/// Makes one attempt to install `public_key` using the one-time `password`.
///
/// # Errors
///
/// Returns [`BootstrapError::Spawn`] when `sshpass` cannot start and
/// [`BootstrapError::RemoteCommand`] when the session connected but the
/// command failed.
pub fn install_public_key<R>(
    runner: &R,
    settings: &SshSettings,
    host: Ipv4Addr,
    password: &str,
    public_key: &str,
) -> Result<SessionOutcome, BootstrapError>
where
    R: CommandRunner + ?Sized,
{
    let command = authorized_keys_command(public_key);
    let args = password_session_args(settings, host, &command);
    let output = runner.run(&settings.sshpass_bin, &args, &[(PASSWORD_ENV, password)])?;

    if output.is_success() {
        return Ok(SessionOutcome::Installed);
    }
    let unreachable = output
        .code
        .is_none_or(|code| UNREACHABLE_EXIT_CODES.contains(&code));
    if unreachable {
        return Ok(SessionOutcome::Unreachable {
            status_text: output.status_text(),
            stderr: output.stderr,
        });
    }
    Err(BootstrapError::RemoteCommand {
        status_text: output.status_text(),
        stderr: output.stderr,
    })
}
