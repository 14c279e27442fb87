//! Configuration loading via `ortho-config`.

use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::content::{ContentError, ContentKind, resolve_content};
use crate::kamatera::api::{ApiCredentials, DEFAULT_API_URL};
use crate::kamatera::{
    CreatePlan, DEFAULT_POWER_ATTEMPTS, DriverSettings, JobId, OneTimePassword, ResumeJob,
    WaitPolicy,
};
use crate::request::{RequestError, ServerRequest};
use crate::ssh::{SshSettings, expand_tilde};

/// Default directory holding machine records and keys.
pub const DEFAULT_STORAGE_PATH: &str = "~/.kamatera-driver";
/// Default image description.
pub const DEFAULT_IMAGE: &str = "ubuntu_server_18.04_64-bit";

const CONFIG_FILE_NAME: &str = "kamatera.toml";

/// Kamatera driver configuration merged from defaults, `kamatera.toml`, and
/// `KAMATERA_*` environment variables.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "KAMATERA",
    discovery(
        app_name = "kamatera-driver",
        env_var = "KAMATERA_CONFIG_PATH",
        config_file_name = "kamatera.toml",
        dotfile_name = ".kamatera.toml",
        project_file_name = "kamatera.toml"
    )
)]
pub struct KamateraConfig {
    /// API client id sent as `AuthClientId`. Required.
    #[ortho_config(default = String::new())]
    pub api_client_id: String,
    /// API secret sent as `AuthSecret`. Required.
    #[ortho_config(default = String::new())]
    pub api_secret: String,
    /// Console base URL.
    #[ortho_config(default = DEFAULT_API_URL.to_owned())]
    pub api_url: String,
    /// Datacenter code.
    #[ortho_config(default = "EU".to_owned())]
    pub datacenter: String,
    /// Billing mode, `hourly` or `monthly`.
    #[ortho_config(default = "hourly".to_owned())]
    pub billing: String,
    /// Traffic package for monthly billing; the first listed is used when
    /// unset.
    pub traffic: Option<String>,
    /// CPU class, number of cores followed by the type letter.
    #[ortho_config(default = "1B".to_owned())]
    pub cpu: String,
    /// RAM in MB.
    #[ortho_config(default = 1024)]
    pub ram: u32,
    /// Primary disk size in GB.
    #[ortho_config(default = 10)]
    pub disk_size: u32,
    /// Up to three extra disk sizes in GB, comma separated.
    pub extra_disk_sizes: Option<String>,
    /// Disk image description.
    #[ortho_config(default = DEFAULT_IMAGE.to_owned())]
    pub image: String,
    /// Create job to resume instead of submitting a new server.
    pub create_server_command_id: Option<u64>,
    /// Server name submitted by the create job being resumed.
    pub resume_server_name: Option<String>,
    /// Password submitted by the create job being resumed.
    pub resume_password: Option<String>,
    /// Private network to attach.
    pub private_network_name: Option<String>,
    /// Fixed address on the private network.
    pub private_network_ip: Option<String>,
    /// Startup script text.
    pub script: Option<String>,
    /// Startup script file.
    pub script_file: Option<String>,
    /// Additional public key text.
    pub extra_sshkey: Option<String>,
    /// Additional public key file.
    pub extra_sshkey_file: Option<String>,
    /// User-data text.
    pub userdata: Option<String>,
    /// User-data file.
    pub userdata_file: Option<String>,
    /// Server tags, comma separated.
    pub tags: Option<String>,
    /// Directory for machine records and keys. Supports `~/`.
    #[ortho_config(default = DEFAULT_STORAGE_PATH.to_owned())]
    pub storage_path: String,
    /// Seconds between job, state and SSH polls.
    #[ortho_config(default = 2)]
    pub poll_interval_secs: u64,
    /// Seconds before any single wait gives up.
    #[ortho_config(default = 1800)]
    pub wait_timeout_secs: u64,
    /// Power operation attempts after server faults.
    #[ortho_config(default = DEFAULT_POWER_ATTEMPTS)]
    pub power_attempts: u32,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, toml_key: &'static str) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }
}

impl KamateraConfig {
    fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::MissingField(format!(
                "missing {}: set {} or add {} to {CONFIG_FILE_NAME}",
                metadata.description, metadata.env_var, metadata.toml_key
            )));
        }
        Ok(())
    }

    /// Loads configuration without attempting to parse CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("kamatera-driver")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Checks everything needed before the first API call.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] naming the env var and TOML key
    /// to set, or [`ConfigError::Invalid`] for out-of-range tuning values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        Self::require_field(
            &self.api_client_id,
            &FieldMetadata::new(
                "Kamatera API client ID",
                "KAMATERA_API_CLIENT_ID",
                "api_client_id",
            ),
        )?;
        Self::require_field(
            &self.api_secret,
            &FieldMetadata::new("Kamatera API secret", "KAMATERA_API_SECRET", "api_secret"),
        )?;
        Self::require_field(
            &self.api_url,
            &FieldMetadata::new("Kamatera API URL", "KAMATERA_API_URL", "api_url"),
        )?;
        Self::require_field(
            &self.storage_path,
            &FieldMetadata::new(
                "machine storage directory",
                "KAMATERA_STORAGE_PATH",
                "storage_path",
            ),
        )?;
        if self.power_attempts == 0 {
            return Err(ConfigError::Invalid(String::from(
                "power_attempts must be at least 1",
            )));
        }
        Ok(())
    }

    /// API credentials.
    #[must_use]
    pub fn credentials(&self) -> ApiCredentials {
        ApiCredentials {
            client_id: self.api_client_id.clone(),
            secret: self.api_secret.clone(),
        }
    }

    /// Tags from the comma separated `tags` value.
    #[must_use]
    pub fn tag_list(&self) -> Vec<String> {
        self.tags
            .as_deref()
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|tag| !tag.is_empty())
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Builds the unvalidated server request, reading content files.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when content sources conflict or cannot be
    /// read, or a required field is empty.
    pub fn as_request(&self) -> Result<ServerRequest, ConfigError> {
        let script = resolve_content(
            ContentKind::StartupScript,
            self.script.as_deref(),
            self.script_file.as_deref(),
        )?;
        let extra_ssh_key = resolve_content(
            ContentKind::ExtraSshKey,
            self.extra_sshkey.as_deref(),
            self.extra_sshkey_file.as_deref(),
        )?;
        let user_data = resolve_content(
            ContentKind::UserData,
            self.userdata.as_deref(),
            self.userdata_file.as_deref(),
        )?;

        Ok(ServerRequest::builder()
            .datacenter(&self.datacenter)
            .billing(&self.billing)
            .traffic(self.traffic.clone())
            .cpu(&self.cpu)
            .ram_mb(self.ram)
            .disk_size_gb(self.disk_size)
            .extra_disk_sizes(self.extra_disk_sizes.clone())
            .image(&self.image)
            .private_network(
                self.private_network_name.clone(),
                self.private_network_ip.clone(),
            )
            .startup_script(script)
            .extra_ssh_key(extra_ssh_key)
            .user_data(user_data)
            .tags(self.tag_list())
            .build()?)
    }

    /// Chooses between a fresh creation and resuming a submitted job.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when resuming without the
    /// server name or password of the interrupted creation, or any
    /// [`KamateraConfig::as_request`] error.
    pub fn create_plan(&self) -> Result<CreatePlan, ConfigError> {
        let Some(job_id) = self.create_server_command_id else {
            return Ok(CreatePlan::Fresh(self.as_request()?));
        };

        let server_name = self.resume_server_name.clone().unwrap_or_default();
        Self::require_field(
            &server_name,
            &FieldMetadata::new(
                "server name of the create job being resumed",
                "KAMATERA_RESUME_SERVER_NAME",
                "resume_server_name",
            ),
        )?;
        let password = self.resume_password.clone().unwrap_or_default();
        Self::require_field(
            &password,
            &FieldMetadata::new(
                "password of the create job being resumed",
                "KAMATERA_RESUME_PASSWORD",
                "resume_password",
            ),
        )?;

        Ok(CreatePlan::Resume(ResumeJob {
            job_id: JobId(job_id),
            server_name: server_name.trim().to_owned(),
            password: OneTimePassword::new(password),
        }))
    }

    /// Poll interval and deadline for waits.
    #[must_use]
    pub const fn wait_policy(&self) -> WaitPolicy {
        WaitPolicy {
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            timeout: Duration::from_secs(self.wait_timeout_secs),
        }
    }

    /// Store root with `~/` expanded.
    #[must_use]
    pub fn storage_root(&self) -> Utf8PathBuf {
        Utf8PathBuf::from(expand_tilde(&self.storage_path))
    }

    /// Driver settings for `machine_name`, whose files live in `machine_dir`.
    #[must_use]
    pub fn driver_settings(&self, machine_name: &str, machine_dir: &Utf8Path) -> DriverSettings {
        DriverSettings {
            machine_name: machine_name.to_owned(),
            ssh: SshSettings::for_machine_dir(machine_dir),
            wait: self.wait_policy(),
            power_attempts: self.power_attempts,
        }
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates a value outside its accepted range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
    /// Surfaces content source errors.
    #[error(transparent)]
    Content(#[from] ContentError),
    /// Surfaces request construction errors.
    #[error(transparent)]
    Request(#[from] RequestError),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
