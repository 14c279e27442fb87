//! Server creation: payload assembly, submission, and address extraction.

use std::fmt;
use std::net::Ipv4Addr;
use std::sync::LazyLock;

use rand::Rng;
use rand::seq::SliceRandom;
use regex::Regex;
use tracing::{debug, info};

use super::api::models::{CreateServerPayload, TagEntry};
use super::api::{ApiRequest, CallStyle, Transport};
use super::catalog::{Billing, ServerSpec};
use super::job::JobId;
use super::{DriverError, KamateraDriver};

const PASSWORD_LENGTH: usize = 12;
const PASSWORD_DIGITS: usize = 3;
const SUFFIX_LENGTH: usize = 6;
const LETTERS: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";
const DIGITS: &[u8] = b"0123456789";

// A space, four dot-separated 1-3 digit octets, a space.
static IPV4_IN_LOG: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r" ([0-9]{1,3}\.[0-9]{1,3}\.[0-9]{1,3}\.[0-9]{1,3}) ").ok()
});

const CREATE_ACTION: &str = "create server";

/// One-time root password for the first SSH handshake.
#[derive(Clone, Eq, PartialEq)]
pub struct OneTimePassword(String);

impl OneTimePassword {
    /// Wraps an existing password, for example when resuming a creation.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Generates a 12 character password with at least 3 digits.
    #[must_use]
    pub fn generate<G: Rng + ?Sized>(rng: &mut G) -> Self {
        let mut chars: Vec<u8> = DIGITS
            .choose_multiple(rng, PASSWORD_DIGITS)
            .chain(LETTERS.choose_multiple(rng, PASSWORD_LENGTH - PASSWORD_DIGITS))
            .copied()
            .collect();
        chars.shuffle(rng);
        Self(chars.into_iter().map(char::from).collect())
    }

    /// Returns the password text.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for OneTimePassword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("OneTimePassword(<redacted>)")
    }
}

/// Generates the random suffix appended to the machine name.
#[must_use]
pub fn generate_name_suffix<G: Rng + ?Sized>(rng: &mut G) -> String {
    LETTERS
        .choose_multiple(rng, SUFFIX_LENGTH)
        .copied()
        .map(char::from)
        .collect()
}

/// Composes the provider server name from the machine name and suffix.
#[must_use]
pub fn compose_server_name(machine_name: &str, suffix: &str) -> String {
    format!("{machine_name}-{suffix}")
}

/// Returns the first IPv4 address surrounded by spaces in a job log.
///
/// Dotted quads with an octet above 255 are skipped.
#[must_use]
pub fn extract_ipv4(log: &str) -> Option<Ipv4Addr> {
    let pattern = IPV4_IN_LOG.as_ref()?;
    pattern
        .captures_iter(log)
        .filter_map(|captures| captures.get(1))
        .find_map(|token| token.as_str().parse().ok())
}

/// Builds the `serverCreate` body for `spec`.
#[must_use]
pub fn build_create_payload(
    spec: &ServerSpec,
    server_name: &str,
    password: &OneTimePassword,
) -> CreateServerPayload {
    let mut net_modes = vec![String::from("wan")];
    let mut net_names = vec![String::from("auto")];
    let mut net_subnets = vec![String::new()];
    let mut net_prefixes = vec![0];
    let mut net_ips = vec![String::from("auto")];
    if let Some(network) = &spec.private_network {
        net_modes.push(String::from("lan"));
        net_names.push(network.name.clone());
        net_subnets.push(String::new());
        net_prefixes.push(0);
        net_ips.push(network.address.clone());
    }

    CreateServerPayload {
        datacenter: spec.datacenter.clone(),
        n_servers: 1,
        names: vec![server_name.to_owned()],
        cpu_str: spec.cpu.clone(),
        cpu_type: spec.cpu_type(),
        ram_mb: spec.ram_mb,
        disk_sizes_gb: spec.disk_sizes_gb(),
        password: password.expose().to_owned(),
        password_validate: password.expose().to_owned(),
        managed: false,
        backup: false,
        billing_mode: spec.billing.mode_flag(),
        traffic_package: spec.billing.traffic().to_owned(),
        use_simple_networking: false,
        power_on_completion: true,
        use_simple_wan: false,
        use_simple_lan: false,
        net_modes,
        net_names,
        net_subnets,
        net_prefixes,
        net_ips,
        disk_image_id: spec.image_id.clone(),
        source_server_id: String::new(),
        user_id: 0,
        owner_id: 0,
        src_ui: false,
        selected_key: String::new(),
        script: spec.startup_script.clone().unwrap_or_default(),
        selected_ssh_key_value: spec.extra_ssh_key.clone().unwrap_or_default(),
        selected_tags: spec
            .tags
            .iter()
            .map(|tag| TagEntry {
                value: tag.clone(),
                label: tag.clone(),
            })
            .collect(),
        user_data: spec.user_data.clone().unwrap_or_default(),
    }
}

/// Creation job to resume instead of submitting a new one.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ResumeJob {
    /// Handle of the interrupted create job.
    pub job_id: JobId,
    /// Server name used by the interrupted creation.
    pub server_name: String,
    /// Password submitted with the interrupted creation.
    pub password: OneTimePassword,
}

/// Result of a completed create job.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Provisioned {
    /// Create job handle.
    pub job_id: JobId,
    /// Provider server name.
    pub server_name: String,
    /// Public address scraped from the job log.
    pub address: Ipv4Addr,
    /// Password for the first SSH handshake.
    pub password: OneTimePassword,
}

impl<T, R> KamateraDriver<T, R>
where
    T: Transport,
{
    /// Submits a new server for `spec` and waits for the job to complete.
    pub(super) async fn provision(
        &mut self,
        spec: &ServerSpec,
    ) -> Result<Provisioned, DriverError> {
        let (password, suffix) = {
            let mut rng = rand::thread_rng();
            let password = OneTimePassword::generate(&mut rng);
            (password, generate_name_suffix(&mut rng))
        };
        let server_name = compose_server_name(&self.settings.machine_name, &suffix);
        log_spec(spec, &server_name);

        let payload = build_create_payload(spec, &server_name, &password);
        let job_id = self.submit_create(&payload).await?;

        self.complete(ResumeJob {
            job_id,
            server_name,
            password,
        })
        .await
    }

    /// Waits for an already submitted create job and extracts the address.
    pub(super) async fn complete(&mut self, job: ResumeJob) -> Result<Provisioned, DriverError> {
        info!("waiting for Kamatera create server command to complete...");
        info!(
            command_id = %job.job_id,
            "you can track progress in the Kamatera console web-ui"
        );
        self.record.server_name = Some(job.server_name.clone());
        self.record.server_id = None;
        self.record.create_job_id = Some(job.job_id.get());

        let record = self.wait_for_job(job.job_id, CREATE_ACTION).await?;
        info!("Kamatera create server command completed successfully");

        let address = extract_ipv4(record.log_text()).ok_or(DriverError::MissingAddress {
            job_id: job.job_id.get(),
        })?;
        debug!(%address, "server IP");
        self.record.ip_address = Some(address);

        Ok(Provisioned {
            job_id: job.job_id,
            server_name: job.server_name,
            address,
            password: job.password,
        })
    }

    async fn submit_create(&self, payload: &CreateServerPayload) -> Result<JobId, DriverError> {
        let body = serde_json::to_value(payload).map_err(|err| {
            DriverError::Config(format!("failed to encode create server payload: {err}"))
        })?;
        let request = ApiRequest::post_json("/svc/serverCreate", body);
        let handles: Vec<u64> = self
            .client
            .call(&request, CallStyle::Submit, "create Kamatera server")
            .await?;
        handles
            .first()
            .copied()
            .map(JobId)
            .ok_or(DriverError::MissingJobId)
    }
}

fn log_spec(spec: &ServerSpec, server_name: &str) {
    info!("creating Kamatera server...");
    info!(name = server_name, "server name");
    info!(datacenter = %spec.datacenter_name, "datacenter");
    info!(cpu = %spec.cpu, ram_mb = spec.ram_mb, "compute");
    info!(disk_sizes_gb = ?spec.disk_sizes_gb(), "disks");
    info!(image = %spec.image, image_id = %spec.image_id, "disk image");
    match &spec.billing {
        Billing::Monthly { description, .. } => {
            info!(billing = "monthly", traffic = %description, "billing");
        }
        Billing::Hourly { .. } => info!(billing = "hourly", "billing"),
    }
    if let Some(network) = &spec.private_network {
        info!(name = %network.name, address = %network.address, "private network");
    }
    if spec.startup_script.is_some() {
        info!("with startup script");
    }
    if spec.user_data.is_some() {
        info!("with user data");
    }
    if spec.extra_ssh_key.is_some() {
        info!("with extra SSH key");
    }
    if !spec.tags.is_empty() {
        info!(tags = ?spec.tags, "with tags");
    }
}
