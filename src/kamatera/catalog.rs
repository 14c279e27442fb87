//! Validation of a requested server against the provider catalog.
//!
//! The catalog is fetched fresh for every creation. Validation itself is a
//! pure function from ([`ServerRequest`], [`Catalog`]) to [`ServerSpec`] so it
//! can be exercised without a transport.

use std::fmt::Write as _;

use thiserror::Error;
use tracing::info;

use super::api::models::{Catalog, TrafficPackage};
use super::api::{ApiError, ApiRequest, CallStyle, Transport};
use super::KamateraDriver;
use crate::request::{PrivateNetworkRequest, ServerRequest};

/// Smallest RAM size accepted, in MB.
pub const MIN_RAM_MB: u32 = 999;
/// Maximum number of disks besides the primary one.
pub const MAX_EXTRA_DISKS: usize = 3;
/// Traffic package used for every non-monthly billing mode.
pub const DEFAULT_HOURLY_TRAFFIC: &str = "t5000";
/// Sentinel asking the console to pick a private address.
pub const AUTO_ADDRESS: &str = "auto";

const MONTHLY: &str = "monthly";

/// Billing mode with its resolved traffic package.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Billing {
    /// Pay per hour; traffic is always [`DEFAULT_HOURLY_TRAFFIC`].
    Hourly {
        /// Traffic package identifier.
        traffic: String,
    },
    /// Pay per month with a datacenter-specific traffic package.
    Monthly {
        /// Traffic package identifier.
        traffic: String,
        /// Package description from the catalog.
        description: String,
    },
}

impl Billing {
    /// Returns the traffic package identifier sent to the console.
    #[must_use]
    pub fn traffic(&self) -> &str {
        match self {
            Self::Hourly { traffic } | Self::Monthly { traffic, .. } => traffic,
        }
    }

    /// Returns the console's numeric billing flag (0 monthly, 1 hourly).
    #[must_use]
    pub const fn mode_flag(&self) -> u8 {
        match self {
            Self::Monthly { .. } => 0,
            Self::Hourly { .. } => 1,
        }
    }
}

/// Private network attachment with a resolved address.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PrivateNetwork {
    /// Network name.
    pub name: String,
    /// Requested address or [`AUTO_ADDRESS`].
    pub address: String,
}

/// Validated, immutable description of the server to create.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ServerSpec {
    /// Datacenter code, for example `EU`.
    pub datacenter: String,
    /// Datacenter display name.
    pub datacenter_name: String,
    /// CPU class, for example `2B`.
    pub cpu: String,
    /// RAM in MB.
    pub ram_mb: u32,
    /// Primary disk size in GB.
    pub disk_size_gb: u32,
    /// Additional disk sizes in GB, at most [`MAX_EXTRA_DISKS`].
    pub extra_disk_sizes_gb: Vec<u32>,
    /// Image description as requested.
    pub image: String,
    /// Image identifier resolved in the datacenter.
    pub image_id: String,
    /// Billing mode and traffic package.
    pub billing: Billing,
    /// Optional private network.
    pub private_network: Option<PrivateNetwork>,
    /// Startup script text.
    pub startup_script: Option<String>,
    /// Additional public key installed by the console.
    pub extra_ssh_key: Option<String>,
    /// User-data text.
    pub user_data: Option<String>,
    /// Tags applied to the server.
    pub tags: Vec<String>,
}

impl ServerSpec {
    /// Disk sizes in creation order: primary first, then extras.
    #[must_use]
    pub fn disk_sizes_gb(&self) -> Vec<u32> {
        std::iter::once(self.disk_size_gb)
            .chain(self.extra_disk_sizes_gb.iter().copied())
            .collect()
    }

    /// Returns the CPU type, the last character of the CPU class.
    #[must_use]
    pub fn cpu_type(&self) -> String {
        self.cpu
            .chars()
            .next_back()
            .map(String::from)
            .unwrap_or_default()
    }
}

/// Mismatch between the request and the catalog.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ValidationError {
    /// Datacenter code unknown to the catalog.
    #[error("invalid datacenter: {0}")]
    Datacenter(String),
    /// CPU class not offered.
    #[error("invalid CPU: {0}")]
    Cpu(String),
    /// RAM below [`MIN_RAM_MB`].
    #[error("insufficient RAM ({0} MB), please use at least 1GB of RAM")]
    InsufficientRam(u32),
    /// Primary disk size not offered.
    #[error("invalid disk size: {0}")]
    DiskSize(u32),
    /// Extra disk entry is not a number.
    #[error("invalid extra disk size: '{0}'")]
    ExtraDiskSyntax(String),
    /// Extra disk size not offered.
    #[error("invalid extra disk size: {0} GB not available in server options")]
    ExtraDiskSize(u32),
    /// More than [`MAX_EXTRA_DISKS`] extra disks.
    #[error("too many extra disk sizes ({0}): maximum allowed is 3")]
    TooManyExtraDisks(usize),
    /// Billing mode not offered.
    #[error("invalid billing: {0}")]
    Billing(String),
    /// Image description not found in the datacenter.
    #[error("invalid disk image: {image} (datacenter {datacenter})")]
    Image {
        /// Requested image description.
        image: String,
        /// Datacenter searched.
        datacenter: String,
    },
    /// Monthly billing without a resolvable traffic package.
    #[error(
        "traffic is required when using monthly billing, please choose from the available traffic options:\n{options}"
    )]
    Traffic {
        /// Rendered option table.
        options: String,
    },
}

impl ValidationError {
    /// Name of the configuration field that failed.
    #[must_use]
    pub const fn field(&self) -> &'static str {
        match self {
            Self::Datacenter(_) => "datacenter",
            Self::Cpu(_) => "cpu",
            Self::InsufficientRam(_) => "ram",
            Self::DiskSize(_) => "disk_size",
            Self::ExtraDiskSyntax(_) | Self::ExtraDiskSize(_) | Self::TooManyExtraDisks(_) => {
                "extra_disk_sizes"
            }
            Self::Billing(_) => "billing",
            Self::Image { .. } => "image",
            Self::Traffic { .. } => "traffic",
        }
    }
}

/// Checks `request` against `catalog` and resolves derived values.
///
/// # Errors
///
/// Returns the first [`ValidationError`] encountered.
pub fn validate_request(
    request: &ServerRequest,
    catalog: &Catalog,
) -> Result<ServerSpec, ValidationError> {
    if request.ram_mb < MIN_RAM_MB {
        return Err(ValidationError::InsufficientRam(request.ram_mb));
    }

    let datacenter_name = catalog
        .datacenters
        .get(&request.datacenter)
        .filter(|name| !name.is_empty())
        .cloned()
        .ok_or_else(|| ValidationError::Datacenter(request.datacenter.clone()))?;

    if !catalog.cpu.contains(&request.cpu) {
        return Err(ValidationError::Cpu(request.cpu.clone()));
    }
    if !catalog.disk.contains(&request.disk_size_gb) {
        return Err(ValidationError::DiskSize(request.disk_size_gb));
    }
    let extra_disk_sizes_gb = parse_extra_disks(request.extra_disk_sizes.as_deref(), catalog)?;

    if !catalog.billing.contains(&request.billing) {
        return Err(ValidationError::Billing(request.billing.clone()));
    }

    let image_id = catalog
        .disk_images
        .get(&request.datacenter)
        .and_then(|images| {
            images
                .iter()
                .find(|image| image.description == request.image)
        })
        .map(|image| image.id.clone())
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ValidationError::Image {
            image: request.image.clone(),
            datacenter: request.datacenter.clone(),
        })?;

    let private_network = request.private_network.as_ref().map(resolve_network);

    let packages = catalog
        .traffic
        .get(&request.datacenter)
        .map(Vec::as_slice)
        .unwrap_or_default();
    let billing = resolve_billing(&request.billing, request.traffic.as_deref(), packages)?;

    Ok(ServerSpec {
        datacenter: request.datacenter.clone(),
        datacenter_name,
        cpu: request.cpu.clone(),
        ram_mb: request.ram_mb,
        disk_size_gb: request.disk_size_gb,
        extra_disk_sizes_gb,
        image: request.image.clone(),
        image_id,
        billing,
        private_network,
        startup_script: request.startup_script.clone(),
        extra_ssh_key: request.extra_ssh_key.clone(),
        user_data: request.user_data.clone(),
        tags: request.tags.clone(),
    })
}

fn parse_extra_disks(raw: Option<&str>, catalog: &Catalog) -> Result<Vec<u32>, ValidationError> {
    let Some(list) = raw.filter(|value| !value.trim().is_empty()) else {
        return Ok(Vec::new());
    };

    let mut sizes = Vec::new();
    for entry in list.split(',') {
        let size: u32 = entry
            .trim()
            .parse()
            .map_err(|_| ValidationError::ExtraDiskSyntax(entry.to_owned()))?;
        if !catalog.disk.contains(&size) {
            return Err(ValidationError::ExtraDiskSize(size));
        }
        sizes.push(size);
    }

    if sizes.len() > MAX_EXTRA_DISKS {
        return Err(ValidationError::TooManyExtraDisks(sizes.len()));
    }
    Ok(sizes)
}

fn resolve_network(request: &PrivateNetworkRequest) -> PrivateNetwork {
    PrivateNetwork {
        name: request.name.clone(),
        address: request
            .address
            .clone()
            .filter(|address| !address.is_empty())
            .unwrap_or_else(|| AUTO_ADDRESS.to_owned()),
    }
}

fn resolve_billing(
    billing: &str,
    requested: Option<&str>,
    packages: &[TrafficPackage],
) -> Result<Billing, ValidationError> {
    if billing != MONTHLY {
        return Ok(Billing::Hourly {
            traffic: DEFAULT_HOURLY_TRAFFIC.to_owned(),
        });
    }

    let selected = match requested.filter(|value| !value.is_empty()) {
        Some(id) => packages.iter().find(|package| package.id == id),
        None => packages.first(),
    };

    selected
        .map(|package| Billing::Monthly {
            traffic: package.id.clone(),
            description: package.info.clone(),
        })
        .ok_or_else(|| ValidationError::Traffic {
            options: render_traffic_options(packages),
        })
}

/// Renders the traffic table shown when no package can be chosen.
#[must_use]
pub fn render_traffic_options(packages: &[TrafficPackage]) -> String {
    let mut table =
        String::from("Available traffic options for monthly package:\n Traffic | Description\n");
    for package in packages {
        writeln!(table, "{:>8} | {}", package.id, package.info).ok();
    }
    table
}

impl<T, R> KamateraDriver<T, R>
where
    T: Transport,
{
    /// Fetches the catalog once and validates `request` against it.
    pub(super) async fn validate_against_catalog(
        &self,
        request: &ServerRequest,
    ) -> Result<ServerSpec, super::DriverError> {
        let catalog = self.fetch_catalog().await?;
        let spec = validate_request(request, &catalog)?;
        info!(
            datacenter = %spec.datacenter_name,
            image_id = %spec.image_id,
            traffic = spec.billing.traffic(),
            "server options validated"
        );
        Ok(spec)
    }

    async fn fetch_catalog(&self) -> Result<Catalog, ApiError> {
        self.client
            .call(
                &ApiRequest::get("/service/server"),
                CallStyle::Submit,
                "get Kamatera server options",
            )
            .await
    }
}
