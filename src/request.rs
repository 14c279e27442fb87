//! Unvalidated server request assembled from configuration.
//!
//! A [`ServerRequest`] only guarantees that required fields are present.
//! Checking the values against what the provider actually sells happens in
//! [`crate::kamatera::catalog::validate_request`].

use thiserror::Error;

/// Private network requested for the server.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PrivateNetworkRequest {
    /// Network name as listed by the provider.
    pub name: String,
    /// Fixed address; `None` lets the provider pick one.
    pub address: Option<String>,
}

/// Candidate server options before catalog validation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ServerRequest {
    /// Datacenter code, for example `EU`.
    pub datacenter: String,
    /// Billing mode, `hourly` or `monthly`.
    pub billing: String,
    /// Traffic package for monthly billing.
    pub traffic: Option<String>,
    /// CPU class, for example `1B`.
    pub cpu: String,
    /// RAM in MB.
    pub ram_mb: u32,
    /// Primary disk size in GB.
    pub disk_size_gb: u32,
    /// Comma separated extra disk sizes in GB.
    pub extra_disk_sizes: Option<String>,
    /// Image description.
    pub image: String,
    /// Optional private network.
    pub private_network: Option<PrivateNetworkRequest>,
    /// Startup script text.
    pub startup_script: Option<String>,
    /// Additional public key text.
    pub extra_ssh_key: Option<String>,
    /// User-data text.
    pub user_data: Option<String>,
    /// Server tags.
    pub tags: Vec<String>,
}

impl ServerRequest {
    /// Starts a builder for a [`ServerRequest`].
    #[must_use]
    pub fn builder() -> ServerRequestBuilder {
        ServerRequestBuilder::new()
    }

    /// Checks that required string fields are not empty.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::MissingField`] naming the first empty field.
    pub fn validate(&self) -> Result<(), RequestError> {
        for (field, value) in [
            ("datacenter", &self.datacenter),
            ("billing", &self.billing),
            ("cpu", &self.cpu),
            ("image", &self.image),
        ] {
            if value.is_empty() {
                return Err(RequestError::MissingField(field.to_owned()));
            }
        }
        if let Some(network) = &self.private_network
            && network.name.is_empty()
        {
            return Err(RequestError::MissingField(String::from(
                "private_network_name",
            )));
        }
        Ok(())
    }
}

/// Builder for [`ServerRequest`] that trims inputs and validates on build.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ServerRequestBuilder {
    datacenter: String,
    billing: String,
    traffic: Option<String>,
    cpu: String,
    ram_mb: u32,
    disk_size_gb: u32,
    extra_disk_sizes: Option<String>,
    image: String,
    private_network_name: Option<String>,
    private_network_address: Option<String>,
    startup_script: Option<String>,
    extra_ssh_key: Option<String>,
    user_data: Option<String>,
    tags: Vec<String>,
}

impl ServerRequestBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the datacenter code.
    #[must_use]
    pub fn datacenter(mut self, value: impl Into<String>) -> Self {
        self.datacenter = value.into();
        self
    }

    /// Sets the billing mode.
    #[must_use]
    pub fn billing(mut self, value: impl Into<String>) -> Self {
        self.billing = value.into();
        self
    }

    /// Sets the monthly traffic package.
    #[must_use]
    pub fn traffic(mut self, value: Option<String>) -> Self {
        self.traffic = value;
        self
    }

    /// Sets the CPU class.
    #[must_use]
    pub fn cpu(mut self, value: impl Into<String>) -> Self {
        self.cpu = value.into();
        self
    }

    /// Sets RAM in MB.
    #[must_use]
    pub const fn ram_mb(mut self, value: u32) -> Self {
        self.ram_mb = value;
        self
    }

    /// Sets the primary disk size in GB.
    #[must_use]
    pub const fn disk_size_gb(mut self, value: u32) -> Self {
        self.disk_size_gb = value;
        self
    }

    /// Sets the comma separated extra disk sizes.
    #[must_use]
    pub fn extra_disk_sizes(mut self, value: Option<String>) -> Self {
        self.extra_disk_sizes = value;
        self
    }

    /// Sets the image description.
    #[must_use]
    pub fn image(mut self, value: impl Into<String>) -> Self {
        self.image = value.into();
        self
    }

    /// Sets the private network name and optional address.
    #[must_use]
    pub fn private_network(mut self, name: Option<String>, address: Option<String>) -> Self {
        self.private_network_name = name;
        self.private_network_address = address;
        self
    }

    /// Sets the startup script text.
    #[must_use]
    pub fn startup_script(mut self, value: Option<String>) -> Self {
        self.startup_script = value;
        self
    }

    /// Sets the additional public key text.
    #[must_use]
    pub fn extra_ssh_key(mut self, value: Option<String>) -> Self {
        self.extra_ssh_key = value;
        self
    }

    /// Sets the user-data text.
    #[must_use]
    pub fn user_data(mut self, value: Option<String>) -> Self {
        self.user_data = value;
        self
    }

    /// Sets the server tags.
    #[must_use]
    pub fn tags(mut self, value: Vec<String>) -> Self {
        self.tags = value;
        self
    }

    /// Builds and validates the request, trimming identifiers.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::MissingField`] when a required field is empty.
    pub fn build(self) -> Result<ServerRequest, RequestError> {
        let private_network = trimmed(self.private_network_name).map(|name| PrivateNetworkRequest {
            name,
            address: trimmed(self.private_network_address),
        });
        let request = ServerRequest {
            datacenter: self.datacenter.trim().to_owned(),
            billing: self.billing.trim().to_owned(),
            traffic: trimmed(self.traffic),
            cpu: self.cpu.trim().to_owned(),
            ram_mb: self.ram_mb,
            disk_size_gb: self.disk_size_gb,
            extra_disk_sizes: trimmed(self.extra_disk_sizes),
            image: self.image.trim().to_owned(),
            private_network,
            startup_script: non_empty(self.startup_script),
            extra_ssh_key: non_empty(self.extra_ssh_key),
            user_data: non_empty(self.user_data),
            tags: self
                .tags
                .into_iter()
                .map(|tag| tag.trim().to_owned())
                .filter(|tag| !tag.is_empty())
                .collect(),
        };
        request.validate()?;
        Ok(request)
    }
}

fn trimmed(value: Option<String>) -> Option<String> {
    value
        .map(|raw| raw.trim().to_owned())
        .filter(|clean| !clean.is_empty())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|raw| !raw.trim().is_empty())
}

/// Errors raised while building a [`ServerRequest`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum RequestError {
    /// A required field is empty.
    #[error("missing or empty field: {0}")]
    MissingField(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn base() -> ServerRequestBuilder {
        ServerRequest::builder()
            .datacenter(" EU ")
            .billing("hourly")
            .cpu("1B")
            .ram_mb(1024)
            .disk_size_gb(10)
            .image("ubuntu_server_18.04_64-bit")
    }

    #[rstest]
    fn build_trims_and_drops_blank_optionals() {
        let request = base()
            .traffic(Some(String::from("  ")))
            .private_network(Some(String::from(" lan-1 ")), Some(String::new()))
            .tags(vec![String::from(" db "), String::from(" ")])
            .build()
            .expect("request should build");

        assert_eq!(request.datacenter, "EU");
        assert_eq!(request.traffic, None);
        assert_eq!(
            request.private_network,
            Some(PrivateNetworkRequest {
                name: String::from("lan-1"),
                address: None,
            })
        );
        assert_eq!(request.tags, vec![String::from("db")]);
    }

    #[rstest]
    #[case::datacenter(base().datacenter(""), "datacenter")]
    #[case::billing(base().billing(" "), "billing")]
    #[case::cpu(base().cpu(""), "cpu")]
    #[case::image(base().image(""), "image")]
    fn build_rejects_missing_fields(#[case] builder: ServerRequestBuilder, #[case] field: &str) {
        let err = builder.build().expect_err("build should fail");
        assert_eq!(err, RequestError::MissingField(field.to_owned()));
    }

    #[rstest]
    fn startup_script_keeps_original_whitespace() {
        let request = base()
            .startup_script(Some(String::from("#!/bin/sh\necho hi\n")))
            .build()
            .expect("request should build");
        assert_eq!(
            request.startup_script.as_deref(),
            Some("#!/bin/sh\necho hi\n")
        );
    }
}
