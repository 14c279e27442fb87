//! Wire shapes exchanged with the console API.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};

/// Capability snapshot returned by `GET /service/server`.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct Catalog {
    /// Datacenter code to display name.
    #[serde(default)]
    pub datacenters: BTreeMap<String, String>,
    /// Orderable CPU classes, for example `2B`.
    #[serde(default)]
    pub cpu: Vec<String>,
    /// Orderable disk sizes in GB.
    #[serde(default)]
    pub disk: Vec<u32>,
    /// Billing modes, for example `hourly` and `monthly`.
    #[serde(default)]
    pub billing: Vec<String>,
    /// Disk images per datacenter code.
    #[serde(default, rename = "diskImages")]
    pub disk_images: BTreeMap<String, Vec<DiskImage>>,
    /// Private networks per datacenter code.
    #[serde(default)]
    pub networks: BTreeMap<String, Vec<NetworkInfo>>,
    /// Monthly traffic packages per datacenter code.
    #[serde(default)]
    pub traffic: BTreeMap<String, Vec<TrafficPackage>>,
}

/// Disk image offered in a datacenter.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
pub struct DiskImage {
    /// Human readable name used to select the image.
    #[serde(default)]
    pub description: String,
    /// Provider identifier sent in the create payload.
    #[serde(default)]
    pub id: String,
    /// Image size in GB, when reported.
    #[serde(default, rename = "sizeGB")]
    pub size_gb: Option<u32>,
}

/// Private network available in a datacenter.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct NetworkInfo {
    /// Network name.
    #[serde(default)]
    pub name: String,
    /// Address pool as reported by the console; its shape varies.
    #[serde(default)]
    pub ips: serde_json::Value,
}

/// Monthly traffic package.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
pub struct TrafficPackage {
    /// Package identifier. The console sends either strings or numbers.
    #[serde(default, deserialize_with = "string_or_number")]
    pub id: String,
    /// Description shown to operators.
    #[serde(default)]
    pub info: String,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::String(text) => text,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    })
}

/// Queue entry returned by `GET /service/queue/{id}`.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
pub struct JobRecord {
    /// Raw job status.
    #[serde(default)]
    pub status: String,
    /// Server the job acts on, when reported.
    #[serde(default)]
    pub server: Option<String>,
    /// Job description, when reported.
    #[serde(default)]
    pub description: Option<String>,
    /// Free text progress log.
    #[serde(default)]
    pub log: Option<String>,
}

impl JobRecord {
    /// Returns the log text, or an empty string when absent.
    #[must_use]
    pub fn log_text(&self) -> &str {
        self.log.as_deref().unwrap_or_default()
    }
}

/// Entry of `GET /service/servers`.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
pub struct ServerSummary {
    /// Provider identifier.
    #[serde(default)]
    pub id: String,
    /// Datacenter code.
    #[serde(default)]
    pub datacenter: String,
    /// Server name.
    #[serde(default)]
    pub name: String,
    /// Raw power field, usually `on` or `off`.
    #[serde(default)]
    pub power: String,
}

/// Tag attached at creation time.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct TagEntry {
    /// Tag value.
    pub value: String,
    /// Tag label.
    pub label: String,
}

/// Body of `POST /svc/serverCreate`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateServerPayload {
    pub(crate) datacenter: String,
    pub(crate) n_servers: u32,
    pub(crate) names: Vec<String>,
    pub(crate) cpu_str: String,
    pub(crate) cpu_type: String,
    #[serde(rename = "ramMB")]
    pub(crate) ram_mb: u32,
    #[serde(rename = "diskSizesGB")]
    pub(crate) disk_sizes_gb: Vec<u32>,
    pub(crate) password: String,
    pub(crate) password_validate: String,
    pub(crate) managed: bool,
    pub(crate) backup: bool,
    pub(crate) billing_mode: u8,
    pub(crate) traffic_package: String,
    pub(crate) use_simple_networking: bool,
    pub(crate) power_on_completion: bool,
    pub(crate) use_simple_wan: bool,
    pub(crate) use_simple_lan: bool,
    pub(crate) net_modes: Vec<String>,
    pub(crate) net_names: Vec<String>,
    pub(crate) net_subnets: Vec<String>,
    pub(crate) net_prefixes: Vec<u32>,
    pub(crate) net_ips: Vec<String>,
    pub(crate) disk_image_id: String,
    pub(crate) source_server_id: String,
    pub(crate) user_id: u64,
    pub(crate) owner_id: u64,
    #[serde(rename = "srcUI")]
    pub(crate) src_ui: bool,
    pub(crate) selected_key: String,
    pub(crate) script: String,
    #[serde(rename = "selectedSSHKeyValue")]
    pub(crate) selected_ssh_key_value: String,
    pub(crate) selected_tags: Vec<TagEntry>,
    pub(crate) user_data: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_accepts_numeric_traffic_ids() {
        let raw = r#"{
            "datacenters": {"EU": "Amsterdam"},
            "cpu": ["1B", "2B"],
            "disk": [10, 20],
            "billing": ["hourly", "monthly"],
            "diskImages": {"EU": [{"description": "ubuntu", "id": "img-1", "sizeGB": 10}]},
            "traffic": {"EU": [{"id": 5000, "info": "5TB"}, {"id": "t2000", "info": "2TB"}]}
        }"#;
        let catalog: Catalog = serde_json::from_str(raw).expect("catalog should parse");
        let ids: Vec<_> = catalog
            .traffic
            .get("EU")
            .map(|packages| packages.iter().map(|p| p.id.as_str()).collect())
            .unwrap_or_default();
        assert_eq!(ids, vec!["5000", "t2000"]);
        assert_eq!(catalog.disk_images.get("EU").map(Vec::len), Some(1));
        assert!(catalog.networks.is_empty());
    }

    #[test]
    fn job_record_tolerates_null_fields() {
        let record: JobRecord =
            serde_json::from_str(r#"{"status":"running","log":null}"#).expect("parse");
        assert_eq!(record.status, "running");
        assert_eq!(record.log_text(), "");
    }
}
