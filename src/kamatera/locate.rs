//! Resolution of the generated server name to the provider id.

use tracing::debug;

use super::api::models::ServerSummary;
use super::api::{ApiError, ApiRequest, CallStyle, Transport};
use super::{DriverError, KamateraDriver};

const SERVERS_PATH: &str = "/service/servers";

impl<T, R> KamateraDriver<T, R>
where
    T: Transport,
{
    /// Lists every server on the account.
    pub(super) async fn list_servers(&self) -> Result<Vec<ServerSummary>, ApiError> {
        self.client
            .call(
                &ApiRequest::get(SERVERS_PATH),
                CallStyle::Fetch,
                "list Kamatera servers",
            )
            .await
    }

    /// Returns the generated server name recorded for this machine.
    pub(super) fn server_name(&self) -> Result<&str, DriverError> {
        self.record
            .server_name
            .as_deref()
            .ok_or_else(|| DriverError::NotProvisioned {
                machine: self.settings.machine_name.clone(),
            })
    }

    /// Resolves the provider id, listing servers only on the first call.
    pub(super) async fn server_id(&mut self) -> Result<String, DriverError> {
        if let Some(id) = &self.record.server_id {
            return Ok(id.clone());
        }

        let server_name = self.server_name()?.to_owned();
        let servers = self.list_servers().await?;
        let id = servers
            .into_iter()
            .find(|server| server.name == server_name)
            .map(|server| server.id)
            .ok_or(DriverError::ServerNotFound { server_name })?;

        debug!(server_id = %id, "resolved Kamatera server ID");
        self.record.server_id = Some(id.clone());
        Ok(id)
    }
}
