//! Mapping of the provider power field to machine states.

use tracing::debug;

use super::api::Transport;
use super::{DriverError, KamateraDriver};
use crate::driver::MachineState;

/// Raw power observation for the machine's server.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PowerReading {
    /// Power field `on`.
    On,
    /// Power field `off`.
    Off,
    /// Any other power value.
    Other(String),
    /// The listing succeeded but holds no server with the recorded name.
    Missing,
    /// The listing itself failed after its retries.
    Unreachable(String),
}

impl PowerReading {
    /// Maps the raw `power` field of a server listing.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        match raw {
            "on" => Self::On,
            "off" => Self::Off,
            other => Self::Other(other.to_owned()),
        }
    }

    /// Folds the reading into a [`MachineState`].
    ///
    /// An unreachable listing is reported as [`MachineState::Starting`].
    #[must_use]
    pub const fn machine_state(&self) -> MachineState {
        match self {
            Self::On => MachineState::Running,
            Self::Off => MachineState::Stopped,
            Self::Other(_) | Self::Missing => MachineState::Error,
            Self::Unreachable(_) => MachineState::Starting,
        }
    }
}

impl<T, R> KamateraDriver<T, R>
where
    T: Transport,
{
    /// Reads the power field of the machine's server.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::NotProvisioned`] when no server name is
    /// recorded. API failures are folded into [`PowerReading::Unreachable`].
    pub async fn power_reading(&self) -> Result<PowerReading, DriverError> {
        let server_name = self.server_name()?;
        match self.list_servers().await {
            Ok(servers) => Ok(servers
                .iter()
                .find(|server| server.name == server_name)
                .map_or(PowerReading::Missing, |server| {
                    PowerReading::parse(&server.power)
                })),
            Err(err) => {
                debug!(error = %err, "server listing failed");
                Ok(PowerReading::Unreachable(err.to_string()))
            }
        }
    }

    /// Returns the folded machine state.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::NotProvisioned`] when no server name is
    /// recorded.
    pub async fn machine_state(&self) -> Result<MachineState, DriverError> {
        Ok(self.power_reading().await?.machine_state())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kamatera::test_driver;
    use crate::test_support::{ScriptedRunner, ScriptedTransport, json_server_list};
    use rstest::rstest;

    #[rstest]
    #[case("on", MachineState::Running)]
    #[case("off", MachineState::Stopped)]
    #[case("suspended", MachineState::Error)]
    fn maps_power_field(#[case] raw: &str, #[case] expected: MachineState) {
        assert_eq!(PowerReading::parse(raw).machine_state(), expected);
    }

    #[rstest]
    #[case::on("on", MachineState::Running)]
    #[case::off("off", MachineState::Stopped)]
    #[tokio::test]
    async fn reads_power_of_named_server(#[case] power: &str, #[case] expected: MachineState) {
        let transport = ScriptedTransport::new();
        transport.push_json(
            200,
            &json_server_list(&[("1", "other", "off"), ("2", "worker-abcdef", power)]),
        );
        let mut driver = test_driver(transport, ScriptedRunner::new());
        driver.record.server_name = Some(String::from("worker-abcdef"));

        let state = driver.machine_state().await.expect("state should resolve");

        assert_eq!(state, expected);
    }

    #[tokio::test]
    async fn exhausted_listing_reports_starting() {
        let transport = ScriptedTransport::new();
        for _ in 0..10 {
            transport.push_json(503, "unavailable");
        }
        let mut driver = test_driver(transport.clone(), ScriptedRunner::new());
        driver.record.server_name = Some(String::from("worker-abcdef"));

        let reading = driver.power_reading().await.expect("reading");

        assert!(
            matches!(reading, PowerReading::Unreachable(ref message) if message.contains("503")),
            "{reading:?}"
        );
        assert_eq!(reading.machine_state(), MachineState::Starting);
        assert_eq!(transport.requests().len(), 10);
    }

    #[tokio::test]
    async fn absent_server_is_an_error_state() {
        let transport = ScriptedTransport::new();
        transport.push_json(200, "[]");
        let mut driver = test_driver(transport, ScriptedRunner::new());
        driver.record.server_name = Some(String::from("worker-abcdef"));

        let reading = driver.power_reading().await.expect("reading");

        assert_eq!(reading, PowerReading::Missing);
        assert_eq!(reading.machine_state(), MachineState::Error);
    }
}
