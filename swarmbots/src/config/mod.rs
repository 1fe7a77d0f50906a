//! Fleet configuration and roster sources.

mod roster;

pub use roster::{JsonRosterSource, RosterEntry, RosterFile, RosterSource, StaticRosterSource};

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{Error, Result};

/// Default TCP connect timeout in milliseconds.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 1500;
/// Default period between two liveness rounds in milliseconds.
pub const DEFAULT_PROBE_PERIOD_MS: u64 = 15_000;
/// Default time a unit has to answer a probe in milliseconds.
pub const DEFAULT_PROBE_TIMEOUT_MS: u64 = 5_000;
/// Default number of missed probes tolerated before a unit is dropped.
pub const DEFAULT_MAX_MISSED_PROBES: u32 = 1;
/// Default mailbox capacity of the coordinator and the liveness monitor.
pub const DEFAULT_MAILBOX_CAPACITY: usize = 20;
/// Default capacity of a unit's outbound frame queue.
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 20;

/// Where units should push their video stream once modes are negotiated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamEndpoint {
    pub ip: String,
    pub port: u16,
}

/// Configuration of the whole coordination layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    pub connect_timeout_ms: u64,
    pub probe_period_ms: u64,
    pub probe_timeout_ms: u64,
    pub max_missed_probes: u32,
    pub mailbox_capacity: usize,
    pub outbound_capacity: usize,
    /// Push the controller's clock to each unit during initialization.
    pub sync_clock: bool,
    pub stream_endpoint: Option<StreamEndpoint>,
    /// Hold the fleet in a waiting state after a unit drops until the
    /// operator acknowledges it.
    pub confirm_disconnect: bool,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            probe_period_ms: DEFAULT_PROBE_PERIOD_MS,
            probe_timeout_ms: DEFAULT_PROBE_TIMEOUT_MS,
            max_missed_probes: DEFAULT_MAX_MISSED_PROBES,
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
            sync_clock: true,
            stream_endpoint: None,
            confirm_disconnect: false,
        }
    }
}

impl FleetConfig {
    /// Load a configuration from a JSON file. Missing fields take their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config: FleetConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn probe_period(&self) -> Duration {
        Duration::from_millis(self.probe_period_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    /// Reject values the actors cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.connect_timeout_ms == 0 {
            return Err(Error::validation("connect_timeout_ms must be greater than 0"));
        }
        if self.probe_timeout_ms == 0 {
            return Err(Error::validation("probe_timeout_ms must be greater than 0"));
        }
        if self.probe_period_ms <= self.probe_timeout_ms {
            return Err(Error::validation(
                "probe_period_ms must be greater than probe_timeout_ms",
            ));
        }
        if self.mailbox_capacity == 0 {
            return Err(Error::validation("mailbox_capacity must be greater than 0"));
        }
        if self.outbound_capacity == 0 {
            return Err(Error::validation("outbound_capacity must be greater than 0"));
        }
        if let Some(endpoint) = &self.stream_endpoint {
            swarm_proto::ser::encode_setup_info_str(&endpoint.ip, endpoint.port)?;
        }
        Ok(())
    }

    /// Warn when a full liveness round may outlast the probe period.
    ///
    /// Returns `false` when the period is too short for `roster_len` units.
    pub fn check_probe_budget(&self, roster_len: usize) -> bool {
        let budget = self.probe_timeout_ms.saturating_mul(roster_len as u64);
        if roster_len > 0 && self.probe_period_ms <= budget {
            warn!(
                probe_period_ms = self.probe_period_ms,
                probe_timeout_ms = self.probe_timeout_ms,
                roster_len,
                "Probe period does not cover a full liveness round"
            );
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = FleetConfig::default();
        assert_eq!(config.connect_timeout(), Duration::from_millis(1500));
        assert_eq!(config.probe_period(), Duration::from_secs(15));
        assert_eq!(config.probe_timeout(), Duration::from_secs(5));
        assert_eq!(config.max_missed_probes, 1);
        assert_eq!(config.mailbox_capacity, 20);
        assert_eq!(config.outbound_capacity, 20);
        assert!(config.sync_clock);
        assert!(!config.confirm_disconnect);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let config = FleetConfig {
            mailbox_capacity: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Validation(_))));

        let config = FleetConfig {
            connect_timeout_ms: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_short_period() {
        let config = FleetConfig {
            probe_period_ms: 5_000,
            probe_timeout_ms: 5_000,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_endpoint() {
        let config = FleetConfig {
            stream_endpoint: Some(StreamEndpoint {
                ip: "not an ip".to_string(),
                port: 5000,
            }),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_probe_budget() {
        let config = FleetConfig::default();
        assert!(config.check_probe_budget(2));
        assert!(!config.check_probe_budget(3));
        assert!(config.check_probe_budget(0));
    }

    #[test]
    fn test_from_file_partial() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"probe_timeout_ms": 2000, "stream_endpoint": {{"ip": "192.168.1.10", "port": 5000}}}}"#
        )
        .unwrap();

        let config = FleetConfig::from_file(file.path()).unwrap();
        assert_eq!(config.probe_timeout_ms, 2000);
        assert_eq!(config.probe_period_ms, DEFAULT_PROBE_PERIOD_MS);
        assert_eq!(
            config.stream_endpoint,
            Some(StreamEndpoint {
                ip: "192.168.1.10".to_string(),
                port: 5000
            })
        );
    }
}
