use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use swarm_proto::UnitId;
use tracing::{debug, info};

use crate::{Error, Result};

/// One unit as listed in the roster file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterEntry {
    #[serde(rename = "idRobot")]
    pub id: UnitId,
    #[serde(rename = "ipAddress")]
    pub ip_address: String,
    pub port: u16,
    #[serde(rename = "macAddress", default)]
    pub mac_address: String,
}

impl RosterEntry {
    pub fn new(id: UnitId, ip_address: impl Into<String>, port: u16) -> Self {
        Self {
            id,
            ip_address: ip_address.into(),
            port,
            mac_address: String::new(),
        }
    }

    pub fn with_mac(mut self, mac_address: impl Into<String>) -> Self {
        self.mac_address = mac_address.into();
        self
    }
}

/// On-disk layout of the roster file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RosterFile {
    #[serde(default)]
    pub robots: Vec<RosterEntry>,
}

/// Source of the static unit roster, read once per initialization.
#[async_trait]
pub trait RosterSource: Send + Sync {
    async fn load(&self) -> Result<Vec<RosterEntry>>;
}

/// Sort entries by id and check ids run `1..=n` without gaps.
pub(crate) fn validate_entries(mut entries: Vec<RosterEntry>) -> Result<Vec<RosterEntry>> {
    entries.sort_by_key(|entry| entry.id);
    for (index, entry) in entries.iter().enumerate() {
        let expected = index + 1;
        if entry.id as usize != expected {
            return Err(Error::roster(format!(
                "unit ids must be dense and start at 1: expected {}, found {}",
                expected, entry.id
            )));
        }
        if entry.ip_address.trim().is_empty() {
            return Err(Error::roster(format!("unit {} has no address", entry.id)));
        }
    }
    Ok(entries)
}

/// Roster read from a JSON file: `{"robots":[{"idRobot":1,"ipAddress":..,"port":..,"macAddress":..}]}`.
///
/// A missing file is an empty roster.
#[derive(Debug, Clone)]
pub struct JsonRosterSource {
    path: PathBuf,
}

impl JsonRosterSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl RosterSource for JsonRosterSource {
    async fn load(&self) -> Result<Vec<RosterEntry>> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "Roster file not found, starting with no units");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        let file: RosterFile = serde_json::from_str(&text)?;
        debug!(path = %self.path.display(), units = file.robots.len(), "Loaded roster file");
        validate_entries(file.robots)
    }
}

/// Roster held in memory.
#[derive(Debug, Clone, Default)]
pub struct StaticRosterSource {
    entries: Vec<RosterEntry>,
}

impl StaticRosterSource {
    pub fn new(entries: Vec<RosterEntry>) -> Self {
        Self { entries }
    }
}

#[async_trait]
impl RosterSource for StaticRosterSource {
    async fn load(&self) -> Result<Vec<RosterEntry>> {
        validate_entries(self.entries.clone())
    }
}
