use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use swarmbots::config::{FleetConfig, StreamEndpoint};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Roster file listing the units (`{"robots":[...]}`)
    #[arg(short, long, env = "SWARM_ROSTER", default_value = "robots.json")]
    pub roster: PathBuf,

    /// JSON configuration file; flags below override its values
    #[arg(short, long, env = "SWARM_CONFIG")]
    pub config: Option<PathBuf>,

    #[arg(long, env = "SWARM_CONNECT_TIMEOUT_MS")]
    pub connect_timeout_ms: Option<u64>,

    #[arg(long, env = "SWARM_PROBE_PERIOD_MS")]
    pub probe_period_ms: Option<u64>,

    #[arg(long, env = "SWARM_PROBE_TIMEOUT_MS")]
    pub probe_timeout_ms: Option<u64>,

    #[arg(long, env = "SWARM_MAX_MISSED_PROBES")]
    pub max_missed_probes: Option<u32>,

    /// Do not push the local clock to units during initialization
    #[arg(long)]
    pub no_clock_sync: bool,

    /// Stream endpoint sent to units after mode negotiation, as `ip:port`
    #[arg(long, env = "SWARM_STREAM_ENDPOINT")]
    pub stream_endpoint: Option<String>,

    /// Hold the fleet after a unit drops until it is acknowledged
    #[arg(long)]
    pub confirm_disconnect: bool,

    /// Ask every connected unit for its mode after initialization
    #[arg(long)]
    pub negotiate: bool,

    /// Log filter directive, e.g. `swarmbots=debug`
    #[arg(long, env = "SWARM_LOG")]
    pub log_filter: Option<String>,

    /// Emit logs as JSON
    #[arg(long)]
    pub json_logs: bool,

    /// Print roster and events as JSON lines
    #[arg(long)]
    pub json: bool,

    /// Keep unit logs in memory and print them on exit
    #[arg(long)]
    pub dump_logs: bool,
}

impl Args {
    /// Build the fleet configuration: file first, then flags.
    pub fn fleet_config(&self) -> anyhow::Result<FleetConfig> {
        let mut config = match &self.config {
            Some(path) => FleetConfig::from_file(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?,
            None => FleetConfig::default(),
        };

        if let Some(ms) = self.connect_timeout_ms {
            config.connect_timeout_ms = ms;
        }
        if let Some(ms) = self.probe_period_ms {
            config.probe_period_ms = ms;
        }
        if let Some(ms) = self.probe_timeout_ms {
            config.probe_timeout_ms = ms;
        }
        if let Some(max) = self.max_missed_probes {
            config.max_missed_probes = max;
        }
        if self.no_clock_sync {
            config.sync_clock = false;
        }
        if self.confirm_disconnect {
            config.confirm_disconnect = true;
        }
        if let Some(endpoint) = &self.stream_endpoint {
            config.stream_endpoint = Some(parse_endpoint(endpoint)?);
        }

        config.validate().context("Invalid fleet configuration")?;
        Ok(config)
    }
}

fn parse_endpoint(value: &str) -> anyhow::Result<StreamEndpoint> {
    let (ip, port) = value
        .rsplit_once(':')
        .with_context(|| format!("Stream endpoint must be ip:port, got {}", value))?;
    let port = port
        .parse()
        .with_context(|| format!("Invalid stream port: {}", port))?;
    Ok(StreamEndpoint {
        ip: ip.to_string(),
        port,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fleet.json");
        std::fs::write(&path, r#"{"probe_period_ms": 20000, "sync_clock": true}"#).unwrap();

        let args = Args::parse_from([
            "swarm",
            "--config",
            path.to_str().unwrap(),
            "--probe-timeout-ms",
            "4000",
            "--no-clock-sync",
            "--stream-endpoint",
            "10.0.0.9:8554",
        ]);
        let config = args.fleet_config().unwrap();

        assert_eq!(config.probe_period_ms, 20_000);
        assert_eq!(config.probe_timeout_ms, 4_000);
        assert!(!config.sync_clock);
        assert_eq!(
            config.stream_endpoint,
            Some(StreamEndpoint {
                ip: "10.0.0.9".to_string(),
                port: 8554
            })
        );
    }

    #[test]
    fn test_invalid_overrides_rejected() {
        let args = Args::parse_from(["swarm", "--stream-endpoint", "10.0.0.9"]);
        assert!(args.fleet_config().is_err());

        let args = Args::parse_from(["swarm", "--probe-period-ms", "100", "--probe-timeout-ms", "200"]);
        assert!(args.fleet_config().is_err());
    }
}
