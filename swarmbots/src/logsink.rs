//! Destination for unit log lines and per-unit diagnostics.

use chrono::{DateTime, Local};
use parking_lot::Mutex;
use serde::Serialize;
use swarm_proto::UnitId;
use tracing::{Level, debug, error, info, trace, warn};

/// Receives messages about units and the log lines units send back.
pub trait LogSink: Send + Sync {
    fn log(&self, unit_id: UnitId, level: Level, message: &str);

    fn unit_logs(&self, unit_id: UnitId, lines: &[String]);
}

/// Forwards everything to `tracing` under the `swarmbots::unit` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogSink;

impl LogSink for TracingLogSink {
    fn log(&self, unit_id: UnitId, level: Level, message: &str) {
        match level {
            Level::ERROR => error!(target: "swarmbots::unit", unit_id, "{}", message),
            Level::WARN => warn!(target: "swarmbots::unit", unit_id, "{}", message),
            Level::INFO => info!(target: "swarmbots::unit", unit_id, "{}", message),
            Level::DEBUG => debug!(target: "swarmbots::unit", unit_id, "{}", message),
            _ => trace!(target: "swarmbots::unit", unit_id, "{}", message),
        }
    }

    fn unit_logs(&self, unit_id: UnitId, lines: &[String]) {
        for line in lines {
            info!(target: "swarmbots::unit", unit_id, remote = true, "{}", line);
        }
    }
}

/// A log entry kept by [`MemoryLogSink`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Local>,
    pub unit_id: UnitId,
    pub level: String,
    pub message: String,
    /// Line sent by the unit itself rather than produced locally.
    pub remote: bool,
}

/// Keeps every entry in memory. Also mirrors entries to `tracing`.
#[derive(Debug, Default)]
pub struct MemoryLogSink {
    entries: Mutex<Vec<LogEntry>>,
}

impl MemoryLogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().clone()
    }

    pub fn entries_for(&self, unit_id: UnitId) -> Vec<LogEntry> {
        self.entries
            .lock()
            .iter()
            .filter(|entry| entry.unit_id == unit_id)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    fn push(&self, unit_id: UnitId, level: Level, message: &str, remote: bool) {
        self.entries.lock().push(LogEntry {
            timestamp: Local::now(),
            unit_id,
            level: level.to_string(),
            message: message.to_string(),
            remote,
        });
    }
}

impl LogSink for MemoryLogSink {
    fn log(&self, unit_id: UnitId, level: Level, message: &str) {
        TracingLogSink.log(unit_id, level, message);
        self.push(unit_id, level, message, false);
    }

    fn unit_logs(&self, unit_id: UnitId, lines: &[String]) {
        TracingLogSink.unit_logs(unit_id, lines);
        for line in lines {
            self.push(unit_id, Level::INFO, line, true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_sink_records() {
        let sink = MemoryLogSink::new();
        assert!(sink.is_empty());

        sink.log(1, Level::WARN, "alert 12");
        sink.unit_logs(2, &["boot".to_string(), "ready".to_string()]);

        assert_eq!(sink.len(), 3);
        let first = &sink.entries()[0];
        assert_eq!(first.level, "WARN");
        assert!(!first.remote);

        let unit_two = sink.entries_for(2);
        assert_eq!(unit_two.len(), 2);
        assert!(unit_two.iter().all(|entry| entry.remote));
        assert_eq!(unit_two[1].message, "ready");
    }
}
