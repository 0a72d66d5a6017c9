//! Event Logger: append-only per-day audit trail of watch events.
//!
//! One plain-text file per calendar day, records separated by an
//! 80-dash line. The format is meant for humans and `grep`, not for
//! machine parsing; the snapshot files are the machine-readable surface.
//! Writes are serialized by the logger's own mutex, independent of the
//! graph lock.

use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Local;

use crate::client::EventType;
use crate::error::EventLogError;
use crate::resource::OwnerRef;

/// Record separator: an 80-dash line.
pub const RECORD_SEPARATOR: &str =
    "--------------------------------------------------------------------------------";

const LOG_PREFIX: &str = "topo_events_";

/// Normalized identity of the resource an event concerns, as written to
/// the log: the composite key parts plus the derived stable id and the
/// cluster-assigned uid.
#[derive(Debug, Clone, Default)]
pub struct EventResource {
    pub kind: String,
    pub group: String,
    pub version: String,
    pub namespace: String,
    pub name: String,
    pub id: String,
    pub uid: String,
    pub owners: Vec<OwnerRef>,
}

pub struct EventLogger {
    log_dir: PathBuf,
    write_lock: Mutex<()>,
}

impl EventLogger {
    pub fn new(log_dir: impl Into<PathBuf>) -> Result<Self, EventLogError> {
        let log_dir = log_dir.into();
        fs::create_dir_all(&log_dir).map_err(|e| EventLogError::Io {
            path: log_dir.display().to_string(),
            source: e,
        })?;
        Ok(Self {
            log_dir,
            write_lock: Mutex::new(()),
        })
    }

    /// Path of today's log file.
    pub fn current_logfile(&self) -> PathBuf {
        let date = Local::now().format("%Y-%m-%d");
        self.log_dir.join(format!("{LOG_PREFIX}{date}.log"))
    }

    /// High-frequency noise that would drown the log: Lease renewals and
    /// Endpoints churn are dropped, everything else is recorded.
    pub fn should_record(event_type: EventType, kind: &str) -> bool {
        if event_type != EventType::Modified {
            return true;
        }
        kind != "Lease" && kind != "Endpoints"
    }

    /// Append one event record to today's file. Filtered events return
    /// without touching the filesystem.
    pub fn record(
        &self,
        event_type: EventType,
        resource: &EventResource,
        additional_data: Option<&serde_json::Value>,
    ) -> Result<(), EventLogError> {
        if !Self::should_record(event_type, &resource.kind) {
            return Ok(());
        }

        let mut body = String::new();
        body.push_str(RECORD_SEPARATOR);
        body.push('\n');
        body.push_str(&format!(
            "Timestamp: {}\n",
            Local::now().format("%Y-%m-%d %H:%M:%S")
        ));
        body.push_str(&format!("Event Type: {event_type}\n"));
        body.push_str("Resource:\n");
        body.push_str(&format!("  Kind: {}\n", resource.kind));
        body.push_str(&format!("  Group: {}\n", resource.group));
        body.push_str(&format!("  Version: {}\n", resource.version));
        body.push_str(&format!("  Namespace: {}\n", resource.namespace));
        body.push_str(&format!("  Name: {}\n", resource.name));
        body.push_str(&format!("  ID: {}\n", resource.id));
        body.push_str(&format!("  UID: {}\n", resource.uid));

        if !resource.owners.is_empty() {
            body.push_str("Owners:\n");
            for (idx, owner) in resource.owners.iter().enumerate() {
                body.push_str(&format!("  - Owner #{}:\n", idx + 1));
                body.push_str(&format!("      Kind: {}\n", owner.kind));
                body.push_str(&format!("      Name: {}\n", owner.name));
                body.push_str(&format!("      UID: {}\n", owner.uid));
            }
        }

        if let Some(data) = additional_data {
            body.push_str("Additional Data:\n");
            let json = serde_json::to_string_pretty(data)
                .unwrap_or_else(|_| "{}".into())
                .replace('\n', "\n  ");
            body.push_str(&format!("  {json}\n"));
        }

        let path = self.current_logfile();
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut file = fs::File::options()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| io_err(&path, e))?;
        file.write_all(body.as_bytes())
            .map_err(|e| io_err(&path, e))?;
        file.flush().map_err(|e| io_err(&path, e))?;
        Ok(())
    }

    /// Today's records, split on the separator line. Empty when no file
    /// exists yet.
    pub fn today_records(&self) -> Result<Vec<String>, EventLogError> {
        let path = self.current_logfile();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let text = fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
        Ok(text
            .split(RECORD_SEPARATOR)
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(String::from)
            .collect())
    }

    /// Delete log files older than the retention window. Returns how many
    /// files were removed.
    pub fn cleanup(&self, days_to_keep: u64) -> Result<usize, EventLogError> {
        let cutoff = std::time::SystemTime::now()
            - std::time::Duration::from_secs(days_to_keep * 24 * 3600);
        let mut cleaned = 0;
        let entries = fs::read_dir(&self.log_dir).map_err(|e| io_err(&self.log_dir, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| io_err(&self.log_dir, e))?;
            let path = entry.path();
            let is_log = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(LOG_PREFIX) && n.ends_with(".log"));
            if !is_log {
                continue;
            }
            let modified = entry
                .metadata()
                .and_then(|m| m.modified())
                .map_err(|e| io_err(&path, e))?;
            if modified < cutoff {
                fs::remove_file(&path).map_err(|e| io_err(&path, e))?;
                cleaned += 1;
            }
        }
        if cleaned > 0 {
            tracing::info!(cleaned, "removed old event log files");
        }
        Ok(cleaned)
    }
}

fn io_err(path: &Path, source: std::io::Error) -> EventLogError {
    EventLogError::Io {
        path: path.display().to_string(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn resource(kind: &str, name: &str) -> EventResource {
        EventResource {
            kind: kind.into(),
            group: String::new(),
            version: "v1".into(),
            namespace: "default".into(),
            name: name.into(),
            id: "abc123".into(),
            uid: "uid-1".into(),
            owners: vec![],
        }
    }

    #[test]
    fn noise_filter() {
        assert!(!EventLogger::should_record(EventType::Modified, "Lease"));
        assert!(!EventLogger::should_record(EventType::Modified, "Endpoints"));
        assert!(EventLogger::should_record(EventType::Added, "Lease"));
        assert!(EventLogger::should_record(EventType::Deleted, "Endpoints"));
        assert!(EventLogger::should_record(EventType::Modified, "Pod"));
    }

    #[test]
    fn record_format() {
        let dir = tempfile::tempdir().unwrap();
        let logger = EventLogger::new(dir.path()).unwrap();

        let mut res = resource("Pod", "web-0");
        res.owners.push(OwnerRef {
            api_version: "apps/v1".into(),
            kind: "ReplicaSet".into(),
            name: "web".into(),
            uid: "rs-uid".into(),
        });
        logger
            .record(EventType::Added, &res, Some(&json!({"reason": "scale-up"})))
            .unwrap();

        let text = fs::read_to_string(logger.current_logfile()).unwrap();
        assert!(text.starts_with(RECORD_SEPARATOR));
        assert_eq!(RECORD_SEPARATOR.len(), 80);
        assert!(text.contains("Event Type: ADDED"));
        assert!(text.contains("  Kind: Pod"));
        assert!(text.contains("  ID: abc123"));
        assert!(text.contains("  - Owner #1:"));
        assert!(text.contains("      Kind: ReplicaSet"));
        assert!(text.contains("Additional Data:"));
        assert!(text.contains("scale-up"));
    }

    #[test]
    fn filtered_event_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let logger = EventLogger::new(dir.path()).unwrap();
        logger
            .record(EventType::Modified, &resource("Lease", "node-lease"), None)
            .unwrap();
        assert!(!logger.current_logfile().exists());
    }

    #[test]
    fn today_records_split() {
        let dir = tempfile::tempdir().unwrap();
        let logger = EventLogger::new(dir.path()).unwrap();
        logger.record(EventType::Added, &resource("Pod", "a"), None).unwrap();
        logger.record(EventType::Deleted, &resource("Pod", "a"), None).unwrap();

        let records = logger.today_records().unwrap();
        assert_eq!(records.len(), 2);
        assert!(records[0].contains("Event Type: ADDED"));
        assert!(records[1].contains("Event Type: DELETED"));
    }

    #[test]
    fn cleanup_respects_retention() {
        let dir = tempfile::tempdir().unwrap();
        let logger = EventLogger::new(dir.path()).unwrap();

        let old = dir.path().join(format!("{LOG_PREFIX}2020-01-01.log"));
        fs::write(&old, "old").unwrap();
        let f = fs::File::options().append(true).open(&old).unwrap();
        f.set_modified(std::time::SystemTime::UNIX_EPOCH).unwrap();

        logger.record(EventType::Added, &resource("Pod", "a"), None).unwrap();

        let cleaned = logger.cleanup(30).unwrap();
        assert_eq!(cleaned, 1);
        assert!(!old.exists());
        assert!(logger.current_logfile().exists());
    }
}
