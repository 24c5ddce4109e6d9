//! Atomic save/load of the active-alert snapshot file (spec §6), following
//! `cfc::checkpoint::save_to_disk`'s temp-file-then-rename idiom.

use crate::alert::Alert;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum AlertSnapshotError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// 24 hours — alerts older than this are discarded on load (spec §6).
const MAX_ALERT_AGE_SECS: i64 = 24 * 3600;
/// 1 hour — acknowledged alerts older than this are discarded on load.
const MAX_ACKED_ALERT_AGE_SECS: i64 = 3600;

fn snapshot_path(data_dir: &Path) -> PathBuf {
    data_dir.join("alerts").join("active-alerts.json")
}

/// Write the active-alert map to `<dataDir>/alerts/active-alerts.json`
/// atomically: write to a `.tmp` sibling, then rename over the target.
pub fn save_active_alerts(
    data_dir: &Path,
    alerts: &HashMap<String, Alert>,
) -> Result<(), AlertSnapshotError> {
    let path = snapshot_path(data_dir);
    let parent = path.parent().expect("snapshot path always has a parent");
    std::fs::create_dir_all(parent)?;

    let list: Vec<&Alert> = alerts.values().collect();
    let json = serde_json::to_vec(&list)?;

    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, &json)?;
    std::fs::rename(&tmp_path, &path)?;
    debug!(count = list.len(), path = %path.display(), "saved active-alert snapshot");
    Ok(())
}

/// Load and filter the active-alert snapshot (spec §6): alerts older than 24h
/// or acknowledged alerts older than 1h are discarded; duplicates by id are
/// ignored (first one kept). Returns an empty map if the file doesn't exist.
pub fn load_active_alerts(data_dir: &Path, now_unix: i64) -> Result<HashMap<String, Alert>, AlertSnapshotError> {
    let path = snapshot_path(data_dir);
    let bytes = match std::fs::read(&path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
        Err(e) => return Err(e.into()),
    };

    let raw: Vec<Alert> = serde_json::from_slice(&bytes)?;
    let mut out = HashMap::with_capacity(raw.len());
    for alert in raw {
        let age = now_unix - alert.start_time_unix;
        if age > MAX_ALERT_AGE_SECS {
            continue;
        }
        if alert.acknowledged && age > MAX_ACKED_ALERT_AGE_SECS {
            continue;
        }
        if out.contains_key(&alert.id) {
            warn!(id = %alert.id, "duplicate alert id in snapshot, ignoring");
            continue;
        }
        out.insert(alert.id.clone(), alert);
    }
    debug!(count = out.len(), path = %path.display(), "loaded active-alert snapshot");
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::{AlertKind, EscalationState};
    use crate::config::Severity;

    fn test_alert(id: &str, start: i64, acked: bool) -> Alert {
        Alert {
            id: id.to_string(),
            kind: AlertKind::Metric { metric: "cpu".into() },
            level: Severity::Warning,
            resource_id: id.to_string(),
            resource_name: id.to_string(),
            node: "pve1".into(),
            instance: "default".into(),
            message: "test".into(),
            value: 90.0,
            threshold: 80.0,
            start_time_unix: start,
            last_seen_unix: start,
            acknowledged: acked,
            ack_user: acked.then(|| "alice".to_string()),
            ack_time_unix: acked.then_some(start),
            metadata: Default::default(),
            last_notified_unix: None,
            escalation: EscalationState::default(),
        }
    }

    #[test]
    fn round_trip_preserves_identity_and_ack() {
        let dir = tempfile::tempdir().expect("tempdir");
        let now = 100_000;
        let mut alerts = HashMap::new();
        alerts.insert("a".to_string(), test_alert("a", now - 100, true));
        save_active_alerts(dir.path(), &alerts).expect("save");

        let loaded = load_active_alerts(dir.path(), now).expect("load");
        assert_eq!(loaded.len(), 1);
        assert!(loaded["a"].acknowledged);
        assert_eq!(loaded["a"].ack_user.as_deref(), Some("alice"));
    }

    #[test]
    fn discards_alerts_older_than_24h() {
        let dir = tempfile::tempdir().expect("tempdir");
        let now = 1_000_000;
        let mut alerts = HashMap::new();
        alerts.insert("old".to_string(), test_alert("old", now - 25 * 3600, false));
        save_active_alerts(dir.path(), &alerts).expect("save");

        let loaded = load_active_alerts(dir.path(), now).expect("load");
        assert!(loaded.is_empty());
    }

    #[test]
    fn discards_acked_alerts_older_than_1h() {
        let dir = tempfile::tempdir().expect("tempdir");
        let now = 1_000_000;
        let mut alerts = HashMap::new();
        alerts.insert("acked-old".to_string(), test_alert("acked-old", now - 2 * 3600, true));
        save_active_alerts(dir.path(), &alerts).expect("save");

        let loaded = load_active_alerts(dir.path(), now).expect("load");
        assert!(loaded.is_empty());
    }

    #[test]
    fn missing_file_returns_empty_map() {
        let dir = tempfile::tempdir().expect("tempdir");
        let loaded = load_active_alerts(dir.path(), 0).expect("load");
        assert!(loaded.is_empty());
    }
}
