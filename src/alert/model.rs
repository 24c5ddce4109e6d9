//! The `Alert` entity and its resolved/acknowledgement companions (spec §3).

use crate::config::Severity;
use crate::types::Metadata;
use serde::{Deserialize, Serialize};

/// Discriminated alert kind, preferred over prefix-parsing the id at use
/// sites (spec §9). The textual id remains the stable external name used
/// for persistence, history, and acknowledgement lookups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AlertKind {
    Metric { metric: String },
    NodeOffline,
    GuestPoweredOff,
    StorageOffline,
    PbsOffline,
    PmgOffline,
    DockerHostOffline,
    DockerContainerState,
    DockerContainerHealth,
    DockerContainerRestartLoop,
    DockerContainerOom,
    DockerContainerMemoryLimit,
    ZfsPoolState,
    ZfsPoolErrors,
    ZfsDevice,
    SnapshotAge,
    BackupAge,
    PmgAnomaly { metric: String },
    DiskHealth,
}

impl AlertKind {
    /// Stable id prefix used when synthesizing `<prefix>-<resourceId>` ids
    /// for non-metric alert kinds (spec §3).
    pub fn type_prefix(&self) -> &'static str {
        match self {
            AlertKind::Metric { .. } => "",
            AlertKind::NodeOffline => "node-offline",
            AlertKind::GuestPoweredOff => "guest-powered-off",
            AlertKind::StorageOffline => "storage-offline",
            AlertKind::PbsOffline => "pbs-offline",
            AlertKind::PmgOffline => "pmg-offline",
            AlertKind::DockerHostOffline => "docker-host-offline",
            AlertKind::DockerContainerState => "docker-container-state",
            AlertKind::DockerContainerHealth => "docker-container-health",
            AlertKind::DockerContainerRestartLoop => "docker-container-restart-loop",
            AlertKind::DockerContainerOom => "docker-container-oom",
            AlertKind::DockerContainerMemoryLimit => "docker-container-memory-limit",
            AlertKind::ZfsPoolState => "zfs-pool-state",
            AlertKind::ZfsPoolErrors => "zfs-pool-errors",
            AlertKind::ZfsDevice => "zfs-device",
            AlertKind::SnapshotAge => "snapshot-age",
            AlertKind::BackupAge => "backup-age",
            AlertKind::PmgAnomaly { .. } => "pmg-anomaly",
            AlertKind::DiskHealth => "disk-health",
        }
    }
}

/// Build the stable alert id for a metric alert: `"<resourceId>-<metric>"`.
pub fn metric_alert_id(resource_id: &str, metric: &str) -> String {
    format!("{resource_id}-{metric}")
}

/// Build the stable alert id for a typed (non-metric) alert:
/// `"<prefix>-<resourceId>"`.
pub fn typed_alert_id(prefix: &str, resource_id: &str) -> String {
    format!("{prefix}-{resource_id}")
}

/// An acknowledgement record, preserved across rebuild cycles independently
/// of the `Alert` it was made against (spec invariant 3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AckRecord {
    pub user: String,
    pub ack_time_unix: i64,
}

/// Per-level escalation firing record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EscalationState {
    /// Highest escalation level (1-based) that has fired for this alert.
    pub level: u32,
    /// Unix timestamp each level fired at, indexed by `level - 1`.
    pub fired_at_unix: Vec<i64>,
}

/// An active alert. Exclusively owned by the engine; any value handed to a
/// callback is a deep clone (spec invariant 5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub kind: AlertKind,
    pub level: Severity,
    pub resource_id: String,
    pub resource_name: String,
    pub node: String,
    pub instance: String,
    pub message: String,
    pub value: f64,
    pub threshold: f64,
    pub start_time_unix: i64,
    pub last_seen_unix: i64,
    pub acknowledged: bool,
    pub ack_user: Option<String>,
    pub ack_time_unix: Option<i64>,
    pub metadata: Metadata,
    pub last_notified_unix: Option<i64>,
    pub escalation: EscalationState,
}

impl Alert {
    pub fn apply_ack(&mut self, ack: &AckRecord) {
        self.acknowledged = true;
        self.ack_user = Some(ack.user.clone());
        self.ack_time_unix = Some(ack.ack_time_unix);
    }

    pub fn clear_ack(&mut self) {
        self.acknowledged = false;
        self.ack_user = None;
        self.ack_time_unix = None;
    }
}

/// A resolved alert, retained for 5 minutes (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedAlert {
    pub alert: Alert,
    pub resolved_time_unix: i64,
}

pub const RESOLVED_RETENTION_SECS: i64 = 5 * 60;

/// Sanitize a per-mount filesystem label for use inside an alert id
/// (spec §4.4): lowercase; keep `a-z0-9.`; collapse other runs into `-`;
/// trim leading/trailing `-`/`.`; empty becomes `"disk"`; `"/"` becomes
/// `"root"`.
pub fn sanitize_mount_label(raw: &str) -> String {
    if raw == "/" {
        return "root".to_string();
    }
    let lower = raw.to_lowercase();
    let mut out = String::with_capacity(lower.len());
    let mut last_was_sep = false;
    for c in lower.chars() {
        if c.is_ascii_alphanumeric() || c == '.' {
            out.push(c);
            last_was_sep = false;
        } else if !last_was_sep {
            out.push('-');
            last_was_sep = true;
        }
    }
    let trimmed = out.trim_matches(|c| c == '-' || c == '.');
    if trimmed.is_empty() {
        "disk".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Build the identity used for a guest's per-mount filesystem metric:
/// `"<guestId>-disk-<sanitized>"`.
pub fn guest_mount_resource_id(guest_id: &str, mount_or_device: &str) -> String {
    format!("{guest_id}-disk-{}", sanitize_mount_label(mount_or_device))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitizes_root_mount() {
        assert_eq!(sanitize_mount_label("/"), "root");
    }

    #[test]
    fn sanitizes_nested_mount() {
        assert_eq!(sanitize_mount_label("/var/log"), "var-log");
    }

    #[test]
    fn sanitizes_empty_to_disk() {
        assert_eq!(sanitize_mount_label("---"), "disk");
        assert_eq!(sanitize_mount_label(""), "disk");
    }

    #[test]
    fn preserves_dots_and_collapses_runs() {
        assert_eq!(sanitize_mount_label("/mnt//Data_01!!"), "mnt-data-01");
    }

    #[test]
    fn metric_id_format() {
        assert_eq!(metric_alert_id("vm-100", "cpu"), "vm-100-cpu");
    }
}
