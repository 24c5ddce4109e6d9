//! Snapshot age/size and backup-age evaluation (spec §4.8).

use crate::alert::dispatch::DispatchEvent;
use crate::alert::model::{sanitize_mount_label, typed_alert_id, Alert, AlertKind, EscalationState};
use crate::config::{AlertConfig, Severity};
use crate::types::{BackupInfo, BackupSource, MetadataValue, SnapshotInfo};
use std::collections::HashMap;

/// `CheckSnapshotsForInstance` (spec §4.8): evaluate both the age and, when
/// configured, the size of each snapshot, reporting whichever dimension is
/// more severe as the alert's `primaryMetric`. `guest_names` maps a
/// snapshot's `guest_id` to the guest's display name, used to make the
/// message readable when the snapshot itself carries no better label.
pub fn check_snapshots(
    config: &AlertConfig,
    active_alerts: &mut HashMap<String, Alert>,
    now_unix: i64,
    instance: &str,
    snapshots: &[SnapshotInfo],
    guest_names: &HashMap<String, String>,
    dispatches: &mut Vec<DispatchEvent>,
) {
    let defaults = &config.snapshot_backup_defaults;
    for snap in snapshots {
        let id = typed_alert_id("snapshot-age", &sanitize_mount_label(&snap.id));
        let guest_label = guest_names.get(&snap.guest_id).cloned().unwrap_or_else(|| snap.guest_id.clone());

        let age_level = severity_for(snap.age_days, defaults.snapshot_warning_days, defaults.snapshot_critical_days);
        let size_gib = snap.size_bytes as f64 / 1_073_741_824.0;
        let size_level = match (defaults.snapshot_warning_size_gib, defaults.snapshot_critical_size_gib) {
            (Some(warn), Some(crit)) => severity_for(size_gib, warn, crit),
            _ => None,
        };

        // `triggeredMetrics` covers every dimension that crossed its warn
        // threshold, not just the primary one driving severity/message
        // (spec §8 scenario 6: `triggeredMetrics ⊇ {age,size}`).
        let mut triggered = Vec::new();
        if age_level.is_some() {
            triggered.push("age");
        }
        if size_level.is_some() {
            triggered.push("size");
        }

        let (level, value, threshold, primary_metric, message) = match (age_level, size_level) {
            (None, None) => {
                if active_alerts.remove(&id).is_some() {
                    dispatches.push(DispatchEvent::Resolved(id));
                }
                continue;
            }
            (Some(a), Some(s)) if s > a => (
                s,
                size_gib,
                defaults.snapshot_warning_size_gib.unwrap_or(0.0),
                "size",
                format!("snapshot {} for {guest_label} is {:.1} days old and {size_gib:.1} GiB", snap.name, snap.age_days),
            ),
            (Some(a), _) => (
                a,
                snap.age_days,
                defaults.snapshot_warning_days,
                "age",
                format!("snapshot {} for {guest_label} is {:.1} days old ({size_gib:.1} GiB)", snap.name, snap.age_days),
            ),
            (None, Some(s)) => (
                s,
                size_gib,
                defaults.snapshot_warning_size_gib.unwrap_or(0.0),
                "size",
                format!("snapshot {} for {guest_label} is {size_gib:.1} GiB", snap.name),
            ),
        };

        let mut metadata = crate::types::Metadata::new();
        metadata.insert("primaryMetric".to_string(), MetadataValue::Str(primary_metric.to_string()));
        metadata.insert(
            "triggeredMetrics".to_string(),
            MetadataValue::List(triggered.iter().map(|m| MetadataValue::Str((*m).to_string())).collect()),
        );

        if let Some(active) = active_alerts.get_mut(&id) {
            active.value = value;
            active.level = level;
            active.last_seen_unix = now_unix;
            active.metadata = metadata;
        } else {
            let alert = Alert {
                id: id.clone(),
                kind: AlertKind::SnapshotAge,
                level,
                resource_id: snap.guest_id.clone(),
                resource_name: snap.name.clone(),
                node: String::new(),
                instance: instance.to_string(),
                message,
                value,
                threshold,
                start_time_unix: now_unix,
                last_seen_unix: now_unix,
                acknowledged: false,
                ack_user: None,
                ack_time_unix: None,
                metadata,
                last_notified_unix: Some(now_unix),
                escalation: EscalationState::default(),
            };
            dispatches.push(DispatchEvent::Alert(alert.clone()));
            active_alerts.insert(id, alert);
        }
    }
}

fn severity_for(value: f64, warn: f64, crit: f64) -> Option<Severity> {
    if value >= crit {
        Some(Severity::Critical)
    } else if value >= warn {
        Some(Severity::Warning)
    } else {
        None
    }
}

/// Logical guest identity a backup is filed under (spec §4.8):
/// `instance-node-vmid`, with PMG sources tagged `PMG:<instance>` so they
/// never collide with a storage/PBS instance sharing the same name.
fn backup_group_key(backup: &BackupInfo) -> String {
    let instance = match backup.source {
        BackupSource::Pmg => format!("PMG:{}", backup.instance),
        BackupSource::Storage | BackupSource::Pbs => backup.instance.clone(),
    };
    format!("{instance}-{}-{}", backup.node, backup.vmid)
}

/// `CheckBackups` (spec §4.8): group backups from every source by logical
/// guest identity, keep only the newest, and evaluate its age. `guests_by_key`
/// resolves the grouping key (`backup_group_key`) to a guest display name;
/// `guests_by_vmid` is the fallback when a backup's instance/node combination
/// isn't present there, keyed on raw vmid.
pub fn check_backups(
    config: &AlertConfig,
    active_alerts: &mut HashMap<String, Alert>,
    now_unix: i64,
    storage_backups: &[BackupInfo],
    pbs_backups: &[BackupInfo],
    pmg_backups: &[BackupInfo],
    guests_by_key: &HashMap<String, String>,
    guests_by_vmid: &HashMap<String, String>,
    dispatches: &mut Vec<DispatchEvent>,
) {
    let defaults = &config.snapshot_backup_defaults;
    let mut newest: HashMap<String, &BackupInfo> = HashMap::new();
    for backup in storage_backups.iter().chain(pbs_backups).chain(pmg_backups) {
        let key = backup_group_key(backup);
        newest
            .entry(key)
            .and_modify(|cur| {
                if backup.timestamp_unix > cur.timestamp_unix {
                    *cur = backup;
                }
            })
            .or_insert(backup);
    }

    for (key, backup) in newest {
        let age_days = (now_unix - backup.timestamp_unix) as f64 / 86400.0;
        let id = typed_alert_id("backup-age", &key);
        let resource_name = guests_by_key
            .get(&key)
            .or_else(|| guests_by_vmid.get(&backup.vmid))
            .cloned()
            .unwrap_or_else(|| backup.vmid.clone());
        match severity_for(age_days, defaults.backup_warning_days, defaults.backup_critical_days) {
            Some(level) => {
                if let Some(active) = active_alerts.get_mut(&id) {
                    active.value = age_days;
                    active.level = level;
                    active.last_seen_unix = now_unix;
                    active.resource_name = resource_name;
                } else {
                    let alert = Alert {
                        id: id.clone(),
                        kind: AlertKind::BackupAge,
                        level,
                        resource_id: key.clone(),
                        resource_name: resource_name.clone(),
                        node: backup.node.clone(),
                        instance: backup.instance.clone(),
                        message: format!("most recent backup for {resource_name} is {age_days:.1} days old"),
                        value: age_days,
                        threshold: defaults.backup_warning_days,
                        start_time_unix: now_unix,
                        last_seen_unix: now_unix,
                        acknowledged: false,
                        ack_user: None,
                        ack_time_unix: None,
                        metadata: Default::default(),
                        last_notified_unix: Some(now_unix),
                        escalation: EscalationState::default(),
                    };
                    dispatches.push(DispatchEvent::Alert(alert.clone()));
                    active_alerts.insert(id, alert);
                }
            }
            None => {
                if active_alerts.remove(&id).is_some() {
                    dispatches.push(DispatchEvent::Resolved(id));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pmg_backups_are_tagged_to_avoid_collision() {
        let pmg = BackupInfo {
            instance: "mail1".into(),
            node: "pve1".into(),
            vmid: "100".into(),
            source: BackupSource::Pmg,
            filename: Some("a.tgz".into()),
            timestamp_unix: 0,
        };
        let storage = BackupInfo { source: BackupSource::Storage, ..pmg.clone() };
        assert_ne!(backup_group_key(&pmg), backup_group_key(&storage));
    }

    #[test]
    fn severity_prefers_critical() {
        assert_eq!(severity_for(20.0, 7.0, 14.0), Some(Severity::Critical));
        assert_eq!(severity_for(10.0, 7.0, 14.0), Some(Severity::Warning));
        assert_eq!(severity_for(1.0, 7.0, 14.0), None);
    }

    #[test]
    fn snapshot_age_and_size_scenario() {
        // spec §8 scenario 6: snapshot aged 15d, 120 GiB against
        // {warningDays:7, criticalDays:14, warningSizeGiB:50,
        // criticalSizeGiB:100} fires critical with primaryMetric=age and
        // both dimensions recorded as triggered.
        let mut config = AlertConfig::default();
        config.snapshot_backup_defaults.snapshot_warning_days = 7.0;
        config.snapshot_backup_defaults.snapshot_critical_days = 14.0;
        config.snapshot_backup_defaults.snapshot_warning_size_gib = Some(50.0);
        config.snapshot_backup_defaults.snapshot_critical_size_gib = Some(100.0);

        let snap = SnapshotInfo {
            id: "snap1".into(),
            guest_id: "vm-100".into(),
            name: "daily".into(),
            age_days: 15.0,
            size_bytes: 120 * 1_073_741_824,
        };
        let mut active_alerts = HashMap::new();
        let mut dispatches = Vec::new();
        let guest_names = HashMap::new();
        check_snapshots(&config, &mut active_alerts, 0, "pve1", &[snap], &guest_names, &mut dispatches);

        let id = typed_alert_id("snapshot-age", "snap1");
        let alert = active_alerts.get(&id).expect("alert created");
        assert_eq!(alert.level, Severity::Critical);
        assert!(alert.message.contains("15.0 days"));
        assert!(alert.message.contains("120.0 GiB"));
        match alert.metadata.get("primaryMetric") {
            Some(MetadataValue::Str(s)) => assert_eq!(s, "age"),
            other => panic!("expected primaryMetric=age, got {other:?}"),
        }
        match alert.metadata.get("triggeredMetrics") {
            Some(MetadataValue::List(items)) => {
                assert!(items.contains(&MetadataValue::Str("age".to_string())));
                assert!(items.contains(&MetadataValue::Str("size".to_string())));
            }
            other => panic!("expected triggeredMetrics list, got {other:?}"),
        }
    }
}
