//! `CheckStorage` (spec §4.5): usage metric, online-but-inactive is not
//! offline, and ZFS pool/device health.

use crate::alert::dispatch::DispatchEvent;
use crate::alert::metric_eval::{process_metric, MetricObservation, MetricTrackers};
use crate::alert::model::{typed_alert_id, Alert, AlertKind, EscalationState};
use crate::alert::offline::{self, OfflineOutcome};
use crate::alert::rules::FilterSubject;
use crate::alert::threshold;
use crate::alert::ResolvedAlert;
use crate::config::{AlertConfig, MetricKind, ResourceKind, Severity};
use crate::types::{DiskHealthSnapshot, StorageSnapshot, ZfsDeviceState, ZfsPool};
use std::collections::HashMap;

#[allow(clippy::too_many_arguments)]
pub fn check_storage(
    config: &AlertConfig,
    offline_counters: &mut HashMap<String, u32>,
    trackers: &mut MetricTrackers<'_>,
    resolved_snapshot: &HashMap<String, ResolvedAlert>,
    now_unix: i64,
    storage: &StorageSnapshot,
    dispatches: &mut Vec<DispatchEvent>,
    new_resolved: &mut Vec<(String, ResolvedAlert)>,
) {
    if config.disable_storage {
        return;
    }

    let connectivity_subject = FilterSubject {
        name: &storage.name,
        id: &storage.id,
        node: &storage.node,
        vmid: "",
        status: if storage.online { "online" } else { "offline" },
        ..Default::default()
    };

    let offline_id = typed_alert_id("storage-offline", &storage.id);
    let connectivity_disabled = config.disable_storage_offline
        || threshold::connectivity_disabled(config, trackers.compiled_rules, ResourceKind::Storage, &storage.id, &connectivity_subject);

    if connectivity_disabled {
        offline_counters.remove(&storage.id);
        if trackers.active_alerts.remove(&offline_id).is_some() {
            dispatches.push(DispatchEvent::Resolved(offline_id.clone()));
        }
    } else {
        let counter = offline_counters.entry(storage.id.clone()).or_insert(0);
        // Online-but-inactive is explicitly not offline (spec §4.5): only the
        // link's reachability, not whether the pool is currently mounted,
        // feeds the connectivity detector.
        match offline::advance(counter, ResourceKind::Storage, storage.online) {
            OfflineOutcome::Confirmed => {
                let alert = Alert {
                    id: offline_id.clone(),
                    kind: AlertKind::StorageOffline,
                    level: offline::offline_severity(ResourceKind::Storage, Severity::Warning),
                    resource_id: storage.id.clone(),
                    resource_name: storage.name.clone(),
                    node: storage.node.clone(),
                    instance: storage.node.clone(),
                    message: format!("storage {} is unreachable", storage.name),
                    value: 0.0,
                    threshold: 0.0,
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
                trackers.active_alerts.insert(offline_id, alert);
            }
            OfflineOutcome::BackOnline => {
                if trackers.active_alerts.remove(&offline_id).is_some() {
                    dispatches.push(DispatchEvent::Resolved(offline_id));
                }
            }
            OfflineOutcome::Counting | OfflineOutcome::StillOffline => {}
        }
    }

    if !storage.online {
        return;
    }

    // A remote storage that is online but not currently active (e.g.
    // unmounted) still gets no usage/ZFS evaluation — there's nothing to
    // measure (spec §4.5).
    if storage.active {
        let subject = FilterSubject {
            name: &storage.name,
            id: &storage.id,
            node: &storage.node,
            vmid: "",
            status: "active",
            ..Default::default()
        };
        process_metric(
            config,
            trackers,
            resolved_snapshot,
            now_unix,
            &subject,
            MetricObservation {
                kind: ResourceKind::Storage,
                resource_id: &storage.id,
                resource_name: &storage.name,
                node: &storage.node,
                instance: &storage.node,
                metric: MetricKind::Usage,
                value: storage.usage_percent,
                message_override: None,
                metadata: Default::default(),
            },
            dispatches,
            new_resolved,
        );
    }

    if let Some(pool) = &storage.zfs_pool {
        check_zfs_pool(trackers, now_unix, storage, pool, dispatches);
    }
}

/// `CheckDiskHealth` (spec §6): a disk reporting an unhealthy SMART status
/// fires a critical alert, cleared the moment it reports healthy again.
/// Shares the upsert-or-clear shape the ZFS pool/device checks use below.
pub fn check_disk_health(
    active_alerts: &mut HashMap<String, Alert>,
    now_unix: i64,
    instance: &str,
    node: &str,
    disk: &DiskHealthSnapshot,
    dispatches: &mut Vec<DispatchEvent>,
) {
    let id = typed_alert_id("disk-health", &format!("{node}-{}", disk.device));
    if disk.healthy {
        if active_alerts.remove(&id).is_some() {
            dispatches.push(DispatchEvent::Resolved(id));
        }
        return;
    }

    let message = match disk.temperature_celsius {
        Some(temp) => format!(
            "disk {} on {node} is unhealthy ({} reallocated sectors, {temp:.0}\u{b0}C)",
            disk.device, disk.reallocated_sectors
        ),
        None => format!("disk {} on {node} is unhealthy ({} reallocated sectors)", disk.device, disk.reallocated_sectors),
    };

    let alert = active_alerts.entry(id.clone()).or_insert_with(|| Alert {
        id: id.clone(),
        kind: AlertKind::DiskHealth,
        level: Severity::Critical,
        resource_id: disk.device.clone(),
        resource_name: disk.device.clone(),
        node: node.to_string(),
        instance: instance.to_string(),
        message: message.clone(),
        value: disk.reallocated_sectors as f64,
        threshold: 0.0,
        start_time_unix: now_unix,
        last_seen_unix: now_unix,
        acknowledged: false,
        ack_user: None,
        ack_time_unix: None,
        metadata: Default::default(),
        last_notified_unix: Some(now_unix),
        escalation: EscalationState::default(),
    });
    alert.value = disk.reallocated_sectors as f64;
    alert.message = message;
    alert.last_seen_unix = now_unix;
    dispatches.push(DispatchEvent::Alert(alert.clone()));
}

fn zfs_state_severity(state: ZfsDeviceState) -> Option<Severity> {
    match state {
        ZfsDeviceState::Online => None,
        ZfsDeviceState::Spare => None,
        ZfsDeviceState::Degraded | ZfsDeviceState::Removed => Some(Severity::Warning),
        ZfsDeviceState::Faulted | ZfsDeviceState::Unavail => Some(Severity::Critical),
    }
}

fn check_zfs_pool(
    trackers: &mut MetricTrackers<'_>,
    now_unix: i64,
    storage: &StorageSnapshot,
    pool: &ZfsPool,
    dispatches: &mut Vec<DispatchEvent>,
) {
    let pool_state_id = typed_alert_id("zfs-pool-state", &storage.id);
    match zfs_state_severity(pool.state) {
        Some(level) => {
            let alert = trackers.active_alerts.entry(pool_state_id.clone()).or_insert_with(|| Alert {
                id: pool_state_id.clone(),
                kind: AlertKind::ZfsPoolState,
                level,
                resource_id: storage.id.clone(),
                resource_name: storage.name.clone(),
                node: storage.node.clone(),
                instance: storage.node.clone(),
                message: format!("ZFS pool {} is {:?}", pool.name, pool.state),
                value: 0.0,
                threshold: 0.0,
                start_time_unix: now_unix,
                last_seen_unix: now_unix,
                acknowledged: false,
                ack_user: None,
                ack_time_unix: None,
                metadata: Default::default(),
                last_notified_unix: Some(now_unix),
                escalation: EscalationState::default(),
            });
            alert.level = level;
            alert.last_seen_unix = now_unix;
            dispatches.push(DispatchEvent::Alert(alert.clone()));
        }
        None => {
            if trackers.active_alerts.remove(&pool_state_id).is_some() {
                dispatches.push(DispatchEvent::Resolved(pool_state_id));
            }
        }
    }

    let errors_id = typed_alert_id("zfs-pool-errors", &storage.id);
    let total_errors: u64 = pool
        .devices
        .iter()
        .map(|d| d.read_errors + d.write_errors + d.checksum_errors)
        .sum();
    if total_errors > 0 {
        let alert = trackers.active_alerts.entry(errors_id.clone()).or_insert_with(|| Alert {
            id: errors_id.clone(),
            kind: AlertKind::ZfsPoolErrors,
            level: Severity::Warning,
            resource_id: storage.id.clone(),
            resource_name: storage.name.clone(),
            node: storage.node.clone(),
            instance: storage.node.clone(),
            message: format!("ZFS pool {} reports {total_errors} device errors", pool.name),
            value: total_errors as f64,
            threshold: 0.0,
            start_time_unix: now_unix,
            last_seen_unix: now_unix,
            acknowledged: false,
            ack_user: None,
            ack_time_unix: None,
            metadata: Default::default(),
            last_notified_unix: Some(now_unix),
            escalation: EscalationState::default(),
        });
        alert.value = total_errors as f64;
        alert.last_seen_unix = now_unix;
        dispatches.push(DispatchEvent::Alert(alert.clone()));
    } else if trackers.active_alerts.remove(&errors_id).is_some() {
        dispatches.push(DispatchEvent::Resolved(errors_id));
    }

    for device in &pool.devices {
        let device_id = typed_alert_id("zfs-device", &format!("{}-{}", storage.id, device.name));
        match zfs_state_severity(device.state) {
            Some(level) => {
                let alert = trackers.active_alerts.entry(device_id.clone()).or_insert_with(|| Alert {
                    id: device_id.clone(),
                    kind: AlertKind::ZfsDevice,
                    level,
                    resource_id: storage.id.clone(),
                    resource_name: format!("{} ({})", storage.name, device.name),
                    node: storage.node.clone(),
                    instance: storage.node.clone(),
                    message: format!("ZFS device {} is {:?}", device.name, device.state),
                    value: 0.0,
                    threshold: 0.0,
                    start_time_unix: now_unix,
                    last_seen_unix: now_unix,
                    acknowledged: false,
                    ack_user: None,
                    ack_time_unix: None,
                    metadata: Default::default(),
                    last_notified_unix: Some(now_unix),
                    escalation: EscalationState::default(),
                });
                alert.level = level;
                alert.last_seen_unix = now_unix;
                dispatches.push(DispatchEvent::Alert(alert.clone()));
            }
            None => {
                if trackers.active_alerts.remove(&device_id).is_some() {
                    dispatches.push(DispatchEvent::Resolved(device_id));
                }
            }
        }
    }
}
