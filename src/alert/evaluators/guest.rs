//! `CheckGuest` (spec §4.4): per-mount filesystem handling and the
//! powered-off-clears-all-metrics rule.

use crate::alert::dispatch::DispatchEvent;
use crate::alert::metric_eval::{process_metric, MetricObservation, MetricTrackers};
use crate::alert::model::{guest_mount_resource_id, metric_alert_id, typed_alert_id, Alert, AlertKind, EscalationState};
use crate::alert::offline::{self, OfflineOutcome};
use crate::alert::rules::FilterSubject;
use crate::alert::threshold;
use crate::alert::ResolvedAlert;
use crate::config::{AlertConfig, MetricKind, ResourceKind};
use crate::types::{GuestSnapshot, GuestStatus};
use std::collections::HashMap;

fn status_str(status: GuestStatus) -> &'static str {
    match status {
        GuestStatus::Running => "running",
        GuestStatus::Stopped => "stopped",
        GuestStatus::Paused => "paused",
        GuestStatus::Unknown => "unknown",
    }
}

/// The owned strings/rates a `FilterSubject` borrows from, computed once per
/// guest so `ReevaluateGuestAlert` (spec §6) can rebuild the same subject
/// `check_guest` used without duplicating the rate conversions inline.
pub struct GuestSubjectParts {
    pub vmid_str: String,
    pub disk_read_mb: f64,
    pub disk_write_mb: f64,
    pub net_in_mb: f64,
    pub net_out_mb: f64,
}

pub fn guest_subject_parts(guest: &GuestSnapshot) -> GuestSubjectParts {
    GuestSubjectParts {
        vmid_str: guest.vmid.to_string(),
        disk_read_mb: crate::alert::message::bytes_per_sec_to_mb_per_sec(guest.disk_read_bytes_per_sec),
        disk_write_mb: crate::alert::message::bytes_per_sec_to_mb_per_sec(guest.disk_write_bytes_per_sec),
        net_in_mb: crate::alert::message::bytes_per_sec_to_mb_per_sec(guest.network_in_bytes_per_sec),
        net_out_mb: crate::alert::message::bytes_per_sec_to_mb_per_sec(guest.network_out_bytes_per_sec),
    }
}

pub fn guest_subject<'a>(guest: &'a GuestSnapshot, parts: &'a GuestSubjectParts) -> FilterSubject<'a> {
    FilterSubject {
        name: &guest.name,
        id: &guest.id,
        node: &guest.node,
        vmid: &parts.vmid_str,
        status: status_str(guest.status),
        cpu: Some(guest.cpu_percent),
        memory: Some(guest.memory_percent),
        disk: Some(guest.disk_percent),
        disk_read_mb_s: Some(parts.disk_read_mb),
        disk_write_mb_s: Some(parts.disk_write_mb),
        network_in_mb_s: Some(parts.net_in_mb),
        network_out_mb_s: Some(parts.net_out_mb),
    }
}

/// All metric ids a running guest can carry, used to sweep them clean the
/// moment it powers off (spec §4.4).
fn guest_metric_ids(guest: &GuestSnapshot) -> Vec<String> {
    let mut ids: Vec<String> = [MetricKind::Cpu, MetricKind::Memory, MetricKind::Disk, MetricKind::DiskRead, MetricKind::DiskWrite, MetricKind::NetworkIn, MetricKind::NetworkOut]
        .into_iter()
        .map(|m| metric_alert_id(&guest.id, m.as_str()))
        .collect();
    for fs in &guest.filesystems {
        let mount_id = guest_mount_resource_id(&guest.id, &fs.mountpoint);
        ids.push(metric_alert_id(&mount_id, MetricKind::Disk.as_str()));
    }
    ids
}

#[allow(clippy::too_many_arguments)]
pub fn check_guest(
    config: &AlertConfig,
    offline_counters: &mut HashMap<String, u32>,
    trackers: &mut MetricTrackers<'_>,
    resolved_snapshot: &HashMap<String, ResolvedAlert>,
    now_unix: i64,
    guest: &GuestSnapshot,
    dispatches: &mut Vec<DispatchEvent>,
    new_resolved: &mut Vec<(String, ResolvedAlert)>,
) {
    if config.disable_guests {
        return;
    }
    let powered_off_id = typed_alert_id("guest-powered-off", &guest.id);
    let running = matches!(guest.status, GuestStatus::Running);

    let parts = guest_subject_parts(guest);
    let (disk_read_mb, disk_write_mb, net_in_mb, net_out_mb) = (parts.disk_read_mb, parts.disk_write_mb, parts.net_in_mb, parts.net_out_mb);
    let subject = guest_subject(guest, &parts);

    // Global disableGuestsOffline and the per-resource disableConnectivity
    // flag both short-circuit detection and clear any existing alert/counter
    // (spec §4.3) — they don't just skip the check silently.
    let connectivity_disabled = config.disable_guests_offline
        || threshold::connectivity_disabled(config, trackers.compiled_rules, ResourceKind::Guest, &guest.id, &subject);

    if connectivity_disabled {
        offline_counters.remove(&guest.id);
        if trackers.active_alerts.remove(&powered_off_id).is_some() {
            trackers.debounce.remove(&powered_off_id);
            dispatches.push(DispatchEvent::Resolved(powered_off_id.clone()));
        }
    } else {
        let counter = offline_counters.entry(guest.id.clone()).or_insert(0);
        match offline::advance(counter, ResourceKind::Guest, running) {
            OfflineOutcome::Confirmed => {
                let severity = offline::offline_severity(ResourceKind::Guest, config.defaults.guest.powered_off_severity);
                let alert = Alert {
                    id: powered_off_id.clone(),
                    kind: AlertKind::GuestPoweredOff,
                    level: severity,
                    resource_id: guest.id.clone(),
                    resource_name: guest.name.clone(),
                    node: guest.node.clone(),
                    instance: guest.node.clone(),
                    message: format!("guest {} is powered off", guest.name),
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
                trackers.active_alerts.insert(powered_off_id.clone(), alert);
            }
            OfflineOutcome::BackOnline => {
                if trackers.active_alerts.remove(&powered_off_id).is_some() {
                    dispatches.push(DispatchEvent::Resolved(powered_off_id.clone()));
                }
            }
            OfflineOutcome::Counting | OfflineOutcome::StillOffline => {}
        }
    }

    // Spec §4.4: the moment a guest is observed non-running, every metric
    // alert for it clears immediately — independent of the 2-confirmation
    // debounce gating the powered-off alert itself.
    if !running {
        for id in guest_metric_ids(guest) {
            if let Some(removed) = trackers.active_alerts.remove(&id) {
                trackers.debounce.remove(&id);
                trackers.rate_limit.remove(&id);
                new_resolved.push((id.clone(), ResolvedAlert { alert: removed, resolved_time_unix: now_unix }));
                dispatches.push(DispatchEvent::Resolved(id));
            } else {
                trackers.debounce.remove(&id);
            }
        }
        return;
    }

    if trackers.active_alerts.contains_key(&powered_off_id) {
        return;
    }

    for (metric, value) in [
        (MetricKind::Cpu, guest.cpu_percent),
        (MetricKind::Memory, guest.memory_percent),
        (MetricKind::Disk, guest.disk_percent),
        (MetricKind::DiskRead, disk_read_mb),
        (MetricKind::DiskWrite, disk_write_mb),
        (MetricKind::NetworkIn, net_in_mb),
        (MetricKind::NetworkOut, net_out_mb),
    ] {
        process_metric(
            config,
            trackers,
            resolved_snapshot,
            now_unix,
            &subject,
            MetricObservation {
                kind: ResourceKind::Guest,
                resource_id: &guest.id,
                resource_name: &guest.name,
                node: &guest.node,
                instance: &guest.node,
                metric,
                value,
                message_override: None,
                metadata: Default::default(),
            },
            dispatches,
            new_resolved,
        );
    }

    for fs in &guest.filesystems {
        let mount_id = guest_mount_resource_id(&guest.id, &fs.mountpoint);
        process_metric(
            config,
            trackers,
            resolved_snapshot,
            now_unix,
            &subject,
            MetricObservation {
                kind: ResourceKind::Guest,
                resource_id: &mount_id,
                resource_name: &format!("{} ({})", guest.name, fs.mountpoint),
                node: &guest.node,
                instance: &guest.node,
                metric: MetricKind::Disk,
                value: fs.usage_percent,
                message_override: Some(format!("{} mount {} at {:.1}%", guest.name, fs.mountpoint, fs.usage_percent)),
                metadata: Default::default(),
            },
            dispatches,
            new_resolved,
        );
    }
}
