//! `CheckPBS` (spec §4.5): proof-of-life plus cpu/memory/disk metrics.

use crate::alert::dispatch::DispatchEvent;
use crate::alert::metric_eval::{process_metric, MetricObservation, MetricTrackers};
use crate::alert::model::{typed_alert_id, Alert, AlertKind, EscalationState};
use crate::alert::offline::{self, OfflineOutcome};
use crate::alert::rules::FilterSubject;
use crate::alert::threshold;
use crate::alert::ResolvedAlert;
use crate::config::{AlertConfig, MetricKind, ResourceKind, Severity};
use crate::types::PbsSnapshot;
use std::collections::HashMap;

#[allow(clippy::too_many_arguments)]
pub fn check_pbs(
    config: &AlertConfig,
    offline_counters: &mut HashMap<String, u32>,
    trackers: &mut MetricTrackers<'_>,
    resolved_snapshot: &HashMap<String, ResolvedAlert>,
    now_unix: i64,
    pbs: &PbsSnapshot,
    dispatches: &mut Vec<DispatchEvent>,
    new_resolved: &mut Vec<(String, ResolvedAlert)>,
) {
    if config.disable_pbs {
        return;
    }

    let subject = FilterSubject {
        name: &pbs.name,
        id: &pbs.id,
        node: &pbs.name,
        vmid: "",
        status: if pbs.online { "online" } else { "offline" },
        cpu: Some(pbs.cpu_percent),
        memory: Some(pbs.memory_percent),
        disk: Some(pbs.disk_percent),
        ..Default::default()
    };

    let offline_id = typed_alert_id("pbs-offline", &pbs.id);
    let connectivity_disabled = config.disable_pbs_offline
        || threshold::connectivity_disabled(config, trackers.compiled_rules, ResourceKind::Pbs, &pbs.id, &subject);

    if connectivity_disabled {
        offline_counters.remove(&pbs.id);
        if trackers.active_alerts.remove(&offline_id).is_some() {
            dispatches.push(DispatchEvent::Resolved(offline_id.clone()));
        }
    } else {
        let counter = offline_counters.entry(pbs.id.clone()).or_insert(0);
        match offline::advance(counter, ResourceKind::Pbs, pbs.online) {
            OfflineOutcome::Confirmed => {
                let alert = Alert {
                    id: offline_id.clone(),
                    kind: AlertKind::PbsOffline,
                    level: offline::offline_severity(ResourceKind::Pbs, Severity::Warning),
                    resource_id: pbs.id.clone(),
                    resource_name: pbs.name.clone(),
                    node: pbs.name.clone(),
                    instance: pbs.id.clone(),
                    message: format!("PBS instance {} is unreachable", pbs.name),
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

    if !pbs.online {
        return;
    }

    for (metric, value) in [
        (MetricKind::Cpu, pbs.cpu_percent),
        (MetricKind::Memory, pbs.memory_percent),
        (MetricKind::Disk, pbs.disk_percent),
    ] {
        process_metric(
            config,
            trackers,
            resolved_snapshot,
            now_unix,
            &subject,
            MetricObservation {
                kind: ResourceKind::Pbs,
                resource_id: &pbs.id,
                resource_name: &pbs.name,
                node: &pbs.name,
                instance: &pbs.id,
                metric,
                value,
                message_override: None,
                metadata: Default::default(),
            },
            dispatches,
            new_resolved,
        );
    }
}
