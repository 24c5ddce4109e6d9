//! `CheckNode` (spec §4.5): proof-of-life plus the temperature metric.

use crate::alert::dispatch::DispatchEvent;
use crate::alert::metric_eval::{process_metric, MetricObservation, MetricTrackers};
use crate::alert::model::{typed_alert_id, Alert, AlertKind, EscalationState};
use crate::alert::offline::{self, OfflineOutcome};
use crate::alert::rules::FilterSubject;
use crate::alert::threshold;
use crate::alert::ResolvedAlert;
use crate::config::{AlertConfig, MetricKind, ResourceKind, Severity};
use crate::types::NodeSnapshot;
use std::collections::HashMap;

#[allow(clippy::too_many_arguments)]
pub fn check_node(
    config: &AlertConfig,
    offline_counters: &mut HashMap<String, u32>,
    trackers: &mut MetricTrackers<'_>,
    resolved_snapshot: &HashMap<String, ResolvedAlert>,
    now_unix: i64,
    node: &NodeSnapshot,
    dispatches: &mut Vec<DispatchEvent>,
    new_resolved: &mut Vec<(String, ResolvedAlert)>,
) {
    if config.disable_nodes {
        return;
    }

    let disk_read_mb = crate::alert::message::bytes_per_sec_to_mb_per_sec(node.disk_read_bytes_per_sec);
    let disk_write_mb = crate::alert::message::bytes_per_sec_to_mb_per_sec(node.disk_write_bytes_per_sec);
    let net_in_mb = crate::alert::message::bytes_per_sec_to_mb_per_sec(node.network_in_bytes_per_sec);
    let net_out_mb = crate::alert::message::bytes_per_sec_to_mb_per_sec(node.network_out_bytes_per_sec);

    let subject = FilterSubject {
        name: &node.name,
        id: &node.id,
        node: &node.name,
        vmid: "",
        status: if node.online { "online" } else { "offline" },
        cpu: Some(node.cpu_percent),
        memory: Some(node.memory_percent),
        disk: Some(node.disk_percent),
        disk_read_mb_s: Some(disk_read_mb),
        disk_write_mb_s: Some(disk_write_mb),
        network_in_mb_s: Some(net_in_mb),
        network_out_mb_s: Some(net_out_mb),
    };

    let offline_id = typed_alert_id("node-offline", &node.id);
    let connectivity_disabled = config.disable_nodes_offline
        || threshold::connectivity_disabled(config, trackers.compiled_rules, ResourceKind::Node, &node.id, &subject);

    if connectivity_disabled {
        offline_counters.remove(&node.id);
        if trackers.active_alerts.remove(&offline_id).is_some() {
            dispatches.push(DispatchEvent::Resolved(offline_id.clone()));
        }
    } else {
        let counter = offline_counters.entry(node.id.clone()).or_insert(0);
        match offline::advance(counter, ResourceKind::Node, node.online) {
            OfflineOutcome::Confirmed => {
                let alert = Alert {
                    id: offline_id.clone(),
                    kind: AlertKind::NodeOffline,
                    level: offline::offline_severity(ResourceKind::Node, Severity::Warning),
                    resource_id: node.id.clone(),
                    resource_name: node.name.clone(),
                    node: node.name.clone(),
                    instance: node.id.clone(),
                    message: format!("node {} is unreachable", node.name),
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

    if !node.online {
        return;
    }

    let mut metrics = vec![
        (MetricKind::Cpu, node.cpu_percent),
        (MetricKind::Memory, node.memory_percent),
        (MetricKind::Disk, node.disk_percent),
        (MetricKind::DiskRead, disk_read_mb),
        (MetricKind::DiskWrite, disk_write_mb),
        (MetricKind::NetworkIn, net_in_mb),
        (MetricKind::NetworkOut, net_out_mb),
    ];
    if let Some(temp) = node.temperature_celsius {
        metrics.push((MetricKind::Temperature, temp));
    }

    for (metric, value) in metrics {
        process_metric(
            config,
            trackers,
            resolved_snapshot,
            now_unix,
            &subject,
            MetricObservation {
                kind: ResourceKind::Node,
                resource_id: &node.id,
                resource_name: &node.name,
                node: &node.name,
                instance: &node.id,
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
