//! Docker sub-engine (spec §4.7): container lifecycle, restart-loop ring
//! buffer, OOM detection, memory-limit hysteresis, host proof-of-life.

use crate::alert::dispatch::DispatchEvent;
use crate::alert::metric_eval::{process_metric, MetricObservation, MetricTrackers};
use crate::alert::model::{typed_alert_id, Alert, AlertKind, EscalationState};
use crate::alert::offline::{self, OfflineOutcome};
use crate::alert::rules::{CompiledCustomRule, FilterSubject};
use crate::alert::threshold;
use crate::alert::ResolvedAlert;
use crate::config::{AlertConfig, MetricKind, ResourceKind, Severity};
use crate::types::{DockerContainerSnapshot, DockerContainerState, DockerHostSnapshot, MetadataValue};
use std::collections::{HashMap, VecDeque};

/// Per-container tracking that outlives any single poll (spec §4.7).
#[derive(Debug, Clone, Default)]
pub struct ContainerTracking {
    /// Timestamps (unix secs) of restarts observed in the trailing window.
    pub restart_events: VecDeque<i64>,
    /// Last `restart_count` seen, to detect the runtime incrementing it.
    pub last_restart_count: Option<u64>,
    /// Consecutive polls with `exit_code == Some(137)` while not running.
    pub oom_streak: u32,
    pub non_running_counter: u32,
}

#[derive(Debug, Clone, Default)]
pub struct DockerTracking {
    pub hosts_offline_counter: HashMap<String, u32>,
    pub containers: HashMap<String, ContainerTracking>,
}

fn ignored(config: &AlertConfig, name: &str) -> bool {
    let lower = name.to_lowercase();
    config
        .docker_ignored_container_prefixes
        .iter()
        .any(|p| lower.starts_with(&p.to_lowercase()))
}

/// `CheckDockerHost` proof-of-life (spec §4.7): 3 consecutive misses before
/// a host is considered offline, mirroring node/pbs/pmg.
#[allow(clippy::too_many_arguments)]
pub fn check_docker_host(
    config: &AlertConfig,
    tracking: &mut DockerTracking,
    active_alerts: &mut HashMap<String, Alert>,
    compiled_rules: &[CompiledCustomRule],
    now_unix: i64,
    host: &DockerHostSnapshot,
    online: bool,
    dispatches: &mut Vec<DispatchEvent>,
) {
    let id = typed_alert_id("docker-host-offline", &host.id);
    let subject = FilterSubject {
        name: &host.name,
        id: &host.id,
        node: &host.name,
        vmid: "",
        status: if online { "online" } else { "offline" },
        ..Default::default()
    };
    let connectivity_disabled = config.disable_docker_hosts_offline
        || threshold::connectivity_disabled(config, compiled_rules, ResourceKind::DockerHost, &host.id, &subject);

    if connectivity_disabled {
        tracking.hosts_offline_counter.remove(&host.id);
        if active_alerts.remove(&id).is_some() {
            dispatches.push(DispatchEvent::Resolved(id));
        }
        return;
    }

    let counter = tracking.hosts_offline_counter.entry(host.id.clone()).or_insert(0);
    match offline::advance(counter, ResourceKind::DockerHost, online) {
        OfflineOutcome::Confirmed => {
            let alert = Alert {
                id: id.clone(),
                kind: AlertKind::DockerHostOffline,
                level: Severity::Critical,
                resource_id: host.id.clone(),
                resource_name: host.name.clone(),
                node: host.name.clone(),
                instance: host.id.clone(),
                message: format!("Docker host {} is unreachable", host.name),
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
            active_alerts.insert(id, alert);
        }
        OfflineOutcome::BackOnline => {
            if active_alerts.remove(&id).is_some() {
                dispatches.push(DispatchEvent::Resolved(id));
            }
        }
        OfflineOutcome::Counting | OfflineOutcome::StillOffline => {}
    }
}

/// Host removed from inventory: clear all tracking and active alerts for it
/// and every container attached to it (spec §4.7).
pub fn handle_docker_host_removed(
    tracking: &mut DockerTracking,
    active_alerts: &mut HashMap<String, Alert>,
    host_id: &str,
    dispatches: &mut Vec<DispatchEvent>,
) {
    tracking.hosts_offline_counter.remove(host_id);
    let host_offline_id = typed_alert_id("docker-host-offline", host_id);
    if active_alerts.remove(&host_offline_id).is_some() {
        dispatches.push(DispatchEvent::Resolved(host_offline_id));
    }
    let container_ids: Vec<String> = active_alerts
        .iter()
        .filter(|(_, a)| a.instance == host_id && matches!(a.kind, AlertKind::DockerContainerState
            | AlertKind::DockerContainerHealth
            | AlertKind::DockerContainerRestartLoop
            | AlertKind::DockerContainerOom
            | AlertKind::DockerContainerMemoryLimit
            | AlertKind::Metric { .. }))
        .map(|(id, _)| id.clone())
        .collect();
    for id in container_ids {
        active_alerts.remove(&id);
        tracking.containers.remove(&id);
        dispatches.push(DispatchEvent::Resolved(id));
    }
}

/// `CheckDockerHost` container sweep (spec §4.7): ignored-prefix filtering,
/// CPU/memory metric evaluation for running containers, non-running state
/// alert, health alert, restart-loop, OOM, and memory-limit hysteresis.
#[allow(clippy::too_many_arguments)]
pub fn check_container(
    config: &AlertConfig,
    tracking: &mut DockerTracking,
    metric_trackers: &mut MetricTrackers<'_>,
    resolved_snapshot: &HashMap<String, ResolvedAlert>,
    now_unix: i64,
    container: &DockerContainerSnapshot,
    dispatches: &mut Vec<DispatchEvent>,
    new_resolved: &mut Vec<(String, ResolvedAlert)>,
) {
    if config.disable_docker_containers || ignored(config, &container.name) {
        return;
    }
    let track = tracking.containers.entry(container.id.clone()).or_default();

    // Restart-loop ring buffer: a bump in the runtime's cumulative counter is
    // one restart event (spec §9(c) open question — decision: the counter is
    // monotonic per the Docker API; any decrease is treated as the runtime
    // having been reset and simply reseeds tracking rather than counting a
    // restart, documented in DESIGN.md).
    if let Some(prev) = track.last_restart_count {
        if container.restart_count > prev {
            for _ in 0..(container.restart_count - prev) {
                track.restart_events.push_back(now_unix);
            }
        }
    }
    track.last_restart_count = Some(container.restart_count);
    let window_secs = config.docker_defaults.restart_window_secs as i64;
    while let Some(&front) = track.restart_events.front() {
        if now_unix - front > window_secs {
            track.restart_events.pop_front();
        } else {
            break;
        }
    }
    let restart_loop_id = typed_alert_id("docker-container-restart-loop", &container.id);
    if track.restart_events.len() as u32 >= config.docker_defaults.restart_count {
        metric_trackers.active_alerts.entry(restart_loop_id.clone()).and_modify(|a| { a.last_seen_unix = now_unix; a.value = track.restart_events.len() as f64; }).or_insert_with(|| Alert {
            id: restart_loop_id.clone(),
            kind: AlertKind::DockerContainerRestartLoop,
            level: Severity::Critical,
            resource_id: container.id.clone(),
            resource_name: container.name.clone(),
            node: container.host_id.clone(),
            instance: container.host_id.clone(),
            message: format!(
                "container {} restarted {} times in {}s",
                container.name,
                track.restart_events.len(),
                window_secs
            ),
            value: track.restart_events.len() as f64,
            threshold: config.docker_defaults.restart_count as f64,
            start_time_unix: now_unix,
            last_seen_unix: now_unix,
            acknowledged: false,
            ack_user: None,
            ack_time_unix: None,
            metadata: Default::default(),
            last_notified_unix: Some(now_unix),
            escalation: EscalationState::default(),
        });
        dispatches.push(DispatchEvent::Alert(metric_trackers.active_alerts[&restart_loop_id].clone()));
    } else if metric_trackers.active_alerts.remove(&restart_loop_id).is_some() {
        dispatches.push(DispatchEvent::Resolved(restart_loop_id));
    }

    // OOM detection: exit code 137 while not running, two confirmations.
    let oom_id = typed_alert_id("docker-container-oom", &container.id);
    let looks_oom = !matches!(container.state, DockerContainerState::Running) && container.exit_code == Some(137);
    if looks_oom {
        track.oom_streak = track.oom_streak.saturating_add(1);
    } else {
        track.oom_streak = 0;
    }
    if track.oom_streak >= 2 {
        metric_trackers.active_alerts.entry(oom_id.clone()).and_modify(|a| a.last_seen_unix = now_unix).or_insert_with(|| Alert {
            id: oom_id.clone(),
            kind: AlertKind::DockerContainerOom,
            level: Severity::Critical,
            resource_id: container.id.clone(),
            resource_name: container.name.clone(),
            node: container.host_id.clone(),
            instance: container.host_id.clone(),
            message: format!("container {} was OOM-killed", container.name),
            value: 137.0,
            threshold: 137.0,
            start_time_unix: now_unix,
            last_seen_unix: now_unix,
            acknowledged: false,
            ack_user: None,
            ack_time_unix: None,
            metadata: Default::default(),
            last_notified_unix: Some(now_unix),
            escalation: EscalationState::default(),
        });
        dispatches.push(DispatchEvent::Alert(metric_trackers.active_alerts[&oom_id].clone()));
    } else if !looks_oom {
        if metric_trackers.active_alerts.remove(&oom_id).is_some() {
            dispatches.push(DispatchEvent::Resolved(oom_id));
        }
    }

    let state_id = typed_alert_id("docker-container-state", &container.id);
    if matches!(container.state, DockerContainerState::Running) {
        track.non_running_counter = 0;
        if metric_trackers.active_alerts.remove(&state_id).is_some() {
            dispatches.push(DispatchEvent::Resolved(state_id));
        }

        let subject = FilterSubject {
            name: &container.name,
            id: &container.id,
            node: &container.host_id,
            vmid: "",
            status: "running",
            cpu: Some(container.cpu_percent),
            memory: Some(container.memory_percent),
            ..Default::default()
        };
        for (metric, value) in [
            (MetricKind::Cpu, container.cpu_percent),
            (MetricKind::Memory, container.memory_percent),
        ] {
            process_metric(
                config,
                metric_trackers,
                resolved_snapshot,
                now_unix,
                &subject,
                MetricObservation {
                    kind: ResourceKind::DockerContainer,
                    resource_id: &container.id,
                    resource_name: &container.name,
                    node: &container.host_id,
                    instance: &container.host_id,
                    metric,
                    value,
                    message_override: None,
                    metadata: Default::default(),
                },
                dispatches,
                new_resolved,
            );
        }

        memory_limit_hysteresis(config, metric_trackers.active_alerts, now_unix, container, dispatches);

        let health_id = typed_alert_id("docker-container-health", &container.id);
        if container.health == "unhealthy" {
            metric_trackers.active_alerts.entry(health_id.clone()).and_modify(|a| a.last_seen_unix = now_unix).or_insert_with(|| Alert {
                id: health_id.clone(),
                kind: AlertKind::DockerContainerHealth,
                level: Severity::Warning,
                resource_id: container.id.clone(),
                resource_name: container.name.clone(),
                node: container.host_id.clone(),
                instance: container.host_id.clone(),
                message: format!("container {} health check failing", container.name),
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
            dispatches.push(DispatchEvent::Alert(metric_trackers.active_alerts[&health_id].clone()));
        } else if metric_trackers.active_alerts.remove(&health_id).is_some() {
            dispatches.push(DispatchEvent::Resolved(health_id));
        }
    } else {
        track.non_running_counter = track.non_running_counter.saturating_add(1);
        if track.non_running_counter >= 2 && !metric_trackers.active_alerts.contains_key(&state_id) {
            let mut metadata = std::collections::BTreeMap::new();
            metadata.insert("state".to_string(), MetadataValue::Str(format!("{:?}", container.state)));
            metric_trackers.active_alerts.insert(
                state_id.clone(),
                Alert {
                    id: state_id.clone(),
                    kind: AlertKind::DockerContainerState,
                    level: config.docker_defaults.thresholds.powered_off_severity,
                    resource_id: container.id.clone(),
                    resource_name: container.name.clone(),
                    node: container.host_id.clone(),
                    instance: container.host_id.clone(),
                    message: format!("container {} is not running ({:?})", container.name, container.state),
                    value: 0.0,
                    threshold: 0.0,
                    start_time_unix: now_unix,
                    last_seen_unix: now_unix,
                    acknowledged: false,
                    ack_user: None,
                    ack_time_unix: None,
                    metadata,
                    last_notified_unix: Some(now_unix),
                    escalation: EscalationState::default(),
                },
            );
            dispatches.push(DispatchEvent::Alert(metric_trackers.active_alerts[&state_id].clone()));
        }
    }
}

fn memory_limit_hysteresis(
    config: &AlertConfig,
    active_alerts: &mut HashMap<String, Alert>,
    now_unix: i64,
    container: &DockerContainerSnapshot,
    dispatches: &mut Vec<DispatchEvent>,
) {
    if container.memory_limit_bytes == 0 {
        return;
    }
    let id = typed_alert_id("docker-container-memory-limit", &container.id);
    let pct = container.memory_percent;
    let warn = config.docker_defaults.memory_warn_pct;
    let crit = config.docker_defaults.memory_critical_pct;
    let clear = (warn - 5.0).max(0.0);

    if let Some(active) = active_alerts.get_mut(&id) {
        if pct <= clear {
            active_alerts.remove(&id);
            dispatches.push(DispatchEvent::Resolved(id));
        } else {
            active.value = pct;
            active.last_seen_unix = now_unix;
            active.level = if pct >= crit { Severity::Critical } else { Severity::Warning };
        }
        return;
    }
    if pct >= warn {
        let level = if pct >= crit { Severity::Critical } else { Severity::Warning };
        active_alerts.insert(
            id.clone(),
            Alert {
                id: id.clone(),
                kind: AlertKind::DockerContainerMemoryLimit,
                level,
                resource_id: container.id.clone(),
                resource_name: container.name.clone(),
                node: container.host_id.clone(),
                instance: container.host_id.clone(),
                message: format!("container {} near its memory limit ({:.1}%)", container.name, pct),
                value: pct,
                threshold: warn,
                start_time_unix: now_unix,
                last_seen_unix: now_unix,
                acknowledged: false,
                ack_user: None,
                ack_time_unix: None,
                metadata: Default::default(),
                last_notified_unix: Some(now_unix),
                escalation: EscalationState::default(),
            },
        );
        dispatches.push(DispatchEvent::Alert(active_alerts[&id].clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ignored_prefix_is_case_insensitive() {
        let mut config = AlertConfig::default();
        config.docker_ignored_container_prefixes.push("Build-".to_string());
        assert!(ignored(&config, "build-cache-01"));
        assert!(!ignored(&config, "web-01"));
    }

    fn container(id: &str, restart_count: u64) -> DockerContainerSnapshot {
        DockerContainerSnapshot {
            id: id.to_string(),
            name: id.to_string(),
            host_id: "host1".to_string(),
            state: DockerContainerState::Running,
            health: "healthy".to_string(),
            exit_code: None,
            cpu_percent: 1.0,
            memory_percent: 1.0,
            memory_limit_bytes: 0,
            memory_used_bytes: 0,
            restart_count,
        }
    }

    #[test]
    fn restart_loop_scenario_fires_once_then_clears() {
        // spec §8 scenario 4: restartCount=3, restartWindow=300. Observed
        // restart counters at +10s, +60s, +120s, +180s (delta 1 each) is 4
        // restarts inside the 300s window, crossing the configured count of
        // 3 — the alert fires once; once the window empties it clears.
        let mut config = AlertConfig::default();
        config.docker_defaults.restart_count = 3;
        config.docker_defaults.restart_window_secs = 300;
        let mut tracking = DockerTracking::default();
        let mut active_alerts = HashMap::new();
        let resolved = HashMap::new();

        let mut fire_count = 0;
        for (t, count) in [(10, 1u64), (60, 2), (120, 3), (180, 4)] {
            let mut trackers = MetricTrackers {
                active_alerts: &mut active_alerts,
                debounce: &mut HashMap::new(),
                rate_limit: &mut HashMap::new(),
                compiled_rules: &[],
            };
            let mut dispatches = Vec::new();
            let mut new_resolved = Vec::new();
            check_container(&config, &mut tracking, &mut trackers, &resolved, t, &container("c1", count), &mut dispatches, &mut new_resolved);
            fire_count += dispatches.iter().filter(|d| matches!(d, DispatchEvent::Alert(a) if matches!(a.kind, AlertKind::DockerContainerRestartLoop))).count();
        }
        assert_eq!(fire_count, 1, "restart-loop alert should fire exactly once across the four observations");
        let id = typed_alert_id("docker-container-restart-loop", "c1");
        assert!(active_alerts.contains_key(&id));

        // Past the 300s window with no further restarts, the ring empties
        // and the alert clears.
        let mut trackers = MetricTrackers {
            active_alerts: &mut active_alerts,
            compiled_rules: &[],
            debounce: &mut HashMap::new(),
            rate_limit: &mut HashMap::new(),
        };
        let mut dispatches = Vec::new();
        let mut new_resolved = Vec::new();
        check_container(&config, &mut tracking, &mut trackers, &resolved, 180 + 301, &container("c1", 4), &mut dispatches, &mut new_resolved);
        assert!(!active_alerts.contains_key(&id));
    }
}
