//! Shared per-`(resource, metric)` evaluation glue used by every resource
//! evaluator (spec §4.4–§4.8): thread a single observation through threshold
//! resolution, the debounce state machine, and dispatch decisions.

use crate::alert::dispatch::{category_of, quiet_hours_suppresses, DispatchEvent};
use crate::alert::model::{metric_alert_id, Alert, AlertKind, EscalationState};
use crate::alert::rules::{CompiledCustomRule, FilterSubject};
use crate::alert::state_machine::{self, DebounceState, EvalParams, Outcome};
use crate::alert::threshold;
use crate::alert::ResolvedAlert;
use crate::config::{AlertConfig, MetricKind, ResourceKind, Severity};
use crate::types::Metadata;
use std::collections::{HashMap, VecDeque};

/// One metric reading for a resource, already converted to display units
/// (percent, MB/s, °C).
pub struct MetricObservation<'a> {
    pub kind: ResourceKind,
    pub resource_id: &'a str,
    pub resource_name: &'a str,
    pub node: &'a str,
    pub instance: &'a str,
    pub metric: MetricKind,
    pub value: f64,
    pub message_override: Option<String>,
    pub metadata: Metadata,
}

/// Everything `process_metric` needs from the engine's guarded state, scoped
/// down so this module stays independent of the concrete `EngineState`
/// layout (wired up in `alert::engine`).
pub struct MetricTrackers<'a> {
    pub active_alerts: &'a mut HashMap<String, Alert>,
    pub debounce: &'a mut HashMap<String, DebounceState>,
    pub rate_limit: &'a mut HashMap<String, VecDeque<i64>>,
    pub compiled_rules: &'a [CompiledCustomRule],
}

/// Process one metric observation against the tracked state, appending any
/// callback dispatches and newly-resolved entries to the caller's buffers.
/// Mirrors spec §4.2's full lifecycle: disabled clears an active alert;
/// active alerts resolve on drop below `effective_clear`, else may
/// redispatch; otherwise the observation feeds the debounce state machine.
pub fn process_metric(
    config: &AlertConfig,
    trackers: &mut MetricTrackers<'_>,
    resolved_snapshot: &HashMap<String, ResolvedAlert>,
    now_unix: i64,
    subject: &FilterSubject<'_>,
    obs: MetricObservation<'_>,
    dispatches: &mut Vec<DispatchEvent>,
    new_resolved: &mut Vec<(String, ResolvedAlert)>,
) {
    let id = metric_alert_id(obs.resource_id, obs.metric.as_str());
    let threshold =
        threshold::resolve_metric_threshold(config, trackers.compiled_rules, obs.kind, obs.resource_id, obs.metric, subject);

    let Some(threshold) = threshold else {
        if let Some(removed) = trackers.active_alerts.remove(&id) {
            trackers.debounce.remove(&id);
            trackers.rate_limit.remove(&id);
            new_resolved.push((
                id.clone(),
                ResolvedAlert {
                    alert: removed,
                    resolved_time_unix: now_unix,
                },
            ));
            dispatches.push(DispatchEvent::Resolved(id));
        }
        return;
    };

    if let Some(active) = trackers.active_alerts.get_mut(&id) {
        if obs.value <= threshold.effective_clear() {
            let resolved_alert = active.clone();
            trackers.active_alerts.remove(&id);
            trackers.debounce.remove(&id);
            trackers.rate_limit.remove(&id);
            new_resolved.push((
                id.clone(),
                ResolvedAlert {
                    alert: resolved_alert,
                    resolved_time_unix: now_unix,
                },
            ));
            dispatches.push(DispatchEvent::Resolved(id));
            return;
        }

        active.value = obs.value;
        active.last_seen_unix = now_unix;
        active.metadata.extend(obs.metadata.clone());
        let new_level = state_machine::recompute_level(obs.value, threshold.trigger);
        let escalated = new_level == Severity::Critical && active.level != Severity::Critical;
        active.level = new_level;

        let cooldown_secs = (config.schedule.cooldown_minutes * 60) as i64;
        if state_machine::should_redispatch(active.last_notified_unix, now_unix, cooldown_secs, escalated) {
            let category = category_of(&active.kind);
            let quiet = quiet_hours_suppresses(&config.schedule.quiet_hours, now_unix, active.level, category);
            let activation = crate::config::dispatch_suppressed_by_activation(config);
            let window = trackers.rate_limit.entry(id.clone()).or_default();
            window.retain(|t| now_unix - t < 3600);
            let rate_limited = window.len() as u32 >= config.schedule.max_alerts_hour;
            if !quiet && !rate_limited && !activation {
                window.push_back(now_unix);
                active.last_notified_unix = Some(now_unix);
                dispatches.push(DispatchEvent::Alert(active.clone()));
            }
        }
        return;
    }

    let debounce = trackers.debounce.entry(id.clone()).or_default();
    let recent_resolved = resolved_snapshot.get(&id).and_then(|r| {
        let age = now_unix - r.resolved_time_unix;
        (age < (config.suppression_window_minutes as i64) * 60).then_some((r.alert.value, r.resolved_time_unix))
    });
    let delay_secs = threshold::debounce_delay_secs(config, obs.kind, obs.metric);
    let params = EvalParams {
        now_unix,
        value: obs.value,
        threshold,
        delay_secs,
        suppression_window_secs: (config.suppression_window_minutes as i64) * 60,
        minimum_delta_percent: config.minimum_delta_percent,
        recent_resolved,
    };
    let outcome = state_machine::evaluate(debounce, false, &params);
    if let Outcome::CreateAlert { start_time_unix } = outcome {
        let level = state_machine::recompute_level(obs.value, threshold.trigger);
        let message = obs
            .message_override
            .clone()
            .unwrap_or_else(|| crate::alert::message::synthesize(obs.kind.as_str(), obs.metric, obs.value));
        let mut alert = Alert {
            id: id.clone(),
            kind: AlertKind::Metric { metric: obs.metric.as_str().to_string() },
            level,
            resource_id: obs.resource_id.to_string(),
            resource_name: obs.resource_name.to_string(),
            node: obs.node.to_string(),
            instance: obs.instance.to_string(),
            message,
            value: obs.value,
            threshold: threshold.trigger,
            start_time_unix,
            last_seen_unix: now_unix,
            acknowledged: false,
            ack_user: None,
            ack_time_unix: None,
            metadata: obs.metadata,
            last_notified_unix: None,
            escalation: EscalationState::default(),
        };

        let category = category_of(&alert.kind);
        let quiet = quiet_hours_suppresses(&config.schedule.quiet_hours, now_unix, alert.level, category);
        let activation = crate::config::dispatch_suppressed_by_activation(config);
        if !quiet && !activation {
            let window = trackers.rate_limit.entry(id.clone()).or_default();
            window.retain(|t| now_unix - t < 3600);
            if (window.len() as u32) < config.schedule.max_alerts_hour {
                window.push_back(now_unix);
                alert.last_notified_unix = Some(now_unix);
                dispatches.push(DispatchEvent::Alert(alert.clone()));
            }
        }
        trackers.active_alerts.insert(id, alert);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AlertConfig;

    fn subject<'a>() -> FilterSubject<'a> {
        FilterSubject::default()
    }

    fn observe(value: f64) -> MetricObservation<'static> {
        MetricObservation {
            kind: ResourceKind::Guest,
            resource_id: "vm-100",
            resource_name: "vm-100",
            node: "pve1",
            instance: "pve1",
            metric: MetricKind::Cpu,
            value,
            message_override: None,
            metadata: Metadata::new(),
        }
    }

    #[test]
    fn rate_limit_caps_dispatch_within_rolling_hour() {
        // spec §8 law: within any rolling hour, onAlert for a single id
        // fires at most maxAlertsHour times, even as the alert keeps
        // escalating/cooling down and re-crossing cooldown.
        let mut config = AlertConfig::default();
        config.activation_state = Some(crate::config::ActivationState::Active);
        config.defaults.guest.cpu = Some(crate::config::HysteresisThreshold::new(80.0, 75.0));
        config.schedule.cooldown_minutes = 0;
        config.schedule.max_alerts_hour = 3;
        config.time_threshold_secs = 0;

        let mut active_alerts = HashMap::new();
        let mut debounce = HashMap::new();
        let mut rate_limit = HashMap::new();
        let resolved = HashMap::new();
        let mut fired = 0;

        for t in 0..10 {
            let mut trackers = MetricTrackers {
                active_alerts: &mut active_alerts,
                debounce: &mut debounce,
                rate_limit: &mut rate_limit,
                compiled_rules: &[],
            };
            let mut dispatches = Vec::new();
            let mut new_resolved = Vec::new();
            process_metric(&config, &mut trackers, &resolved, t * 60, &subject(), observe(90.0), &mut dispatches, &mut new_resolved);
            fired += dispatches.len();
        }

        assert_eq!(fired, 3, "onAlert must not fire more than maxAlertsHour times in a rolling hour");
    }
}
