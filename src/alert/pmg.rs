//! PMG sub-engine (spec §4.6): queue totals, oldest-message age, per-node
//! scaled thresholds with outlier detection, quarantine backlog growth,
//! spam/virus anomaly detection against a trimmed-mean hourly baseline.

use crate::alert::dispatch::DispatchEvent;
use crate::alert::model::{typed_alert_id, Alert, AlertKind, EscalationState};
use crate::alert::offline::{self, OfflineOutcome};
use crate::alert::rules::{CompiledCustomRule, FilterSubject};
use crate::alert::threshold;
use crate::config::{AlertConfig, ResourceKind, Severity};
use crate::types::PmgSnapshot;
use std::collections::{HashMap, VecDeque};

const HOURLY_RING_CAPACITY: usize = 48;

#[derive(Debug, Clone, Default)]
pub struct PmgInstanceTracking {
    pub offline_counter: u32,
    /// Quarantine totals sampled roughly every poll, used to interpolate the
    /// "~2 hours ago" comparison point for backlog growth (spec §4.6).
    pub quarantine_history: VecDeque<(i64, u64)>,
    pub spam_hourly_ring: VecDeque<f64>,
    pub virus_hourly_ring: VecDeque<f64>,
    /// Consecutive polls an anomaly candidate has been observed (two-sample
    /// confirmation, spec §4.6).
    pub spam_anomaly_streak: u32,
    pub virus_anomaly_streak: u32,
}

#[derive(Debug, Clone, Default)]
pub struct PmgTracking {
    pub instances: HashMap<String, PmgInstanceTracking>,
}

fn median(values: &mut [f64]) -> f64 {
    values.sort_by(f64::total_cmp);
    let n = values.len();
    if n == 0 {
        0.0
    } else if n % 2 == 1 {
        values[n / 2]
    } else {
        (values[n / 2 - 1] + values[n / 2]) / 2.0
    }
}

/// Trimmed mean of the 24 most recent samples, dropping the top/bottom 2
/// (spec §4.6); falls back to the median of those 24 when the two estimates
/// disagree by more than 40%, which keeps a handful of spiky hours from
/// dragging the baseline around.
fn trimmed_baseline(samples: &[f64]) -> f64 {
    let recent: &[f64] = if samples.len() > 24 { &samples[samples.len() - 24..] } else { samples };
    let mut sorted = recent.to_vec();
    sorted.sort_by(f64::total_cmp);
    let med = median(&mut sorted.clone());
    if sorted.len() <= 4 {
        return med;
    }
    let kept = &sorted[2..sorted.len() - 2];
    let trimmed = kept.iter().sum::<f64>() / kept.len() as f64;
    if med > 0.0 && ((trimmed - med).abs() / med) > 0.4 {
        med
    } else {
        trimmed
    }
}

fn value_at_or_before(history: &VecDeque<(i64, u64)>, target_unix: i64) -> Option<u64> {
    history.iter().rev().find(|(t, _)| *t <= target_unix).map(|(_, v)| *v)
}

/// `CheckPMG` (spec §4.6). Evaluates cluster-wide queue totals, oldest
/// message age, per-node scaled thresholds with a median-based outlier
/// check, quarantine backlog growth vs. the ~2h-prior interpolated sample,
/// and the spam/virus anomaly detector.
pub fn check_pmg(
    config: &AlertConfig,
    compiled_rules: &[CompiledCustomRule],
    tracking: &mut PmgTracking,
    active_alerts: &mut HashMap<String, Alert>,
    now_unix: i64,
    snapshot: &PmgSnapshot,
    dispatches: &mut Vec<DispatchEvent>,
) {
    if config.disable_pmg {
        return;
    }
    let track = tracking.instances.entry(snapshot.instance.clone()).or_default();

    let subject = FilterSubject {
        name: &snapshot.instance,
        id: &snapshot.instance,
        node: &snapshot.instance,
        vmid: "",
        status: if snapshot.online { "online" } else { "offline" },
        ..Default::default()
    };

    let offline_id = typed_alert_id("pmg-offline", &snapshot.instance);
    let connectivity_disabled = config.disable_pmg_offline
        || threshold::connectivity_disabled(config, compiled_rules, ResourceKind::Pmg, &snapshot.instance, &subject);

    if connectivity_disabled {
        track.offline_counter = 0;
        if active_alerts.remove(&offline_id).is_some() {
            dispatches.push(DispatchEvent::Resolved(offline_id));
        }
    } else {
        match offline::advance(&mut track.offline_counter, ResourceKind::Pmg, snapshot.online) {
            OfflineOutcome::Confirmed => {
                let alert = Alert {
                    id: offline_id.clone(),
                    kind: AlertKind::PmgOffline,
                    level: Severity::Critical,
                    resource_id: snapshot.instance.clone(),
                    resource_name: snapshot.instance.clone(),
                    node: snapshot.instance.clone(),
                    instance: snapshot.instance.clone(),
                    message: format!("PMG instance {} is unreachable", snapshot.instance),
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
                active_alerts.insert(offline_id, alert);
            }
            OfflineOutcome::BackOnline => {
                active_alerts.remove(&offline_id);
                dispatches.push(DispatchEvent::Resolved(offline_id));
            }
            OfflineOutcome::Counting | OfflineOutcome::StillOffline => {}
        }
    }
    if !snapshot.online {
        return;
    }

    let defaults = &config.pmg_defaults;

    // Cluster-wide queue total.
    let total: u64 = snapshot.nodes.iter().map(|n| n.total).sum();
    upsert_or_clear_scalar(
        active_alerts,
        typed_alert_id("pmg-queue-total", &snapshot.instance),
        total as f64,
        defaults.queue_total_warning as f64,
        defaults.queue_total_critical as f64,
        &snapshot.instance,
        now_unix,
        |v| format!("mail queue at {v:.0} messages"),
        dispatches,
    );

    if let Some(age) = snapshot.oldest_queue_message_age_secs {
        upsert_or_clear_scalar(
            active_alerts,
            typed_alert_id("pmg-oldest-message", &snapshot.instance),
            age,
            defaults.oldest_message_warning_secs,
            defaults.oldest_message_critical_secs,
            &snapshot.instance,
            now_unix,
            |v| format!("oldest queued message is {:.0} minutes old", v / 60.0),
            dispatches,
        );
    }

    // Per-node scaled thresholds (spec §4.6): scaled = ceil(cluster × {0.6
    // warn, 0.8 crit}) with a floor of 1, each band checked independently
    // (spec §9(b)) so a node can breach warn without also needing to clear
    // crit first. A node is flagged only once it is also a statistical
    // outlier vs. the cluster median (>40% above).
    if snapshot.nodes.len() >= 2 {
        let totals: Vec<f64> = snapshot.nodes.iter().map(|n| n.total as f64).collect();
        let node_median = median(&mut totals.clone());
        let scaled_warn = ((defaults.queue_total_warning as f64 * 0.6).ceil() as u64).max(1);
        let scaled_crit = ((defaults.queue_total_critical as f64 * 0.8).ceil() as u64).max(1);
        for node in &snapshot.nodes {
            let id = typed_alert_id("pmg-node-queue", &format!("{}-{}", snapshot.instance, node.node));
            let is_outlier = node_median > 0.0 && node.total as f64 > node_median * 1.4;
            let breaches = is_outlier && node.total >= scaled_warn;
            if breaches {
                upsert_or_clear_scalar(
                    active_alerts,
                    id,
                    node.total as f64,
                    scaled_warn as f64,
                    scaled_crit as f64,
                    &format!("{}/{}", snapshot.instance, node.node),
                    now_unix,
                    |v| format!("node queue at {v:.0}, well above cluster median"),
                    dispatches,
                );
            } else if active_alerts.remove(&id).is_some() {
                dispatches.push(DispatchEvent::Resolved(id));
            }
        }
    }

    // Quarantine backlog growth vs. the sample closest to two hours ago.
    let quarantine_total = snapshot.quarantine_spam_count + snapshot.quarantine_virus_count;
    track.quarantine_history.push_back((now_unix, quarantine_total));
    while track.quarantine_history.len() > 200 {
        track.quarantine_history.pop_front();
    }
    if let Some(prior) = value_at_or_before(&track.quarantine_history, now_unix - 2 * 3600) {
        let growth_abs = quarantine_total.saturating_sub(prior);
        let growth_pct = if prior > 0 {
            growth_abs as f64 / prior as f64 * 100.0
        } else if growth_abs > 0 {
            100.0
        } else {
            0.0
        };
        let breaches_warn = growth_abs >= defaults.quarantine_growth_absolute_warn
            || growth_pct >= defaults.quarantine_growth_percent_warn;
        let breaches_crit = growth_abs >= defaults.quarantine_growth_absolute_crit
            || growth_pct >= defaults.quarantine_growth_percent_crit;
        let id = typed_alert_id("pmg-quarantine-growth", &snapshot.instance);
        if breaches_warn {
            let level = if breaches_crit { Severity::Critical } else { Severity::Warning };
            upsert_growth_alert(active_alerts, id, growth_abs as f64, level, &snapshot.instance, now_unix, dispatches);
        } else if active_alerts.remove(&id).is_some() {
            dispatches.push(DispatchEvent::Resolved(id));
        }
    }

    // Spam/virus anomaly: hourly ring of up to 48 samples, trimmed-mean
    // baseline (falls back to median under 5 samples), flagged only after
    // two consecutive anomalous samples.
    check_anomaly(
        active_alerts,
        &mut track.spam_hourly_ring,
        &mut track.spam_anomaly_streak,
        snapshot.spam_in_hourly,
        "spam",
        &snapshot.instance,
        now_unix,
        dispatches,
    );
    check_anomaly(
        active_alerts,
        &mut track.virus_hourly_ring,
        &mut track.virus_anomaly_streak,
        snapshot.virus_in_hourly,
        "virus",
        &snapshot.instance,
        now_unix,
        dispatches,
    );
}

#[allow(clippy::too_many_arguments)]
fn upsert_or_clear_scalar(
    active_alerts: &mut HashMap<String, Alert>,
    id: String,
    value: f64,
    warn: f64,
    crit: f64,
    instance: &str,
    now_unix: i64,
    message: impl Fn(f64) -> String,
    dispatches: &mut Vec<DispatchEvent>,
) {
    let clear = warn * 0.9;
    if let Some(active) = active_alerts.get_mut(&id) {
        if value <= clear {
            active_alerts.remove(&id);
            dispatches.push(DispatchEvent::Resolved(id));
        } else {
            active.value = value;
            active.last_seen_unix = now_unix;
            active.level = if value >= crit { Severity::Critical } else { Severity::Warning };
        }
        return;
    }
    if value >= warn {
        let level = if value >= crit { Severity::Critical } else { Severity::Warning };
        let alert = Alert {
            id: id.clone(),
            kind: AlertKind::PmgAnomaly { metric: "queue".to_string() },
            level,
            resource_id: instance.to_string(),
            resource_name: instance.to_string(),
            node: instance.to_string(),
            instance: instance.to_string(),
            message: message(value),
            value,
            threshold: warn,
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

fn upsert_growth_alert(
    active_alerts: &mut HashMap<String, Alert>,
    id: String,
    value: f64,
    level: Severity,
    instance: &str,
    now_unix: i64,
    dispatches: &mut Vec<DispatchEvent>,
) {
    if let Some(active) = active_alerts.get_mut(&id) {
        active.value = value;
        active.level = level;
        active.last_seen_unix = now_unix;
        return;
    }
    let alert = Alert {
        id: id.clone(),
        kind: AlertKind::PmgAnomaly { metric: "quarantine_growth".to_string() },
        level,
        resource_id: instance.to_string(),
        resource_name: instance.to_string(),
        node: instance.to_string(),
        instance: instance.to_string(),
        message: format!("quarantine grew by {value:.0} messages in ~2h"),
        value,
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

/// Minimum ring samples before the anomaly detector evaluates at all (spec
/// §4.6).
const MIN_ANOMALY_SAMPLES: usize = 12;
/// Below this baseline a site is "quiet" and anomalies are judged on
/// absolute deltas rather than ratios (spec §4.6).
const QUIET_SITE_BASELINE: f64 = 40.0;

/// Either condition qualifies the band (spec §8 scenario 5 fires critical on
/// ratio alone at an absolute delta below `base+300`, so the `&` in §4.6's
/// prose reads as "characterized by", not a strict conjunction — documented
/// in DESIGN.md).
fn anomaly_severity(sample: f64, baseline: f64) -> Option<Severity> {
    if baseline < QUIET_SITE_BASELINE {
        let delta = sample - baseline;
        if delta >= 120.0 {
            Some(Severity::Critical)
        } else if delta >= 60.0 {
            Some(Severity::Warning)
        } else {
            None
        }
    } else {
        let ratio = if baseline > 0.0 { sample / baseline } else { f64::INFINITY };
        if ratio >= 2.5 || sample >= baseline + 300.0 {
            Some(Severity::Critical)
        } else if ratio >= 1.8 || sample >= baseline + 150.0 {
            Some(Severity::Warning)
        } else {
            None
        }
    }
}

/// Spam/virus anomaly detector (spec §4.6): trimmed-baseline comparison with
/// two-sample confirmation before an alert is emitted, and immediate
/// clearing (pending + active) the moment a sample drops back below
/// threshold.
#[allow(clippy::too_many_arguments)]
fn check_anomaly(
    active_alerts: &mut HashMap<String, Alert>,
    ring: &mut VecDeque<f64>,
    pending_streak: &mut u32,
    sample: Option<f64>,
    metric_name: &str,
    instance: &str,
    now_unix: i64,
    dispatches: &mut Vec<DispatchEvent>,
) {
    let Some(sample) = sample else { return };
    let id = typed_alert_id(&format!("pmg-{metric_name}-anomaly"), instance);

    if ring.len() < MIN_ANOMALY_SAMPLES {
        ring.push_back(sample);
        while ring.len() > HOURLY_RING_CAPACITY {
            ring.pop_front();
        }
        return;
    }

    let baseline = trimmed_baseline(ring.make_contiguous());
    ring.push_back(sample);
    while ring.len() > HOURLY_RING_CAPACITY {
        ring.pop_front();
    }

    let severity = anomaly_severity(sample, baseline);
    match severity {
        Some(level) => {
            *pending_streak += 1;
            if *pending_streak >= 2 {
                if let Some(active) = active_alerts.get_mut(&id) {
                    active.value = sample;
                    active.level = level;
                    active.last_seen_unix = now_unix;
                } else {
                    let alert = Alert {
                        id: id.clone(),
                        kind: AlertKind::PmgAnomaly { metric: metric_name.to_string() },
                        level,
                        resource_id: instance.to_string(),
                        resource_name: instance.to_string(),
                        node: instance.to_string(),
                        instance: instance.to_string(),
                        message: format!("{metric_name} volume at {sample:.0}/h, well above baseline {baseline:.0}/h"),
                        value: sample,
                        threshold: baseline,
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
        }
        None => {
            *pending_streak = 0;
            if active_alerts.remove(&id).is_some() {
                dispatches.push(DispatchEvent::Resolved(id));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trimmed_baseline_falls_back_to_median_on_small_samples() {
        let samples = [1.0, 2.0, 3.0];
        assert_eq!(trimmed_baseline(&samples), 2.0);
    }

    #[test]
    fn trimmed_baseline_drops_top_and_bottom_two_of_last_24() {
        let mut samples = vec![50.0; 24];
        samples[0] = 1000.0;
        samples[1] = 900.0;
        samples[22] = 0.1;
        samples[23] = 0.2;
        assert_eq!(trimmed_baseline(&samples), 50.0);
    }

    #[test]
    fn anomaly_scenario_two_sample_confirmation_then_clear() {
        // spec §8 scenario 5: 24 hourly samples at 50 (baseline 50), a spike
        // to 200 is a pending candidate (ratio 4 >= 1.8, abs 200 >= 50+150 =
        // 200) but doesn't fire until the second consecutive breach; 250
        // confirms critical (ratio 5, abs 250 >= 50+300=350? no - check crit
        // separately); dropping back to 80 clears both the alert and the
        // pending streak.
        let mut active_alerts = HashMap::new();
        let mut ring = VecDeque::new();
        let mut streak = 0u32;
        let mut dispatches = Vec::new();

        for t in 0..24 {
            check_anomaly(&mut active_alerts, &mut ring, &mut streak, Some(50.0), "spamIn", "pmg1", t, &mut dispatches);
        }
        assert!(active_alerts.is_empty());
        dispatches.clear();

        check_anomaly(&mut active_alerts, &mut ring, &mut streak, Some(200.0), "spamIn", "pmg1", 24, &mut dispatches);
        assert!(active_alerts.is_empty(), "first breach is pending, not yet an alert");
        assert_eq!(streak, 1);

        check_anomaly(&mut active_alerts, &mut ring, &mut streak, Some(250.0), "spamIn", "pmg1", 25, &mut dispatches);
        let id = typed_alert_id("pmg-spamIn-anomaly", "pmg1");
        assert!(active_alerts.contains_key(&id), "second consecutive breach fires the alert");
        assert_eq!(active_alerts[&id].level, Severity::Critical);

        check_anomaly(&mut active_alerts, &mut ring, &mut streak, Some(80.0), "spamIn", "pmg1", 26, &mut dispatches);
        assert!(active_alerts.is_empty(), "drop below threshold clears the alert");
        assert_eq!(streak, 0);
    }
}
