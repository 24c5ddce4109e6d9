//! Threshold resolution (spec §4.1): override > best-matching custom rule >
//! kind default, merged with OR-combined disables.

use crate::alert::rules::{CompiledCustomRule, FilterSubject};
use crate::config::{AlertConfig, HysteresisThreshold, MetricKind, ResourceKind, ThresholdConfig};

/// Resolve the effective `ThresholdConfig` for one resource, applying the
/// three-layer precedence in spec §4.1. `resource_id` looks up
/// `config.overrides`; `subject` is matched against each enabled custom
/// rule's pre-compiled filter stack (spec §9 — compiled once per config
/// install, not per poll), highest `priority` wins among matches.
pub fn resolve_threshold_config(
    config: &AlertConfig,
    compiled_rules: &[CompiledCustomRule],
    kind: ResourceKind,
    resource_id: &str,
    subject: &FilterSubject<'_>,
) -> ThresholdConfig {
    let base = resource_default(config, kind).clone();

    let best_rule = compiled_rules.iter().filter(|r| r.matches(subject)).max_by_key(|r| r.priority);

    let merged = match best_rule {
        Some(rule) => base.merged_with(&rule.threshold),
        None => base,
    };

    match config.overrides.get(resource_id) {
        Some(ov) => merged.merged_with(ov),
        None => merged,
    }
}

/// Whether connectivity/offline detection for this resource is short-circuited
/// by the resolved threshold layer's `disableConnectivity` flag (spec §4.3),
/// independent of the global `disableAll*Offline` flags checked alongside it.
pub fn connectivity_disabled(
    config: &AlertConfig,
    compiled_rules: &[CompiledCustomRule],
    kind: ResourceKind,
    resource_id: &str,
    subject: &FilterSubject<'_>,
) -> bool {
    resolve_threshold_config(config, compiled_rules, kind, resource_id, subject).disable_connectivity
}

fn resource_default(config: &AlertConfig, kind: ResourceKind) -> &ThresholdConfig {
    match kind {
        ResourceKind::Guest => &config.defaults.guest,
        ResourceKind::Node => &config.defaults.node,
        ResourceKind::Pbs => &config.defaults.pbs,
        ResourceKind::Pmg => &config.defaults.pmg,
        ResourceKind::Storage => &config.storage_default,
        ResourceKind::DockerHost | ResourceKind::DockerContainer => &config.docker_defaults.thresholds,
    }
}

/// Resolve the hysteresis threshold for one `(resource, metric)` pair, or
/// `None` if disabled (`ThresholdConfig.disabled` or `trigger <= 0`).
pub fn resolve_metric_threshold(
    config: &AlertConfig,
    compiled_rules: &[CompiledCustomRule],
    kind: ResourceKind,
    resource_id: &str,
    metric: MetricKind,
    subject: &FilterSubject<'_>,
) -> Option<HysteresisThreshold> {
    let resolved = resolve_threshold_config(config, compiled_rules, kind, resource_id, subject);
    if resolved.disabled {
        return None;
    }
    let t = resolved.get(metric)?;
    if t.is_disabled() {
        None
    } else {
        Some(t)
    }
}

/// Debounce delay in seconds for `(kind, metric)` (spec §4.2):
/// `metricTimeThresholds[kind][metric]` →
/// `metricTimeThresholds[kind]["default"|"_default"|"*"]` →
/// `timeThresholds[kind]` → `metricTimeThresholds["all"][metric]` →
/// `timeThreshold`. `0` disables debouncing.
pub fn debounce_delay_secs(config: &AlertConfig, kind: ResourceKind, metric: MetricKind) -> u64 {
    if let Some(per_kind) = config.metric_time_thresholds.get(kind.as_str()) {
        if let Some(v) = per_kind.get(metric.as_str()) {
            return *v;
        }
        for sentinel in ["default", "_default", "*"] {
            if let Some(v) = per_kind.get(sentinel) {
                return *v;
            }
        }
    }
    if let Some(v) = config.time_thresholds.get(&kind) {
        return *v;
    }
    if let Some(all) = config.metric_time_thresholds.get("all") {
        if let Some(v) = all.get(metric.as_str()) {
            return *v;
        }
    }
    config.time_threshold_secs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CustomRule;

    fn subject() -> FilterSubject<'static> {
        FilterSubject {
            name: "db-01",
            id: "vm-200",
            node: "pve1",
            vmid: "200",
            status: "running",
            cpu: Some(95.0),
            ..Default::default()
        }
    }

    #[test]
    fn override_wins_over_default() {
        let mut config = AlertConfig::default();
        config.overrides.insert(
            "vm-200".to_string(),
            ThresholdConfig {
                cpu: Some(HysteresisThreshold::new(50.0, 40.0)),
                ..Default::default()
            },
        );
        let t = resolve_metric_threshold(&config, &[], ResourceKind::Guest, "vm-200", MetricKind::Cpu, &subject());
        assert_eq!(t.expect("threshold").trigger, 50.0);
    }

    #[test]
    fn custom_rule_wins_over_default_but_not_override() {
        let mut config = AlertConfig::default();
        config.custom_rules.push(CustomRule {
            id: "r1".into(),
            name: "high prio".into(),
            priority: 10,
            enabled: true,
            threshold: ThresholdConfig {
                cpu: Some(HysteresisThreshold::new(60.0, 50.0)),
                ..Default::default()
            },
            filters: Default::default(),
        });
        let compiled = crate::alert::rules::compile_custom_rules(&config.custom_rules);
        let t = resolve_metric_threshold(&config, &compiled, ResourceKind::Guest, "vm-200", MetricKind::Cpu, &subject());
        assert_eq!(t.expect("threshold").trigger, 60.0);
    }

    #[test]
    fn disabled_threshold_returns_none() {
        let mut config = AlertConfig::default();
        config.defaults.guest.cpu = Some(HysteresisThreshold::new(0.0, 0.0));
        let t = resolve_metric_threshold(&config, &[], ResourceKind::Guest, "vm-200", MetricKind::Cpu, &subject());
        assert!(t.is_none());
    }

    #[test]
    fn debounce_precedence_specific_beats_kind_default() {
        let mut config = AlertConfig::default();
        config.time_threshold_secs = 5;
        config.time_thresholds.insert(ResourceKind::Guest, 20);
        let mut per_kind = std::collections::HashMap::new();
        per_kind.insert("cpu".to_string(), 30u64);
        config.metric_time_thresholds.insert("guest".to_string(), per_kind);

        assert_eq!(debounce_delay_secs(&config, ResourceKind::Guest, MetricKind::Cpu), 30);
        assert_eq!(debounce_delay_secs(&config, ResourceKind::Guest, MetricKind::Memory), 20);
        assert_eq!(debounce_delay_secs(&config, ResourceKind::Node, MetricKind::Cpu), 5);
    }
}
