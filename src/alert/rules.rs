//! Custom-rule filter stacks compiled into predicates (spec §4.1, §9).
//!
//! A `FilterStack` is pure data; `compile` turns it into a closure once so a
//! poll of N resources against M custom rules doesn't re-walk the condition
//! list per resource (spec §9 "Filter stack as data").

use crate::config::{CustomRule, FilterCondition, FilterStack, LogicalOp, MetricField, ThresholdConfig};

/// The live fields of a resource a filter stack can be evaluated against.
/// Evaluators build one of these per resource before resolving thresholds.
#[derive(Debug, Clone, Default)]
pub struct FilterSubject<'a> {
    pub name: &'a str,
    pub id: &'a str,
    pub node: &'a str,
    pub vmid: &'a str,
    pub status: &'a str,
    pub cpu: Option<f64>,
    pub memory: Option<f64>,
    pub disk: Option<f64>,
    pub disk_read_mb_s: Option<f64>,
    pub disk_write_mb_s: Option<f64>,
    pub network_in_mb_s: Option<f64>,
    pub network_out_mb_s: Option<f64>,
}

/// A filter stack compiled to a closure over a `FilterSubject`.
pub struct CompiledFilter {
    operator: LogicalOp,
    conditions: Vec<FilterCondition>,
}

impl CompiledFilter {
    pub fn compile(stack: &FilterStack) -> Self {
        Self {
            operator: stack.operator,
            conditions: stack.conditions.clone(),
        }
    }

    /// Empty filter stacks match everything (an unfiltered custom rule).
    pub fn matches(&self, subject: &FilterSubject<'_>) -> bool {
        if self.conditions.is_empty() {
            return true;
        }
        match self.operator {
            LogicalOp::And => self.conditions.iter().all(|c| eval_condition(c, subject)),
            LogicalOp::Or => self.conditions.iter().any(|c| eval_condition(c, subject)),
        }
    }
}

/// A custom rule with its filter stack compiled once (spec §9), carried in
/// `EngineState`/`MetricTrackers` and rebuilt only when `update_config`
/// installs a new `AlertConfig` — never per poll or per metric.
pub struct CompiledCustomRule {
    pub priority: i32,
    pub threshold: ThresholdConfig,
    enabled: bool,
    filter: CompiledFilter,
}

impl CompiledCustomRule {
    pub fn matches(&self, subject: &FilterSubject<'_>) -> bool {
        self.enabled && self.filter.matches(subject)
    }
}

/// Compile every custom rule's filter stack once, in config order.
pub fn compile_custom_rules(rules: &[CustomRule]) -> Vec<CompiledCustomRule> {
    rules
        .iter()
        .map(|r| CompiledCustomRule {
            priority: r.priority,
            threshold: r.threshold.clone(),
            enabled: r.enabled,
            filter: CompiledFilter::compile(&r.filters),
        })
        .collect()
}

fn metric_field_value(field: MetricField, subject: &FilterSubject<'_>) -> Option<f64> {
    match field {
        MetricField::Cpu => subject.cpu,
        MetricField::Memory => subject.memory,
        MetricField::Disk => subject.disk,
        MetricField::DiskRead => subject.disk_read_mb_s,
        MetricField::DiskWrite => subject.disk_write_mb_s,
        MetricField::NetworkIn => subject.network_in_mb_s,
        MetricField::NetworkOut => subject.network_out_mb_s,
    }
}

fn eval_condition(condition: &FilterCondition, subject: &FilterSubject<'_>) -> bool {
    match condition {
        FilterCondition::Metric { field, op, value } => match metric_field_value(*field, subject) {
            // Spec §9(a): string/missing metric values are undefined behaviour —
            // we reject (return false) rather than guess.
            Some(v) => op.apply(v, *value),
            None => false,
        },
        FilterCondition::Text { field, substring } => {
            let haystack = match field {
                crate::config::TextField::Name => subject.name,
                crate::config::TextField::Node => subject.node,
                crate::config::TextField::Vmid => subject.vmid,
            };
            haystack.to_lowercase().contains(&substring.to_lowercase())
        }
        FilterCondition::Raw { substring } => {
            let needle = substring.to_lowercase();
            [subject.name, subject.id, subject.node, subject.status]
                .iter()
                .any(|h| h.to_lowercase().contains(&needle))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CompareOp, TextField};

    fn subject() -> FilterSubject<'static> {
        FilterSubject {
            name: "web-server-01",
            id: "vm-100",
            node: "pve1",
            vmid: "100",
            status: "running",
            cpu: Some(92.0),
            ..Default::default()
        }
    }

    #[test]
    fn metric_condition_matches() {
        let stack = FilterStack {
            operator: LogicalOp::And,
            conditions: vec![FilterCondition::Metric {
                field: MetricField::Cpu,
                op: CompareOp::Ge,
                value: 90.0,
            }],
        };
        assert!(CompiledFilter::compile(&stack).matches(&subject()));
    }

    #[test]
    fn text_condition_is_case_insensitive() {
        let stack = FilterStack {
            operator: LogicalOp::And,
            conditions: vec![FilterCondition::Text {
                field: TextField::Name,
                substring: "WEB-SERVER".to_string(),
            }],
        };
        assert!(CompiledFilter::compile(&stack).matches(&subject()));
    }

    #[test]
    fn missing_metric_value_rejects() {
        let stack = FilterStack {
            operator: LogicalOp::And,
            conditions: vec![FilterCondition::Metric {
                field: MetricField::DiskRead,
                op: CompareOp::Gt,
                value: 0.0,
            }],
        };
        assert!(!CompiledFilter::compile(&stack).matches(&subject()));
    }

    #[test]
    fn compiled_custom_rules_skip_disabled_and_keep_priority() {
        let rules = vec![
            CustomRule {
                id: "r1".into(),
                name: "disabled".into(),
                priority: 100,
                enabled: false,
                threshold: ThresholdConfig::default(),
                filters: FilterStack::default(),
            },
            CustomRule {
                id: "r2".into(),
                name: "enabled".into(),
                priority: 5,
                enabled: true,
                threshold: ThresholdConfig::default(),
                filters: FilterStack::default(),
            },
        ];
        let compiled = compile_custom_rules(&rules);
        assert!(!compiled[0].matches(&subject()));
        assert!(compiled[1].matches(&subject()));
        assert_eq!(compiled[1].priority, 5);
    }

    #[test]
    fn or_combinator_short_circuits_true() {
        let stack = FilterStack {
            operator: LogicalOp::Or,
            conditions: vec![
                FilterCondition::Raw { substring: "nomatch".into() },
                FilterCondition::Raw { substring: "pve1".into() },
            ],
        };
        assert!(CompiledFilter::compile(&stack).matches(&subject()));
    }
}
