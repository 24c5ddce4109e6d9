//! Alert configuration — thresholds, overrides, custom rules, schedule.
//!
//! `AlertConfig` is the singleton process state handed to the engine through
//! `UpdateConfig` (spec §3, §6). The engine never loads or persists this
//! struct itself — that is the configuration-persistence collaborator named
//! as out of scope in spec §1(d) — but the types live here so callers have a
//! concrete shape to build and the engine has something to validate.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Alert severity. `critical` always outranks `warning`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    #[default]
    Warning,
    Critical,
}

/// One of the metrics a resource can be evaluated against. `Usage` is the
/// storage-pool fill percentage; the others apply to guests/nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MetricKind {
    Cpu,
    Memory,
    Disk,
    DiskRead,
    DiskWrite,
    NetworkIn,
    NetworkOut,
    Temperature,
    Usage,
}

impl MetricKind {
    pub const ALL: [MetricKind; 9] = [
        MetricKind::Cpu,
        MetricKind::Memory,
        MetricKind::Disk,
        MetricKind::DiskRead,
        MetricKind::DiskWrite,
        MetricKind::NetworkIn,
        MetricKind::NetworkOut,
        MetricKind::Temperature,
        MetricKind::Usage,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MetricKind::Cpu => "cpu",
            MetricKind::Memory => "memory",
            MetricKind::Disk => "disk",
            MetricKind::DiskRead => "diskRead",
            MetricKind::DiskWrite => "diskWrite",
            MetricKind::NetworkIn => "networkIn",
            MetricKind::NetworkOut => "networkOut",
            MetricKind::Temperature => "temperature",
            MetricKind::Usage => "usage",
        }
    }

    /// Inverse of `as_str`, used to recover a `MetricKind` from the textual
    /// suffix carried on `AlertKind::Metric { metric }`.
    pub fn from_str_name(name: &str) -> Option<MetricKind> {
        match name {
            "cpu" => Some(MetricKind::Cpu),
            "memory" => Some(MetricKind::Memory),
            "disk" => Some(MetricKind::Disk),
            "diskRead" => Some(MetricKind::DiskRead),
            "diskWrite" => Some(MetricKind::DiskWrite),
            "networkIn" => Some(MetricKind::NetworkIn),
            "networkOut" => Some(MetricKind::NetworkOut),
            "temperature" => Some(MetricKind::Temperature),
            "usage" => Some(MetricKind::Usage),
            _ => None,
        }
    }

    /// Rate metrics are reported in bytes/sec and displayed as MB/s.
    pub fn is_rate(self) -> bool {
        matches!(
            self,
            MetricKind::DiskRead | MetricKind::DiskWrite | MetricKind::NetworkIn | MetricKind::NetworkOut
        )
    }
}

/// Resource kind a telemetry snapshot describes (spec §2, §4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResourceKind {
    Guest,
    Node,
    Pbs,
    Pmg,
    Storage,
    DockerHost,
    DockerContainer,
}

impl ResourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceKind::Guest => "guest",
            ResourceKind::Node => "node",
            ResourceKind::Pbs => "pbs",
            ResourceKind::Pmg => "pmg",
            ResourceKind::Storage => "storage",
            ResourceKind::DockerHost => "dockerHost",
            ResourceKind::DockerContainer => "dockerContainer",
        }
    }
}

/// A `(trigger, clear)` pair with `clear < trigger` (spec §3). `trigger <= 0`
/// means the metric is disabled.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HysteresisThreshold {
    pub trigger: f64,
    pub clear: f64,
}

impl HysteresisThreshold {
    pub fn new(trigger: f64, clear: f64) -> Self {
        Self { trigger, clear }
    }

    pub fn is_disabled(self) -> bool {
        self.trigger <= 0.0
    }

    /// Auto-repair an invalid pair loaded from config: `clear = max(0, trigger - 5)`.
    pub fn repair(&mut self) {
        if self.clear >= self.trigger {
            self.clear = (self.trigger - 5.0).max(0.0);
        }
    }

    /// The value below which an active alert resolves. Falls back to
    /// `trigger` when `clear == 0` (spec §4.2).
    pub fn effective_clear(self) -> f64 {
        if self.clear == 0.0 {
            self.trigger
        } else {
            self.clear
        }
    }
}

/// Either an explicit hysteresis pair or a legacy bare trigger value, as read
/// from a caller-supplied config source. Resolved to a `HysteresisThreshold`
/// during normalization (spec §3, §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ThresholdInput {
    Hysteresis { trigger: f64, clear: f64 },
    Legacy(f64),
}

impl ThresholdInput {
    pub fn into_hysteresis(self, margin: f64) -> HysteresisThreshold {
        let mut t = match self {
            ThresholdInput::Hysteresis { trigger, clear } => HysteresisThreshold::new(trigger, clear),
            ThresholdInput::Legacy(trigger) => {
                HysteresisThreshold::new(trigger, (trigger - margin).max(0.0))
            }
        };
        t.repair();
        t
    }
}

/// Per-metric hysteresis thresholds plus the flags that ride along with them
/// (spec §3 `ThresholdConfig`). Any field left `None` falls through to the
/// next precedence layer (spec §4.1).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ThresholdConfig {
    #[serde(default)]
    pub cpu: Option<HysteresisThreshold>,
    #[serde(default)]
    pub memory: Option<HysteresisThreshold>,
    #[serde(default)]
    pub disk: Option<HysteresisThreshold>,
    #[serde(default)]
    pub disk_read: Option<HysteresisThreshold>,
    #[serde(default)]
    pub disk_write: Option<HysteresisThreshold>,
    #[serde(default)]
    pub network_in: Option<HysteresisThreshold>,
    #[serde(default)]
    pub network_out: Option<HysteresisThreshold>,
    #[serde(default)]
    pub temperature: Option<HysteresisThreshold>,
    #[serde(default)]
    pub usage: Option<HysteresisThreshold>,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub disable_connectivity: bool,
    #[serde(default = "default_powered_off_severity")]
    pub powered_off_severity: Severity,
}

fn default_powered_off_severity() -> Severity {
    Severity::Warning
}

impl ThresholdConfig {
    pub fn get(&self, metric: MetricKind) -> Option<HysteresisThreshold> {
        match metric {
            MetricKind::Cpu => self.cpu,
            MetricKind::Memory => self.memory,
            MetricKind::Disk => self.disk,
            MetricKind::DiskRead => self.disk_read,
            MetricKind::DiskWrite => self.disk_write,
            MetricKind::NetworkIn => self.network_in,
            MetricKind::NetworkOut => self.network_out,
            MetricKind::Temperature => self.temperature,
            MetricKind::Usage => self.usage,
        }
    }

    fn set(&mut self, metric: MetricKind, value: HysteresisThreshold) {
        match metric {
            MetricKind::Cpu => self.cpu = Some(value),
            MetricKind::Memory => self.memory = Some(value),
            MetricKind::Disk => self.disk = Some(value),
            MetricKind::DiskRead => self.disk_read = Some(value),
            MetricKind::DiskWrite => self.disk_write = Some(value),
            MetricKind::NetworkIn => self.network_in = Some(value),
            MetricKind::NetworkOut => self.network_out = Some(value),
            MetricKind::Temperature => self.temperature = Some(value),
            MetricKind::Usage => self.usage = Some(value),
        }
    }

    /// Normalize `poweredOffSeverity` (spec invariant 6: anything but
    /// `critical` collapses to `warning`), and auto-repair each threshold.
    pub fn normalize(&mut self) {
        if self.powered_off_severity != Severity::Critical {
            self.powered_off_severity = Severity::Warning;
        }
        for metric in MetricKind::ALL {
            if let Some(mut t) = self.get(metric) {
                t.repair();
                self.set(metric, t);
            }
        }
    }

    /// Layer `higher` on top of `self`: every field `higher` sets replaces
    /// the corresponding field here; `disabled`/`disableConnectivity` only
    /// OR-combine, matching spec §4.1 ("disabling can only be added by
    /// higher layers, not removed").
    pub fn merged_with(&self, higher: &ThresholdConfig) -> ThresholdConfig {
        let mut out = self.clone();
        for metric in MetricKind::ALL {
            if let Some(v) = higher.get(metric) {
                out.set(metric, v);
            }
        }
        out.disabled = out.disabled || higher.disabled;
        out.disable_connectivity = out.disable_connectivity || higher.disable_connectivity;
        if higher.powered_off_severity == Severity::Critical {
            out.powered_off_severity = Severity::Critical;
        }
        out
    }
}

/// Logical combinator for a custom rule's filter stack (spec §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogicalOp {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Gt,
    Lt,
    Ge,
    Le,
    Eq,
}

impl CompareOp {
    pub fn apply(self, lhs: f64, rhs: f64) -> bool {
        match self {
            CompareOp::Gt => lhs > rhs,
            CompareOp::Lt => lhs < rhs,
            CompareOp::Ge => lhs >= rhs,
            CompareOp::Le => lhs <= rhs,
            CompareOp::Eq => (lhs - rhs).abs() < f64::EPSILON,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricField {
    Cpu,
    Memory,
    Disk,
    DiskRead,
    DiskWrite,
    NetworkIn,
    NetworkOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextField {
    Name,
    Node,
    Vmid,
}

/// A single condition in a custom rule's filter stack. `Raw` matches a
/// substring against `name|id|node|status` jointly (spec §4.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FilterCondition {
    Metric {
        field: MetricField,
        op: CompareOp,
        value: f64,
    },
    Text {
        field: TextField,
        substring: String,
    },
    Raw {
        substring: String,
    },
}

/// Data describing which live resources a custom rule applies to. Compiled
/// once into a predicate (spec §9) rather than re-interpreted per poll.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilterStack {
    #[serde(default = "default_logical_op")]
    pub operator: LogicalOp,
    #[serde(default)]
    pub conditions: Vec<FilterCondition>,
}

fn default_logical_op() -> LogicalOp {
    LogicalOp::And
}

impl Default for LogicalOp {
    fn default() -> Self {
        LogicalOp::And
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomRule {
    pub id: String,
    pub name: String,
    pub priority: i32,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub threshold: ThresholdConfig,
    #[serde(default)]
    pub filters: FilterStack,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivationState {
    PendingReview,
    Active,
    Snoozed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuietHoursCategory {
    Performance,
    Storage,
    Offline,
}

/// A weekly quiet-hours window (spec §4.10). `days_mask` bit `i` (0=Sunday)
/// set means quiet hours apply that day. `start_minute`/`end_minute` are
/// minutes since local midnight in `timezone`; `end < start` wraps past
/// midnight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuietHours {
    pub enabled: bool,
    pub start_minute: u32,
    pub end_minute: u32,
    pub timezone: String,
    pub days_mask: u8,
    pub suppress_critical_categories: HashSet<QuietHoursCategory>,
}

impl Default for QuietHours {
    fn default() -> Self {
        Self {
            enabled: false,
            start_minute: 22 * 60,
            end_minute: 7 * 60,
            timezone: "UTC".to_string(),
            days_mask: 0b0111_1111,
            suppress_critical_categories: HashSet::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupingConfig {
    pub window_secs: u64,
    pub by_node: bool,
    pub by_guest: bool,
}

impl Default for GroupingConfig {
    fn default() -> Self {
        Self {
            window_secs: 60,
            by_node: false,
            by_guest: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationLevel {
    pub after_minutes: u64,
    pub notify_target: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    pub quiet_hours: QuietHours,
    pub cooldown_minutes: u64,
    pub grouping: GroupingConfig,
    pub max_alerts_hour: u32,
    pub escalation: Vec<EscalationLevel>,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            quiet_hours: QuietHours::default(),
            cooldown_minutes: 30,
            grouping: GroupingConfig::default(),
            max_alerts_hour: 10,
            escalation: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DockerDefaults {
    pub thresholds: ThresholdConfig,
    pub restart_count: u32,
    pub restart_window_secs: u64,
    pub memory_warn_pct: f64,
    pub memory_critical_pct: f64,
}

impl Default for DockerDefaults {
    fn default() -> Self {
        Self {
            thresholds: ThresholdConfig {
                cpu: Some(HysteresisThreshold::new(90.0, 80.0)),
                memory: Some(HysteresisThreshold::new(90.0, 80.0)),
                ..Default::default()
            },
            restart_count: 3,
            restart_window_secs: 300,
            memory_warn_pct: 80.0,
            memory_critical_pct: 90.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PmgDefaults {
    pub queue_total_warning: u64,
    pub queue_total_critical: u64,
    pub oldest_message_warning_secs: f64,
    pub oldest_message_critical_secs: f64,
    pub quarantine_growth_absolute_warn: u64,
    pub quarantine_growth_absolute_crit: u64,
    pub quarantine_growth_percent_warn: f64,
    pub quarantine_growth_percent_crit: f64,
}

impl Default for PmgDefaults {
    fn default() -> Self {
        Self {
            queue_total_warning: 200,
            queue_total_critical: 1000,
            oldest_message_warning_secs: 1800.0,
            oldest_message_critical_secs: 7200.0,
            quarantine_growth_absolute_warn: 50,
            quarantine_growth_absolute_crit: 200,
            quarantine_growth_percent_warn: 50.0,
            quarantine_growth_percent_crit: 100.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotBackupDefaults {
    pub snapshot_warning_days: f64,
    pub snapshot_critical_days: f64,
    pub snapshot_warning_size_gib: Option<f64>,
    pub snapshot_critical_size_gib: Option<f64>,
    pub backup_warning_days: f64,
    pub backup_critical_days: f64,
}

impl Default for SnapshotBackupDefaults {
    fn default() -> Self {
        Self {
            snapshot_warning_days: 7.0,
            snapshot_critical_days: 14.0,
            snapshot_warning_size_gib: None,
            snapshot_critical_size_gib: None,
            backup_warning_days: 1.5,
            backup_critical_days: 3.0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceDefaults {
    pub guest: ThresholdConfig,
    pub node: ThresholdConfig,
    pub pbs: ThresholdConfig,
    pub pmg: ThresholdConfig,
}

impl ResourceDefaults {
    fn builtin() -> Self {
        let guest = ThresholdConfig {
            cpu: Some(HysteresisThreshold::new(80.0, 75.0)),
            memory: Some(HysteresisThreshold::new(85.0, 80.0)),
            disk: Some(HysteresisThreshold::new(90.0, 85.0)),
            disk_read: Some(HysteresisThreshold::new(80.0, 70.0)),
            disk_write: Some(HysteresisThreshold::new(80.0, 70.0)),
            network_in: Some(HysteresisThreshold::new(80.0, 70.0)),
            network_out: Some(HysteresisThreshold::new(80.0, 70.0)),
            ..Default::default()
        };
        let node = ThresholdConfig {
            temperature: Some(HysteresisThreshold::new(75.0, 65.0)),
            ..guest.clone()
        };
        let pbs = ThresholdConfig {
            cpu: Some(HysteresisThreshold::new(85.0, 75.0)),
            memory: Some(HysteresisThreshold::new(85.0, 80.0)),
            disk: Some(HysteresisThreshold::new(90.0, 85.0)),
            ..Default::default()
        };
        let pmg = pbs.clone();
        Self { guest, node, pbs, pmg }
    }
}

/// The singleton configuration handed to the engine via `UpdateConfig`
/// (spec §3 `AlertConfig`, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertConfig {
    pub enabled: bool,

    pub disable_nodes: bool,
    pub disable_guests: bool,
    pub disable_storage: bool,
    pub disable_pbs: bool,
    pub disable_pmg: bool,
    pub disable_docker_hosts: bool,
    pub disable_docker_containers: bool,

    pub disable_nodes_offline: bool,
    pub disable_guests_offline: bool,
    pub disable_storage_offline: bool,
    pub disable_pbs_offline: bool,
    pub disable_pmg_offline: bool,
    pub disable_docker_hosts_offline: bool,

    /// `None` means the caller never set it explicitly; resolved by
    /// `AlertConfig::resolve_activation_state` during `UpdateConfig`.
    pub activation_state: Option<ActivationState>,
    pub observation_window_hours: f64,
    pub activation_time_unix: i64,

    pub defaults: ResourceDefaults,
    pub storage_default: ThresholdConfig,
    pub docker_defaults: DockerDefaults,
    pub pmg_defaults: PmgDefaults,
    pub snapshot_backup_defaults: SnapshotBackupDefaults,

    pub overrides: HashMap<String, ThresholdConfig>,
    pub custom_rules: Vec<CustomRule>,

    pub minimum_delta_percent: f64,
    pub suppression_window_minutes: u64,
    pub hysteresis_margin: f64,

    pub time_threshold_secs: u64,
    pub time_thresholds: HashMap<ResourceKind, u64>,
    /// `metric_time_thresholds["guest"]["cpu"]`, with the sentinel keys
    /// `"default"`/`"_default"`/`"*"` and the pseudo-kind `"all"` used as
    /// fallbacks per spec §4.2.
    pub metric_time_thresholds: HashMap<String, HashMap<String, u64>>,

    pub schedule: ScheduleConfig,

    pub docker_ignored_container_prefixes: Vec<String>,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            disable_nodes: false,
            disable_guests: false,
            disable_storage: false,
            disable_pbs: false,
            disable_pmg: false,
            disable_docker_hosts: false,
            disable_docker_containers: false,
            disable_nodes_offline: false,
            disable_guests_offline: false,
            disable_storage_offline: false,
            disable_pbs_offline: false,
            disable_pmg_offline: false,
            disable_docker_hosts_offline: false,
            activation_state: None,
            observation_window_hours: 24.0,
            activation_time_unix: 0,
            defaults: ResourceDefaults::builtin(),
            storage_default: ThresholdConfig {
                usage: Some(HysteresisThreshold::new(85.0, 80.0)),
                ..Default::default()
            },
            docker_defaults: DockerDefaults::default(),
            pmg_defaults: PmgDefaults::default(),
            snapshot_backup_defaults: SnapshotBackupDefaults::default(),
            overrides: HashMap::new(),
            custom_rules: Vec::new(),
            minimum_delta_percent: 2.0,
            suppression_window_minutes: 15,
            hysteresis_margin: 5.0,
            time_threshold_secs: 0,
            time_thresholds: HashMap::new(),
            metric_time_thresholds: HashMap::new(),
            schedule: ScheduleConfig::default(),
            docker_ignored_container_prefixes: Vec::new(),
        }
    }
}

impl AlertConfig {
    /// Resolve an unset `activation_state` (spec §6): `active` if there are
    /// already active alerts or overrides configured, else `pending_review`.
    /// A previously-resolved state is left untouched.
    pub fn resolve_activation_state(&mut self, has_active_alerts: bool) {
        if self.activation_state.is_none() {
            self.activation_state = Some(if has_active_alerts || !self.overrides.is_empty() {
                ActivationState::Active
            } else {
                ActivationState::PendingReview
            });
        }
    }

    pub fn activation_state(&self) -> ActivationState {
        self.activation_state.unwrap_or(ActivationState::PendingReview)
    }

    /// Deduplicate `docker_ignored_container_prefixes` case-insensitively,
    /// keeping the first-seen casing (spec §3).
    pub fn dedup_docker_ignored_prefixes(&mut self) {
        let mut seen = HashSet::new();
        self.docker_ignored_container_prefixes.retain(|p| seen.insert(p.to_lowercase()));
    }
}
