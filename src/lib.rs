//! pve-alert-engine: fleet alerting for a Proxmox VE/PBS/PMG/Docker estate
//!
//! Stateful engine that turns periodic snapshots of nodes, guests, storage,
//! PBS/PMG instances, and Docker hosts/containers into hysteresis-debounced
//! alerts, dispatched through caller-supplied callbacks and persisted to
//! disk between runs.
//!
//! ## Architecture
//!
//! - **alert**: the engine itself — state machine, threshold resolution,
//!   sub-engines for Docker and PMG, snapshot/backup age checks, dispatch
//!   gating, and the `AlertEngine` façade.
//! - **config**: the `AlertConfig` model and its normalization/repair rules.
//! - **storage**: atomic persistence of the active-alert snapshot.
//! - **background**: the escalation/cleanup and persistence tickers.
//! - **types**: the snapshot types `Check*` operations are fed.

pub mod alert;
pub mod background;
pub mod config;
pub mod storage;
pub mod types;

pub use alert::{
    metric_alert_id, typed_alert_id, AckRecord, Alert, AlertEngine, AlertEngineError, AlertKind,
    Callbacks, EngineConfig, EscalationState, FilterSubject, OnAlertFn, OnEscalateFn, OnResolvedFn,
    ResolvedAlert, RESOLVED_RETENTION_SECS,
};
pub use background::Scheduler;
pub use config::{
    ActivationState, AlertConfig, CompareOp, CustomRule, DockerDefaults, EscalationLevel,
    FilterCondition, FilterStack, GroupingConfig, HysteresisThreshold, LogicalOp, MetricField,
    MetricKind, PmgDefaults, QuietHours, QuietHoursCategory, ResourceDefaults, ResourceKind,
    ScheduleConfig, Severity, SnapshotBackupDefaults, TextField, ThresholdConfig, ThresholdInput,
};
pub use storage::AlertSnapshotError;
