//! The alert engine: threshold resolution, debounce/hysteresis, offline
//! detection, resource-specific sub-engines, and dispatch.

mod dispatch;
mod docker;
mod engine;
mod error;
mod evaluators;
mod message;
mod metric_eval;
mod model;
mod offline;
mod pmg;
mod rules;
mod snapshot_backup;
mod state_machine;
mod threshold;

pub use dispatch::{Callbacks, OnAlertFn, OnEscalateFn, OnResolvedFn};
pub use engine::{AlertEngine, EngineConfig};
pub use error::AlertEngineError;
pub use model::{
    metric_alert_id, typed_alert_id, AckRecord, Alert, AlertKind, EscalationState, ResolvedAlert,
    RESOLVED_RETENTION_SECS,
};
pub use rules::FilterSubject;
