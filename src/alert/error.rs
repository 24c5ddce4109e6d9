//! Typed errors returned by control operations (spec §7). `Check*` entry
//! points never return an error — they absorb data anomalies and make
//! forward progress.

use crate::storage::AlertSnapshotError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AlertEngineError {
    #[error("no alert found with id {0}")]
    NotFound(String),
    #[error("persistence error: {0}")]
    Persistence(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("active-alert snapshot error: {0}")]
    Snapshot(#[from] AlertSnapshotError),
}
