//! Shared data types: telemetry snapshots and alert metadata.

mod metadata;
mod snapshot;

pub use metadata::{Metadata, MetadataValue};
pub use snapshot::*;
