//! Per-resource-kind evaluators (spec §4.4, §4.5): translate one telemetry
//! snapshot into a sequence of metric observations fed through
//! `alert::metric_eval::process_metric`, plus each kind's connectivity check.

mod guest;
mod node;
mod pbs;
mod storage;

pub use guest::{check_guest, guest_subject, guest_subject_parts};
pub use node::check_node;
pub use pbs::check_pbs;
pub use storage::{check_disk_health, check_storage};
