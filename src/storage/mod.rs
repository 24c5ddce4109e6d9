//! Active-alert persistence.
//!
//! The only state this crate persists itself (spec §6): a snapshot of
//! active alerts, written atomically to `<dataDir>/alerts/active-alerts.json`.
//! The history store, acknowledgement audit trail format, and config
//! storage are all external collaborators (spec §1) — this module does not
//! touch them.

pub mod snapshot;

pub use snapshot::{load_active_alerts, save_active_alerts, AlertSnapshotError};
