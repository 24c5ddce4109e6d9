//! Background services — scheduled engine maintenance
//!
//! Runs the alert engine's escalation/cleanup scan and persistence flush on
//! independent 1-minute `tokio::time::interval` loops.

pub mod scheduler;

pub use scheduler::Scheduler;
