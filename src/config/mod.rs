//! Alert configuration types and validation.
//!
//! Unlike `sairen-os`'s `WellConfig` (file-loaded once at startup via a
//! global `OnceLock`), `AlertConfig` is not read from disk by this crate at
//! all — config persistence is an explicit external collaborator (spec
//! §1(d)). Callers build an `AlertConfig` however they like and hand it to
//! `AlertEngine::update_config`, which runs it through `validation::normalize`
//! and stores it under the engine's primary lock alongside the active-alert
//! map.

mod model;
mod validation;

pub use model::*;
pub use validation::{dispatch_suppressed_by_activation, normalize};
