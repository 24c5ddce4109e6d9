//! Config validation / auto-repair pass, run by the engine inside
//! `UpdateConfig` before the new config is installed (spec §6, §7).
//!
//! Nothing here ever rejects a config outright — invalid fields are repaired
//! in place and logged at `warn`, matching spec §7's "configuration invalid"
//! error kind ("auto-repaired, logged at warn").

use super::model::{AlertConfig, ActivationState};
use std::str::FromStr;
use tracing::warn;

/// Apply every auto-repair rule to `cfg` in place, given whether the engine
/// currently holds any active alerts (feeds `resolve_activation_state`).
pub fn normalize(cfg: &mut AlertConfig, has_active_alerts: bool) {
    repair_thresholds(cfg);
    validate_timezone(cfg);
    cfg.resolve_activation_state(has_active_alerts);
    cfg.dedup_docker_ignored_prefixes();

    if cfg.observation_window_hours <= 0.0 {
        warn!("observationWindowHours <= 0, defaulting to 24");
        cfg.observation_window_hours = 24.0;
    }
    if cfg.hysteresis_margin <= 0.0 {
        warn!("hysteresisMargin <= 0, defaulting to 5");
        cfg.hysteresis_margin = 5.0;
    }
}

fn repair_thresholds(cfg: &mut AlertConfig) {
    for t in [
        &mut cfg.defaults.guest,
        &mut cfg.defaults.node,
        &mut cfg.defaults.pbs,
        &mut cfg.defaults.pmg,
        &mut cfg.storage_default,
        &mut cfg.docker_defaults.thresholds,
    ] {
        t.normalize();
    }
    for t in cfg.overrides.values_mut() {
        t.normalize();
    }
    for rule in cfg.custom_rules.iter_mut() {
        rule.threshold.normalize();
    }
}

/// Invalid IANA timezone names disable quiet hours entirely (spec §4.10,
/// §6) rather than erroring out of `UpdateConfig`.
fn validate_timezone(cfg: &mut AlertConfig) {
    if !cfg.schedule.quiet_hours.enabled {
        return;
    }
    if chrono_tz::Tz::from_str(&cfg.schedule.quiet_hours.timezone).is_err() {
        warn!(
            timezone = %cfg.schedule.quiet_hours.timezone,
            "invalid quiet-hours timezone, disabling quiet hours"
        );
        cfg.schedule.quiet_hours.enabled = false;
    }
}

/// `true` while dispatch should be suppressed even though alerts still form
/// (spec §3: `pending_review` gates dispatch, not creation).
pub fn dispatch_suppressed_by_activation(cfg: &AlertConfig) -> bool {
    matches!(cfg.activation_state(), ActivationState::PendingReview | ActivationState::Snoozed)
}
