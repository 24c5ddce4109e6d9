//! Per-`(resourceId, metric)` debounce/hysteresis state machine (spec §4.2).
//!
//! The `Active` state itself is *not* modelled here — the engine's
//! `active_alerts` map is the single source of truth for "does this id have
//! an active alert". `DebounceState` only tracks the pre-active lifecycle
//! (`clear` / `pending` / `suppressed`); the engine resets it to `Clear`
//! the moment it creates or resolves an alert.

use crate::config::HysteresisThreshold;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub enum DebounceState {
    #[default]
    Clear,
    Pending { since_unix: i64 },
    Suppressed { until_unix: i64 },
}

pub struct EvalParams {
    pub now_unix: i64,
    pub value: f64,
    pub threshold: HysteresisThreshold,
    pub delay_secs: u64,
    pub suppression_window_secs: i64,
    pub minimum_delta_percent: f64,
    /// `lastValue`/age of the matching `recentlyResolved` entry, if any is
    /// still within the suppression window.
    pub recent_resolved: Option<(f64, i64)>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// No change in active-alert status; `debounce` may have advanced.
    NoChange,
    /// Pending breach crossed the debounce delay uncontested.
    CreateAlert { start_time_unix: i64 },
    /// Pending breach crossed the debounce delay but a recent resolution
    /// with an insufficient value delta suppressed it (spec §4.2).
    EnterSuppression,
}

/// Advance `debounce` given one new observation against an active alert's
/// existing state. Caller is responsible for resolving (`value <=
/// threshold.effective_clear()`) and for redispatch/cooldown decisions on an
/// already-active alert — this function only governs the pre-active
/// lifecycle.
pub fn evaluate(debounce: &mut DebounceState, has_active: bool, p: &EvalParams) -> Outcome {
    if has_active {
        return Outcome::NoChange;
    }

    if let DebounceState::Suppressed { until_unix } = *debounce {
        if p.now_unix >= until_unix {
            *debounce = DebounceState::Clear;
        } else {
            return Outcome::NoChange;
        }
    }

    // A breach seen for the first time while Clear enters Pending and is
    // immediately re-checked against the debounce delay below, so a
    // zero-second delay creates the alert on this same call.
    let since_unix = match *debounce {
        DebounceState::Clear => {
            if p.value < p.threshold.trigger {
                return Outcome::NoChange;
            }
            p.now_unix
        }
        DebounceState::Pending { since_unix } => {
            if p.value < p.threshold.trigger {
                *debounce = DebounceState::Clear;
                return Outcome::NoChange;
            }
            since_unix
        }
        DebounceState::Suppressed { .. } => return Outcome::NoChange,
    };
    *debounce = DebounceState::Pending { since_unix };

    if p.now_unix - since_unix < p.delay_secs as i64 {
        return Outcome::NoChange;
    }

    let suppress = match p.recent_resolved {
        Some((last_value, resolved_at)) => {
            let within_window = p.now_unix - resolved_at < p.suppression_window_secs;
            let delta = (p.value - last_value).abs();
            within_window && delta < p.minimum_delta_percent
        }
        None => false,
    };
    if suppress {
        *debounce = DebounceState::Suppressed {
            until_unix: p.now_unix + p.suppression_window_secs,
        };
        Outcome::EnterSuppression
    } else {
        *debounce = DebounceState::Clear;
        Outcome::CreateAlert { start_time_unix: since_unix }
    }
}

/// Severity recompute rule for an active alert (spec §4.2): critical once
/// `value >= trigger + 10`, else warning.
pub fn recompute_level(value: f64, trigger: f64) -> crate::config::Severity {
    if value >= trigger + 10.0 {
        crate::config::Severity::Critical
    } else {
        crate::config::Severity::Warning
    }
}

/// Whether an already-active alert should re-dispatch `onAlert` (spec
/// §4.2): cooldown elapsed since `last_notified`, or the level just
/// escalated to critical.
pub fn should_redispatch(
    last_notified_unix: Option<i64>,
    now_unix: i64,
    cooldown_secs: i64,
    escalated_to_critical: bool,
) -> bool {
    escalated_to_critical
        || match last_notified_unix {
            None => true,
            Some(t) => now_unix - t >= cooldown_secs,
        }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(now: i64, value: f64) -> EvalParams {
        EvalParams {
            now_unix: now,
            value,
            threshold: HysteresisThreshold::new(80.0, 75.0),
            delay_secs: 0,
            suppression_window_secs: 900,
            minimum_delta_percent: 2.0,
            recent_resolved: None,
        }
    }

    #[test]
    fn scenario_cpu_trigger_and_clear() {
        // spec §8 scenario 1, with zero debounce delay.
        let mut state = DebounceState::Clear;
        let outcome = evaluate(&mut state, false, &params(0, 90.0));
        assert_eq!(outcome, Outcome::CreateAlert { start_time_unix: 0 });
    }

    #[test]
    fn debounce_scenario() {
        // spec §8 scenario 2.
        let mut state = DebounceState::Clear;
        let mut p = EvalParams {
            delay_secs: 30,
            ..params(0, 95.0)
        };
        assert_eq!(evaluate(&mut state, false, &p), Outcome::NoChange);
        assert!(matches!(state, DebounceState::Pending { since_unix: 0 }));

        p.now_unix = 15;
        p.value = 95.0;
        assert_eq!(evaluate(&mut state, false, &p), Outcome::NoChange);

        p.now_unix = 20;
        p.value = 60.0;
        assert_eq!(evaluate(&mut state, false, &p), Outcome::NoChange);
        assert!(matches!(state, DebounceState::Clear));

        p.now_unix = 40;
        p.value = 95.0;
        assert_eq!(evaluate(&mut state, false, &p), Outcome::NoChange);
        assert!(matches!(state, DebounceState::Pending { since_unix: 40 }));

        p.now_unix = 71;
        p.value = 95.0;
        assert_eq!(evaluate(&mut state, false, &p), Outcome::CreateAlert { start_time_unix: 40 });
    }

    #[test]
    fn suppression_window_blocks_low_delta_reemission() {
        let mut state = DebounceState::Pending { since_unix: 0 };
        let mut p = params(10, 81.0);
        p.recent_resolved = Some((80.0, 5));
        assert_eq!(evaluate(&mut state, false, &p), Outcome::EnterSuppression);
        assert!(matches!(state, DebounceState::Suppressed { .. }));
    }

    #[test]
    fn redispatch_on_cooldown_or_escalation() {
        assert!(should_redispatch(Some(0), 1800, 1800, false));
        assert!(!should_redispatch(Some(0), 100, 1800, false));
        assert!(should_redispatch(Some(0), 1, 1800, true));
        assert!(should_redispatch(None, 0, 1800, false));
    }
}
