//! Callback dispatch: cloning, panic isolation, quiet-hours/rate-limit
//! gating (spec §4.10, §5, §9).

use crate::alert::{Alert, AlertKind};
use crate::config::{QuietHours, QuietHoursCategory, Severity};
use chrono::{Datelike, TimeZone, Timelike};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::error;

pub type OnAlertFn = Arc<dyn Fn(Alert) + Send + Sync>;
pub type OnResolvedFn = Arc<dyn Fn(String) + Send + Sync>;
pub type OnEscalateFn = Arc<dyn Fn(Alert, u32) + Send + Sync>;

/// The three external notification hooks (spec §1(b), §6). Consumed through
/// callbacks rather than a trait object so callers can close over channels,
/// `Arc`s, or async senders however suits their notifier.
#[derive(Clone)]
pub struct Callbacks {
    pub on_alert: OnAlertFn,
    pub on_resolved: OnResolvedFn,
    pub on_escalate: OnEscalateFn,
}

impl Callbacks {
    pub fn noop() -> Self {
        Self {
            on_alert: Arc::new(|_| {}),
            on_resolved: Arc::new(|_| {}),
            on_escalate: Arc::new(|_, _| {}),
        }
    }
}

/// An event queued for callback dispatch, produced while the primary lock
/// is held and delivered only after it is released (spec §5 suspension
/// points).
#[derive(Debug, Clone)]
pub enum DispatchEvent {
    Alert(Alert),
    Resolved(String),
    Escalate(Alert, u32),
}

/// Deliver one dispatch event, isolating a panicking callback (spec §5).
pub fn deliver(callbacks: &Callbacks, event: DispatchEvent) {
    let outcome = match event {
        DispatchEvent::Alert(alert) => {
            let id = alert.id.clone();
            let cb = callbacks.on_alert.clone();
            let result = std::panic::catch_unwind(AssertUnwindSafe(|| cb(alert)));
            result.map_err(|_| id)
        }
        DispatchEvent::Resolved(id) => {
            let cb = callbacks.on_resolved.clone();
            let tag = id.clone();
            let result = std::panic::catch_unwind(AssertUnwindSafe(|| cb(id)));
            result.map_err(|_| tag)
        }
        DispatchEvent::Escalate(alert, level) => {
            let id = alert.id.clone();
            let cb = callbacks.on_escalate.clone();
            let result = std::panic::catch_unwind(AssertUnwindSafe(|| cb(alert, level)));
            result.map_err(|_| id)
        }
    };
    if let Err(id) = outcome {
        error!(alert_id = %id, "notification callback panicked; engine state unaffected");
    }
}

/// Category used for quiet-hours gating of critical alerts (spec §4.10).
/// Interpretation decision (documented in DESIGN.md): metric alerts on
/// rate/usage/cpu/memory/disk/temperature are `performance`; storage usage,
/// ZFS, snapshot, and backup-age alerts are `storage`; every connectivity
/// alert (node/guest/pbs/pmg/docker-host offline, docker container
/// non-running state) is `offline`.
pub fn category_of(kind: &AlertKind) -> QuietHoursCategory {
    match kind {
        AlertKind::Metric { metric } => match metric.as_str() {
            "usage" => QuietHoursCategory::Storage,
            _ => QuietHoursCategory::Performance,
        },
        AlertKind::NodeOffline
        | AlertKind::GuestPoweredOff
        | AlertKind::StorageOffline
        | AlertKind::PbsOffline
        | AlertKind::PmgOffline
        | AlertKind::DockerHostOffline
        | AlertKind::DockerContainerState => QuietHoursCategory::Offline,
        AlertKind::DockerContainerHealth
        | AlertKind::DockerContainerRestartLoop
        | AlertKind::DockerContainerOom
        | AlertKind::DockerContainerMemoryLimit => QuietHoursCategory::Performance,
        AlertKind::ZfsPoolState
        | AlertKind::ZfsPoolErrors
        | AlertKind::ZfsDevice
        | AlertKind::SnapshotAge
        | AlertKind::BackupAge
        | AlertKind::DiskHealth => QuietHoursCategory::Storage,
        AlertKind::PmgAnomaly { .. } => QuietHoursCategory::Performance,
    }
}

/// Whether quiet hours currently suppress dispatch for an alert of this
/// level/category (spec §4.10). Never gates alert *creation* — callers only
/// consult this before delivering a callback.
pub fn quiet_hours_suppresses(schedule_quiet_hours: &QuietHours, now_unix: i64, level: Severity, category: QuietHoursCategory) -> bool {
    if !schedule_quiet_hours.enabled {
        return false;
    }
    let tz: chrono_tz::Tz = match schedule_quiet_hours.timezone.parse() {
        Ok(tz) => tz,
        Err(_) => return false, // invalid timezone already disables quiet hours at config-validation time
    };
    let now_local = match chrono::Utc.timestamp_opt(now_unix, 0) {
        chrono::LocalResult::Single(t) => t.with_timezone(&tz),
        _ => return false,
    };
    let weekday_bit = 1u8 << (now_local.weekday().num_days_from_sunday());
    if schedule_quiet_hours.days_mask & weekday_bit == 0 {
        return false;
    }
    let minute_of_day = now_local.hour() * 60 + now_local.minute();
    let in_window = if schedule_quiet_hours.start_minute <= schedule_quiet_hours.end_minute {
        minute_of_day >= schedule_quiet_hours.start_minute && minute_of_day < schedule_quiet_hours.end_minute
    } else {
        minute_of_day >= schedule_quiet_hours.start_minute || minute_of_day < schedule_quiet_hours.end_minute
    };
    if !in_window {
        return false;
    }
    match level {
        Severity::Warning => true,
        Severity::Critical => schedule_quiet_hours.suppress_critical_categories.contains(&category),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn qh(enabled: bool, start: u32, end: u32, suppress_offline: bool) -> QuietHours {
        let mut categories = HashSet::new();
        if suppress_offline {
            categories.insert(QuietHoursCategory::Offline);
        }
        QuietHours {
            enabled,
            start_minute: start,
            end_minute: end,
            timezone: "UTC".to_string(),
            days_mask: 0b0111_1111,
            suppress_critical_categories: categories,
        }
    }

    #[test]
    fn warning_always_suppressed_in_window() {
        let q = qh(true, 0, 24 * 60, false);
        assert!(quiet_hours_suppresses(&q, 1000, Severity::Warning, QuietHoursCategory::Performance));
    }

    #[test]
    fn critical_only_suppressed_when_category_flagged() {
        let q = qh(true, 0, 24 * 60, true);
        assert!(quiet_hours_suppresses(&q, 1000, Severity::Critical, QuietHoursCategory::Offline));
        assert!(!quiet_hours_suppresses(&q, 1000, Severity::Critical, QuietHoursCategory::Performance));
    }

    #[test]
    fn disabled_quiet_hours_never_suppress() {
        let q = qh(false, 0, 24 * 60, true);
        assert!(!quiet_hours_suppresses(&q, 1000, Severity::Critical, QuietHoursCategory::Offline));
    }
}
