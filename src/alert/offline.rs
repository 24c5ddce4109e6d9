//! Offline/connectivity detector (spec §4.3): consecutive-miss confirmation
//! and clearing, independent of the per-metric debounce state machine.

use crate::config::{ResourceKind, Severity};

/// Consecutive misses required before an offline alert fires.
pub fn required_confirmations(kind: ResourceKind) -> u32 {
    match kind {
        ResourceKind::Guest | ResourceKind::Storage => 2,
        ResourceKind::Node | ResourceKind::Pbs | ResourceKind::Pmg | ResourceKind::DockerHost => 3,
        ResourceKind::DockerContainer => 2,
    }
}

/// Offline alerts are always critical except for storage (warning) and
/// guest powered-off (configured severity).
pub fn offline_severity(kind: ResourceKind, powered_off_severity: Severity) -> Severity {
    match kind {
        ResourceKind::Storage => Severity::Warning,
        ResourceKind::Guest => powered_off_severity,
        _ => Severity::Critical,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfflineOutcome {
    /// Still below the confirmation threshold — keep counting, no alert.
    Counting,
    /// Just crossed the confirmation threshold — caller should create/keep
    /// the offline alert.
    Confirmed,
    /// Already confirmed on a prior call — caller just refreshes `lastSeen`.
    StillOffline,
    /// Resource came back online — caller should resolve any offline alert
    /// and the counter is reset to zero.
    BackOnline,
}

/// Advance the consecutive-miss counter for one resource given whether this
/// poll reports it reachable.
pub fn advance(counter: &mut u32, kind: ResourceKind, online: bool) -> OfflineOutcome {
    if online {
        let was_confirmed = *counter >= required_confirmations(kind);
        *counter = 0;
        return if was_confirmed {
            OfflineOutcome::BackOnline
        } else {
            OfflineOutcome::Counting
        };
    }

    let required = required_confirmations(kind);
    if *counter >= required {
        // Already past the threshold; keep counting for observability but
        // the alert is already active.
        *counter = counter.saturating_add(1);
        return OfflineOutcome::StillOffline;
    }
    *counter += 1;
    if *counter >= required {
        OfflineOutcome::Confirmed
    } else {
        OfflineOutcome::Counting
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_requires_three_consecutive_misses() {
        let mut counter = 0;
        assert_eq!(advance(&mut counter, ResourceKind::Node, false), OfflineOutcome::Counting);
        assert_eq!(advance(&mut counter, ResourceKind::Node, false), OfflineOutcome::Counting);
        assert_eq!(advance(&mut counter, ResourceKind::Node, false), OfflineOutcome::Confirmed);
    }

    #[test]
    fn guest_requires_two_consecutive_misses() {
        let mut counter = 0;
        assert_eq!(advance(&mut counter, ResourceKind::Guest, false), OfflineOutcome::Counting);
        assert_eq!(advance(&mut counter, ResourceKind::Guest, false), OfflineOutcome::Confirmed);
    }

    #[test]
    fn coming_back_online_resets_counter() {
        let mut counter = 0;
        advance(&mut counter, ResourceKind::Node, false);
        advance(&mut counter, ResourceKind::Node, false);
        advance(&mut counter, ResourceKind::Node, false);
        assert_eq!(advance(&mut counter, ResourceKind::Node, true), OfflineOutcome::BackOnline);
        assert_eq!(counter, 0);
    }

    #[test]
    fn coming_back_online_before_confirmation_is_silent() {
        let mut counter = 0;
        advance(&mut counter, ResourceKind::Node, false);
        assert_eq!(advance(&mut counter, ResourceKind::Node, true), OfflineOutcome::Counting);
        assert_eq!(counter, 0);
    }
}
