//! The alert engine (spec §5, §6, §7): two-lock concurrency discipline,
//! `Check*` ingress, control operations, and startup/shutdown.

use crate::alert::dispatch::{deliver, Callbacks, DispatchEvent};
use crate::alert::docker::{self, DockerTracking};
use crate::alert::evaluators;
use crate::alert::metric_eval::MetricTrackers;
use crate::alert::model::{AckRecord, Alert, ResolvedAlert, RESOLVED_RETENTION_SECS};
use crate::alert::pmg::{self, PmgTracking};
use crate::alert::rules::CompiledCustomRule;
use crate::alert::snapshot_backup;
use crate::alert::state_machine::DebounceState;
use crate::alert::threshold;
use crate::alert::AlertEngineError;
use crate::config::{self, AlertConfig};
use crate::storage;
use crate::types::{
    BackupInfo, DiskHealthSnapshot, DockerContainerSnapshot, DockerHostSnapshot, GuestSnapshot, NodeSnapshot,
    PbsSnapshot, PmgSnapshot, SnapshotInfo, StorageSnapshot,
};
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::RwLock;
use tokio::sync::watch;
use tracing::{info, warn};

/// History retained for `GetAlertHistory`/`ClearAlertHistory` (spec §7).
/// Capped by count rather than a spec-specified size — an explicit
/// engine-level decision recorded in DESIGN.md.
const MAX_HISTORY_ENTRIES: usize = 5000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryEvent {
    Fired,
    Resolved,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct HistoryEntry {
    pub alert_id: String,
    pub event: HistoryEvent,
    pub at_unix: i64,
}

/// Everything guarded by the `primary` lock (spec §5): config, the active
/// alert map, and every per-resource tracking structure needed to evaluate
/// the next poll. Never reachable while `resolved` is held.
#[derive(Default)]
pub struct EngineState {
    pub config: AlertConfig,
    pub active_alerts: HashMap<String, Alert>,
    pub debounce: HashMap<String, DebounceState>,
    pub offline_counters: HashMap<String, u32>,
    pub rate_limit: HashMap<String, VecDeque<i64>>,
    pub ack_audit: HashMap<String, AckRecord>,
    pub docker: DockerTracking,
    pub pmg: PmgTracking,
    pub history: VecDeque<HistoryEntry>,
    /// Custom-rule filter stacks compiled once per config install (spec §9),
    /// rebuilt by `update_config` whenever `config.custom_rules` changes.
    pub compiled_rules: Vec<CompiledCustomRule>,
}

impl EngineState {
    fn record_history(&mut self, alert_id: &str, event: HistoryEvent, at_unix: i64) {
        self.history.push_back(HistoryEntry { alert_id: alert_id.to_string(), event, at_unix });
        while self.history.len() > MAX_HISTORY_ENTRIES {
            self.history.pop_front();
        }
    }
}

pub struct EngineConfig {
    pub data_dir: PathBuf,
    pub callbacks: Callbacks,
}

/// The alert engine. Holds two independent `std::sync::RwLock`s (spec §5):
/// `primary` for config/active-alerts/tracking, `resolved` for the 5-minute
/// recently-resolved window consulted for re-trigger suppression. No engine
/// code acquires `resolved` while holding `primary` — callers snapshot
/// `resolved` first, release it, then take `primary`.
pub struct AlertEngine {
    primary: RwLock<EngineState>,
    resolved: RwLock<HashMap<String, ResolvedAlert>>,
    data_dir: PathBuf,
    callbacks: Callbacks,
    shutdown_tx: watch::Sender<bool>,
}

impl AlertEngine {
    /// Construct the engine, loading any persisted active-alert snapshot
    /// from disk (spec §6). Freshly-loaded alerts are held back from
    /// redispatch for a 10-second settle delay so a cold-started engine
    /// doesn't immediately re-fire every alert it finds on disk; callers
    /// should invoke `redispatch_after_startup` once that delay has
    /// elapsed (the background scheduler does this automatically).
    pub fn new(cfg: EngineConfig, now_unix: i64) -> Self {
        let loaded = storage::load_active_alerts(&cfg.data_dir, now_unix).unwrap_or_else(|e| {
            warn!(error = %e, "failed to load active-alert snapshot, starting empty");
            HashMap::new()
        });
        info!(count = loaded.len(), "alert engine starting");
        let state = EngineState {
            active_alerts: loaded,
            ..Default::default()
        };
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            primary: RwLock::new(state),
            resolved: RwLock::new(HashMap::new()),
            data_dir: cfg.data_dir,
            callbacks: cfg.callbacks,
            shutdown_tx,
        }
    }

    /// Subscribe to the shutdown signal (spec §5), consulted by the
    /// background scheduler's tickers so they stop promptly instead of
    /// running until their handles are aborted.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// `Stop()` (spec §5): close the shutdown channel so background tickers
    /// exit their loops, flush active alerts to disk, and stop the history
    /// collaborator. The in-process history ring (see `get_alert_history`)
    /// needs no separate stop call — there's nothing else to tear down.
    pub fn stop(&self) -> Result<(), AlertEngineError> {
        let _ = self.shutdown_tx.send(true);
        self.persist()?;
        Ok(())
    }

    fn resolved_snapshot(&self) -> HashMap<String, ResolvedAlert> {
        self.resolved.read().expect("resolved lock poisoned").clone()
    }

    fn prune_resolved(&self, now_unix: i64) {
        let mut guard = self.resolved.write().expect("resolved lock poisoned");
        guard.retain(|_, r| now_unix - r.resolved_time_unix < RESOLVED_RETENTION_SECS);
    }

    /// Run `body` against the primary state, then — strictly after dropping
    /// the primary guard — insert any newly-resolved entries into `resolved`
    /// and deliver queued callbacks (spec §5 suspension points).
    fn transact<R>(
        &self,
        now_unix: i64,
        body: impl FnOnce(&mut EngineState, &HashMap<String, ResolvedAlert>, i64) -> (R, Vec<DispatchEvent>, Vec<(String, ResolvedAlert)>),
    ) -> R {
        let resolved_snapshot = self.resolved_snapshot();
        let (result, dispatches, new_resolved) = {
            let mut guard = self.primary.write().expect("primary lock poisoned");
            let (r, d, nr) = body(&mut guard, &resolved_snapshot, now_unix);
            for d in &d {
                record_dispatch_history(&mut guard, d, now_unix);
            }
            (r, d, nr)
        };
        if !new_resolved.is_empty() {
            let mut guard = self.resolved.write().expect("resolved lock poisoned");
            for (id, ra) in new_resolved {
                guard.insert(id, ra);
            }
        }
        for event in dispatches {
            deliver(&self.callbacks, event);
        }
        result
    }

    // ---- Check* ingress (spec §4.4-§4.8) ----

    pub fn check_guest(&self, now_unix: i64, guest: &GuestSnapshot) {
        let guest = guest.clone();
        self.transact(now_unix, move |state, resolved, now| {
            let mut dispatches = Vec::new();
            let mut new_resolved = Vec::new();
            let config = state.config.clone();
            let mut trackers = MetricTrackers {
                active_alerts: &mut state.active_alerts,
                debounce: &mut state.debounce,
                rate_limit: &mut state.rate_limit,
                compiled_rules: &state.compiled_rules,
            };
            evaluators::check_guest(&config, &mut state.offline_counters, &mut trackers, resolved, now, &guest, &mut dispatches, &mut new_resolved);
            ((), dispatches, new_resolved)
        });
    }

    pub fn check_node(&self, now_unix: i64, node: &NodeSnapshot) {
        let node = node.clone();
        self.transact(now_unix, move |state, resolved, now| {
            let mut dispatches = Vec::new();
            let mut new_resolved = Vec::new();
            let config = state.config.clone();
            let mut trackers = MetricTrackers {
                active_alerts: &mut state.active_alerts,
                debounce: &mut state.debounce,
                rate_limit: &mut state.rate_limit,
                compiled_rules: &state.compiled_rules,
            };
            evaluators::check_node(&config, &mut state.offline_counters, &mut trackers, resolved, now, &node, &mut dispatches, &mut new_resolved);
            ((), dispatches, new_resolved)
        });
    }

    pub fn check_pbs(&self, now_unix: i64, pbs: &PbsSnapshot) {
        let pbs = pbs.clone();
        self.transact(now_unix, move |state, resolved, now| {
            let mut dispatches = Vec::new();
            let mut new_resolved = Vec::new();
            let config = state.config.clone();
            let mut trackers = MetricTrackers {
                active_alerts: &mut state.active_alerts,
                debounce: &mut state.debounce,
                rate_limit: &mut state.rate_limit,
                compiled_rules: &state.compiled_rules,
            };
            evaluators::check_pbs(&config, &mut state.offline_counters, &mut trackers, resolved, now, &pbs, &mut dispatches, &mut new_resolved);
            ((), dispatches, new_resolved)
        });
    }

    pub fn check_storage(&self, now_unix: i64, storage: &StorageSnapshot) {
        let storage = storage.clone();
        self.transact(now_unix, move |state, resolved, now| {
            let mut dispatches = Vec::new();
            let mut new_resolved = Vec::new();
            let config = state.config.clone();
            let mut trackers = MetricTrackers {
                active_alerts: &mut state.active_alerts,
                debounce: &mut state.debounce,
                rate_limit: &mut state.rate_limit,
                compiled_rules: &state.compiled_rules,
            };
            evaluators::check_storage(&config, &mut state.offline_counters, &mut trackers, resolved, now, &storage, &mut dispatches, &mut new_resolved);
            ((), dispatches, new_resolved)
        });
    }

    pub fn check_docker_host(&self, now_unix: i64, host: &DockerHostSnapshot, online: bool) {
        let host = host.clone();
        self.transact(now_unix, move |state, _resolved, now| {
            let mut dispatches = Vec::new();
            let config = state.config.clone();
            docker::check_docker_host(
                &config,
                &mut state.docker,
                &mut state.active_alerts,
                &state.compiled_rules,
                now,
                &host,
                online,
                &mut dispatches,
            );
            ((), dispatches, Vec::new())
        });
    }

    pub fn check_docker_container(&self, now_unix: i64, container: &DockerContainerSnapshot) {
        let container = container.clone();
        self.transact(now_unix, move |state, resolved, now| {
            let mut dispatches = Vec::new();
            let mut new_resolved = Vec::new();
            let config = state.config.clone();
            let mut trackers = MetricTrackers {
                active_alerts: &mut state.active_alerts,
                debounce: &mut state.debounce,
                rate_limit: &mut state.rate_limit,
                compiled_rules: &state.compiled_rules,
            };
            docker::check_container(&config, &mut state.docker, &mut trackers, resolved, now, &container, &mut dispatches, &mut new_resolved);
            ((), dispatches, new_resolved)
        });
    }

    pub fn handle_docker_host_removed(&self, now_unix: i64, host_id: &str) {
        let host_id = host_id.to_string();
        self.transact(now_unix, move |state, _resolved, _now| {
            let mut dispatches = Vec::new();
            docker::handle_docker_host_removed(&mut state.docker, &mut state.active_alerts, &host_id, &mut dispatches);
            ((), dispatches, Vec::new())
        });
    }

    pub fn check_pmg(&self, now_unix: i64, snapshot: &PmgSnapshot) {
        let snapshot = snapshot.clone();
        self.transact(now_unix, move |state, _resolved, now| {
            let mut dispatches = Vec::new();
            let config = state.config.clone();
            pmg::check_pmg(&config, &state.compiled_rules, &mut state.pmg, &mut state.active_alerts, now, &snapshot, &mut dispatches);
            ((), dispatches, Vec::new())
        });
    }

    /// `CheckDiskHealth` (spec §6): a single disk's SMART-style health
    /// report, upserted or cleared the same way a metric breach would be.
    pub fn check_disk_health(&self, now_unix: i64, instance: &str, node: &str, disk: &DiskHealthSnapshot) {
        let instance = instance.to_string();
        let node = node.to_string();
        let disk = disk.clone();
        self.transact(now_unix, move |state, _resolved, now| {
            let mut dispatches = Vec::new();
            evaluators::check_disk_health(&mut state.active_alerts, now, &instance, &node, &disk, &mut dispatches);
            ((), dispatches, Vec::new())
        });
    }

    pub fn check_snapshots_for_instance(&self, now_unix: i64, instance: &str, snapshots: &[SnapshotInfo], guest_names: &HashMap<String, String>) {
        let instance = instance.to_string();
        let snapshots = snapshots.to_vec();
        let guest_names = guest_names.clone();
        self.transact(now_unix, move |state, _resolved, now| {
            let mut dispatches = Vec::new();
            let config = state.config.clone();
            snapshot_backup::check_snapshots(&config, &mut state.active_alerts, now, &instance, &snapshots, &guest_names, &mut dispatches);
            ((), dispatches, Vec::new())
        });
    }

    #[allow(clippy::too_many_arguments)]
    pub fn check_backups(
        &self,
        now_unix: i64,
        storage_backups: &[BackupInfo],
        pbs_backups: &[BackupInfo],
        pmg_backups: &[BackupInfo],
        guests_by_key: &HashMap<String, String>,
        guests_by_vmid: &HashMap<String, String>,
    ) {
        let storage_backups = storage_backups.to_vec();
        let pbs_backups = pbs_backups.to_vec();
        let pmg_backups = pmg_backups.to_vec();
        let guests_by_key = guests_by_key.clone();
        let guests_by_vmid = guests_by_vmid.clone();
        self.transact(now_unix, move |state, _resolved, now| {
            let mut dispatches = Vec::new();
            let config = state.config.clone();
            snapshot_backup::check_backups(
                &config,
                &mut state.active_alerts,
                now,
                &storage_backups,
                &pbs_backups,
                &pmg_backups,
                &guests_by_key,
                &guests_by_vmid,
                &mut dispatches,
            );
            ((), dispatches, Vec::new())
        });
    }

    /// Clear every active alert whose `node` is not in `live_nodes` (spec
    /// §7, decommissioning sweep).
    pub fn cleanup_alerts_for_nodes(&self, now_unix: i64, live_nodes: &[String]) {
        let live: std::collections::HashSet<String> = live_nodes.iter().cloned().collect();
        self.transact(now_unix, move |state, _resolved, _now| {
            let mut dispatches = Vec::new();
            let stale: Vec<String> = state
                .active_alerts
                .iter()
                .filter(|(_, a)| !live.contains(&a.node))
                .map(|(id, _)| id.clone())
                .collect();
            for id in stale {
                state.active_alerts.remove(&id);
                state.debounce.remove(&id);
                dispatches.push(DispatchEvent::Resolved(id));
            }
            ((), dispatches, Vec::new())
        });
    }

    pub fn clear_active_alerts(&self, now_unix: i64) {
        self.transact(now_unix, move |state, _resolved, _now| {
            let dispatches = state.active_alerts.keys().cloned().map(DispatchEvent::Resolved).collect();
            state.active_alerts.clear();
            state.debounce.clear();
            ((), dispatches, Vec::new())
        });
    }

    /// `ReevaluateGuestAlert` (spec §4.9, §6): re-resolve one guest metric
    /// alert's threshold against the live resource, deferred here from
    /// `update_config` because custom-rule filters may depend on fields
    /// (cpu/memory/disk/status/...) that control op doesn't have on hand.
    /// Resolves the alert if the metric's threshold is now disabled,
    /// missing, or the alert's last value no longer crosses the clear point.
    pub fn reevaluate_guest_alert(&self, now_unix: i64, guest: &GuestSnapshot, alert_id: &str) {
        let guest = guest.clone();
        let alert_id = alert_id.to_string();
        self.transact(now_unix, move |state, _resolved, _now| {
            let mut dispatches = Vec::new();
            let Some(alert) = state.active_alerts.get(&alert_id) else {
                return ((), dispatches, Vec::new());
            };
            let crate::alert::AlertKind::Metric { metric } = alert.kind.clone() else {
                return ((), dispatches, Vec::new());
            };
            let Some(metric_kind) = crate::config::MetricKind::from_str_name(&metric) else {
                return ((), dispatches, Vec::new());
            };
            let parts = evaluators::guest_subject_parts(&guest);
            let subject = evaluators::guest_subject(&guest, &parts);
            let threshold = threshold::resolve_metric_threshold(
                &state.config,
                &state.compiled_rules,
                crate::config::ResourceKind::Guest,
                &guest.id,
                metric_kind,
                &subject,
            );
            let should_resolve = match threshold {
                None => true,
                Some(t) => alert.value <= t.effective_clear(),
            };
            if should_resolve {
                if state.active_alerts.remove(&alert_id).is_some() {
                    state.debounce.remove(&alert_id);
                    dispatches.push(DispatchEvent::Resolved(alert_id));
                }
            }
            ((), dispatches, Vec::new())
        });
    }

    // ---- Control operations (spec §7) ----

    pub fn update_config(&self, now_unix: i64, mut new_config: AlertConfig) {
        self.transact(now_unix, move |state, _resolved, now| {
            let has_active = !state.active_alerts.is_empty();
            config::normalize(&mut new_config, has_active);
            if new_config.activation_time_unix == 0 {
                new_config.activation_time_unix = now;
            }
            state.config = new_config;
            state.compiled_rules = crate::alert::rules::compile_custom_rules(&state.config.custom_rules);
            let mut dispatches = Vec::new();
            // Re-evaluate every active alert against the new config (spec §4.9):
            // resolve it if its threshold is newly disabled, missing, or the
            // alert's current value no longer crosses the (possibly raised)
            // clear point.
            let ids: Vec<String> = state.active_alerts.keys().cloned().collect();
            for id in ids {
                let Some(alert) = state.active_alerts.get(&id) else { continue };
                if let crate::alert::AlertKind::Metric { metric } = alert.kind.clone() {
                    let metric_kind = crate::config::MetricKind::from_str_name(&metric);
                    // Guest/node/pbs/storage custom-rule-dependent resolution
                    // needs the live filter subject, which this control op
                    // doesn't have — deferred to the next `Check*`/
                    // `ReevaluateGuestAlert` call (spec §4.9), so here we
                    // only catch the cheap case: a resource kind disabled
                    // outright or a kind default now missing with no
                    // subject-dependent override in play.
                    if let Some(metric_kind) = metric_kind {
                        let resource_kind = infer_kind(&alert.resource_id, &alert.node);
                        let subject = crate::alert::FilterSubject::default();
                        let threshold = threshold::resolve_metric_threshold(
                            &state.config,
                            &state.compiled_rules,
                            resource_kind,
                            &alert.resource_id,
                            metric_kind,
                            &subject,
                        );
                        let should_resolve = match threshold {
                            None => true,
                            Some(t) => alert.value <= t.effective_clear(),
                        };
                        if should_resolve {
                            if let Some(removed) = state.active_alerts.remove(&id) {
                                state.debounce.remove(&id);
                                dispatches.push(DispatchEvent::Resolved(id));
                                let _ = removed;
                            }
                        }
                    }
                }
            }
            ((), dispatches, Vec::new())
        });
    }

    pub fn get_config(&self) -> AlertConfig {
        self.primary.read().expect("primary lock poisoned").config.clone()
    }

    pub fn get_active_alerts(&self) -> Vec<Alert> {
        self.primary.read().expect("primary lock poisoned").active_alerts.values().cloned().collect()
    }

    pub fn get_recently_resolved(&self) -> Vec<ResolvedAlert> {
        self.resolved.read().expect("resolved lock poisoned").values().cloned().collect()
    }

    /// `GetAlertHistory(limit)` (spec §6): the most recent `limit` entries
    /// from the in-process history ring (bounded at `MAX_HISTORY_ENTRIES`,
    /// not the indefinitely-retained external history store spec §1(c)
    /// assigns to a separate collaborator — see DESIGN.md).
    pub fn get_alert_history(&self, limit: usize) -> Vec<HistoryEntry> {
        let guard = self.primary.read().expect("primary lock poisoned");
        guard.history.iter().rev().take(limit).rev().cloned().collect()
    }

    /// `GetAlertHistorySince(since, limit)` (spec §6): entries at or after
    /// `since_unix`, most recent `limit` of them.
    pub fn get_alert_history_since(&self, since_unix: i64, limit: usize) -> Vec<HistoryEntry> {
        let guard = self.primary.read().expect("primary lock poisoned");
        let matching: Vec<&HistoryEntry> = guard.history.iter().filter(|h| h.at_unix >= since_unix).collect();
        matching.into_iter().rev().take(limit).rev().cloned().collect()
    }

    pub fn clear_alert_history(&self) {
        self.primary.write().expect("primary lock poisoned").history.clear();
    }

    pub fn acknowledge_alert(&self, user: &str, ack_time_unix: i64, alert_id: &str) -> Result<(), AlertEngineError> {
        let mut guard = self.primary.write().expect("primary lock poisoned");
        let ack = AckRecord { user: user.to_string(), ack_time_unix };
        let alert = guard.active_alerts.get_mut(alert_id).ok_or_else(|| AlertEngineError::NotFound(alert_id.to_string()))?;
        alert.apply_ack(&ack);
        guard.ack_audit.insert(alert_id.to_string(), ack);
        Ok(())
    }

    pub fn unacknowledge_alert(&self, alert_id: &str) -> Result<(), AlertEngineError> {
        let mut guard = self.primary.write().expect("primary lock poisoned");
        let alert = guard.active_alerts.get_mut(alert_id).ok_or_else(|| AlertEngineError::NotFound(alert_id.to_string()))?;
        alert.clear_ack();
        guard.ack_audit.remove(alert_id);
        Ok(())
    }

    pub fn clear_alert(&self, now_unix: i64, alert_id: &str) -> Result<(), AlertEngineError> {
        let id = alert_id.to_string();
        let result = self.transact(now_unix, move |state, _resolved, _now| {
            let removed = state.active_alerts.remove(&id);
            state.debounce.remove(&id);
            let dispatches = if removed.is_some() { vec![DispatchEvent::Resolved(id)] } else { Vec::new() };
            (removed.is_some(), dispatches, Vec::new())
        });
        if result {
            Ok(())
        } else {
            Err(AlertEngineError::NotFound(alert_id.to_string()))
        }
    }

    /// Re-deliver `onAlert` for an already-active alert without waiting for
    /// the next poll or cooldown window (spec §7 `NotifyExistingAlert`).
    pub fn notify_existing_alert(&self, alert_id: &str) -> Result<(), AlertEngineError> {
        let alert = {
            let guard = self.primary.read().expect("primary lock poisoned");
            guard.active_alerts.get(alert_id).cloned().ok_or_else(|| AlertEngineError::NotFound(alert_id.to_string()))?
        };
        deliver(&self.callbacks, DispatchEvent::Alert(alert));
        Ok(())
    }

    /// Persist the active-alert snapshot to disk (spec §6), called by the
    /// background persistence ticker.
    pub fn persist(&self) -> Result<(), AlertEngineError> {
        let guard = self.primary.read().expect("primary lock poisoned");
        storage::save_active_alerts(&self.data_dir, &guard.active_alerts)?;
        Ok(())
    }

    /// Escalation scan (spec §4.10), run by the background ticker every
    /// minute: fire `onEscalate` for each configured level whose
    /// `after_minutes` has elapsed since the alert started and hasn't fired
    /// yet.
    pub fn run_escalation_scan(&self, now_unix: i64) {
        self.transact(now_unix, move |state, _resolved, now| {
            let mut dispatches = Vec::new();
            let levels = state.config.schedule.escalation.clone();
            for alert in state.active_alerts.values_mut() {
                if alert.acknowledged {
                    continue;
                }
                let elapsed_minutes = (now - alert.start_time_unix) / 60;
                for (idx, level) in levels.iter().enumerate() {
                    let level_num = (idx + 1) as u32;
                    if level_num <= alert.escalation.level {
                        continue;
                    }
                    if elapsed_minutes >= level.after_minutes as i64 {
                        alert.escalation.level = level_num;
                        alert.escalation.fired_at_unix.push(now);
                        dispatches.push(DispatchEvent::Escalate(alert.clone(), level_num));
                    }
                }
            }
            ((), dispatches, Vec::new())
        });
    }

    /// Prune the `resolved` window and run the escalation scan; called by
    /// the background scheduler once a minute.
    pub fn run_periodic_maintenance(&self, now_unix: i64) {
        self.prune_resolved(now_unix);
        self.run_escalation_scan(now_unix);
    }

    /// Re-dispatch any critical alert loaded from disk whose `startTime` is
    /// within the last 2 hours, after a 10-second settle delay (spec §6).
    /// `now_unix` should be the time at which the delay elapsed, not the
    /// engine's construction time. Subject to the same activation/quiet-hours
    /// gating as any other dispatch; never re-applies rate limiting or
    /// cooldown since this is a one-shot startup catch-up, not a redispatch
    /// triggered by a metric re-evaluation.
    pub async fn redispatch_after_startup(&self, now_unix: i64) {
        tokio::time::sleep(std::time::Duration::from_secs(10)).await;
        self.transact(now_unix, move |state, _resolved, now| {
            let mut dispatches = Vec::new();
            let activation = config::dispatch_suppressed_by_activation(&state.config);
            for alert in state.active_alerts.values() {
                if alert.level != crate::config::Severity::Critical {
                    continue;
                }
                if now - alert.start_time_unix >= 2 * 3600 {
                    continue;
                }
                let category = crate::alert::dispatch::category_of(&alert.kind);
                let quiet = crate::alert::dispatch::quiet_hours_suppresses(&state.config.schedule.quiet_hours, now, alert.level, category);
                if !quiet && !activation {
                    dispatches.push(DispatchEvent::Alert(alert.clone()));
                }
            }
            ((), dispatches, Vec::new())
        });
    }
}

fn infer_kind(resource_id: &str, node: &str) -> crate::config::ResourceKind {
    // Best-effort inference used only by `update_config`'s cheap
    // re-evaluation path, where the original resource kind isn't carried on
    // `Alert` directly. Node-scoped metric alerts use the node's own id as
    // `resource_id`; everything else defaults to guest, which is the
    // overwhelming majority of metric alerts and the only kind whose
    // default thresholds matter for this path (node/pbs/storage alerts are
    // re-evaluated on their next `Check*` call regardless).
    if resource_id == node {
        crate::config::ResourceKind::Node
    } else {
        crate::config::ResourceKind::Guest
    }
}

fn record_dispatch_history(state: &mut EngineState, event: &DispatchEvent, now_unix: i64) {
    match event {
        DispatchEvent::Alert(alert) => state.record_history(&alert.id, HistoryEvent::Fired, now_unix),
        DispatchEvent::Resolved(id) => state.record_history(id, HistoryEvent::Resolved, now_unix),
        DispatchEvent::Escalate(alert, _) => state.record_history(&alert.id, HistoryEvent::Fired, now_unix),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ActivationState;
    use crate::types::GuestStatus;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn activated_config() -> AlertConfig {
        let mut cfg = AlertConfig::default();
        cfg.activation_state = Some(ActivationState::Active);
        cfg
    }

    fn counting_callbacks() -> (Callbacks, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let alerts = Arc::new(AtomicUsize::new(0));
        let resolved = Arc::new(AtomicUsize::new(0));
        let a = alerts.clone();
        let r = resolved.clone();
        (
            Callbacks {
                on_alert: Arc::new(move |_| {
                    a.fetch_add(1, Ordering::SeqCst);
                }),
                on_resolved: Arc::new(move |_| {
                    r.fetch_add(1, Ordering::SeqCst);
                }),
                on_escalate: Arc::new(|_, _| {}),
            },
            alerts,
            resolved,
        )
    }

    fn guest(id: &str, cpu: f64) -> GuestSnapshot {
        GuestSnapshot {
            id: id.to_string(),
            name: id.to_string(),
            node: "pve1".to_string(),
            vmid: 100,
            status: GuestStatus::Running,
            cpu_percent: cpu,
            memory_percent: 10.0,
            disk_percent: 10.0,
            filesystems: Vec::new(),
            disk_read_bytes_per_sec: 0.0,
            disk_write_bytes_per_sec: 0.0,
            network_in_bytes_per_sec: 0.0,
            network_out_bytes_per_sec: 0.0,
        }
    }

    #[test]
    fn cpu_breach_fires_and_clears() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (callbacks, alerts, resolved) = counting_callbacks();
        let engine = AlertEngine::new(EngineConfig { data_dir: dir.path().to_path_buf(), callbacks }, 0);
        engine.update_config(0, activated_config());

        engine.check_guest(0, &guest("vm-100", 90.0));
        assert_eq!(alerts.load(Ordering::SeqCst), 1);
        assert_eq!(engine.get_active_alerts().len(), 1);

        engine.check_guest(0, &guest("vm-100", 50.0));
        assert_eq!(resolved.load(Ordering::SeqCst), 1);
        assert!(engine.get_active_alerts().is_empty());
    }

    #[test]
    fn pending_review_suppresses_dispatch() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (callbacks, alerts, _resolved) = counting_callbacks();
        let engine = AlertEngine::new(EngineConfig { data_dir: dir.path().to_path_buf(), callbacks }, 0);
        // Never calls update_config: activation_state defaults to PendingReview.

        engine.check_guest(0, &guest("vm-100", 90.0));
        assert_eq!(alerts.load(Ordering::SeqCst), 0);
        // The alert still exists internally even though dispatch was suppressed.
        assert_eq!(engine.get_active_alerts().len(), 1);
    }

    #[test]
    fn acknowledge_and_clear_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (callbacks, _alerts, _resolved) = counting_callbacks();
        let engine = AlertEngine::new(EngineConfig { data_dir: dir.path().to_path_buf(), callbacks }, 0);
        engine.update_config(0, activated_config());

        engine.check_guest(0, &guest("vm-100", 90.0));
        let id = engine.get_active_alerts()[0].id.clone();

        assert!(matches!(engine.acknowledge_alert("alice", 10, &id), Ok(())));
        assert!(engine.get_active_alerts()[0].acknowledged);
        assert!(matches!(engine.acknowledge_alert("alice", 10, "missing"), Err(AlertEngineError::NotFound(_))));

        assert!(matches!(engine.clear_alert(20, &id), Ok(())));
        assert!(engine.get_active_alerts().is_empty());
        assert!(matches!(engine.clear_alert(20, &id), Err(AlertEngineError::NotFound(_))));
    }

    #[test]
    fn persist_and_reload_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (callbacks, _alerts, _resolved) = counting_callbacks();
        let engine = AlertEngine::new(EngineConfig { data_dir: dir.path().to_path_buf(), callbacks: callbacks.clone() }, 0);
        engine.update_config(0, activated_config());
        engine.check_guest(0, &guest("vm-100", 90.0));
        engine.persist().expect("persist");

        let reloaded = AlertEngine::new(EngineConfig { data_dir: dir.path().to_path_buf(), callbacks }, 100);
        assert_eq!(reloaded.get_active_alerts().len(), 1);
    }

    #[test]
    fn acknowledgement_survives_rebuild_across_polls() {
        // spec §8 scenario 3: acknowledge g2-memory, then keep polling with
        // the same breach — the alert stays acknowledged with the same user.
        let dir = tempfile::tempdir().expect("tempdir");
        let (callbacks, _alerts, _resolved) = counting_callbacks();
        let engine = AlertEngine::new(EngineConfig { data_dir: dir.path().to_path_buf(), callbacks }, 0);
        engine.update_config(0, activated_config());

        let mut g = guest("g2", 10.0);
        g.memory_percent = 90.0;
        engine.check_guest(0, &g);
        let id = engine.get_active_alerts().into_iter().find(|a| a.id.contains("memory")).expect("memory alert").id;

        engine.acknowledge_alert("alice", 10, &id).expect("ack");
        let acked = engine.get_active_alerts().into_iter().find(|a| a.id == id).expect("alert present");
        assert!(acked.acknowledged);

        // Re-poll with the same breach still present.
        engine.check_guest(20, &g);
        let alert = engine.get_active_alerts().into_iter().find(|a| a.id == id).expect("alert still active");
        assert!(alert.acknowledged);
        assert_eq!(alert.ack_user.as_deref(), Some("alice"));
    }

    #[test]
    fn escalation_fires_after_configured_minutes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (callbacks, _alerts, _resolved) = counting_callbacks();
        let escalated = Arc::new(AtomicUsize::new(0));
        let e = escalated.clone();
        let callbacks = Callbacks { on_escalate: Arc::new(move |_, _| { e.fetch_add(1, Ordering::SeqCst); }), ..callbacks };
        let engine = AlertEngine::new(EngineConfig { data_dir: dir.path().to_path_buf(), callbacks }, 0);
        let mut cfg = activated_config();
        cfg.schedule.escalation = vec![crate::config::EscalationLevel { after_minutes: 5, notify_target: "oncall".to_string() }];
        engine.update_config(0, cfg);

        engine.check_guest(0, &guest("vm-100", 90.0));
        engine.run_escalation_scan(4 * 60);
        assert_eq!(escalated.load(Ordering::SeqCst), 0);
        engine.run_escalation_scan(6 * 60);
        assert_eq!(escalated.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cleanup_removes_alerts_for_removed_nodes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (callbacks, _alerts, _resolved) = counting_callbacks();
        let engine = AlertEngine::new(EngineConfig { data_dir: dir.path().to_path_buf(), callbacks }, 0);
        engine.update_config(0, activated_config());
        engine.check_guest(0, &guest("vm-100", 90.0));
        assert_eq!(engine.get_active_alerts().len(), 1);

        engine.cleanup_alerts_for_nodes(0, &["other-node".to_string()]);
        assert!(engine.get_active_alerts().is_empty());
    }
}
