//! Scheduler — 1-minute escalation/cleanup and persistence tickers
//!
//! Drives `AlertEngine::run_periodic_maintenance` and `AlertEngine::persist`
//! on independent `tokio::time::interval` loops (spec §5, §6), matching the
//! teacher's 30-second self-healer loop shape but at the two cadences the
//! alert engine actually needs.

use crate::alert::AlertEngine;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(60);
const PERSIST_INTERVAL: Duration = Duration::from_secs(60);

/// Runs the two background tickers, each as its own tokio task.
pub struct Scheduler {
    engine: Arc<AlertEngine>,
}

impl Scheduler {
    pub fn new(engine: Arc<AlertEngine>) -> Self {
        Self { engine }
    }

    /// Spawn both tickers. Each exits its loop as soon as `AlertEngine::stop`
    /// closes the shutdown channel (spec §5); the returned handles remain
    /// available to cancel eagerly via `.abort()` if needed.
    pub fn spawn(self) -> (tokio::task::JoinHandle<()>, tokio::task::JoinHandle<()>) {
        let maintenance_engine = self.engine.clone();
        let mut maintenance_shutdown = self.engine.shutdown_signal();
        let maintenance = tokio::spawn(async move {
            info!(interval_secs = MAINTENANCE_INTERVAL.as_secs(), "escalation/cleanup ticker started");
            let mut ticker = tokio::time::interval(MAINTENANCE_INTERVAL);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let now = now_unix();
                        maintenance_engine.run_periodic_maintenance(now);
                    }
                    _ = maintenance_shutdown.changed() => {
                        info!("escalation/cleanup ticker stopping");
                        break;
                    }
                }
            }
        });

        let persist_engine = self.engine.clone();
        let mut persist_shutdown = self.engine.shutdown_signal();
        let persist = tokio::spawn(async move {
            info!(interval_secs = PERSIST_INTERVAL.as_secs(), "persistence ticker started");
            let mut ticker = tokio::time::interval(PERSIST_INTERVAL);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = persist_engine.persist() {
                            error!(error = %e, "failed to persist active-alert snapshot");
                        }
                    }
                    _ = persist_shutdown.changed() => {
                        info!("persistence ticker stopping");
                        break;
                    }
                }
            }
        });

        (maintenance, persist)
    }
}

fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::{Callbacks, EngineConfig};

    #[tokio::test]
    async fn tickers_run_without_panicking() {
        let dir = tempfile::tempdir().expect("tempdir");
        let engine = Arc::new(AlertEngine::new(
            EngineConfig { data_dir: dir.path().to_path_buf(), callbacks: Callbacks::noop() },
            0,
        ));
        let (maintenance, persist) = Scheduler::new(engine).spawn();
        tokio::time::sleep(Duration::from_millis(50)).await;
        maintenance.abort();
        persist.abort();
    }
}
