use std::time::Duration;

use tracing::{info, warn};

use crate::services::reconciler::{Reconciler, StudentSyncOutcome};

/// Periodic reconciliation of every known student.
pub struct SyncScheduler {
    reconciler: Reconciler,
    interval: Duration,
}

impl SyncScheduler {
    pub fn new(reconciler: Reconciler, interval_secs: u64) -> Self {
        Self {
            reconciler,
            interval: Duration::from_secs(interval_secs),
        }
    }

    /// Runs forever; the first round starts after one interval.
    pub async fn start(self) {
        info!("Starting auto-sync scheduler (interval: {:?})", self.interval);

        loop {
            tokio::time::sleep(self.interval).await;
            self.run_once().await;
        }
    }

    pub async fn run_once(&self) -> Vec<StudentSyncOutcome> {
        match self.reconciler.reconcile_all().await {
            Ok(outcomes) => {
                let failed = outcomes.iter().filter(|o| o.error.is_some()).count();
                info!(
                    "Auto-sync completed - {} students, {} failed",
                    outcomes.len(),
                    failed
                );
                outcomes
            }
            Err(e) => {
                // Keep looping; the next round may succeed.
                warn!("Auto-sync failed: {:?}", e);
                Vec::new()
            }
        }
    }
}
