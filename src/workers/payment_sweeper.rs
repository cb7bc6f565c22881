use crate::config::SweeperConfig;
use crate::services::reconciliation::ReconciliationEngine;
use crate::services::state_machine::PaymentStatus;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

// ---------------------------------------------------------------------------
// Custom error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum SweeperError {
    #[error("database error: {0}")]
    Database(#[from] crate::database::error::DatabaseError),

    #[error("invalid pending age: {0}")]
    InvalidAge(String),
}

/// Counts from one sweep cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub examined: usize,
    pub settled: usize,
    pub still_pending: usize,
    pub errors: usize,
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

/// Verifies pending gateway payments whose webhook never arrived and whose
/// client never polled.
pub struct PaymentSweeperWorker {
    engine: Arc<ReconciliationEngine>,
    config: SweeperConfig,
}

impl PaymentSweeperWorker {
    pub fn new(engine: Arc<ReconciliationEngine>, config: SweeperConfig) -> Self {
        Self { engine, config }
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            pending_age_secs = self.config.pending_age.as_secs(),
            batch_size = self.config.batch_size,
            concurrency = self.config.concurrency,
            "payment sweeper worker started"
        );

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("payment sweeper worker stopping");
                        break;
                    }
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {
                    if let Err(e) = self.run_cycle().await {
                        warn!(error = %e, "payment sweep cycle failed");
                    }
                }
            }
        }

        info!("payment sweeper worker stopped");
    }

    /// One pass over the oldest stale pending records. A failing record is
    /// logged and left for the next cycle.
    pub async fn run_cycle(&self) -> Result<SweepReport, SweeperError> {
        let age = chrono::Duration::from_std(self.config.pending_age)
            .map_err(|e| SweeperError::InvalidAge(e.to_string()))?;
        let cutoff = chrono::Utc::now() - age;

        let stale = self
            .engine
            .store()
            .stale_pending_payments(cutoff, self.config.batch_size)
            .await?;

        let mut report = SweepReport {
            examined: stale.len(),
            ..SweepReport::default()
        };
        if stale.is_empty() {
            return Ok(report);
        }

        let results: Vec<_> = stream::iter(stale)
            .map(|record| {
                let engine = self.engine.clone();
                async move {
                    let intent_id = record.intent_id.clone();
                    (intent_id, engine.reconcile_payment(record).await)
                }
            })
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;

        for (intent_id, result) in results {
            match result {
                Ok(state) if state.status == PaymentStatus::Pending => report.still_pending += 1,
                Ok(state) => {
                    info!(
                        intent_id = %intent_id,
                        order_id = state.order_id,
                        status = %state.status,
                        "sweeper settled pending payment"
                    );
                    report.settled += 1;
                }
                Err(e) => {
                    error!(intent_id = %intent_id, error = %e, "sweeper failed to reconcile payment");
                    report.errors += 1;
                }
            }
        }

        info!(
            examined = report.examined,
            settled = report.settled,
            still_pending = report.still_pending,
            errors = report.errors,
            "payment sweep cycle complete"
        );
        Ok(report)
    }
}
