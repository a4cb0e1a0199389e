//! Background feedback drain
//!
//! One worker per engine. It wakes on a fixed interval or when the queue
//! signals that its trigger threshold was reached, applies one batch, and
//! goes back to sleep. Shutdown is observed only between batches, so an
//! in-flight batch always completes.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::router::RoutingEngine;
use crate::error::{Error, Result};

/// What the worker did before it exited
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerReport {
    /// Non-empty batches applied
    pub batches: u64,
    /// Records applied across all batches
    pub records: u64,
    /// Records still queued when the worker stopped
    pub pending_at_exit: usize,
}

/// Spawns the drain loop for a [`RoutingEngine`]
pub struct FeedbackWorker;

impl FeedbackWorker {
    /// Start draining `engine`'s queue on the current tokio runtime
    pub fn spawn(engine: Arc<RoutingEngine>) -> FeedbackWorkerHandle {
        let shutdown_token = CancellationToken::new();
        let drain_interval = engine
            .feedback_config()
            .drain_interval()
            .max(Duration::from_millis(1));
        let shutdown_timeout = engine.feedback_config().shutdown_timeout();

        let join = tokio::spawn(run(engine, drain_interval, shutdown_token.clone()));

        FeedbackWorkerHandle {
            shutdown_token,
            shutdown_timeout,
            join,
        }
    }
}

async fn run(
    engine: Arc<RoutingEngine>,
    drain_interval: Duration,
    shutdown_token: CancellationToken,
) -> WorkerReport {
    info!(
        interval_ms = drain_interval.as_millis() as u64,
        batch_size = engine.feedback_config().batch_size,
        "Starting feedback drain worker"
    );

    let queue = Arc::clone(engine.queue());
    let mut tick = interval(drain_interval);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut report = WorkerReport::default();

    loop {
        tokio::select! {
            biased;
            _ = shutdown_token.cancelled() => {
                info!("Shutdown signal received, stopping feedback drain worker");
                break;
            }
            _ = tick.tick() => {}
            _ = queue.notified() => {
                debug!("Feedback threshold reached, draining early");
            }
        }

        let processed = engine.process_feedback_batch();
        if processed > 0 {
            report.batches += 1;
            report.records += processed as u64;
        }
    }

    report.pending_at_exit = queue.len();
    info!(
        batches = report.batches,
        records = report.records,
        pending = report.pending_at_exit,
        "Feedback drain worker stopped"
    );
    report
}

/// Handle to a running drain worker
pub struct FeedbackWorkerHandle {
    shutdown_token: CancellationToken,
    shutdown_timeout: Duration,
    join: JoinHandle<WorkerReport>,
}

impl FeedbackWorkerHandle {
    /// Token that stops the worker when cancelled
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Stop the worker and wait for it within the configured timeout
    pub async fn shutdown(self) -> Result<WorkerReport> {
        let timeout = self.shutdown_timeout;
        self.shutdown_with_timeout(timeout).await
    }

    /// Stop the worker and wait at most `timeout` for the in-flight batch
    pub async fn shutdown_with_timeout(self, timeout: Duration) -> Result<WorkerReport> {
        self.shutdown_token.cancel();

        let mut join = self.join;
        match tokio::time::timeout(timeout, &mut join).await {
            Ok(Ok(report)) => Ok(report),
            Ok(Err(e)) => Err(Error::Other(format!("Feedback worker failed: {}", e))),
            Err(_) => {
                warn!(
                    timeout_secs = timeout.as_secs(),
                    "Feedback worker did not stop in time, aborting"
                );
                join.abort();
                Err(Error::WorkerShutdownTimeout(timeout.as_secs()))
            }
        }
    }
}
