//! Bounded feedback queue between task completion and learning updates
//!
//! Producers never block: when the queue is full the oldest record is evicted
//! and counted. A single consumer drains records in FIFO order, woken either
//! by its interval tick or by [`FeedbackQueue::notified`] once enough records
//! have accumulated.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tracing::warn;

/// One observed outcome awaiting a learning update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub arm_id: String,
    /// Featurized context the task was routed with
    pub context: Vec<f64>,
    pub reward: f64,
    pub success: bool,
    pub observed_duration: Option<f64>,
    pub enqueued_at: DateTime<Utc>,
}

/// Queue counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub len: usize,
    pub capacity: usize,
    pub enqueued: u64,
    /// Records evicted by overflow
    pub dropped: u64,
    pub drained: u64,
}

/// Bounded, drop-oldest FIFO of feedback records
#[derive(Debug)]
pub struct FeedbackQueue {
    records: Mutex<VecDeque<FeedbackRecord>>,
    capacity: usize,
    trigger_threshold: usize,
    enqueued: AtomicU64,
    dropped: AtomicU64,
    drained: AtomicU64,
    notify: Notify,
}

impl FeedbackQueue {
    /// Create a queue holding at most `capacity` records (minimum 1)
    pub fn new(capacity: usize, trigger_threshold: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            trigger_threshold,
            enqueued: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            drained: AtomicU64::new(0),
            notify: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<FeedbackRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a record, evicting the oldest if full.
    ///
    /// Returns the evicted record, if any.
    pub fn enqueue(&self, record: FeedbackRecord) -> Option<FeedbackRecord> {
        let (evicted, len) = {
            let mut records = self.lock();
            let evicted = if records.len() >= self.capacity {
                records.pop_front()
            } else {
                None
            };
            records.push_back(record);
            (evicted, records.len())
        };

        self.enqueued.fetch_add(1, Ordering::Relaxed);
        if let Some(old) = &evicted {
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            warn!(
                arm_id = %old.arm_id,
                capacity = self.capacity,
                dropped_total = dropped,
                "Feedback queue full, dropped oldest record"
            );
        }

        if self.trigger_threshold > 0 && len >= self.trigger_threshold {
            self.notify.notify_one();
        }
        evicted
    }

    /// Remove up to `max` records from the front, oldest first
    pub fn drain_batch(&self, max: usize) -> Vec<FeedbackRecord> {
        let batch: Vec<FeedbackRecord> = {
            let mut records = self.lock();
            let take = max.min(records.len());
            records.drain(..take).collect()
        };
        self.drained
            .fetch_add(batch.len() as u64, Ordering::Relaxed);
        batch
    }

    /// Wait until the trigger threshold is reached
    pub async fn notified(&self) {
        self.notify.notified().await;
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            len: self.len(),
            capacity: self.capacity,
            enqueued: self.enqueued.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            drained: self.drained.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn record(arm_id: &str, reward: f64) -> FeedbackRecord {
        FeedbackRecord {
            arm_id: arm_id.to_string(),
            context: vec![0.5; 3],
            reward,
            success: reward > 0.5,
            observed_duration: Some(1.0),
            enqueued_at: Utc::now(),
        }
    }

    #[test]
    fn test_fifo_batches() {
        let queue = FeedbackQueue::new(10, 0);
        for i in 0..5 {
            queue.enqueue(record(&format!("arm-{}", i), 1.0));
        }

        let first: Vec<String> = queue.drain_batch(3).into_iter().map(|r| r.arm_id).collect();
        assert_eq!(first, vec!["arm-0", "arm-1", "arm-2"]);
        assert_eq!(queue.drain_batch(10).len(), 2);
        assert!(queue.drain_batch(10).is_empty());
    }

    #[test]
    fn test_overflow_drops_oldest_and_counts() {
        let queue = FeedbackQueue::new(2, 0);
        assert!(queue.enqueue(record("a", 1.0)).is_none());
        assert!(queue.enqueue(record("b", 1.0)).is_none());
        let evicted = queue.enqueue(record("c", 1.0)).unwrap();
        assert_eq!(evicted.arm_id, "a");

        let stats = queue.stats();
        assert_eq!(stats.len, 2);
        assert_eq!(stats.enqueued, 3);
        assert_eq!(stats.dropped, 1);

        let remaining: Vec<String> = queue.drain_batch(5).into_iter().map(|r| r.arm_id).collect();
        assert_eq!(remaining, vec!["b", "c"]);
        assert_eq!(queue.stats().drained, 2);
    }

    #[tokio::test]
    async fn test_threshold_wakes_consumer() {
        let queue = Arc::new(FeedbackQueue::new(10, 2));
        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.notified().await })
        };

        queue.enqueue(record("a", 1.0));
        queue.enqueue(record("b", 1.0));

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("consumer should be woken")
            .unwrap();
    }
}
