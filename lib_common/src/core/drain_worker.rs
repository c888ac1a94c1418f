//! # Durable Queue Drain Worker
//!
//! The background consumer that moves queued readings into long-term storage. It
//! is the only reader of the durable queue.
//!
//! ## Cycle
//!
//! 1.  Open a fresh queue session (fresh transaction scope).
//! 2.  Pop up to `batch_size` entries, newest first.
//! 3.  Empty pop: roll back, back off, go again.
//! 4.  Map every payload to a `SensorDataRow`. Payloads that do not parse are
//!     dropped and counted; they are never retried.
//! 5.  Bulk-save the rows. Success commits the pop, failure rolls it back.
//!
//! A failed cycle is logged and followed by the same backoff as an empty poll. The
//! loop never exits on its own; it stops only when its shutdown token fires, and an
//! in-progress cycle always finishes first.
//!
//! Save and commit are not atomic across the two stores. If the commit fails after
//! a successful save, the rows come back and are saved again on the next cycle.
//!
//! ## Concurrency
//!
//! One worker runs its cycles strictly in sequence. Several workers may run side by
//! side; each opens its own sessions and the queue backend keeps their pops apart.
//!
//! ## Observability
//!
//! `DrainStats` keeps lock-free counters, including the age of the oldest entry in
//! each popped batch. Pops are LIFO, so a growing max age means old entries are
//! starving behind fresh ones.

use chrono::Utc;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::core::queue::{DurableQueue, QueueEntry, QueueSession, ReadingStore, StorageError};
use crate::models::SensorDataRow;

/// Default number of entries popped per cycle.
pub const DEFAULT_BATCH_SIZE: usize = 100;
/// Default pause after an empty or failed cycle.
pub const DEFAULT_EMPTY_BACKOFF: Duration = Duration::from_millis(100);

/// Batch size and pacing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainConfig {
    /// Maximum entries popped per cycle.
    pub batch_size: usize,
    /// Pause after an empty or failed cycle.
    pub empty_backoff: Duration,
}

impl Default for DrainConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            empty_backoff: DEFAULT_EMPTY_BACKOFF,
        }
    }
}

/// What one cycle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainCycle {
    /// The queue had nothing to pop.
    Empty,
    /// A batch was popped, saved and committed.
    Drained {
        /// Rows written to long-term storage.
        saved: usize,
        /// Payloads dropped because they did not parse.
        discarded: usize,
    },
}

/// # Drain Statistics
///
/// Counters shared between the worker(s) and the health endpoint. All updates use
/// `Relaxed` ordering; readers only need eventually consistent numbers.
#[derive(Debug, Default)]
pub struct DrainStats {
    committed_batches: AtomicU64,
    empty_polls: AtomicU64,
    failed_cycles: AtomicU64,
    saved_rows: AtomicU64,
    discarded_payloads: AtomicU64,
    last_oldest_entry_age_ms: AtomicU64,
    max_oldest_entry_age_ms: AtomicU64,
}

/// A point-in-time copy of [`DrainStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DrainStatsSnapshot {
    /// Batches saved and committed.
    pub committed_batches: u64,
    /// Cycles that found the queue empty.
    pub empty_polls: u64,
    /// Cycles that rolled back on an error.
    pub failed_cycles: u64,
    /// Rows written to long-term storage.
    pub saved_rows: u64,
    /// Payloads dropped as unparseable.
    pub discarded_payloads: u64,
    /// Age of the oldest entry in the most recent non-empty pop.
    pub last_oldest_entry_age_ms: u64,
    /// Largest such age seen so far.
    pub max_oldest_entry_age_ms: u64,
}

impl DrainStats {
    /// Creates zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copies every counter.
    pub fn snapshot(&self) -> DrainStatsSnapshot {
        DrainStatsSnapshot {
            committed_batches: self.committed_batches.load(Ordering::Relaxed),
            empty_polls: self.empty_polls.load(Ordering::Relaxed),
            failed_cycles: self.failed_cycles.load(Ordering::Relaxed),
            saved_rows: self.saved_rows.load(Ordering::Relaxed),
            discarded_payloads: self.discarded_payloads.load(Ordering::Relaxed),
            last_oldest_entry_age_ms: self.last_oldest_entry_age_ms.load(Ordering::Relaxed),
            max_oldest_entry_age_ms: self.max_oldest_entry_age_ms.load(Ordering::Relaxed),
        }
    }

    fn record_oldest_age(&self, entries: &[QueueEntry]) {
        let Some(oldest) = entries.iter().map(|e| e.inserted_at).min() else {
            return;
        };
        let age_ms = (Utc::now() - oldest).num_milliseconds().max(0) as u64;
        self.last_oldest_entry_age_ms.store(age_ms, Ordering::Relaxed);
        self.max_oldest_entry_age_ms.fetch_max(age_ms, Ordering::Relaxed);
    }
}

/// # Drain Worker
pub struct DrainWorker {
    queue: Arc<dyn DurableQueue>,
    store: Arc<dyn ReadingStore>,
    config: DrainConfig,
    stats: Arc<DrainStats>,
}

impl DrainWorker {
    /// Creates a worker with its own statistics.
    pub fn new(queue: Arc<dyn DurableQueue>, store: Arc<dyn ReadingStore>, config: DrainConfig) -> Self {
        Self::with_stats(queue, store, config, Arc::new(DrainStats::new()))
    }

    /// Creates a worker that reports into shared statistics.
    pub fn with_stats(
        queue: Arc<dyn DurableQueue>,
        store: Arc<dyn ReadingStore>,
        config: DrainConfig,
        stats: Arc<DrainStats>,
    ) -> Self {
        Self {
            queue,
            store,
            config,
            stats,
        }
    }

    /// The statistics this worker reports into.
    pub fn stats(&self) -> Arc<DrainStats> {
        Arc::clone(&self.stats)
    }

    /// # Main Execution Loop
    ///
    /// Runs cycles until `shutdown` fires. Empty and failed cycles are followed by
    /// the configured backoff; a full batch is followed immediately by the next one.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(batch_size = self.config.batch_size, "Drain worker started");

        while !shutdown.is_cancelled() {
            let back_off = match self.drain_once().await {
                Ok(DrainCycle::Empty) => true,
                Ok(DrainCycle::Drained { .. }) => false,
                Err(e) => {
                    self.stats.failed_cycles.fetch_add(1, Ordering::Relaxed);
                    error!(error = %e, "Drain cycle failed, batch rolled back");
                    true
                }
            };

            if back_off {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(self.config.empty_backoff) => {}
                }
            }
        }

        info!("Drain worker stopped");
    }

    /// Runs a single cycle. Every popped batch ends in exactly one commit or rollback.
    pub async fn drain_once(&self) -> Result<DrainCycle, StorageError> {
        let mut session = self.queue.open_session().await?;

        let entries = match session.begin_pop(self.config.batch_size).await {
            Ok(entries) => entries,
            Err(e) => {
                rollback_quietly(session.as_mut()).await;
                return Err(e);
            }
        };

        if entries.is_empty() {
            rollback_quietly(session.as_mut()).await;
            self.stats.empty_polls.fetch_add(1, Ordering::Relaxed);
            return Ok(DrainCycle::Empty);
        }

        self.stats.record_oldest_age(&entries);

        let mut rows = Vec::with_capacity(entries.len());
        let mut discarded = 0usize;
        for entry in &entries {
            match SensorDataRow::from_payload(&entry.payload) {
                Some(row) => rows.push(row),
                None => {
                    discarded += 1;
                    warn!(entry_id = entry.id, "Discarding unparseable queue payload");
                }
            }
        }

        let saved = match self.store.save(&rows).await {
            Ok(saved) => saved,
            Err(e) => {
                rollback_quietly(session.as_mut()).await;
                return Err(e);
            }
        };
        session.commit().await?;

        self.stats.committed_batches.fetch_add(1, Ordering::Relaxed);
        self.stats.saved_rows.fetch_add(saved as u64, Ordering::Relaxed);
        self.stats.discarded_payloads.fetch_add(discarded as u64, Ordering::Relaxed);
        debug!(popped = entries.len(), saved, discarded, "Drained batch");

        Ok(DrainCycle::Drained { saved, discarded })
    }
}

async fn rollback_quietly(session: &mut dyn QueueSession) {
    if !session.state().is_open() {
        return;
    }
    if let Err(e) = session.rollback().await {
        warn!(error = %e, "Rollback failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::memory_queue::{MemoryQueue, MemoryReadingStore};
    use crate::core::queue::QueueProducer;
    use crate::models::Reading;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use uuid::Uuid;

    struct BrokenStore;

    #[async_trait]
    impl ReadingStore for BrokenStore {
        async fn save(&self, _rows: &[SensorDataRow]) -> Result<usize, StorageError> {
            Err(StorageError::Query("disk full".into()))
        }
    }

    /// Fails the first `failures` saves, then stores into `inner`.
    struct FlakyStore {
        failures: AtomicU64,
        inner: MemoryReadingStore,
    }

    #[async_trait]
    impl ReadingStore for FlakyStore {
        async fn save(&self, rows: &[SensorDataRow]) -> Result<usize, StorageError> {
            let remaining = self.failures.load(Ordering::Relaxed);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::Relaxed);
                return Err(StorageError::Query("connection reset".into()));
            }
            self.inner.save(rows).await
        }
    }

    fn reading() -> Reading {
        Reading {
            sensor_id: Uuid::new_v4(),
            actor_id: Uuid::new_v4(),
            time_stamp: Utc::now(),
            latitude: 40.4,
            longitude: -3.7,
        }
    }

    async fn push(queue: &MemoryQueue, payload: String) {
        queue.append(payload, CancellationToken::new()).await.unwrap();
    }

    #[tokio::test]
    async fn unparseable_payloads_are_dropped_and_the_rest_committed() {
        let queue = MemoryQueue::new();
        let store = MemoryReadingStore::new();
        let good = [reading(), reading()];
        push(&queue, good[0].to_payload().unwrap()).await;
        push(&queue, "{broken".to_string()).await;
        push(&queue, String::new()).await;
        push(&queue, good[1].to_payload().unwrap()).await;

        let worker = DrainWorker::new(Arc::new(queue.clone()), Arc::new(store.clone()), DrainConfig::default());

        assert_eq!(
            worker.drain_once().await.unwrap(),
            DrainCycle::Drained { saved: 2, discarded: 2 }
        );
        assert!(queue.is_empty());

        let saved: HashSet<_> = store.rows().iter().map(|r| r.sensor_id).collect();
        assert_eq!(saved, good.iter().map(|r| r.sensor_id).collect());

        assert_eq!(worker.drain_once().await.unwrap(), DrainCycle::Empty);
        let stats = worker.stats().snapshot();
        assert_eq!(stats.committed_batches, 1);
        assert_eq!(stats.discarded_payloads, 2);
        assert_eq!(stats.empty_polls, 1);
    }

    #[tokio::test]
    async fn failed_save_rolls_the_batch_back() {
        let queue = MemoryQueue::new();
        for _ in 0..3 {
            push(&queue, reading().to_payload().unwrap()).await;
        }

        let worker = DrainWorker::new(Arc::new(queue.clone()), Arc::new(BrokenStore), DrainConfig::default());

        assert_eq!(worker.drain_once().await, Err(StorageError::Query("disk full".into())));
        assert_eq!(queue.len(), 3);
    }

    #[tokio::test]
    async fn batches_respect_the_configured_size() {
        let queue = MemoryQueue::new();
        for _ in 0..5 {
            push(&queue, reading().to_payload().unwrap()).await;
        }
        let config = DrainConfig { batch_size: 2, ..DrainConfig::default() };
        let worker = DrainWorker::new(Arc::new(queue.clone()), Arc::new(MemoryReadingStore::new()), config);

        assert_eq!(worker.drain_once().await.unwrap(), DrainCycle::Drained { saved: 2, discarded: 0 });
        assert_eq!(queue.len(), 3);
    }

    #[tokio::test]
    async fn run_drains_everything_exactly_once_then_stops_on_shutdown() {
        let queue = MemoryQueue::new();
        let store = MemoryReadingStore::new();
        let mut expected = HashSet::new();
        for _ in 0..250 {
            let r = reading();
            expected.insert(r.sensor_id);
            push(&queue, r.to_payload().unwrap()).await;
        }

        let worker = Arc::new(DrainWorker::new(
            Arc::new(queue.clone()),
            Arc::new(store.clone()),
            DrainConfig { batch_size: 100, empty_backoff: Duration::from_millis(5) },
        ));
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn({
            let worker = Arc::clone(&worker);
            let shutdown = shutdown.clone();
            async move { worker.run(shutdown).await }
        });

        for _ in 0..200 {
            if store.rows().len() >= 250 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        shutdown.cancel();
        handle.await.unwrap();

        let rows = store.rows();
        assert_eq!(rows.len(), 250);
        let unique: HashSet<_> = rows.iter().map(|r| r.sensor_id).collect();
        assert_eq!(unique, expected);
        assert_eq!(worker.stats().snapshot().committed_batches, 3);
    }

    #[tokio::test]
    async fn run_keeps_going_after_failed_cycles() {
        let queue = MemoryQueue::new();
        let store = MemoryReadingStore::new();
        let r = reading();
        push(&queue, r.to_payload().unwrap()).await;

        let worker = Arc::new(DrainWorker::new(
            Arc::new(queue.clone()),
            Arc::new(FlakyStore { failures: AtomicU64::new(2), inner: store.clone() }),
            DrainConfig { batch_size: 10, empty_backoff: Duration::from_millis(5) },
        ));
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn({
            let worker = Arc::clone(&worker);
            let shutdown = shutdown.clone();
            async move { worker.run(shutdown).await }
        });

        for _ in 0..200 {
            if !store.rows().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        shutdown.cancel();
        handle.await.unwrap();

        assert_eq!(store.rows().len(), 1);
        assert_eq!(store.rows()[0].sensor_id, r.sensor_id);
        assert!(queue.is_empty());

        let stats = worker.stats().snapshot();
        assert_eq!(stats.failed_cycles, 2);
        assert_eq!(stats.committed_batches, 1);
        assert_eq!(stats.saved_rows, 1);
    }
}
