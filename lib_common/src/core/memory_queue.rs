//! # In-Process Durable Queue
//!
//! A `DurableQueue` backed by process memory with the same transactional pop
//! semantics as the PostgreSQL backend: popped rows disappear from every other
//! session until the popping session commits (gone for good) or rolls back (back
//! in the queue). Used for single-binary development runs and in tests.
//!
//! Nothing survives a restart, so "durable" only holds for the process lifetime.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

use super::queue::{DurableQueue, QueueEntry, QueueProducer, QueueSession, SessionState, StorageError};
use crate::models::SensorDataRow;

#[derive(Debug, Default)]
struct QueueInner {
    next_id: i64,
    visible: Vec<QueueEntry>,
}

fn lock(inner: &Mutex<QueueInner>) -> MutexGuard<'_, QueueInner> {
    // A panic while holding the lock cannot leave the row list half-updated.
    inner.lock().unwrap_or_else(|e| e.into_inner())
}

/// Shared handle to an in-memory queue. Clones see the same rows.
#[derive(Debug, Clone, Default)]
pub struct MemoryQueue {
    inner: Arc<Mutex<QueueInner>>,
}

impl MemoryQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rows visible to new pops.
    pub fn len(&self) -> usize {
        lock(&self.inner).visible.len()
    }

    /// `true` when no row is visible.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Opens a session without boxing it.
    pub fn session(&self) -> MemorySession {
        MemorySession {
            inner: Arc::clone(&self.inner),
            state: SessionState::Idle,
            pending: Vec::new(),
        }
    }
}

#[async_trait]
impl QueueProducer for MemoryQueue {
    async fn append(&self, payload: String, cancel: CancellationToken) -> Result<(), StorageError> {
        if cancel.is_cancelled() {
            return Err(StorageError::Cancelled);
        }
        let mut inner = lock(&self.inner);
        inner.next_id += 1;
        let entry = QueueEntry {
            id: inner.next_id,
            payload,
            inserted_at: Utc::now(),
        };
        inner.visible.push(entry);
        Ok(())
    }
}

#[async_trait]
impl DurableQueue for MemoryQueue {
    async fn open_session(&self) -> Result<Box<dyn QueueSession>, StorageError> {
        Ok(Box::new(self.session()))
    }

    async fn size(&self) -> Result<u64, StorageError> {
        Ok(self.len() as u64)
    }
}

/// One transaction scope over a [`MemoryQueue`].
#[derive(Debug)]
pub struct MemorySession {
    inner: Arc<Mutex<QueueInner>>,
    state: SessionState,
    pending: Vec<QueueEntry>,
}

impl MemorySession {
    fn restore_pending(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let mut inner = lock(&self.inner);
        inner.visible.append(&mut self.pending);
    }
}

#[async_trait]
impl QueueSession for MemorySession {
    async fn begin_pop(&mut self, batch_size: usize) -> Result<Vec<QueueEntry>, StorageError> {
        self.state = SessionState::PopOpen;

        let mut inner = lock(&self.inner);
        inner
            .visible
            .sort_by(|a, b| (b.inserted_at, b.id).cmp(&(a.inserted_at, a.id)));
        let take = batch_size.min(inner.visible.len());
        let popped: Vec<QueueEntry> = inner.visible.drain(..take).collect();
        drop(inner);

        self.pending.extend(popped.iter().cloned());
        Ok(popped)
    }

    async fn commit(&mut self) -> Result<(), StorageError> {
        if !self.state.is_open() {
            return Err(StorageError::NoActiveTransaction);
        }
        self.pending.clear();
        self.state = SessionState::Committed;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), StorageError> {
        if !self.state.is_open() {
            return Err(StorageError::NoActiveTransaction);
        }
        self.restore_pending();
        self.state = SessionState::RolledBack;
        Ok(())
    }

    fn state(&self) -> SessionState {
        self.state
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        if self.state.is_open() {
            self.restore_pending();
        }
    }
}

/// In-memory long-term store, the counterpart of [`MemoryQueue`].
#[derive(Debug, Clone, Default)]
pub struct MemoryReadingStore {
    rows: Arc<Mutex<Vec<SensorDataRow>>>,
}

impl MemoryReadingStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// A copy of every saved row, in save order.
    pub fn rows(&self) -> Vec<SensorDataRow> {
        self.rows.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl super::queue::ReadingStore for MemoryReadingStore {
    async fn save(&self, rows: &[SensorDataRow]) -> Result<usize, StorageError> {
        let mut stored = self.rows.lock().unwrap_or_else(|e| e.into_inner());
        stored.extend_from_slice(rows);
        Ok(rows.len())
    }
}
