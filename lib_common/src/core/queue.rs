//! # Durable Queue and Storage Contracts
//!
//! The seams between the ingestion engine and whatever persists readings.
//!
//! - [`QueueProducer`]: the append side, used by the `Dispatcher` on every request.
//! - [`DurableQueue`]: a producer that can also open pop sessions, used by the
//!   `DrainWorker`.
//! - [`QueueSession`]: one transaction scope over the queue. Pops delete rows
//!   inside the open transaction; `commit` makes the deletion permanent and
//!   `rollback` makes the rows visible again.
//! - [`ReadingStore`]: the long-term table the drain worker bulk-saves into.
//!
//! ## Session State Machine
//!
//! ```text
//!   Idle ──begin_pop──► PopOpen ──commit───► Committed ─┐
//!                        │  ▲                            │ begin_pop opens
//!                        │  └─begin_pop (reuses txn)     │ a new transaction
//!                        └────rollback─► RolledBack ─────┘
//! ```
//!
//! A second `begin_pop` while `PopOpen` reuses the open transaction instead of
//! starting another one; rows from both pops are committed or rolled back together.
//! `Committed` and `RolledBack` behave like `Idle`. `commit` or `rollback` outside
//! `PopOpen` fails with [`StorageError::NoActiveTransaction`]. Dropping a session
//! while `PopOpen` rolls the transaction back.
//!
//! ## Pop Order
//!
//! Pops return the most recently inserted rows first (LIFO). Under a sustained
//! insert rate older rows can wait indefinitely; the drain worker records the age of
//! the oldest row it sees so that starvation is visible.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::models::SensorDataRow;

/// Errors raised by queue and store backends.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// `commit` or `rollback` called with no open transaction.
    #[error("no active transaction: it has already been committed or rolled back")]
    NoActiveTransaction,
    /// The caller's cancellation token fired before the operation finished.
    #[error("storage operation cancelled")]
    Cancelled,
    /// A connection could not be acquired.
    #[error("failed to acquire a database connection: {0}")]
    Connection(String),
    /// A statement failed.
    #[error("query execution failed: {0}")]
    Query(String),
}

/// A row popped from the durable queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    /// Monotonically increasing row id.
    pub id: i64,
    /// Opaque serialized reading.
    pub payload: String,
    /// When the row was appended.
    pub inserted_at: DateTime<Utc>,
}

/// Lifecycle of a [`QueueSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No transaction has been opened yet.
    Idle,
    /// A pop transaction is open.
    PopOpen,
    /// The last transaction was committed.
    Committed,
    /// The last transaction was rolled back.
    RolledBack,
}

impl SessionState {
    /// `true` while a transaction is open.
    pub fn is_open(self) -> bool {
        self == SessionState::PopOpen
    }
}

/// The append side of the durable queue.
#[async_trait]
pub trait QueueProducer: Send + Sync {
    /// Inserts one payload in its own auto-committed statement.
    ///
    /// Implementations stop promptly once `cancel` fires and return
    /// [`StorageError::Cancelled`]. Failures are not retried here.
    async fn append(&self, payload: String, cancel: CancellationToken) -> Result<(), StorageError>;
}

/// A queue that can also be drained.
#[async_trait]
pub trait DurableQueue: QueueProducer {
    /// Opens a fresh session with its own transaction scope.
    async fn open_session(&self) -> Result<Box<dyn QueueSession>, StorageError>;

    /// Number of rows currently visible.
    async fn size(&self) -> Result<u64, StorageError>;
}

/// One transaction scope over the durable queue. See the module docs for the state machine.
#[async_trait]
pub trait QueueSession: Send {
    /// Opens (or reuses) the transaction and deletes up to `batch_size` rows,
    /// newest first, returning them.
    async fn begin_pop(&mut self, batch_size: usize) -> Result<Vec<QueueEntry>, StorageError>;

    /// Makes the popped rows' deletion permanent.
    async fn commit(&mut self) -> Result<(), StorageError>;

    /// Restores the popped rows.
    async fn rollback(&mut self) -> Result<(), StorageError>;

    /// Current lifecycle state.
    fn state(&self) -> SessionState;
}

/// Long-term storage for drained readings.
#[async_trait]
pub trait ReadingStore: Send + Sync {
    /// Saves all rows in one bulk insert and returns how many were written.
    ///
    /// An empty slice is a successful no-op.
    async fn save(&self, rows: &[SensorDataRow]) -> Result<usize, StorageError>;
}
