//! # PostgreSQL Durable Queue
//!
//! The `stack` table as a durable queue. Appends are single auto-committed inserts
//! on any pooled connection. A pop session pins one connection for the lifetime of
//! its transaction and deletes rows with `FOR UPDATE SKIP LOCKED`, so concurrent
//! sessions never see each other's rows and never block on them.
//!
//! Dropping a session with an open transaction detaches its connection from the
//! pool and closes it; the server then rolls the transaction back.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::{Object, Pool};
use tokio_postgres::Row;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::pg_pool::{pool_error, query_error};
use crate::core::queue::{DurableQueue, QueueEntry, QueueProducer, QueueSession, SessionState, StorageError};

const APPEND_SQL: &str = "INSERT INTO stack (value) VALUES ($1)";

const POP_SQL: &str = "
    DELETE FROM stack
    WHERE id IN (
        SELECT id FROM stack
        ORDER BY inserted_at DESC, id DESC
        LIMIT $1
        FOR UPDATE SKIP LOCKED
    )
    RETURNING id, value, inserted_at
";

const SIZE_SQL: &str = "SELECT count(*) FROM stack";

/// Durable queue over a shared pool.
#[derive(Clone)]
pub struct PgDurableQueue {
    pool: Pool,
}

impl PgDurableQueue {
    /// Wraps an existing pool.
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl QueueProducer for PgDurableQueue {
    async fn append(&self, payload: String, cancel: CancellationToken) -> Result<(), StorageError> {
        let insert = async {
            let client = self.pool.get().await.map_err(pool_error)?;
            client.execute(APPEND_SQL, &[&payload]).await.map_err(query_error)?;
            Ok(())
        };

        tokio::select! {
            _ = cancel.cancelled() => Err(StorageError::Cancelled),
            result = insert => result,
        }
    }
}

#[async_trait]
impl DurableQueue for PgDurableQueue {
    async fn open_session(&self) -> Result<Box<dyn QueueSession>, StorageError> {
        Ok(Box::new(PgQueueSession {
            pool: self.pool.clone(),
            client: None,
            state: SessionState::Idle,
        }))
    }

    async fn size(&self) -> Result<u64, StorageError> {
        let client = self.pool.get().await.map_err(pool_error)?;
        let row = client.query_one(SIZE_SQL, &[]).await.map_err(query_error)?;
        let count: i64 = row.try_get(0).map_err(query_error)?;
        Ok(count.max(0) as u64)
    }
}

/// One pop transaction on a pinned connection.
pub struct PgQueueSession {
    pool: Pool,
    client: Option<Object>,
    state: SessionState,
}

impl PgQueueSession {
    async fn finish(&mut self, statement: &str, next: SessionState) -> Result<(), StorageError> {
        if !self.state.is_open() {
            return Err(StorageError::NoActiveTransaction);
        }
        let client = self.client.take().ok_or(StorageError::NoActiveTransaction)?;

        // Either way the transaction is over once the statement returns.
        self.state = next;
        match client.batch_execute(statement).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.state = SessionState::RolledBack;
                drop(Object::take(client));
                Err(query_error(e))
            }
        }
    }
}

fn entry_from_row(row: &Row) -> Result<QueueEntry, StorageError> {
    Ok(QueueEntry {
        id: row.try_get("id").map_err(query_error)?,
        payload: row.try_get("value").map_err(query_error)?,
        inserted_at: row.try_get::<_, DateTime<Utc>>("inserted_at").map_err(query_error)?,
    })
}

#[async_trait]
impl QueueSession for PgQueueSession {
    async fn begin_pop(&mut self, batch_size: usize) -> Result<Vec<QueueEntry>, StorageError> {
        if !self.state.is_open() {
            let client = self.pool.get().await.map_err(pool_error)?;
            client.batch_execute("BEGIN").await.map_err(query_error)?;
            self.client = Some(client);
            self.state = SessionState::PopOpen;
        } else {
            debug!("begin_pop reusing the open transaction");
        }

        let client = self.client.as_ref().ok_or(StorageError::NoActiveTransaction)?;
        let limit = i64::try_from(batch_size).unwrap_or(i64::MAX);
        let rows = client.query(POP_SQL, &[&limit]).await.map_err(query_error)?;

        let mut entries = rows.iter().map(entry_from_row).collect::<Result<Vec<_>, _>>()?;
        // RETURNING carries no order.
        entries.sort_by(|a, b| (b.inserted_at, b.id).cmp(&(a.inserted_at, a.id)));
        Ok(entries)
    }

    async fn commit(&mut self) -> Result<(), StorageError> {
        self.finish("COMMIT", SessionState::Committed).await
    }

    async fn rollback(&mut self) -> Result<(), StorageError> {
        self.finish("ROLLBACK", SessionState::RolledBack).await
    }

    fn state(&self) -> SessionState {
        self.state
    }
}

impl Drop for PgQueueSession {
    fn drop(&mut self) {
        if let Some(client) = self.client.take() {
            if self.state.is_open() {
                warn!("Queue session dropped with an open transaction, closing its connection");
                drop(Object::take(client));
            }
        }
    }
}
