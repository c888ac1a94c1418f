//! # PostgreSQL Pool and Schema Bootstrap
//!
//! Builds the shared `deadpool_postgres` pool used by the durable queue and the
//! long-term store, and creates both tables if they do not exist yet. This is a
//! startup convenience, not a migration system.

use deadpool_postgres::{Config as DeadpoolConfig, ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime};
use tokio_postgres::NoTls;
use tracing::info;

use crate::core::queue::StorageError;

const SCHEMA_SQL: &str = "
    CREATE TABLE IF NOT EXISTS stack (
        id          BIGSERIAL PRIMARY KEY,
        value       TEXT NOT NULL,
        inserted_at TIMESTAMPTZ NOT NULL DEFAULT clock_timestamp()
    );
    CREATE INDEX IF NOT EXISTS stack_inserted_at_idx ON stack (inserted_at DESC, id DESC);
    CREATE TABLE IF NOT EXISTS sensor_data (
        id          BIGSERIAL PRIMARY KEY,
        sensor_id   UUID NOT NULL,
        actor_id    UUID NOT NULL,
        time_stamp  TIMESTAMPTZ NOT NULL,
        coordinates POINT NOT NULL
    );
";

/// Creates a connection pool for `database_url` with at most `max_size` connections.
///
/// No connection is opened until the first checkout.
pub fn create_pool(database_url: &str, max_size: usize) -> Result<Pool, StorageError> {
    let mut config = DeadpoolConfig::new();
    config.url = Some(database_url.to_string());
    config.manager = Some(ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    });
    config.pool = Some(PoolConfig::new(max_size));

    config
        .create_pool(Some(Runtime::Tokio1), NoTls)
        .map_err(|e| StorageError::Connection(format!("failed to create database pool: {}", e)))
}

/// Creates the `stack` and `sensor_data` tables when absent.
pub async fn ensure_schema(pool: &Pool) -> Result<(), StorageError> {
    let client = pool.get().await.map_err(pool_error)?;
    client.batch_execute(SCHEMA_SQL).await.map_err(query_error)?;
    info!("Database schema verified");
    Ok(())
}

pub(crate) fn pool_error(e: deadpool_postgres::PoolError) -> StorageError {
    StorageError::Connection(e.to_string())
}

pub(crate) fn query_error(e: tokio_postgres::Error) -> StorageError {
    StorageError::Query(e.to_string())
}
