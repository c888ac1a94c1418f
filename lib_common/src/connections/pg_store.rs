//! Long-term `sensor_data` storage.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::Pool;
use uuid::Uuid;

use super::pg_pool::{pool_error, query_error};
use crate::core::queue::{ReadingStore, StorageError};
use crate::models::SensorDataRow;

// One statement per batch: the column arrays are zipped back into rows server-side.
const INSERT_SQL: &str = "
    INSERT INTO sensor_data (sensor_id, actor_id, time_stamp, coordinates)
    SELECT s, a, t, point(lat, lon)
    FROM UNNEST($1::uuid[], $2::uuid[], $3::timestamptz[], $4::float8[], $5::float8[])
        AS batch(s, a, t, lat, lon)
";

/// Bulk writer for drained readings.
#[derive(Clone)]
pub struct PgReadingStore {
    pool: Pool,
}

impl PgReadingStore {
    /// Wraps an existing pool.
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ReadingStore for PgReadingStore {
    async fn save(&self, rows: &[SensorDataRow]) -> Result<usize, StorageError> {
        if rows.is_empty() {
            return Ok(0);
        }

        let sensor_ids: Vec<Uuid> = rows.iter().map(|r| r.sensor_id).collect();
        let actor_ids: Vec<Uuid> = rows.iter().map(|r| r.actor_id).collect();
        let time_stamps: Vec<DateTime<Utc>> = rows.iter().map(|r| r.time_stamp).collect();
        let latitudes: Vec<f64> = rows.iter().map(|r| r.coordinates.latitude).collect();
        let longitudes: Vec<f64> = rows.iter().map(|r| r.coordinates.longitude).collect();

        let client = self.pool.get().await.map_err(pool_error)?;
        let written = client
            .execute(INSERT_SQL, &[&sensor_ids, &actor_ids, &time_stamps, &latitudes, &longitudes])
            .await
            .map_err(query_error)?;

        Ok(written as usize)
    }
}
