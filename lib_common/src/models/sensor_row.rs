//! Long-term storage rows.
//!
//! The drain worker turns each queued payload back into a `Reading` and then into
//! a `SensorDataRow`. Payloads that are empty or fail to parse map to `None` and
//! are dropped by the caller.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::reading::Reading;

/// A geographic point as stored in the `coordinates` column (x = latitude, y = longitude).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinates {
    /// Degrees north.
    pub latitude: f64,
    /// Degrees east.
    pub longitude: f64,
}

/// One row of the long-term `sensor_data` table. The database assigns the id.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorDataRow {
    /// The sensor that produced the sample.
    pub sensor_id: Uuid,
    /// The actor carrying the sensor.
    pub actor_id: Uuid,
    /// When the sample was taken.
    pub time_stamp: DateTime<Utc>,
    /// Where the actor was.
    pub coordinates: Coordinates,
}

impl From<Reading> for SensorDataRow {
    fn from(reading: Reading) -> Self {
        Self {
            sensor_id: reading.sensor_id,
            actor_id: reading.actor_id,
            time_stamp: reading.time_stamp,
            coordinates: Coordinates {
                latitude: reading.latitude,
                longitude: reading.longitude,
            },
        }
    }
}

impl SensorDataRow {
    /// Maps a durable queue payload to a storage row.
    ///
    /// Returns `None` for an empty payload or one that is not a serialized `Reading`.
    pub fn from_payload(payload: &str) -> Option<Self> {
        if payload.trim().is_empty() {
            return None;
        }
        match serde_json::from_str::<Reading>(payload) {
            Ok(reading) => Some(reading.into()),
            Err(e) => {
                tracing::debug!(error = %e, "queue payload is not a reading");
                None
            }
        }
    }
}
