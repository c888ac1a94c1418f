//! # Position Readings
//!
//! A `Reading` is one timestamped position sample for a sensor/actor pair. It is
//! created by the upstream producer and never mutated afterwards. Its JSON form
//! uses camelCase keys (`sensorId`, `actorId`, `timeStamp`, `latitude`,
//! `longitude`), which is both the HTTP body and the durable queue payload.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// # Reading
///
/// Identity is the `sensor_id`, but uniqueness is not enforced anywhere: a client
/// retrying a failed upload legitimately produces duplicates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reading {
    /// The sensor that produced the sample.
    pub sensor_id: Uuid,
    /// The actor carrying the sensor.
    pub actor_id: Uuid,
    /// When the sample was taken (RFC 3339 on the wire).
    pub time_stamp: DateTime<Utc>,
    /// Degrees north, valid range `[-90, 90]`.
    pub latitude: f64,
    /// Degrees east, valid range `[-180, 180]`.
    pub longitude: f64,
}

impl Reading {
    /// Serializes the reading into the opaque payload stored by the durable queue.
    pub fn to_payload(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// The live update relayed to map clients for this reading.
    pub fn position_update(&self) -> PositionUpdate {
        PositionUpdate {
            actor_id: self.actor_id,
            latitude: self.latitude,
            longitude: self.longitude,
            time_stamp: self.time_stamp,
        }
    }
}

/// # Position Update
///
/// The live payload exchanged on the real-time channel. It drops the sensor id,
/// since observers track actors, not sensors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionUpdate {
    /// The actor that moved.
    pub actor_id: Uuid,
    /// Degrees north.
    pub latitude: f64,
    /// Degrees east.
    pub longitude: f64,
    /// When the position was sampled.
    pub time_stamp: DateTime<Utc>,
}
