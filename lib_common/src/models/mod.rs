//! # Domain Models
//!
//! The records that flow through the ingestion pipeline.
//!
//! - **`reading`**: a single position sample as posted by an actor, and the live
//!   `PositionUpdate` derived from it.
//! - **`sensor_row`**: the long-term storage row and the mapping from queued
//!   payloads into it.

/// Position readings and live position updates.
pub mod reading;
/// Long-term storage rows and queue payload mapping.
pub mod sensor_row;

pub use reading::{PositionUpdate, Reading};
pub use sensor_row::{Coordinates, SensorDataRow};
