//! Coordinate range check for incoming readings.

use thiserror::Error;

use crate::models::Reading;

/// Valid latitudes, inclusive.
pub const LATITUDE_RANGE: std::ops::RangeInclusive<f64> = -90.0..=90.0;
/// Valid longitudes, inclusive.
pub const LONGITUDE_RANGE: std::ops::RangeInclusive<f64> = -180.0..=180.0;

/// A reading whose coordinates are out of range. Carries the rejected reading.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("invalid latitude or longitude ({}, {})", .reading.latitude, .reading.longitude)]
pub struct InvalidReading {
    /// The offending reading, untouched.
    pub reading: Reading,
}

/// Accepts readings with `latitude` in `[-90, 90]` and `longitude` in `[-180, 180]`.
///
/// NaN fails both range checks.
pub fn validate(reading: Reading) -> Result<Reading, InvalidReading> {
    if LATITUDE_RANGE.contains(&reading.latitude) && LONGITUDE_RANGE.contains(&reading.longitude) {
        Ok(reading)
    } else {
        Err(InvalidReading { reading })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn reading(latitude: f64, longitude: f64) -> Reading {
        Reading {
            sensor_id: Uuid::new_v4(),
            actor_id: Uuid::new_v4(),
            time_stamp: Utc::now(),
            latitude,
            longitude,
        }
    }

    #[test]
    fn accepts_in_range_and_boundaries() {
        for (lat, lon) in [(0.0, 0.0), (90.0, 180.0), (-90.0, -180.0), (45.5, -122.6)] {
            let input = reading(lat, lon);
            assert_eq!(validate(input.clone()), Ok(input));
        }
    }

    #[test]
    fn rejects_out_of_range_and_returns_the_reading() {
        for (lat, lon) in [(90.0001, 0.0), (-91.0, 0.0), (0.0, 180.5), (0.0, -181.0), (f64::NAN, 0.0)] {
            let input = reading(lat, lon);
            let err = validate(input.clone()).unwrap_err();
            assert_eq!(err.reading.sensor_id, input.sensor_id);
            assert!(err.to_string().starts_with("invalid latitude or longitude"));
        }
    }
}
