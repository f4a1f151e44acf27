//! External inputs to trigger evaluation: geographic events and metric probes.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// WGS84 coordinate pair.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

const EARTH_RADIUS_KM: f64 = 6_371.0;

impl GeoPoint {
    pub fn is_valid(&self) -> bool {
        (-90.0..=90.0).contains(&self.lat) && (-180.0..=180.0).contains(&self.lon)
    }

    /// Great-circle distance to `other` in kilometers (haversine).
    pub fn distance_km(&self, other: &GeoPoint) -> f64 {
        let dlat = (other.lat - self.lat).to_radians();
        let dlon = (other.lon - self.lon).to_radians();
        let a = (dlat / 2.0).sin().powi(2)
            + self.lat.to_radians().cos() * other.lat.to_radians().cos() * (dlon / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_KM * a.sqrt().atan2((1.0 - a).sqrt())
    }
}

/// One observation from an external event feed (e.g. an AIS vessel position).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalEvent {
    /// Feed identifier the policy trigger binds to, e.g. "ais".
    pub source: String,
    pub position: GeoPoint,
    pub observed_at: DateTime<Utc>,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
}

/// Latest reading from the storage-utilization probe.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MetricSnapshot {
    pub storage_utilization_pct: f64,
    pub observed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_coordinates() {
        assert!(GeoPoint { lat: 63.43, lon: 10.39 }.is_valid());
        assert!(!GeoPoint { lat: 91.0, lon: 0.0 }.is_valid());
        assert!(!GeoPoint { lat: 0.0, lon: -180.5 }.is_valid());
    }

    #[test]
    fn haversine_zero_for_same_point() {
        let p = GeoPoint { lat: 63.43, lon: 10.39 };
        assert!(p.distance_km(&p) < 1e-9);
    }

    #[test]
    fn haversine_known_distance() {
        // Trondheim to Oslo, roughly 392 km great-circle.
        let trondheim = GeoPoint { lat: 63.4305, lon: 10.3951 };
        let oslo = GeoPoint { lat: 59.9139, lon: 10.7522 };
        let d = trondheim.distance_km(&oslo);
        assert!((d - 392.0).abs() < 5.0, "got {d}");
    }
}
