//! Candidate data units — the archive files a policy may act on.
//!
//! The on-disk dataset format is not this crate's concern; only the
//! addressing metadata (type, tags, path, time, channel range) is modeled.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::event::GeoPoint;

/// Metadata describing one archive file known to the engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DataUnit {
    /// Absolute path of the dataset.
    pub path: PathBuf,
    /// Dataset format tag, e.g. "hdf5" or "csv".
    pub data_type: String,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Custom metadata; exception predicates read these keys.
    #[serde(default)]
    pub attributes: HashMap<String, String>,
    /// Acquisition timestamp of the first sample.
    pub created_at: DateTime<Utc>,
    pub size_bytes: u64,
    /// Half-open spatial index range `[start, end)` of the fiber channels.
    pub channel_range: (u32, u32),
    /// Reference position of the covered fiber section, when surveyed.
    #[serde(default)]
    pub position: Option<GeoPoint>,
}

impl DataUnit {
    /// Age of the unit in seconds relative to `now`.
    ///
    /// Units with a timestamp in the future have age 0.
    pub fn age_seconds(&self, now: DateTime<Utc>) -> f64 {
        let secs = (now - self.created_at).num_milliseconds() as f64 / 1_000.0;
        secs.max(0.0)
    }

    pub fn channel_count(&self) -> u32 {
        self.channel_range.1.saturating_sub(self.channel_range.0)
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    /// Stable display key used in job names and log lines.
    pub fn display_key(&self) -> String {
        self.path.display().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_at(created_at: DateTime<Utc>) -> DataUnit {
        DataUnit {
            path: PathBuf::from("/data/das/d1.h5"),
            data_type: "hdf5".to_string(),
            tags: vec!["raw".to_string()],
            attributes: HashMap::new(),
            created_at,
            size_bytes: 1024,
            channel_range: (0, 128),
            position: None,
        }
    }

    #[test]
    fn age_in_seconds() {
        let now = Utc::now();
        let unit = unit_at(now - chrono::Duration::seconds(90));
        let age = unit.age_seconds(now);
        assert!((age - 90.0).abs() < 0.01);
    }

    #[test]
    fn future_timestamp_clamps_to_zero() {
        let now = Utc::now();
        let unit = unit_at(now + chrono::Duration::hours(1));
        assert_eq!(unit.age_seconds(now), 0.0);
    }

    #[test]
    fn channel_count_from_half_open_range() {
        let unit = unit_at(Utc::now());
        assert_eq!(unit.channel_count(), 128);
    }
}
