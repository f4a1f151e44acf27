//! Action variants: what a fired trigger does to matched units.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::document::default_true;

/// A declared action. When a trigger fires, all of a policy's actions run
/// in declaration order against the matched units.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Action {
    Retention(RetentionSpec),
    Transform(TransformSpec),
    Roi(RoiSpec),
    TimeWindow(WindowSpec),
    EventProximity(ProximitySpec),
}

impl Action {
    /// Registry key of the plugin executing this action.
    pub fn kind(&self) -> &'static str {
        match self {
            Action::Retention(_) => "retention",
            Action::Transform(_) => "transform",
            Action::Roi(_) => "roi",
            Action::TimeWindow(_) => "time-window",
            Action::EventProximity(_) => "event-proximity",
        }
    }
}

// ── Retention ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetentionSpec {
    /// Overrides the policy-level strategy when set.
    #[serde(default)]
    pub strategy: Option<String>,
    pub time_unit: TimeUnit,
    /// Age threshold in `time_unit`; `-1` means never delete.
    pub retention_time: i64,
    /// Width of the warning band before the deletion threshold, in
    /// `time_unit`. Zero disables warnings.
    #[serde(default)]
    pub warning_time: i64,
    /// Evaluated in declared order; the first matching condition's
    /// `retention_time` overrides the base one.
    #[serde(default)]
    pub exceptions: Vec<RetentionException>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct RetentionException {
    /// Metadata predicate, grammar: `metadata.<key> == '<value>'`.
    pub condition: String,
    /// `-1` means never delete.
    pub retention_time: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    Second,
    Minute,
    Hour,
    Day,
}

impl TimeUnit {
    pub fn seconds(&self) -> f64 {
        match self {
            TimeUnit::Second => 1.0,
            TimeUnit::Minute => 60.0,
            TimeUnit::Hour => 3_600.0,
            TimeUnit::Day => 86_400.0,
        }
    }
}

// ── Transform (downsampling) ────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransformSpec {
    #[serde(default)]
    pub operations: Vec<String>,
    /// When false the transformed result replaces the source unit; when
    /// true it is written alongside.
    #[serde(default = "default_true")]
    pub preserve_original: bool,
    pub methods: Vec<TransformMethod>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct TransformMethod {
    pub dimension: Dimension,
    pub algorithm: Algorithm,
    /// Group size; must be a positive integer.
    pub factor: u32,
    /// Half-open channel subrange the method applies to; the whole unit
    /// when omitted.
    #[serde(default)]
    pub apply_to_channels: Option<[u32; 2]>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Dimension {
    Temporal,
    Spatial,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Algorithm {
    Mean,
    Sum,
}

// ── ROI extraction ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoiSpec {
    /// Half-open channel range `[start, end)` sliced into a new unit.
    pub channel_range: [u32; 2],
}

// ── Time-window retention ───────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WindowSpec {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

// ── Event-proximity retention ───────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProximitySpec {
    pub radius_km: f64,
    pub dt_seconds: i64,
    pub event_source: String,
}
