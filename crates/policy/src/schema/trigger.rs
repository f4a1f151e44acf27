//! Trigger variants: when a policy produces jobs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use daskeeper_core::GeoPoint;

/// A declared trigger. Each trigger of a policy fires independently.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Trigger {
    /// Time-driven: recurring cron or a one-shot fixed date.
    Schedule { spec: ScheduleSpec },
    /// Metric-driven, edge-triggered. Expression grammar:
    /// `storage.utilization <op> <number>`.
    Condition { expression: String },
    /// Fires only when explicitly invoked through the API surface.
    OnDemand { api_path: String },
    /// Event-feed-driven condition specialization: fires when a feed
    /// observation lands inside the geofence, attaching a protection
    /// window to the produced jobs.
    Event {
        source: String,
        geofence: Geofence,
        window: ProtectionSpec,
    },
}

impl Trigger {
    /// Stable kind tag, used for job rows and duplicate suppression.
    pub fn kind(&self) -> &'static str {
        match self {
            Trigger::Schedule { .. } => "schedule",
            Trigger::Condition { .. } => "condition",
            Trigger::OnDemand { .. } => "on-demand",
            Trigger::Event { .. } => "event",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ScheduleSpec {
    /// Standard five-field cron expression (six-field accepted as-is).
    Cron { cron: String },
    /// Fires at most once, then the trigger instance is retired.
    Date { date: DateTime<Utc> },
}

/// Geographic boundary an event position must fall inside.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Geofence {
    pub center: GeoPoint,
    pub radius_km: f64,
}

impl Geofence {
    pub fn contains(&self, point: &GeoPoint) -> bool {
        self.center.distance_km(point) <= self.radius_km
    }
}

/// Spatial/temporal extent protected around a qualifying event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ProtectionSpec {
    pub radius_km: f64,
    pub dt_seconds: i64,
}

/// Concrete window attached to a job's trigger snapshot when an event
/// trigger fires, so the executor knows what to protect.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProtectionWindow {
    pub center: GeoPoint,
    pub radius_km: f64,
    pub event_time: DateTime<Utc>,
    pub dt_seconds: i64,
}
