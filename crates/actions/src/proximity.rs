//! Event-proximity retention: protect data near an external event.
//!
//! The protection window (event position, radius, time, Δt) is attached to
//! the job's trigger snapshot by the scheduler when the event trigger
//! fires. Proximity is decided at unit granularity: a unit whose surveyed
//! position lies within `radius_km` and whose timestamp falls within
//! `±dt_seconds` of the event is retained; everything else degrades to
//! deletion. Units without a surveyed position cannot be proven close and
//! are treated as outside the window.

use chrono::Duration;
use tracing::info;

use daskeeper_core::DataUnit;
use daskeeper_policy::{Action, ProtectionWindow, ProximitySpec};

use crate::plugin::{spec_mismatch, ActionPlugin, ExecutionContext, ExecutionError, Outcome};

pub struct EventProximityPlugin;

fn within_window(unit: &DataUnit, window: &ProtectionWindow) -> bool {
    let near = unit
        .position
        .map(|pos| window.center.distance_km(&pos) <= window.radius_km)
        .unwrap_or(false);
    if !near {
        return false;
    }
    let dt = Duration::seconds(window.dt_seconds);
    unit.created_at >= window.event_time - dt && unit.created_at <= window.event_time + dt
}

impl ActionPlugin for EventProximityPlugin {
    fn name(&self) -> &'static str {
        "event-proximity"
    }

    fn execute(
        &self,
        unit: &DataUnit,
        action: &Action,
        window: Option<&ProtectionWindow>,
        ctx: &ExecutionContext,
    ) -> Result<Outcome, ExecutionError> {
        let ProximitySpec { event_source, .. } = match action {
            Action::EventProximity(spec) => spec,
            other => return Err(spec_mismatch(self.name(), other)),
        };

        let window = window.ok_or_else(|| {
            ExecutionError::constraint(format!(
                "event-proximity for '{event_source}' requires a protection window \
                 in the trigger snapshot"
            ))
        })?;

        if within_window(unit, window) {
            let bytes = ctx.store.size_of(unit)?;
            info!(unit = %unit.display_key(), "unit protected by event proximity");
            return Ok(Outcome::unchanged("proximity:protected", bytes));
        }

        let reclaimed = ctx.store.delete(unit)?;
        info!(unit = %unit.display_key(), "deleted unit outside event proximity window");
        Ok(Outcome {
            applied_ops: vec!["delete".to_string()],
            bytes_before: reclaimed,
            bytes_after: 0,
            warning: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::sync::Arc;

    use chrono::{TimeZone, Utc};

    use daskeeper_core::{Block, GeoPoint, ManualClock, MemoryStore};

    fn event_time() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn window() -> ProtectionWindow {
        ProtectionWindow {
            center: GeoPoint { lat: 63.43, lon: 10.39 },
            radius_km: 5.0,
            event_time: event_time(),
            dt_seconds: 600,
        }
    }

    fn action() -> Action {
        Action::EventProximity(ProximitySpec {
            radius_km: 5.0,
            dt_seconds: 600,
            event_source: "ais".to_string(),
        })
    }

    fn unit(position: Option<GeoPoint>, offset_secs: i64) -> DataUnit {
        DataUnit {
            path: PathBuf::from("/data/a.h5"),
            data_type: "hdf5".to_string(),
            tags: vec![],
            attributes: HashMap::new(),
            created_at: event_time() + chrono::Duration::seconds(offset_secs),
            size_bytes: 0,
            channel_range: (0, 1),
            position,
        }
    }

    fn ctx(store: Arc<MemoryStore>) -> ExecutionContext {
        ExecutionContext {
            clock: Arc::new(ManualClock::new(event_time())),
            store,
        }
    }

    #[test]
    fn nearby_recent_unit_is_protected() {
        let store = Arc::new(MemoryStore::new());
        store.insert("/data/a.h5", Block::new(vec![vec![1.0]], 0));
        let u = unit(Some(GeoPoint { lat: 63.44, lon: 10.40 }), 60);

        let outcome = EventProximityPlugin
            .execute(&u, &action(), Some(&window()), &ctx(store.clone()))
            .unwrap();
        assert_eq!(outcome.applied_ops, vec!["proximity:protected"]);
        assert!(store.contains(&u.path));
    }

    #[test]
    fn distant_unit_is_deleted() {
        let store = Arc::new(MemoryStore::new());
        store.insert("/data/a.h5", Block::new(vec![vec![1.0]], 0));
        // Oslo is far outside a 5 km fence around Trondheim.
        let u = unit(Some(GeoPoint { lat: 59.91, lon: 10.75 }), 60);

        let outcome = EventProximityPlugin
            .execute(&u, &action(), Some(&window()), &ctx(store.clone()))
            .unwrap();
        assert_eq!(outcome.applied_ops, vec!["delete"]);
        assert!(!store.contains(&u.path));
    }

    #[test]
    fn nearby_but_stale_unit_is_deleted() {
        let store = Arc::new(MemoryStore::new());
        store.insert("/data/a.h5", Block::new(vec![vec![1.0]], 0));
        let u = unit(Some(GeoPoint { lat: 63.44, lon: 10.40 }), 3_600);

        let outcome = EventProximityPlugin
            .execute(&u, &action(), Some(&window()), &ctx(store))
            .unwrap();
        assert_eq!(outcome.applied_ops, vec!["delete"]);
    }

    #[test]
    fn unit_without_position_counts_as_outside() {
        let store = Arc::new(MemoryStore::new());
        store.insert("/data/a.h5", Block::new(vec![vec![1.0]], 0));
        let u = unit(None, 0);

        let outcome = EventProximityPlugin
            .execute(&u, &action(), Some(&window()), &ctx(store))
            .unwrap();
        assert_eq!(outcome.applied_ops, vec!["delete"]);
    }

    #[test]
    fn missing_window_is_a_constraint_error() {
        let store = Arc::new(MemoryStore::new());
        let u = unit(None, 0);
        let err = EventProximityPlugin
            .execute(&u, &action(), None, &ctx(store))
            .unwrap_err();
        assert_eq!(err.kind, crate::plugin::ErrorKind::Constraint);
    }
}
