//! Load-time validation pass over a parsed policy document.
//!
//! Every check here is fatal to the whole document: a policy file either
//! loads completely or not at all.

use std::str::FromStr;

use cron::Schedule;

use crate::condition::{ConditionExpr, MetadataPredicate};
use crate::schema::{Action, PolicySpec, ScheduleSpec, Trigger};

/// Normalize a 5-field cron expression to 6-field by prepending "0 " for
/// seconds.
///
/// The `cron` crate requires 6 fields: `sec min hour day-of-month month
/// day-of-week`. Policy YAML uses standard 5-field cron.
pub fn normalize_cron(cron_5field: &str) -> String {
    let trimmed = cron_5field.trim();
    let field_count = trimmed.split_whitespace().count();
    if field_count == 5 {
        format!("0 {}", trimmed)
    } else {
        trimmed.to_string()
    }
}

/// Parse-check a cron expression after normalization.
pub fn validate_cron(expr: &str) -> Result<(), String> {
    Schedule::from_str(&normalize_cron(expr))
        .map(|_| ())
        .map_err(|e| format!("cron expression '{expr}' does not parse: {e}"))
}

/// Validate all policies of one document. Returns the first problem found.
pub(crate) fn validate_specs(specs: &[PolicySpec]) -> Result<(), String> {
    let mut seen_names = std::collections::HashSet::new();
    for spec in specs {
        if !seen_names.insert(spec.name.as_str()) {
            return Err(format!("duplicate policy name '{}'", spec.name));
        }
        validate_spec(spec).map_err(|e| format!("policy '{}': {e}", spec.name))?;
    }
    Ok(())
}

fn validate_spec(spec: &PolicySpec) -> Result<(), String> {
    if spec.selector.data_type.is_empty() {
        return Err("selector.data_type must not be empty".to_string());
    }
    if spec.actions.is_empty() {
        return Err("policy declares no actions".to_string());
    }

    for trigger in &spec.triggers {
        validate_trigger(trigger)?;
    }
    for action in &spec.actions {
        validate_action(action)?;
    }
    Ok(())
}

fn validate_trigger(trigger: &Trigger) -> Result<(), String> {
    match trigger {
        Trigger::Schedule { spec: ScheduleSpec::Cron { cron } } => validate_cron(cron),
        Trigger::Schedule { spec: ScheduleSpec::Date { .. } } => Ok(()),
        Trigger::Condition { expression } => expression
            .parse::<ConditionExpr>()
            .map(|_| ())
            .map_err(|e| format!("condition trigger: {e}")),
        Trigger::OnDemand { api_path } => {
            if api_path.is_empty() {
                Err("on-demand trigger has an empty api_path".to_string())
            } else {
                Ok(())
            }
        }
        Trigger::Event { source, geofence, window } => {
            if source.is_empty() {
                return Err("event trigger has an empty source".to_string());
            }
            if !geofence.center.is_valid() {
                return Err(format!(
                    "geofence center ({}, {}) is not a valid coordinate",
                    geofence.center.lat, geofence.center.lon
                ));
            }
            if geofence.radius_km <= 0.0 {
                return Err("geofence radius_km must be positive".to_string());
            }
            if window.radius_km <= 0.0 || window.dt_seconds < 0 {
                return Err("event protection window must have positive extent".to_string());
            }
            Ok(())
        }
    }
}

fn validate_action(action: &Action) -> Result<(), String> {
    match action {
        Action::Retention(spec) => {
            if spec.retention_time < -1 {
                return Err(format!(
                    "retention_time {} is out of range (-1 disables deletion)",
                    spec.retention_time
                ));
            }
            if spec.warning_time < 0 {
                return Err("warning_time must not be negative".to_string());
            }
            for exception in &spec.exceptions {
                exception
                    .condition
                    .parse::<MetadataPredicate>()
                    .map_err(|e| format!("retention exception: {e}"))?;
                if exception.retention_time < -1 {
                    return Err(format!(
                        "exception retention_time {} is out of range",
                        exception.retention_time
                    ));
                }
            }
            Ok(())
        }
        Action::Transform(spec) => {
            if spec.methods.is_empty() {
                return Err("transform action declares no methods".to_string());
            }
            for method in &spec.methods {
                if method.factor == 0 {
                    return Err("transform factor must be a positive integer".to_string());
                }
                if let Some([start, end]) = method.apply_to_channels {
                    if start >= end {
                        return Err(format!(
                            "apply_to_channels [{start}, {end}) is empty"
                        ));
                    }
                }
            }
            Ok(())
        }
        Action::Roi(spec) => {
            let [start, end] = spec.channel_range;
            if start >= end {
                return Err(format!("roi channel_range [{start}, {end}) is empty"));
            }
            Ok(())
        }
        Action::TimeWindow(spec) => {
            if spec.from > spec.to {
                return Err("time-window 'from' is after 'to'".to_string());
            }
            Ok(())
        }
        Action::EventProximity(spec) => {
            if spec.radius_km <= 0.0 || spec.dt_seconds < 0 {
                return Err("event-proximity window must have positive extent".to_string());
            }
            if spec.event_source.is_empty() {
                return Err("event-proximity has an empty event_source".to_string());
            }
            Ok(())
        }
    }
}
