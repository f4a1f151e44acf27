//! Age-based retention with ordered exceptions.

use tracing::{debug, info};

use daskeeper_core::DataUnit;
use daskeeper_policy::condition::MetadataPredicate;
use daskeeper_policy::{Action, ProtectionWindow, RetentionSpec};

use crate::plugin::{spec_mismatch, ActionPlugin, ExecutionContext, ExecutionError, Outcome};

/// Sentinel retention time: never delete.
pub const RETAIN_FOREVER: i64 = -1;

pub struct RetentionPlugin;

impl RetentionPlugin {
    /// Retention time that applies to `unit`: the first declared exception
    /// whose condition matches overrides the base value. The engine does
    /// not reorder — most-specific-first is the operator's responsibility.
    fn effective_retention(spec: &RetentionSpec, unit: &DataUnit) -> Result<i64, ExecutionError> {
        for exception in &spec.exceptions {
            let predicate: MetadataPredicate = exception
                .condition
                .parse()
                .map_err(ExecutionError::format)?;
            if predicate.matches(&unit.attributes) {
                debug!(
                    unit = %unit.display_key(),
                    condition = %exception.condition,
                    retention_time = exception.retention_time,
                    "retention exception matched"
                );
                return Ok(exception.retention_time);
            }
        }
        Ok(spec.retention_time)
    }
}

impl ActionPlugin for RetentionPlugin {
    fn name(&self) -> &'static str {
        "retention"
    }

    fn execute(
        &self,
        unit: &DataUnit,
        action: &Action,
        _window: Option<&ProtectionWindow>,
        ctx: &ExecutionContext,
    ) -> Result<Outcome, ExecutionError> {
        let spec = match action {
            Action::Retention(spec) => spec,
            other => return Err(spec_mismatch(self.name(), other)),
        };

        let age = unit.age_seconds(ctx.clock.now()) / spec.time_unit.seconds();
        let retention = Self::effective_retention(spec, unit)?;
        let bytes = ctx.store.size_of(unit)?;

        if retention == RETAIN_FOREVER {
            return Ok(Outcome::unchanged("retention:exempt", bytes));
        }

        let retention = retention as f64;
        if age >= retention {
            let reclaimed = ctx.store.delete(unit)?;
            info!(
                unit = %unit.display_key(),
                age = %format!("{age:.2}"),
                "deleted unit past retention threshold"
            );
            return Ok(Outcome {
                applied_ops: vec!["delete".to_string()],
                bytes_before: reclaimed,
                bytes_after: 0,
                warning: None,
            });
        }

        let warning_from = retention - spec.warning_time as f64;
        if spec.warning_time > 0 && age >= warning_from {
            let mut outcome = Outcome::unchanged("retention:warn", bytes);
            outcome.warning = Some(format!(
                "{} reaches its retention threshold in {:.2} {:?}s",
                unit.display_key(),
                retention - age,
                spec.time_unit,
            ));
            return Ok(outcome);
        }

        Ok(Outcome::unchanged("retained", bytes))
    }
}
