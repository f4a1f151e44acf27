//! Time-window retention: only units inside `[from, to]` survive.

use tracing::info;

use daskeeper_core::DataUnit;
use daskeeper_policy::{Action, ProtectionWindow, WindowSpec};

use crate::plugin::{spec_mismatch, ActionPlugin, ExecutionContext, ExecutionError, Outcome};

pub struct TimeWindowPlugin;

impl ActionPlugin for TimeWindowPlugin {
    fn name(&self) -> &'static str {
        "time-window"
    }

    fn execute(
        &self,
        unit: &DataUnit,
        action: &Action,
        _window: Option<&ProtectionWindow>,
        ctx: &ExecutionContext,
    ) -> Result<Outcome, ExecutionError> {
        let WindowSpec { from, to } = match action {
            Action::TimeWindow(spec) => spec,
            other => return Err(spec_mismatch(self.name(), other)),
        };

        if (*from..=*to).contains(&unit.created_at) {
            let bytes = ctx.store.size_of(unit)?;
            return Ok(Outcome::unchanged("window:retained", bytes));
        }

        // Outside the window the unit degrades to plain deletion.
        let reclaimed = ctx.store.delete(unit)?;
        info!(unit = %unit.display_key(), "deleted unit outside retention window");
        Ok(Outcome {
            applied_ops: vec!["delete".to_string()],
            bytes_before: reclaimed,
            bytes_after: 0,
            warning: None,
        })
    }
}
