//! Region-of-interest extraction: slice a channel range into a new unit.

use tracing::debug;

use daskeeper_core::{Block, DataUnit};
use daskeeper_policy::{Action, ProtectionWindow, RoiSpec};

use crate::plugin::{spec_mismatch, ActionPlugin, ExecutionContext, ExecutionError, Outcome};

pub struct RoiPlugin;

impl ActionPlugin for RoiPlugin {
    fn name(&self) -> &'static str {
        "roi"
    }

    fn execute(
        &self,
        unit: &DataUnit,
        action: &Action,
        _window: Option<&ProtectionWindow>,
        ctx: &ExecutionContext,
    ) -> Result<Outcome, ExecutionError> {
        let RoiSpec { channel_range: [from, to] } = match action {
            Action::Roi(spec) => spec,
            other => return Err(spec_mismatch(self.name(), other)),
        };

        let block = ctx.store.read(unit)?;
        let channels = block.channel_count() as u32;
        let rel_from = from.saturating_sub(block.channel_offset).min(channels) as usize;
        let rel_to = to.saturating_sub(block.channel_offset).min(channels) as usize;
        if rel_from >= rel_to {
            return Err(ExecutionError::constraint(format!(
                "roi [{from}, {to}) does not intersect channels [{}, {}) of {}",
                block.channel_offset,
                block.channel_offset + channels,
                unit.display_key(),
            )));
        }

        let bytes_before = block.byte_len();
        let roi = Block::new(
            block
                .samples
                .iter()
                .map(|row| row[rel_from..rel_to].to_vec())
                .collect(),
            block.channel_offset + rel_from as u32,
        );
        let bytes_after = roi.byte_len();

        // Source stays untouched; the slice lands alongside it.
        let path = ctx.store.write_alongside(unit, "_roi", roi)?;
        debug!(unit = %unit.display_key(), out = %path.display(), "extracted region of interest");

        Ok(Outcome {
            applied_ops: vec![format!("roi:{from}..{to}")],
            bytes_before,
            bytes_after,
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

    use chrono::Utc;

    use daskeeper_core::{ManualClock, MemoryStore};

    fn unit() -> DataUnit {
        DataUnit {
            path: PathBuf::from("/data/a.h5"),
            data_type: "hdf5".to_string(),
            tags: vec![],
            attributes: HashMap::new(),
            created_at: Utc::now(),
            size_bytes: 0,
            channel_range: (0, 4),
            position: None,
        }
    }

    fn ctx(store: Arc<MemoryStore>) -> ExecutionContext {
        ExecutionContext {
            clock: Arc::new(ManualClock::new(Utc::now())),
            store,
        }
    }

    #[test]
    fn slices_channel_columns_into_new_unit() {
        let store = Arc::new(MemoryStore::new());
        store.insert(
            "/data/a.h5",
            Block::new(vec![vec![0.0, 1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0, 7.0]], 0),
        );
        let u = unit();

        let outcome = RoiPlugin
            .execute(&u, &Action::Roi(RoiSpec { channel_range: [1, 3] }), None, &ctx(store.clone()))
            .unwrap();

        assert_eq!(outcome.applied_ops, vec!["roi:1..3"]);

        let roi = store.get(&PathBuf::from("/data/a_roi.h5")).unwrap();
        assert_eq!(roi.samples, vec![vec![1.0, 2.0], vec![5.0, 6.0]]);
        assert_eq!(roi.channel_offset, 1);

        // Source untouched.
        assert_eq!(store.get(&u.path).unwrap().channel_count(), 4);
    }

    #[test]
    fn disjoint_range_is_a_constraint_error() {
        let store = Arc::new(MemoryStore::new());
        store.insert("/data/a.h5", Block::new(vec![vec![0.0, 1.0]], 0));

        let err = RoiPlugin
            .execute(
                &unit(),
                &Action::Roi(RoiSpec { channel_range: [10, 20] }),
                None,
                &ctx(store),
            )
            .unwrap_err();
        assert_eq!(err.kind, crate::plugin::ErrorKind::Constraint);
    }
}
