//! Temporal/spatial downsampling over sample blocks.
//!
//! Consecutive samples (temporal) or adjacent channels (spatial) are grouped
//! in runs of `factor` and combined with `mean` or `sum`. A remainder under
//! one full group at the tail is combined as a short group rather than
//! dropped, so 101 samples at factor 4 yield 26 output groups.

use tracing::debug;

use daskeeper_core::{Block, DataUnit};
use daskeeper_policy::{Action, Algorithm, Dimension, ProtectionWindow, TransformSpec};

use crate::plugin::{spec_mismatch, ActionPlugin, ExecutionContext, ExecutionError, Outcome};

/// Number of output groups for `len` inputs at the given factor.
pub fn group_count(len: usize, factor: usize) -> usize {
    len.div_ceil(factor)
}

fn combine(values: impl Iterator<Item = f64>, algorithm: Algorithm) -> f64 {
    let mut sum = 0.0;
    let mut count = 0usize;
    for v in values {
        sum += v;
        count += 1;
    }
    match algorithm {
        Algorithm::Sum => sum,
        Algorithm::Mean => {
            if count == 0 {
                0.0
            } else {
                sum / count as f64
            }
        }
    }
}

/// Group consecutive sample rows in runs of `factor`.
pub fn downsample_temporal(block: &Block, factor: usize, algorithm: Algorithm) -> Block {
    let channels = block.channel_count();
    let samples = block
        .samples
        .chunks(factor)
        .map(|group| {
            (0..channels)
                .map(|c| combine(group.iter().map(|row| row[c]), algorithm))
                .collect()
        })
        .collect();
    Block::new(samples, block.channel_offset)
}

/// Group adjacent channel columns in runs of `factor`.
///
/// `scope` is an absolute half-open channel range; columns outside it pass
/// through untouched. `None` downsamples every column.
pub fn downsample_spatial(
    block: &Block,
    factor: usize,
    algorithm: Algorithm,
    scope: Option<[u32; 2]>,
) -> Block {
    let channels = block.channel_count();
    let (from, to) = match scope {
        Some([a, b]) => {
            let from = a.saturating_sub(block.channel_offset).min(channels as u32) as usize;
            let to = b.saturating_sub(block.channel_offset).min(channels as u32) as usize;
            (from, from.max(to))
        }
        None => (0, channels),
    };

    let samples = block
        .samples
        .iter()
        .map(|row| {
            let mut out = Vec::with_capacity(from + group_count(to - from, factor) + (channels - to));
            out.extend_from_slice(&row[..from]);
            for group in row[from..to].chunks(factor) {
                out.push(combine(group.iter().copied(), algorithm));
            }
            out.extend_from_slice(&row[to..]);
            out
        })
        .collect();
    Block::new(samples, block.channel_offset)
}

pub struct TransformPlugin;

fn method_tag(dimension: Dimension, algorithm: Algorithm, factor: u32) -> String {
    let dim = match dimension {
        Dimension::Temporal => "temporal",
        Dimension::Spatial => "spatial",
    };
    let alg = match algorithm {
        Algorithm::Mean => "mean",
        Algorithm::Sum => "sum",
    };
    format!("{dim}:{alg}:{factor}")
}

impl TransformPlugin {
    fn apply(spec: &TransformSpec, mut block: Block) -> Result<(Block, Vec<String>), ExecutionError> {
        let mut applied = Vec::with_capacity(spec.methods.len());
        for method in &spec.methods {
            if method.factor == 0 {
                return Err(ExecutionError::constraint(
                    "transform factor must be a positive integer",
                ));
            }
            let factor = method.factor as usize;
            block = match method.dimension {
                Dimension::Temporal => downsample_temporal(&block, factor, method.algorithm),
                Dimension::Spatial => {
                    downsample_spatial(&block, factor, method.algorithm, method.apply_to_channels)
                }
            };
            applied.push(method_tag(method.dimension, method.algorithm, method.factor));
        }
        Ok((block, applied))
    }
}

impl ActionPlugin for TransformPlugin {
    fn name(&self) -> &'static str {
        "transform"
    }

    fn execute(
        &self,
        unit: &DataUnit,
        action: &Action,
        _window: Option<&ProtectionWindow>,
        ctx: &ExecutionContext,
    ) -> Result<Outcome, ExecutionError> {
        let spec = match action {
            Action::Transform(spec) => spec,
            other => return Err(spec_mismatch(self.name(), other)),
        };

        let block = ctx.store.read(unit)?;
        let bytes_before = block.byte_len();

        let (reduced, applied_ops) = Self::apply(spec, block)?;
        let bytes_after = reduced.byte_len();

        if spec.preserve_original {
            let path = ctx.store.write_alongside(unit, "_reduced", reduced)?;
            debug!(unit = %unit.display_key(), out = %path.display(), "wrote reduced copy");
        } else {
            ctx.store.replace(unit, reduced)?;
            debug!(unit = %unit.display_key(), "replaced unit with reduced data");
        }

        Ok(Outcome {
            applied_ops,
            bytes_before,
            bytes_after,
            warning: None,
        })
    }
}
