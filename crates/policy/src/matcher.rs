//! Pure selector matching: which policies govern which data units.
//!
//! No I/O and fully deterministic, so it can be property-tested
//! independently of scheduling.

use std::path::Path;

use daskeeper_core::DataUnit;

use crate::schema::{Policy, Selector};

/// Whether `unit` satisfies the selector conjunction:
/// type ∈ `data_type` AND (tags empty OR any tag shared) AND
/// (paths empty OR unit path under one prefix).
pub fn selector_matches(selector: &Selector, unit: &DataUnit) -> bool {
    if !selector.data_type.iter().any(|t| t == &unit.data_type) {
        return false;
    }

    if !selector.tags.is_empty() && !selector.tags.iter().any(|t| unit.has_tag(t)) {
        return false;
    }

    if !selector.paths.is_empty()
        && !selector.paths.iter().any(|p| path_is_under(p, &unit.path))
    {
        return false;
    }

    true
}

/// Component-boundary prefix check: `/data/das` covers `/data/das/a.h5`
/// but not `/data/dashboards/a.h5`.
fn path_is_under(prefix: &Path, path: &Path) -> bool {
    path.starts_with(prefix)
}

/// For each policy, the subset of candidate units it governs.
///
/// Policies are returned in declaration order and matched units preserve
/// the input unit order; disabled policies are included (the scheduler
/// skips them at materialization, observability still sees them).
pub fn find_applicable<'a>(
    policies: &'a [Policy],
    units: &'a [DataUnit],
) -> Vec<(&'a Policy, Vec<&'a DataUnit>)> {
    policies
        .iter()
        .map(|policy| {
            let matched = units
                .iter()
                .filter(|unit| selector_matches(policy.selector(), unit))
                .collect();
            (policy, matched)
        })
        .collect()
}
