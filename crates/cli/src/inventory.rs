//! Filesystem inventory: discover candidate data units under the paths the
//! loaded policies select on.
//!
//! The archive's real catalog is an external collaborator; this scan is the
//! minimal inventory a single-host deployment needs. Selector `data_type`
//! values double as file extensions (`hdf5`, `csv`), matching how the
//! archives are laid out on disk.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use walkdir::WalkDir;

use daskeeper_core::DataUnit;
use daskeeper_policy::PolicySet;

/// Walk every selector path of every enabled policy and collect matching
/// files as data units, deduplicated by path.
pub fn scan_units(policies: &PolicySet) -> Vec<DataUnit> {
    let mut units: BTreeMap<PathBuf, DataUnit> = BTreeMap::new();

    for policy in policies.all_enabled() {
        let selector = policy.selector();
        for root in &selector.paths {
            if !root.exists() {
                warn!(path = %root.display(), policy = policy.name(), "selector path does not exist");
                continue;
            }
            for entry in WalkDir::new(root).into_iter().filter_map(Result::ok) {
                if !entry.file_type().is_file() {
                    continue;
                }
                let path = entry.path();
                let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
                    continue;
                };
                let Some(data_type) = selector.data_type.iter().find(|t| t.as_str() == ext)
                else {
                    continue;
                };
                let Ok(meta) = entry.metadata() else { continue };
                let created_at: DateTime<Utc> = meta
                    .modified()
                    .map(DateTime::from)
                    .unwrap_or_else(|_| Utc::now());

                units.entry(path.to_path_buf()).or_insert_with(|| DataUnit {
                    path: path.to_path_buf(),
                    data_type: data_type.clone(),
                    tags: Vec::new(),
                    attributes: HashMap::new(),
                    created_at,
                    size_bytes: meta.len(),
                    channel_range: (0, 1),
                    position: None,
                });
            }
        }
    }

    debug!(count = units.len(), "scanned data units");
    units.into_values().collect()
}
