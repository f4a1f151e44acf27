//! Selector clause deciding which data units a policy governs.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Conjunction of three clauses; see [`crate::matcher`] for the semantics.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Selector {
    /// Dataset formats the policy applies to. Must not be empty.
    pub data_type: Vec<String>,
    /// Unit must carry at least one of these; empty means match-all.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Unit path must sit under one of these prefixes; empty means match-all.
    #[serde(default)]
    pub paths: Vec<PathBuf>,
}
