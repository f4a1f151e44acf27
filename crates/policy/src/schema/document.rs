//! Top-level policy document and the loaded [`Policy`] value.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Action, Selector, Trigger};

/// Top-level policy file parsed from YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyDocument {
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    pub metadata: DocumentMetadata,
    #[serde(default)]
    pub settings: Settings,
    /// Reusable fragments referenced by `PolicySpec::template`. Kept as raw
    /// YAML; the loader deep-merges them under the referencing policy.
    #[serde(default)]
    pub policy_templates: Vec<serde_yaml::Value>,
    #[serde(default)]
    pub policies: Vec<serde_yaml::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct DocumentMetadata {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
}

/// Engine settings carried in the document head.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Tick resolution of the scheduling clock, in seconds.
    #[serde(default = "default_evaluation_interval")]
    pub policy_evaluation_interval: u64,
    /// How long executed-job history is kept, in days. Pruning itself is an
    /// external concern; the value is surfaced for it.
    #[serde(default)]
    pub audit_retention: Option<u32>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            policy_evaluation_interval: default_evaluation_interval(),
            audit_retention: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_evaluation_interval() -> u64 {
    60
}

/// One declared policy, after template resolution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct PolicySpec {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Name of a `policy_templates` entry this policy extends.
    #[serde(default)]
    pub template: Option<String>,
    /// Coarse behavior tag the retention action falls back to when its own
    /// spec carries no strategy.
    #[serde(default = "default_strategy")]
    pub strategy: String,
    pub selector: Selector,
    /// Declared action kinds, informational/validation use.
    #[serde(default)]
    pub operations: Vec<String>,
    pub triggers: Vec<Trigger>,
    pub actions: Vec<Action>,
}

pub(crate) fn default_true() -> bool {
    true
}

fn default_strategy() -> String {
    "none".to_string()
}

/// A loaded policy: the spec plus its stable identity and provenance.
///
/// Never mutated after load; each evaluation tick reads an immutable
/// [`PolicySet`](crate::loader::PolicySet) snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Policy {
    /// Unique id, `{name}-{uuid}`, assigned at load.
    pub id: String,
    pub policy_file: PathBuf,
    pub loaded_at: DateTime<Utc>,
    pub spec: PolicySpec,
}

impl Policy {
    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn is_enabled(&self) -> bool {
        self.spec.enabled
    }

    pub fn selector(&self) -> &Selector {
        &self.spec.selector
    }

    pub fn triggers(&self) -> &[Trigger] {
        &self.spec.triggers
    }

    pub fn actions(&self) -> &[Action] {
        &self.spec.actions
    }
}
