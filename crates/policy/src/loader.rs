//! Policy document loader with template resolution and hot-reload.
//!
//! A document either loads completely (every policy parsed, resolved, and
//! validated) or is rejected with a [`PolicyError::Validation`] — there is
//! no partially-loaded policy set.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use notify::{
    event::{CreateKind, ModifyKind},
    Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher,
};
use tracing::{info, warn};

use crate::schema::{DocumentMetadata, Policy, PolicyDocument, PolicySpec, Settings};
use crate::validation;

// ── Error type ──────────────────────────────────────────────────────

/// Errors that can occur during policy loading.
#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    /// Filesystem I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parse/deserialization error.
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// Malformed policy, trigger, or action; the whole document is rejected.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Filesystem watcher error.
    #[error("Notify watcher error: {0}")]
    Notify(#[from] notify::Error),
}

/// Result alias for policy operations.
pub type Result<T> = std::result::Result<T, PolicyError>;

// ── Deep-merge for template resolution ──────────────────────────────

/// Deep-merge two YAML `Value` maps: policy fields win, arrays replace
/// entirely.
pub fn deep_merge(template: &serde_yaml::Value, policy: &serde_yaml::Value) -> serde_yaml::Value {
    match (template, policy) {
        (serde_yaml::Value::Mapping(tm), serde_yaml::Value::Mapping(pm)) => {
            let mut merged = tm.clone();
            for (key, policy_val) in pm {
                if let Some(template_val) = tm.get(key) {
                    merged.insert(key.clone(), deep_merge(template_val, policy_val));
                } else {
                    merged.insert(key.clone(), policy_val.clone());
                }
            }
            serde_yaml::Value::Mapping(merged)
        }
        // For scalars, arrays, etc.: the policy's value wins.
        (_, policy) => policy.clone(),
    }
}

fn template_name(value: &serde_yaml::Value) -> Option<&str> {
    value
        .as_mapping()
        .and_then(|m| m.get(&serde_yaml::Value::String("name".to_string())))
        .and_then(|v| v.as_str())
}

/// Index `policy_templates` by name; merge each policy that references one.
fn resolve_templates(
    templates: &[serde_yaml::Value],
    policies: &[serde_yaml::Value],
) -> std::result::Result<Vec<serde_yaml::Value>, String> {
    let mut by_name: HashMap<&str, &serde_yaml::Value> = HashMap::new();
    for template in templates {
        let name = template_name(template)
            .ok_or_else(|| "policy_templates entry is missing a name".to_string())?;
        if by_name.insert(name, template).is_some() {
            return Err(format!("duplicate policy template '{name}'"));
        }
    }

    let mut resolved = Vec::with_capacity(policies.len());
    for policy in policies {
        let template_ref = policy
            .as_mapping()
            .and_then(|m| m.get(&serde_yaml::Value::String("template".to_string())))
            .and_then(|v| v.as_str());

        match template_ref {
            Some(name) => {
                let template = by_name.get(name).ok_or_else(|| {
                    format!("policy references unknown template '{name}'")
                })?;
                // The template's own name must not leak into the policy; the
                // policy mapping always carries its own.
                resolved.push(deep_merge(template, policy));
            }
            None => resolved.push(policy.clone()),
        }
    }
    Ok(resolved)
}

// ── Policy set ──────────────────────────────────────────────────────

/// Immutable snapshot of one successfully loaded policy document.
#[derive(Debug, Clone)]
pub struct PolicySet {
    pub metadata: DocumentMetadata,
    pub settings: Settings,
    policies: Vec<Policy>,
    index: HashMap<String, usize>,
}

impl PolicySet {
    /// Load and validate a policy document from a file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let set = Self::parse(&contents, path)?;
        info!(
            path = %path.display(),
            policies = set.len(),
            "loaded policy document"
        );
        Ok(set)
    }

    /// Parse and validate a policy document from a string.
    pub fn parse(contents: &str, source: &Path) -> Result<Self> {
        let document: PolicyDocument = serde_yaml::from_str(contents)?;

        let resolved = resolve_templates(&document.policy_templates, &document.policies)
            .map_err(PolicyError::Validation)?;

        let mut specs = Vec::with_capacity(resolved.len());
        for value in resolved {
            let spec: PolicySpec = serde_yaml::from_value(value)?;
            specs.push(spec);
        }

        validation::validate_specs(&specs).map_err(PolicyError::Validation)?;

        let loaded_at = chrono::Utc::now();
        let policies: Vec<Policy> = specs
            .into_iter()
            .map(|spec| Policy {
                id: format!("{}-{}", spec.name, uuid::Uuid::new_v4()),
                policy_file: source.to_path_buf(),
                loaded_at,
                spec,
            })
            .collect();

        let index = policies
            .iter()
            .enumerate()
            .map(|(i, p)| (p.id.clone(), i))
            .collect();

        Ok(Self {
            metadata: document.metadata,
            settings: document.settings,
            policies,
            index,
        })
    }

    pub fn get(&self, id: &str) -> Option<&Policy> {
        self.index.get(id).map(|&i| &self.policies[i])
    }

    pub fn get_by_name(&self, name: &str) -> Option<&Policy> {
        self.policies.iter().find(|p| p.name() == name)
    }

    /// All policies in declaration order, including disabled ones.
    pub fn policies(&self) -> &[Policy] {
        &self.policies
    }

    /// Enabled policies in declaration order; stable for one evaluation tick.
    pub fn all_enabled(&self) -> Vec<&Policy> {
        self.policies.iter().filter(|p| p.is_enabled()).collect()
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}

// ── Hot-reload watcher ──────────────────────────────────────────────

/// Watches the policy file and invokes a callback on create/modify.
///
/// The callback runs on the watcher's thread; it should only signal (e.g.
/// send on a channel) and leave the reload to the scheduler, which swaps
/// the new set in between ticks.
pub struct PolicyWatcher {
    /// Active filesystem watcher (held to keep it alive).
    _watcher: RecommendedWatcher,
}

impl PolicyWatcher {
    pub fn watch<F>(policy_path: &Path, on_change: F) -> Result<Self>
    where
        F: Fn() + Send + 'static,
    {
        let watched = policy_path.to_path_buf();
        let mut watcher =
            notify::recommended_watcher(move |res: std::result::Result<Event, notify::Error>| {
                match res {
                    Ok(event) => {
                        if is_relevant(&event, &watched) {
                            info!(path = %watched.display(), "policy file changed");
                            on_change();
                        }
                    }
                    Err(e) => warn!(error = %e, "policy watcher error"),
                }
            })?;

        // Watch the parent directory: editors often replace the file wholesale.
        let target = policy_path.parent().unwrap_or(policy_path);
        watcher.watch(target, RecursiveMode::NonRecursive)?;

        info!(path = %policy_path.display(), "watching policy file for changes");
        Ok(Self { _watcher: watcher })
    }
}

fn is_relevant(event: &Event, watched: &Path) -> bool {
    let kind_matches = matches!(
        event.kind,
        EventKind::Create(CreateKind::File)
            | EventKind::Modify(ModifyKind::Data(_))
            | EventKind::Modify(ModifyKind::Name(_))
    );
    kind_matches && event.paths.iter().any(|p| p == watched)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Action, ScheduleSpec, Trigger};

    const VALID_DOC: &str = r#"
apiVersion: v1
metadata:
  name: das-lifecycle
  version: "1.0"
settings:
  log_level: info
  policy_evaluation_interval: 60
policies:
  - name: automatic-deletion
    description: Delete raw archives after 30 days
    enabled: true
    strategy: default
    selector:
      data_type: [hdf5]
      tags: [raw]
      paths: [/data/das]
    operations: [retention]
    triggers:
      - type: schedule
        spec:
          type: cron
          cron: "0 3 * * *"
    actions:
      - type: retention
        time_unit: day
        retention_time: 30
        warning_time: 7
        exceptions:
          - condition: "metadata.priority == 'high'"
            retention_time: 365
"#;

    #[test]
    fn parse_valid_document() {
        let set = PolicySet::parse(VALID_DOC, Path::new("policy.yaml")).unwrap();
        assert_eq!(set.len(), 1);

        let policy = set.get_by_name("automatic-deletion").unwrap();
        assert!(policy.is_enabled());
        assert!(policy.id.starts_with("automatic-deletion-"));
        assert_eq!(policy.selector().data_type, vec!["hdf5"]);
        assert!(matches!(
            policy.triggers()[0],
            Trigger::Schedule { spec: ScheduleSpec::Cron { .. } }
        ));
        assert!(matches!(policy.actions()[0], Action::Retention(_)));
    }

    #[test]
    fn get_by_id_roundtrip() {
        let set = PolicySet::parse(VALID_DOC, Path::new("policy.yaml")).unwrap();
        let id = set.policies()[0].id.clone();
        assert_eq!(set.get(&id).unwrap().name(), "automatic-deletion");
        assert!(set.get("no-such-id").is_none());
    }

    #[test]
    fn bad_cron_rejects_whole_document() {
        let doc = VALID_DOC.replace("0 3 * * *", "99 99 * * *");
        let err = PolicySet::parse(&doc, Path::new("policy.yaml")).unwrap_err();
        assert!(matches!(err, PolicyError::Validation(_)));
    }

    #[test]
    fn bad_exception_grammar_rejects_whole_document() {
        let doc = VALID_DOC.replace("metadata.priority == 'high'", "priority is high");
        let err = PolicySet::parse(&doc, Path::new("policy.yaml")).unwrap_err();
        assert!(matches!(err, PolicyError::Validation(_)));
    }

    #[test]
    fn unknown_trigger_type_is_a_parse_error() {
        let doc = VALID_DOC.replace("type: schedule", "type: webhook");
        assert!(PolicySet::parse(&doc, Path::new("policy.yaml")).is_err());
    }

    #[test]
    fn template_resolution_merges_fragments() {
        let doc = r#"
apiVersion: v1
metadata:
  name: templated
policy_templates:
  - name: monthly-retention
    strategy: default
    triggers:
      - type: schedule
        spec:
          type: cron
          cron: "0 3 1 * *"
    actions:
      - type: retention
        time_unit: day
        retention_time: 30
policies:
  - name: raw-cleanup
    template: monthly-retention
    selector:
      data_type: [hdf5]
"#;
        let set = PolicySet::parse(doc, Path::new("policy.yaml")).unwrap();
        let policy = set.get_by_name("raw-cleanup").unwrap();
        assert_eq!(policy.spec.strategy, "default");
        assert_eq!(policy.triggers().len(), 1);
        assert_eq!(policy.actions().len(), 1);
    }

    #[test]
    fn policy_fields_override_template() {
        let doc = r#"
apiVersion: v1
metadata:
  name: templated
policy_templates:
  - name: base
    strategy: default
    actions:
      - type: retention
        time_unit: day
        retention_time: 30
policies:
  - name: short-lived
    template: base
    strategy: none
    selector:
      data_type: [csv]
    actions:
      - type: retention
        time_unit: hour
        retention_time: 12
"#;
        let set = PolicySet::parse(doc, Path::new("policy.yaml")).unwrap();
        let policy = set.get_by_name("short-lived").unwrap();
        assert_eq!(policy.spec.strategy, "none");
        match &policy.actions()[0] {
            Action::Retention(spec) => assert_eq!(spec.retention_time, 12),
            other => panic!("unexpected action {other:?}"),
        }
    }

    #[test]
    fn unknown_template_reference_rejected() {
        let doc = r#"
apiVersion: v1
metadata:
  name: templated
policies:
  - name: orphan
    template: nonexistent
    selector:
      data_type: [hdf5]
    triggers: []
    actions:
      - type: retention
        time_unit: day
        retention_time: 1
"#;
        let err = PolicySet::parse(doc, Path::new("policy.yaml")).unwrap_err();
        assert!(matches!(err, PolicyError::Validation(_)));
    }

    #[test]
    fn duplicate_policy_names_rejected() {
        let mut doc = VALID_DOC.to_string();
        doc.push_str(
            r#"
  - name: automatic-deletion
    selector:
      data_type: [hdf5]
    triggers: []
    actions:
      - type: retention
        time_unit: day
        retention_time: 1
"#,
        );
        let err = PolicySet::parse(&doc, Path::new("policy.yaml")).unwrap_err();
        assert!(matches!(err, PolicyError::Validation(_)));
    }

    #[test]
    fn disabled_policy_is_loaded_but_not_enabled() {
        let doc = VALID_DOC.replace("enabled: true", "enabled: false");
        let set = PolicySet::parse(&doc, Path::new("policy.yaml")).unwrap();
        assert_eq!(set.len(), 1);
        assert!(set.all_enabled().is_empty());
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("policy.yaml");
        fs::write(&path, VALID_DOC).unwrap();

        let set = PolicySet::load(&path).unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(set.policies()[0].policy_file, path);
    }
}
