//! The stable contract third-party action plugins must satisfy.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use daskeeper_core::{Clock, DataStore, DataUnit, KeeperError};
use daskeeper_policy::{Action, ProtectionWindow};

/// Result of one successful plugin execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Outcome {
    /// Operations actually applied, e.g. `["delete"]` or
    /// `["temporal:mean:4", "spatial:sum:2"]`.
    pub applied_ops: Vec<String>,
    pub bytes_before: u64,
    pub bytes_after: u64,
    /// Warning-only outcomes (e.g. the retention warning band) carry a
    /// human-readable message for the external notifier.
    #[serde(default)]
    pub warning: Option<String>,
}

impl Outcome {
    /// A no-op outcome: the unit was inspected and left alone.
    pub fn unchanged(op: impl Into<String>, bytes: u64) -> Self {
        Self {
            applied_ops: vec![op.into()],
            bytes_before: bytes,
            bytes_after: bytes,
            warning: None,
        }
    }

    pub fn bytes_reclaimed(&self) -> u64 {
        self.bytes_before.saturating_sub(self.bytes_after)
    }
}

/// Failure classes a plugin may report.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    Io,
    Format,
    Constraint,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Io => "io",
            ErrorKind::Format => "format",
            ErrorKind::Constraint => "constraint",
        };
        f.write_str(s)
    }
}

/// Error raised by an action plugin. Always recoverable at job granularity:
/// the job goes to `failed`, the tick loop and other jobs are unaffected.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind} error: {message}")]
pub struct ExecutionError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ExecutionError {
    pub fn io(message: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Io, message: message.into() }
    }

    pub fn format(message: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Format, message: message.into() }
    }

    pub fn constraint(message: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Constraint, message: message.into() }
    }
}

impl From<KeeperError> for ExecutionError {
    fn from(err: KeeperError) -> Self {
        match err {
            KeeperError::Io(e) => Self::io(e.to_string()),
            KeeperError::UnitNotFound(u) => Self::io(format!("data unit not found: {u}")),
            KeeperError::Store(m) => Self::io(m),
            KeeperError::Serialize(m) => Self::format(m),
            KeeperError::Config(m) | KeeperError::Other(m) => Self::constraint(m),
        }
    }
}

/// Shared collaborators handed to every plugin execution.
#[derive(Clone)]
pub struct ExecutionContext {
    pub clock: Arc<dyn Clock>,
    pub store: Arc<dyn DataStore>,
}

/// One action kind. Implementations must be pure with respect to the
/// ledger: outcomes are reported by the caller, never written directly.
pub trait ActionPlugin: Send + Sync {
    /// Registry key; matches [`Action::kind`].
    fn name(&self) -> &'static str;

    /// Apply the action to one data unit. `window` is present when the job
    /// was produced by an event trigger.
    fn execute(
        &self,
        unit: &DataUnit,
        action: &Action,
        window: Option<&ProtectionWindow>,
        ctx: &ExecutionContext,
    ) -> Result<Outcome, ExecutionError>;
}

/// Name → implementation mapping built at startup.
///
/// `PLUGIN_DIR` discovery hands externally built plugins to
/// [`register`](ActionRegistry::register); the engine itself only requires
/// this stable lookup.
#[derive(Clone, Default)]
pub struct ActionRegistry {
    plugins: HashMap<&'static str, Arc<dyn ActionPlugin>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with all built-in action kinds.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(crate::retention::RetentionPlugin));
        registry.register(Arc::new(crate::downsample::TransformPlugin));
        registry.register(Arc::new(crate::roi::RoiPlugin));
        registry.register(Arc::new(crate::window::TimeWindowPlugin));
        registry.register(Arc::new(crate::proximity::EventProximityPlugin));
        registry
    }

    pub fn register(&mut self, plugin: Arc<dyn ActionPlugin>) {
        tracing::debug!(name = plugin.name(), "registered action plugin");
        self.plugins.insert(plugin.name(), plugin);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ActionPlugin>> {
        self.plugins.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.plugins.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

/// Helper for plugins: the spec variant did not match the plugin kind.
pub(crate) fn spec_mismatch(expected: &str, got: &Action) -> ExecutionError {
    ExecutionError::constraint(format!(
        "plugin '{expected}' received a '{}' action spec",
        got.kind()
    ))
}
