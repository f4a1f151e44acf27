//! Declarative lifecycle-policy engine front end.
//!
//! This crate provides:
//! - YAML policy document definition with serde deserialization
//! - Document loader with template resolution and atomic validation
//! - Hot-reload via `notify` watcher on the policy file
//! - Pure selector matching of policies against candidate data units

pub mod condition;
pub mod loader;
pub mod matcher;
pub mod schema;
pub mod validation;

pub use loader::{PolicyError, PolicySet, PolicyWatcher, Result};
pub use schema::*;
