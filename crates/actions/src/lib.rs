//! Action execution: the plugin contract and the built-in reduction,
//! deletion, and extraction plugins.
//!
//! Every action kind is a plugin satisfying [`ActionPlugin`]; the
//! [`ActionRegistry`] maps kind names to implementations so new kinds can
//! be registered without touching the scheduler.

pub mod downsample;
pub mod plugin;
pub mod proximity;
pub mod retention;
pub mod roi;
pub mod window;

pub use downsample::TransformPlugin;
pub use plugin::{
    ActionPlugin, ActionRegistry, ErrorKind, ExecutionContext, ExecutionError, Outcome,
};
pub use proximity::EventProximityPlugin;
pub use retention::RetentionPlugin;
pub use roi::RoiPlugin;
pub use window::TimeWindowPlugin;
