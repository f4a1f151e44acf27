//! Trigger scheduling: the tick loop, event intake, trigger-to-job
//! materialization, and the job execution worker pool.
//!
//! The [`Scheduler`] owns its tick cadence, an injected clock, and
//! references to the policy set and the ledger, so tests can drive ticks
//! deterministically. Job execution runs on a separate worker pool so a
//! slow action never delays trigger evaluation.

pub mod engine;
pub mod intake;
pub mod triggers;
pub mod worker;

pub use engine::{Scheduler, WorkItem};
pub use intake::{IntakeError, IntakeMessage, SchedulerHandle};
pub use triggers::{FiredTrigger, TriggerStates};
pub use worker::{execute_item, spawn_workers};
