//! Observation feed: every status change is published as a `job_update`.
//!
//! The external dashboard subscribes here; this crate owns no UI.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::job::JobStatus;

/// One published status change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobUpdate {
    pub id: String,
    pub status: JobStatus,
    pub last_run_time: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}
