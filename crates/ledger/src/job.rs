//! Job rows and the status state machine.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Job lifecycle states. `Success` and `Failed` are terminal; `Failed` jobs
/// are an auditable record, not a retry queue — a re-fire creates a new row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Added,
    Scheduled,
    Running,
    Success,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Added => "added",
            JobStatus::Scheduled => "scheduled",
            JobStatus::Running => "running",
            JobStatus::Success => "success",
            JobStatus::Failed => "failed",
        }
    }

    /// Whether `self` is the immediate successor of `from`. No stage is
    /// skipped and no transition moves backward.
    pub fn can_follow(&self, from: JobStatus) -> bool {
        matches!(
            (from, self),
            (JobStatus::Added, JobStatus::Scheduled)
                | (JobStatus::Scheduled, JobStatus::Running)
                | (JobStatus::Running, JobStatus::Success)
                | (JobStatus::Running, JobStatus::Failed)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Success | JobStatus::Failed)
    }

    /// States counted as in-flight for duplicate suppression.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, JobStatus::Scheduled | JobStatus::Running)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "added" => Ok(JobStatus::Added),
            "scheduled" => Ok(JobStatus::Scheduled),
            "running" => Ok(JobStatus::Running),
            "success" => Ok(JobStatus::Success),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status '{other}'")),
        }
    }
}

/// One durable unit of scheduled work.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub id: String,
    /// Owning policy; the row is cascade-deleted with it.
    pub policy_id: String,
    pub name: String,
    /// Action kind, the plugin registry key.
    pub operation: String,
    pub filetypes: Vec<String>,
    pub trigger_type: String,
    /// Snapshot of the trigger that produced the job, including any
    /// protection window attached by an event trigger.
    pub trigger_spec: serde_json::Value,
    pub status: JobStatus,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_run_time: Option<DateTime<Utc>>,
}

/// Input for [`Ledger::create_job`](crate::store::Ledger::create_job).
#[derive(Debug, Clone)]
pub struct NewJob {
    pub policy_id: String,
    pub name: String,
    pub operation: String,
    pub filetypes: Vec<String>,
    pub trigger_type: String,
    pub trigger_spec: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_transitions_allowed() {
        assert!(JobStatus::Scheduled.can_follow(JobStatus::Added));
        assert!(JobStatus::Running.can_follow(JobStatus::Scheduled));
        assert!(JobStatus::Success.can_follow(JobStatus::Running));
        assert!(JobStatus::Failed.can_follow(JobStatus::Running));
    }

    #[test]
    fn skipping_and_backward_transitions_rejected() {
        assert!(!JobStatus::Running.can_follow(JobStatus::Added));
        assert!(!JobStatus::Success.can_follow(JobStatus::Scheduled));
        assert!(!JobStatus::Added.can_follow(JobStatus::Scheduled));
        assert!(!JobStatus::Scheduled.can_follow(JobStatus::Running));
        assert!(!JobStatus::Running.can_follow(JobStatus::Failed));
        assert!(!JobStatus::Failed.can_follow(JobStatus::Success));
    }

    #[test]
    fn terminal_and_in_flight_states() {
        assert!(JobStatus::Success.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Running.is_terminal());

        assert!(JobStatus::Scheduled.is_in_flight());
        assert!(JobStatus::Running.is_in_flight());
        assert!(!JobStatus::Added.is_in_flight());
        assert!(!JobStatus::Success.is_in_flight());
    }

    #[test]
    fn status_string_roundtrip() {
        for status in [
            JobStatus::Added,
            JobStatus::Scheduled,
            JobStatus::Running,
            JobStatus::Success,
            JobStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        assert!("pending".parse::<JobStatus>().is_err());
    }
}
