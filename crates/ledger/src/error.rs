use thiserror::Error;

use crate::job::JobStatus;

/// Errors raised by ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Requested transition is not the immediate successor of the job's
    /// current status. The job row is left unchanged.
    #[error("invalid transition for job '{job_id}': {from:?} -> {to:?}")]
    InvalidTransition {
        job_id: String,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("job not found: {0}")]
    JobNotFound(String),

    #[error("policy not found: {0}")]
    PolicyNotFound(String),

    /// Constraint violation at the API boundary, e.g. a `failed` transition
    /// without an error message.
    #[error("{0}")]
    Constraint(String),
}

pub type Result<T> = std::result::Result<T, LedgerError>;
