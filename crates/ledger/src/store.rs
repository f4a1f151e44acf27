//! SQLite-backed ledger store.
//!
//! The connection is held behind a mutex so every transition is a single
//! atomic read-modify-write; the `scheduled -> running` claim additionally
//! uses a conditional update keyed on the current status so racing workers
//! cannot both win.

use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::error::{LedgerError, Result};
use crate::feed::JobUpdate;
use crate::job::{Job, JobStatus, NewJob};

/// Bundled schema; `INIT_FILE_PATH` may point at an override.
const INIT_SQL: &str = include_str!("init.sql");

const FEED_CAPACITY: usize = 256;

/// A policy row as persisted alongside its jobs.
#[derive(Debug, Clone)]
pub struct PolicyRecord {
    pub id: String,
    pub name: String,
    pub policy_file: String,
    pub is_enabled: bool,
    pub strategy: String,
    pub data_type: Vec<String>,
    pub tags: Vec<String>,
    pub paths: Vec<String>,
    pub operations: Vec<String>,
    pub triggers: serde_json::Value,
}

/// Filter for [`Ledger::list_jobs`].
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub policy_id: Option<String>,
    pub status: Option<JobStatus>,
    pub operation: Option<String>,
}

/// Durable job ledger over a single SQLite file.
pub struct Ledger {
    conn: Mutex<Connection>,
    feed: broadcast::Sender<JobUpdate>,
}

impl Ledger {
    /// Open or create the ledger database with the bundled schema.
    pub fn open(path: &Path) -> Result<Self> {
        Self::init(Connection::open(path)?, INIT_SQL)
    }

    /// Open with an external init script (the `INIT_FILE_PATH` override).
    pub fn open_with_init(path: &Path, init_path: &Path) -> Result<Self> {
        let init_sql = std::fs::read_to_string(init_path)?;
        Self::init(Connection::open(path)?, &init_sql)
    }

    /// In-memory ledger for tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?, INIT_SQL)
    }

    fn init(conn: Connection, init_sql: &str) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(init_sql)?;
        let (feed, _) = broadcast::channel(FEED_CAPACITY);
        Ok(Self {
            conn: Mutex::new(conn),
            feed,
        })
    }

    /// Subscribe to job status changes.
    pub fn subscribe(&self) -> broadcast::Receiver<JobUpdate> {
        self.feed.subscribe()
    }

    fn publish(&self, update: JobUpdate) {
        // Send only fails when nobody is listening.
        let _ = self.feed.send(update);
    }

    // ── Policies ────────────────────────────────────────────────────

    /// Insert or refresh a policy row.
    pub fn upsert_policy(&self, record: &PolicyRecord) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let conn = self.conn.lock().expect("ledger lock poisoned");
        conn.execute(
            "INSERT INTO policy
               (id, name, policy_file, is_enabled, strategy, data_type, tags,
                paths, operations, triggers, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)
             ON CONFLICT(id) DO UPDATE SET
               name = excluded.name,
               policy_file = excluded.policy_file,
               is_enabled = excluded.is_enabled,
               strategy = excluded.strategy,
               data_type = excluded.data_type,
               tags = excluded.tags,
               paths = excluded.paths,
               operations = excluded.operations,
               triggers = excluded.triggers,
               updated_at = excluded.updated_at",
            params![
                record.id,
                record.name,
                record.policy_file,
                record.is_enabled as i32,
                record.strategy,
                to_json(&record.data_type)?,
                to_json(&record.tags)?,
                to_json(&record.paths)?,
                to_json(&record.operations)?,
                record.triggers.to_string(),
                now,
            ],
        )?;
        debug!(policy_id = %record.id, "persisted policy");
        Ok(())
    }

    /// Delete a policy; its jobs go with it (FK cascade).
    pub fn delete_policy(&self, policy_id: &str) -> Result<bool> {
        let conn = self.conn.lock().expect("ledger lock poisoned");
        let deleted = conn.execute("DELETE FROM policy WHERE id = ?1", params![policy_id])?;
        if deleted > 0 {
            info!(policy_id, "deleted policy and cascaded jobs");
        }
        Ok(deleted > 0)
    }

    /// Remove every persisted policy (and, by cascade, every job).
    /// Called on shutdown so the next start persists a fresh load.
    pub fn remove_all_policies(&self) -> Result<usize> {
        let conn = self.conn.lock().expect("ledger lock poisoned");
        let removed = conn.execute("DELETE FROM policy", [])?;
        info!(removed, "removed persisted policies");
        Ok(removed)
    }

    // ── Jobs ────────────────────────────────────────────────────────

    /// Create a job in `added` state.
    pub fn create_job(&self, new: NewJob) -> Result<Job> {
        let job = Job {
            id: uuid::Uuid::new_v4().to_string(),
            policy_id: new.policy_id,
            name: new.name,
            operation: new.operation,
            filetypes: new.filetypes,
            trigger_type: new.trigger_type,
            trigger_spec: new.trigger_spec,
            status: JobStatus::Added,
            last_error: None,
            created_at: Utc::now(),
            last_run_time: None,
        };

        {
            let conn = self.conn.lock().expect("ledger lock poisoned");
            conn.execute(
                "INSERT INTO job
                   (id, policy_id, name, operation, filetypes, trigger_type,
                    trigger_spec, status, last_error, created_at, last_run_time)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, NULL, ?9, NULL)",
                params![
                    job.id,
                    job.policy_id,
                    job.name,
                    job.operation,
                    to_json(&job.filetypes)?,
                    job.trigger_type,
                    job.trigger_spec.to_string(),
                    job.status.as_str(),
                    job.created_at.to_rfc3339(),
                ],
            )
            .map_err(|e| match e {
                rusqlite::Error::SqliteFailure(err, _)
                    if err.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    LedgerError::PolicyNotFound(job.policy_id.clone())
                }
                other => LedgerError::Sqlite(other),
            })?;
        }

        self.publish(JobUpdate {
            id: job.id.clone(),
            status: job.status,
            last_run_time: None,
            last_error: None,
        });
        debug!(job_id = %job.id, operation = %job.operation, "created job");
        Ok(job)
    }

    pub fn get_job(&self, job_id: &str) -> Result<Job> {
        let conn = self.conn.lock().expect("ledger lock poisoned");
        Self::get_job_locked(&conn, job_id)
    }

    fn get_job_locked(conn: &Connection, job_id: &str) -> Result<Job> {
        conn.query_row(
            &format!("{JOB_SELECT} WHERE id = ?1"),
            params![job_id],
            row_to_job,
        )
        .optional()?
        .ok_or_else(|| LedgerError::JobNotFound(job_id.to_string()))
    }

    /// Move a job to `to`. Fails with [`LedgerError::InvalidTransition`]
    /// unless `to` is the immediate successor of the current status; on a
    /// failure the row is left unchanged.
    ///
    /// Transition to `failed` requires `error`, persisted verbatim in
    /// `last_error`; transition to `running` stamps `last_run_time`.
    pub fn transition(&self, job_id: &str, to: JobStatus, error: Option<&str>) -> Result<Job> {
        if to == JobStatus::Failed && error.is_none() {
            return Err(LedgerError::Constraint(
                "transition to failed requires an error message".to_string(),
            ));
        }

        let job = {
            let conn = self.conn.lock().expect("ledger lock poisoned");
            let current = Self::get_job_locked(&conn, job_id)?;
            if !to.can_follow(current.status) {
                warn!(
                    job_id,
                    from = %current.status,
                    to = %to,
                    "rejected invalid job transition"
                );
                return Err(LedgerError::InvalidTransition {
                    job_id: job_id.to_string(),
                    from: current.status,
                    to,
                });
            }

            let now = Utc::now();
            let stamp_run = to == JobStatus::Running;
            // Conditional on the current status: a concurrent writer that got
            // there first makes this a no-op instead of a lost update.
            let changed = conn.execute(
                "UPDATE job
                 SET status = ?1,
                     last_error = COALESCE(?2, last_error),
                     last_run_time = CASE WHEN ?3 THEN ?4 ELSE last_run_time END
                 WHERE id = ?5 AND status = ?6",
                params![
                    to.as_str(),
                    error,
                    stamp_run,
                    now.to_rfc3339(),
                    job_id,
                    current.status.as_str(),
                ],
            )?;
            if changed == 0 {
                let raced = Self::get_job_locked(&conn, job_id)?;
                return Err(LedgerError::InvalidTransition {
                    job_id: job_id.to_string(),
                    from: raced.status,
                    to,
                });
            }
            Self::get_job_locked(&conn, job_id)?
        };

        self.publish(JobUpdate {
            id: job.id.clone(),
            status: job.status,
            last_run_time: job.last_run_time,
            last_error: job.last_error.clone(),
        });
        debug!(job_id, status = %job.status, "job transitioned");
        Ok(job)
    }

    /// Race-safe `scheduled -> running` claim. Returns `Ok(false)` to the
    /// loser — someone else is handling the job, not an error.
    pub fn claim_running(&self, job_id: &str) -> Result<bool> {
        let now = Utc::now();
        let claimed = {
            let conn = self.conn.lock().expect("ledger lock poisoned");
            conn.execute(
                "UPDATE job SET status = 'running', last_run_time = ?1
                 WHERE id = ?2 AND status = 'scheduled'",
                params![now.to_rfc3339(), job_id],
            )? == 1
        };

        if claimed {
            self.publish(JobUpdate {
                id: job_id.to_string(),
                status: JobStatus::Running,
                last_run_time: Some(now),
                last_error: None,
            });
        }
        Ok(claimed)
    }

    /// Whether an in-flight (`scheduled` or `running`) job exists for the
    /// `(policy, trigger)` pair. Backs duplicate suppression.
    pub fn in_flight(&self, policy_id: &str, trigger_type: &str) -> Result<bool> {
        let conn = self.conn.lock().expect("ledger lock poisoned");
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM job
             WHERE policy_id = ?1 AND trigger_type = ?2
               AND status IN ('scheduled', 'running')",
            params![policy_id, trigger_type],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// List jobs matching the filter, oldest first.
    pub fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>> {
        let mut sql = format!("{JOB_SELECT} WHERE 1 = 1");
        let mut args: Vec<String> = Vec::new();

        if let Some(policy_id) = &filter.policy_id {
            args.push(policy_id.clone());
            sql.push_str(&format!(" AND policy_id = ?{}", args.len()));
        }
        if let Some(status) = filter.status {
            args.push(status.as_str().to_string());
            sql.push_str(&format!(" AND status = ?{}", args.len()));
        }
        if let Some(operation) = &filter.operation {
            args.push(operation.clone());
            sql.push_str(&format!(" AND operation = ?{}", args.len()));
        }
        // rowid order = insertion order; created_at has second resolution.
        sql.push_str(" ORDER BY rowid");

        let conn = self.conn.lock().expect("ledger lock poisoned");
        let mut stmt = conn.prepare(&sql)?;
        let jobs = stmt
            .query_map(rusqlite::params_from_iter(args.iter()), row_to_job)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(jobs)
    }
}

const JOB_SELECT: &str = "SELECT id, policy_id, name, operation, filetypes, trigger_type, \
                          trigger_spec, status, last_error, created_at, last_run_time FROM job";

fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value)
        .map_err(|e| LedgerError::Constraint(format!("JSON serialization failed: {e}")))
}

fn row_to_job(row: &rusqlite::Row<'_>) -> rusqlite::Result<Job> {
    let filetypes_raw: String = row.get(4)?;
    let trigger_spec_raw: String = row.get(6)?;
    let status_raw: String = row.get(7)?;
    let created_raw: String = row.get(9)?;
    let last_run_raw: Option<String> = row.get(10)?;

    Ok(Job {
        id: row.get(0)?,
        policy_id: row.get(1)?,
        name: row.get(2)?,
        operation: row.get(3)?,
        filetypes: serde_json::from_str(&filetypes_raw).map_err(|e| conversion_err(4, e))?,
        trigger_type: row.get(5)?,
        trigger_spec: serde_json::from_str(&trigger_spec_raw).map_err(|e| conversion_err(6, e))?,
        status: JobStatus::from_str(&status_raw)
            .map_err(|e| conversion_err(7, std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?,
        last_error: row.get(8)?,
        created_at: parse_timestamp(&created_raw).map_err(|e| conversion_err(9, e))?,
        last_run_time: last_run_raw
            .map(|raw| parse_timestamp(&raw))
            .transpose()
            .map_err(|e| conversion_err(10, e))?,
    })
}

fn parse_timestamp(raw: &str) -> std::result::Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(raw).map(|dt| dt.with_timezone(&Utc))
}

fn conversion_err<E: std::error::Error + Send + Sync + 'static>(
    column: usize,
    err: E,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        column,
        rusqlite::types::Type::Text,
        Box::new(err),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_policy(id: &str) -> PolicyRecord {
        PolicyRecord {
            id: id.to_string(),
            name: "automatic-deletion".to_string(),
            policy_file: "policy.yaml".to_string(),
            is_enabled: true,
            strategy: "default".to_string(),
            data_type: vec!["hdf5".to_string()],
            tags: vec!["raw".to_string()],
            paths: vec!["/data/das".to_string()],
            operations: vec!["retention".to_string()],
            triggers: serde_json::json!([{ "type": "schedule" }]),
        }
    }

    fn sample_job(policy_id: &str) -> NewJob {
        NewJob {
            policy_id: policy_id.to_string(),
            name: "retention /data/das/a.h5".to_string(),
            operation: "retention".to_string(),
            filetypes: vec!["hdf5".to_string()],
            trigger_type: "schedule".to_string(),
            trigger_spec: serde_json::json!({ "type": "schedule", "spec": { "type": "cron", "cron": "0 3 * * *" } }),
        }
    }

    fn ledger_with_policy(policy_id: &str) -> Ledger {
        let ledger = Ledger::open_in_memory().unwrap();
        ledger.upsert_policy(&sample_policy(policy_id)).unwrap();
        ledger
    }

    #[test]
    fn create_starts_in_added() {
        let ledger = ledger_with_policy("p1");
        let job = ledger.create_job(sample_job("p1")).unwrap();
        assert_eq!(job.status, JobStatus::Added);
        assert!(job.last_error.is_none());
        assert!(job.last_run_time.is_none());

        let loaded = ledger.get_job(&job.id).unwrap();
        assert_eq!(loaded, job);
    }

    #[test]
    fn create_for_unknown_policy_fails() {
        let ledger = Ledger::open_in_memory().unwrap();
        let err = ledger.create_job(sample_job("ghost")).unwrap_err();
        assert!(matches!(err, LedgerError::PolicyNotFound(_)));
    }

    #[test]
    fn full_lifecycle_to_success() {
        let ledger = ledger_with_policy("p1");
        let job = ledger.create_job(sample_job("p1")).unwrap();

        ledger.transition(&job.id, JobStatus::Scheduled, None).unwrap();
        let running = ledger.transition(&job.id, JobStatus::Running, None).unwrap();
        assert!(running.last_run_time.is_some());

        let done = ledger.transition(&job.id, JobStatus::Success, None).unwrap();
        assert_eq!(done.status, JobStatus::Success);
        assert!(done.last_error.is_none());
    }

    #[test]
    fn failed_requires_and_persists_error() {
        let ledger = ledger_with_policy("p1");
        let job = ledger.create_job(sample_job("p1")).unwrap();
        ledger.transition(&job.id, JobStatus::Scheduled, None).unwrap();
        ledger.transition(&job.id, JobStatus::Running, None).unwrap();

        let err = ledger.transition(&job.id, JobStatus::Failed, None).unwrap_err();
        assert!(matches!(err, LedgerError::Constraint(_)));

        let failed = ledger
            .transition(&job.id, JobStatus::Failed, Some("disk unreadable"))
            .unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(failed.last_error.as_deref(), Some("disk unreadable"));
    }

    #[test]
    fn invalid_transition_leaves_row_unchanged() {
        let ledger = ledger_with_policy("p1");
        let job = ledger.create_job(sample_job("p1")).unwrap();

        // added -> running skips a stage.
        let err = ledger.transition(&job.id, JobStatus::Running, None).unwrap_err();
        assert!(matches!(err, LedgerError::InvalidTransition { .. }));
        assert_eq!(ledger.get_job(&job.id).unwrap().status, JobStatus::Added);

        // Terminal states accept nothing further.
        ledger.transition(&job.id, JobStatus::Scheduled, None).unwrap();
        ledger.transition(&job.id, JobStatus::Running, None).unwrap();
        ledger.transition(&job.id, JobStatus::Success, None).unwrap();
        let err = ledger
            .transition(&job.id, JobStatus::Failed, Some("late"))
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidTransition { .. }));
        assert_eq!(ledger.get_job(&job.id).unwrap().status, JobStatus::Success);
    }

    #[test]
    fn claim_running_has_one_winner() {
        let ledger = ledger_with_policy("p1");
        let job = ledger.create_job(sample_job("p1")).unwrap();
        ledger.transition(&job.id, JobStatus::Scheduled, None).unwrap();

        assert!(ledger.claim_running(&job.id).unwrap());
        // The second claimant loses without an error.
        assert!(!ledger.claim_running(&job.id).unwrap());
        assert_eq!(ledger.get_job(&job.id).unwrap().status, JobStatus::Running);
    }

    #[test]
    fn deleting_policy_cascades_to_jobs() {
        let ledger = ledger_with_policy("p1");
        let job_a = ledger.create_job(sample_job("p1")).unwrap();
        let job_b = ledger.create_job(sample_job("p1")).unwrap();

        assert!(ledger.delete_policy("p1").unwrap());
        assert!(matches!(
            ledger.get_job(&job_a.id).unwrap_err(),
            LedgerError::JobNotFound(_)
        ));
        assert!(matches!(
            ledger.get_job(&job_b.id).unwrap_err(),
            LedgerError::JobNotFound(_)
        ));
    }

    #[test]
    fn in_flight_tracks_scheduled_and_running_only() {
        let ledger = ledger_with_policy("p1");
        let job = ledger.create_job(sample_job("p1")).unwrap();
        assert!(!ledger.in_flight("p1", "schedule").unwrap());

        ledger.transition(&job.id, JobStatus::Scheduled, None).unwrap();
        assert!(ledger.in_flight("p1", "schedule").unwrap());
        assert!(!ledger.in_flight("p1", "on-demand").unwrap());

        ledger.transition(&job.id, JobStatus::Running, None).unwrap();
        assert!(ledger.in_flight("p1", "schedule").unwrap());

        ledger.transition(&job.id, JobStatus::Success, None).unwrap();
        assert!(!ledger.in_flight("p1", "schedule").unwrap());
    }

    #[test]
    fn list_jobs_filters() {
        let ledger = ledger_with_policy("p1");
        ledger.upsert_policy(&sample_policy("p2")).unwrap();

        let a = ledger.create_job(sample_job("p1")).unwrap();
        let mut other = sample_job("p2");
        other.operation = "transform".to_string();
        ledger.create_job(other).unwrap();

        assert_eq!(ledger.list_jobs(&JobFilter::default()).unwrap().len(), 2);

        let by_policy = ledger
            .list_jobs(&JobFilter { policy_id: Some("p1".to_string()), ..Default::default() })
            .unwrap();
        assert_eq!(by_policy.len(), 1);
        assert_eq!(by_policy[0].id, a.id);

        let by_operation = ledger
            .list_jobs(&JobFilter { operation: Some("transform".to_string()), ..Default::default() })
            .unwrap();
        assert_eq!(by_operation.len(), 1);

        let by_status = ledger
            .list_jobs(&JobFilter { status: Some(JobStatus::Added), ..Default::default() })
            .unwrap();
        assert_eq!(by_status.len(), 2);
    }

    #[test]
    fn feed_publishes_every_transition() {
        let ledger = ledger_with_policy("p1");
        let mut feed = ledger.subscribe();

        let job = ledger.create_job(sample_job("p1")).unwrap();
        ledger.transition(&job.id, JobStatus::Scheduled, None).unwrap();
        ledger.transition(&job.id, JobStatus::Running, None).unwrap();
        ledger.transition(&job.id, JobStatus::Success, None).unwrap();

        let statuses: Vec<JobStatus> = std::iter::from_fn(|| feed.try_recv().ok())
            .map(|u| u.status)
            .collect();
        assert_eq!(
            statuses,
            vec![
                JobStatus::Added,
                JobStatus::Scheduled,
                JobStatus::Running,
                JobStatus::Success
            ]
        );
    }

    #[test]
    fn reopen_preserves_jobs() {
        let dir = tempfile::TempDir::new().unwrap();
        let db_path = dir.path().join("ledger.sqlite");

        let job_id = {
            let ledger = Ledger::open(&db_path).unwrap();
            ledger.upsert_policy(&sample_policy("p1")).unwrap();
            let job = ledger.create_job(sample_job("p1")).unwrap();
            ledger.transition(&job.id, JobStatus::Scheduled, None).unwrap();
            job.id
        };

        let reopened = Ledger::open(&db_path).unwrap();
        let job = reopened.get_job(&job_id).unwrap();
        assert_eq!(job.status, JobStatus::Scheduled);
        assert_eq!(job.filetypes, vec!["hdf5".to_string()]);
    }
}
