//! Worker pool executing claimed jobs against the action plugins.
//!
//! Workers run apart from the tick loop so a slow action (a large-file
//! downsample) never delays trigger evaluation. Two different jobs touching
//! the same unit concurrently (retention racing a downsample) is a policy
//! authoring hazard the engine does not arbitrate.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use daskeeper_actions::{ActionRegistry, ExecutionContext};
use daskeeper_ledger::{JobStatus, Ledger};

use crate::engine::WorkItem;

/// Claim and execute one work item, reporting the outcome to the ledger.
///
/// Everything that can go wrong here lands on this job only: the item is
/// either executed, marked `failed` with a readable `last_error`, or found
/// to be claimed by another worker (not an error).
pub fn execute_item(
    item: &WorkItem,
    ledger: &Ledger,
    registry: &ActionRegistry,
    ctx: &ExecutionContext,
) {
    match ledger.claim_running(&item.job_id) {
        Ok(true) => {}
        Ok(false) => {
            // Someone else is handling it.
            debug!(job_id = %item.job_id, "job already claimed; skipping");
            return;
        }
        Err(e) => {
            warn!(job_id = %item.job_id, error = %e, "claim failed");
            return;
        }
    }

    let Some(plugin) = registry.get(item.action.kind()) else {
        report_failed(
            ledger,
            &item.job_id,
            &format!("no plugin registered for action '{}'", item.action.kind()),
        );
        return;
    };

    match plugin.execute(&item.unit, &item.action, item.window.as_ref(), ctx) {
        Ok(outcome) => {
            if let Some(warning) = &outcome.warning {
                info!(job_id = %item.job_id, warning = %warning, "action raised a warning");
            }
            info!(
                job_id = %item.job_id,
                applied = ?outcome.applied_ops,
                bytes_before = outcome.bytes_before,
                bytes_after = outcome.bytes_after,
                "job succeeded"
            );
            if let Err(e) = ledger.transition(&item.job_id, JobStatus::Success, None) {
                warn!(job_id = %item.job_id, error = %e, "failed to record success");
            }
        }
        Err(exec_err) => {
            warn!(job_id = %item.job_id, error = %exec_err, "action failed");
            report_failed(ledger, &item.job_id, &exec_err.to_string());
        }
    }
}

fn report_failed(ledger: &Ledger, job_id: &str, message: &str) {
    if let Err(e) = ledger.transition(job_id, JobStatus::Failed, Some(message)) {
        warn!(job_id, error = %e, "failed to record job failure");
    }
}

/// Spawn `count` workers draining the shared work channel. Each item runs
/// on the blocking pool; a panicking plugin fails its job, not the worker.
pub fn spawn_workers(
    count: usize,
    work_rx: mpsc::UnboundedReceiver<WorkItem>,
    ledger: Arc<Ledger>,
    registry: ActionRegistry,
    ctx: ExecutionContext,
) -> Vec<JoinHandle<()>> {
    let rx = Arc::new(Mutex::new(work_rx));

    (0..count.max(1))
        .map(|worker| {
            let rx = Arc::clone(&rx);
            let ledger = Arc::clone(&ledger);
            let registry = registry.clone();
            let ctx = ctx.clone();

            tokio::spawn(async move {
                debug!(worker, "action worker started");
                loop {
                    let item = { rx.lock().await.recv().await };
                    let Some(item) = item else { break };

                    let job_id = item.job_id.clone();
                    let task_ledger = Arc::clone(&ledger);
                    let task_registry = registry.clone();
                    let task_ctx = ctx.clone();
                    let result = tokio::task::spawn_blocking(move || {
                        execute_item(&item, &task_ledger, &task_registry, &task_ctx)
                    })
                    .await;

                    if let Err(e) = result {
                        warn!(job_id = %job_id, error = %e, "action execution panicked");
                        report_failed(&ledger, &job_id, "action execution panicked");
                    }
                }
                debug!(worker, "action worker stopped");
            })
        })
        .collect()
}
