//! Forwarder from the ledger's broadcast feed to the dispatcher.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use daskeeper_ledger::JobUpdate;

use crate::dispatcher::Dispatcher;
use crate::traits::Notification;

/// Render a ledger update as a `job_update` notification.
fn to_notification(update: &JobUpdate) -> Notification {
    let mut metadata = HashMap::new();
    metadata.insert("id".to_string(), update.id.clone());
    metadata.insert("status".to_string(), update.status.to_string());
    if let Some(at) = update.last_run_time {
        metadata.insert("last_run_time".to_string(), at.to_rfc3339());
    }
    if let Some(error) = &update.last_error {
        metadata.insert("last_error".to_string(), error.clone());
    }

    Notification {
        subject: "job_update".to_string(),
        body: format!("job {} is {}", update.id, update.status),
        metadata,
    }
}

/// Consume a ledger feed subscription and dispatch every update.
///
/// A lagged subscription (updates outpacing delivery) is logged and
/// resumed; delivery failures are already isolated per channel by the
/// dispatcher.
pub fn spawn_feed_forwarder(
    mut feed: broadcast::Receiver<JobUpdate>,
    dispatcher: Arc<Dispatcher>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("job-update forwarder started");
        loop {
            match feed.recv().await {
                Ok(update) => {
                    dispatcher.dispatch(&to_notification(&update)).await;
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "job-update feed lagged; some updates were dropped");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    info!("job-update feed closed; forwarder stopping");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use daskeeper_ledger::JobStatus;

    #[test]
    fn notification_carries_job_fields() {
        let update = JobUpdate {
            id: "job-1".to_string(),
            status: JobStatus::Failed,
            last_run_time: None,
            last_error: Some("disk unreadable".to_string()),
        };
        let n = to_notification(&update);
        assert_eq!(n.subject, "job_update");
        assert_eq!(n.metadata.get("status").map(String::as_str), Some("failed"));
        assert_eq!(
            n.metadata.get("last_error").map(String::as_str),
            Some("disk unreadable")
        );
        assert!(!n.metadata.contains_key("last_run_time"));
    }
}
