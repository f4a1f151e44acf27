//! Asynchronous intake surface: on-demand invocations, external events,
//! metric updates, and unit-inventory refreshes arrive here and are drained
//! by the scheduler loop between ticks.

use tokio::sync::mpsc;

use daskeeper_core::{DataUnit, ExternalEvent, MetricSnapshot};

/// External metric/event intake failures. Never fatal: the affected
/// trigger's evaluation is skipped for the current tick and retried next.
#[derive(Debug, thiserror::Error)]
pub enum IntakeError {
    #[error("scheduler intake channel closed")]
    ChannelClosed,

    #[error("invalid event: {0}")]
    InvalidEvent(String),
}

/// Messages accepted by the scheduler loop.
#[derive(Debug)]
pub enum IntakeMessage {
    /// Fire the on-demand triggers of one policy (API surface).
    Invoke { policy_id: String },
    /// One observation from an external event feed.
    Event(ExternalEvent),
    /// Fresh reading from the storage-utilization probe.
    Metrics(MetricSnapshot),
    /// Replace the set of currently known data units.
    Units(Vec<DataUnit>),
    /// Re-load the policy document (sent by the file watcher).
    ReloadPolicies,
    /// Graceful shutdown.
    Shutdown,
}

/// Cloneable handle for feeding the scheduler from other tasks.
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    tx: mpsc::UnboundedSender<IntakeMessage>,
}

impl SchedulerHandle {
    /// Create a handle plus the receiver the scheduler loop drains.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<IntakeMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Fire a policy's on-demand triggers.
    pub fn invoke(&self, policy_id: impl Into<String>) -> Result<(), IntakeError> {
        self.send(IntakeMessage::Invoke { policy_id: policy_id.into() })
    }

    pub fn submit_event(&self, event: ExternalEvent) -> Result<(), IntakeError> {
        if !event.position.is_valid() {
            return Err(IntakeError::InvalidEvent(format!(
                "coordinates ({}, {}) are out of range",
                event.position.lat, event.position.lon
            )));
        }
        self.send(IntakeMessage::Event(event))
    }

    pub fn update_metrics(&self, snapshot: MetricSnapshot) -> Result<(), IntakeError> {
        self.send(IntakeMessage::Metrics(snapshot))
    }

    pub fn set_units(&self, units: Vec<DataUnit>) -> Result<(), IntakeError> {
        self.send(IntakeMessage::Units(units))
    }

    pub fn reload_policies(&self) -> Result<(), IntakeError> {
        self.send(IntakeMessage::ReloadPolicies)
    }

    pub fn shutdown(&self) -> Result<(), IntakeError> {
        self.send(IntakeMessage::Shutdown)
    }

    fn send(&self, msg: IntakeMessage) -> Result<(), IntakeError> {
        self.tx.send(msg).map_err(|_| IntakeError::ChannelClosed)
    }
}
