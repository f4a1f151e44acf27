//! The scheduler engine: tick evaluation and trigger-to-job
//! materialization.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use daskeeper_core::{Clock, DataUnit, ExternalEvent, MetricSnapshot};
use daskeeper_ledger::{Job, JobStatus, Ledger, LedgerError, NewJob, PolicyRecord};
use daskeeper_policy::{matcher, Action, Policy, PolicySet, ProtectionWindow};

use crate::intake::IntakeMessage;
use crate::triggers::{FiredTrigger, TriggerStates};

/// One unit of work handed to the worker pool: the durable job id plus the
/// execution detail the ledger row does not carry.
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub job_id: String,
    pub unit: DataUnit,
    pub action: Action,
    pub window: Option<ProtectionWindow>,
}

/// The scheduler: owns the tick cadence, trigger state, the current policy
/// snapshot, and the set of known data units.
pub struct Scheduler {
    policies: PolicySet,
    policy_path: Option<PathBuf>,
    triggers: TriggerStates,
    units: Vec<DataUnit>,
    ledger: Arc<Ledger>,
    clock: Arc<dyn Clock>,
    metrics: Option<MetricSnapshot>,
    evaluation_interval: Duration,
    work_tx: mpsc::UnboundedSender<WorkItem>,
}

impl Scheduler {
    /// Build a scheduler over a loaded policy set. Persists the policy rows
    /// so job rows can reference them.
    pub fn new(
        policies: PolicySet,
        ledger: Arc<Ledger>,
        clock: Arc<dyn Clock>,
        work_tx: mpsc::UnboundedSender<WorkItem>,
    ) -> Result<Self, LedgerError> {
        let evaluation_interval =
            Duration::from_secs(policies.settings.policy_evaluation_interval.max(1));

        let mut scheduler = Self {
            policies,
            policy_path: None,
            triggers: TriggerStates::new(),
            units: Vec::new(),
            ledger,
            clock,
            metrics: None,
            evaluation_interval,
            work_tx,
        };
        scheduler
            .triggers
            .sync(scheduler.policies.policies(), scheduler.clock.now());
        scheduler.persist_policies()?;
        Ok(scheduler)
    }

    /// Remember the document path so [`IntakeMessage::ReloadPolicies`] can
    /// re-load it.
    pub fn with_policy_path(mut self, path: PathBuf) -> Self {
        self.policy_path = Some(path);
        self
    }

    pub fn policies(&self) -> &PolicySet {
        &self.policies
    }

    pub fn evaluation_interval(&self) -> Duration {
        self.evaluation_interval
    }

    /// Replace the set of currently known data units.
    pub fn set_units(&mut self, units: Vec<DataUnit>) {
        debug!(count = units.len(), "updated known data units");
        self.units = units;
    }

    pub fn update_metrics(&mut self, snapshot: MetricSnapshot) {
        self.metrics = Some(snapshot);
    }

    /// One pass of the scheduling clock: evaluate schedule and condition
    /// triggers, materialize jobs for everything due. Returns the number of
    /// jobs created.
    pub fn tick(&mut self) -> usize {
        let now = self.clock.now();
        let fired = self
            .triggers
            .due_at(self.policies.policies(), now, self.metrics.as_ref());

        let mut created = 0;
        for trigger in &fired {
            created += self.materialize(trigger);
        }
        if created > 0 {
            info!(created, "tick materialized jobs");
        }
        created
    }

    /// Fire the on-demand triggers of one policy (by id, falling back to
    /// name). Never self-recurs.
    pub fn invoke(&mut self, policy_id: &str) -> usize {
        let policy = self
            .policies
            .get(policy_id)
            .or_else(|| self.policies.get_by_name(policy_id));
        let Some(policy) = policy else {
            warn!(policy_id, "on-demand invocation for unknown policy");
            return 0;
        };

        let fired = self.triggers.fire_on_demand(policy);
        if fired.is_empty() {
            warn!(policy = policy.name(), "policy has no on-demand trigger");
            return 0;
        }

        fired.iter().map(|f| self.materialize(f)).sum()
    }

    /// Feed one external event through the geofence triggers.
    pub fn handle_event(&mut self, event: ExternalEvent) -> usize {
        if !event.position.is_valid() {
            warn!(
                source = %event.source,
                lat = event.position.lat,
                lon = event.position.lon,
                "dropping event with invalid coordinates"
            );
            return 0;
        }

        let fired = self.triggers.match_event(self.policies.policies(), &event);
        fired.iter().map(|f| self.materialize(f)).sum()
    }

    /// Persist all loaded policies into the ledger's policy table.
    pub fn persist_policies(&self) -> Result<(), LedgerError> {
        for policy in self.policies.policies() {
            self.ledger.upsert_policy(&policy_record(policy))?;
        }
        Ok(())
    }

    /// Re-load the policy document; on a validation failure the previous
    /// set is kept and the error is logged.
    pub fn reload_policies(&mut self) {
        let Some(path) = self.policy_path.clone() else {
            warn!("reload requested but no policy path is configured");
            return;
        };
        match PolicySet::load(&path) {
            Ok(set) => {
                self.policies = set;
                self.triggers
                    .sync(self.policies.policies(), self.clock.now());
                if let Err(e) = self.persist_policies() {
                    warn!(error = %e, "failed to persist reloaded policies");
                }
                info!(policies = self.policies.len(), "policy set reloaded");
            }
            Err(e) => {
                warn!(error = %e, "policy reload failed; keeping previous set");
            }
        }
    }

    /// Turn one fired trigger into jobs: match units, then create one job
    /// per declared action per matched unit, in declaration order.
    fn materialize(&self, fired: &FiredTrigger) -> usize {
        let Some(policy) = self.policies.get_by_name(&fired.policy_name) else {
            return 0;
        };
        // Disabled policies are matched by evaluation but produce no jobs.
        if !policy.is_enabled() {
            debug!(policy = policy.name(), "skipping disabled policy");
            return 0;
        }
        let Some(trigger) = policy.triggers().get(fired.trigger_index) else {
            return 0;
        };

        // One in-flight job per (policy, trigger) pair.
        match self.ledger.in_flight(&policy.id, trigger.kind()) {
            Ok(false) => {}
            Ok(true) => {
                debug!(
                    policy = policy.name(),
                    kind = trigger.kind(),
                    "earlier job still in flight; suppressing duplicate"
                );
                return 0;
            }
            Err(e) => {
                warn!(policy = policy.name(), error = %e, "in-flight check failed; skipping");
                return 0;
            }
        }

        let matched: Vec<&DataUnit> = self
            .units
            .iter()
            .filter(|u| matcher::selector_matches(policy.selector(), u))
            .collect();
        if matched.is_empty() {
            debug!(policy = policy.name(), "trigger fired but no units matched");
            return 0;
        }

        let snapshot = trigger_snapshot(trigger, fired.window.as_ref());

        let mut created = 0;
        for action in policy.actions() {
            for unit in &matched {
                match self.create_and_schedule(policy, trigger.kind(), action, unit, &snapshot) {
                    Ok(job) => {
                        let item = WorkItem {
                            job_id: job.id,
                            unit: (*unit).clone(),
                            action: action.clone(),
                            window: fired.window.clone(),
                        };
                        if self.work_tx.send(item).is_err() {
                            warn!("worker channel closed; job stays scheduled");
                        }
                        created += 1;
                    }
                    Err(e) => {
                        error!(
                            policy = policy.name(),
                            unit = %unit.display_key(),
                            error = %e,
                            "failed to create job"
                        );
                    }
                }
            }
        }

        if created > 0 {
            info!(
                policy = policy.name(),
                kind = trigger.kind(),
                created,
                "trigger fired"
            );
        }
        created
    }

    fn create_and_schedule(
        &self,
        policy: &Policy,
        trigger_type: &str,
        action: &Action,
        unit: &DataUnit,
        snapshot: &serde_json::Value,
    ) -> Result<Job, LedgerError> {
        let job = self.ledger.create_job(NewJob {
            policy_id: policy.id.clone(),
            name: format!("{} {}", action.kind(), unit.display_key()),
            operation: action.kind().to_string(),
            filetypes: vec![unit.data_type.clone()],
            trigger_type: trigger_type.to_string(),
            trigger_spec: snapshot.clone(),
        })?;
        // Creation is immediately eligible for execution; there is no
        // separate approval gate.
        self.ledger.transition(&job.id, JobStatus::Scheduled, None)
    }

    /// Drive the tick loop, draining intake messages between ticks.
    pub async fn run(mut self, mut intake: mpsc::UnboundedReceiver<IntakeMessage>) {
        info!(
            interval_secs = self.evaluation_interval.as_secs(),
            policies = self.policies.len(),
            "scheduler started"
        );

        let mut interval = tokio::time::interval(self.evaluation_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick();
                }
                msg = intake.recv() => match msg {
                    Some(IntakeMessage::Invoke { policy_id }) => {
                        self.invoke(&policy_id);
                    }
                    Some(IntakeMessage::Event(event)) => {
                        self.handle_event(event);
                    }
                    Some(IntakeMessage::Metrics(snapshot)) => {
                        self.update_metrics(snapshot);
                    }
                    Some(IntakeMessage::Units(units)) => {
                        self.set_units(units);
                    }
                    Some(IntakeMessage::ReloadPolicies) => {
                        self.reload_policies();
                    }
                    Some(IntakeMessage::Shutdown) | None => {
                        info!("scheduler shutting down");
                        break;
                    }
                },
            }
        }
    }
}

/// Snapshot of the trigger that produced a job, with the protection window
/// attached when an event trigger fired.
fn trigger_snapshot(
    trigger: &daskeeper_policy::Trigger,
    window: Option<&ProtectionWindow>,
) -> serde_json::Value {
    let mut snapshot = serde_json::to_value(trigger)
        .unwrap_or_else(|_| serde_json::json!({ "type": trigger.kind() }));
    if let (Some(window), Some(map)) = (window, snapshot.as_object_mut()) {
        if let Ok(value) = serde_json::to_value(window) {
            map.insert("protection".to_string(), value);
        }
    }
    snapshot
}

fn policy_record(policy: &Policy) -> PolicyRecord {
    PolicyRecord {
        id: policy.id.clone(),
        name: policy.name().to_string(),
        policy_file: policy.policy_file.display().to_string(),
        is_enabled: policy.is_enabled(),
        strategy: policy.spec.strategy.clone(),
        data_type: policy.spec.selector.data_type.clone(),
        tags: policy.spec.selector.tags.clone(),
        paths: policy
            .spec
            .selector
            .paths
            .iter()
            .map(|p| p.display().to_string())
            .collect(),
        operations: policy.spec.operations.clone(),
        triggers: serde_json::to_value(policy.triggers())
            .unwrap_or_else(|_| serde_json::Value::Array(Vec::new())),
    }
}
