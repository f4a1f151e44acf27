//! Per-trigger scheduling state and due-checks.
//!
//! Only stateful trigger kinds are tracked here: cron (last fire time),
//! fixed date (fired-once flag), and condition (previous evaluation, for
//! edge detection). On-demand and event triggers are stateless — they fire
//! on each invocation.
//!
//! State is keyed by `(policy name, trigger index)` so it survives policy
//! hot-reloads, which assign fresh policy ids.

use std::collections::HashMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule;
use tracing::{debug, warn};

use daskeeper_core::{ExternalEvent, MetricSnapshot};
use daskeeper_policy::condition::ConditionExpr;
use daskeeper_policy::validation::normalize_cron;
use daskeeper_policy::{Policy, ProtectionWindow, ScheduleSpec, Trigger};

/// A trigger instance that is due; input to job materialization.
#[derive(Debug, Clone)]
pub struct FiredTrigger {
    pub policy_name: String,
    pub trigger_index: usize,
    /// Present when an event trigger fired; carried into the job snapshot.
    pub window: Option<ProtectionWindow>,
}

#[derive(Debug)]
enum TriggerState {
    Cron {
        expression: String,
        last_fired: Option<DateTime<Utc>>,
    },
    Date {
        at: DateTime<Utc>,
        fired: bool,
    },
    Condition {
        expr: ConditionExpr,
        last_eval: bool,
    },
}

#[derive(Debug)]
struct TriggerEntry {
    /// Declared spec, kept to detect changes on re-sync.
    declared: Trigger,
    state: TriggerState,
}

/// Scheduling state for all stateful triggers of the loaded policy set.
#[derive(Debug, Default)]
pub struct TriggerStates {
    entries: HashMap<(String, usize), TriggerEntry>,
}

impl TriggerStates {
    pub fn new() -> Self {
        Self::default()
    }

    /// Synchronize entries with the current policy set.
    ///
    /// - Adds entries for new triggers; cron triggers start with
    ///   `last_fired = now` (the policy load time) so they fire at the next
    ///   boundary, not immediately.
    /// - Keeps state for unchanged triggers across hot-reloads.
    /// - Drops entries whose policy or trigger disappeared.
    pub fn sync(&mut self, policies: &[Policy], now: DateTime<Utc>) {
        let mut current: std::collections::HashSet<(String, usize)> = Default::default();

        for policy in policies {
            for (index, trigger) in policy.triggers().iter().enumerate() {
                let key = (policy.name().to_string(), index);
                current.insert(key.clone());

                let unchanged = self
                    .entries
                    .get(&key)
                    .is_some_and(|e| &e.declared == trigger);
                if unchanged {
                    continue;
                }

                if let Some(state) = Self::initial_state(trigger, now) {
                    self.entries.insert(
                        key,
                        TriggerEntry {
                            declared: trigger.clone(),
                            state,
                        },
                    );
                } else {
                    self.entries.remove(&key);
                }
            }
        }

        self.entries.retain(|key, _| current.contains(key));
    }

    fn initial_state(trigger: &Trigger, now: DateTime<Utc>) -> Option<TriggerState> {
        match trigger {
            Trigger::Schedule { spec: ScheduleSpec::Cron { cron } } => Some(TriggerState::Cron {
                expression: normalize_cron(cron),
                last_fired: Some(now),
            }),
            Trigger::Schedule { spec: ScheduleSpec::Date { date } } => Some(TriggerState::Date {
                at: *date,
                fired: false,
            }),
            Trigger::Condition { expression } => match expression.parse::<ConditionExpr>() {
                Ok(expr) => Some(TriggerState::Condition { expr, last_eval: false }),
                // Unreachable after load-time validation; never fire rather
                // than guess.
                Err(e) => {
                    warn!(expression = %expression, error = %e, "unparseable condition trigger");
                    None
                }
            },
            Trigger::OnDemand { .. } | Trigger::Event { .. } => None,
        }
    }

    /// Evaluate schedule and condition triggers at `now`, in policy and
    /// trigger declaration order. Fired cron triggers advance `last_fired`;
    /// fired date triggers retire.
    ///
    /// A missing metric snapshot skips condition triggers for this tick
    /// only (the probe is retried next tick).
    pub fn due_at(
        &mut self,
        policies: &[Policy],
        now: DateTime<Utc>,
        metrics: Option<&MetricSnapshot>,
    ) -> Vec<FiredTrigger> {
        let mut fired = Vec::new();

        for policy in policies {
            for (index, trigger) in policy.triggers().iter().enumerate() {
                let key = (policy.name().to_string(), index);
                let Some(entry) = self.entries.get_mut(&key) else {
                    continue;
                };

                let due = match &mut entry.state {
                    TriggerState::Cron { expression, last_fired } => {
                        match Schedule::from_str(expression) {
                            Ok(schedule) => {
                                if is_cron_due(&schedule, now, *last_fired) {
                                    *last_fired = Some(now);
                                    true
                                } else {
                                    false
                                }
                            }
                            Err(e) => {
                                warn!(
                                    policy = policy.name(),
                                    cron = %expression,
                                    error = %e,
                                    "invalid cron expression"
                                );
                                false
                            }
                        }
                    }
                    TriggerState::Date { at, fired: already } => {
                        if !*already && now >= *at {
                            *already = true;
                            true
                        } else {
                            false
                        }
                    }
                    TriggerState::Condition { expr, last_eval } => match metrics {
                        Some(snapshot) => {
                            let current = expr.evaluate(snapshot);
                            // Edge-triggered: fire only on false -> true so a
                            // persistently-true condition does not flood jobs.
                            let rising = current && !*last_eval;
                            *last_eval = current;
                            rising
                        }
                        None => {
                            debug!(
                                policy = policy.name(),
                                "no metric snapshot; skipping condition trigger this tick"
                            );
                            false
                        }
                    },
                };

                if due {
                    debug!(policy = policy.name(), index, kind = trigger.kind(), "trigger due");
                    fired.push(FiredTrigger {
                        policy_name: policy.name().to_string(),
                        trigger_index: index,
                        window: None,
                    });
                }
            }
        }

        fired
    }

    /// Fire all on-demand triggers of one policy.
    pub fn fire_on_demand(&self, policy: &Policy) -> Vec<FiredTrigger> {
        policy
            .triggers()
            .iter()
            .enumerate()
            .filter(|(_, t)| matches!(t, Trigger::OnDemand { .. }))
            .map(|(index, _)| FiredTrigger {
                policy_name: policy.name().to_string(),
                trigger_index: index,
                window: None,
            })
            .collect()
    }

    /// Fire event triggers whose source matches and whose geofence contains
    /// the event position, attaching the protection window.
    pub fn match_event(&self, policies: &[Policy], event: &ExternalEvent) -> Vec<FiredTrigger> {
        let mut fired = Vec::new();
        for policy in policies {
            for (index, trigger) in policy.triggers().iter().enumerate() {
                let Trigger::Event { source, geofence, window } = trigger else {
                    continue;
                };
                if source != &event.source || !geofence.contains(&event.position) {
                    continue;
                }
                debug!(
                    policy = policy.name(),
                    source = %event.source,
                    "event inside geofence; trigger fired"
                );
                fired.push(FiredTrigger {
                    policy_name: policy.name().to_string(),
                    trigger_index: index,
                    window: Some(ProtectionWindow {
                        center: event.position,
                        radius_km: window.radius_km,
                        event_time: event.observed_at,
                        dt_seconds: window.dt_seconds,
                    }),
                });
            }
        }
        fired
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Check if a cron schedule is due at `now`: the first scheduled tick after
/// `last_fired` has arrived. With no prior fire, any tick in the last day
/// counts.
fn is_cron_due(schedule: &Schedule, now: DateTime<Utc>, last_fired: Option<DateTime<Utc>>) -> bool {
    let check_from = last_fired.unwrap_or(now - chrono::Duration::days(1));
    match schedule.after(&check_from).next() {
        Some(next) => next <= now,
        None => false,
    }
}
