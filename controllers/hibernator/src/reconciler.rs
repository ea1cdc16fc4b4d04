//! Reconciliation of Hibernator resources.
//!
//! One tick per reconcile:
//!
//! 1. `pauseUntil` in the future (past the requeue floor): wait for it.
//! 2. `pause`: do nothing until the resource changes.
//! 3. Evaluate the schedule; a broken schedule marks the status `Failed`.
//! 4. Apply the `hibernate` / `unHibernate` overrides.
//! 5. Compute the next requeue from the window gap and `reSyncInterval`.
//! 6. Skip the transition when the last history entry is younger than the
//!    requeue floor.
//! 7. Run the transition, fold the reports into the history and persist the
//!    status.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use crds::{Hibernator, HibernatorState, HibernatorStatus};
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, ResourceExt};
use resource_client::ResourceClientTrait;
use serde_json::json;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::action::{ActionEngine, Transition, TransitionReport};
use crate::backoff::BackoffTracker;
use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::expression::Evaluator;
use crate::history::HistoryStore;
use crate::metrics::{
    Metrics, OUTCOME_DEBOUNCED, OUTCOME_ERROR, OUTCOME_IDLE, OUTCOME_PAUSED, OUTCOME_SCHEDULE_ERROR,
    OUTCOME_TRANSITIONED,
};
use crate::schedule;

/// Persists the status subresource of a Hibernator
#[async_trait::async_trait]
pub trait StatusWriter: Send + Sync {
    async fn write_status(&self, hibernator: &Hibernator, status: &HibernatorStatus) -> Result<(), ControllerError>;
}

/// Writes status through the API server
///
/// The observed `resourceVersion` goes into the merge patch, so a concurrent
/// update of the resource makes the write fail with a conflict.
pub struct KubeStatusWriter {
    client: Client,
}

impl KubeStatusWriter {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl StatusWriter for KubeStatusWriter {
    async fn write_status(&self, hibernator: &Hibernator, status: &HibernatorStatus) -> Result<(), ControllerError> {
        let name = hibernator.name_any();
        let namespace = hibernator.namespace().unwrap_or_default();
        let api: Api<Hibernator> = Api::namespaced(self.client.clone(), &namespace);

        let patch = json!({
            "metadata": {"resourceVersion": hibernator.resource_version()},
            "status": status
        });
        api.patch_status(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|source| ControllerError::StatusUpdate {
                name: format!("{namespace}/{name}"),
                source,
            })?;
        Ok(())
    }
}

/// Requeue delay for a window gap
///
/// `reSyncInterval` caps the delay when positive; the result never drops
/// below `floor`.
#[must_use]
pub fn requeue_delay(gap_seconds: i64, resync_seconds: i64, floor: Duration) -> Duration {
    let seconds = if resync_seconds > 0 {
        gap_seconds.min(resync_seconds)
    } else {
        gap_seconds
    };
    Duration::from_secs(u64::try_from(seconds).unwrap_or(0)).max(floor)
}

/// Decision taken by one tick
#[derive(Debug, Clone, PartialEq)]
pub struct Tick {
    /// Metrics outcome label
    pub outcome: &'static str,
    /// Status to persist, `None` to leave it untouched
    pub status: Option<HibernatorStatus>,
    /// `None` waits for the next change of the resource
    pub requeue_after: Option<Duration>,
}

impl Tick {
    fn wait(outcome: &'static str, requeue_after: Option<Duration>) -> Self {
        Self {
            outcome,
            status: None,
            requeue_after,
        }
    }
}

/// Reconciles Hibernator resources.
pub struct Reconciler {
    resource_client: Arc<dyn ResourceClientTrait>,
    status_writer: Arc<dyn StatusWriter>,
    evaluator: Evaluator,
    config: ControllerConfig,
    backoff: BackoffTracker,
    metrics: Arc<Metrics>,
}

impl Reconciler {
    pub fn new(
        resource_client: Arc<dyn ResourceClientTrait>,
        status_writer: Arc<dyn StatusWriter>,
        evaluator: Evaluator,
        config: ControllerConfig,
        metrics: Arc<Metrics>,
    ) -> Self {
        let backoff = BackoffTracker::new(config.error_backoff_min_minutes, config.error_backoff_max_minutes);
        Self {
            resource_client,
            status_writer,
            evaluator,
            config,
            backoff,
            metrics,
        }
    }

    /// Compute the outcome of one tick at `now`
    ///
    /// Runs the transition against the cluster but does not persist status.
    pub async fn tick(&self, hibernator: &Hibernator, now: DateTime<Utc>) -> Tick {
        let spec = &hibernator.spec;
        let previous = hibernator.status.clone().unwrap_or_default();
        let floor = self.config.requeue_floor();
        let mut notes = Vec::new();

        if let Some(pause_until) = &spec.pause_until {
            match schedule::parse_date_time(pause_until) {
                Ok(until) => {
                    if let Some(remaining) = (until - now).to_std().ok().filter(|remaining| *remaining > floor) {
                        debug!("Paused until {}", until);
                        return Tick::wait(OUTCOME_PAUSED, Some(remaining));
                    }
                }
                Err(e) => {
                    warn!("Ignoring pauseUntil: {}", e);
                    notes.push(format!("ignoring pauseUntil: {e}"));
                }
            }
        }

        if spec.pause {
            debug!("Paused");
            return Tick::wait(OUTCOME_PAUSED, None);
        }

        let gap = match schedule::nearest_time_gap(&spec.when, now) {
            Ok(gap) => gap,
            Err(e) => {
                warn!("Cannot evaluate the schedule: {}", e);
                notes.push(format!("invalid schedule: {e}"));
                let requeue_after = (spec.re_sync_interval > 0)
                    .then(|| requeue_delay(spec.re_sync_interval, spec.re_sync_interval, floor));
                return Tick {
                    outcome: OUTCOME_SCHEDULE_ERROR,
                    status: Some(HibernatorStatus {
                        status: HibernatorState::Failed,
                        message: notes.join("; "),
                        ..previous
                    }),
                    requeue_after,
                };
            }
        };

        let active = if spec.hibernate {
            true
        } else if spec.un_hibernate {
            false
        } else {
            gap.within_range
        };
        let requeue_after = requeue_delay(gap.time_gap_in_seconds, spec.re_sync_interval, floor);

        let mut history = HistoryStore::from_entries(previous.history.clone(), spec.history_limit());
        debug!("History holds {} of {} entries", history.len(), spec.history_limit());
        let floor_seconds = i64::try_from(floor.as_secs()).unwrap_or(i64::MAX);
        if let Some(latest) = history.latest() {
            if now.signed_duration_since(latest.time).num_seconds() < floor_seconds {
                debug!("Last transition at {} is too recent, skipping this tick", latest.time);
                return Tick::wait(OUTCOME_DEBOUNCED, Some(requeue_after));
            }
        }

        let primary = Transition::resolve(spec.action, active, spec, gap.matched_index);
        let resync = primary.as_ref().map(Transition::action) == previous.action;
        info!(
            "Window {} (gap {}s, range {}), running {:?}{}",
            if active { "active" } else { "inactive" },
            gap.time_gap_in_seconds,
            gap.matched_index,
            primary.as_ref().map(Transition::action),
            if resync { " (resync)" } else { "" }
        );

        let engine = ActionEngine::new(self.resource_client.as_ref(), &self.evaluator, now);
        let reports = engine.execute(spec, active, gap.matched_index, &history).await;

        let mut failures = 0;
        let mut transitioned = false;
        for report in reports {
            self.metrics.record_report(&report);
            failures += report.failures();
            if report.impacted_objects.is_empty() {
                continue;
            }
            transitioned = true;
            let TransitionReport {
                action,
                impacted_objects,
                excluded_objects,
            } = report;
            if resync && history.latest().is_some_and(|latest| latest.action == action) {
                history.merge_into_latest(now, action, impacted_objects, excluded_objects);
            } else {
                history.add(now, action, impacted_objects, excluded_objects);
            }
        }
        if failures > 0 {
            notes.push(format!("{failures} object(s) failed, see history"));
        }

        Tick {
            outcome: if transitioned { OUTCOME_TRANSITIONED } else { OUTCOME_IDLE },
            status: Some(HibernatorStatus {
                history: history.into_entries(),
                status: HibernatorState::Succeeded,
                message: notes.join("; "),
                is_hibernating: primary.as_ref().is_some_and(Transition::is_hibernating),
                action: primary.map(|transition| transition.action()).or(previous.action),
            }),
            requeue_after: Some(requeue_after),
        }
    }

    /// Reconcile one Hibernator: run a tick and persist a changed status
    ///
    /// Returns the delay before the next tick, `None` to wait for a change.
    pub async fn reconcile_hibernator(&self, hibernator: &Hibernator) -> Result<Option<Duration>, ControllerError> {
        let namespace = hibernator.namespace().unwrap_or_default();
        let name = hibernator.name_any();
        let span = info_span!("reconcile", namespace = %namespace, name = %name);
        self.reconcile_in_span(hibernator, &namespace, &name)
            .instrument(span)
            .await
    }

    async fn reconcile_in_span(
        &self,
        hibernator: &Hibernator,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Duration>, ControllerError> {
        if hibernator.metadata.deletion_timestamp.is_some() {
            debug!("Hibernator is being deleted");
            self.metrics.forget(namespace, name);
            return Ok(None);
        }

        let tick = self.tick(hibernator, Utc::now()).await;
        if let Some(status) = &tick.status {
            if hibernator.status.as_ref() != Some(status) {
                self.status_writer.write_status(hibernator, status).await?;
                info!("Status updated: {:?} {}", status.status, status.message);
            }
            self.metrics.set_hibernating(namespace, name, status.is_hibernating);
        }
        self.metrics.record_reconcile(tick.outcome);
        self.backoff.reset(&format!("{namespace}/{name}"));
        debug!("Next tick in {:?}", tick.requeue_after);
        Ok(tick.requeue_after)
    }

    /// Requeue delay after a failed reconcile
    pub fn handle_error(&self, hibernator: &Hibernator, error: &ControllerError) -> Duration {
        let key = format!("{}/{}", hibernator.namespace().unwrap_or_default(), hibernator.name_any());
        let (delay, attempts) = self.backoff.record_error(&key);
        self.metrics.record_reconcile(OUTCOME_ERROR);
        error!(
            "Reconcile of Hibernator {} failed (attempt {}), retrying in {:?}: {}",
            key, attempts, delay, error
        );
        delay
    }

    /// Mark the controller ready once its watch loop runs
    pub fn set_ready(&self) {
        self.metrics.set_ready();
    }
}

#[cfg(test)]
#[path = "reconciler_test.rs"]
mod reconciler_test;
