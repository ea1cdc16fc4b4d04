//! Kubernetes resource watchers.
//!
//! Hibernators are watched with `kube_runtime::Controller`, which reconnects
//! the watch and schedules requeues. Each reconcile returns the delay to the
//! next window boundary; failures are retried with the Fibonacci backoff of
//! the reconciler.

use std::sync::Arc;
use std::time::Duration;

use crds::Hibernator;
use futures::StreamExt;
use kube::{Api, ResourceExt};
use kube_runtime::controller::{Action, Config as ControllerConfig};
use kube_runtime::{watcher, Controller};
use tracing::{debug, error, info};

use crate::error::ControllerError;
use crate::reconciler::Reconciler;

const DEBOUNCE: Duration = Duration::from_secs(5);
const CONCURRENCY: u16 = 3;

/// Requeue action for the delay returned by a reconcile
fn requeue_action(delay: Option<Duration>) -> Action {
    delay.map_or_else(Action::await_change, Action::requeue)
}

/// Watches Hibernator resources for changes.
pub struct Watcher {
    reconciler: Arc<Reconciler>,
    hibernator_api: Api<Hibernator>,
}

impl Watcher {
    pub fn new(reconciler: Arc<Reconciler>, hibernator_api: Api<Hibernator>) -> Self {
        Self {
            reconciler,
            hibernator_api,
        }
    }

    /// Run the Hibernator controller loop until the watch stream ends
    pub async fn watch_hibernators(&self) -> Result<(), ControllerError> {
        info!("Starting Hibernator watcher");

        let error_policy = |hibernator: Arc<Hibernator>, error: &ControllerError, ctx: Arc<Reconciler>| {
            Action::requeue(ctx.handle_error(&hibernator, error))
        };

        let reconcile = |hibernator: Arc<Hibernator>, ctx: Arc<Reconciler>| async move {
            debug!(
                "Reconciling Hibernator {}/{}",
                hibernator.namespace().unwrap_or_default(),
                hibernator.name_any()
            );
            ctx.reconcile_hibernator(&hibernator).await.map(requeue_action)
        };

        // Status writes of our own come back as watch events; debounce bursts
        // into a single reconcile
        let controller_config = ControllerConfig::default().debounce(DEBOUNCE).concurrency(CONCURRENCY);

        self.reconciler.set_ready();
        Controller::new(self.hibernator_api.clone(), watcher::Config::default())
            .with_config(controller_config)
            .shutdown_on_signal()
            .run(reconcile, error_policy, self.reconciler.clone())
            .for_each(|res| async move {
                match res {
                    Ok((object, action)) => debug!("Reconciled {}: {:?}", object.name, action),
                    Err(e) => error!("Hibernator controller error: {}", e),
                }
            })
            .await;

        info!("Hibernator watcher stopped");
        Ok(())
    }
}
