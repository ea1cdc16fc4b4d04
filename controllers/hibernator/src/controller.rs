//! Main controller implementation.
//!
//! Wires the Kubernetes client, the dynamic resource client and the metrics
//! registry into a [`Reconciler`], then runs the Hibernator watcher next to
//! the metrics and probe server.

use std::sync::Arc;

use crds::Hibernator;
use kube::{Api, Client};
use resource_client::KubeResourceClient;
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::expression::Evaluator;
use crate::metrics::{self, Metrics};
use crate::reconciler::{KubeStatusWriter, Reconciler};
use crate::watcher::Watcher;

/// Main controller for Hibernator resources.
pub struct Controller {
    hibernator_watcher: JoinHandle<Result<(), ControllerError>>,
    metrics_server: JoinHandle<Result<(), ControllerError>>,
}

impl Controller {
    /// Creates a new controller instance and starts its tasks.
    pub async fn new(config: ControllerConfig) -> Result<Self, ControllerError> {
        info!("Initializing Hibernator Controller");

        let kube_client = Client::try_default().await?;
        let resource_client = KubeResourceClient::new(kube_client.clone()).await?;
        let metrics = Arc::new(Metrics::new()?);

        let hibernator_api: Api<Hibernator> = match config.namespace.as_deref() {
            Some(namespace) => Api::namespaced(kube_client.clone(), namespace),
            None => Api::all(kube_client.clone()),
        };
        let metrics_addr = config.metrics_addr;

        let reconciler = Arc::new(Reconciler::new(
            Arc::new(resource_client),
            Arc::new(KubeStatusWriter::new(kube_client)),
            Evaluator::new()?,
            config,
            metrics.clone(),
        ));

        let hibernator_watcher = {
            let watcher = Watcher::new(reconciler, hibernator_api);
            tokio::spawn(async move { watcher.watch_hibernators().await })
        };
        let metrics_server = tokio::spawn(metrics::serve(metrics_addr, metrics));

        Ok(Self {
            hibernator_watcher,
            metrics_server,
        })
    }

    /// Runs until the watcher stops or either task fails.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!("Hibernator Controller running");

        tokio::select! {
            result = &mut self.hibernator_watcher => {
                result
                    .map_err(|e| ControllerError::Watch(format!("Hibernator watcher panicked: {e}")))??;
            }
            result = &mut self.metrics_server => {
                result
                    .map_err(|e| ControllerError::Metrics(format!("metrics server panicked: {e}")))??;
                return Err(ControllerError::Metrics("metrics server stopped".to_string()));
            }
        }

        self.metrics_server.abort();
        info!("Hibernator Controller stopped");
        Ok(())
    }
}
