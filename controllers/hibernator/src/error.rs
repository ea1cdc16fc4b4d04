//! Controller-specific error types.
//!
//! Per-object failures during a transition never surface here; they are
//! recorded in the Hibernator's history instead. These errors fail a whole
//! reconcile and are retried with backoff.

use kube::Error as KubeError;
use resource_client::ResourceClientError;
use thiserror::Error;

use crate::expression::ExpressionError;

/// Errors that can occur in the Hibernator Controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Resource client error outside of per-object processing
    #[error("Resource client error: {0}")]
    ResourceClient(#[from] ResourceClientError),

    /// Expression engine failed to initialize
    #[error("Expression engine error: {0}")]
    Expression(#[from] ExpressionError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Writing the status subresource failed
    #[error("Status update failed for {name}: {source}")]
    StatusUpdate {
        name: String,
        #[source]
        source: KubeError,
    },

    /// Metrics registry or server failure
    #[error("Metrics error: {0}")]
    Metrics(String),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),
}

impl From<prometheus::Error> for ControllerError {
    fn from(error: prometheus::Error) -> Self {
        ControllerError::Metrics(error.to_string())
    }
}
