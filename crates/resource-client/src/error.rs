//! Resource client errors

use thiserror::Error;

/// Errors that can occur when accessing cluster resources
#[derive(Debug, Error)]
pub enum ResourceClientError {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// The resource type is not served by the cluster
    #[error("Unknown resource type: {0}")]
    UnknownType(String),

    /// Patch document could not be built or applied
    #[error("Invalid patch: {0}")]
    InvalidPatch(String),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ResourceClientError {
    /// Whether the error means the object does not exist
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        match self {
            ResourceClientError::NotFound(_) => true,
            ResourceClientError::Kube(kube::Error::Api(response)) => response.code == 404,
            _ => false,
        }
    }
}
