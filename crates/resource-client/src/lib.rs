//! Kubernetes Resource Client
//!
//! Untyped access to arbitrary cluster resources for the hibernator controller:
//! type resolution through API discovery, listing with label selectors, and
//! JSON/merge/strategic patches.
//!
//! # Example
//!
//! ```no_run
//! use resource_client::{KubeResourceClient, PatchType, ResourceClientTrait};
//! use serde_json::json;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = KubeResourceClient::new(kube::Client::try_default().await?).await?;
//!
//! let mapping = client.resolve_type("deploy").await?;
//! let deployments = client.list_resources(Some("prod"), &mapping, Some("tier=web")).await?;
//!
//! for deployment in &deployments {
//!     client
//!         .patch_resource(
//!             deployment.namespace(),
//!             &mapping.gvk,
//!             deployment.name(),
//!             &json!([{"op": "replace", "path": "/spec/replicas", "value": 0}]),
//!             PatchType::Json,
//!         )
//!         .await?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
pub mod models;
#[path = "trait.rs"]
pub mod resource_trait;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use client::KubeResourceClient;
pub use error::ResourceClientError;
pub use models::*;
pub use resource_trait::ResourceClientTrait;
#[cfg(any(test, feature = "test-util"))]
pub use mock::MockResourceClient;
