//! ResourceClient trait for mocking
//!
//! The controller talks to the cluster only through this trait. The concrete
//! `KubeResourceClient` implements it, and tests use `MockResourceClient`.

use serde_json::Value;

use crate::error::ResourceClientError;
use crate::models::{GroupVersionKind, Manifest, PatchType, ResourceMapping};

/// Trait for dynamic resource operations
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait ResourceClientTrait: Send + Sync {
    /// Resolve a user supplied type (kind, plural, short name or `plural.group`)
    async fn resolve_type(&self, type_name: &str) -> Result<ResourceMapping, ResourceClientError>;

    /// List objects of a type, in one namespace or across all of them (`None`)
    async fn list_resources(
        &self,
        namespace: Option<&str>,
        mapping: &ResourceMapping,
        label_selector: Option<&str>,
    ) -> Result<Vec<Manifest>, ResourceClientError>;

    /// Fetch one object; `namespace` is ignored for cluster-scoped types
    async fn get_resource(
        &self,
        namespace: &str,
        gvk: &GroupVersionKind,
        name: &str,
    ) -> Result<Manifest, ResourceClientError>;

    /// Apply a patch and return the updated object
    async fn patch_resource(
        &self,
        namespace: &str,
        gvk: &GroupVersionKind,
        name: &str,
        patch: &Value,
        patch_type: PatchType,
    ) -> Result<Manifest, ResourceClientError>;

    /// Delete an object and return its last known manifest
    ///
    /// `force` deletes with a zero grace period.
    async fn delete_resource(
        &self,
        namespace: &str,
        gvk: &GroupVersionKind,
        name: &str,
        force: bool,
    ) -> Result<Manifest, ResourceClientError>;
}
