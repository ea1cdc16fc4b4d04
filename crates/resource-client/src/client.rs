//! Kubernetes resource client
//!
//! Implements [`ResourceClientTrait`] on top of kube's dynamic API. Resource
//! types are resolved through API discovery, which is refreshed once when a
//! type cannot be found (CRDs installed after startup).

use kube::api::{Api, DeleteParams, DynamicObject, ListParams, Patch, PatchParams};
use kube::core::GroupVersionKind as KubeGroupVersionKind;
use kube::discovery::{ApiCapabilities, ApiResource, Discovery, Scope};
use kube::Client;
use serde_json::{Value, json};
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::ResourceClientError;
use crate::models::{GroupVersionKind, Manifest, PatchType, ResourceMapping};
use crate::resource_trait::ResourceClientTrait;

/// Short names accepted in selectors (discovery does not report them)
const TYPE_ALIASES: &[(&str, &str)] = &[
    ("cj", "cronjobs"),
    ("cm", "configmaps"),
    ("deploy", "deployments"),
    ("ds", "daemonsets"),
    ("hpa", "horizontalpodautoscalers"),
    ("ns", "namespaces"),
    ("po", "pods"),
    ("ro", "rollouts"),
    ("rs", "replicasets"),
    ("sts", "statefulsets"),
    ("svc", "services"),
];

pub(crate) fn expand_alias(name: &str) -> &str {
    TYPE_ALIASES
        .iter()
        .find(|(alias, _)| *alias == name)
        .map_or(name, |(_, plural)| plural)
}

/// Kubernetes-backed resource client
pub struct KubeResourceClient {
    client: Client,
    discovery: RwLock<Discovery>,
}

impl std::fmt::Debug for KubeResourceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeResourceClient").finish_non_exhaustive()
    }
}

impl KubeResourceClient {
    /// Create a client and run an initial API discovery
    pub async fn new(client: Client) -> Result<Self, ResourceClientError> {
        let discovery = Discovery::new(client.clone()).run().await?;
        Ok(Self {
            client,
            discovery: RwLock::new(discovery),
        })
    }

    async fn refresh_discovery(&self) -> Result<(), ResourceClientError> {
        debug!("Refreshing API discovery");
        let discovery = Discovery::new(self.client.clone()).run().await?;
        *self.discovery.write().await = discovery;
        Ok(())
    }

    fn find_mapping(discovery: &Discovery, type_name: &str) -> Option<ResourceMapping> {
        let wanted = type_name.trim().to_ascii_lowercase();
        let (name, group) = match wanted.split_once('.') {
            Some((name, group)) => (name, Some(group)),
            None => (wanted.as_str(), None),
        };
        let name = expand_alias(name);

        for api_group in discovery.groups() {
            if group.is_some_and(|group| group != api_group.name()) {
                continue;
            }
            for (resource, capabilities) in api_group.recommended_resources() {
                if resource.plural == name || resource.kind.to_ascii_lowercase() == name {
                    return Some(ResourceMapping {
                        gvk: GroupVersionKind::new(&resource.group, &resource.version, &resource.kind),
                        plural: resource.plural.clone(),
                        namespaced: capabilities.scope == Scope::Namespaced,
                    });
                }
            }
        }
        None
    }

    async fn api_resource(
        &self,
        gvk: &GroupVersionKind,
    ) -> Result<(ApiResource, ApiCapabilities), ResourceClientError> {
        let kube_gvk = KubeGroupVersionKind::gvk(&gvk.group, &gvk.version, &gvk.kind);
        if let Some(found) = self.discovery.read().await.resolve_gvk(&kube_gvk) {
            return Ok(found);
        }
        self.refresh_discovery().await?;
        self.discovery
            .read()
            .await
            .resolve_gvk(&kube_gvk)
            .ok_or_else(|| ResourceClientError::UnknownType(gvk.to_string()))
    }

    fn api(&self, resource: &ApiResource, namespaced: bool, namespace: &str) -> Api<DynamicObject> {
        if namespaced && !namespace.is_empty() {
            Api::namespaced_with(self.client.clone(), namespace, resource)
        } else {
            Api::all_with(self.client.clone(), resource)
        }
    }
}

/// List responses omit `apiVersion`/`kind` on items; fill them from the resource
fn to_manifest(object: DynamicObject, resource: &ApiResource) -> Result<Manifest, ResourceClientError> {
    let mut value = serde_json::to_value(object)?;
    if let Some(map) = value.as_object_mut() {
        map.entry("apiVersion").or_insert_with(|| json!(resource.api_version));
        map.entry("kind").or_insert_with(|| json!(resource.kind));
    }
    Ok(Manifest::new(value))
}

#[async_trait::async_trait]
impl ResourceClientTrait for KubeResourceClient {
    async fn resolve_type(&self, type_name: &str) -> Result<ResourceMapping, ResourceClientError> {
        if let Some(mapping) = Self::find_mapping(&*self.discovery.read().await, type_name) {
            return Ok(mapping);
        }
        self.refresh_discovery().await?;
        Self::find_mapping(&*self.discovery.read().await, type_name)
            .ok_or_else(|| ResourceClientError::UnknownType(type_name.to_string()))
    }

    async fn list_resources(
        &self,
        namespace: Option<&str>,
        mapping: &ResourceMapping,
        label_selector: Option<&str>,
    ) -> Result<Vec<Manifest>, ResourceClientError> {
        let kube_gvk = KubeGroupVersionKind::gvk(&mapping.gvk.group, &mapping.gvk.version, &mapping.gvk.kind);
        let resource = ApiResource::from_gvk_with_plural(&kube_gvk, &mapping.plural);
        let api = self.api(&resource, mapping.namespaced, namespace.unwrap_or_default());

        let mut params = ListParams::default();
        if let Some(selector) = label_selector.filter(|s| !s.is_empty()) {
            params = params.labels(selector);
        }

        debug!(
            "Listing {} in namespace {:?} (labels: {:?})",
            mapping.plural, namespace, label_selector
        );
        let list = api.list(&params).await?;
        list.items
            .into_iter()
            .map(|object| to_manifest(object, &resource))
            .collect()
    }

    async fn get_resource(
        &self,
        namespace: &str,
        gvk: &GroupVersionKind,
        name: &str,
    ) -> Result<Manifest, ResourceClientError> {
        let (resource, capabilities) = self.api_resource(gvk).await?;
        let api = self.api(&resource, capabilities.scope == Scope::Namespaced, namespace);
        match api.get_opt(name).await? {
            Some(object) => to_manifest(object, &resource),
            None => Err(ResourceClientError::NotFound(format!("{gvk} {namespace}/{name}"))),
        }
    }

    async fn patch_resource(
        &self,
        namespace: &str,
        gvk: &GroupVersionKind,
        name: &str,
        patch: &Value,
        patch_type: PatchType,
    ) -> Result<Manifest, ResourceClientError> {
        let (resource, capabilities) = self.api_resource(gvk).await?;
        let api = self.api(&resource, capabilities.scope == Scope::Namespaced, namespace);
        let params = PatchParams::default();

        debug!("Patching {} {}/{} ({:?}): {}", gvk, namespace, name, patch_type, patch);
        let updated = match patch_type {
            PatchType::Json => {
                let operations: json_patch::Patch = serde_json::from_value(patch.clone())
                    .map_err(|e| ResourceClientError::InvalidPatch(e.to_string()))?;
                api.patch(name, &params, &Patch::<Value>::Json(operations)).await?
            }
            PatchType::Merge => api.patch(name, &params, &Patch::Merge(patch)).await?,
            PatchType::Strategic => api.patch(name, &params, &Patch::Strategic(patch)).await?,
        };
        to_manifest(updated, &resource)
    }

    async fn delete_resource(
        &self,
        namespace: &str,
        gvk: &GroupVersionKind,
        name: &str,
        force: bool,
    ) -> Result<Manifest, ResourceClientError> {
        let (resource, capabilities) = self.api_resource(gvk).await?;
        let api = self.api(&resource, capabilities.scope == Scope::Namespaced, namespace);

        let Some(existing) = api.get_opt(name).await? else {
            return Err(ResourceClientError::NotFound(format!("{gvk} {namespace}/{name}")));
        };

        let params = if force {
            DeleteParams {
                grace_period_seconds: Some(0),
                ..DeleteParams::background()
            }
        } else {
            DeleteParams::default()
        };
        debug!("Deleting {} {}/{} (force: {})", gvk, namespace, name, force);
        api.delete(name, &params).await?;
        to_manifest(existing, &resource)
    }
}
