//! Mock ResourceClient for unit testing
//!
//! Keeps objects in memory, applies patches to them the way the API server
//! would, and records every mutating call so tests can assert on them.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;

use crate::client::expand_alias;
use crate::error::ResourceClientError;
use crate::models::{GroupVersionKind, Manifest, PatchType, ResourceKey, ResourceMapping};
use crate::resource_trait::ResourceClientTrait;

/// A patch received by the mock
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedPatch {
    pub key: ResourceKey,
    pub patch: Value,
    pub patch_type: PatchType,
}

/// Mock ResourceClient for testing
///
/// Built-in types (deployments, statefulsets, pods, namespaces, HPAs, rollouts)
/// are registered by [`MockResourceClient::new`]; more can be added with
/// [`MockResourceClient::register_type`].
#[derive(Clone, Default, Debug)]
pub struct MockResourceClient {
    pub(crate) mappings: Arc<Mutex<Vec<ResourceMapping>>>,
    pub(crate) objects: Arc<Mutex<BTreeMap<ResourceKey, Manifest>>>,
    pub(crate) patches: Arc<Mutex<Vec<RecordedPatch>>>,
    pub(crate) deletions: Arc<Mutex<Vec<ResourceKey>>>,
    // Injected failures, keyed by resource key or `namespace/Kind`
    pub(crate) patch_failures: Arc<Mutex<HashMap<String, String>>>,
    pub(crate) list_failures: Arc<Mutex<HashMap<String, String>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockResourceClient {
    /// Create a mock with the common workload types registered
    pub fn new() -> Self {
        let client = Self::default();
        client.register_type(GroupVersionKind::new("apps", "v1", "Deployment"), "deployments", true);
        client.register_type(GroupVersionKind::new("apps", "v1", "StatefulSet"), "statefulsets", true);
        client.register_type(GroupVersionKind::new("", "v1", "Pod"), "pods", true);
        client.register_type(GroupVersionKind::new("", "v1", "Namespace"), "namespaces", false);
        client.register_type(
            GroupVersionKind::new("autoscaling", "v2", "HorizontalPodAutoscaler"),
            "horizontalpodautoscalers",
            true,
        );
        client.register_type(GroupVersionKind::new("argoproj.io", "v1alpha1", "Rollout"), "rollouts", true);
        client
    }

    /// Make a resource type resolvable
    pub fn register_type(&self, gvk: GroupVersionKind, plural: &str, namespaced: bool) {
        lock(&self.mappings).push(ResourceMapping {
            gvk,
            plural: plural.to_string(),
            namespaced,
        });
    }

    /// Add an object to the mock store (for test setup)
    pub fn add_object(&self, value: Value) {
        let manifest = Manifest::new(value);
        lock(&self.objects).insert(manifest.resource_key(), manifest);
    }

    /// Current state of an object
    pub fn object(&self, key: &ResourceKey) -> Option<Manifest> {
        lock(&self.objects).get(key).cloned()
    }

    /// Look an object up by its rendered key, e.g. `/prod/apps/v1/Deployment/api`
    pub fn object_by_key(&self, key: &str) -> Option<Manifest> {
        key.parse().ok().and_then(|key| self.object(&key))
    }

    /// Patches received so far, in order
    pub fn patches(&self) -> Vec<RecordedPatch> {
        lock(&self.patches).clone()
    }

    /// Keys of objects deleted so far, in order
    pub fn deletions(&self) -> Vec<ResourceKey> {
        lock(&self.deletions).clone()
    }

    /// Make patches of the given object fail
    pub fn fail_patch(&self, key: &str, message: &str) {
        lock(&self.patch_failures).insert(key.to_string(), message.to_string());
    }

    /// Make listing a kind in a namespace fail
    pub fn fail_list(&self, namespace: &str, kind: &str) {
        lock(&self.list_failures).insert(format!("{namespace}/{kind}"), format!("list {kind} in {namespace} refused"));
    }

    fn mapping_for(&self, gvk: &GroupVersionKind) -> Option<ResourceMapping> {
        lock(&self.mappings)
            .iter()
            .find(|m| m.gvk.group == gvk.group && m.gvk.kind == gvk.kind)
            .cloned()
    }

    fn key_for(&self, namespace: &str, gvk: &GroupVersionKind, name: &str) -> ResourceKey {
        let namespaced = self.mapping_for(gvk).is_none_or(|m| m.namespaced);
        ResourceKey {
            namespace: if namespaced { namespace.to_string() } else { String::new() },
            group: gvk.group.clone(),
            version: gvk.version.clone(),
            kind: gvk.kind.clone(),
            name: name.to_string(),
        }
    }
}

/// Equality-based label selector matching (`k=v`, `k==v`, `k!=v`, `k`, `!k`)
fn matches_labels(manifest: &Manifest, selector: &str) -> bool {
    let labels = manifest.labels();
    selector
        .split(',')
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .all(|term| {
            if let Some((key, value)) = term.split_once("!=") {
                labels.get(key.trim()).is_none_or(|v| v != value.trim())
            } else if let Some((key, value)) = term.split_once("==").or_else(|| term.split_once('=')) {
                labels.get(key.trim()).is_some_and(|v| v == value.trim())
            } else if let Some(key) = term.strip_prefix('!') {
                !labels.contains_key(key.trim())
            } else {
                labels.contains_key(term)
            }
        })
}

/// Merge patch where lists of named objects are merged by `name`
fn strategic_merge(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Object(target), Value::Object(patch)) => {
            for (key, value) in patch {
                if value.is_null() {
                    target.remove(key);
                } else {
                    strategic_merge(target.entry(key.clone()).or_insert(Value::Null), value);
                }
            }
        }
        (Value::Array(target), Value::Array(patch))
            if patch.iter().all(|item| item.get("name").is_some()) =>
        {
            for item in patch {
                match target.iter_mut().find(|existing| existing.get("name") == item.get("name")) {
                    Some(existing) => strategic_merge(existing, item),
                    None => target.push(item.clone()),
                }
            }
        }
        (target, patch) => *target = patch.clone(),
    }
}

#[async_trait::async_trait]
impl ResourceClientTrait for MockResourceClient {
    async fn resolve_type(&self, type_name: &str) -> Result<ResourceMapping, ResourceClientError> {
        let wanted = type_name.trim().to_ascii_lowercase();
        let (name, group) = match wanted.split_once('.') {
            Some((name, group)) => (name, Some(group)),
            None => (wanted.as_str(), None),
        };
        let name = expand_alias(name);
        lock(&self.mappings)
            .iter()
            .filter(|m| group.is_none_or(|group| m.gvk.group == group))
            .find(|m| m.plural == name || m.gvk.kind.to_ascii_lowercase() == name)
            .cloned()
            .ok_or_else(|| ResourceClientError::UnknownType(type_name.to_string()))
    }

    async fn list_resources(
        &self,
        namespace: Option<&str>,
        mapping: &ResourceMapping,
        label_selector: Option<&str>,
    ) -> Result<Vec<Manifest>, ResourceClientError> {
        let failure_key = format!("{}/{}", namespace.unwrap_or_default(), mapping.gvk.kind);
        if let Some(message) = lock(&self.list_failures).get(&failure_key) {
            return Err(ResourceClientError::NotFound(message.clone()));
        }
        Ok(lock(&self.objects)
            .iter()
            .filter(|(key, _)| key.group == mapping.gvk.group && key.kind == mapping.gvk.kind)
            .filter(|(key, _)| !mapping.namespaced || namespace.is_none_or(|ns| key.namespace == ns))
            .filter(|(_, manifest)| label_selector.is_none_or(|selector| matches_labels(manifest, selector)))
            .map(|(_, manifest)| manifest.clone())
            .collect())
    }

    async fn get_resource(
        &self,
        namespace: &str,
        gvk: &GroupVersionKind,
        name: &str,
    ) -> Result<Manifest, ResourceClientError> {
        let key = self.key_for(namespace, gvk, name);
        lock(&self.objects)
            .get(&key)
            .cloned()
            .ok_or_else(|| ResourceClientError::NotFound(key.to_string()))
    }

    async fn patch_resource(
        &self,
        namespace: &str,
        gvk: &GroupVersionKind,
        name: &str,
        patch: &Value,
        patch_type: PatchType,
    ) -> Result<Manifest, ResourceClientError> {
        let key = self.key_for(namespace, gvk, name);
        lock(&self.patches).push(RecordedPatch {
            key: key.clone(),
            patch: patch.clone(),
            patch_type,
        });
        if let Some(message) = lock(&self.patch_failures).get(&key.to_string()) {
            return Err(ResourceClientError::InvalidPatch(message.clone()));
        }

        let mut objects = lock(&self.objects);
        let manifest = objects
            .get_mut(&key)
            .ok_or_else(|| ResourceClientError::NotFound(key.to_string()))?;
        let mut updated = manifest.as_value().clone();
        match patch_type {
            PatchType::Json => {
                let operations: json_patch::Patch = serde_json::from_value(patch.clone())
                    .map_err(|e| ResourceClientError::InvalidPatch(e.to_string()))?;
                json_patch::patch(&mut updated, &operations.0)
                    .map_err(|e| ResourceClientError::InvalidPatch(e.to_string()))?;
            }
            PatchType::Merge => json_patch::merge(&mut updated, patch),
            PatchType::Strategic => strategic_merge(&mut updated, patch),
        }
        *manifest = Manifest::new(updated);
        Ok(manifest.clone())
    }

    async fn delete_resource(
        &self,
        namespace: &str,
        gvk: &GroupVersionKind,
        name: &str,
        _force: bool,
    ) -> Result<Manifest, ResourceClientError> {
        let key = self.key_for(namespace, gvk, name);
        let removed = lock(&self.objects)
            .remove(&key)
            .ok_or_else(|| ResourceClientError::NotFound(key.to_string()))?;
        lock(&self.deletions).push(key);
        Ok(removed)
    }
}
