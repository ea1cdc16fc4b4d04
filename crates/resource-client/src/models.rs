//! Resource client data models
//!
//! Kubernetes objects are handled untyped; [`Manifest`] wraps the JSON form
//! and exposes the handful of fields the controller reads.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Group, version and kind of a resource type
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct GroupVersionKind {
    /// API group (empty for the core group)
    pub group: String,
    pub version: String,
    pub kind: String,
}

impl GroupVersionKind {
    pub fn new(group: impl Into<String>, version: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
            kind: kind.into(),
        }
    }

    /// Split an `apiVersion` such as `apps/v1` or `v1`
    pub fn from_api_version(api_version: &str, kind: impl Into<String>) -> Self {
        match api_version.split_once('/') {
            Some((group, version)) => Self::new(group, version, kind),
            None => Self::new("", api_version, kind),
        }
    }

    #[must_use]
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }
}

impl fmt::Display for GroupVersionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.api_version(), self.kind)
    }
}

/// A resolved resource type: its kind, REST plural and scope
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceMapping {
    pub gvk: GroupVersionKind,
    /// Plural name used in REST paths, e.g. `deployments`
    pub plural: String,
    pub namespaced: bool,
}

/// Patch flavours understood by the API server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchType {
    /// RFC 6902 JSON patch (a list of operations)
    Json,
    /// RFC 7386 merge patch
    Merge,
    /// Kubernetes strategic merge patch (lists merged by key)
    Strategic,
}

/// Identity of an object, rendered as `/namespace/group/version/kind/name`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ResourceKey {
    pub namespace: String,
    pub group: String,
    pub version: String,
    pub kind: String,
    pub name: String,
}

impl ResourceKey {
    #[must_use]
    pub fn gvk(&self) -> GroupVersionKind {
        GroupVersionKind::new(&self.group, &self.version, &self.kind)
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "/{}/{}/{}/{}/{}",
            self.namespace, self.group, self.version, self.kind, self.name
        )
    }
}

/// Error returned for a string that is not a resource key
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid resource key: {0:?}")]
pub struct InvalidResourceKey(pub String);

impl FromStr for ResourceKey {
    type Err = InvalidResourceKey;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s
            .strip_prefix('/')
            .ok_or_else(|| InvalidResourceKey(s.to_string()))?
            .split('/')
            .collect();
        match parts.as_slice() {
            [namespace, group, version, kind, name] if !kind.is_empty() && !name.is_empty() => Ok(Self {
                namespace: (*namespace).to_string(),
                group: (*group).to_string(),
                version: (*version).to_string(),
                kind: (*kind).to_string(),
                name: (*name).to_string(),
            }),
            _ => Err(InvalidResourceKey(s.to_string())),
        }
    }
}

/// `spec.scaleTargetRef` of a HorizontalPodAutoscaler
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScaleTargetRef {
    #[serde(default)]
    pub api_version: String,
    pub kind: String,
    pub name: String,
}

/// Typed accessor over an untyped Kubernetes object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Manifest(Value);

impl Manifest {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    #[must_use]
    pub fn as_value(&self) -> &Value {
        &self.0
    }

    fn str_at(&self, pointer: &str) -> &str {
        self.0.pointer(pointer).and_then(Value::as_str).unwrap_or_default()
    }

    fn string_map_at(&self, pointer: &str) -> BTreeMap<String, String> {
        self.0
            .pointer(pointer)
            .and_then(Value::as_object)
            .map(|map| {
                map.iter()
                    .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                    .collect()
            })
            .unwrap_or_default()
    }

    #[must_use]
    pub fn api_version(&self) -> &str {
        self.str_at("/apiVersion")
    }

    #[must_use]
    pub fn kind(&self) -> &str {
        self.str_at("/kind")
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.str_at("/metadata/name")
    }

    /// Namespace, empty for cluster-scoped objects
    #[must_use]
    pub fn namespace(&self) -> &str {
        self.str_at("/metadata/namespace")
    }

    #[must_use]
    pub fn labels(&self) -> BTreeMap<String, String> {
        self.string_map_at("/metadata/labels")
    }

    #[must_use]
    pub fn has_annotations(&self) -> bool {
        self.0
            .pointer("/metadata/annotations")
            .and_then(Value::as_object)
            .is_some()
    }

    #[must_use]
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.0
            .pointer("/metadata/annotations")
            .and_then(|annotations| annotations.get(key))
            .and_then(Value::as_str)
    }

    #[must_use]
    pub fn gvk(&self) -> GroupVersionKind {
        GroupVersionKind::from_api_version(self.api_version(), self.kind())
    }

    #[must_use]
    pub fn resource_key(&self) -> ResourceKey {
        let gvk = self.gvk();
        ResourceKey {
            namespace: self.namespace().to_string(),
            group: gvk.group,
            version: gvk.version,
            kind: gvk.kind,
            name: self.name().to_string(),
        }
    }

    /// `spec.replicas`
    #[must_use]
    pub fn replicas(&self) -> Option<i64> {
        self.0.pointer("/spec/replicas").and_then(Value::as_i64)
    }

    /// `spec.minReplicas` (HorizontalPodAutoscaler)
    #[must_use]
    pub fn min_replicas(&self) -> Option<i64> {
        self.0.pointer("/spec/minReplicas").and_then(Value::as_i64)
    }

    #[must_use]
    pub fn scale_target_ref(&self) -> Option<ScaleTargetRef> {
        self.0
            .pointer("/spec/scaleTargetRef")
            .cloned()
            .and_then(|value| serde_json::from_value(value).ok())
    }

    /// `spec.containers`, empty when the object has none
    #[must_use]
    pub fn containers(&self) -> &[Value] {
        self.0
            .pointer("/spec/containers")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

impl From<Value> for Manifest {
    fn from(value: Value) -> Self {
        Self(value)
    }
}
