//! Replica and container resource scaling
//!
//! Hibernate and Scale share the same replica patch: a JSON patch replacing
//! `/spec/replicas` (`/spec/minReplicas` for autoscalers) that also records
//! the current count in the replicas annotation the first time the object is
//! scaled away from it.

use std::collections::BTreeMap;

use crds::{ContainerResources, ImpactedObject, REPLICAS_ANNOTATION};
use resource_client::{Manifest, PatchType, ResourceClientTrait};
use serde_json::{json, Value};
use tracing::debug;

use super::apply_patch;
use crate::expression::functions::QuantityParser;

pub const AUTOSCALER_KIND: &str = "HorizontalPodAutoscaler";

/// JSON pointer of the field holding an object's replica count
#[must_use]
pub fn replica_path(manifest: &Manifest) -> &'static str {
    if manifest.kind() == AUTOSCALER_KIND {
        "/spec/minReplicas"
    } else {
        "/spec/replicas"
    }
}

/// Current replica count, `None` for objects that do not scale
#[must_use]
pub fn replica_count(manifest: &Manifest) -> Option<i64> {
    if manifest.kind() == AUTOSCALER_KIND {
        manifest.min_replicas()
    } else {
        manifest.replicas()
    }
}

/// Replica count recorded in the annotation, when it holds an integer
#[must_use]
pub fn annotated_count(manifest: &Manifest) -> Option<i32> {
    manifest
        .annotation(REPLICAS_ANNOTATION)
        .and_then(|value| value.trim().parse().ok())
}

/// JSON pointer of the replicas annotation
#[must_use]
pub fn annotation_path() -> String {
    format!(
        "/metadata/annotations/{}",
        REPLICAS_ANNOTATION.replace('~', "~0").replace('/', "~1")
    )
}

fn saturate(count: i64) -> i32 {
    i32::try_from(count).unwrap_or(if count < 0 { i32::MIN } else { i32::MAX })
}

/// Patch operations scaling `manifest` to `target`, plus the original count
///
/// `None` when the object has no replica count or is already at `target`.
#[must_use]
pub fn replica_patch(manifest: &Manifest, target: i32) -> Option<(Value, i32)> {
    let current = replica_count(manifest)?;
    if current == i64::from(target) {
        return None;
    }
    let current = saturate(current);

    let mut operations = vec![json!({"op": "replace", "path": replica_path(manifest), "value": target})];
    let original_count = match manifest.annotation(REPLICAS_ANNOTATION) {
        Some(_) => annotated_count(manifest).unwrap_or(current),
        None => {
            let value = current.to_string();
            if manifest.has_annotations() {
                operations.push(json!({"op": "add", "path": annotation_path(), "value": value}));
            } else {
                operations.push(json!({
                    "op": "add",
                    "path": "/metadata/annotations",
                    "value": {REPLICAS_ANNOTATION: value}
                }));
            }
            current
        }
    };
    Some((Value::Array(operations), original_count))
}

/// Scale the replica count of one object to `target`
///
/// Returns `None` when nothing had to change.
pub async fn scale_replicas(
    client: &dyn ResourceClientTrait,
    manifest: &Manifest,
    target: i32,
) -> Option<ImpactedObject> {
    let Some((patch, original_count)) = replica_patch(manifest, target) else {
        debug!(
            "{} needs no scaling to {} (current: {:?})",
            manifest.resource_key(),
            target,
            replica_count(manifest)
        );
        return None;
    };

    let impacted = ImpactedObject {
        resource_key: manifest.resource_key().to_string(),
        original_count,
        ..ImpactedObject::default()
    };
    Some(apply_patch(client, manifest, &patch, PatchType::Json, impacted).await)
}

fn same_quantity(current: &str, wanted: &str, quantities: &QuantityParser) -> bool {
    match (quantities.parse(current), quantities.parse(wanted)) {
        (Ok(current), Ok(wanted)) => (current - wanted).abs() <= f64::EPSILON * current.abs().max(wanted.abs()).max(1.0),
        _ => current.trim() == wanted.trim(),
    }
}

/// Whether `container` lacks any of the wanted requests or limits
fn resources_differ(container: &Value, wanted: &ContainerResources, quantities: &QuantityParser) -> bool {
    let differs = |section: &str, wanted: &BTreeMap<String, String>| {
        wanted.iter().any(|(resource, quantity)| {
            container
                .get("resources")
                .and_then(|resources| resources.get(section))
                .and_then(|section| section.get(resource))
                .and_then(Value::as_str)
                .is_none_or(|current| !same_quantity(current, quantity, quantities))
        })
    };
    differs("requests", &wanted.requests) || differs("limits", &wanted.limits)
}

/// Strategic merge patch setting container resources, `None` when all match
#[must_use]
pub fn resources_patch(
    manifest: &Manifest,
    targets: &BTreeMap<String, ContainerResources>,
    quantities: &QuantityParser,
) -> Option<Value> {
    let changed: Vec<Value> = manifest
        .containers()
        .iter()
        .filter_map(|container| {
            let name = container.get("name").and_then(Value::as_str)?;
            let wanted = targets.get(name)?;
            resources_differ(container, wanted, quantities).then(|| json!({"name": name, "resources": wanted}))
        })
        .collect();
    if changed.is_empty() {
        None
    } else {
        Some(json!({"spec": {"containers": changed}}))
    }
}

/// Apply per-container resources to a Pod
pub async fn scale_resources(
    client: &dyn ResourceClientTrait,
    manifest: &Manifest,
    targets: &BTreeMap<String, ContainerResources>,
    quantities: &QuantityParser,
) -> Option<ImpactedObject> {
    let Some(patch) = resources_patch(manifest, targets, quantities) else {
        debug!("{} already has the target resources", manifest.resource_key());
        return None;
    };
    let impacted = ImpactedObject {
        resource_key: manifest.resource_key().to_string(),
        ..ImpactedObject::default()
    };
    Some(apply_patch(client, manifest, &patch, PatchType::Strategic, impacted).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{deployment, hibernated_deployment, hpa, pod};
    use crds::ObjectStatus;
    use resource_client::MockResourceClient;

    #[test]
    fn test_replica_patch_adds_annotation_map() {
        let manifest = Manifest::new(deployment("prod", "api", 3, &[]));
        let (patch, original) = replica_patch(&manifest, 0).unwrap();
        assert_eq!(original, 3);
        assert_eq!(
            patch,
            json!([
                {"op": "replace", "path": "/spec/replicas", "value": 0},
                {"op": "add", "path": "/metadata/annotations", "value": {"hibernator.devtron.ai/replicas": "3"}}
            ])
        );
    }

    #[test]
    fn test_replica_patch_adds_key_to_existing_annotations() {
        let mut value = deployment("prod", "api", 3, &[]);
        value["metadata"]["annotations"] = json!({"team": "platform"});
        let (patch, _) = replica_patch(&Manifest::new(value), 0).unwrap();
        assert_eq!(
            patch[1],
            json!({"op": "add", "path": "/metadata/annotations/hibernator.devtron.ai~1replicas", "value": "3"})
        );
    }

    #[test]
    fn test_replica_patch_keeps_existing_annotation() {
        let manifest = Manifest::new(hibernated_deployment("prod", "api", 2, "5"));
        let (patch, original) = replica_patch(&manifest, 0).unwrap();
        assert_eq!(original, 5);
        assert_eq!(patch.as_array().map(Vec::len), Some(1));
    }

    #[test]
    fn test_replica_patch_skips() {
        assert!(replica_patch(&Manifest::new(hibernated_deployment("prod", "api", 0, "3")), 0).is_none());
        assert!(replica_patch(&Manifest::new(pod("prod", "web", "64Mi")), 0).is_none());
    }

    #[test]
    fn test_autoscaler_uses_min_replicas() {
        let manifest = Manifest::new(hpa("prod", "api", "api", 2));
        let (patch, original) = replica_patch(&manifest, 0).unwrap();
        assert_eq!(original, 2);
        assert_eq!(patch[0]["path"], json!("/spec/minReplicas"));
    }

    #[test]
    fn test_resources_patch_compares_quantities() {
        let quantities = QuantityParser::new().unwrap();
        let manifest = Manifest::new(pod("prod", "web", "64Mi"));

        let same: BTreeMap<String, ContainerResources> = [(
            "app".to_string(),
            ContainerResources {
                requests: [("memory".to_string(), "65536Ki".to_string())].into(),
                limits: BTreeMap::new(),
            },
        )]
        .into();
        assert!(resources_patch(&manifest, &same, &quantities).is_none());

        let smaller: BTreeMap<String, ContainerResources> = [(
            "app".to_string(),
            ContainerResources {
                requests: [("memory".to_string(), "32Mi".to_string())].into(),
                limits: [("cpu".to_string(), "500m".to_string())].into(),
            },
        )]
        .into();
        let patch = resources_patch(&manifest, &smaller, &quantities).unwrap();
        assert_eq!(patch["spec"]["containers"][0]["name"], json!("app"));
        assert_eq!(patch["spec"]["containers"][0]["resources"]["requests"]["memory"], json!("32Mi"));

        let other_container: BTreeMap<String, ContainerResources> =
            [("sidecar".to_string(), ContainerResources::default())].into();
        assert!(resources_patch(&manifest, &other_container, &quantities).is_none());
    }

    #[tokio::test]
    async fn test_scale_replicas_records_patch_failure() {
        let client = MockResourceClient::new();
        client.add_object(deployment("prod", "api", 3, &[]));
        client.fail_patch("/prod/apps/v1/Deployment/api", "admission webhook denied");

        let manifest = client.object_by_key("/prod/apps/v1/Deployment/api").unwrap();
        let impacted = scale_replicas(&client, &manifest, 0).await.unwrap();
        assert_eq!(impacted.status, ObjectStatus::Error);
        assert!(impacted.message.contains("admission webhook denied"));
        assert_eq!(impacted.original_count, 3);
    }

    #[tokio::test]
    async fn test_scale_resources_patches_pod() {
        let client = MockResourceClient::new();
        client.add_object(pod("prod", "web", "64Mi"));
        let quantities = QuantityParser::new().unwrap();
        let targets: BTreeMap<String, ContainerResources> = [(
            "app".to_string(),
            ContainerResources {
                requests: [("memory".to_string(), "32Mi".to_string())].into(),
                limits: BTreeMap::new(),
            },
        )]
        .into();

        let manifest = client.object_by_key("/prod//v1/Pod/web").unwrap();
        let impacted = scale_resources(&client, &manifest, &targets, &quantities).await.unwrap();
        assert_eq!(impacted.status, ObjectStatus::Success);

        let updated = client.object_by_key("/prod//v1/Pod/web").unwrap();
        assert_eq!(updated.containers()[0]["resources"]["requests"]["memory"], json!("32Mi"));
        assert_eq!(updated.containers()[0]["resources"]["requests"]["cpu"], json!("250m"));
        assert_eq!(client.patches()[0].patch_type, PatchType::Strategic);
    }
}
