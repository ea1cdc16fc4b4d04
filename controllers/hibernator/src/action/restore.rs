//! Restoring hibernated objects to their original replica count

use crds::{ExcludedObject, ImpactedObject, REPLICAS_ANNOTATION};
use resource_client::{Manifest, PatchType, ResourceClientTrait};
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::apply_patch;
use super::scale::{annotated_count, annotation_path, replica_count, replica_path};
use crate::history::HistoryStore;

/// Reason recorded when no positive original count can be found
pub const UNKNOWN_ORIGINAL_COUNT: &str = "error determining original count";

/// What happened to one object on restore
#[derive(Debug, Clone, PartialEq)]
pub enum RestoreOutcome {
    Restored(ImpactedObject),
    /// Nothing to do (no replica field, or already at the original count)
    Skipped,
    Excluded(ExcludedObject),
}

fn remove_annotation() -> Value {
    json!({"op": "remove", "path": annotation_path()})
}

/// Bring `manifest` back to the count it had before hibernation
///
/// The count comes from the replicas annotation, else from the history. The
/// annotation is removed together with the replica change.
pub async fn restore_object(
    client: &dyn ResourceClientTrait,
    manifest: &Manifest,
    history: &HistoryStore,
) -> RestoreOutcome {
    let resource_key = manifest.resource_key().to_string();
    let Some(current) = replica_count(manifest) else {
        debug!("{} has no replica count, nothing to restore", resource_key);
        return RestoreOutcome::Skipped;
    };

    let annotated = manifest.annotation(REPLICAS_ANNOTATION).is_some();
    let original = annotated_count(manifest).or_else(|| history.original_count(&resource_key));
    let Some(count) = original.filter(|count| *count > 0) else {
        debug!("{}: {} (found {:?})", resource_key, UNKNOWN_ORIGINAL_COUNT, original);
        return RestoreOutcome::Excluded(ExcludedObject {
            resource_key,
            reason: UNKNOWN_ORIGINAL_COUNT.to_string(),
        });
    };

    if current == i64::from(count) {
        if annotated {
            // Stale annotation would pin the original count of a later hibernation
            let patch = Value::Array(vec![remove_annotation()]);
            if let Err(e) = client
                .patch_resource(manifest.namespace(), &manifest.gvk(), manifest.name(), &patch, PatchType::Json)
                .await
            {
                warn!("Failed to drop the replicas annotation of {}: {}", resource_key, e);
            }
        }
        debug!("{} already runs {} replicas", resource_key, count);
        return RestoreOutcome::Skipped;
    }

    let mut operations = vec![json!({"op": "replace", "path": replica_path(manifest), "value": count})];
    if annotated {
        operations.push(remove_annotation());
    }
    let impacted = ImpactedObject {
        resource_key,
        original_count: count,
        ..ImpactedObject::default()
    };
    RestoreOutcome::Restored(apply_patch(client, manifest, &Value::Array(operations), PatchType::Json, impacted).await)
}
