//! Deleting selected objects

use crds::{ImpactedObject, ObjectStatus};
use resource_client::{Manifest, ResourceClientTrait};
use tracing::{info, warn};

/// Force-delete one object
///
/// With `store` the last manifest is kept in `relatedDeletedObject` so the
/// object can be recreated by hand.
pub async fn delete_object(client: &dyn ResourceClientTrait, manifest: &Manifest, store: bool) -> ImpactedObject {
    let resource_key = manifest.resource_key().to_string();
    let mut impacted = ImpactedObject {
        resource_key,
        ..ImpactedObject::default()
    };

    match client
        .delete_resource(manifest.namespace(), &manifest.gvk(), manifest.name(), true)
        .await
    {
        Ok(deleted) => {
            info!("Deleted {}", impacted.resource_key);
            if store {
                match serde_json::to_string(deleted.as_value()) {
                    Ok(serialized) => impacted.related_deleted_object = serialized,
                    Err(e) => warn!("Cannot store the manifest of {}: {}", impacted.resource_key, e),
                }
            }
        }
        Err(e) => {
            warn!("Failed to delete {}: {}", impacted.resource_key, e);
            impacted.status = ObjectStatus::Error;
            impacted.message = e.to_string();
        }
    }
    impacted
}
