//! Pairing of workloads with the autoscalers governing them
//!
//! Scaling a workload whose HorizontalPodAutoscaler keeps a positive
//! `minReplicas` would be undone by the autoscaler, so the autoscaler is
//! patched instead. Autoscalers are listed at most once per namespace and tick.

use std::collections::HashMap;

use resource_client::{GroupVersionKind, Manifest, ResourceClientTrait, ResourceMapping};
use tracing::{debug, warn};

use super::scale::AUTOSCALER_KIND;

/// Whether `autoscaler` scales `target`
///
/// `scaleTargetRef` must name the target's kind and name; its apiVersion, when
/// set, must carry the target's group.
#[must_use]
pub fn governs(autoscaler: &Manifest, target: &Manifest) -> bool {
    let Some(reference) = autoscaler.scale_target_ref() else {
        return false;
    };
    let group_matches = reference.api_version.is_empty()
        || GroupVersionKind::from_api_version(&reference.api_version, reference.kind.as_str()).group
            == target.gvk().group;
    autoscaler.namespace() == target.namespace()
        && reference.kind == target.kind()
        && reference.name == target.name()
        && group_matches
}

/// Lazily filled per-namespace autoscaler cache
pub struct AutoscalerIndex<'a> {
    client: &'a dyn ResourceClientTrait,
    mapping: Option<Option<ResourceMapping>>,
    by_namespace: HashMap<String, Vec<Manifest>>,
}

impl<'a> AutoscalerIndex<'a> {
    pub fn new(client: &'a dyn ResourceClientTrait) -> Self {
        Self {
            client,
            mapping: None,
            by_namespace: HashMap::new(),
        }
    }

    async fn mapping(&mut self) -> Option<ResourceMapping> {
        if self.mapping.is_none() {
            let resolved = match self.client.resolve_type("hpa").await {
                Ok(mapping) => Some(mapping),
                Err(e) => {
                    warn!("Autoscalers unavailable, scaling targets directly: {}", e);
                    None
                }
            };
            self.mapping = Some(resolved);
        }
        self.mapping.clone().flatten()
    }

    async fn autoscalers(&mut self, namespace: &str) -> &[Manifest] {
        if !self.by_namespace.contains_key(namespace) {
            let listed = match self.mapping().await {
                Some(mapping) => match self.client.list_resources(Some(namespace), &mapping, None).await {
                    Ok(autoscalers) => autoscalers,
                    Err(e) => {
                        warn!("Failed to list autoscalers in {}: {}", namespace, e);
                        Vec::new()
                    }
                },
                None => Vec::new(),
            };
            self.by_namespace.insert(namespace.to_string(), listed);
        }
        self.by_namespace.get(namespace).map(Vec::as_slice).unwrap_or_default()
    }

    /// The object to scale in place of `target`: its autoscaler if one governs it
    pub async fn scaling_object(&mut self, target: Manifest) -> Manifest {
        if target.kind() == AUTOSCALER_KIND || target.namespace().is_empty() {
            return target;
        }
        let paired = self
            .autoscalers(target.namespace())
            .await
            .iter()
            .find(|autoscaler| governs(autoscaler, &target))
            .cloned();
        match paired {
            Some(autoscaler) => {
                debug!("{} is scaled through {}", target.resource_key(), autoscaler.resource_key());
                autoscaler
            }
            None => target,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{deployment, hpa};
    use resource_client::MockResourceClient;
    use serde_json::json;

    #[test]
    fn test_governs_matches_kind_name_and_group() {
        let api = Manifest::new(deployment("prod", "api", 3, &[]));
        let worker = Manifest::new(deployment("prod", "worker", 3, &[]));
        let autoscaler = Manifest::new(hpa("prod", "api-hpa", "api", 2));
        assert!(governs(&autoscaler, &api));
        assert!(!governs(&autoscaler, &worker));

        let mut other_group = hpa("prod", "api-hpa", "api", 2);
        other_group["spec"]["scaleTargetRef"]["apiVersion"] = json!("argoproj.io/v1alpha1");
        assert!(!governs(&Manifest::new(other_group), &api));

        let mut no_version = hpa("prod", "api-hpa", "api", 2);
        no_version["spec"]["scaleTargetRef"]["apiVersion"] = json!("");
        assert!(governs(&Manifest::new(no_version), &api));

        let elsewhere = Manifest::new(hpa("dev", "api-hpa", "api", 2));
        assert!(!governs(&elsewhere, &api));
    }

    #[tokio::test]
    async fn test_scaling_object_prefers_autoscaler() {
        let client = MockResourceClient::new();
        client.add_object(deployment("prod", "api", 3, &[]));
        client.add_object(deployment("prod", "worker", 3, &[]));
        client.add_object(hpa("prod", "api-hpa", "api", 2));
        let mut index = AutoscalerIndex::new(&client);

        let api = client.object_by_key("/prod/apps/v1/Deployment/api").unwrap();
        assert_eq!(index.scaling_object(api).await.kind(), AUTOSCALER_KIND);

        let worker = client.object_by_key("/prod/apps/v1/Deployment/worker").unwrap();
        assert_eq!(index.scaling_object(worker).await.name(), "worker");
    }

    #[tokio::test]
    async fn test_listing_failure_falls_back_to_target() {
        let client = MockResourceClient::new();
        client.add_object(deployment("prod", "api", 3, &[]));
        client.add_object(hpa("prod", "api-hpa", "api", 2));
        client.fail_list("prod", AUTOSCALER_KIND);
        let mut index = AutoscalerIndex::new(&client);

        let api = client.object_by_key("/prod/apps/v1/Deployment/api").unwrap();
        assert_eq!(index.scaling_object(api).await.kind(), "Deployment");
    }
}
