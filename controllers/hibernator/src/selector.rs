//! Resolution of rule selectors to live objects
//!
//! A selector names namespaces (explicitly, or every namespace matching
//! labels and field expressions) and object types, then narrows objects by
//! name, labels and field expressions. Failures for one namespace and type
//! are logged and skipped so the rest of the rule still applies.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use crds::{NamespaceSelector, ObjectSelector, Rule, Selector};
use resource_client::{Manifest, ResourceClientTrait, ResourceKey, ResourceMapping};
use tracing::{debug, warn};

use crate::expression::Evaluator;

/// Namespace name that selects every namespace
const ALL_NAMESPACES: &str = "all";

fn split_list(value: &str) -> Vec<&str> {
    value.split(',').map(str::trim).filter(|item| !item.is_empty()).collect()
}

fn label_selector(labels: &[String]) -> Option<String> {
    let terms: Vec<&str> = labels.iter().map(|l| l.trim()).filter(|l| !l.is_empty()).collect();
    if terms.is_empty() { None } else { Some(terms.join(",")) }
}

/// Objects matched by a rule, split by exclusion
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuleSelection {
    pub included: Vec<Manifest>,
    /// Objects matched by an inclusion and an exclusion alike
    pub excluded: Vec<Manifest>,
}

pub struct ResourceSelector<'a> {
    client: &'a dyn ResourceClientTrait,
    evaluator: &'a Evaluator,
    now: DateTime<Utc>,
}

impl std::fmt::Debug for ResourceSelector<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceSelector").field("now", &self.now).finish_non_exhaustive()
    }
}

impl<'a> ResourceSelector<'a> {
    pub fn new(client: &'a dyn ResourceClientTrait, evaluator: &'a Evaluator, now: DateTime<Utc>) -> Self {
        Self { client, evaluator, now }
    }

    fn satisfies(&self, manifest: &Manifest, expressions: &[String]) -> bool {
        expressions
            .iter()
            .filter(|expression| !expression.trim().is_empty())
            .all(|expression| self.evaluator.matches_at(expression, manifest.as_value(), self.now))
    }

    /// Namespaces a selector applies to
    pub async fn namespaces(&self, selector: &NamespaceSelector) -> Vec<String> {
        let names = split_list(&selector.name);
        if !names.is_empty() && !names.contains(&ALL_NAMESPACES) {
            return names.into_iter().map(str::to_string).collect();
        }

        let mapping = match self.client.resolve_type("namespaces").await {
            Ok(mapping) => mapping,
            Err(e) => {
                warn!("Cannot resolve the namespace type: {}", e);
                return Vec::new();
            }
        };
        let labels = label_selector(&selector.labels);
        match self.client.list_resources(None, &mapping, labels.as_deref()).await {
            Ok(namespaces) => namespaces
                .iter()
                .filter(|namespace| self.satisfies(namespace, &selector.field_selector))
                .map(|namespace| namespace.name().to_string())
                .collect(),
            Err(e) => {
                warn!("Failed to list namespaces (labels: {:?}): {}", labels, e);
                Vec::new()
            }
        }
    }

    async fn objects_in(
        &self,
        namespace: Option<&str>,
        mapping: &ResourceMapping,
        selector: &ObjectSelector,
    ) -> Vec<Manifest> {
        let names = split_list(&selector.name);
        let candidates = if names.is_empty() {
            let labels = label_selector(&selector.labels);
            match self.client.list_resources(namespace, mapping, labels.as_deref()).await {
                Ok(objects) => objects,
                Err(e) => {
                    warn!(
                        "Failed to list {} in namespace {:?}: {}",
                        mapping.plural, namespace, e
                    );
                    return Vec::new();
                }
            }
        } else {
            let mut found = Vec::with_capacity(names.len());
            for name in names {
                match self
                    .client
                    .get_resource(namespace.unwrap_or_default(), &mapping.gvk, name)
                    .await
                {
                    Ok(object) => found.push(object),
                    Err(e) if e.is_not_found() => {
                        debug!("{} {:?}/{} not found", mapping.gvk.kind, namespace, name);
                    }
                    Err(e) => warn!("Failed to get {} {:?}/{}: {}", mapping.gvk.kind, namespace, name, e),
                }
            }
            found
        };

        candidates
            .into_iter()
            .filter(|object| self.satisfies(object, &selector.field_selector))
            .collect()
    }

    /// Objects matched by one selector, keyed by resource key
    pub async fn select(&self, selector: &Selector) -> BTreeMap<ResourceKey, Manifest> {
        let mut selected = BTreeMap::new();
        let kinds = split_list(&selector.object_selector.kind);
        if kinds.is_empty() {
            warn!("Selector without an object type matches nothing");
            return selected;
        }

        let mut namespaces: Option<Vec<String>> = None;
        for kind in kinds {
            let mapping = match self.client.resolve_type(kind).await {
                Ok(mapping) => mapping,
                Err(e) => {
                    warn!("Skipping unknown type {:?}: {}", kind, e);
                    continue;
                }
            };

            if !mapping.namespaced {
                for object in self.objects_in(None, &mapping, &selector.object_selector).await {
                    selected.insert(object.resource_key(), object);
                }
                continue;
            }

            if namespaces.is_none() {
                namespaces = Some(self.namespaces(&selector.namespace_selector).await);
            }
            for namespace in namespaces.iter().flatten() {
                for object in self
                    .objects_in(Some(namespace.as_str()), &mapping, &selector.object_selector)
                    .await
                {
                    selected.insert(object.resource_key(), object);
                }
            }
        }
        selected
    }

    /// Objects matched by a rule; exclusions win over inclusions
    pub async fn select_rule(&self, rule: &Rule) -> RuleSelection {
        let mut included = BTreeMap::new();
        for selector in &rule.inclusions {
            included.extend(self.select(selector).await);
        }
        let mut excluded_keys = BTreeMap::new();
        for selector in &rule.exclusions {
            excluded_keys.extend(self.select(selector).await);
        }

        let (excluded, included): (Vec<_>, Vec<_>) = included
            .into_iter()
            .partition(|(key, _)| excluded_keys.contains_key(key));
        RuleSelection {
            included: included.into_iter().map(|(_, object)| object).collect(),
            excluded: excluded.into_iter().map(|(_, object)| object).collect(),
        }
    }
}
