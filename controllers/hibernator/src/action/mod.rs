//! Transitions applied to the objects selected by a Hibernator
//!
//! The scheduler decides whether the window is active; [`Transition::resolve`]
//! turns that decision and the configured action into one of four
//! transitions, and [`ActionEngine`] applies it to every selected object.
//!
//! Rules may override the spec-level action. Rules are grouped by their
//! effective action and each group runs as its own transition, producing one
//! [`TransitionReport`]. Objects are handled sequentially; a failure on one
//! object is recorded in the report and the next object is processed.

pub mod delete;
pub mod hpa;
pub mod restore;
pub mod scale;


use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use crds::{Action, ContainerResources, ExcludedObject, HibernatorSpec, ImpactedObject, ObjectStatus, Rule};
use resource_client::{Manifest, PatchType, ResourceClientTrait};
use serde_json::Value;
use tracing::{debug, info, warn};

use self::hpa::AutoscalerIndex;
use self::restore::RestoreOutcome;
use crate::expression::functions::QuantityParser;
use crate::expression::Evaluator;
use crate::history::HistoryStore;
use crate::selector::ResourceSelector;

/// Reason recorded for objects removed by a rule's exclusions
pub const EXCLUDED_BY_RULE: &str = "excluded by rule";

const POD_KIND: &str = "Pod";

/// Apply a patch and record a failure in `impacted`
pub(crate) async fn apply_patch(
    client: &dyn ResourceClientTrait,
    manifest: &Manifest,
    patch: &Value,
    patch_type: PatchType,
    mut impacted: ImpactedObject,
) -> ImpactedObject {
    match client
        .patch_resource(manifest.namespace(), &manifest.gvk(), manifest.name(), patch, patch_type)
        .await
    {
        Ok(_) => debug!("Patched {}", impacted.resource_key),
        Err(e) => {
            warn!("Failed to patch {}: {}", impacted.resource_key, e);
            impacted.status = ObjectStatus::Error;
            impacted.message = e.to_string();
        }
    }
    impacted
}

/// Entry of `targets` for a schedule index; the last entry when the index is
/// negative or past the end
fn pick<T: Clone>(targets: &[T], index: i32) -> Option<T> {
    usize::try_from(index)
        .ok()
        .and_then(|index| targets.get(index))
        .or_else(|| targets.last())
        .cloned()
}

/// What to do with the selected objects on this tick
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// Scale to zero, remembering the original count
    Hibernate,
    /// Restore the original count
    UnHibernate,
    Delete,
    /// Scale to a configured count and/or set Pod container resources
    Scale {
        replicas: Option<i32>,
        resources: Option<BTreeMap<String, ContainerResources>>,
    },
}

impl Transition {
    /// Transition for `action` given the window state
    ///
    /// `None` when there is nothing to do (Delete outside the window).
    #[must_use]
    pub fn resolve(action: Action, active: bool, spec: &HibernatorSpec, matched_index: i32) -> Option<Self> {
        match (action, active) {
            (Action::Hibernate, true) => Some(Transition::Hibernate),
            (Action::Hibernate | Action::UnHibernate | Action::Scale, false) | (Action::UnHibernate, true) => {
                Some(Transition::UnHibernate)
            }
            (Action::Delete, true) => Some(Transition::Delete),
            (Action::Delete, false) => None,
            (Action::Scale, true) => Some(Transition::Scale {
                replicas: pick(&spec.target_replicas, matched_index),
                resources: pick(&spec.target_resources, matched_index),
            }),
        }
    }

    /// Action recorded in status and history
    #[must_use]
    pub fn action(&self) -> Action {
        match self {
            Transition::Hibernate => Action::Hibernate,
            Transition::UnHibernate => Action::UnHibernate,
            Transition::Delete => Action::Delete,
            Transition::Scale { .. } => Action::Scale,
        }
    }

    /// Whether objects are left in their reduced state
    #[must_use]
    pub fn is_hibernating(&self) -> bool {
        !matches!(self, Transition::UnHibernate)
    }
}

/// Outcome of one transition
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionReport {
    pub action: Action,
    pub impacted_objects: Vec<ImpactedObject>,
    pub excluded_objects: Vec<ExcludedObject>,
}

impl TransitionReport {
    #[must_use]
    pub fn new(action: Action) -> Self {
        Self {
            action,
            impacted_objects: Vec::new(),
            excluded_objects: Vec::new(),
        }
    }

    /// Impacted objects whose operation failed
    #[must_use]
    pub fn failures(&self) -> usize {
        self.impacted_objects
            .iter()
            .filter(|object| object.status == ObjectStatus::Error)
            .count()
    }
}

/// Rules grouped by effective action, in order of first appearance
fn rule_groups(spec: &HibernatorSpec) -> Vec<(Action, Vec<&Rule>)> {
    let mut groups: Vec<(Action, Vec<&Rule>)> = Vec::new();
    for rule in &spec.selectors {
        let action = rule.action.unwrap_or(spec.action);
        match groups.iter_mut().find(|(existing, _)| *existing == action) {
            Some((_, rules)) => rules.push(rule),
            None => groups.push((action, vec![rule])),
        }
    }
    groups
}

/// Executes transitions against live objects
pub struct ActionEngine<'a> {
    client: &'a dyn ResourceClientTrait,
    selector: ResourceSelector<'a>,
    quantities: &'a QuantityParser,
}

impl std::fmt::Debug for ActionEngine<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionEngine").field("selector", &self.selector).finish_non_exhaustive()
    }
}

impl<'a> ActionEngine<'a> {
    pub fn new(client: &'a dyn ResourceClientTrait, evaluator: &'a Evaluator, now: DateTime<Utc>) -> Self {
        Self {
            client,
            selector: ResourceSelector::new(client, evaluator, now),
            quantities: evaluator.quantities(),
        }
    }

    /// Run every rule group of `spec` for the given window state
    pub async fn execute(
        &self,
        spec: &HibernatorSpec,
        active: bool,
        matched_index: i32,
        history: &HistoryStore,
    ) -> Vec<TransitionReport> {
        let mut reports = Vec::new();
        for (action, rules) in rule_groups(spec) {
            let Some(transition) = Transition::resolve(action, active, spec, matched_index) else {
                debug!("Nothing to do for {} rules outside the window", action);
                continue;
            };

            let mut included = BTreeMap::new();
            let mut excluded = BTreeMap::new();
            for rule in rules {
                let selection = self.selector.select_rule(rule).await;
                included.extend(selection.included.into_iter().map(|o| (o.resource_key(), o)));
                excluded.extend(selection.excluded.into_iter().map(|o| (o.resource_key(), o)));
            }
            // An exclusion in one rule wins over an inclusion in another of the group
            included.retain(|key, _| !excluded.contains_key(key));

            let mut report = self
                .run(&transition, spec.delete_store, included.into_values(), history)
                .await;
            report
                .excluded_objects
                .extend(excluded.keys().map(|key| ExcludedObject {
                    resource_key: key.to_string(),
                    reason: EXCLUDED_BY_RULE.to_string(),
                }));

            info!(
                "{} transition: {} impacted ({} failed), {} excluded",
                report.action,
                report.impacted_objects.len(),
                report.failures(),
                report.excluded_objects.len()
            );
            reports.push(report);
        }
        reports
    }

    /// Apply `transition` to `targets`
    ///
    /// Targets governed by an autoscaler are scaled through it; an object
    /// reached twice (a target and its autoscaler both selected) is handled
    /// once.
    pub async fn run(
        &self,
        transition: &Transition,
        delete_store: bool,
        targets: impl IntoIterator<Item = Manifest>,
        history: &HistoryStore,
    ) -> TransitionReport {
        let mut report = TransitionReport::new(transition.action());
        let mut autoscalers = AutoscalerIndex::new(self.client);
        let mut seen = BTreeSet::new();

        for target in targets {
            let object = match transition {
                Transition::Delete => target,
                _ => autoscalers.scaling_object(target).await,
            };
            if !seen.insert(object.resource_key()) {
                continue;
            }

            match transition {
                Transition::Hibernate => {
                    report
                        .impacted_objects
                        .extend(scale::scale_replicas(self.client, &object, 0).await);
                }
                Transition::Scale { replicas, resources } => {
                    if let Some(replicas) = replicas {
                        report
                            .impacted_objects
                            .extend(scale::scale_replicas(self.client, &object, *replicas).await);
                    }
                    if let Some(resources) = resources.as_ref().filter(|_| object.kind() == POD_KIND) {
                        report
                            .impacted_objects
                            .extend(scale::scale_resources(self.client, &object, resources, self.quantities).await);
                    }
                }
                Transition::UnHibernate => match restore::restore_object(self.client, &object, history).await {
                    RestoreOutcome::Restored(impacted) => report.impacted_objects.push(impacted),
                    RestoreOutcome::Excluded(excluded) => report.excluded_objects.push(excluded),
                    RestoreOutcome::Skipped => {}
                },
                Transition::Delete => {
                    report
                        .impacted_objects
                        .push(delete::delete_object(self.client, &object, delete_store).await);
                }
            }
        }
        report
    }
}
