//! Test utilities for unit testing the engine and reconciler
//!
//! Builders for the cluster objects the mock client serves and for the
//! Hibernator resources that select them.

#[cfg(test)]
use crds::*;
#[cfg(test)]
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
#[cfg(test)]
use serde_json::{json, Map, Value};

#[cfg(test)]
fn label_map(labels: &[(&str, &str)]) -> Value {
    Value::Object(
        labels
            .iter()
            .map(|(k, v)| ((*k).to_string(), Value::String((*v).to_string())))
            .collect::<Map<String, Value>>(),
    )
}

/// Helper to create a test Namespace manifest
#[cfg(test)]
pub fn namespace(name: &str, labels: &[(&str, &str)]) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "Namespace",
        "metadata": {"name": name, "labels": label_map(labels)}
    })
}

/// Helper to create a test Deployment manifest without annotations
#[cfg(test)]
pub fn deployment(namespace: &str, name: &str, replicas: i64, labels: &[(&str, &str)]) -> Value {
    json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": {"name": name, "namespace": namespace, "labels": label_map(labels)},
        "spec": {"replicas": replicas}
    })
}

/// Helper to create a test Deployment manifest carrying the replicas annotation
#[cfg(test)]
pub fn hibernated_deployment(namespace: &str, name: &str, replicas: i64, original: &str) -> Value {
    let mut manifest = deployment(namespace, name, replicas, &[]);
    manifest["metadata"]["annotations"] = json!({REPLICAS_ANNOTATION: original});
    manifest
}

/// Helper to create a test Pod manifest with one container requesting `memory`
#[cfg(test)]
pub fn pod(namespace: &str, name: &str, memory: &str) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": {"name": name, "namespace": namespace},
        "spec": {
            "containers": [
                {"name": "app", "image": "app:1", "resources": {"requests": {"memory": memory, "cpu": "250m"}}}
            ]
        }
    })
}

/// Helper to create a test HorizontalPodAutoscaler targeting a Deployment
#[cfg(test)]
pub fn hpa(namespace: &str, name: &str, target: &str, min_replicas: i64) -> Value {
    json!({
        "apiVersion": "autoscaling/v2",
        "kind": "HorizontalPodAutoscaler",
        "metadata": {"name": name, "namespace": namespace},
        "spec": {
            "minReplicas": min_replicas,
            "maxReplicas": 10,
            "scaleTargetRef": {"apiVersion": "apps/v1", "kind": "Deployment", "name": target}
        }
    })
}

/// Helper to create a test Selector
///
/// `names` and `namespaces` are comma-separated as in the resource.
#[cfg(test)]
pub fn selector(
    kind: &str,
    names: &str,
    labels: &[&str],
    namespaces: &str,
    field_selectors: &[&str],
) -> Selector {
    Selector {
        object_selector: ObjectSelector {
            labels: labels.iter().map(|l| (*l).to_string()).collect(),
            name: names.to_string(),
            kind: kind.to_string(),
            field_selector: field_selectors.iter().map(|f| (*f).to_string()).collect(),
        },
        namespace_selector: NamespaceSelector {
            name: namespaces.to_string(),
            ..Default::default()
        },
    }
}

/// Helper to create a Rule with a single inclusion
#[cfg(test)]
pub fn rule(inclusion: Selector) -> Rule {
    Rule {
        inclusions: vec![inclusion],
        exclusions: vec![],
        action: None,
    }
}

/// Helper to create a time range from day and time tokens
#[cfg(test)]
pub fn time_range(weekday_from: &str, weekday_to: &str, time_from: &str, time_to: &str) -> TimeRange {
    TimeRange {
        time_from: time_from.to_string(),
        time_to: time_to.to_string(),
        weekday_from: weekday_from.to_string(),
        weekday_to: weekday_to.to_string(),
    }
}

/// Helper to create a test Hibernator
#[cfg(test)]
pub fn create_test_hibernator(name: &str, namespace: &str, spec: HibernatorSpec) -> Hibernator {
    Hibernator {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            resource_version: Some("42".to_string()),
            ..Default::default()
        },
        spec,
        status: None,
    }
}

/// Spec hibernating every Deployment of `namespace` all week long
#[cfg(test)]
pub fn always_spec(namespace: &str) -> HibernatorSpec {
    HibernatorSpec {
        when: TimeRangesWithZone {
            time_ranges: vec![time_range("Sun", "Sat", "00:00", "23:59:59")],
            time_zone: String::new(),
        },
        selectors: vec![rule(selector("deployment", "", &[], namespace, &[]))],
        ..Default::default()
    }
}
