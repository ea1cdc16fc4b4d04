//! Dotted field paths over JSON manifests
//!
//! `spec.containers.0.name` walks objects by key and arrays by index.
//! `#` on an array yields its length when it is the last segment, otherwise
//! the rest of the path is applied to every element and the hits collected
//! (`spec.containers.#.name`). A backslash escapes a literal dot, as in
//! `metadata.labels.app\.kubernetes\.io/name`.

use serde_json::Value;

fn segments(path: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut chars = path.trim().chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(escaped) = chars.next() {
                    current.push(escaped);
                }
            }
            '.' => parts.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    parts.push(current);
    parts
}

fn step<'a>(value: &'a Value, segment: &str) -> Option<&'a Value> {
    match value {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|index| items.get(index)),
        _ => None,
    }
}

fn walk(value: &Value, segments: &[String]) -> Option<Value> {
    let Some((head, rest)) = segments.split_first() else {
        return Some(value.clone());
    };

    if head == "#" {
        let items = value.as_array()?;
        if rest.is_empty() {
            return Some(Value::from(items.len()));
        }
        let hits = items.iter().filter_map(|item| walk(item, rest)).collect();
        return Some(Value::Array(hits));
    }

    walk(step(value, head)?, rest)
}

/// Value at `path`, or `None` when any segment is missing
#[must_use]
pub fn resolve(document: &Value, path: &str) -> Option<Value> {
    if path.trim().is_empty() {
        return None;
    }
    walk(document, &segments(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pod() -> Value {
        json!({
            "metadata": {
                "name": "frontend",
                "labels": {"app.kubernetes.io/name": "web"}
            },
            "spec": {
                "containers": [
                    {"name": "app", "resources": {"requests": {"memory": "64Mi"}}},
                    {"name": "log-aggregator", "resources": {"requests": {"memory": "68Mi"}}},
                    {"name": "sidecar"}
                ]
            }
        })
    }

    #[test]
    fn test_resolves_keys_and_indexes() {
        let pod = pod();
        assert_eq!(resolve(&pod, "metadata.name"), Some(json!("frontend")));
        assert_eq!(resolve(&pod, "spec.containers.1.name"), Some(json!("log-aggregator")));
        assert_eq!(resolve(&pod, "spec.containers.9.name"), None);
        assert_eq!(resolve(&pod, "spec.missing"), None);
        assert_eq!(resolve(&pod, ""), None);
    }

    #[test]
    fn test_hash_counts_and_maps() {
        let pod = pod();
        assert_eq!(resolve(&pod, "spec.containers.#"), Some(json!(3)));
        assert_eq!(
            resolve(&pod, "spec.containers.#.resources.requests"),
            Some(json!([{"memory": "64Mi"}, {"memory": "68Mi"}]))
        );
        assert_eq!(resolve(&pod, "metadata.#"), None);
    }

    #[test]
    fn test_escaped_dots() {
        assert_eq!(
            resolve(&pod(), r"metadata.labels.app\.kubernetes\.io/name"),
            Some(json!("web"))
        );
    }
}
