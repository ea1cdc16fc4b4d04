//! Hibernator CRD
//!
//! Puts a selected group of workloads to sleep inside weekly time windows and
//! wakes them up outside of them.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Annotation holding the replica count a workload had before it was hibernated.
pub const REPLICAS_ANNOTATION: &str = "hibernator.devtron.ai/replicas";

/// History entries kept when `revisionHistoryLimit` is not set.
pub const DEFAULT_REVISION_HISTORY_LIMIT: usize = 10;

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "pincher.devtron.ai",
    version = "v1alpha1",
    kind = "Hibernator",
    namespaced,
    status = "HibernatorStatus",
    shortname = "hib"
)]
#[serde(rename_all = "camelCase")]
pub struct HibernatorSpec {
    /// Weekly windows during which the selected objects are acted upon
    #[serde(default, rename = "timeRangesWithZone")]
    pub when: TimeRangesWithZone,

    /// Rules selecting the objects to act upon
    #[serde(default)]
    pub selectors: Vec<Rule>,

    /// Force the active state regardless of the schedule
    #[serde(default)]
    pub hibernate: bool,

    /// Force the inactive state regardless of the schedule
    #[serde(default)]
    pub un_hibernate: bool,

    /// Maximum seconds between two reconciles (0 means schedule-driven only)
    #[serde(default)]
    pub re_sync_interval: i64,

    /// Stop reconciling entirely
    #[serde(default)]
    pub pause: bool,

    /// Stop reconciling until the given instant
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pause_until: Option<DateTimeWithZone>,

    /// Number of history entries to keep
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision_history_limit: Option<i32>,

    /// Transition applied while the schedule is active
    #[serde(default)]
    pub action: Action,

    /// Keep the manifest of deleted objects in the history
    #[serde(default)]
    pub delete_store: bool,

    /// Replica counts for `scale`, one per time range
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub target_replicas: Vec<i32>,

    /// Container resources for `scale`, one map per time range keyed by container name
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub target_resources: Vec<BTreeMap<String, ContainerResources>>,
}

impl HibernatorSpec {
    /// History capacity, falling back to [`DEFAULT_REVISION_HISTORY_LIMIT`].
    #[must_use]
    pub fn history_limit(&self) -> usize {
        self.revision_history_limit
            .and_then(|limit| usize::try_from(limit).ok())
            .filter(|limit| *limit > 0)
            .unwrap_or(DEFAULT_REVISION_HISTORY_LIMIT)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TimeRangesWithZone {
    /// Weekly ranges
    #[serde(default)]
    pub time_ranges: Vec<TimeRange>,

    /// IANA zone the ranges are expressed in (UTC when empty)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub time_zone: String,
}

/// A weekly window, e.g. Mon-Fri 20:00-23:59.
///
/// Times are `H[:MM[:SS]]`; weekdays are `Sun`..`Sat`. A range whose
/// `weekdayFrom` comes after `weekdayTo` wraps past Saturday.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TimeRange {
    pub time_from: String,
    pub time_to: String,
    pub weekday_from: String,
    pub weekday_to: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DateTimeWithZone {
    /// RFC 3339, or `YYYY-MM-DD HH:MM[:SS]` interpreted in `timeZone`
    #[serde(default)]
    pub date_time: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub time_zone: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    #[serde(default)]
    pub inclusions: Vec<Selector>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclusions: Vec<Selector>,

    /// Overrides the spec-level action for objects matched by this rule
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<Action>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Selector {
    pub object_selector: ObjectSelector,

    #[serde(default)]
    pub namespace_selector: NamespaceSelector,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectSelector {
    /// Label selector terms, ANDed
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,

    /// Comma-separated object names
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    /// Comma-separated resource types (kind, plural, short name or `plural.group`)
    #[serde(rename = "type")]
    pub kind: String,

    /// Field expressions, ANDed
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub field_selector: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceSelector {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,

    /// Comma-separated namespaces; empty or `all` selects every namespace
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub field_selector: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
pub struct ContainerResources {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub requests: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub limits: BTreeMap<String, String>,
}

/// Transition performed on the selected objects
///
/// Serialized lowercase to stay compatible with existing resources;
/// `sleep` is accepted as a synonym of `hibernate`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    #[default]
    #[serde(alias = "sleep")]
    Hibernate,
    #[serde(rename = "unhibernate")]
    UnHibernate,
    Delete,
    Scale,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Action::Hibernate => "hibernate",
            Action::UnHibernate => "unhibernate",
            Action::Delete => "delete",
            Action::Scale => "scale",
        };
        f.write_str(name)
    }
}

/// Day of the week, ordinal 0 = Sunday.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Weekday {
    Sun,
    Mon,
    Tue,
    Wed,
    Thu,
    Fri,
    Sat,
}

impl Weekday {
    #[must_use]
    pub fn ordinal(self) -> u32 {
        self as u32
    }
}

/// Error returned for a weekday token that names no day.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown weekday: {0:?}")]
pub struct UnknownWeekday(pub String);

impl FromStr for Weekday {
    type Err = UnknownWeekday;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let day = match s.trim().to_ascii_lowercase().as_str() {
            "sun" | "sunday" => Weekday::Sun,
            "mon" | "monday" => Weekday::Mon,
            "tue" | "tues" | "tuesday" => Weekday::Tue,
            "wed" | "wednesday" => Weekday::Wed,
            "thu" | "thur" | "thurs" | "thursday" => Weekday::Thu,
            "fri" | "friday" => Weekday::Fri,
            "sat" | "saturday" => Weekday::Sat,
            _ => return Err(UnknownWeekday(s.to_string())),
        };
        Ok(day)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HibernatorStatus {
    /// Past actions, ordered by id
    #[serde(default)]
    pub history: Vec<RevisionHistory>,

    #[serde(default)]
    pub status: HibernatorState,

    #[serde(default)]
    pub message: String,

    #[serde(default)]
    pub is_hibernating: bool,

    /// Last transition performed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<Action>,
}

/// Outcome of the last reconcile
///
/// Serializes as PascalCase but accepts lowercase as well.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub enum HibernatorState {
    #[default]
    #[serde(alias = "pending", alias = "")]
    Pending,

    #[serde(alias = "succeeded")]
    Succeeded,

    #[serde(alias = "failed")]
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RevisionHistory {
    pub time: DateTime<Utc>,
    pub id: i64,
    pub action: Action,

    #[serde(default)]
    pub impacted_objects: Vec<ImpactedObject>,

    #[serde(default)]
    pub excluded_objects: Vec<ExcludedObject>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ImpactedObject {
    /// `/namespace/group/version/kind/name`
    pub resource_key: String,

    #[serde(default)]
    pub original_count: i32,

    /// Manifest of a deleted object, when `deleteStore` is set
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub related_deleted_object: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,

    #[serde(default)]
    pub status: ObjectStatus,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ObjectStatus {
    #[default]
    Success,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExcludedObject {
    pub resource_key: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
}
