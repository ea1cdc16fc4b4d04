//! Bounded revision history
//!
//! Entries are kept in ascending id order. Adding past capacity evicts the
//! entry with the smallest id; the new entry gets the largest id plus one.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use crds::{Action, ExcludedObject, ImpactedObject, ObjectStatus, RevisionHistory};

#[derive(Debug, Clone, PartialEq)]
pub struct HistoryStore {
    entries: VecDeque<RevisionHistory>,
    capacity: usize,
}

impl HistoryStore {
    /// Build a store from persisted status history
    ///
    /// Entries are sorted by id and the oldest are dropped when the persisted
    /// list is longer than `capacity` (the limit may have been lowered).
    #[must_use]
    pub fn from_entries(mut entries: Vec<RevisionHistory>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        entries.sort_by_key(|entry| entry.id);
        let mut entries = VecDeque::from(entries);
        while entries.len() > capacity {
            entries.pop_front();
        }
        Self { entries, capacity }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry with the largest id
    #[must_use]
    pub fn latest(&self) -> Option<&RevisionHistory> {
        self.entries.back()
    }

    #[must_use]
    pub fn next_id(&self) -> i64 {
        self.latest().map_or(0, |entry| entry.id + 1)
    }

    /// Append a new entry, evicting the oldest when full, and return its id
    pub fn add(
        &mut self,
        time: DateTime<Utc>,
        action: Action,
        impacted_objects: Vec<ImpactedObject>,
        excluded_objects: Vec<ExcludedObject>,
    ) -> i64 {
        let id = self.next_id();
        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(RevisionHistory {
            time,
            id,
            action,
            impacted_objects,
            excluded_objects,
        });
        id
    }

    /// Fold a resync tick into the latest entry
    ///
    /// Objects are upserted by resource key so an object hibernated on an
    /// earlier tick keeps its recorded original count. Returns `false` when
    /// there is no latest entry or it records a different action.
    pub fn merge_into_latest(
        &mut self,
        time: DateTime<Utc>,
        action: Action,
        impacted_objects: Vec<ImpactedObject>,
        excluded_objects: Vec<ExcludedObject>,
    ) -> bool {
        let Some(latest) = self.entries.back_mut() else {
            return false;
        };
        if latest.action != action {
            return false;
        }

        latest.time = time;
        for object in impacted_objects {
            match latest
                .impacted_objects
                .iter_mut()
                .find(|existing| existing.resource_key == object.resource_key)
            {
                Some(existing) => *existing = object,
                None => latest.impacted_objects.push(object),
            }
        }
        for object in excluded_objects {
            match latest
                .excluded_objects
                .iter_mut()
                .find(|existing| existing.resource_key == object.resource_key)
            {
                Some(existing) => *existing = object,
                None => latest.excluded_objects.push(object),
            }
        }
        true
    }

    /// Original replica count recorded for `resource_key`
    ///
    /// Taken from the newest hibernate or scale entry that impacted the
    /// object successfully; restores in between do not record an original
    /// count.
    #[must_use]
    pub fn original_count(&self, resource_key: &str) -> Option<i32> {
        self.entries
            .iter()
            .rev()
            .filter(|entry| matches!(entry.action, Action::Hibernate | Action::Scale))
            .find_map(|entry| {
                entry
                    .impacted_objects
                    .iter()
                    .find(|object| object.resource_key == resource_key && object.status == ObjectStatus::Success)
            })
            .map(|object| object.original_count)
    }

    #[must_use]
    pub fn into_entries(self) -> Vec<RevisionHistory> {
        self.entries.into()
    }
}
