use thiserror::Error;
use uuid::Uuid;

use crate::calendar::Event;
use crate::todo::Todo;

/// Prefix of identifiers handed out locally before the remote store assigns a real one.
pub const TEMP_ID_PREFIX: &str = "local-";

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CacheError {
    #[error("No cached entry with id {0}")]
    UnknownEntry(String),
}

pub trait CacheEntry: Clone {
    type SortKey: Ord;

    fn id(&self) -> &str;
    fn set_id(&mut self, id: String);
    fn sort_key(&self) -> Self::SortKey;

    fn is_unconfirmed(&self) -> bool {
        self.id().starts_with(TEMP_ID_PREFIX)
    }
}

#[derive(Debug)]
#[must_use = "an optimistic insert must be reconciled"]
pub struct PendingInsert {
    temp_id: String,
}

impl PendingInsert {
    pub fn temp_id(&self) -> &str {
        &self.temp_id
    }
}

#[derive(Debug)]
#[must_use = "an optimistic update must be reconciled"]
pub struct PendingUpdate<T> {
    id: String,
    snapshot: T,
}

impl<T> PendingUpdate<T> {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn snapshot(&self) -> &T {
        &self.snapshot
    }
}

#[derive(Debug)]
#[must_use = "an optimistic removal must be reconciled"]
pub struct PendingRemoval<T> {
    removed: T,
    index: usize,
}

/// Ordered in-memory entries backing the current view, with optimistic mutations that are
/// later kept or rolled back. Every handle is consumed by exactly one reconciliation.
#[derive(Debug)]
pub struct LocalCache<T: CacheEntry> {
    entries: Vec<T>,
    pending: usize,
}

pub type EventCache = LocalCache<Event>;
pub type TodoCache = LocalCache<Todo>;

impl<T: CacheEntry> Default for LocalCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: CacheEntry> LocalCache<T> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            pending: 0,
        }
    }

    /// Replaces the whole cache with a fresh remote read.
    pub fn load(&mut self, entries: Vec<T>) {
        let mut entries = entries;
        entries.sort_by_key(|entry| entry.sort_key());
        self.entries = entries;
    }

    pub fn get(&self, id: &str) -> Option<&T> {
        self.entries.iter().find(|entry| entry.id() == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.iter()
    }

    pub fn entries(&self) -> &[T] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Optimistic mutations not yet reconciled.
    pub fn pending_count(&self) -> usize {
        self.pending
    }

    pub fn insert_optimistic(&mut self, draft: T) -> PendingInsert {
        let mut draft = draft;
        let temp_id = format!("{}{}", TEMP_ID_PREFIX, Uuid::new_v4());
        draft.set_id(temp_id.clone());
        self.insert_sorted(draft);
        self.pending += 1;
        tracing::debug!("Optimistic insert {}", temp_id);
        PendingInsert { temp_id }
    }

    /// Swaps the temporary entry for the confirmed one, or drops it and hands the error back.
    pub fn reconcile_insert<E>(
        &mut self,
        handle: PendingInsert,
        outcome: Result<T, E>,
    ) -> Result<T, E> {
        self.settle();
        let temp = self.take(&handle.temp_id);

        match outcome {
            Ok(confirmed) => {
                if temp.is_none() {
                    tracing::debug!("Temporary entry {} vanished before saving", handle.temp_id);
                }
                if self.position(confirmed.id()).is_none() {
                    self.insert_sorted(confirmed.clone());
                }
                Ok(confirmed)
            }
            Err(err) => {
                tracing::warn!("Rolled back optimistic insert {}", handle.temp_id);
                Err(err)
            }
        }
    }

    pub fn update_optimistic(
        &mut self,
        id: &str,
        apply: impl FnOnce(&mut T),
    ) -> Result<PendingUpdate<T>, CacheError> {
        let mut entry = self
            .take(id)
            .ok_or_else(|| CacheError::UnknownEntry(id.to_string()))?;
        let snapshot = entry.clone();
        apply(&mut entry);
        self.insert_sorted(entry);
        self.pending += 1;
        Ok(PendingUpdate {
            id: id.to_string(),
            snapshot,
        })
    }

    /// On failure the entry is restored to its full pre-patch snapshot.
    pub fn reconcile_update<E>(
        &mut self,
        handle: PendingUpdate<T>,
        outcome: Result<(), E>,
    ) -> Result<(), E> {
        self.settle();
        match outcome {
            Ok(()) => Ok(()),
            Err(err) => {
                if self.take(&handle.id).is_some() {
                    self.insert_sorted(handle.snapshot);
                    tracing::warn!("Rolled back optimistic update of {}", handle.id);
                } else {
                    tracing::debug!("Entry {} left the cache before its update failed", handle.id);
                }
                Err(err)
            }
        }
    }

    pub fn remove_optimistic(&mut self, id: &str) -> Result<PendingRemoval<T>, CacheError> {
        let index = self
            .position(id)
            .ok_or_else(|| CacheError::UnknownEntry(id.to_string()))?;
        let removed = self.entries.remove(index);
        self.pending += 1;
        Ok(PendingRemoval { removed, index })
    }

    /// On failure the entry returns at its original position among equal sort keys.
    pub fn reconcile_remove<E>(
        &mut self,
        handle: PendingRemoval<T>,
        outcome: Result<(), E>,
    ) -> Result<(), E> {
        self.settle();
        match outcome {
            Ok(()) => Ok(()),
            Err(err) => {
                if self.position(handle.removed.id()).is_none() {
                    let key = handle.removed.sort_key();
                    let lower = self.entries.partition_point(|e| e.sort_key() < key);
                    let upper = self.entries.partition_point(|e| e.sort_key() <= key);
                    let index = handle.index.clamp(lower, upper);
                    tracing::warn!("Restored {} after failed removal", handle.removed.id());
                    self.entries.insert(index, handle.removed);
                }
                Err(err)
            }
        }
    }

    fn settle(&mut self) {
        self.pending = self.pending.saturating_sub(1);
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.entries.iter().position(|entry| entry.id() == id)
    }

    fn take(&mut self, id: &str) -> Option<T> {
        self.position(id).map(|index| self.entries.remove(index))
    }

    fn insert_sorted(&mut self, entry: T) {
        let key = entry.sort_key();
        let index = self.entries.partition_point(|e| e.sort_key() <= key);
        self.entries.insert(index, entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::{EventPatch, EventRange};
    use chrono::{DateTime, Duration, FixedOffset};
    use pretty_assertions::assert_eq;

    #[derive(Debug, PartialEq)]
    struct RemoteFailure(&'static str);

    fn at(s: &str) -> DateTime<FixedOffset> {
        DateTime::parse_from_rfc3339(s).unwrap()
    }

    fn create_test_event(id: &str, title: &str, start: &str) -> Event {
        let start = at(start);
        let range = EventRange::new(start, None, false);
        Event {
            id: id.to_string(),
            ..Event::draft(title, range, "user-a")
        }
    }

    fn dinner_draft() -> Event {
        create_test_event("", "Dinner", "2024-06-02T19:00:00+00:00")
    }

    fn create_test_cache() -> EventCache {
        let mut cache = EventCache::new();
        cache.load(vec![
            create_test_event("3", "Gym", "2024-06-03T18:00:00+00:00"),
            create_test_event("1", "Breakfast", "2024-06-01T08:00:00+00:00"),
            create_test_event("2", "Lunch", "2024-06-02T12:00:00+00:00"),
        ]);
        cache
    }

    fn ids(cache: &EventCache) -> Vec<&str> {
        cache.iter().map(|e| e.id.as_str()).collect()
    }

    #[test]
    fn load_orders_by_start() {
        let cache = create_test_cache();
        assert_eq!(ids(&cache), vec!["1", "2", "3"]);
    }

    #[test]
    fn load_replaces_previous_contents() {
        let mut cache = create_test_cache();
        cache.load(vec![create_test_event("9", "Only", "2024-07-01T10:00:00+00:00")]);
        assert_eq!(ids(&cache), vec!["9"]);
    }

    #[test]
    fn optimistic_insert_is_visible_immediately_under_temp_id() {
        let mut cache = create_test_cache();
        let handle = cache.insert_optimistic(dinner_draft());

        assert_eq!(cache.len(), 4);
        let temp = cache.get(handle.temp_id()).unwrap();
        assert!(temp.is_unconfirmed());
        assert_eq!(cache.entries()[2].title, "Dinner");
        assert_eq!(cache.pending_count(), 1);

        let _ = cache.reconcile_insert::<RemoteFailure>(handle, Err(RemoteFailure("x")));
    }

    #[test]
    fn confirmed_insert_replaces_temporary_entry() {
        let mut cache = create_test_cache();
        let handle = cache.insert_optimistic(dinner_draft());
        let temp_id = handle.temp_id().to_string();
        let confirmed = create_test_event("17", "Dinner", "2024-06-02T19:00:00+00:00");

        let result = cache.reconcile_insert::<RemoteFailure>(handle, Ok(confirmed.clone()));

        assert_eq!(result, Ok(confirmed));
        assert!(cache.get(&temp_id).is_none());
        assert_eq!(ids(&cache), vec!["1", "2", "17", "3"]);
        assert!(cache.iter().all(|e| !e.is_unconfirmed()));
        assert_eq!(cache.pending_count(), 0);
    }

    #[test]
    fn failed_insert_restores_previous_state() {
        let mut cache = create_test_cache();
        let before = cache.entries().to_vec();
        let handle = cache.insert_optimistic(dinner_draft());

        let result = cache.reconcile_insert(handle, Err(RemoteFailure("permission denied")));

        assert_eq!(result, Err(RemoteFailure("permission denied")));
        assert_eq!(cache.entries(), before.as_slice());
        assert_eq!(cache.pending_count(), 0);
    }

    #[test]
    fn confirmed_insert_after_reload_is_not_duplicated() {
        let mut cache = create_test_cache();
        let handle = cache.insert_optimistic(dinner_draft());
        let confirmed = create_test_event("17", "Dinner", "2024-06-02T19:00:00+00:00");
        let mut reloaded: Vec<Event> = cache
            .iter()
            .filter(|e| !e.is_unconfirmed())
            .cloned()
            .collect();
        reloaded.push(confirmed.clone());
        cache.load(reloaded);

        cache.reconcile_insert::<RemoteFailure>(handle, Ok(confirmed)).unwrap();

        assert_eq!(cache.iter().filter(|e| e.id == "17").count(), 1);
    }

    #[test]
    fn failed_update_restores_exact_snapshot() {
        let mut cache = create_test_cache();
        let original = cache.get("1").unwrap().clone();
        let patch = EventPatch {
            starts_at: Some(original.starts_at + Duration::hours(1)),
            ends_at: Some(original.ends_at + Duration::hours(1)),
            all_day: Some(false),
        };

        let handle = cache.update_optimistic("1", |event| event.apply(&patch)).unwrap();
        assert_eq!(cache.get("1").unwrap().starts_at, original.starts_at + Duration::hours(1));

        let result = cache.reconcile_update(handle, Err(RemoteFailure("offline")));

        assert_eq!(result, Err(RemoteFailure("offline")));
        assert_eq!(cache.get("1"), Some(&original));
    }

    #[test]
    fn successful_update_keeps_optimistic_state() {
        let mut cache = create_test_cache();
        let new_start = at("2024-06-05T09:00:00+00:00");

        let handle = cache
            .update_optimistic("1", |event| {
                event.starts_at = new_start;
                event.ends_at = new_start + Duration::hours(1);
            })
            .unwrap();
        cache.reconcile_update::<RemoteFailure>(handle, Ok(())).unwrap();

        assert_eq!(cache.get("1").unwrap().starts_at, new_start);
        assert_eq!(ids(&cache), vec!["2", "3", "1"]);
    }

    #[test]
    fn update_of_unknown_entry_fails() {
        let mut cache = create_test_cache();
        let result = cache.update_optimistic("missing", |_| {});
        assert_eq!(result.unwrap_err(), CacheError::UnknownEntry("missing".to_string()));
        assert_eq!(cache.pending_count(), 0);
    }

    #[test]
    fn failed_removal_restores_original_position() {
        let mut cache = create_test_cache();
        let before = cache.entries().to_vec();

        let handle = cache.remove_optimistic("2").unwrap();
        assert_eq!(ids(&cache), vec!["1", "3"]);

        let _ = cache.reconcile_remove(handle, Err(RemoteFailure("offline")));

        assert_eq!(cache.entries(), before.as_slice());
    }

    #[test]
    fn failed_removal_restores_position_among_equal_starts() {
        let mut cache = EventCache::new();
        cache.load(vec![
            create_test_event("a", "First", "2024-06-01T10:00:00+00:00"),
            create_test_event("b", "Second", "2024-06-01T10:00:00+00:00"),
            create_test_event("c", "Third", "2024-06-01T10:00:00+00:00"),
        ]);

        let handle = cache.remove_optimistic("b").unwrap();
        let _ = cache.reconcile_remove(handle, Err(RemoteFailure("offline")));

        assert_eq!(ids(&cache), vec!["a", "b", "c"]);
    }

    #[test]
    fn successful_removal_is_permanent() {
        let mut cache = create_test_cache();
        let handle = cache.remove_optimistic("2").unwrap();

        cache.reconcile_remove::<RemoteFailure>(handle, Ok(())).unwrap();

        assert!(cache.get("2").is_none());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn interleaved_mutations_reconcile_against_current_state() {
        let mut cache = create_test_cache();
        let insert = cache.insert_optimistic(dinner_draft());
        let removal = cache.remove_optimistic("3").unwrap();
        let update = cache
            .update_optimistic("1", |event| {
                event.starts_at = event.starts_at + Duration::minutes(30)
            })
            .unwrap();
        assert_eq!(cache.pending_count(), 3);

        cache.reconcile_remove::<RemoteFailure>(removal, Ok(())).unwrap();
        let _ = cache.reconcile_insert(insert, Err(RemoteFailure("denied")));
        cache.reconcile_update::<RemoteFailure>(update, Ok(())).unwrap();

        assert_eq!(ids(&cache), vec!["1", "2"]);
        assert_eq!(cache.get("1").unwrap().starts_at, at("2024-06-01T08:30:00+00:00"));
        assert_eq!(cache.pending_count(), 0);
    }
}
