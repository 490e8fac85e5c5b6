use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::sync::Arc;

use crate::models::TestObject;
use crate::utils::Clock;

/// In-memory cache for ad hoc objects that were not persisted.
///
/// Expiry is measured from insertion. An expired entry reads exactly like
/// one that never existed and is dropped on the next access.
#[derive(Clone)]
pub struct TransientCache {
    entries: Arc<DashMap<String, (DateTime<Utc>, TestObject)>>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl TransientCache {
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            ttl,
            clock,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Insert an object under its id. Objects without id are ignored.
    pub fn insert(&self, object: TestObject) -> bool {
        let Some(id) = object.id().map(str::to_string) else {
            log::warn!("Refusing to cache a test object without id");
            return false;
        };
        self.entries.insert(id, (self.clock.now(), object));
        true
    }

    pub fn get(&self, id: &str) -> Option<TestObject> {
        let now = self.clock.now();
        let live = {
            let entry = self.entries.get(id)?;
            let (inserted_at, object) = entry.value();
            (!self.expired(*inserted_at, now)).then(|| object.clone())
        };
        if live.is_none() {
            self.entries
                .remove_if(id, |_, (inserted_at, _)| self.expired(*inserted_at, now));
        }
        live
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Drop every expired entry; returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries
            .retain(|_, (inserted_at, _)| !self.expired(*inserted_at, now));
        let purged = before.saturating_sub(self.entries.len());
        if purged > 0 {
            log::debug!("Purged {} expired transient test objects", purged);
        }
        purged
    }

    /// Number of entries, expired ones included until purged
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn expired(&self, inserted_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        now - inserted_at >= self.ttl
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::ManualClock;
    use chrono::TimeZone;

    fn cache() -> (TransientCache, Arc<ManualClock>) {
        let start = Utc.with_ymd_and_hms(2025, 6, 1, 8, 0, 0).unwrap();
        let clock = Arc::new(ManualClock::new(start));
        (TransientCache::new(Duration::minutes(7), clock.clone()), clock)
    }

    #[test]
    fn test_ttl_boundary() {
        let (cache, clock) = cache();
        assert!(cache.insert(TestObject::with_id("EID1")));

        clock.advance(Duration::minutes(7) - Duration::milliseconds(1));
        assert_eq!(cache.get("EID1").unwrap().id(), Some("EID1"));

        clock.advance(Duration::milliseconds(2));
        assert!(cache.get("EID1").is_none());
        assert!(!cache.contains("EID1"));
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_expiry_counts_from_insertion_not_access() {
        let (cache, clock) = cache();
        cache.insert(TestObject::with_id("EID1"));

        for _ in 0..6 {
            clock.advance(Duration::minutes(1));
            assert!(cache.contains("EID1"));
        }
        clock.advance(Duration::minutes(1));
        assert!(!cache.contains("EID1"));
    }

    #[test]
    fn test_purge_expired() {
        let (cache, clock) = cache();
        cache.insert(TestObject::with_id("EID1"));
        clock.advance(Duration::minutes(5));
        cache.insert(TestObject::with_id("EID2"));
        clock.advance(Duration::minutes(3));

        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.contains("EID2"));
    }

    #[test]
    fn test_object_without_id_not_cached() {
        let (cache, _) = cache();
        assert!(!cache.insert(TestObject::new()));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_concurrent_inserts() {
        let (cache, _) = cache();
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    for j in 0..50 {
                        cache.insert(TestObject::with_id(format!("EID{}-{}", i, j)));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(cache.len(), 400);
        assert!(cache.contains("EID7-49"));
    }
}
