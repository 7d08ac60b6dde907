//! Bidirectional name ↔ UUID LRU cache.

use std::num::NonZeroUsize;

use lru::LruCache;
use uuid::Uuid;

/// Default number of mappings kept in memory.
pub const DEFAULT_CAPACITY: usize = 1000;

/// Two LRU maps kept in lockstep so a hit in either direction is O(1).
#[derive(Debug)]
pub struct NameUuidCache {
    by_name: LruCache<String, Uuid>,
    by_uuid: LruCache<Uuid, String>,
}

impl NameUuidCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            by_name: LruCache::new(capacity),
            by_uuid: LruCache::new(capacity),
        }
    }

    pub fn uuid_of(&mut self, name: &str) -> Option<Uuid> {
        let uuid = *self.by_name.get(name)?;
        self.by_uuid.promote(&uuid);
        Some(uuid)
    }

    pub fn name_of(&mut self, uuid: &Uuid) -> Option<String> {
        let name = self.by_uuid.get(uuid)?.clone();
        self.by_name.promote(&name);
        Some(name)
    }

    /// Record a mapping in both directions, dropping whatever it displaces.
    pub fn insert(&mut self, name: &str, uuid: Uuid) {
        if let Some((old_name, old_uuid)) = self.by_name.push(name.to_string(), uuid)
            && (old_name != name || old_uuid != uuid)
            && self.by_uuid.peek(&old_uuid) == Some(&old_name)
        {
            self.by_uuid.pop(&old_uuid);
        }
        if let Some((old_uuid, old_name)) = self.by_uuid.push(uuid, name.to_string())
            && (old_uuid != uuid || old_name != name)
            && self.by_name.peek(&old_name) == Some(&old_uuid)
        {
            self.by_name.pop(&old_name);
        }
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

impl Default for NameUuidCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookups_work_both_ways() {
        let mut cache = NameUuidCache::new(4);
        let id = Uuid::new_v4();
        cache.insert("Steve", id);
        assert_eq!(cache.uuid_of("Steve"), Some(id));
        assert_eq!(cache.name_of(&id), Some("Steve".to_string()));
        assert_eq!(cache.uuid_of("Alex"), None);
    }

    #[test]
    fn evicts_least_recently_used() {
        let mut cache = NameUuidCache::new(2);
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        cache.insert("a", a);
        cache.insert("b", b);
        // Touch "a" so "b" becomes the eviction candidate.
        assert_eq!(cache.uuid_of("a"), Some(a));
        cache.insert("c", c);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.uuid_of("b"), None);
        assert_eq!(cache.name_of(&b), None);
        assert_eq!(cache.uuid_of("a"), Some(a));
        assert_eq!(cache.name_of(&c), Some("c".to_string()));
    }

    #[test]
    fn remapping_a_name_drops_the_stale_reverse_entry() {
        let mut cache = NameUuidCache::new(4);
        let (old, new) = (Uuid::new_v4(), Uuid::new_v4());
        cache.insert("Steve", old);
        cache.insert("Steve", new);
        assert_eq!(cache.uuid_of("Steve"), Some(new));
        assert_eq!(cache.name_of(&old), None);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn zero_capacity_still_holds_one_entry() {
        let mut cache = NameUuidCache::new(0);
        let id = Uuid::new_v4();
        cache.insert("x", id);
        assert_eq!(cache.uuid_of("x"), Some(id));
    }
}
