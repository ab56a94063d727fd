use super::entity::{Entity, EntityRef, TrackedEntity};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

type CacheKey = (&'static str, i64);

/// Per-scope identity map from `(doc_type, id)` to the one live instance of
/// that record.
///
/// Clones share the same map. Entries never expire; they leave the map only
/// on [`remove`](Self::remove), [`clear`](Self::clear) or when the scope is
/// dropped.
#[derive(Clone, Default)]
pub struct IdentityCache {
    entries: Arc<Mutex<HashMap<CacheKey, Arc<dyn TrackedEntity>>>>,
}

impl IdentityCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<CacheKey, Arc<dyn TrackedEntity>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cached instance for `id`, if this scope has loaded it.
    pub fn get<E: Entity>(&self, id: i64) -> Option<EntityRef<E>> {
        let tracked = self.lock().get(&(E::DOC_TYPE, id)).cloned()?;
        tracked
            .into_any()
            .downcast::<RwLock<E>>()
            .ok()
            .map(EntityRef::from_arc)
    }

    /// Caches `entity` under its id. Unsaved entities are ignored.
    pub fn insert<E: Entity>(&self, entity: &EntityRef<E>) {
        if let Some(id) = entity.id() {
            self.lock().insert((E::DOC_TYPE, id), entity.tracked());
        }
    }

    /// Returns the cached instance for the entity's id, caching `entity`
    /// first when the slot is empty.
    pub fn get_or_insert<E: Entity>(&self, id: i64, entity: E) -> EntityRef<E> {
        if let Some(existing) = self.get::<E>(id) {
            return existing;
        }
        let entity = EntityRef::new(entity);
        let mut entries = self.lock();
        let tracked = entries
            .entry((E::DOC_TYPE, id))
            .or_insert_with(|| entity.tracked())
            .clone();
        drop(entries);
        tracked
            .into_any()
            .downcast::<RwLock<E>>()
            .map(EntityRef::from_arc)
            .unwrap_or(entity)
    }

    pub(crate) fn insert_tracked(&self, tracked: Arc<dyn TrackedEntity>) {
        if let Some(id) = tracked.entity_id() {
            self.lock().insert((tracked.doc_type(), id), tracked);
        }
    }

    pub fn remove(&self, doc_type: &'static str, id: i64) -> bool {
        self.lock().remove(&(doc_type, id)).is_some()
    }

    pub fn contains(&self, doc_type: &'static str, id: i64) -> bool {
        self.lock().contains_key(&(doc_type, id))
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Drops every entry.
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Drops every entry of one document type.
    pub fn invalidate(&self, doc_type: &str) {
        self.lock().retain(|(t, _), _| *t != doc_type);
    }

    /// Cached entities that still need a save (dirty, or created without
    /// their total applied), ordered by `(doc_type, id)`.
    pub(crate) fn dirty(&self) -> Vec<Arc<dyn TrackedEntity>> {
        let entries = self.lock();
        let mut keys: Vec<&CacheKey> = entries
            .iter()
            .filter(|(_, tracked)| tracked.is_dirty() || tracked.total_pending())
            .map(|(key, _)| key)
            .collect();
        keys.sort();
        keys.into_iter()
            .filter_map(|key| entries.get(key).cloned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Car, Railroad};

    #[test]
    fn test_same_record_same_instance() {
        let cache = IdentityCache::new();
        let railroad = EntityRef::new(Railroad::new().with_id(7).with_name("Test RR"));
        cache.insert(&railroad);

        let first = cache.get::<Railroad>(7).unwrap();
        let second = cache.get::<Railroad>(7).unwrap();
        assert!(first.ptr_eq(&second));
        assert!(first.ptr_eq(&railroad));
    }

    #[test]
    fn test_types_do_not_collide() {
        let cache = IdentityCache::new();
        cache.insert(&EntityRef::new(Railroad::new().with_id(1)));

        assert!(cache.get::<Car>(1).is_none());
        assert!(cache.contains("railroad", 1));
        assert!(!cache.contains("car", 1));
    }

    #[test]
    fn test_unsaved_entities_are_not_cached() {
        let cache = IdentityCache::new();
        cache.insert(&EntityRef::new(Railroad::new()));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_get_or_insert_keeps_existing() {
        let cache = IdentityCache::new();
        let original = cache.get_or_insert(3, Railroad::new().with_id(3).with_name("A"));
        let again = cache.get_or_insert(3, Railroad::new().with_id(3).with_name("B"));

        assert!(original.ptr_eq(&again));
        assert_eq!(again.read().name().as_deref(), Some("A"));
    }

    #[test]
    fn test_invalidate_and_remove() {
        let cache = IdentityCache::new();
        cache.insert(&EntityRef::new(Railroad::new().with_id(1)));
        cache.insert(&EntityRef::new(Railroad::new().with_id(2)));
        cache.insert(&EntityRef::new(Car::new().with_id(1)));

        assert!(cache.remove("railroad", 2));
        assert!(!cache.remove("railroad", 2));
        assert!(!cache.contains("railroad", 2));
        assert!(cache.contains("car", 1));
        assert_eq!(cache.len(), 2);

        cache.invalidate("railroad");
        assert_eq!(cache.len(), 1);
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_dirty_lists_mutated_entries() {
        let cache = IdentityCache::new();
        let clean = EntityRef::new(Railroad::new().with_id(1));
        let touched = EntityRef::new(Railroad::new().with_id(2));
        cache.insert(&clean);
        cache.insert(&touched);

        touched.write().set_name("Renamed");

        let dirty = cache.dirty();
        assert_eq!(dirty.len(), 1);
        assert_eq!(dirty[0].entity_id(), Some(2));
    }
}
