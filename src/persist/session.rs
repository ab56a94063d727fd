use super::entity::{Entity, EntityRef, TrackedEntity};
use super::store::Store;
use crate::core::Result;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{Instrument, Level, event, info_span};

/// Unit of work: staged entities plus whatever the scope's identity cache
/// has seen mutated, written on [`commit`](Self::commit).
///
/// Not transactional across documents. When a save fails mid-commit the
/// earlier saves stay persisted and leave the staged list; the failed entity
/// and everything after it stay staged for the next commit.
pub struct Session {
    store: Store,
    pending: Vec<Arc<dyn TrackedEntity>>,
}

fn same_instance(a: &Arc<dyn TrackedEntity>, b: &Arc<dyn TrackedEntity>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

impl Session {
    pub fn new(store: Store) -> Self {
        Self {
            store,
            pending: Vec::new(),
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Stages a new or modified entity and marks it dirty.
    pub fn add<E: Entity>(&mut self, entity: &EntityRef<E>) {
        entity.write().mark_dirty();
        let tracked = entity.tracked();
        if !self.pending.iter().any(|staged| same_instance(staged, &tracked)) {
            self.pending.push(tracked);
        }
    }

    /// Wraps and stages a fresh entity, returning its shared handle.
    pub fn add_new<E: Entity>(&mut self, entity: E) -> EntityRef<E> {
        let entity = EntityRef::new(entity);
        self.add(&entity);
        entity
    }

    /// Deletes immediately; also unstages the entity.
    pub async fn delete<E: Entity>(&mut self, entity: &EntityRef<E>) -> Result<bool> {
        let tracked = entity.tracked();
        self.pending.retain(|staged| !same_instance(staged, &tracked));
        self.store.delete(entity).await
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Saves every staged entity, then every cached entity mutated since it
    /// was loaded, each at most once. Returns the number of documents written.
    pub async fn commit(&mut self) -> Result<usize> {
        let span = info_span!(
            "session.commit",
            staged = self.pending.len()
        );
        async {
            let mut seen: HashSet<(&'static str, i64)> = HashSet::new();
            let mut written = 0usize;

            while let Some(tracked) = self.pending.first().cloned() {
                if let Err(err) = self.store.save_tracked(tracked.clone()).await {
                    event!(Level::ERROR, error = %err, "session commit failed on staged entity");
                    return Err(err);
                }
                self.pending.remove(0);
                written += 1;
                if let Some(id) = tracked.entity_id() {
                    seen.insert((tracked.doc_type(), id));
                }
            }

            for tracked in self.store.dirty_tracked() {
                let already_saved = tracked
                    .entity_id()
                    .is_some_and(|id| seen.contains(&(tracked.doc_type(), id)));
                if already_saved {
                    continue;
                }
                if let Err(err) = self.store.save_tracked(tracked).await {
                    event!(Level::ERROR, error = %err, "session commit failed on dirty entity");
                    return Err(err);
                }
                written += 1;
            }

            event!(Level::INFO, written, "session committed");
            Ok(written)
        }
        .instrument(span)
        .await
    }

    pub async fn flush(&mut self) -> Result<usize> {
        self.commit().await
    }
}
