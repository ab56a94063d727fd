use super::cache::IdentityCache;
use super::counters::CounterService;
use super::entity::{Entity, EntityRef, TrackedEntity, from_doc};
use super::query::Query;
use crate::config::RetryPolicy;
use crate::core::{DocId, Document, Result, StoreError};
use crate::storage::{DocumentStore, ViewQuery};
use log::debug;
use std::collections::HashSet;
use std::sync::Arc;

/// One unit-of-work scope over a shared document store.
///
/// A `Store` owns an [`IdentityCache`]; clones share it. Use
/// [`Store::scoped`] (or `Database::store`) to get a fresh scope over the
/// same client.
#[derive(Clone)]
pub struct Store {
    client: Arc<dyn DocumentStore>,
    counters: CounterService,
    cache: IdentityCache,
}

impl Store {
    pub fn new(client: Arc<dyn DocumentStore>, retry: RetryPolicy) -> Self {
        Self::with_cache(client, retry, IdentityCache::new())
    }

    pub fn with_cache(client: Arc<dyn DocumentStore>, retry: RetryPolicy, cache: IdentityCache) -> Self {
        Self {
            counters: CounterService::new(client.clone(), retry),
            client,
            cache,
        }
    }

    /// New scope over the same client with an empty identity cache.
    pub fn scoped(&self) -> Self {
        Self {
            client: self.client.clone(),
            counters: self.counters.clone(),
            cache: IdentityCache::new(),
        }
    }

    pub fn client(&self) -> &Arc<dyn DocumentStore> {
        &self.client
    }

    pub fn counters(&self) -> &CounterService {
        &self.counters
    }

    pub fn cache(&self) -> &IdentityCache {
        &self.cache
    }

    /// Drops every cached instance; the next reads go back to the store.
    pub fn invalidate(&self) {
        self.cache.clear();
    }

    pub fn query<E: Entity>(&self) -> Query<E> {
        Query::new(self.clone())
    }

    /// Returns the cached instance for the document's record, hydrating and
    /// caching it first when this scope has not seen it yet.
    pub fn hydrate<E: Entity>(&self, doc: &Document) -> Result<EntityRef<E>> {
        let id = doc
            .numeric_id()
            .or_else(|| DocId::parse(&doc.id).map(|parsed| parsed.id));
        if let Some(cached) = id.and_then(|id| self.cache.get::<E>(id)) {
            return Ok(cached);
        }
        let entity = from_doc::<E>(doc)?;
        match entity.id() {
            Some(id) => Ok(self.cache.get_or_insert(id, entity)),
            None => Ok(EntityRef::new(entity)),
        }
    }

    fn hydrate_all<E: Entity>(&self, docs: &[Document]) -> Result<Vec<EntityRef<E>>> {
        docs.iter()
            .filter(|doc| doc.doc_type().is_none_or(|doc_type| doc_type == E::DOC_TYPE))
            .map(|doc| self.hydrate::<E>(doc))
            .collect()
    }

    /// Point lookup through the identity cache.
    pub async fn get<E: Entity>(&self, id: i64) -> Result<Option<EntityRef<E>>> {
        if let Some(cached) = self.cache.get::<E>(id) {
            return Ok(Some(cached));
        }
        let doc_id = DocId::new(E::DOC_TYPE, id).to_string();
        match self.client.get(&doc_id).await? {
            Some(doc) => self.hydrate::<E>(&doc).map(Some),
            None => Ok(None),
        }
    }

    /// Point lookup that turns a missing record into [`StoreError::NotFound`].
    pub async fn get_or_404<E: Entity>(&self, id: i64) -> Result<EntityRef<E>> {
        self.get::<E>(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(DocId::new(E::DOC_TYPE, id).to_string()))
    }

    /// Resolves a foreign-key id; `None` resolves to `None`.
    pub async fn resolve<E: Entity>(&self, id: Option<i64>) -> Result<Option<EntityRef<E>>> {
        match id {
            Some(id) => self.get::<E>(id).await,
            None => Ok(None),
        }
    }

    /// Bulk lookup. Ids are de-duplicated in first-seen order and missing
    /// records are skipped.
    pub async fn get_many<E: Entity>(&self, ids: impl IntoIterator<Item = i64>) -> Result<Vec<EntityRef<E>>> {
        let mut seen = HashSet::new();
        let mut found = Vec::new();
        for id in ids {
            if !seen.insert(id) {
                continue;
            }
            if let Some(entity) = self.get::<E>(id).await? {
                found.push(entity);
            }
        }
        Ok(found)
    }

    /// Every record of the type, ascending by id.
    pub async fn all<E: Entity>(&self) -> Result<Vec<EntityRef<E>>> {
        let docs = self.client.scan_prefix(&DocId::type_prefix(E::DOC_TYPE)).await?;
        let mut entities = self.hydrate_all::<E>(&docs)?;
        entities.sort_by_key(|entity| entity.id());
        Ok(entities)
    }

    /// Records whose fields equal every `(field, value)` predicate.
    pub async fn filter_by<E: Entity>(
        &self,
        filters: &[(&str, serde_json::Value)],
    ) -> Result<Vec<EntityRef<E>>> {
        let mut query = self.query::<E>();
        for (field, value) in filters {
            query = query.filter_by(field, value.clone());
        }
        query.all().await
    }

    /// Range read over the `by_type_id` index: `per_page` records starting
    /// at `(page - 1) * per_page`, in id order.
    pub async fn page<E: Entity>(&self, page: usize, per_page: usize, descending: bool) -> Result<Vec<EntityRef<E>>> {
        if per_page == 0 {
            return Ok(Vec::new());
        }
        let skip = page.max(1).saturating_sub(1).saturating_mul(per_page);
        let view = ViewQuery::by_type_id(E::DOC_TYPE, descending)
            .skip(skip)
            .limit(per_page);
        let docs = self.client.query_view(&view).await.map_err(|err| match err {
            StoreError::NotFound(view) => StoreError::Misconfigured(format!(
                "secondary index '{}' is missing; run bootstrap first",
                view
            )),
            other => other,
        })?;
        self.hydrate_all::<E>(&docs)
    }

    /// The maintained `"{key}_total"` for the type, if any.
    pub async fn total_count<E: Entity>(&self) -> Result<Option<i64>> {
        self.counters.total_count(E::COUNTER_KEY).await
    }

    /// Counts the type's documents by scanning its key range.
    pub async fn count_docs<E: Entity>(&self) -> Result<usize> {
        self.client.count_prefix(&DocId::type_prefix(E::DOC_TYPE)).await
    }

    /// Saves one entity, allocating its id on first save.
    ///
    /// A stale revision surfaces as [`StoreError::Conflict`]; the entity
    /// keeps its in-memory changes so the caller can re-read and reapply.
    pub async fn save<E: Entity>(&self, entity: &EntityRef<E>) -> Result<()> {
        self.save_tracked(entity.tracked()).await
    }

    pub(crate) async fn save_tracked(&self, tracked: Arc<dyn TrackedEntity>) -> Result<()> {
        tracked.prepare_save();
        let counter_key = tracked.counter_key();
        let count_towards_total = tracked.revision().is_none() || tracked.total_pending();

        let id = match tracked.entity_id() {
            Some(id) => {
                self.counters.ensure_counter_at_least(counter_key, id).await?;
                id
            }
            None => {
                let id = self.counters.next_id(counter_key).await?;
                tracked.assign_id(id);
                id
            }
        };

        let doc = tracked.to_document()?;
        let (doc_id, revision) = self.client.save(doc).await?;
        debug!("saved '{}' at {}", doc_id, revision);
        let id = DocId::parse(&doc_id).map_or(id, |parsed| parsed.id);

        tracked.mark_saved(id, revision);
        self.cache.insert_tracked(tracked.clone());
        if count_towards_total {
            // Stays set if the increment fails so the next save re-applies it.
            tracked.set_total_pending(true);
            self.counters.update_total(counter_key, 1).await?;
            tracked.set_total_pending(false);
        }
        Ok(())
    }

    /// Deletes the record immediately, re-reading it for its current
    /// revision. Returns `false` when there was nothing to delete.
    pub async fn delete<E: Entity>(&self, entity: &EntityRef<E>) -> Result<bool> {
        let Some(id) = entity.id() else {
            return Ok(false);
        };
        let doc_id = DocId::new(E::DOC_TYPE, id).to_string();

        let deleted = match self.client.get(&doc_id).await? {
            Some(Document { rev: Some(rev), .. }) => match self.client.delete(&doc_id, &rev).await {
                Ok(()) => true,
                Err(StoreError::NotFound(_)) => false,
                Err(err) => return Err(err),
            },
            _ => false,
        };
        let tracked = entity.tracked();
        // A create whose increment never landed must not be decremented either.
        let counted = !tracked.total_pending();
        if deleted {
            debug!("deleted '{}'", doc_id);
            if counted {
                self.counters.update_total(E::COUNTER_KEY, -1).await?;
            }
        }

        self.cache.remove(E::DOC_TYPE, id);
        tracked.set_total_pending(false);
        tracked.mark_clean();
        Ok(deleted)
    }

    /// Keys of cached entities mutated since they were loaded or saved.
    pub fn dirty_entities(&self) -> Vec<DocId> {
        self.cache
            .dirty()
            .iter()
            .filter_map(|tracked| tracked.entity_id().map(|id| DocId::new(tracked.doc_type(), id)))
            .collect()
    }

    pub(crate) fn dirty_tracked(&self) -> Vec<Arc<dyn TrackedEntity>> {
        self.cache.dirty()
    }
}
