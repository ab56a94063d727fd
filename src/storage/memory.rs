use super::{DocumentStore, ViewQuery};
use crate::core::{
    BY_TYPE_ID_VIEW, DESIGN_DOC_ID, Document, Result, Revision, StoreError, compare_json,
};
use async_trait::async_trait;
use log::debug;
use serde_json::{Value, json};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use tokio::sync::RwLock;
use uuid::Uuid;

/// Process-local document store with CouchDB revision semantics.
///
/// Every write is checked against the stored `_rev` under a single write lock,
/// so concurrent writers racing on one document see exactly one winner and
/// `Conflict` for the rest. The `by_type_id` view is evaluated natively, but
/// only once its design document has been installed.
pub struct MemoryDocumentStore {
    /// Documents keyed by `_id`, in key order (the `_all_docs` order)
    docs: RwLock<BTreeMap<String, Document>>,
    /// Bumped on every successful write or delete
    update_seq: AtomicU64,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self {
            docs: RwLock::new(BTreeMap::new()),
            update_seq: AtomicU64::new(0),
        }
    }

    /// Number of stored documents, design and counters documents included.
    pub async fn len(&self) -> usize {
        self.docs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.docs.read().await.is_empty()
    }

    fn next_revision(previous: Option<&Revision>) -> Revision {
        let generation = previous.and_then(Revision::generation).unwrap_or(0) + 1;
        Revision::new(format!("{}-{}", generation, Uuid::new_v4().simple()))
    }

    fn view_is_installed(docs: &BTreeMap<String, Document>, query: &ViewQuery) -> bool {
        if format!("_design/{}", query.design) != DESIGN_DOC_ID || query.view != BY_TYPE_ID_VIEW {
            return false;
        }
        docs.get(DESIGN_DOC_ID)
            .and_then(|design| design.get("views"))
            .and_then(|views| views.get(BY_TYPE_ID_VIEW))
            .and_then(|view| view.get("map"))
            .is_some()
    }

    /// Key emitted by the `by_type_id` map function, if the document emits one.
    fn emitted_key(doc: &Document) -> Option<Value> {
        if doc.id.starts_with("_design/") {
            return None;
        }
        let doc_type = doc.get("type").filter(|value| is_truthy(value))?;
        let id = doc.get("id").filter(|value| !value.is_null())?;
        Some(json!([doc_type, id]))
    }
}

impl Default for MemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        Value::String(text) => !text.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn get(&self, doc_id: &str) -> Result<Option<Document>> {
        Ok(self.docs.read().await.get(doc_id).cloned())
    }

    async fn save(&self, mut doc: Document) -> Result<(String, Revision)> {
        let mut docs = self.docs.write().await;
        let current = docs.get(&doc.id).and_then(|stored| stored.rev.clone());

        if current != doc.rev {
            debug!(
                "memory store conflict: doc='{}' presented={:?} stored={:?}",
                doc.id, doc.rev, current
            );
            return Err(StoreError::Conflict(doc.id));
        }

        let rev = Self::next_revision(current.as_ref());
        doc.rev = Some(rev.clone());
        let id = doc.id.clone();
        docs.insert(id.clone(), doc);
        self.update_seq.fetch_add(1, AtomicOrdering::AcqRel);
        Ok((id, rev))
    }

    async fn delete(&self, doc_id: &str, rev: &Revision) -> Result<()> {
        let mut docs = self.docs.write().await;
        let Some(stored) = docs.get(doc_id) else {
            return Err(StoreError::NotFound(doc_id.to_string()));
        };
        if stored.rev.as_ref() != Some(rev) {
            return Err(StoreError::Conflict(doc_id.to_string()));
        }
        docs.remove(doc_id);
        self.update_seq.fetch_add(1, AtomicOrdering::AcqRel);
        Ok(())
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<Document>> {
        let docs = self.docs.read().await;
        Ok(docs
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(_, doc)| doc.clone())
            .collect())
    }

    async fn count_prefix(&self, prefix: &str) -> Result<usize> {
        let docs = self.docs.read().await;
        Ok(docs
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .count())
    }

    async fn query_view(&self, query: &ViewQuery) -> Result<Vec<Document>> {
        let docs = self.docs.read().await;
        if !Self::view_is_installed(&docs, query) {
            return Err(StoreError::NotFound(format!(
                "_design/{}/_view/{}",
                query.design, query.view
            )));
        }

        let mut rows: Vec<(Value, &Document)> = docs
            .values()
            .filter_map(|doc| Self::emitted_key(doc).map(|key| (key, doc)))
            .collect();
        rows.sort_by(|(ka, da), (kb, db)| compare_json(ka, kb).then_with(|| da.id.cmp(&db.id)));
        if query.descending {
            rows.reverse();
        }

        let (low, high) = if query.descending {
            (query.end_key.as_ref(), query.start_key.as_ref())
        } else {
            (query.start_key.as_ref(), query.end_key.as_ref())
        };
        let in_range = |key: &Value| {
            low.is_none_or(|low| compare_json(key, low) != Ordering::Less)
                && high.is_none_or(|high| compare_json(key, high) != Ordering::Greater)
        };

        Ok(rows
            .into_iter()
            .filter(|(key, _)| in_range(key))
            .skip(query.skip)
            .take(query.limit.unwrap_or(usize::MAX))
            .map(|(_, doc)| doc.clone())
            .collect())
    }

    async fn update_seq(&self) -> Result<Option<String>> {
        Ok(Some(self.update_seq.load(AtomicOrdering::Acquire).to_string()))
    }
}
