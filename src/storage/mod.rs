pub mod couch;
pub mod memory;

pub use couch::CouchDocumentStore;
pub use memory::MemoryDocumentStore;

use crate::core::{BY_TYPE_ID_VIEW, Document, Result, Revision};
use async_trait::async_trait;
use serde_json::{Value, json};

/// Range read against a secondary-index view.
///
/// Keys are inclusive on both ends in iteration order: for a descending read
/// `start_key` is the upper bound.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewQuery {
    pub design: String,
    pub view: String,
    pub start_key: Option<Value>,
    pub end_key: Option<Value>,
    pub descending: bool,
    pub skip: usize,
    pub limit: Option<usize>,
}

impl ViewQuery {
    /// Range over every `[doc_type, id]` key of one type, in id order.
    pub fn by_type_id(doc_type: &str, descending: bool) -> Self {
        let low = json!([doc_type, 0]);
        let high = json!([doc_type, {}]);
        let (start_key, end_key) = if descending { (high, low) } else { (low, high) };
        Self {
            design: "indexes".to_string(),
            view: BY_TYPE_ID_VIEW.to_string(),
            start_key: Some(start_key),
            end_key: Some(end_key),
            descending,
            skip: 0,
            limit: None,
        }
    }

    pub fn skip(mut self, skip: usize) -> Self {
        self.skip = skip;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Raw access to a revision-checked document store.
///
/// Implementations do no caching and no retrying: a stale or missing
/// revision on `save`/`delete` is reported as [`StoreError::Conflict`] and
/// left to the layers above.
///
/// [`StoreError::Conflict`]: crate::core::StoreError::Conflict
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetches a document by key, `None` when it does not exist.
    async fn get(&self, doc_id: &str) -> Result<Option<Document>>;

    /// Creates (no `_rev`) or updates (current `_rev`) a document and returns
    /// its key together with the new revision.
    async fn save(&self, doc: Document) -> Result<(String, Revision)>;

    /// Deletes a document at the given revision.
    async fn delete(&self, doc_id: &str, rev: &Revision) -> Result<()>;

    /// All documents whose key starts with `prefix`, in key order.
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<Document>>;

    /// Number of documents whose key starts with `prefix`.
    async fn count_prefix(&self, prefix: &str) -> Result<usize> {
        Ok(self.scan_prefix(prefix).await?.len())
    }

    /// Documents emitted by a view range, in view order.
    async fn query_view(&self, query: &ViewQuery) -> Result<Vec<Document>>;

    /// Opaque database update sequence, if the backend exposes one.
    async fn update_seq(&self) -> Result<Option<String>>;
}
