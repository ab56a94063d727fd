use crate::config::RetryPolicy;
use crate::core::{COUNTERS_DOC_ID, Document, Result, StoreError};
use crate::storage::DocumentStore;
use log::{debug, warn};
use serde_json::Value;
use std::sync::Arc;

/// Outcome of one compare-and-swap step over the counters document.
enum Step<R> {
    /// Persist the modified document, then return the value.
    Write(R),
    /// Nothing to change; return the value without writing.
    Skip(R),
}

/// Per-type id allocation and aggregate totals kept in the singleton
/// `counters` document.
///
/// Every mutation is a read-modify-write guarded by the document revision.
/// Conflicts are retried with exponential backoff up to
/// [`RetryPolicy::max_attempts`].
#[derive(Clone)]
pub struct CounterService {
    client: Arc<dyn DocumentStore>,
    retry: RetryPolicy,
}

pub fn total_key(counter_key: &str) -> String {
    format!("{}_total", counter_key)
}

impl CounterService {
    pub fn new(client: Arc<dyn DocumentStore>, retry: RetryPolicy) -> Self {
        Self { client, retry }
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    async fn load(&self) -> Result<Document> {
        self.client.get(COUNTERS_DOC_ID).await?.ok_or_else(|| {
            StoreError::Misconfigured(format!(
                "'{}' document is missing; run bootstrap first",
                COUNTERS_DOC_ID
            ))
        })
    }

    async fn update<R>(
        &self,
        key: &str,
        mut apply: impl FnMut(&mut Document) -> Result<Step<R>>,
    ) -> Result<R> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1u32;
        loop {
            let mut doc = self.load().await?;
            let value = match apply(&mut doc)? {
                Step::Skip(value) => return Ok(value),
                Step::Write(value) => value,
            };

            match self.client.save(doc).await {
                Ok(_) => return Ok(value),
                Err(err) if err.is_conflict() => {
                    if attempt >= max_attempts {
                        return Err(StoreError::RetryExhausted {
                            key: key.to_string(),
                            attempts: attempt,
                        });
                    }
                    let backoff = self.retry.backoff(attempt);
                    warn!(
                        "counter '{}' retry on conflict (attempt {} of {}): {} (backoff={}ms)",
                        key,
                        attempt,
                        max_attempts,
                        err,
                        backoff.as_millis()
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Allocates the next id for `counter_key`. A key the counters document
    /// does not hold yet starts at zero.
    pub async fn next_id(&self, counter_key: &str) -> Result<i64> {
        let id = self
            .update(counter_key, |doc| {
                let next = counter_value(doc, counter_key)?.unwrap_or(0) + 1;
                doc.set(counter_key, next);
                Ok(Step::Write(next))
            })
            .await?;
        debug!("allocated {} id {}", counter_key, id);
        Ok(id)
    }

    /// Raises the counter to at least `value`; never lowers it.
    pub async fn ensure_counter_at_least(&self, counter_key: &str, value: i64) -> Result<()> {
        self.update(counter_key, |doc| {
            let current = counter_value(doc, counter_key)?;
            if current.is_some_and(|current| current >= value) {
                return Ok(Step::Skip(()));
            }
            doc.set(counter_key, current.unwrap_or(0).max(value));
            Ok(Step::Write(()))
        })
        .await
    }

    /// Adds `delta` to `"{key}_total"`, floored at zero.
    ///
    /// Returns the new total, or `None` when the total is not maintained for
    /// this key (the field is absent), in which case nothing is written.
    pub async fn update_total(&self, counter_key: &str, delta: i64) -> Result<Option<i64>> {
        let field = total_key(counter_key);
        self.update(&field, |doc| {
            let Some(current) = counter_value(doc, &field)? else {
                return Ok(Step::Skip(None));
            };
            let next = current.saturating_add(delta).max(0);
            if next == current {
                return Ok(Step::Skip(Some(current)));
            }
            doc.set(field.as_str(), next);
            Ok(Step::Write(Some(next)))
        })
        .await
    }

    /// Current `"{key}_total"`, `None` when absent or not an integer.
    pub async fn total_count(&self, counter_key: &str) -> Result<Option<i64>> {
        Ok(self.load().await?.get_i64(&total_key(counter_key)))
    }

    /// Last id handed out for `counter_key` (0 when none yet).
    pub async fn current(&self, counter_key: &str) -> Result<i64> {
        Ok(counter_value(&self.load().await?, counter_key)?.unwrap_or(0))
    }
}

fn counter_value(doc: &Document, key: &str) -> Result<Option<i64>> {
    match doc.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value.as_i64().map(Some).ok_or_else(|| {
            StoreError::Misconfigured(format!(
                "counter '{}' holds a non-integer value: {}",
                key, value
            ))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Revision;
    use crate::storage::{MemoryDocumentStore, ViewQuery};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails the first `remaining` saves with a conflict.
    struct ConflictingStore {
        inner: MemoryDocumentStore,
        remaining: AtomicU32,
    }

    #[async_trait]
    impl DocumentStore for ConflictingStore {
        async fn get(&self, doc_id: &str) -> Result<Option<Document>> {
            self.inner.get(doc_id).await
        }

        async fn save(&self, doc: Document) -> Result<(String, Revision)> {
            let injected = self
                .remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if injected {
                return Err(StoreError::Conflict(doc.id));
            }
            self.inner.save(doc).await
        }

        async fn delete(&self, doc_id: &str, rev: &Revision) -> Result<()> {
            self.inner.delete(doc_id, rev).await
        }

        async fn scan_prefix(&self, prefix: &str) -> Result<Vec<Document>> {
            self.inner.scan_prefix(prefix).await
        }

        async fn query_view(&self, query: &ViewQuery) -> Result<Vec<Document>> {
            self.inner.query_view(query).await
        }

        async fn update_seq(&self) -> Result<Option<String>> {
            self.inner.update_seq().await
        }
    }

    fn fast_retry(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
        }
    }

    async fn seeded(conflicts: u32) -> Arc<ConflictingStore> {
        let inner = MemoryDocumentStore::new();
        inner
            .save(
                Document::new(COUNTERS_DOC_ID)
                    .with_field("type", "counters")
                    .with_field("cars", 10)
                    .with_field("cars_total", 3),
            )
            .await
            .unwrap();
        Arc::new(ConflictingStore {
            inner,
            remaining: AtomicU32::new(conflicts),
        })
    }

    #[tokio::test]
    async fn test_next_id_increments() {
        let counters = CounterService::new(seeded(0).await, fast_retry(4));
        assert_eq!(counters.next_id("cars").await.unwrap(), 11);
        assert_eq!(counters.next_id("cars").await.unwrap(), 12);
        assert_eq!(counters.current("cars").await.unwrap(), 12);
    }

    #[tokio::test]
    async fn test_next_id_retries_through_conflicts() {
        let counters = CounterService::new(seeded(3).await, fast_retry(4));
        assert_eq!(counters.next_id("cars").await.unwrap(), 11);
    }

    #[tokio::test]
    async fn test_retry_exhausted() {
        let counters = CounterService::new(seeded(10).await, fast_retry(3));
        let err = counters.next_id("cars").await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::RetryExhausted { ref key, attempts: 3 } if key == "cars"
        ));
    }

    #[tokio::test]
    async fn test_unknown_key_starts_at_one() {
        let counters = CounterService::new(seeded(0).await, fast_retry(4));
        assert_eq!(counters.next_id("loads").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_ensure_counter_at_least_never_lowers() {
        let counters = CounterService::new(seeded(0).await, fast_retry(4));
        counters.ensure_counter_at_least("cars", 5).await.unwrap();
        assert_eq!(counters.current("cars").await.unwrap(), 10);

        counters.ensure_counter_at_least("cars", 50).await.unwrap();
        assert_eq!(counters.next_id("cars").await.unwrap(), 51);
    }

    #[tokio::test]
    async fn test_update_total_floors_at_zero() {
        let counters = CounterService::new(seeded(0).await, fast_retry(4));
        assert_eq!(counters.update_total("cars", 1).await.unwrap(), Some(4));
        assert_eq!(counters.update_total("cars", -10).await.unwrap(), Some(0));
        assert_eq!(counters.total_count("cars").await.unwrap(), Some(0));
    }

    #[tokio::test]
    async fn test_update_total_absent_is_noop() {
        let store = seeded(0).await;
        let counters = CounterService::new(store.clone(), fast_retry(4));
        let before = store.get(COUNTERS_DOC_ID).await.unwrap().unwrap().rev;

        assert_eq!(counters.update_total("loads", 1).await.unwrap(), None);
        assert_eq!(counters.total_count("loads").await.unwrap(), None);
        let after = store.get(COUNTERS_DOC_ID).await.unwrap().unwrap().rev;
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_missing_counters_document_is_misconfigured() {
        let counters = CounterService::new(Arc::new(MemoryDocumentStore::new()), fast_retry(4));
        let err = counters.next_id("cars").await.unwrap_err();
        assert!(matches!(err, StoreError::Misconfigured(_)));
    }
}
