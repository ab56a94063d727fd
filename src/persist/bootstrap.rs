//! Idempotent store initialization: secondary index, counters, totals and
//! schema version. Safe to run on every startup.

use crate::config::{StoreConfig, TotalSpec};
use crate::core::{
    BY_TYPE_ID_VIEW, COUNTERS_DOC_ID, DESIGN_DOC_ID, DocId, Document, Result, SCHEMA_VERSION_DOC_ID,
};
use crate::persist::counters::total_key;
use crate::storage::DocumentStore;
use async_trait::async_trait;
use log::{info, warn};
use serde_json::{Value, json};

/// Map function of the `by_type_id` view.
pub const BY_TYPE_ID_MAP: &str = "function(doc) { if (doc.type && doc.id !== undefined && doc.id !== null) { emit([doc.type, doc.id], null); } }";

/// Collaborator told about schema version changes (e.g. to take a backup).
///
/// Called fire-and-forget: an error is logged and never fails bootstrap.
#[async_trait]
pub trait BackupNotifier: Send + Sync {
    async fn schema_changed(&self, client: &dyn DocumentStore, version: &str) -> Result<()>;
}

/// Notifier that does nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopBackupNotifier;

#[async_trait]
impl BackupNotifier for NoopBackupNotifier {
    async fn schema_changed(&self, _client: &dyn DocumentStore, _version: &str) -> Result<()> {
        Ok(())
    }
}

/// What a bootstrap run changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootstrapReport {
    pub view_written: bool,
    pub counters_added: Vec<String>,
    pub totals_seeded: Vec<(String, i64)>,
    pub schema_version_changed: bool,
}

impl BootstrapReport {
    pub fn is_noop(&self) -> bool {
        !self.view_written
            && self.counters_added.is_empty()
            && self.totals_seeded.is_empty()
            && !self.schema_version_changed
    }
}

fn views_value() -> Value {
    json!({ BY_TYPE_ID_VIEW: { "map": BY_TYPE_ID_MAP } })
}

/// Creates the index design document, or replaces its views when the
/// stored map function differs. Returns whether anything was written.
pub async fn ensure_views(client: &dyn DocumentStore) -> Result<bool> {
    let existing = client.get(DESIGN_DOC_ID).await?;
    let mut doc = match existing {
        None => Document::new(DESIGN_DOC_ID),
        Some(doc) => {
            let current = doc
                .get("views")
                .and_then(|views| views.get(BY_TYPE_ID_VIEW))
                .and_then(|view| view.get("map"))
                .and_then(Value::as_str);
            if current == Some(BY_TYPE_ID_MAP) {
                return Ok(false);
            }
            doc
        }
    };
    doc.set("views", views_value());
    client.save(doc).await?;
    info!("installed view {}/_view/{}", DESIGN_DOC_ID, BY_TYPE_ID_VIEW);
    Ok(true)
}

/// Creates the counters document with every key at zero, or adds missing
/// keys at zero. Existing values are never touched. Returns the added keys.
pub async fn ensure_counters(client: &dyn DocumentStore, counter_keys: &[String]) -> Result<Vec<String>> {
    let (mut doc, created) = match client.get(COUNTERS_DOC_ID).await? {
        Some(doc) => (doc, false),
        None => (Document::new(COUNTERS_DOC_ID).with_field("type", "counters"), true),
    };

    let mut added = Vec::new();
    for key in counter_keys {
        if doc.get(key).is_none() {
            doc.set(key.as_str(), 0);
            added.push(key.clone());
        }
    }
    if created || !added.is_empty() {
        client.save(doc).await?;
    }
    Ok(added)
}

/// Seeds each absent `"{key}_total"` with the current document count of
/// its type. Totals already present are left alone.
pub async fn ensure_totals(client: &dyn DocumentStore, totals: &[TotalSpec]) -> Result<Vec<(String, i64)>> {
    let mut doc = match client.get(COUNTERS_DOC_ID).await? {
        Some(doc) => doc,
        None => Document::new(COUNTERS_DOC_ID).with_field("type", "counters"),
    };

    let mut seeded = Vec::new();
    for spec in totals {
        if spec.doc_type.is_empty() || spec.counter_key.is_empty() {
            continue;
        }
        let field = total_key(&spec.counter_key);
        if doc.get(&field).is_some() {
            continue;
        }
        let count = client.count_prefix(&DocId::type_prefix(&spec.doc_type)).await?;
        let count = i64::try_from(count).unwrap_or(i64::MAX);
        doc.set(field.as_str(), count);
        seeded.push((field, count));
    }
    if !seeded.is_empty() {
        client.save(doc).await?;
    }
    Ok(seeded)
}

/// Records `version` in the schema-version document. When a stored version
/// differs it is updated and the notifier is told. Returns whether the
/// version changed.
pub async fn ensure_schema_version(
    client: &dyn DocumentStore,
    version: &str,
    notifier: &dyn BackupNotifier,
) -> Result<bool> {
    let updated_at = chrono::Utc::now().to_rfc3339();
    let Some(mut doc) = client.get(SCHEMA_VERSION_DOC_ID).await? else {
        let doc = Document::new(SCHEMA_VERSION_DOC_ID)
            .with_field("type", "schema_version")
            .with_field("version", version)
            .with_field("updated_at", updated_at);
        client.save(doc).await?;
        return Ok(false);
    };

    if doc.get("version").and_then(Value::as_str) == Some(version) {
        return Ok(false);
    }

    let previous = doc.get("version").cloned().unwrap_or(Value::Null);
    doc.set("version", version);
    doc.set("updated_at", updated_at);
    client.save(doc).await?;
    info!("schema version changed from {} to {}", previous, version);

    if let Err(err) = notifier.schema_changed(client, version).await {
        warn!("backup notifier failed for schema version {}: {}", version, err);
    }
    Ok(true)
}

/// Runs every step in order: views, counters, totals, schema version.
pub async fn bootstrap(
    client: &dyn DocumentStore,
    config: &StoreConfig,
    notifier: &dyn BackupNotifier,
) -> Result<BootstrapReport> {
    let view_written = ensure_views(client).await?;
    let counters_added = ensure_counters(client, &config.counter_keys).await?;
    let totals_seeded = ensure_totals(client, &config.totals).await?;
    let schema_version_changed = ensure_schema_version(client, &config.schema_version, notifier).await?;

    Ok(BootstrapReport {
        view_written,
        counters_added,
        totals_seeded,
        schema_version_changed,
    })
}
