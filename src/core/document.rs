use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Key of the singleton document holding per-type id counters and totals.
pub const COUNTERS_DOC_ID: &str = "counters";
/// Key of the singleton document recording the stored schema version.
pub const SCHEMA_VERSION_DOC_ID: &str = "schema_version";
/// Design document hosting the secondary index.
pub const DESIGN_DOC_ID: &str = "_design/indexes";
/// Name of the `[type, id] -> null` view inside [`DESIGN_DOC_ID`].
pub const BY_TYPE_ID_VIEW: &str = "by_type_id";

/// Opaque revision token returned by every successful write.
///
/// CouchDB-style revisions are `"<generation>-<hash>"`; nothing outside the
/// storage layer should rely on that shape beyond equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Revision(String);

impl Revision {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Numeric generation prefix, when the token carries one.
    pub fn generation(&self) -> Option<u64> {
        self.0.split_once('-').and_then(|(generation, _)| generation.parse().ok())
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity key of an entity document: `"{type}:{id}"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocId {
    pub doc_type: String,
    pub id: i64,
}

impl DocId {
    pub fn new(doc_type: impl Into<String>, id: i64) -> Self {
        Self {
            doc_type: doc_type.into(),
            id,
        }
    }

    /// Parses `"{type}:{id}"`. The id is taken after the last colon.
    pub fn parse(raw: &str) -> Option<Self> {
        let (doc_type, id) = raw.rsplit_once(':')?;
        if doc_type.is_empty() {
            return None;
        }
        Some(Self::new(doc_type, id.parse().ok()?))
    }

    /// Key prefix shared by every document of `doc_type`.
    pub fn type_prefix(doc_type: &str) -> String {
        format!("{}:", doc_type)
    }
}

impl fmt::Display for DocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.doc_type, self.id)
    }
}

/// A raw stored document.
///
/// Serializes to the CouchDB wire shape: `_id`, optional `_rev`, and the
/// remaining fields flattened alongside them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_rev", default, skip_serializing_if = "Option::is_none")]
    pub rev: Option<Revision>,
    #[serde(flatten)]
    pub body: Map<String, Value>,
}

impl Document {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            rev: None,
            body: Map::new(),
        }
    }

    pub fn with_rev(mut self, rev: Option<Revision>) -> Self {
        self.rev = rev;
        self
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.body.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.body.get(name)
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.body.insert(name.into(), value.into());
    }

    /// Integer field lookup; missing, null and non-integer values read as `None`.
    pub fn get_i64(&self, name: &str) -> Option<i64> {
        self.body.get(name).and_then(Value::as_i64)
    }

    /// The `type` discriminator.
    pub fn doc_type(&self) -> Option<&str> {
        self.body.get("type").and_then(Value::as_str)
    }

    /// The numeric surrogate id stored in the `id` field.
    pub fn numeric_id(&self) -> Option<i64> {
        self.get_i64("id")
    }
}
