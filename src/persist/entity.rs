use crate::core::{DocId, Document, Result, Revision, StoreError};
use serde_json::{Map, Value};
use std::any::Any;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Primitive type of a declared entity field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Integer,
    Float,
    Boolean,
    Text,
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Boolean => "boolean",
            Self::Text => "text",
        };
        write!(f, "{label}")
    }
}

/// One declared field of an entity schema. Every field is optional.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDef {
    pub name: &'static str,
    pub kind: FieldKind,
}

/// Rust types that can back an entity field.
pub trait FieldValue: Clone + PartialEq + fmt::Debug + Send + Sync + 'static {
    const KIND: FieldKind;

    fn to_json(&self) -> Value;
    fn from_json(value: &Value) -> Option<Self>;
}

impl FieldValue for i64 {
    const KIND: FieldKind = FieldKind::Integer;

    fn to_json(&self) -> Value {
        Value::from(*self)
    }

    fn from_json(value: &Value) -> Option<Self> {
        value.as_i64()
    }
}

impl FieldValue for f64 {
    const KIND: FieldKind = FieldKind::Float;

    fn to_json(&self) -> Value {
        Value::from(*self)
    }

    fn from_json(value: &Value) -> Option<Self> {
        value.as_f64()
    }
}

impl FieldValue for bool {
    const KIND: FieldKind = FieldKind::Boolean;

    fn to_json(&self) -> Value {
        Value::Bool(*self)
    }

    fn from_json(value: &Value) -> Option<Self> {
        value.as_bool()
    }
}

impl FieldValue for String {
    const KIND: FieldKind = FieldKind::Text;

    fn to_json(&self) -> Value {
        Value::String(self.clone())
    }

    fn from_json(value: &Value) -> Option<Self> {
        value.as_str().map(str::to_string)
    }
}

/// Reads one declared field out of a stored document body.
///
/// Missing and `null` values read as `None`; a value of the wrong primitive
/// type is a serialization error.
pub fn read_field<T: FieldValue>(
    doc_type: &str,
    fields: &Map<String, Value>,
    name: &str,
) -> Result<Option<T>> {
    match fields.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => T::from_json(value).map(Some).ok_or_else(|| {
            StoreError::Serialization(format!(
                "field '{}' on '{}' expected {}, found {}",
                name,
                doc_type,
                T::KIND,
                value
            ))
        }),
    }
}

/// Persistence bookkeeping carried by every entity instance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityState {
    /// Numeric surrogate id; `None` until first save.
    pub id: Option<i64>,
    /// Last revision seen for this record; `None` until persisted.
    pub revision: Option<Revision>,
    /// Set by setters and `Session::add`, cleared by a successful save.
    pub dirty: bool,
    /// The record was created but its `"{key}_total"` increment has not
    /// landed yet. Cleared once the total update succeeds.
    pub total_pending: bool,
}

impl EntityState {
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn is_persisted(&self) -> bool {
        self.revision.is_some()
    }
}

/// A typed document kind: schema, identity and (de)serialization.
///
/// Usually implemented through the [`entity!`](crate::entity) macro.
pub trait Entity: fmt::Debug + Send + Sync + Sized + 'static {
    /// Value of the `type` discriminator.
    const DOC_TYPE: &'static str;
    /// Key of this type's id counter (and `"{key}_total"`) in the counters document.
    const COUNTER_KEY: &'static str;

    fn schema() -> &'static [FieldDef];

    fn state(&self) -> &EntityState;
    fn state_mut(&mut self) -> &mut EntityState;

    /// Declared fields as JSON, `id` included, unset fields as `null`.
    fn to_fields(&self) -> Map<String, Value>;

    /// Builds an instance from declared fields; bookkeeping starts empty.
    fn from_fields(fields: &Map<String, Value>) -> Result<Self>;

    /// Current value of a declared field (or `id`) as JSON.
    fn field(&self, name: &str) -> Option<Value>;

    /// Runs before every save.
    fn prepare_save(&mut self) {}

    fn id(&self) -> Option<i64> {
        self.state().id
    }

    fn revision(&self) -> Option<&Revision> {
        self.state().revision.as_ref()
    }

    fn is_dirty(&self) -> bool {
        self.state().dirty
    }

    fn mark_dirty(&mut self) {
        self.state_mut().mark_dirty();
    }

    fn doc_id(&self) -> Option<DocId> {
        self.id().map(|id| DocId::new(Self::DOC_TYPE, id))
    }

    fn has_field(name: &str) -> bool {
        name == "id" || Self::schema().iter().any(|field| field.name == name)
    }
}

/// Serializes an entity to its stored document shape:
/// `{_id: "<type>:<id>", _rev?, type, id, ...declared fields}`.
pub fn to_doc<E: Entity>(entity: &E) -> Result<Document> {
    let doc_id = entity.doc_id().ok_or_else(|| {
        StoreError::Serialization(format!("cannot serialize '{}' without an id", E::DOC_TYPE))
    })?;

    let mut doc = Document::new(doc_id.to_string()).with_rev(entity.revision().cloned());
    doc.set("type", E::DOC_TYPE);
    for (name, value) in entity.to_fields() {
        doc.set(name, value);
    }
    Ok(doc)
}

/// Hydrates an entity from a stored document, marked clean.
pub fn from_doc<E: Entity>(doc: &Document) -> Result<E> {
    let mut entity = E::from_fields(&doc.body)?;
    let state = entity.state_mut();
    state.id = doc
        .numeric_id()
        .or_else(|| DocId::parse(&doc.id).map(|parsed| parsed.id));
    state.revision = doc.rev.clone();
    state.dirty = false;
    Ok(entity)
}

/// Shared handle to one live entity instance.
///
/// The identity cache hands out clones of the same handle for the same
/// record, so `ptr_eq` holds between repeated lookups within a scope.
pub struct EntityRef<E>(Arc<RwLock<E>>);

impl<E> Clone for EntityRef<E> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<E: Entity> fmt::Debug for EntityRef<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("EntityRef").field(&*self.read()).finish()
    }
}

impl<E: Entity> From<E> for EntityRef<E> {
    fn from(entity: E) -> Self {
        Self::new(entity)
    }
}

impl<E: Entity> EntityRef<E> {
    pub fn new(entity: E) -> Self {
        Self(Arc::new(RwLock::new(entity)))
    }

    pub(crate) fn from_arc(inner: Arc<RwLock<E>>) -> Self {
        Self(inner)
    }

    /// Read access. A poisoned lock still yields the data.
    pub fn read(&self) -> RwLockReadGuard<'_, E> {
        self.0.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Write access. Mutate through the generated setters so dirty
    /// tracking sees the change.
    pub fn write(&self) -> RwLockWriteGuard<'_, E> {
        self.0.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn id(&self) -> Option<i64> {
        self.read().id()
    }

    pub fn is_dirty(&self) -> bool {
        self.read().is_dirty()
    }

    /// Whether both handles point at the same live instance.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn tracked(&self) -> Arc<dyn TrackedEntity> {
        self.0.clone()
    }
}

/// Type-erased view of a live entity, used by the identity cache and the
/// session to save entities of any type.
pub(crate) trait TrackedEntity: Send + Sync {
    fn doc_type(&self) -> &'static str;
    fn counter_key(&self) -> &'static str;
    fn entity_id(&self) -> Option<i64>;
    fn revision(&self) -> Option<Revision>;
    fn is_dirty(&self) -> bool;
    fn total_pending(&self) -> bool;
    fn set_total_pending(&self, pending: bool);
    fn prepare_save(&self);
    fn assign_id(&self, id: i64);
    fn to_document(&self) -> Result<Document>;
    fn mark_saved(&self, id: i64, revision: Revision);
    fn mark_clean(&self);
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<E: Entity> TrackedEntity for RwLock<E> {
    fn doc_type(&self) -> &'static str {
        E::DOC_TYPE
    }

    fn counter_key(&self) -> &'static str {
        E::COUNTER_KEY
    }

    fn entity_id(&self) -> Option<i64> {
        self.read().unwrap_or_else(PoisonError::into_inner).id()
    }

    fn revision(&self) -> Option<Revision> {
        self.read()
            .unwrap_or_else(PoisonError::into_inner)
            .revision()
            .cloned()
    }

    fn is_dirty(&self) -> bool {
        self.read().unwrap_or_else(PoisonError::into_inner).is_dirty()
    }

    fn total_pending(&self) -> bool {
        self.read().unwrap_or_else(PoisonError::into_inner).state().total_pending
    }

    fn set_total_pending(&self, pending: bool) {
        self.write().unwrap_or_else(PoisonError::into_inner).state_mut().total_pending = pending;
    }

    fn prepare_save(&self) {
        self.write().unwrap_or_else(PoisonError::into_inner).prepare_save();
    }

    fn assign_id(&self, id: i64) {
        self.write().unwrap_or_else(PoisonError::into_inner).state_mut().id = Some(id);
    }

    fn to_document(&self) -> Result<Document> {
        to_doc(&*self.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn mark_saved(&self, id: i64, revision: Revision) {
        let mut guard = self.write().unwrap_or_else(PoisonError::into_inner);
        let state = guard.state_mut();
        state.id = Some(id);
        state.revision = Some(revision);
        state.dirty = false;
    }

    fn mark_clean(&self) {
        self.write().unwrap_or_else(PoisonError::into_inner).state_mut().dirty = false;
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}
