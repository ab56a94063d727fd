//! Object-document mapping over a [`DocumentStore`](crate::storage::DocumentStore):
//! typed entities, identity cache, id counters, queries and sessions.

pub mod bootstrap;
pub mod cache;
pub mod counters;
pub mod entity;
mod macros;
pub mod query;
pub mod session;
pub mod store;

pub use bootstrap::{
    BY_TYPE_ID_MAP, BackupNotifier, BootstrapReport, NoopBackupNotifier, bootstrap,
    ensure_counters, ensure_schema_version, ensure_totals, ensure_views,
};
pub use cache::IdentityCache;
pub use counters::{CounterService, total_key};
pub use entity::{
    Entity, EntityRef, EntityState, FieldDef, FieldKind, FieldValue, from_doc, read_field, to_doc,
};
pub use query::{Pagination, Query, page_count};
pub use session::Session;
pub use store::Store;
