// ============================================================================
// rollstock Library
// ============================================================================

pub mod core;
pub mod config;
pub mod storage;
pub mod persist;
pub mod facade;
pub mod models;

// Used by `entity!` expansions in downstream crates.
#[doc(hidden)]
pub use paste;
#[doc(hidden)]
pub use serde_json;

// Re-export main types for convenience
pub use facade::Database;
pub use crate::core::{DocId, Document, Result, Revision, StoreError};
pub use config::{RetryPolicy, StoreConfig, TotalSpec};
pub use storage::{CouchDocumentStore, DocumentStore, MemoryDocumentStore, ViewQuery};

// Re-export persistence API
pub use persist::{
    BackupNotifier, BootstrapReport, CounterService, Entity, EntityRef, FieldDef, FieldKind,
    IdentityCache, NoopBackupNotifier, Pagination, Query, Session, Store,
};
