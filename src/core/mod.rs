pub mod collation;
pub mod document;
pub mod error;

pub use collation::compare_json;
pub use document::{
    BY_TYPE_ID_VIEW, COUNTERS_DOC_ID, DESIGN_DOC_ID, DocId, Document, Revision,
    SCHEMA_VERSION_DOC_ID,
};
pub use error::{Result, StoreError};
