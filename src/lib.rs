pub mod app;
pub mod domain;
pub mod error;
pub mod infra;
pub mod storage;

// Convenience re-exports (keeps call-sites clean)
pub use app::Entities;
pub use domain::entity::{
    Entity, EntityDefinition, FieldType, Hooks, IndexSpec, IndexSyncReport, StoreOptions, INDEX_PREFIX,
};
pub use domain::query::{EntityQuery, Grab, GrabOptions, RowFailure, MAX_GRAB_LIMIT};
pub use domain::value::{Value, Values};
pub use error::{EntityError, Result};
pub use infra::config::StoreConfig;
pub use storage::{DocumentStore, MemoryStore, Order, PgDocumentStore, StoreError};
