//! Document store abstraction and its backends.
//!
//! A collection holds one document per entity record:
//! `{ "_id": <oid>, <index fields…>, "__deletedAt": <ts>?, "_data": "<payload>" }`.
//! Backends know nothing about entity definitions; they receive already cast
//! values and already named indexes.

use async_trait::async_trait;
use serde_json::Value as JsonValue;

pub mod error;
pub mod filter;
pub mod memory;
pub mod postgres;

pub use error::StoreError;
pub use filter::{Filter, FindRequest, Order, Predicate, SortKey, TextField, TextQuery, TextSearch};
pub use memory::MemoryStore;
pub use postgres::PgDocumentStore;

pub const ID_FIELD: &str = "_id";
pub const DATA_FIELD: &str = "_data";
pub const DELETED_AT_FIELD: &str = "__deletedAt";

/// Name under which backends report their built-in identifier index.
pub const ID_INDEX: &str = "_id_";

pub type Document = serde_json::Map<String, JsonValue>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexKind {
    Field {
        field: String,
        unique: bool,
        sparse: bool,
    },
    Text {
        fields: Vec<TextField>,
    },
}

/// An index as the store creates it. The name carries its semantics, so the
/// catalog only ever needs to be compared by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDefinition {
    pub name: String,
    pub kind: IndexKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveMode {
    /// Fails with a duplicate key on [`ID_INDEX`] if the id exists.
    Insert,
    Upsert,
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Short backend label for logs.
    fn backend(&self) -> &'static str;

    async fn ensure_collection(&self, collection: &str) -> Result<(), StoreError>;

    /// Names of every index on the collection, managed or not.
    ///
    /// Fails with [`StoreError::CollectionNotFound`] when the collection does
    /// not exist yet.
    async fn list_indexes(&self, collection: &str) -> Result<Vec<String>, StoreError>;

    async fn create_index(&self, collection: &str, index: &IndexDefinition) -> Result<(), StoreError>;

    async fn drop_index(&self, collection: &str, name: &str) -> Result<(), StoreError>;

    async fn save(
        &self,
        collection: &str,
        id: i64,
        document: Document,
        mode: SaveMode,
    ) -> Result<(), StoreError>;

    /// Removes a document. Returns whether it existed.
    async fn remove(&self, collection: &str, id: i64) -> Result<bool, StoreError>;

    async fn find(&self, collection: &str, request: &FindRequest) -> Result<Vec<Document>, StoreError>;

    async fn count(
        &self,
        collection: &str,
        filter: &Filter,
        text: Option<&TextQuery>,
    ) -> Result<u64, StoreError>;

    /// Atomically increments and returns the named counter (first value is 1).
    async fn next_sequence(&self, name: &str) -> Result<i64, StoreError>;
}
