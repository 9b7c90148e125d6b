//! Shared helpers for integration tests.

#![allow(dead_code, unused_macros)]

use async_trait::async_trait;
use entity_store::storage::{
    Document, DocumentStore, Filter, FindRequest, IndexDefinition, MemoryStore, SaveMode, StoreError, TextQuery,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// In-memory store that counts calls and can be told to fail index creation.
#[derive(Default)]
pub struct InstrumentedStore {
    pub inner: MemoryStore,
    creates: AtomicUsize,
    drops: AtomicUsize,
    finds: AtomicUsize,
    counts: AtomicUsize,
    saves: AtomicUsize,
    fail_create: Mutex<Option<String>>,
}

impl InstrumentedStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn creates(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn drops(&self) -> usize {
        self.drops.load(Ordering::SeqCst)
    }

    /// Reads that reached the store (`find` + `count`).
    pub fn reads(&self) -> usize {
        self.finds.load(Ordering::SeqCst) + self.counts.load(Ordering::SeqCst)
    }

    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn fail_create_of(&self, index_name: &str) {
        *self.fail_create.lock().unwrap() = Some(index_name.to_string());
    }
}

#[async_trait]
impl DocumentStore for InstrumentedStore {
    fn backend(&self) -> &'static str {
        "instrumented"
    }

    async fn ensure_collection(&self, collection: &str) -> Result<(), StoreError> {
        self.inner.ensure_collection(collection).await
    }

    async fn list_indexes(&self, collection: &str) -> Result<Vec<String>, StoreError> {
        self.inner.list_indexes(collection).await
    }

    async fn create_index(&self, collection: &str, index: &IndexDefinition) -> Result<(), StoreError> {
        let fail = self.fail_create.lock().unwrap().clone();
        if fail.as_deref() == Some(index.name.as_str()) {
            return Err(StoreError::Backend(format!("injected failure creating '{}'", index.name)));
        }
        self.creates.fetch_add(1, Ordering::SeqCst);
        self.inner.create_index(collection, index).await
    }

    async fn drop_index(&self, collection: &str, name: &str) -> Result<(), StoreError> {
        self.drops.fetch_add(1, Ordering::SeqCst);
        self.inner.drop_index(collection, name).await
    }

    async fn save(&self, collection: &str, id: i64, document: Document, mode: SaveMode) -> Result<(), StoreError> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        self.inner.save(collection, id, document, mode).await
    }

    async fn remove(&self, collection: &str, id: i64) -> Result<bool, StoreError> {
        self.inner.remove(collection, id).await
    }

    async fn find(&self, collection: &str, request: &FindRequest) -> Result<Vec<Document>, StoreError> {
        self.finds.fetch_add(1, Ordering::SeqCst);
        self.inner.find(collection, request).await
    }

    async fn count(&self, collection: &str, filter: &Filter, text: Option<&TextQuery>) -> Result<u64, StoreError> {
        self.counts.fetch_add(1, Ordering::SeqCst);
        self.inner.count(collection, filter, text).await
    }

    async fn next_sequence(&self, name: &str) -> Result<i64, StoreError> {
        self.inner.next_sequence(name).await
    }
}

/// Shorthand for building creation values.
macro_rules! values {
    ($($key:expr => $value:expr),* $(,)?) => {{
        #[allow(unused_mut)]
        let mut map = entity_store::Values::new();
        $( map.insert($key.to_string(), entity_store::Value::from($value)); )*
        map
    }};
}
