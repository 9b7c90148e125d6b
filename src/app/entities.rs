//! Registry of entity definitions sharing one store connection.

use crate::domain::entity::{EntityDefinition, IndexSyncReport};
use crate::error::{EntityError, Result};
use crate::infra::config::{Backend, StoreConfig};
use crate::storage::{DocumentStore, MemoryStore, PgDocumentStore};
use futures::future::try_join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Owns the store and every registered definition.
///
/// Construction order is explicit: connect, `define`, declare indexes,
/// `register` (reconciles indexes), then use.
pub struct Entities {
    store: Arc<dyn DocumentStore>,
    definitions: RwLock<BTreeMap<String, Arc<EntityDefinition>>>,
}

impl Entities {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            definitions: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    /// Opens the backend selected by the URL scheme.
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        let store: Arc<dyn DocumentStore> = match config.backend()? {
            Backend::Memory => Arc::new(MemoryStore::new()),
            Backend::Postgres => Arc::new(
                PgDocumentStore::connect(&config.url, config.max_connections)
                    .await
                    .map_err(|e| EntityError::Configuration(format!("cannot connect to the database: {}", e)))?,
            ),
        };
        tracing::info!(backend = store.backend(), "store connected");
        Ok(Self::new(store))
    }

    pub fn store(&self) -> Arc<dyn DocumentStore> {
        Arc::clone(&self.store)
    }

    /// A fresh, unregistered definition bound to this registry's store.
    pub async fn define(&self, name: &str) -> Result<EntityDefinition> {
        if name.is_empty() {
            return Err(EntityError::Configuration("entity name cannot be empty".to_string()));
        }
        if self.definitions.read().await.contains_key(name) {
            return Err(EntityError::Configuration(format!("entity '{}' is already registered", name)));
        }
        Ok(EntityDefinition::bless(name, self.store()))
    }

    /// Reconciles the definition's indexes and publishes it.
    pub async fn register(&self, definition: EntityDefinition) -> Result<Arc<EntityDefinition>> {
        let name = definition.name().to_string();
        if self.definitions.read().await.contains_key(&name) {
            return Err(EntityError::Configuration(format!("entity '{}' is already registered", name)));
        }

        definition.initialize().await?;
        let definition = Arc::new(definition);

        let mut definitions = self.definitions.write().await;
        if definitions.contains_key(&name) {
            return Err(EntityError::Configuration(format!("entity '{}' is already registered", name)));
        }
        definitions.insert(name.clone(), Arc::clone(&definition));
        tracing::info!(entity = %name, "entity registered");
        Ok(definition)
    }

    pub async fn get(&self, name: &str) -> Option<Arc<EntityDefinition>> {
        self.definitions.read().await.get(name).cloned()
    }

    pub async fn names(&self) -> Vec<String> {
        self.definitions.read().await.keys().cloned().collect()
    }

    async fn all(&self) -> Vec<Arc<EntityDefinition>> {
        self.definitions.read().await.values().cloned().collect()
    }

    /// Drops and recreates the managed indexes of every entity.
    pub async fn rebuild_indexes(&self) -> Result<Vec<IndexSyncReport>> {
        let definitions = self.all().await;
        try_join_all(definitions.iter().map(|definition| async move {
            definition.drop_indexes().await?;
            definition.initialize().await
        }))
        .await
    }

    pub async fn drop_indexes(&self) -> Result<()> {
        let definitions = self.all().await;
        try_join_all(definitions.iter().map(|definition| definition.drop_indexes())).await?;
        Ok(())
    }

    /// Re-stores every record of every entity. Returns the records written.
    pub async fn reindex_all(&self) -> Result<usize> {
        let definitions = self.all().await;
        let written = try_join_all(definitions.iter().map(|definition| definition.reindex())).await?;
        Ok(written.into_iter().sum())
    }
}
