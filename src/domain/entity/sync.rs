//! Reconciles declared indexes with the live index catalog.

use crate::domain::entity::index::INDEX_PREFIX;
use crate::storage::{DocumentStore, IndexDefinition, StoreError};
use serde::Serialize;
use std::collections::HashSet;

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IndexSyncReport {
    pub created: Vec<String>,
    pub dropped: Vec<String>,
    pub kept: Vec<String>,
}

impl IndexSyncReport {
    /// True when the pass issued no create or drop.
    pub fn is_noop(&self) -> bool {
        self.created.is_empty() && self.dropped.is_empty()
    }
}

/// Indexes carrying the reserved prefix belong to this layer.
pub fn is_managed(index_name: &str) -> bool {
    index_name.starts_with(INDEX_PREFIX)
}

pub struct IndexSynchronizer<'a> {
    store: &'a dyn DocumentStore,
    collection: &'a str,
}

impl<'a> IndexSynchronizer<'a> {
    pub fn new(store: &'a dyn DocumentStore, collection: &'a str) -> Self {
        Self { store, collection }
    }

    /// Current index names. A missing collection has no indexes yet and is
    /// created on the spot.
    pub async fn existing(&self) -> Result<Vec<String>, StoreError> {
        match self.store.list_indexes(self.collection).await {
            Ok(names) => Ok(names),
            Err(StoreError::CollectionNotFound(_)) => {
                tracing::debug!(collection = self.collection, "collection missing, creating it");
                self.store.ensure_collection(self.collection).await?;
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }

    /// Drops stale managed indexes, then creates missing declared ones.
    /// Foreign indexes are never touched. Stops at the first failure.
    pub async fn sync(&self, declared: &[IndexDefinition]) -> Result<IndexSyncReport, StoreError> {
        let existing = self.existing().await?;
        let existing_set: HashSet<&str> = existing.iter().map(String::as_str).collect();
        let declared_set: HashSet<&str> = declared.iter().map(|d| d.name.as_str()).collect();

        let mut report = IndexSyncReport::default();

        for name in existing.iter().filter(|n| is_managed(n)) {
            if declared_set.contains(name.as_str()) {
                report.kept.push(name.clone());
                continue;
            }
            self.store.drop_index(self.collection, name).await?;
            tracing::info!(collection = self.collection, index = %name, "dropped stale index");
            report.dropped.push(name.clone());
        }

        for index in declared {
            if existing_set.contains(index.name.as_str()) {
                continue;
            }
            self.store.create_index(self.collection, index).await?;
            tracing::info!(collection = self.collection, index = %index.name, "created index");
            report.created.push(index.name.clone());
        }

        Ok(report)
    }

    /// Drops every managed index of the collection.
    pub async fn drop_managed(&self) -> Result<Vec<String>, StoreError> {
        let existing = match self.store.list_indexes(self.collection).await {
            Ok(names) => names,
            Err(StoreError::CollectionNotFound(_)) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut dropped = Vec::new();
        for name in existing.into_iter().filter(|n| is_managed(n)) {
            self.store.drop_index(self.collection, &name).await?;
            dropped.push(name);
        }
        Ok(dropped)
    }
}
