use crate::domain::entity::EntityDefinition;
use crate::domain::value::{Value, Values};
use crate::error::{EntityError, Result};
use crate::storage::{SaveMode, ID_INDEX};
use chrono::{DateTime, SubsecRound, Utc};
use std::fmt;
use std::sync::{Arc, Weak};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreOptions {
    /// Run `before_store` / `after_store`. Maintenance passes turn this off.
    pub run_hooks: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self { run_hooks: true }
    }
}

/// One logical record of an entity type.
#[derive(Clone)]
pub struct Entity {
    oid: Option<i64>,
    /// Whether the oid is known to the store. Only persisted instances upsert.
    persisted: bool,
    values: Values,
    deleted_at: Option<DateTime<Utc>>,
    definition: Weak<EntityDefinition>,
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entity = self.definition.upgrade().map(|d| d.name().to_string());
        f.debug_struct("Entity")
            .field("entity", &entity)
            .field("oid", &self.oid)
            .field("persisted", &self.persisted)
            .field("deleted_at", &self.deleted_at)
            .field("values", &self.values)
            .finish()
    }
}

impl Entity {
    /// An instance built with an oid refers to an existing record.
    pub(crate) fn new(definition: Weak<EntityDefinition>, oid: Option<i64>, deleted_at: Option<DateTime<Utc>>) -> Self {
        Self {
            oid,
            persisted: oid.is_some(),
            values: Values::new(),
            deleted_at,
            definition,
        }
    }

    /// Identifier, assigned by the first successful allocation.
    pub fn oid(&self) -> Option<i64> {
        self.oid
    }

    /// True until the first store succeeds.
    pub fn is_new(&self) -> bool {
        !self.persisted
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.values.get(field)
    }

    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.values.insert(field.into(), value.into());
        self
    }

    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.values.remove(field)
    }

    pub fn values(&self) -> &Values {
        &self.values
    }

    pub(crate) fn merge(&mut self, values: Values) {
        self.values.extend(values);
    }

    pub fn deleted_at(&self) -> Option<DateTime<Utc>> {
        self.deleted_at
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn mark_deleted(&mut self) {
        self.mark_deleted_at(Utc::now());
    }

    /// Stored timestamps have millisecond precision.
    pub fn mark_deleted_at(&mut self, at: DateTime<Utc>) {
        self.deleted_at = Some(at.trunc_subsecs(3));
    }

    pub fn restore(&mut self) {
        self.deleted_at = None;
    }

    /// Marks the record deleted and stores it.
    pub async fn soft_delete(&mut self) -> Result<()> {
        self.mark_deleted();
        self.store().await
    }

    pub fn definition(&self) -> Option<Arc<EntityDefinition>> {
        self.definition.upgrade()
    }

    fn require_definition(&self) -> Result<Arc<EntityDefinition>> {
        self.definition
            .upgrade()
            .ok_or_else(|| EntityError::Configuration("entity definition is no longer alive".to_string()))
    }

    pub async fn store(&mut self) -> Result<()> {
        self.store_with(StoreOptions::default()).await
    }

    /// Persists the instance, allocating an oid on first store. Nothing is
    /// written when a hook, cast or encode step fails; an oid allocated
    /// before such a failure stays with this instance and a retry inserts it.
    /// An oid found taken is discarded so a retry allocates a fresh one.
    pub async fn store_with(&mut self, options: StoreOptions) -> Result<()> {
        let definition = self.require_definition()?;
        let name = definition.name();

        if options.run_hooks {
            if let Some(before_store) = &definition.hooks().before_store {
                before_store(self).map_err(|e| EntityError::hook(name, "before_store", e))?;
            }
        }

        let (oid, mode) = match self.oid {
            Some(oid) if self.persisted => (oid, SaveMode::Upsert),
            Some(oid) => (oid, SaveMode::Insert),
            None => {
                let oid = definition.allocate_oid().await?;
                self.oid = Some(oid);
                (oid, SaveMode::Insert)
            }
        };

        let document = definition.document_for(self)?;
        match definition.store().save(definition.collection(), oid, document, mode).await {
            Ok(()) => self.persisted = true,
            Err(e) if mode == SaveMode::Insert && e.is_duplicate_on(ID_INDEX) => {
                tracing::error!(entity = %name, oid, "freshly allocated oid already exists");
                self.oid = None;
                return Err(EntityError::Allocation(format!(
                    "oid {} of entity '{}' is already taken",
                    oid, name
                )));
            }
            Err(e) => return Err(EntityError::storage(name, e)),
        }
        tracing::debug!(entity = %name, oid, ?mode, "stored");

        if options.run_hooks {
            if let Some(after_store) = &definition.hooks().after_store {
                after_store(self).map_err(|e| EntityError::hook(name, "after_store", e))?;
            }
        }
        Ok(())
    }

    /// Removes the record. Never-stored instances are dropped without a
    /// store round-trip.
    pub async fn delete(mut self) -> Result<()> {
        let Some(oid) = self.oid.filter(|_| self.persisted) else {
            return Ok(());
        };
        let definition = self.require_definition()?;
        let name = definition.name();

        if let Some(before_delete) = &definition.hooks().before_delete {
            before_delete(&mut self).map_err(|e| EntityError::hook(name, "before_delete", e))?;
        }
        let existed = definition
            .store()
            .remove(definition.collection(), oid)
            .await
            .map_err(|e| EntityError::storage(name, e))?;
        tracing::debug!(entity = %name, oid, existed, "deleted");
        Ok(())
    }
}
