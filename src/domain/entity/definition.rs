//! Entity definitions: declared indexes, text search, hooks and the instance
//! factory.

use crate::domain::entity::hooks::{Construct, Hooks};
use crate::domain::entity::index::{FieldType, IndexSpec, TextSearchSpec, NAME_SEPARATOR};
use crate::domain::entity::instance::{Entity, StoreOptions};
use crate::domain::entity::sync::{IndexSyncReport, IndexSynchronizer};
use crate::domain::payload;
use crate::domain::query::{EntityQuery, GrabOptions, MAX_GRAB_LIMIT};
use crate::domain::value::{format_date, parse_date, Value, Values};
use crate::error::{EntityError, Result};
use crate::storage::{Document, DocumentStore, IndexDefinition, Order, DATA_FIELD, DELETED_AT_FIELD, ID_FIELD};
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Name of the identifier pseudo-index accepted by queries.
pub const OID_FIELD: &str = "oid";

/// The declaration of one entity type, bound to a store.
///
/// Declarations (`define_index`, `define_text_search`, `set_hooks`) happen on
/// an owned definition; once registered it is shared as
/// `Arc<EntityDefinition>` and becomes read-only.
pub struct EntityDefinition {
    name: String,
    store: Arc<dyn DocumentStore>,
    indexes: BTreeMap<String, IndexSpec>,
    text_search: Option<TextSearchSpec>,
    hooks: Hooks,
}

impl fmt::Debug for EntityDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityDefinition")
            .field("name", &self.name)
            .field("backend", &self.store.backend())
            .field("indexes", &self.indexes)
            .field("text_search", &self.text_search)
            .field("hooks", &self.hooks)
            .finish()
    }
}

fn reserved_field(field: &str) -> bool {
    field.is_empty() || field == OID_FIELD || payload::is_transient(field) || field.contains(NAME_SEPARATOR)
}

impl EntityDefinition {
    /// Creates an empty definition whose collection is named after the entity.
    pub fn bless(name: impl Into<String>, store: Arc<dyn DocumentStore>) -> Self {
        Self {
            name: name.into(),
            store,
            indexes: BTreeMap::new(),
            text_search: None,
            hooks: Hooks::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn collection(&self) -> &str {
        &self.name
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// Declares an index from a type name (`boolean`, `string`, `integer`,
    /// `date`, `untyped`).
    pub fn define_index(&mut self, field: &str, field_type: &str) -> Result<&mut IndexSpec> {
        let parsed = field_type.parse::<FieldType>().map_err(|e| {
            EntityError::Configuration(format!("entity '{}', field '{}': {}", self.name, field, e))
        })?;
        self.define_typed_index(field, parsed)
    }

    /// Declares an index, or returns the existing one if the field is already
    /// declared with the same type.
    pub fn define_typed_index(&mut self, field: &str, field_type: FieldType) -> Result<&mut IndexSpec> {
        if reserved_field(field) {
            return Err(EntityError::Configuration(format!(
                "entity '{}': field name '{}' is reserved",
                self.name, field
            )));
        }
        if let Some(existing) = self.indexes.get(field) {
            if existing.field_type() != field_type {
                return Err(EntityError::Configuration(format!(
                    "entity '{}', field '{}': already declared as {}, cannot redeclare as {}",
                    self.name,
                    field,
                    existing.field_type(),
                    field_type
                )));
            }
        }
        Ok(self
            .indexes
            .entry(field.to_string())
            .or_insert_with(|| IndexSpec::new(field, field_type)))
    }

    pub fn index(&self, field: &str) -> Option<&IndexSpec> {
        self.indexes.get(field)
    }

    pub fn indexes(&self) -> impl Iterator<Item = &IndexSpec> {
        self.indexes.values()
    }

    /// Declares the ordered text search fields. The first field weighs most.
    pub fn define_text_search<I, S>(&mut self, fields: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let spec = TextSearchSpec::new(fields)
            .map_err(|e| EntityError::Configuration(format!("entity '{}': {}", self.name, e)))?;
        if let Some(field) = spec.fields().iter().find(|f| reserved_field(f)) {
            return Err(EntityError::Configuration(format!(
                "entity '{}': field name '{}' is reserved",
                self.name, field
            )));
        }
        self.text_search = Some(spec);
        Ok(())
    }

    pub fn text_search(&self) -> Option<&TextSearchSpec> {
        self.text_search.as_ref()
    }

    pub fn set_hooks(&mut self, hooks: Hooks) {
        self.hooks = hooks;
    }

    pub fn hooks(&self) -> &Hooks {
        &self.hooks
    }

    /// Every index the store should carry for this entity.
    pub fn declared_indexes(&self) -> Vec<IndexDefinition> {
        let mut declared: Vec<IndexDefinition> = self.indexes.values().map(IndexSpec::to_definition).collect();
        if let Some(text) = &self.text_search {
            declared.push(text.to_definition());
        }
        declared
    }

    /// Reconciles declared indexes with the collection. Idempotent.
    pub async fn initialize(&self) -> Result<IndexSyncReport> {
        let report = IndexSynchronizer::new(self.store.as_ref(), &self.name)
            .sync(&self.declared_indexes())
            .await
            .map_err(|e| EntityError::storage(&self.name, e))?;
        tracing::info!(
            entity = %self.name,
            created = report.created.len(),
            dropped = report.dropped.len(),
            kept = report.kept.len(),
            "indexes reconciled"
        );
        Ok(report)
    }

    /// Drops every managed index of the collection.
    pub async fn drop_indexes(&self) -> Result<Vec<String>> {
        let dropped = IndexSynchronizer::new(self.store.as_ref(), &self.name)
            .drop_managed()
            .await
            .map_err(|e| EntityError::storage(&self.name, e))?;
        tracing::info!(entity = %self.name, dropped = dropped.len(), "managed indexes dropped");
        Ok(dropped)
    }

    /// Builds an instance. A value named `oid` assigns the identifier.
    pub fn create(self: &Arc<Self>, mut values: Values) -> Result<Entity> {
        let oid = match values.remove(OID_FIELD) {
            None | Some(Value::Null) => None,
            Some(v) => Some(self.parse_oid(&v)?),
        };
        self.build(values, oid, None)
    }

    fn parse_oid(&self, value: &Value) -> Result<i64> {
        let cast = FieldType::Integer.cast(value).map_err(|message| EntityError::Cast {
            entity: self.name.clone(),
            field: OID_FIELD.to_string(),
            message,
        })?;
        cast.as_i64().ok_or_else(|| EntityError::Cast {
            entity: self.name.clone(),
            field: OID_FIELD.to_string(),
            message: format!("expected integer, got {}", value.type_name()),
        })
    }

    fn build(self: &Arc<Self>, mut values: Values, oid: Option<i64>, deleted_at: Option<DateTime<Utc>>) -> Result<Entity> {
        values.remove(OID_FIELD);
        let mut entity = Entity::new(Arc::downgrade(self), oid, deleted_at);

        if let Some(defaults) = &self.hooks.defaults {
            defaults(&mut entity).map_err(|e| EntityError::hook(&self.name, "defaults", e))?;
        }
        match &self.hooks.construct {
            Some(Construct::WithValues(construct)) => {
                construct(&mut entity, &values).map_err(|e| EntityError::hook(&self.name, "construct", e))?
            }
            Some(Construct::NoArgs(construct)) => {
                construct(&mut entity).map_err(|e| EntityError::hook(&self.name, "construct", e))?
            }
            None => {}
        }
        if self.hooks.merges_values() {
            entity.merge(values);
        }
        if entity.oid().is_some() {
            if let Some(on_load) = &self.hooks.on_load {
                on_load(&mut entity).map_err(|e| EntityError::hook(&self.name, "on_load", e))?;
            }
        }
        Ok(entity)
    }

    /// Reconstitutes an instance from a stored document.
    pub(crate) fn rehydrate(self: &Arc<Self>, document: &Document) -> Result<Entity> {
        let oid = document
            .get(ID_FIELD)
            .and_then(JsonValue::as_i64)
            .ok_or_else(|| EntityError::Serialization(format!("'{}' document has no integer _id", self.name)))?;

        let deleted_at = match document.get(DELETED_AT_FIELD) {
            None | Some(JsonValue::Null) => None,
            Some(JsonValue::String(s)) => Some(parse_date(s).ok_or_else(|| {
                EntityError::Serialization(format!("'{}' record {}: bad deletion time '{}'", self.name, oid, s))
            })?),
            Some(other) => {
                return Err(EntityError::Serialization(format!(
                    "'{}' record {}: bad deletion time {}",
                    self.name, oid, other
                )))
            }
        };

        let data = document
            .get(DATA_FIELD)
            .and_then(JsonValue::as_str)
            .ok_or_else(|| EntityError::Serialization(format!("'{}' record {} has no payload", self.name, oid)))?;
        let values = payload::decode(&self.name, data)?;

        self.build(values, Some(oid), deleted_at)
    }

    /// The document persisted for an instance that already has an oid.
    pub(crate) fn document_for(&self, entity: &Entity) -> Result<Document> {
        let oid = entity
            .oid()
            .ok_or_else(|| EntityError::Allocation(format!("'{}' instance has no oid", self.name)))?;

        let mut document = Document::new();
        document.insert(ID_FIELD.to_string(), JsonValue::from(oid));

        if let Some(text) = &self.text_search {
            for field in text.fields() {
                match entity.get(field) {
                    None | Some(Value::Null) => {}
                    Some(value) => {
                        document.insert(field.clone(), JsonValue::String(value.to_string()));
                    }
                }
            }
        }

        for spec in self.indexes.values() {
            let stored = spec.stored_value(entity).map_err(|message| EntityError::Cast {
                entity: self.name.clone(),
                field: spec.field().to_string(),
                message,
            })?;
            match stored {
                Some(value) => {
                    document.insert(spec.field().to_string(), value);
                }
                None => {
                    document.remove(spec.field());
                }
            }
        }

        if let Some(at) = entity.deleted_at() {
            document.insert(DELETED_AT_FIELD.to_string(), JsonValue::String(format_date(&at)));
        }
        document.insert(
            DATA_FIELD.to_string(),
            JsonValue::String(payload::encode(&self.name, entity.values())?),
        );
        Ok(document)
    }

    pub(crate) async fn allocate_oid(&self) -> Result<i64> {
        let oid = self
            .store
            .next_sequence(&self.name)
            .await
            .map_err(|e| EntityError::storage(&self.name, e))?;
        tracing::debug!(entity = %self.name, oid, "allocated oid");
        Ok(oid)
    }

    pub fn query(self: &Arc<Self>) -> EntityQuery {
        EntityQuery::new(Arc::clone(self))
    }

    pub async fn find_by_oid(self: &Arc<Self>, oid: i64) -> Result<Option<Entity>> {
        self.query().matching(OID_FIELD).equals(oid).grab_one().await
    }

    /// Re-stores every record, deleted ones included, so index values are
    /// recomputed. Store hooks are skipped. Returns the number of records
    /// written; rows that cannot be reconstituted are logged and skipped.
    pub async fn reindex(self: &Arc<Self>) -> Result<usize> {
        let mut last: Option<i64> = None;
        let mut written = 0;
        loop {
            let mut query = self.query().include_deleted().sort(OID_FIELD, Order::Asc);
            if let Some(oid) = last {
                query = query.matching(OID_FIELD).greater_than(oid);
            }
            let page = query.grab(GrabOptions::default()).await?;
            let rows = page.entities.len() + page.failures.len();

            for failure in &page.failures {
                tracing::warn!(entity = %self.name, oid = ?failure.oid, error = %failure.error, "skipping unreadable record");
                if failure.oid > last {
                    last = failure.oid;
                }
            }
            for mut entity in page.entities {
                if entity.oid() > last {
                    last = entity.oid();
                }
                entity.store_with(StoreOptions { run_hooks: false }).await?;
                written += 1;
            }

            if rows < MAX_GRAB_LIMIT {
                break;
            }
        }
        tracing::info!(entity = %self.name, written, "reindexed");
        Ok(written)
    }
}
