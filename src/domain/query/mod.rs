//! Fluent entity queries.
//!
//! ```ignore
//! let adults = people
//!     .query()
//!     .matching("age").greater_than(25)
//!     .sort("age", Order::Asc)
//!     .grab(GrabOptions::default())
//!     .await?;
//! ```
//!
//! Clauses combine with AND. Two clauses on the same field both apply, so
//! `matching("age").greater_than(20).matching("age").lower_than(10)` matches
//! nothing rather than replacing the first bound.

pub mod clause;
pub mod translator;

pub use clause::{Clause, ClauseKind, ClauseValue, Operator};
pub use translator::{QueryTranslator, Translation};

use crate::domain::entity::{Entity, EntityDefinition};
use crate::domain::value::Value;
use crate::error::{EntityError, Result};
use crate::storage::{FindRequest, Order, ID_FIELD};
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use std::sync::Arc;

/// Hard ceiling on rows returned by one grab.
pub const MAX_GRAB_LIMIT: usize = 1000;

/// Which records a query sees with respect to soft deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeletedScope {
    #[default]
    Live,
    Include,
    Only,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GrabOptions {
    /// Capped at [`MAX_GRAB_LIMIT`]; `None` or zero means the ceiling.
    pub limit: Option<usize>,
    pub offset: usize,
}

impl GrabOptions {
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            offset: 0,
        }
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// Alias of [`GrabOptions::with_offset`].
    pub fn skip(self, count: usize) -> Self {
        self.with_offset(count)
    }

    pub fn effective_limit(&self) -> usize {
        match self.limit {
            None | Some(0) => MAX_GRAB_LIMIT,
            Some(n) => n.min(MAX_GRAB_LIMIT),
        }
    }
}

/// A row that matched but could not be turned back into an entity.
#[derive(Debug)]
pub struct RowFailure {
    pub oid: Option<i64>,
    pub error: EntityError,
}

#[derive(Debug, Default)]
pub struct Grab {
    pub entities: Vec<Entity>,
    pub failures: Vec<RowFailure>,
}

impl Grab {
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn oids(&self) -> Vec<i64> {
        self.entities.iter().filter_map(Entity::oid).collect()
    }

    pub fn into_entities(self) -> Vec<Entity> {
        self.entities
    }
}

#[derive(Debug, Clone)]
pub struct EntityQuery {
    definition: Arc<EntityDefinition>,
    clauses: Vec<Clause>,
    open: Option<usize>,
    deleted: DeletedScope,
    deleted_after: Option<DateTime<Utc>>,
    deleted_before: Option<DateTime<Utc>>,
    text: Option<String>,
    errors: Vec<String>,
}

impl EntityQuery {
    pub fn new(definition: Arc<EntityDefinition>) -> Self {
        Self {
            definition,
            clauses: Vec::new(),
            open: None,
            deleted: DeletedScope::Live,
            deleted_after: None,
            deleted_before: None,
            text: None,
            errors: Vec::new(),
        }
    }

    pub fn definition(&self) -> &Arc<EntityDefinition> {
        &self.definition
    }

    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }

    /// Opens a condition on `field`; the next modifier completes it.
    pub fn matching(mut self, field: impl Into<String>) -> Self {
        self.clauses.push(Clause::matching(field));
        self.open = Some(self.clauses.len() - 1);
        self
    }

    pub fn sort(mut self, field: impl Into<String>, order: Order) -> Self {
        self.clauses.push(Clause::sort(field, order));
        self
    }

    fn modify(mut self, modifier: &str, operator: Operator, value: ClauseValue) -> Self {
        match self.open.and_then(|i| self.clauses.get_mut(i)) {
            Some(clause) => clause.set(operator, value),
            None => self
                .errors
                .push(format!("{}() called before matching()", modifier)),
        }
        self
    }

    pub fn equals(self, value: impl Into<Value>) -> Self {
        self.modify("equals", Operator::Eq, ClauseValue::One(value.into()))
    }

    /// SQL wildcards: `%` any run, `_` one character. Anchored, case-insensitive.
    pub fn like(self, pattern: impl Into<String>) -> Self {
        self.modify("like", Operator::Like, ClauseValue::One(Value::String(pattern.into())))
    }

    pub fn is_true(self) -> Self {
        self.modify("is_true", Operator::Eq, ClauseValue::One(Value::Bool(true)))
    }

    pub fn is_false(self) -> Self {
        self.modify("is_false", Operator::Eq, ClauseValue::One(Value::Bool(false)))
    }

    pub fn greater_than(self, value: impl Into<Value>) -> Self {
        self.modify("greater_than", Operator::Gt, ClauseValue::One(value.into()))
    }

    pub fn lower_than(self, value: impl Into<Value>) -> Self {
        self.modify("lower_than", Operator::Lt, ClauseValue::One(value.into()))
    }

    pub fn greater_or_equal(self, value: impl Into<Value>) -> Self {
        self.modify("greater_or_equal", Operator::Gte, ClauseValue::One(value.into()))
    }

    pub fn lower_or_equal(self, value: impl Into<Value>) -> Self {
        self.modify("lower_or_equal", Operator::Lte, ClauseValue::One(value.into()))
    }

    /// Inclusive on both ends.
    pub fn between(self, low: impl Into<Value>, high: impl Into<Value>) -> Self {
        self.modify("between", Operator::Between, ClauseValue::Range(low.into(), high.into()))
    }

    pub fn in_list<I, V>(self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let values = values.into_iter().map(Into::into).collect();
        self.modify("in_list", Operator::In, ClauseValue::List(values))
    }

    pub fn not_in<I, V>(self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let values = values.into_iter().map(Into::into).collect();
        self.modify("not_in", Operator::NotIn, ClauseValue::List(values))
    }

    pub fn is_null(self) -> Self {
        self.modify("is_null", Operator::IsNull, ClauseValue::None)
    }

    pub fn is_not_null(self) -> Self {
        self.modify("is_not_null", Operator::IsNotNull, ClauseValue::None)
    }

    pub fn after(self, value: impl Into<Value>) -> Self {
        self.modify("after", Operator::Gt, ClauseValue::One(value.into()))
    }

    pub fn before(self, value: impl Into<Value>) -> Self {
        self.modify("before", Operator::Lt, ClauseValue::One(value.into()))
    }

    /// Soft-deleted records are returned alongside live ones.
    pub fn include_deleted(mut self) -> Self {
        self.deleted = DeletedScope::Include;
        self
    }

    pub fn only_deleted(mut self) -> Self {
        self.deleted = DeletedScope::Only;
        self
    }

    /// Records deleted strictly after `at`.
    pub fn deleted_after(mut self, at: DateTime<Utc>) -> Self {
        self.deleted_after = Some(at);
        self
    }

    /// Records deleted strictly before `at`.
    pub fn deleted_before(mut self, at: DateTime<Utc>) -> Self {
        self.deleted_before = Some(at);
        self
    }

    /// Full-text search over the declared text fields. Quote the term for an
    /// exact phrase.
    pub fn text_search(mut self, term: impl Into<String>) -> Self {
        self.text = Some(term.into());
        self
    }

    pub fn translate(&self) -> Result<Translation> {
        QueryTranslator::new(&self.definition).translate(self)
    }

    pub async fn grab(&self, options: GrabOptions) -> Result<Grab> {
        let translation = self.translate()?;
        let definition = &self.definition;
        let request = FindRequest {
            filter: translation.filter,
            sort: translation.sort,
            text: translation.text,
            skip: options.offset,
            limit: Some(options.effective_limit()),
        };

        let documents = definition
            .store()
            .find(definition.collection(), &request)
            .await
            .map_err(|e| EntityError::storage(definition.name(), e))?;

        let mut grab = Grab::default();
        for document in &documents {
            match definition.rehydrate(document) {
                Ok(entity) => grab.entities.push(entity),
                Err(error) => {
                    let oid = document.get(ID_FIELD).and_then(JsonValue::as_i64);
                    tracing::warn!(entity = %definition.name(), ?oid, %error, "cannot reconstitute row");
                    grab.failures.push(RowFailure { oid, error });
                }
            }
        }
        Ok(grab)
    }

    /// Number of matching records, without pagination.
    pub async fn count(&self) -> Result<u64> {
        let translation = self.translate()?;
        let definition = &self.definition;
        definition
            .store()
            .count(definition.collection(), &translation.filter, translation.text.as_ref())
            .await
            .map_err(|e| EntityError::storage(definition.name(), e))
    }

    pub async fn grab_one(&self) -> Result<Option<Entity>> {
        let mut grab = self.grab(GrabOptions::with_limit(1)).await?;
        if let Some(failure) = grab.failures.pop() {
            return Err(failure.error);
        }
        Ok(grab.entities.pop())
    }
}
