//! Turns query clauses into a native filter, sort keys and text query.
//!
//! Every comparison value is cast with the declared type of its field before
//! it reaches the store, so loosely typed input (`"42"` for an integer index)
//! behaves like its typed form. Nothing here touches the store.

use super::clause::{Clause, ClauseKind, ClauseValue, Operator};
use super::{DeletedScope, EntityQuery};
use crate::domain::entity::{EntityDefinition, FieldType, IndexSpec, OID_FIELD};
use crate::domain::value::{format_date, Value};
use crate::error::{EntityError, Result};
use crate::storage::{Filter, Predicate, SortKey, TextQuery, TextSearch, DELETED_AT_FIELD, ID_FIELD};
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

#[derive(Debug, Clone, PartialEq)]
pub struct Translation {
    pub filter: Filter,
    pub sort: Vec<SortKey>,
    pub text: Option<TextQuery>,
}

/// What a clause field resolves to.
enum Target<'a> {
    Oid,
    Index(&'a IndexSpec),
}

impl Target<'_> {
    fn path(&self) -> &str {
        match self {
            Target::Oid => ID_FIELD,
            Target::Index(spec) => spec.field(),
        }
    }

    fn cast(&self, value: &Value) -> std::result::Result<JsonValue, String> {
        if let Value::Array(_) = value {
            return Err("expected a single value, got an array".to_string());
        }
        match self {
            Target::Oid => FieldType::Integer.cast(value),
            Target::Index(spec) => spec.cast(value),
        }
    }
}

pub struct QueryTranslator<'a> {
    definition: &'a EntityDefinition,
}

impl<'a> QueryTranslator<'a> {
    pub fn new(definition: &'a EntityDefinition) -> Self {
        Self { definition }
    }

    fn error(&self, message: impl std::fmt::Display) -> EntityError {
        EntityError::Query(format!("entity '{}': {}", self.definition.name(), message))
    }

    fn field_error(&self, field: &str, message: impl std::fmt::Display) -> EntityError {
        EntityError::Query(format!(
            "entity '{}', field '{}': {}",
            self.definition.name(),
            field,
            message
        ))
    }

    fn resolve(&self, field: &str) -> Result<Target<'a>> {
        if field == OID_FIELD {
            return Ok(Target::Oid);
        }
        self.definition
            .index(field)
            .map(Target::Index)
            .ok_or_else(|| self.field_error(field, "no index is declared on this field"))
    }

    pub fn translate(&self, query: &EntityQuery) -> Result<Translation> {
        if let Some(message) = query.errors.first() {
            return Err(self.error(message));
        }

        let mut filters = Vec::new();
        let mut sort = Vec::new();
        for clause in &query.clauses {
            match clause.kind {
                ClauseKind::Match => filters.push(self.clause_filter(clause)?),
                ClauseKind::Sort(order) => sort.push(SortKey {
                    field: self.resolve(&clause.field)?.path().to_string(),
                    order,
                }),
            }
        }
        filters.extend(self.deletion_filters(query));

        let text = match &query.text {
            Some(term) => Some(self.text_query(term)?),
            None => None,
        };

        Ok(Translation {
            filter: Filter::and(filters),
            sort,
            text,
        })
    }

    pub fn clause_filter(&self, clause: &Clause) -> Result<Filter> {
        let field = clause.field.as_str();
        let target = self.resolve(field)?;
        let operator = clause
            .operator
            .ok_or_else(|| self.field_error(field, "clause has no condition"))?;
        let path = target.path();

        let cast = |value: &Value| target.cast(value).map_err(|e| self.field_error(field, e));
        let bound = |value: &Value| {
            if value.is_null() {
                return Err(self.field_error(field, format!("cannot use null with {}", operator)));
            }
            cast(value)
        };
        let list = |values: &[Value]| values.iter().map(cast).collect::<Result<Vec<_>>>();

        let predicate = match (operator, &clause.value) {
            (Operator::Eq, ClauseValue::One(Value::Array(items))) => Predicate::In(list(items)?),
            (Operator::Eq, ClauseValue::One(Value::Null)) => Predicate::IsNull,
            (Operator::Eq, ClauseValue::One(value)) => Predicate::Eq(cast(value)?),
            (Operator::Gt, ClauseValue::One(value)) => Predicate::Gt(bound(value)?),
            (Operator::Gte, ClauseValue::One(value)) => Predicate::Gte(bound(value)?),
            (Operator::Lt, ClauseValue::One(value)) => Predicate::Lt(bound(value)?),
            (Operator::Lte, ClauseValue::One(value)) => Predicate::Lte(bound(value)?),
            (Operator::Between, ClauseValue::Range(low, high)) => {
                return Ok(Filter::and(vec![
                    Filter::field(path, Predicate::Gte(bound(low)?)),
                    Filter::field(path, Predicate::Lte(bound(high)?)),
                ]));
            }
            (Operator::Like, ClauseValue::One(Value::String(pattern))) => Predicate::Like(pattern.clone()),
            (Operator::In, ClauseValue::List(values)) => Predicate::In(list(values)?),
            (Operator::NotIn, ClauseValue::List(values)) => Predicate::NotIn(list(values)?),
            (Operator::IsNull, _) => Predicate::IsNull,
            (Operator::IsNotNull, _) => Predicate::IsNotNull,
            (operator, _) => {
                return Err(self.field_error(field, format!("malformed value for {}", operator)));
            }
        };
        Ok(Filter::field(path, predicate))
    }

    /// Live records only, unless the query widens or narrows the scope.
    /// Explicit deletion-time bounds imply deleted records.
    fn deletion_filters(&self, query: &EntityQuery) -> Vec<Filter> {
        let date = |at: &DateTime<Utc>| JsonValue::String(format_date(at));
        if query.deleted_after.is_some() || query.deleted_before.is_some() {
            let mut filters = vec![Filter::field(DELETED_AT_FIELD, Predicate::IsNotNull)];
            if let Some(at) = &query.deleted_after {
                filters.push(Filter::field(DELETED_AT_FIELD, Predicate::Gt(date(at))));
            }
            if let Some(at) = &query.deleted_before {
                filters.push(Filter::field(DELETED_AT_FIELD, Predicate::Lt(date(at))));
            }
            return filters;
        }
        match query.deleted {
            DeletedScope::Live => vec![Filter::field(DELETED_AT_FIELD, Predicate::IsNull)],
            DeletedScope::Include => Vec::new(),
            DeletedScope::Only => vec![Filter::field(DELETED_AT_FIELD, Predicate::IsNotNull)],
        }
    }

    fn text_query(&self, term: &str) -> Result<TextQuery> {
        let spec = self
            .definition
            .text_search()
            .ok_or_else(|| self.error("text search needs declared text fields"))?;
        let search = TextSearch::parse(term).ok_or_else(|| self.error("text search term is empty"))?;
        Ok(TextQuery {
            fields: spec.weighted_fields(),
            search,
        })
    }
}
