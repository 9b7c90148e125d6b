//! Index declarations and per-type value casting.

use crate::domain::entity::Entity;
use crate::domain::value::{format_date, parse_date, Value};
use crate::storage::{IndexDefinition, IndexKind, TextField};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde_json::Value as JsonValue;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Reserved prefix of every index this layer manages.
pub const INDEX_PREFIX: &str = "entidx_";

/// Separates option markers in managed index names. Field names may not
/// contain it, so no field name can imitate another index's options.
pub const NAME_SEPARATOR: char = '@';

/// Value computation for an index. May return an array for multi-valued indexing.
pub type ComputeFn = Arc<dyn Fn(&Entity) -> Value + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Boolean,
    String,
    Integer,
    Date,
    Untyped,
}

impl FromStr for FieldType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "boolean" | "bool" => Ok(FieldType::Boolean),
            "string" | "text" => Ok(FieldType::String),
            "integer" | "int" => Ok(FieldType::Integer),
            "date" => Ok(FieldType::Date),
            "untyped" | "any" => Ok(FieldType::Untyped),
            other => Err(format!("unknown index type '{}'", other)),
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FieldType::Boolean => "boolean",
            FieldType::String => "string",
            FieldType::Integer => "integer",
            FieldType::Date => "date",
            FieldType::Untyped => "untyped",
        })
    }
}

impl FieldType {
    /// Casts a single (non-array) value to its stored JSON form. Null stays null.
    pub fn cast(&self, value: &Value) -> Result<JsonValue, String> {
        if value.is_null() {
            return Ok(JsonValue::Null);
        }
        match self {
            FieldType::Boolean => cast_bool(value).map(JsonValue::Bool),
            FieldType::String => cast_string(value).map(JsonValue::String),
            FieldType::Integer => cast_integer(value).map(JsonValue::from),
            FieldType::Date => cast_date(value).map(|d| JsonValue::String(format_date(&d))),
            FieldType::Untyped => Ok(value.to_json()),
        }
    }
}

fn cast_bool(value: &Value) -> Result<bool, String> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::Int(n) => Ok(*n != 0),
        Value::Float(f) => Ok(*f != 0.0 && !f.is_nan()),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "t" | "1" | "yes" | "y" | "on" => Ok(true),
            "false" | "f" | "0" | "no" | "n" | "off" | "" => Ok(false),
            _ => Err(format!("expected boolean, got '{}'", s)),
        },
        other => Err(format!("expected boolean, got {}", other.type_name())),
    }
}

fn cast_string(value: &Value) -> Result<String, String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Int(n) => Ok(n.to_string()),
        Value::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => Ok((*f as i64).to_string()),
        Value::Float(f) => Ok(f.to_string()),
        Value::Date(d) => Ok(format_date(d)),
        other => Err(format!("expected string, got {}", other.type_name())),
    }
}

fn round_float(f: f64) -> Result<i64, String> {
    let rounded = f.round();
    if !rounded.is_finite() || rounded < i64::MIN as f64 || rounded > i64::MAX as f64 {
        return Err(format!("{} is out of range for integer", f));
    }
    Ok(rounded as i64)
}

fn cast_integer(value: &Value) -> Result<i64, String> {
    match value {
        Value::Int(n) => Ok(*n),
        Value::Float(f) => round_float(*f),
        Value::Bool(b) => Ok(i64::from(*b)),
        Value::String(s) => {
            let s = s.trim();
            if let Ok(n) = s.parse::<i64>() {
                return Ok(n);
            }
            match s.parse::<f64>() {
                Ok(f) => round_float(f),
                Err(_) => Err(format!("expected integer, got '{}'", s)),
            }
        }
        Value::Date(d) => Ok(d.timestamp_millis()),
        other => Err(format!("expected integer, got {}", other.type_name())),
    }
}

fn cast_date(value: &Value) -> Result<DateTime<Utc>, String> {
    match value {
        Value::Date(d) => Ok(*d),
        Value::Int(ms) => Utc
            .timestamp_millis_opt(*ms)
            .single()
            .ok_or_else(|| format!("{} is out of range for date", ms)),
        Value::Float(f) => cast_date(&Value::Int(round_float(*f)?)),
        Value::String(s) => {
            let s = s.trim();
            if let Some(d) = parse_date(s) {
                return Ok(d);
            }
            if let Ok(d) = DateTime::parse_from_rfc3339(s) {
                return Ok(d.with_timezone(&Utc));
            }
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|d| d.and_utc())
                .ok_or_else(|| format!("expected date, got '{}'", s))
        }
        other => Err(format!("expected date, got {}", other.type_name())),
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexOptions {
    pub unique: bool,
    pub sparse: bool,
    pub case_insensitive: bool,
}

/// A declared, typed projection of one entity field.
#[derive(Clone)]
pub struct IndexSpec {
    field: String,
    field_type: FieldType,
    options: IndexOptions,
    compute: Option<ComputeFn>,
}

impl fmt::Debug for IndexSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexSpec")
            .field("field", &self.field)
            .field("field_type", &self.field_type)
            .field("options", &self.options)
            .field("computed", &self.compute.is_some())
            .finish()
    }
}

impl IndexSpec {
    pub(crate) fn new(field: &str, field_type: FieldType) -> Self {
        Self {
            field: field.to_string(),
            field_type,
            options: IndexOptions::default(),
            compute: None,
        }
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn field_type(&self) -> FieldType {
        self.field_type
    }

    pub fn options(&self) -> IndexOptions {
        self.options
    }

    pub fn unique(&mut self) -> &mut Self {
        self.options.unique = true;
        self
    }

    /// Records without a value are left out of the index entirely.
    pub fn sparse(&mut self) -> &mut Self {
        self.options.sparse = true;
        self
    }

    /// Values are folded to lowercase on write and in queries.
    pub fn case_insensitive(&mut self) -> &mut Self {
        self.options.case_insensitive = true;
        self
    }

    pub fn compute<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&Entity) -> Value + Send + Sync + 'static,
    {
        self.compute = Some(Arc::new(f));
        self
    }

    pub fn with_options(&mut self, options: IndexOptions) -> &mut Self {
        self.options = options;
        self
    }

    /// Name of the index in the store. Every option that changes matching
    /// semantics is part of the name.
    pub fn storage_name(&self) -> String {
        let mut name = format!("{}{}", INDEX_PREFIX, self.field);
        let markers = [
            (self.options.case_insensitive, "ci"),
            (self.options.unique, "uq"),
            (self.options.sparse, "sp"),
        ];
        for (_, marker) in markers.iter().filter(|(on, _)| *on) {
            name.push(NAME_SEPARATOR);
            name.push_str(marker);
        }
        name
    }

    pub fn to_definition(&self) -> IndexDefinition {
        IndexDefinition {
            name: self.storage_name(),
            kind: IndexKind::Field {
                field: self.field.clone(),
                unique: self.options.unique,
                sparse: self.options.sparse,
            },
        }
    }

    /// Casts a value (or each element of an array) to the declared type.
    pub fn cast(&self, value: &Value) -> Result<JsonValue, String> {
        match value {
            Value::Array(items) => items
                .iter()
                .map(|item| self.cast_scalar(item))
                .collect::<Result<Vec<_>, _>>()
                .map(JsonValue::Array),
            scalar => self.cast_scalar(scalar),
        }
    }

    fn cast_scalar(&self, value: &Value) -> Result<JsonValue, String> {
        if let Value::Array(_) = value {
            return Err("nested arrays cannot be indexed".to_string());
        }
        match self.field_type.cast(value)? {
            JsonValue::String(s) if self.options.case_insensitive => Ok(JsonValue::String(s.to_lowercase())),
            other => Ok(other),
        }
    }

    pub fn value_for(&self, entity: &Entity) -> Value {
        match &self.compute {
            Some(f) => f(entity),
            None => entity.get(&self.field).cloned().unwrap_or_default(),
        }
    }

    /// The value written to the document, or `None` when a sparse index
    /// leaves the record out.
    pub fn stored_value(&self, entity: &Entity) -> Result<Option<JsonValue>, String> {
        let cast = self.cast(&self.value_for(entity))?;
        if !self.options.sparse {
            return Ok(Some(cast));
        }
        Ok(match cast {
            JsonValue::Null => None,
            JsonValue::Array(items) => Some(JsonValue::Array(
                items.into_iter().filter(|v| !v.is_null()).collect(),
            )),
            other => Some(other),
        })
    }
}

/// Ordered list of text-searchable fields. Earlier fields weigh more.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextSearchSpec {
    fields: Vec<String>,
}

impl TextSearchSpec {
    pub fn new<I, S>(fields: I) -> Result<Self, String>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let fields: Vec<String> = fields.into_iter().map(Into::into).collect();
        if fields.is_empty() {
            return Err("text search needs at least one field".to_string());
        }
        for (i, field) in fields.iter().enumerate() {
            if field.is_empty() || field.contains(',') || field.contains(NAME_SEPARATOR) {
                return Err(format!("invalid text search field '{}'", field));
            }
            if fields[..i].contains(field) {
                return Err(format!("text search field '{}' is listed twice", field));
            }
        }
        Ok(Self { fields })
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// `entidx_@text:f1,f2`. The separator right after the prefix keeps it
    /// apart from every field index name.
    pub fn index_name(&self) -> String {
        format!("{}{}text:{}", INDEX_PREFIX, NAME_SEPARATOR, self.fields.join(","))
    }

    pub fn weighted_fields(&self) -> Vec<TextField> {
        let n = self.fields.len();
        self.fields
            .iter()
            .enumerate()
            .map(|(i, name)| TextField {
                name: name.clone(),
                weight: (n - i) as u32,
            })
            .collect()
    }

    pub fn to_definition(&self) -> IndexDefinition {
        IndexDefinition {
            name: self.index_name(),
            kind: IndexKind::Text {
                fields: self.weighted_fields(),
            },
        }
    }
}
