//! Native filter representation shared by every backend.
//!
//! The query translator produces these values after casting; backends only
//! execute them. Field values are already in their stored JSON form.

use serde_json::Value as JsonValue;
use std::fmt;
use std::str::FromStr;

/// A conjunctive filter over top-level document fields.
///
/// When a document field holds an array, a predicate matches if any element
/// matches (multi-valued index semantics).
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    All,
    And(Vec<Filter>),
    Field { path: String, predicate: Predicate },
}

impl Filter {
    pub fn field(path: impl Into<String>, predicate: Predicate) -> Self {
        Filter::Field {
            path: path.into(),
            predicate,
        }
    }

    /// Builds a conjunction, flattening nested conjunctions and collapsing
    /// the trivial cases.
    pub fn and(filters: Vec<Filter>) -> Self {
        let mut flat = Vec::with_capacity(filters.len());
        for filter in filters {
            match filter {
                Filter::All => {}
                Filter::And(parts) => flat.extend(parts),
                other => flat.push(other),
            }
        }
        let mut filters = flat;
        match filters.len() {
            0 => Filter::All,
            1 => filters.remove(0),
            _ => Filter::And(filters),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Eq(JsonValue),
    Gt(JsonValue),
    Gte(JsonValue),
    Lt(JsonValue),
    Lte(JsonValue),
    In(Vec<JsonValue>),
    NotIn(Vec<JsonValue>),
    /// SQL-style pattern (`%`, `_`), anchored and case-insensitive.
    Like(String),
    /// Field missing or null.
    IsNull,
    /// Field present and not null.
    IsNotNull,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Order {
    #[default]
    Asc,
    Desc,
}

impl FromStr for Order {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "asc" | "ascending" | "1" => Ok(Order::Asc),
            "desc" | "descending" | "-1" => Ok(Order::Desc),
            other => Err(format!("unknown sort direction '{}'", other)),
        }
    }
}

impl fmt::Display for Order {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Order::Asc => f.write_str("asc"),
            Order::Desc => f.write_str("desc"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub field: String,
    pub order: Order,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextField {
    pub name: String,
    pub weight: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextSearch {
    /// Exact phrase, requested by quoting the input.
    Phrase(String),
    /// Free words; a document matches when any word matches.
    Words(Vec<String>),
}

impl TextSearch {
    /// Parses user input. Returns `None` when nothing searchable remains.
    pub fn parse(term: &str) -> Option<Self> {
        let term = term.trim();
        if term.len() >= 2 && term.starts_with('"') && term.ends_with('"') {
            let phrase = term[1..term.len() - 1].trim().to_lowercase();
            return if tokenize(&phrase).is_empty() {
                None
            } else {
                Some(TextSearch::Phrase(phrase))
            };
        }
        let words = tokenize(term);
        if words.is_empty() {
            None
        } else {
            Some(TextSearch::Words(words))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextQuery {
    pub fields: Vec<TextField>,
    pub search: TextSearch,
}

/// Everything a backend needs to answer a grab.
#[derive(Debug, Clone, PartialEq)]
pub struct FindRequest {
    pub filter: Filter,
    pub sort: Vec<SortKey>,
    pub text: Option<TextQuery>,
    pub skip: usize,
    pub limit: Option<usize>,
}

impl FindRequest {
    pub fn new(filter: Filter) -> Self {
        Self {
            filter,
            sort: Vec::new(),
            text: None,
            skip: 0,
            limit: None,
        }
    }
}

/// Lowercased alphanumeric words of `text`.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect()
}

/// Translates a LIKE pattern into an anchored regular expression.
pub fn like_to_regex(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() + 8);
    out.push('^');
    let mut literal = String::new();
    for c in pattern.chars() {
        match c {
            '%' | '_' => {
                out.push_str(&regex::escape(&literal));
                literal.clear();
                out.push_str(if c == '%' { ".*" } else { "." });
            }
            _ => literal.push(c),
        }
    }
    out.push_str(&regex::escape(&literal));
    out.push('$');
    out
}
