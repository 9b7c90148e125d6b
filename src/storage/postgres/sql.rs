//! Renders native filters as PostgreSQL SQL.
//!
//! Field predicates become SQL/JSON path tests (`doc @? path`). Lax mode
//! unwraps arrays, so multi-valued index fields match element-wise, and path
//! comparisons never cross JSON types. Operands are written into the path as
//! literals, which lets equality and `IN` tests use the collection's
//! `jsonb_path_ops` GIN index.

use super::naming::quote_literal;
use crate::storage::filter::{like_to_regex, Filter, Order, Predicate, SortKey, TextField, TextQuery, TextSearch};
use serde_json::{json, Map, Value as JsonValue};
use sqlx::{Postgres, QueryBuilder};

pub fn push_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &Filter) {
    match filter {
        Filter::All => {
            qb.push("TRUE");
        }
        Filter::And(parts) => {
            qb.push("(");
            for (i, part) in parts.iter().enumerate() {
                if i > 0 {
                    qb.push(" AND ");
                }
                push_filter(qb, part);
            }
            qb.push(")");
        }
        Filter::Field { path, predicate } => push_predicate(qb, path, predicate),
    }
}

fn push_predicate(qb: &mut QueryBuilder<'_, Postgres>, path: &str, predicate: &Predicate) {
    let key = path_key(path);
    match predicate {
        Predicate::Eq(v) => push_compare(qb, &key, "==", v),
        Predicate::Gt(v) => push_compare(qb, &key, ">", v),
        Predicate::Gte(v) => push_compare(qb, &key, ">=", v),
        Predicate::Lt(v) => push_compare(qb, &key, "<", v),
        Predicate::Lte(v) => push_compare(qb, &key, "<=", v),
        Predicate::In(values) => push_in(qb, &key, values),
        Predicate::NotIn(values) => {
            qb.push("NOT ");
            push_in(qb, &key, values);
        }
        Predicate::Like(pattern) => {
            let condition = format!(
                "{} ? (@ like_regex {} flag \"i\")",
                key,
                jsonpath_string(&like_to_regex(pattern))
            );
            push_path_match(qb, condition);
        }
        Predicate::IsNull => {
            qb.push("NOT ");
            push_path_match(qb, format!("{} ? (@ != null)", key));
        }
        Predicate::IsNotNull => {
            push_path_match(qb, format!("{} ? (@ != null)", key));
        }
    }
}

fn push_compare(qb: &mut QueryBuilder<'_, Postgres>, key: &str, op: &str, value: &JsonValue) {
    match jsonpath_literal(value) {
        Some(literal) => push_path_match(qb, format!("{} ? (@ {} {})", key, op, literal)),
        None => push_path_exists(qb, format!("{} ? (@ {} $v)", key, op), json!({ "v": value })),
    }
}

fn push_in(qb: &mut QueryBuilder<'_, Postgres>, key: &str, values: &[JsonValue]) {
    if values.is_empty() {
        qb.push("FALSE");
        return;
    }
    let literals: Option<Vec<String>> = values.iter().map(jsonpath_literal).collect();
    if let Some(literals) = literals {
        let alternatives: Vec<String> = literals.iter().map(|l| format!("@ == {}", l)).collect();
        push_path_match(qb, format!("{} ? ({})", key, alternatives.join(" || ")));
        return;
    }
    let mut vars = Map::new();
    let mut alternatives = Vec::with_capacity(values.len());
    for (i, value) in values.iter().enumerate() {
        vars.insert(format!("v{}", i), value.clone());
        alternatives.push(format!("@ == $v{}", i));
    }
    push_path_exists(
        qb,
        format!("{} ? ({})", key, alternatives.join(" || ")),
        JsonValue::Object(vars),
    );
}

/// Indexable form: the operator, not a function call, is what GIN can serve.
fn push_path_match(qb: &mut QueryBuilder<'_, Postgres>, path: String) {
    qb.push("doc @? ");
    qb.push_bind(path);
    qb.push("::jsonpath");
}

/// Fallback for operands that have no path literal (arrays, objects).
fn push_path_exists(qb: &mut QueryBuilder<'_, Postgres>, path: String, vars: JsonValue) {
    qb.push("jsonb_path_exists(doc, ");
    qb.push_bind(path);
    qb.push("::jsonpath, ");
    qb.push_bind(vars);
    qb.push("::jsonb)");
}

fn path_key(field: &str) -> String {
    format!("$.{}", jsonpath_string(field))
}

/// JSON string escaping is valid jsonpath string syntax.
fn jsonpath_string(value: &str) -> String {
    JsonValue::String(value.to_string()).to_string()
}

fn jsonpath_literal(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::Null => Some("null".to_string()),
        JsonValue::Bool(b) => Some(b.to_string()),
        JsonValue::Number(n) => Some(n.to_string()),
        JsonValue::String(s) => Some(jsonpath_string(s)),
        JsonValue::Array(_) | JsonValue::Object(_) => None,
    }
}

/// Weighted document vector over the text fields. PostgreSQL has four weight
/// classes; fields are ranked by weight and the tail shares class D.
pub fn tsvector_sql(fields: &[TextField]) -> String {
    fields
        .iter()
        .map(|field| {
            format!(
                "setweight(to_tsvector('simple', coalesce(doc ->> {}, '')), '{}')",
                quote_literal(&field.name),
                weight_class(fields, field)
            )
        })
        .collect::<Vec<_>>()
        .join(" || ")
}

fn weight_class(fields: &[TextField], field: &TextField) -> char {
    let heavier = fields.iter().filter(|f| f.weight > field.weight).count();
    ['A', 'B', 'C', 'D'][heavier.min(3)]
}

fn push_tsquery(qb: &mut QueryBuilder<'_, Postgres>, search: &TextSearch) {
    match search {
        TextSearch::Phrase(phrase) => {
            qb.push("phraseto_tsquery('simple', ");
            qb.push_bind(phrase.clone());
        }
        TextSearch::Words(words) => {
            // Words are alphanumeric tokens, safe to join with the OR operator.
            qb.push("to_tsquery('simple', ");
            qb.push_bind(words.join(" | "));
        }
    }
    qb.push(")");
}

pub fn push_text_match(qb: &mut QueryBuilder<'_, Postgres>, text: &TextQuery) {
    qb.push("(");
    qb.push(tsvector_sql(&text.fields));
    qb.push(") @@ ");
    push_tsquery(qb, &text.search);
}

/// Relevance first when searching, then explicit keys, then id.
pub fn push_order_by(qb: &mut QueryBuilder<'_, Postgres>, sort: &[SortKey], text: Option<&TextQuery>) {
    qb.push(" ORDER BY ");
    if let Some(text) = text {
        qb.push("ts_rank(");
        qb.push(tsvector_sql(&text.fields));
        qb.push(", ");
        push_tsquery(qb, &text.search);
        qb.push(") DESC, ");
    }
    for key in sort {
        qb.push("doc -> ");
        qb.push_bind(key.field.clone());
        qb.push(match key.order {
            Order::Asc => " ASC NULLS FIRST, ",
            Order::Desc => " DESC NULLS LAST, ",
        });
    }
    qb.push("_id ASC");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filters_render_as_path_tests() {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT doc FROM t WHERE ");
        push_filter(
            &mut qb,
            &Filter::and(vec![
                Filter::field("age", Predicate::Gt(json!(25))),
                Filter::field("__deletedAt", Predicate::IsNull),
            ]),
        );
        assert_eq!(
            qb.sql(),
            "SELECT doc FROM t WHERE (doc @? $1::jsonpath AND NOT doc @? $2::jsonpath)"
        );
    }

    #[test]
    fn operands_are_inlined_as_path_literals() {
        assert_eq!(jsonpath_literal(&json!(25)).as_deref(), Some("25"));
        assert_eq!(jsonpath_literal(&json!("a \"b\"")).as_deref(), Some("\"a \\\"b\\\"\""));
        assert_eq!(jsonpath_literal(&json!(null)).as_deref(), Some("null"));
        assert_eq!(jsonpath_literal(&json!([1])), None);
        assert_eq!(path_key("first name"), "$.\"first name\"");

        let mut qb = QueryBuilder::<Postgres>::new("");
        push_filter(&mut qb, &Filter::field("tags", Predicate::In(vec![json!("red"), json!(3)])));
        assert_eq!(qb.sql(), "doc @? $1::jsonpath");

        let mut qb = QueryBuilder::<Postgres>::new("");
        push_filter(&mut qb, &Filter::field("tags", Predicate::Eq(json!(["red"]))));
        assert_eq!(qb.sql(), "jsonb_path_exists(doc, $1::jsonpath, $2::jsonb)");
    }

    #[test]
    fn empty_in_lists_match_nothing() {
        let mut qb = QueryBuilder::<Postgres>::new("");
        push_filter(&mut qb, &Filter::field("x", Predicate::In(Vec::new())));
        assert_eq!(qb.sql(), "FALSE");
    }

    #[test]
    fn heavier_text_fields_get_higher_classes() {
        let fields = vec![
            TextField { name: "title".into(), weight: 2 },
            TextField { name: "body".into(), weight: 1 },
        ];
        let sql = tsvector_sql(&fields);
        assert!(sql.contains("doc ->> 'title', '')), 'A')"));
        assert!(sql.contains("doc ->> 'body', '')), 'B')"));
    }
}
