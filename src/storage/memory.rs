//! In-process document store.
//!
//! Follows document-store matching rules: predicates on array fields match
//! element-wise, missing fields sort first, and unique indexes are enforced on
//! every save. Used for tests and `memory://` configurations.

use super::filter::{like_to_regex, tokenize, Filter, FindRequest, Order, Predicate, SortKey, TextQuery, TextSearch};
use super::{Document, DocumentStore, IndexDefinition, IndexKind, SaveMode, StoreError, ID_FIELD, ID_INDEX};
use async_trait::async_trait;
use regex::{Regex, RegexBuilder};
use serde_json::Value as JsonValue;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use tokio::sync::{Mutex, RwLock};

struct Collection {
    documents: BTreeMap<i64, Document>,
    indexes: BTreeMap<String, IndexDefinition>,
}

impl Collection {
    fn new() -> Self {
        let mut indexes = BTreeMap::new();
        indexes.insert(
            ID_INDEX.to_string(),
            IndexDefinition {
                name: ID_INDEX.to_string(),
                kind: IndexKind::Field {
                    field: ID_FIELD.to_string(),
                    unique: true,
                    sparse: false,
                },
            },
        );
        Self {
            documents: BTreeMap::new(),
            indexes,
        }
    }

    fn text_index(&self) -> Option<&IndexDefinition> {
        self.indexes
            .values()
            .find(|index| matches!(index.kind, IndexKind::Text { .. }))
    }

    fn check_unique(&self, collection: &str, id: i64, document: &Document) -> Result<(), StoreError> {
        for index in self.indexes.values() {
            let IndexKind::Field { field, unique: true, sparse } = &index.kind else {
                continue;
            };
            if index.name == ID_INDEX {
                continue;
            }
            let keys = unique_keys(document.get(field), *sparse);
            if keys.is_empty() {
                continue;
            }
            let collides = self
                .documents
                .iter()
                .filter(|(other_id, _)| **other_id != id)
                .any(|(_, other)| {
                    unique_keys(other.get(field), *sparse)
                        .iter()
                        .any(|k| keys.contains(k))
                });
            if collides {
                return Err(StoreError::DuplicateKey {
                    collection: collection.to_string(),
                    index: index.name.clone(),
                });
            }
        }
        Ok(())
    }
}

/// Keys a document contributes to a unique index. Sparse indexes skip
/// missing and null values.
fn unique_keys(value: Option<&JsonValue>, sparse: bool) -> Vec<String> {
    match value {
        None | Some(JsonValue::Null) => {
            if sparse {
                Vec::new()
            } else {
                vec!["null".to_string()]
            }
        }
        Some(JsonValue::Array(items)) => items.iter().map(|v| v.to_string()).collect(),
        Some(v) => vec![v.to_string()],
    }
}

#[derive(Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, Collection>>,
    sequences: Mutex<HashMap<String, i64>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw stored document, for inspection.
    pub async fn document(&self, collection: &str, id: i64) -> Option<Document> {
        let collections = self.collections.read().await;
        collections
            .get(collection)
            .and_then(|c| c.documents.get(&id))
            .cloned()
    }

    pub async fn len(&self, collection: &str) -> usize {
        let collections = self.collections.read().await;
        collections.get(collection).map_or(0, |c| c.documents.len())
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn ensure_collection(&self, collection: &str) -> Result<(), StoreError> {
        let mut collections = self.collections.write().await;
        collections
            .entry(collection.to_string())
            .or_insert_with(Collection::new);
        Ok(())
    }

    async fn list_indexes(&self, collection: &str) -> Result<Vec<String>, StoreError> {
        let collections = self.collections.read().await;
        collections
            .get(collection)
            .map(|c| c.indexes.keys().cloned().collect())
            .ok_or_else(|| StoreError::CollectionNotFound(collection.to_string()))
    }

    async fn create_index(&self, collection: &str, index: &IndexDefinition) -> Result<(), StoreError> {
        let mut collections = self.collections.write().await;
        let coll = collections
            .entry(collection.to_string())
            .or_insert_with(Collection::new);

        if coll.indexes.contains_key(&index.name) {
            return Ok(());
        }

        match &index.kind {
            IndexKind::Text { .. } => {
                if let Some(existing) = coll.text_index() {
                    return Err(StoreError::Backend(format!(
                        "collection '{}' already has text index '{}'",
                        collection, existing.name
                    )));
                }
            }
            IndexKind::Field { field, unique: true, sparse } => {
                let mut seen = HashSet::new();
                for doc in coll.documents.values() {
                    for key in unique_keys(doc.get(field), *sparse) {
                        if !seen.insert(key) {
                            return Err(StoreError::DuplicateKey {
                                collection: collection.to_string(),
                                index: index.name.clone(),
                            });
                        }
                    }
                }
            }
            IndexKind::Field { .. } => {}
        }

        coll.indexes.insert(index.name.clone(), index.clone());
        Ok(())
    }

    async fn drop_index(&self, collection: &str, name: &str) -> Result<(), StoreError> {
        if name == ID_INDEX {
            return Err(StoreError::Backend(format!(
                "cannot drop the identifier index of '{}'",
                collection
            )));
        }
        let mut collections = self.collections.write().await;
        let coll = collections
            .get_mut(collection)
            .ok_or_else(|| StoreError::CollectionNotFound(collection.to_string()))?;
        coll.indexes
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| StoreError::Backend(format!("index '{}' not found on '{}'", name, collection)))
    }

    async fn save(
        &self,
        collection: &str,
        id: i64,
        document: Document,
        mode: SaveMode,
    ) -> Result<(), StoreError> {
        let mut collections = self.collections.write().await;
        let coll = collections
            .entry(collection.to_string())
            .or_insert_with(Collection::new);

        if mode == SaveMode::Insert && coll.documents.contains_key(&id) {
            return Err(StoreError::DuplicateKey {
                collection: collection.to_string(),
                index: ID_INDEX.to_string(),
            });
        }
        coll.check_unique(collection, id, &document)?;
        coll.documents.insert(id, document);
        Ok(())
    }

    async fn remove(&self, collection: &str, id: i64) -> Result<bool, StoreError> {
        let mut collections = self.collections.write().await;
        Ok(collections
            .get_mut(collection)
            .and_then(|c| c.documents.remove(&id))
            .is_some())
    }

    async fn find(&self, collection: &str, request: &FindRequest) -> Result<Vec<Document>, StoreError> {
        let collections = self.collections.read().await;
        let Some(coll) = collections.get(collection) else {
            return Ok(Vec::new());
        };
        if request.text.is_some() && coll.text_index().is_none() {
            return Err(StoreError::TextIndexRequired(collection.to_string()));
        }

        let matcher = Matcher::compile(&request.filter)?;
        let mut hits: Vec<(f64, &Document)> = coll
            .documents
            .values()
            .filter(|doc| matcher.matches(doc))
            .filter_map(|doc| match &request.text {
                Some(text) => {
                    let score = text_score(doc, text);
                    (score > 0.0).then_some((score, doc))
                }
                None => Some((0.0, doc)),
            })
            .collect();

        // Stable sort: ties keep ascending id order.
        hits.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(Ordering::Equal)
                .then_with(|| compare_by_keys(a.1, b.1, &request.sort))
        });

        Ok(hits
            .into_iter()
            .skip(request.skip)
            .take(request.limit.unwrap_or(usize::MAX))
            .map(|(_, doc)| doc.clone())
            .collect())
    }

    async fn count(
        &self,
        collection: &str,
        filter: &Filter,
        text: Option<&TextQuery>,
    ) -> Result<u64, StoreError> {
        let collections = self.collections.read().await;
        let Some(coll) = collections.get(collection) else {
            return Ok(0);
        };
        if text.is_some() && coll.text_index().is_none() {
            return Err(StoreError::TextIndexRequired(collection.to_string()));
        }
        let matcher = Matcher::compile(filter)?;
        Ok(coll
            .documents
            .values()
            .filter(|doc| matcher.matches(doc))
            .filter(|doc| text.map_or(true, |t| text_score(doc, t) > 0.0))
            .count() as u64)
    }

    async fn next_sequence(&self, name: &str) -> Result<i64, StoreError> {
        let mut sequences = self.sequences.lock().await;
        let value = sequences.entry(name.to_string()).or_insert(0);
        *value += 1;
        Ok(*value)
    }
}

enum Matcher {
    All,
    And(Vec<Matcher>),
    Field { path: String, test: Test },
}

enum Test {
    Eq(JsonValue),
    Cmp(JsonValue, fn(Ordering) -> bool),
    In(Vec<JsonValue>),
    NotIn(Vec<JsonValue>),
    Like(Regex),
    IsNull,
    IsNotNull,
}

impl Matcher {
    fn compile(filter: &Filter) -> Result<Self, StoreError> {
        Ok(match filter {
            Filter::All => Matcher::All,
            Filter::And(parts) => Matcher::And(parts.iter().map(Matcher::compile).collect::<Result<_, _>>()?),
            Filter::Field { path, predicate } => {
                let test = match predicate {
                    Predicate::Eq(v) => Test::Eq(v.clone()),
                    Predicate::Gt(v) => Test::Cmp(v.clone(), |o| o == Ordering::Greater),
                    Predicate::Gte(v) => Test::Cmp(v.clone(), |o| o != Ordering::Less),
                    Predicate::Lt(v) => Test::Cmp(v.clone(), |o| o == Ordering::Less),
                    Predicate::Lte(v) => Test::Cmp(v.clone(), |o| o != Ordering::Greater),
                    Predicate::In(vs) => Test::In(vs.clone()),
                    Predicate::NotIn(vs) => Test::NotIn(vs.clone()),
                    Predicate::Like(pattern) => {
                        let re = RegexBuilder::new(&like_to_regex(pattern))
                            .case_insensitive(true)
                            .build()
                            .map_err(|e| StoreError::InvalidPattern {
                                pattern: pattern.clone(),
                                message: e.to_string(),
                            })?;
                        Test::Like(re)
                    }
                    Predicate::IsNull => Test::IsNull,
                    Predicate::IsNotNull => Test::IsNotNull,
                };
                Matcher::Field {
                    path: path.clone(),
                    test,
                }
            }
        })
    }

    fn matches(&self, doc: &Document) -> bool {
        match self {
            Matcher::All => true,
            Matcher::And(parts) => parts.iter().all(|m| m.matches(doc)),
            Matcher::Field { path, test } => test.matches(doc.get(path)),
        }
    }
}

impl Test {
    fn matches(&self, value: Option<&JsonValue>) -> bool {
        let is_null = matches!(value, None | Some(JsonValue::Null));
        let candidates: Vec<&JsonValue> = match value {
            Some(JsonValue::Array(items)) => items.iter().collect(),
            Some(v) => vec![v],
            None => Vec::new(),
        };
        match self {
            Test::Eq(expected) => {
                value == Some(expected)
                    || candidates
                        .iter()
                        .any(|c| compare_json(c, expected) == Some(Ordering::Equal))
            }
            Test::Cmp(bound, accept) => candidates
                .iter()
                .any(|c| compare_json(c, bound).is_some_and(accept)),
            Test::In(list) => in_list(is_null, &candidates, list),
            Test::NotIn(list) => !in_list(is_null, &candidates, list),
            Test::Like(re) => candidates
                .iter()
                .any(|c| c.as_str().is_some_and(|s| re.is_match(s))),
            Test::IsNull => is_null,
            Test::IsNotNull => !is_null,
        }
    }
}

fn in_list(is_null: bool, candidates: &[&JsonValue], list: &[JsonValue]) -> bool {
    if is_null && list.iter().any(JsonValue::is_null) {
        return true;
    }
    candidates.iter().any(|c| {
        list.iter()
            .any(|item| compare_json(c, item) == Some(Ordering::Equal))
    })
}

/// Same-type comparison. Values of different types are incomparable.
fn compare_json(a: &JsonValue, b: &JsonValue) -> Option<Ordering> {
    match (a, b) {
        (JsonValue::Null, JsonValue::Null) => Some(Ordering::Equal),
        (JsonValue::Bool(x), JsonValue::Bool(y)) => Some(x.cmp(y)),
        (JsonValue::Number(x), JsonValue::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(p), Some(q)) => Some(p.cmp(&q)),
            _ => x.as_f64()?.partial_cmp(&y.as_f64()?),
        },
        (JsonValue::String(x), JsonValue::String(y)) => Some(x.cmp(y)),
        _ if a == b => Some(Ordering::Equal),
        _ => None,
    }
}

fn type_rank(value: Option<&JsonValue>) -> u8 {
    match value {
        None | Some(JsonValue::Null) => 0,
        Some(JsonValue::Number(_)) => 1,
        Some(JsonValue::String(_)) => 2,
        Some(JsonValue::Object(_)) => 3,
        Some(JsonValue::Array(_)) => 4,
        Some(JsonValue::Bool(_)) => 5,
    }
}

fn total_cmp(a: Option<&JsonValue>, b: Option<&JsonValue>) -> Ordering {
    type_rank(a).cmp(&type_rank(b)).then_with(|| match (a, b) {
        (Some(x), Some(y)) => compare_json(x, y).unwrap_or(Ordering::Equal),
        _ => Ordering::Equal,
    })
}

/// Arrays sort by their smallest element ascending and largest descending.
fn sort_value<'a>(doc: &'a Document, field: &str, order: Order) -> Option<&'a JsonValue> {
    match doc.get(field) {
        Some(JsonValue::Array(items)) => {
            let mut iter = items.iter();
            let first = iter.next()?;
            Some(iter.fold(first, |acc, item| {
                let ord = total_cmp(Some(item), Some(acc));
                match (order, ord) {
                    (Order::Asc, Ordering::Less) | (Order::Desc, Ordering::Greater) => item,
                    _ => acc,
                }
            }))
        }
        other => other,
    }
}

fn compare_by_keys(a: &Document, b: &Document, keys: &[SortKey]) -> Ordering {
    for key in keys {
        let ord = total_cmp(
            sort_value(a, &key.field, key.order),
            sort_value(b, &key.field, key.order),
        );
        let ord = match key.order {
            Order::Asc => ord,
            Order::Desc => ord.reverse(),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

fn text_score(doc: &Document, query: &TextQuery) -> f64 {
    let mut score = 0.0;
    for field in &query.fields {
        let Some(JsonValue::String(text)) = doc.get(&field.name) else {
            continue;
        };
        let hits = match &query.search {
            TextSearch::Phrase(phrase) => phrase_hits(&tokenize(text), &tokenize(phrase)),
            TextSearch::Words(words) => tokenize(text)
                .iter()
                .filter(|token| words.contains(token))
                .count(),
        };
        score += hits as f64 * f64::from(field.weight);
    }
    score
}

/// Occurrences of the phrase as consecutive whole tokens.
fn phrase_hits(tokens: &[String], phrase: &[String]) -> usize {
    if phrase.is_empty() {
        return 0;
    }
    tokens.windows(phrase.len()).filter(|window| *window == phrase).count()
}
