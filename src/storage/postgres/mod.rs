//! Document store on PostgreSQL.
//!
//! Each collection is a table `(_id BIGINT PRIMARY KEY, doc JSONB NOT NULL)`
//! with a store-owned `GIN (doc jsonb_path_ops)` index that serves filter
//! predicates. Managed indexes are expression indexes over `doc` (uniqueness,
//! sort order, text search), named with a hash of their logical name; the
//! logical name is kept as the index comment so the catalog can be listed
//! back in the store-agnostic form.

mod naming;
mod sql;

pub use naming::{physical_index_name, validate_ident};

use super::filter::{Filter, FindRequest, TextQuery};
use super::{Document, DocumentStore, IndexDefinition, IndexKind, SaveMode, StoreError, ID_INDEX};
use async_trait::async_trait;
use naming::{quote_ident, quote_literal};
use serde_json::Value as JsonValue;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};

const SEQUENCES_TABLE: &str = "entity_sequences";

/// Logical name of the per-collection path index behind every filter.
pub const DOC_INDEX: &str = "_doc_";

/// A document store that uses a PostgreSQL connection pool.
#[derive(Clone)]
pub struct PgDocumentStore {
    pool: PgPool,
}

impl PgDocumentStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Self::with_pool(pool).await
    }

    /// Wraps an existing pool and makes sure the sequence table exists.
    pub async fn with_pool(pool: PgPool) -> Result<Self, StoreError> {
        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
                name TEXT PRIMARY KEY,
                value BIGINT NOT NULL
            )",
            SEQUENCES_TABLE
        ))
        .execute(&pool)
        .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn table(collection: &str) -> Result<String, StoreError> {
        if !validate_ident(collection) {
            return Err(StoreError::InvalidIdentifier(collection.to_string()));
        }
        Ok(quote_ident(collection))
    }
}

fn map_db_error(collection: &str, err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &err {
        match db.code().as_deref() {
            // unique_violation
            Some("23505") => {
                let constraint = db.constraint().unwrap_or_default();
                let index = if constraint == format!("{}_pkey", collection) {
                    ID_INDEX.to_string()
                } else {
                    constraint.to_string()
                };
                return StoreError::DuplicateKey {
                    collection: collection.to_string(),
                    index,
                };
            }
            // undefined_table
            Some("42P01") => return StoreError::CollectionNotFound(collection.to_string()),
            _ => {}
        }
    }
    StoreError::Database(err)
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    async fn ensure_collection(&self, collection: &str) -> Result<(), StoreError> {
        let table = Self::table(collection)?;
        let physical = quote_ident(&physical_index_name(collection, DOC_INDEX));

        let mut tx = self.pool.begin().await?;
        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
                _id BIGINT PRIMARY KEY,
                doc JSONB NOT NULL
            )",
            table
        ))
        .execute(&mut *tx)
        .await?;
        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS {} ON {} USING GIN (doc jsonb_path_ops)",
            physical, table
        ))
        .execute(&mut *tx)
        .await?;
        sqlx::query(&format!("COMMENT ON INDEX {} IS {}", physical, quote_literal(DOC_INDEX)))
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn list_indexes(&self, collection: &str) -> Result<Vec<String>, StoreError> {
        let table = Self::table(collection)?;
        let relation: Option<String> = sqlx::query_scalar("SELECT to_regclass($1)::text")
            .bind(&table)
            .fetch_one(&self.pool)
            .await?;
        if relation.is_none() {
            return Err(StoreError::CollectionNotFound(collection.to_string()));
        }

        let rows = sqlx::query(
            "SELECT c.relname AS physical, obj_description(c.oid, 'pg_class') AS logical
             FROM pg_index i
             JOIN pg_class c ON c.oid = i.indexrelid
             WHERE i.indrelid = to_regclass($1)
             ORDER BY c.relname",
        )
        .bind(&table)
        .fetch_all(&self.pool)
        .await?;

        let primary_key = format!("{}_pkey", collection);
        let mut names = Vec::with_capacity(rows.len());
        for row in rows {
            let physical: String = row.try_get("physical")?;
            let logical: Option<String> = row.try_get("logical")?;
            names.push(match logical {
                Some(name) => name,
                None if physical == primary_key => ID_INDEX.to_string(),
                None => physical,
            });
        }
        Ok(names)
    }

    async fn create_index(&self, collection: &str, index: &IndexDefinition) -> Result<(), StoreError> {
        let table = Self::table(collection)?;
        let physical = quote_ident(&physical_index_name(collection, &index.name));

        let ddl = match &index.kind {
            IndexKind::Field { field, unique, sparse } => {
                let expr = format!("doc -> {}", quote_literal(field));
                let predicate = if *sparse {
                    format!(" WHERE {expr} IS NOT NULL AND {expr} <> 'null'::jsonb")
                } else {
                    String::new()
                };
                format!(
                    "CREATE {}INDEX IF NOT EXISTS {} ON {} (({})){}",
                    if *unique { "UNIQUE " } else { "" },
                    physical,
                    table,
                    expr,
                    predicate
                )
            }
            IndexKind::Text { fields } => format!(
                "CREATE INDEX IF NOT EXISTS {} ON {} USING GIN (({}))",
                physical,
                table,
                sql::tsvector_sql(fields)
            ),
        };

        let mut tx = self.pool.begin().await?;
        sqlx::query(&ddl)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_db_error(collection, e))?;
        sqlx::query(&format!(
            "COMMENT ON INDEX {} IS {}",
            physical,
            quote_literal(&index.name)
        ))
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn drop_index(&self, collection: &str, name: &str) -> Result<(), StoreError> {
        if name == ID_INDEX || name == DOC_INDEX {
            return Err(StoreError::Backend(format!(
                "cannot drop the store-owned index '{}' of '{}'",
                name, collection
            )));
        }
        let physical = quote_ident(&physical_index_name(collection, name));
        sqlx::query(&format!("DROP INDEX IF EXISTS {}", physical))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn save(
        &self,
        collection: &str,
        id: i64,
        document: Document,
        mode: SaveMode,
    ) -> Result<(), StoreError> {
        let table = Self::table(collection)?;
        let sql = match mode {
            SaveMode::Insert => format!("INSERT INTO {} (_id, doc) VALUES ($1, $2)", table),
            SaveMode::Upsert => format!(
                "INSERT INTO {} (_id, doc) VALUES ($1, $2)
                 ON CONFLICT (_id) DO UPDATE SET doc = EXCLUDED.doc",
                table
            ),
        };
        sqlx::query(&sql)
            .bind(id)
            .bind(JsonValue::Object(document))
            .execute(&self.pool)
            .await
            .map_err(|e| map_db_error(collection, e))?;
        Ok(())
    }

    async fn remove(&self, collection: &str, id: i64) -> Result<bool, StoreError> {
        let table = Self::table(collection)?;
        let result = sqlx::query(&format!("DELETE FROM {} WHERE _id = $1", table))
            .bind(id)
            .execute(&self.pool)
            .await;
        match result.map_err(|e| map_db_error(collection, e)) {
            Ok(done) => Ok(done.rows_affected() > 0),
            Err(StoreError::CollectionNotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn find(&self, collection: &str, request: &FindRequest) -> Result<Vec<Document>, StoreError> {
        let table = Self::table(collection)?;
        let mut qb = QueryBuilder::<Postgres>::new("SELECT doc FROM ");
        qb.push(table);
        qb.push(" WHERE ");
        sql::push_filter(&mut qb, &request.filter);
        if let Some(text) = &request.text {
            qb.push(" AND ");
            sql::push_text_match(&mut qb, text);
        }
        sql::push_order_by(&mut qb, &request.sort, request.text.as_ref());
        if let Some(limit) = request.limit {
            qb.push(" LIMIT ");
            qb.push_bind(limit as i64);
        }
        if request.skip > 0 {
            qb.push(" OFFSET ");
            qb.push_bind(request.skip as i64);
        }

        let rows = match qb.build().fetch_all(&self.pool).await {
            Ok(rows) => rows,
            Err(e) => {
                return match map_db_error(collection, e) {
                    StoreError::CollectionNotFound(_) => Ok(Vec::new()),
                    other => Err(other),
                }
            }
        };

        let mut documents = Vec::with_capacity(rows.len());
        for row in rows {
            match row.try_get::<JsonValue, _>("doc")? {
                JsonValue::Object(doc) => documents.push(doc),
                other => {
                    return Err(StoreError::Backend(format!(
                        "non-object document in '{}': {}",
                        collection, other
                    )))
                }
            }
        }
        Ok(documents)
    }

    async fn count(
        &self,
        collection: &str,
        filter: &Filter,
        text: Option<&TextQuery>,
    ) -> Result<u64, StoreError> {
        let table = Self::table(collection)?;
        let mut qb = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM ");
        qb.push(table);
        qb.push(" WHERE ");
        sql::push_filter(&mut qb, filter);
        if let Some(text) = text {
            qb.push(" AND ");
            sql::push_text_match(&mut qb, text);
        }
        match qb.build_query_scalar::<i64>().fetch_one(&self.pool).await {
            Ok(n) => Ok(n.max(0) as u64),
            Err(e) => match map_db_error(collection, e) {
                StoreError::CollectionNotFound(_) => Ok(0),
                other => Err(other),
            },
        }
    }

    async fn next_sequence(&self, name: &str) -> Result<i64, StoreError> {
        // Single statement: the row lock serializes concurrent allocations.
        let value: i64 = sqlx::query_scalar(&format!(
            "INSERT INTO {table} (name, value) VALUES ($1, 1)
             ON CONFLICT (name) DO UPDATE SET value = {table}.value + 1
             RETURNING value",
            table = SEQUENCES_TABLE
        ))
        .bind(name)
        .fetch_one(&self.pool)
        .await?;
        Ok(value)
    }
}
