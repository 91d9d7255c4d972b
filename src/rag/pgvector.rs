use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{Acquire, PgPool, Row};

use super::vector_store::{filter_text, DeleteSelector, Neighbor, UpsertReport, VectorBackend};
use crate::config::DatabaseSettings;
use crate::error::{ChatbotError, Result};
use crate::models::{Document, Metadata};

/// Documents in a Postgres table with a pgvector `vector(N)` column,
/// searched with the `<->` (L2) operator.
pub struct PgVectorStore {
    pool: PgPool,
    table: String,
    dimensions: usize,
}

impl PgVectorStore {
    pub async fn connect(settings: &DatabaseSettings, dimensions: usize) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .acquire_timeout(Duration::from_secs(settings.acquire_timeout_secs))
            .connect(&settings.url)
            .await?;

        Self::from_pool(pool, &settings.table, dimensions)
    }

    pub fn from_pool(pool: PgPool, table: &str, dimensions: usize) -> Result<Self> {
        Ok(Self {
            pool,
            table: sanitize_table_name(table)?,
            dimensions,
        })
    }

    fn upsert_sql(&self) -> String {
        format!(
            "INSERT INTO {} (id, record_metadata, contents, embedding) \
             VALUES ($1, $2, $3, $4::vector) \
             ON CONFLICT (id) DO UPDATE SET \
                record_metadata = EXCLUDED.record_metadata, \
                contents = EXCLUDED.contents, \
                embedding = EXCLUDED.embedding",
            self.table
        )
    }

    fn search_sql(&self, filter: Option<&Metadata>) -> (String, Vec<String>) {
        let (clause, binds) = match filter {
            Some(filter) if !filter.is_empty() => {
                let (clause, binds) = filter_clause(filter, 2);
                (format!(" WHERE {}", clause), binds)
            }
            _ => (String::new(), Vec::new()),
        };
        let sql = format!(
            "SELECT id, record_metadata, contents, (embedding <-> $1::vector) AS distance \
             FROM {}{} ORDER BY distance LIMIT ${}",
            self.table,
            clause,
            binds.len() + 2
        );
        (sql, binds)
    }
}

/// Only alphanumerics and underscores survive; the result is interpolated
/// into DDL.
pub fn sanitize_table_name(name: &str) -> Result<String> {
    let sanitized: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if sanitized.is_empty() || sanitized.starts_with(|c: char| c.is_ascii_digit()) {
        return Err(ChatbotError::usage(format!("invalid table name: {:?}", name)));
    }
    Ok(sanitized)
}

/// pgvector text input format: `[1,2,3]`.
pub fn vector_literal(embedding: &[f32]) -> String {
    let parts: Vec<String> = embedding.iter().map(|v| v.to_string()).collect();
    format!("[{}]", parts.join(","))
}

/// `record_metadata ->> $n = $n+1 AND ...` with the key/value binds in order.
pub fn filter_clause(filter: &Metadata, first_param: usize) -> (String, Vec<String>) {
    let mut clauses = Vec::with_capacity(filter.len());
    let mut binds = Vec::with_capacity(filter.len() * 2);
    for (i, (key, value)) in filter.iter().enumerate() {
        let key_param = first_param + i * 2;
        clauses.push(format!("record_metadata ->> ${} = ${}", key_param, key_param + 1));
        binds.push(key.clone());
        binds.push(filter_text(value));
    }
    (clauses.join(" AND "), binds)
}

#[async_trait]
impl VectorBackend for PgVectorStore {
    async fn ensure_schema(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("CREATE EXTENSION IF NOT EXISTS vector")
            .execute(&mut *tx)
            .await?;

        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                id UUID PRIMARY KEY,
                record_metadata JSONB,
                contents TEXT NOT NULL,
                embedding vector({}) NOT NULL
            )
            "#,
            self.table, self.dimensions
        ))
        .execute(&mut *tx)
        .await?;

        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS {0}_embedding_l2_idx ON {0} USING hnsw (embedding vector_l2_ops)",
            self.table
        ))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        tracing::info!(table = %self.table, dimensions = self.dimensions, "Document table ready");
        Ok(())
    }

    async fn schema_exists(&self) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM information_schema.tables \
             WHERE table_schema = current_schema() AND table_name = $1)",
        )
        .bind(&self.table)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn drop_schema(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(&format!("DROP TABLE IF EXISTS {}", self.table))
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        tracing::info!(table = %self.table, "Document table dropped");
        Ok(())
    }

    async fn upsert(&self, documents: &[Document]) -> Result<UpsertReport> {
        let mut report = UpsertReport::default();
        if documents.is_empty() {
            return Ok(report);
        }

        let sql = self.upsert_sql();
        let mut tx = self.pool.begin().await?;

        for doc in documents {
            tracing::info!(id = %doc.id, metadata = ?doc.metadata, "Processing row");

            // A failed statement aborts the enclosing transaction, so each row
            // gets its own savepoint.
            let mut savepoint = tx.begin().await?;
            let result = sqlx::query(&sql)
                .bind(doc.id)
                .bind(Json(&doc.metadata))
                .bind(&doc.contents)
                .bind(vector_literal(&doc.embedding))
                .execute(&mut *savepoint)
                .await;

            match result {
                Ok(_) => {
                    savepoint.commit().await?;
                    report.upserted += 1;
                }
                Err(e) => {
                    tracing::error!(id = %doc.id, "Error processing row: {}", e);
                    savepoint.rollback().await?;
                    report.skipped += 1;
                }
            }
        }

        tx.commit().await?;
        Ok(report)
    }

    async fn nearest(
        &self,
        embedding: &[f32],
        limit: usize,
        filter: Option<&Metadata>,
    ) -> Result<Vec<Neighbor>> {
        let (sql, binds) = self.search_sql(filter);

        let mut query = sqlx::query(&sql).bind(vector_literal(embedding));
        for value in &binds {
            query = query.bind(value);
        }
        let rows = query
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| -> Result<Neighbor> {
                let metadata: Option<Json<Metadata>> = row.try_get("record_metadata")?;
                Ok(Neighbor {
                    id: row.try_get("id")?,
                    contents: row.try_get("contents")?,
                    metadata: metadata.map(|m| m.0).unwrap_or_default(),
                    distance: row.try_get("distance")?,
                })
            })
            .collect()
    }

    async fn delete(&self, selector: &DeleteSelector) -> Result<u64> {
        let mut tx = self.pool.begin().await?;

        let result = match selector {
            DeleteSelector::All => {
                sqlx::query(&format!("DELETE FROM {}", self.table))
                    .execute(&mut *tx)
                    .await?
            }
            DeleteSelector::Ids(ids) => {
                sqlx::query(&format!("DELETE FROM {} WHERE id = ANY($1)", self.table))
                    .bind(ids)
                    .execute(&mut *tx)
                    .await?
            }
            DeleteSelector::Metadata(filter) => {
                let (clause, binds) = filter_clause(filter, 1);
                let sql = format!("DELETE FROM {} WHERE {}", self.table, clause);
                let mut query = sqlx::query(&sql);
                for value in &binds {
                    query = query.bind(value);
                }
                query.execute(&mut *tx).await?
            }
        };

        tx.commit().await?;
        tracing::info!(table = %self.table, rows = result.rows_affected(), "Deleted documents");
        Ok(result.rows_affected())
    }
}
