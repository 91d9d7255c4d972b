//! Process-local backend with brute-force L2 search.
//!
//! Used for development (`store.backend = "memory"`) and tests. Documents are
//! kept in insertion order, so equal distances come back in that order.

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::vector_store::{matches_filter, DeleteSelector, Neighbor, UpsertReport, VectorBackend};
use crate::error::{ChatbotError, Result};
use crate::models::{Document, Metadata};

pub struct InMemoryVectorStore {
    dimensions: usize,
    /// `None` until `ensure_schema` runs, mirroring a missing table.
    table: RwLock<Option<Vec<Document>>>,
}

impl InMemoryVectorStore {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            table: RwLock::new(None),
        }
    }

    pub async fn len(&self) -> usize {
        self.table.read().await.as_ref().map_or(0, Vec::len)
    }

    pub async fn get(&self, id: uuid::Uuid) -> Option<Document> {
        let table = self.table.read().await;
        table.as_ref()?.iter().find(|d| d.id == id).cloned()
    }
}

fn missing_table() -> ChatbotError {
    ChatbotError::Storage("document table does not exist".to_string())
}

pub fn l2_distance(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = f64::from(*x) - f64::from(*y);
            d * d
        })
        .sum::<f64>()
        .sqrt()
}

#[async_trait]
impl VectorBackend for InMemoryVectorStore {
    async fn ensure_schema(&self) -> Result<()> {
        let mut table = self.table.write().await;
        if table.is_none() {
            *table = Some(Vec::new());
        }
        Ok(())
    }

    async fn schema_exists(&self) -> Result<bool> {
        Ok(self.table.read().await.is_some())
    }

    async fn drop_schema(&self) -> Result<()> {
        *self.table.write().await = None;
        Ok(())
    }

    async fn upsert(&self, documents: &[Document]) -> Result<UpsertReport> {
        let mut guard = self.table.write().await;
        let table = guard.as_mut().ok_or_else(missing_table)?;
        let mut report = UpsertReport::default();

        for doc in documents {
            if doc.embedding.len() != self.dimensions {
                tracing::error!(
                    id = %doc.id,
                    "Error processing row: expected {} dimensions, not {}",
                    self.dimensions,
                    doc.embedding.len()
                );
                report.skipped += 1;
                continue;
            }
            match table.iter_mut().find(|d| d.id == doc.id) {
                Some(existing) => *existing = doc.clone(),
                None => table.push(doc.clone()),
            }
            report.upserted += 1;
        }

        Ok(report)
    }

    async fn nearest(
        &self,
        embedding: &[f32],
        limit: usize,
        filter: Option<&Metadata>,
    ) -> Result<Vec<Neighbor>> {
        let guard = self.table.read().await;
        let table = guard.as_ref().ok_or_else(missing_table)?;

        let mut hits: Vec<Neighbor> = table
            .iter()
            .filter(|doc| filter.map_or(true, |f| matches_filter(&doc.metadata, f)))
            .map(|doc| Neighbor {
                id: doc.id,
                contents: doc.contents.clone(),
                metadata: doc.metadata.clone(),
                distance: l2_distance(&doc.embedding, embedding),
            })
            .collect();

        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        hits.truncate(limit);
        Ok(hits)
    }

    async fn delete(&self, selector: &DeleteSelector) -> Result<u64> {
        let mut guard = self.table.write().await;
        let table = guard.as_mut().ok_or_else(missing_table)?;
        let before = table.len();

        match selector {
            DeleteSelector::All => table.clear(),
            DeleteSelector::Ids(ids) => table.retain(|d| !ids.contains(&d.id)),
            DeleteSelector::Metadata(filter) => table.retain(|d| !matches_filter(&d.metadata, filter)),
        }

        Ok((before - table.len()) as u64)
    }
}
