pub mod embeddings;
pub mod memory;
pub mod pgvector;
pub mod vector_store;

use std::sync::Arc;

use reqwest::Client;
use uuid::Uuid;

use self::embeddings::{Embedder, OpenAIEmbedder};
use self::memory::InMemoryVectorStore;
use self::pgvector::PgVectorStore;
use self::vector_store::{DeleteSelector, UpsertReport, VectorBackend};
use crate::config::{Settings, StoreBackend};
use crate::error::Result;
use crate::models::{Document, Metadata, SearchResult};
use crate::retry::RetryPolicy;

/// Embedding-aware front of a [`VectorBackend`]: callers hand it text,
/// it hands the backend vectors.
#[derive(Clone)]
pub struct DocumentStore {
    embedder: Arc<dyn Embedder>,
    backend: Arc<dyn VectorBackend>,
}

impl DocumentStore {
    pub fn new(embedder: Arc<dyn Embedder>, backend: Arc<dyn VectorBackend>) -> Self {
        Self { embedder, backend }
    }

    /// OpenAI embeddings in front of the backend chosen by `store.backend`.
    pub async fn from_settings(settings: &Settings, client: Client) -> Result<Self> {
        let retry = RetryPolicy::from(&settings.retry);
        let embedder = OpenAIEmbedder::new(client, &settings.openai, retry)?;
        let dimensions = embedder.dimensions();

        let backend: Arc<dyn VectorBackend> = match settings.store.backend {
            StoreBackend::Postgres => {
                tracing::info!(table = %settings.database.table, "Connecting to Postgres vector store");
                Arc::new(PgVectorStore::connect(&settings.database, dimensions).await?)
            }
            StoreBackend::Memory => {
                tracing::warn!("Using in-memory vector store; documents are lost on restart");
                Arc::new(InMemoryVectorStore::new(dimensions))
            }
        };

        Ok(Self::new(Arc::new(embedder), backend))
    }

    pub fn dimensions(&self) -> usize {
        self.embedder.dimensions()
    }

    pub async fn get_embedding(&self, text: &str) -> Result<Vec<f32>> {
        self.embedder.embed(text).await
    }

    pub async fn ensure_schema(&self) -> Result<()> {
        self.backend.ensure_schema().await
    }

    pub async fn schema_exists(&self) -> Result<bool> {
        self.backend.schema_exists().await
    }

    pub async fn drop_schema(&self) -> Result<()> {
        self.backend.drop_schema().await
    }

    /// Best effort: rows with empty contents or a wrong-sized embedding are
    /// skipped here, rows the backend rejects are skipped there. Both show up
    /// in `skipped`.
    pub async fn upsert(&self, documents: &[Document]) -> Result<UpsertReport> {
        let dimensions = self.dimensions();
        let (valid, invalid): (Vec<&Document>, Vec<&Document>) = documents
            .iter()
            .partition(|d| !d.contents.trim().is_empty() && d.embedding.len() == dimensions);

        for doc in &invalid {
            tracing::error!(
                id = %doc.id,
                contents_len = doc.contents.len(),
                embedding_len = doc.embedding.len(),
                "Error processing row: missing contents or embedding"
            );
        }

        let valid: Vec<Document> = valid.into_iter().cloned().collect();
        let report = self.backend.upsert(&valid).await?;
        Ok(report.merge(UpsertReport { upserted: 0, skipped: invalid.len() }))
    }

    /// Nearest documents to `query_text`, best first. Results with
    /// `1 - distance <= 0` are dropped, so fewer than `limit` may come back.
    pub async fn search(
        &self,
        query_text: &str,
        limit: usize,
        metadata_filter: Option<&Metadata>,
    ) -> Result<Vec<SearchResult>> {
        let query_embedding = self.get_embedding(query_text).await?;
        let neighbors = self.backend.nearest(&query_embedding, limit, metadata_filter).await?;

        Ok(neighbors
            .into_iter()
            .map(|n| SearchResult {
                id: n.id,
                contents: n.contents,
                metadata: n.metadata,
                score: 1.0 - n.distance,
            })
            .filter(|r| r.score > 0.0)
            .collect())
    }

    pub async fn delete(
        &self,
        ids: Option<&[Uuid]>,
        metadata_filter: Option<&Metadata>,
        delete_all: bool,
    ) -> Result<u64> {
        let selector = DeleteSelector::from_options(ids, metadata_filter, delete_all)?;
        self.backend.delete(&selector).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ChatbotError;
    use crate::rag::memory::InMemoryVectorStore;
    use crate::testing::KeywordEmbedder;
    use serde_json::json;

    async fn store_with(embedder: KeywordEmbedder) -> (DocumentStore, Arc<InMemoryVectorStore>) {
        let backend = Arc::new(InMemoryVectorStore::new(embedder.dimensions()));
        backend.ensure_schema().await.unwrap();
        (DocumentStore::new(Arc::new(embedder), backend.clone()), backend)
    }

    fn doc(id: Uuid, contents: &str, embedding: Vec<f32>) -> Document {
        Document { id, metadata: Metadata::new(), contents: contents.to_string(), embedding }
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent_on_id() {
        let (store, backend) = store_with(KeywordEmbedder::catalog()).await;
        let id = Uuid::new_v4();

        store.upsert(&[doc(id, "Lọc dầu Toyota", vec![1.0, 0.0, 0.0, 0.0])]).await.unwrap();
        store.upsert(&[doc(id, "Lọc dầu Toyota", vec![1.0, 0.0, 0.0, 0.0])]).await.unwrap();
        assert_eq!(backend.len().await, 1);

        store.upsert(&[doc(id, "Lọc gió Honda", vec![0.0, 1.0, 0.0, 0.0])]).await.unwrap();
        assert_eq!(backend.len().await, 1);
        assert_eq!(backend.get(id).await.unwrap().contents, "Lọc gió Honda");
    }

    #[tokio::test]
    async fn test_upsert_skips_incomplete_rows() {
        let (store, backend) = store_with(KeywordEmbedder::catalog()).await;
        let report = store
            .upsert(&[
                doc(Uuid::new_v4(), "", vec![1.0, 0.0, 0.0, 0.0]),
                doc(Uuid::new_v4(), "Bugi", vec![]),
                doc(Uuid::new_v4(), "Bugi NGK", vec![0.0, 0.0, 1.0, 0.0]),
            ])
            .await
            .unwrap();
        assert_eq!(report, UpsertReport { upserted: 1, skipped: 2 });
        assert_eq!(backend.len().await, 1);
    }

    #[tokio::test]
    async fn test_search_orders_and_drops_non_positive_scores() {
        let (store, _) = store_with(KeywordEmbedder::catalog()).await;
        let near = doc(Uuid::new_v4(), "Lọc dầu Toyota", vec![1.0, 0.0, 0.0, 0.0]);
        let mid = doc(Uuid::new_v4(), "Lọc dầu", vec![0.8, 0.2, 0.0, 0.0]);
        let far = doc(Uuid::new_v4(), "Bugi NGK", vec![0.0, 0.0, 1.0, 0.0]);
        store.upsert(&[far, mid.clone(), near.clone()]).await.unwrap();

        let results = store.search("Lọc dầu Toyota", 10, None).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].id, near.id);
        assert_eq!(results[1].id, mid.id);
        assert!(results.windows(2).all(|w| w[0].score >= w[1].score));
        assert!(results.iter().all(|r| r.score > 0.0));
    }

    #[tokio::test]
    async fn test_search_respects_limit_and_filter() {
        let (store, _) = store_with(KeywordEmbedder::catalog()).await;
        let mut toyota = doc(Uuid::new_v4(), "Lọc dầu Toyota", vec![1.0, 0.0, 0.0, 0.0]);
        toyota.metadata.insert("Danh mục cấp 1".into(), json!("Phụ tùng"));
        let mut other = doc(Uuid::new_v4(), "Lọc dầu", vec![0.9, 0.0, 0.0, 0.0]);
        other.metadata.insert("Danh mục cấp 1".into(), json!("Dầu nhớt"));
        store.upsert(&[toyota.clone(), other]).await.unwrap();

        assert_eq!(store.search("Lọc dầu Toyota", 1, None).await.unwrap().len(), 1);

        let filter = json!({"Danh mục cấp 1": "Phụ tùng"}).as_object().cloned().unwrap();
        let results = store.search("Lọc dầu Toyota", 10, Some(&filter)).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, toyota.id);
    }

    #[tokio::test]
    async fn test_delete_selector_misuse_leaves_store_untouched() {
        let (store, backend) = store_with(KeywordEmbedder::catalog()).await;
        let id = Uuid::new_v4();
        store.upsert(&[doc(id, "Bugi NGK", vec![0.0, 0.0, 1.0, 0.0])]).await.unwrap();

        let none = store.delete(None, None, false).await;
        assert!(matches!(none, Err(ChatbotError::Usage(_))));
        let both = store.delete(Some(&[id]), None, true).await;
        assert!(matches!(both, Err(ChatbotError::Usage(_))));
        assert_eq!(backend.len().await, 1);

        assert_eq!(store.delete(None, None, true).await.unwrap(), 1);
        assert_eq!(backend.len().await, 0);
    }
}
