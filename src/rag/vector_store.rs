use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::{ChatbotError, Result};
use crate::models::{Document, Metadata};

/// Storage side of the document store. Backends persist documents and answer
/// L2 nearest-neighbor queries; embedding happens above them.
#[async_trait]
pub trait VectorBackend: Send + Sync {
    /// Create the table and index if absent. Idempotent.
    async fn ensure_schema(&self) -> Result<()>;

    async fn schema_exists(&self) -> Result<bool>;

    /// Remove the table and every stored document.
    async fn drop_schema(&self) -> Result<()>;

    /// Merge by id. A failing row is logged and skipped; the rest commit.
    async fn upsert(&self, documents: &[Document]) -> Result<UpsertReport>;

    /// Up to `limit` documents by ascending L2 distance. Ties come back in
    /// whatever order the backend produces; callers must not rely on it.
    async fn nearest(
        &self,
        embedding: &[f32],
        limit: usize,
        filter: Option<&Metadata>,
    ) -> Result<Vec<Neighbor>>;

    /// Returns the number of rows removed.
    async fn delete(&self, selector: &DeleteSelector) -> Result<u64>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct Neighbor {
    pub id: Uuid,
    pub contents: String,
    pub metadata: Metadata,
    pub distance: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UpsertReport {
    pub upserted: usize,
    pub skipped: usize,
}

impl UpsertReport {
    pub fn merge(self, other: UpsertReport) -> UpsertReport {
        UpsertReport {
            upserted: self.upserted + other.upserted,
            skipped: self.skipped + other.skipped,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeleteSelector {
    Ids(Vec<Uuid>),
    Metadata(Metadata),
    All,
}

impl DeleteSelector {
    /// Exactly one selector must be given. An empty id list or an empty
    /// filter counts as not given.
    pub fn from_options(
        ids: Option<&[Uuid]>,
        metadata_filter: Option<&Metadata>,
        delete_all: bool,
    ) -> Result<Self> {
        let ids = ids.filter(|ids| !ids.is_empty());
        let metadata_filter = metadata_filter.filter(|f| !f.is_empty());

        let provided = [ids.is_some(), metadata_filter.is_some(), delete_all]
            .iter()
            .filter(|p| **p)
            .count();
        if provided != 1 {
            return Err(ChatbotError::usage(
                "Provide exactly one of: ids, metadata_filter, or delete_all",
            ));
        }

        Ok(match (ids, metadata_filter) {
            (Some(ids), _) => Self::Ids(ids.to_vec()),
            (_, Some(filter)) => Self::Metadata(filter.clone()),
            _ => Self::All,
        })
    }
}

/// Text form of a stored metadata value, as Postgres `->>` renders it.
pub fn stored_text(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::Null => None,
        JsonValue::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Filter values are coerced to text before comparison.
pub fn filter_text(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub fn matches_filter(metadata: &Metadata, filter: &Metadata) -> bool {
    filter.iter().all(|(key, expected)| {
        metadata
            .get(key)
            .and_then(stored_text)
            .is_some_and(|actual| actual == filter_text(expected))
    })
}
