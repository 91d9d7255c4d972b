pub mod sheet;
pub mod source;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use self::sheet::Spreadsheet;
use crate::config::{IngestSettings, DEFAULT_CONTENT_COLUMN, DEFAULT_METADATA_COLUMNS};
use crate::error::{ChatbotError, Result};
use crate::models::{Document, Metadata};
use crate::rag::vector_store::UpsertReport;
use crate::rag::DocumentStore;

/// Namespace for content-derived document ids.
pub const STABLE_ID_NAMESPACE: Uuid = Uuid::from_u128(0x6c0f_2b8e_93d1_4f6a_a1c4_5e7d_0b9a_3f21);

#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub content_column: String,
    pub metadata_columns: Vec<String>,
    /// Embedding calls in flight at once; 1 keeps rows strictly sequential.
    pub concurrency: usize,
    /// When set, ids are UUIDv5 of the contents so re-ingestion merges.
    pub id_namespace: Option<Uuid>,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            content_column: DEFAULT_CONTENT_COLUMN.to_string(),
            metadata_columns: DEFAULT_METADATA_COLUMNS.iter().map(|c| c.to_string()).collect(),
            concurrency: 1,
            id_namespace: None,
        }
    }
}

impl From<&IngestSettings> for IngestOptions {
    fn from(settings: &IngestSettings) -> Self {
        Self {
            content_column: settings.content_column.clone(),
            metadata_columns: settings.metadata_columns.clone(),
            concurrency: settings.concurrency.max(1),
            id_namespace: settings.stable_ids.then_some(STABLE_ID_NAMESPACE),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub rows_total: usize,
    /// Rows whose content column was missing or blank.
    pub rows_empty: usize,
    /// Rows whose embedding failed.
    pub rows_failed: usize,
    /// `None` when no row produced a document.
    pub upsert: Option<UpsertReport>,
}

impl IngestReport {
    pub fn nothing_to_do(&self) -> bool {
        self.upsert.is_none()
    }

    pub fn ingested(&self) -> usize {
        self.upsert.map_or(0, |u| u.upserted)
    }

    pub fn skipped(&self) -> usize {
        self.rows_empty + self.rows_failed + self.upsert.map_or(0, |u| u.skipped)
    }
}

struct Candidate {
    row: usize,
    contents: String,
    metadata: Metadata,
}

fn candidate(row: sheet::Row<'_>, options: &IngestOptions) -> Option<Candidate> {
    let contents = row.get(&options.content_column)?.trim();
    if contents.is_empty() {
        return None;
    }

    let metadata = options
        .metadata_columns
        .iter()
        .filter_map(|column| {
            row.get(column)
                .map(|value| (column.clone(), JsonValue::String(value.to_string())))
        })
        .collect();

    Some(Candidate {
        row: row.index(),
        contents: contents.to_string(),
        metadata,
    })
}

/// Checks that can reject a sheet before anything is written.
pub fn validate(sheet: &Spreadsheet, options: &IngestOptions) -> Result<()> {
    if !sheet.has_column(&options.content_column) {
        return Err(ChatbotError::usage(format!(
            "Input data must contain the column '{}'.",
            options.content_column
        )));
    }
    Ok(())
}

/// Drop the table, recreate it and ingest `sheet`. The sheet is validated
/// first, so a rejected sheet leaves the existing catalog in place.
pub async fn replace_catalog(
    store: &DocumentStore,
    sheet: &Spreadsheet,
    options: &IngestOptions,
) -> Result<IngestReport> {
    validate(sheet, options)?;

    if store.schema_exists().await? {
        tracing::info!("Table already exists. Dropping and recreating it.");
        store.drop_schema().await?;
    }
    store.ensure_schema().await?;

    ingest(store, sheet, options).await
}

/// Embed every row with non-empty content and upsert the results as one
/// batch. Row-level failures are logged and counted, never raised.
pub async fn ingest(
    store: &DocumentStore,
    sheet: &Spreadsheet,
    options: &IngestOptions,
) -> Result<IngestReport> {
    validate(sheet, options)?;

    let mut report = IngestReport {
        rows_total: sheet.len(),
        ..IngestReport::default()
    };

    let mut candidates = Vec::with_capacity(sheet.len());
    for row in sheet.rows() {
        match candidate(row, options) {
            Some(c) => candidates.push(c),
            None => {
                tracing::info!(row = row.index(), "Skipping row due to empty content");
                report.rows_empty += 1;
            }
        }
    }

    let embedded: Vec<(Candidate, Result<Vec<f32>>)> = stream::iter(candidates)
        .map(|c| async move {
            let embedding = store.get_embedding(&c.contents).await;
            (c, embedding)
        })
        .buffered(options.concurrency.max(1))
        .collect()
        .await;

    let mut documents = Vec::with_capacity(embedded.len());
    for (c, embedding) in embedded {
        match embedding {
            Ok(embedding) => {
                let id = match options.id_namespace {
                    Some(namespace) => Uuid::new_v5(&namespace, c.contents.as_bytes()),
                    None => Uuid::new_v4(),
                };
                documents.push(Document {
                    id,
                    metadata: c.metadata,
                    contents: c.contents,
                    embedding,
                });
            }
            Err(e) => {
                tracing::error!(row = c.row, "Error processing row: {}", e);
                report.rows_failed += 1;
            }
        }
    }

    if documents.is_empty() {
        tracing::warn!("No valid data to upsert.");
        return Ok(report);
    }

    let upsert = store.upsert(&documents).await?;
    tracing::info!(
        upserted = upsert.upserted,
        skipped = upsert.skipped,
        rows_empty = report.rows_empty,
        rows_failed = report.rows_failed,
        "Ingestion finished"
    );
    report.upsert = Some(upsert);
    Ok(report)
}
