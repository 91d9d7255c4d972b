use serde::Serialize;

use crate::config::EvaluationSettings;
use crate::error::Result;
use crate::indexer::sheet::Spreadsheet;
use crate::models::SearchResult;
use crate::rag::vector_store::stored_text;
use crate::rag::DocumentStore;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AccuracyReport {
    pub correct: usize,
    pub total: usize,
}

impl AccuracyReport {
    /// `None` when no row could be evaluated.
    pub fn accuracy(&self) -> Option<f64> {
        (self.total > 0).then(|| self.correct as f64 / self.total as f64)
    }
}

/// Unescaped text of every hit: id, contents and metadata values.
fn searchable_text(results: &[SearchResult]) -> String {
    let mut text = String::new();
    for result in results {
        text.push_str(&result.id.to_string());
        text.push('\n');
        text.push_str(&result.contents);
        text.push('\n');
        for value in result.metadata.values().filter_map(stored_text) {
            text.push_str(&value);
            text.push('\n');
        }
    }
    text
}

/// For each labeled row, search with the query column and count a hit when
/// the expected category appears anywhere in the retrieved text.
///
/// This is substring containment, not precision/recall: a short category
/// name can match inside an unrelated document.
pub async fn evaluate_accuracy(
    store: &DocumentStore,
    sheet: &Spreadsheet,
    columns: &EvaluationSettings,
    limit: usize,
) -> Result<AccuracyReport> {
    let mut report = AccuracyReport::default();
    tracing::info!(rows = sheet.len(), "Evaluating accuracy based on search results");

    for row in sheet.rows() {
        let Some(query) = row.get(&columns.query_column) else {
            tracing::warn!(row = row.index(), "Skipping row due to missing product name");
            continue;
        };

        let expected = match row.get(&columns.expected_column) {
            Some(value) if !value.trim().is_empty() => value,
            _ => {
                tracing::info!(row = row.index(), "Skipping row due to empty expected category");
                continue;
            }
        };

        let results = match store.search(query, limit, None).await {
            Ok(results) => results,
            Err(e) => {
                tracing::error!(row = row.index(), "Error searching for {:?}: {}", query, e);
                continue;
            }
        };

        report.total += 1;
        if searchable_text(&results).contains(expected) {
            report.correct += 1;
        }
    }

    match report.accuracy() {
        Some(accuracy) => tracing::info!("Evaluation completed. Accuracy: {:.4}", accuracy),
        None => tracing::warn!("No valid rows found to evaluate."),
    }
    Ok(report)
}
