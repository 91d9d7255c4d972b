use std::io::Read;
use std::path::Path;

use crate::error::{ChatbotError, Result};

/// A header row plus data rows. Empty cells are `None`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Spreadsheet {
    headers: Vec<String>,
    rows: Vec<Vec<Option<String>>>,
}

#[derive(Debug, Clone, Copy)]
pub struct Row<'a> {
    index: usize,
    headers: &'a [String],
    cells: &'a [Option<String>],
}

impl<'a> Row<'a> {
    /// Zero-based position among the data rows.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Non-null value of `column`, if the column exists in this sheet.
    pub fn get(&self, column: &str) -> Option<&'a str> {
        let position = self.headers.iter().position(|h| h == column)?;
        self.cells.get(position)?.as_deref()
    }
}

fn cell(value: String) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

impl Spreadsheet {
    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self> {
        let mut csv_reader = csv::ReaderBuilder::new().flexible(true).from_reader(reader);

        let headers: Vec<String> = csv_reader
            .headers()
            .map_err(|e| ChatbotError::usage(format!("Malformed CSV header: {}", e)))?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();

        let mut rows = Vec::new();
        for record in csv_reader.records() {
            let record = record.map_err(|e| ChatbotError::usage(format!("Malformed CSV record: {}", e)))?;
            rows.push(record.iter().map(|v| cell(v.to_string())).collect());
        }

        Ok(Self { headers, rows })
    }

    pub fn from_csv_str(text: &str) -> Result<Self> {
        Self::from_csv_reader(text.as_bytes())
    }

    /// First worksheet of an `.xlsx` workbook; its first row is the header.
    pub fn from_xlsx_path(path: &Path) -> Result<Self> {
        use calamine::{open_workbook, Reader, Xlsx};

        let mut workbook: Xlsx<_> = open_workbook(path)
            .map_err(|e| ChatbotError::usage(format!("Failed to open XLSX {}: {}", path.display(), e)))?;

        let sheet_name = workbook
            .sheet_names()
            .first()
            .cloned()
            .ok_or_else(|| ChatbotError::usage(format!("No worksheet in {}", path.display())))?;
        let range = workbook
            .worksheet_range(&sheet_name)
            .map_err(|e| ChatbotError::usage(format!("Failed to read worksheet {}: {}", sheet_name, e)))?;

        let mut rows = range.rows();
        let headers = rows
            .next()
            .map(|row| row.iter().map(|c| c.to_string().trim().to_string()).collect())
            .unwrap_or_default();
        let rows = rows
            .map(|row| row.iter().map(|c| cell(c.to_string())).collect())
            .collect();

        Ok(Self { headers, rows })
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.headers.iter().any(|h| h == column)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> impl Iterator<Item = Row<'_>> {
        self.rows.iter().enumerate().map(|(index, cells)| Row {
            index,
            headers: &self.headers,
            cells,
        })
    }
}
