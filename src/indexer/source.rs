use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;

use super::sheet::Spreadsheet;
use crate::error::{ChatbotError, Result};
use crate::retry::RetryPolicy;

const SERVICE: &str = "spreadsheet export";
const SHEETS_PREFIX: &str = "https://docs.google.com/spreadsheets/";

static SHEET_ID_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"/d/([a-zA-Z0-9_-]+)/").unwrap());

static GID_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"gid=(\d+)").unwrap());

/// A published Google Sheets tab, addressed by document id and tab gid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedSheet {
    pub sheet_id: String,
    pub gid: String,
}

impl PublishedSheet {
    pub fn parse(url: &str) -> Result<Self> {
        if !url.starts_with(SHEETS_PREFIX) {
            return Err(ChatbotError::usage(format!(
                "Invalid Google Sheets URL. URL must start with '{}'.",
                SHEETS_PREFIX
            )));
        }

        let sheet_id = SHEET_ID_PATTERN
            .captures(url)
            .map(|c| c[1].to_string())
            .ok_or_else(|| ChatbotError::usage("Invalid Google Sheets URL. Could not extract file ID."))?;

        let gid = GID_PATTERN
            .captures(url)
            .map(|c| c[1].to_string())
            .ok_or_else(|| ChatbotError::usage("Invalid Google Sheets URL. Could not extract gid."))?;

        Ok(Self { sheet_id, gid })
    }

    pub fn export_url(&self) -> String {
        format!(
            "https://docs.google.com/spreadsheets/d/{}/export?format=csv&gid={}",
            self.sheet_id, self.gid
        )
    }

    async fn download(&self, client: &Client) -> Result<String> {
        let response = client
            .get(self.export_url())
            .send()
            .await
            .map_err(|e| ChatbotError::from_transport(SERVICE, e))?;

        let status = response.status();
        if status.is_client_error() && status != reqwest::StatusCode::TOO_MANY_REQUESTS {
            // Unpublished or private sheets answer 4xx; that is the caller's input.
            return Err(ChatbotError::usage(format!(
                "Failed to load data from the provided URL: {}",
                status
            )));
        }
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(ChatbotError::from_status(SERVICE, status, error_text));
        }

        response.text().await.map_err(|e| ChatbotError::from_transport(SERVICE, e))
    }

    pub async fn fetch(&self, client: &Client, retry: &RetryPolicy) -> Result<Spreadsheet> {
        tracing::info!(sheet_id = %self.sheet_id, gid = %self.gid, "Loading published sheet");
        let body = retry.run("sheet_export", || self.download(client)).await?;
        Spreadsheet::from_csv_str(&body)
    }
}

/// Parse a published-sheet URL and download the tab as a table.
pub async fn load_sheet_url(url: &str, client: &Client, retry: &RetryPolicy) -> Result<Spreadsheet> {
    PublishedSheet::parse(url)?.fetch(client, retry).await
}
