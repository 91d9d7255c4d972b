use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::OpenAISettings;
use crate::error::{ChatbotError, Result};
use crate::retry::RetryPolicy;

const SERVICE: &str = "embeddings";

/// Turns text into a fixed-length vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    fn dimensions(&self) -> usize;
}

/// Providers treat newlines as token noise; submit single-line text.
pub fn normalize_input(text: &str) -> String {
    text.replace("\r\n", " ").replace('\n', " ")
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: [&'a str; 1],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// Client for an OpenAI-compatible `/embeddings` endpoint.
pub struct OpenAIEmbedder {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    dimensions: usize,
    retry: RetryPolicy,
}

impl OpenAIEmbedder {
    pub fn new(client: Client, settings: &OpenAISettings, retry: RetryPolicy) -> Result<Self> {
        if settings.api_key.is_empty() {
            return Err(ChatbotError::usage("OpenAI API key must not be empty"));
        }

        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone(),
            model: settings.embedding_model.clone(),
            dimensions: settings.embedding_dimensions,
            retry,
        })
    }

    async fn request(&self, input: &str) -> Result<Vec<f32>> {
        let url = format!("{}/embeddings", self.base_url);
        let body = EmbeddingRequest { model: &self.model, input: [input] };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ChatbotError::from_transport(SERVICE, e))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(ChatbotError::from_status(SERVICE, status, error_text));
        }

        let parsed: EmbeddingResponse = response.json().await.map_err(|e| {
            ChatbotError::PermanentService { service: SERVICE, message: format!("malformed response: {}", e) }
        })?;

        let embedding = parsed.data.into_iter().next().map(|d| d.embedding).ok_or_else(|| {
            ChatbotError::PermanentService { service: SERVICE, message: "empty response".to_string() }
        })?;

        if embedding.len() != self.dimensions {
            return Err(ChatbotError::PermanentService {
                service: SERVICE,
                message: format!("expected {} dimensions, got {}", self.dimensions, embedding.len()),
            });
        }

        Ok(embedding)
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let input = normalize_input(text);
        tracing::debug!(model = %self.model, text_len = input.len(), "Requesting embedding");
        self.retry.run("embed", || self.request(&input)).await
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}
