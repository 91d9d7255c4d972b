use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::config::OpenAISettings;
use crate::error::{ChatbotError, Result};
use crate::models::{ChatRequest, ChatResponse, Message};
use crate::retry::RetryPolicy;

const SERVICE: &str = "completion";

/// Shared HTTP client for the embedding, completion and sheet-export calls.
pub fn http_client(settings: &OpenAISettings) -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(settings.request_timeout_secs))
        .build()
        .map_err(|e| ChatbotError::PermanentService {
            service: "http client",
            message: e.to_string(),
        })
}

/// Something that turns a conversation into the next assistant message.
#[async_trait]
pub trait Completer: Send + Sync {
    async fn complete(&self, messages: Vec<Message>) -> Result<String>;
}

/// Client for an OpenAI-compatible `/chat/completions` endpoint.
pub struct ChatCompletionClient {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    retry: RetryPolicy,
}

impl ChatCompletionClient {
    pub fn new(client: Client, settings: &OpenAISettings, retry: RetryPolicy) -> Result<Self> {
        if settings.api_key.is_empty() {
            return Err(ChatbotError::usage("OpenAI API key must not be empty"));
        }

        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone(),
            model: settings.completion_model.clone(),
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
            retry,
        })
    }

    fn build_request(&self, messages: Vec<Message>) -> ChatRequest {
        ChatRequest {
            model: self.model.clone(),
            messages,
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
        }
    }

    pub async fn chat_completion(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let url = format!("{}/chat/completions", self.base_url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| ChatbotError::from_transport(SERVICE, e))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(ChatbotError::from_status(SERVICE, status, error_text));
        }

        response.json().await.map_err(|e| ChatbotError::PermanentService {
            service: SERVICE,
            message: format!("malformed response: {}", e),
        })
    }
}

#[async_trait]
impl Completer for ChatCompletionClient {
    async fn complete(&self, messages: Vec<Message>) -> Result<String> {
        let request = self.build_request(messages);
        let response = self.retry.run("chat_completion", || self.chat_completion(&request)).await?;

        response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| ChatbotError::PermanentService {
                service: SERVICE,
                message: "response contained no choices".to_string(),
            })
    }
}
