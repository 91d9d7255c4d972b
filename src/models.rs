use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Free-form, unvalidated key/value metadata attached to a document.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: Uuid,
    pub metadata: Metadata,
    pub contents: String,
    pub embedding: Vec<f32>,
}

/// A nearest-neighbor hit. `score` is `1 - L2 distance`, always positive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: Uuid,
    pub contents: String,
    pub metadata: Metadata,
    pub score: f64,
}

// Chat completion wire types (OpenAI-compatible)

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system".to_string(), content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".to_string(), content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: "assistant".to_string(), content: content.into() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub model: String,
    pub choices: Vec<Choice>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Choice {
    pub index: u32,
    pub message: Message,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

// HTTP request/response bodies

#[derive(Debug, Clone, Deserialize)]
pub struct UploadQuery {
    #[serde(default)]
    pub url_str: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResponse {
    pub message: String,
    pub rows_total: usize,
    pub ingested: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserRequest {
    pub input_user: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccEval {
    pub path_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccuracyResponse {
    pub accuracy: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}
