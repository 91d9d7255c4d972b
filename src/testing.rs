//! Deterministic stand-ins for the external embedding and completion APIs.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{ChatbotError, Result};
use crate::models::Message;
use crate::proxy::Completer;
use crate::rag::embeddings::{normalize_input, Embedder};

/// Each keyword owns one axis; a text embeds to the unit vector over the
/// axes of the keywords it contains, or to zero when it contains none.
pub struct KeywordEmbedder {
    keywords: Vec<(String, usize)>,
    dimensions: usize,
    fail_on: Option<String>,
    calls: AtomicUsize,
}

impl KeywordEmbedder {
    pub fn new(keywords: &[(&str, usize)], dimensions: usize) -> Self {
        Self {
            keywords: keywords.iter().map(|(k, axis)| (k.to_lowercase(), *axis)).collect(),
            dimensions,
            fail_on: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Four axes: toyota, honda, bugi, ắc quy.
    pub fn catalog() -> Self {
        Self::new(&[("toyota", 0), ("honda", 1), ("bugi", 2), ("ắc quy", 3)], 4)
    }

    pub fn failing_on(mut self, needle: &str) -> Self {
        self.fail_on = Some(needle.to_string());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Embedder for KeywordEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(needle) = &self.fail_on {
            if text.contains(needle.as_str()) {
                return Err(ChatbotError::PermanentService {
                    service: "embeddings",
                    message: format!("refused {:?}", text),
                });
            }
        }

        let text = normalize_input(text).to_lowercase();
        let mut vector = vec![0.0f32; self.dimensions];
        for (keyword, axis) in &self.keywords {
            if text.contains(keyword.as_str()) {
                vector[*axis] = 1.0;
            }
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|v| *v /= norm);
        }
        Ok(vector)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

/// Returns a canned reply and remembers every conversation it was sent.
pub struct RecordingCompleter {
    reply: String,
    conversations: Mutex<Vec<Vec<Message>>>,
}

impl RecordingCompleter {
    pub fn new(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            conversations: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.conversations.lock().unwrap().len()
    }

    pub fn last(&self) -> Option<Vec<Message>> {
        self.conversations.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl Completer for RecordingCompleter {
    async fn complete(&self, messages: Vec<Message>) -> Result<String> {
        self.conversations.lock().unwrap().push(messages);
        Ok(self.reply.clone())
    }
}
