use std::sync::Arc;

use crate::config::DEFAULT_METADATA_COLUMNS;
use crate::error::{ChatbotError, Result};
use crate::models::{Message, SearchResult};
use crate::proxy::Completer;
use crate::rag::vector_store::stored_text;
use crate::rag::DocumentStore;

pub const SYSTEM_PROMPT: &str = "Bạn là một chatbot hỗ trợ khách hàng về các phụ tùng ô tô. \
Khi người dùng hỏi về sản phẩm, hãy tìm các từ khóa liên quan trong câu hỏi và cung cấp thông tin tương ứng, \
chẳng hạn như tên sản phẩm, danh mục, hoặc các đặc điểm chính. \
Trả lời nên ngắn gọn và có tính chuyên nghiệp, chỉ tập trung vào các từ hoặc câu liên quan trực tiếp \
đến sản phẩm hoặc dịch vụ mà người dùng yêu cầu.";

pub const NO_RELATED_INFORMATION: &str = "No related information found.";

/// Bullet block handed to the model as context: id, contents and the three
/// upper category levels of each hit.
pub fn format_context(results: &[SearchResult]) -> String {
    if results.is_empty() {
        return NO_RELATED_INFORMATION.to_string();
    }

    let mut context = String::new();
    for result in results {
        context.push_str(&format!("- ID tài liệu: {}\n", result.id));
        context.push_str(&format!("- Nội dung: {}\n", result.contents));
        for level in DEFAULT_METADATA_COLUMNS {
            let value = result.metadata.get(level).and_then(stored_text).unwrap_or_default();
            context.push_str(&format!("- {}: {}\n", level, value));
        }
        context.push('\n');
    }
    context
}

/// Retrieval followed by completion.
pub struct Responder {
    store: DocumentStore,
    completer: Arc<dyn Completer>,
    top_k: usize,
}

impl Responder {
    pub fn new(store: DocumentStore, completer: Arc<dyn Completer>, top_k: usize) -> Self {
        Self { store, completer, top_k }
    }

    pub fn store(&self) -> &DocumentStore {
        &self.store
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    pub async fn respond(&self, query: &str) -> Result<String> {
        let query = query.trim();
        if query.is_empty() {
            tracing::info!("Input required");
            return Err(ChatbotError::usage("No input provided. Please provide a valid input."));
        }

        let related = self.store.search(query, self.top_k, None).await?;
        if related.is_empty() {
            return Err(ChatbotError::NotFound("No relevant documents found.".to_string()));
        }
        tracing::debug!(hits = related.len(), "Retrieved related documents");

        let messages = vec![
            Message::system(SYSTEM_PROMPT),
            Message::user(query),
            Message::assistant(format_context(&related)),
        ];
        self.completer.complete(messages).await
    }
}
