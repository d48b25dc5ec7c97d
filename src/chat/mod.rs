pub mod client;
pub mod history;

pub use client::{ChatClient, ChatConfig, ChatError};
pub use history::{ConversationHistory, Message, Role};

use async_trait::async_trait;
use std::sync::Arc;

/// Appended to a reply that was cut at the word limit.
pub const TRUNCATION_MARKER: &str = "…";
/// Stored and spoken when the endpoint answers without reply text.
pub const NO_REPLY_PLACEHOLDER: &str = "[no reply]";

/// Transport seam for the remote text-generation service.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Send the conversation so far and return the raw reply.
    async fn complete(&self, messages: &[Message]) -> Result<String, ChatError>;
}

/// Keep at most `max_words` whitespace-separated words.
///
/// Text within the limit is returned unchanged; longer text is rejoined with
/// single spaces and ends with [`TRUNCATION_MARKER`].
pub fn limit_words(text: &str, max_words: usize) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() > max_words {
        format!("{}{}", words[..max_words].join(" "), TRUNCATION_MARKER)
    } else {
        text.to_string()
    }
}

/// Produces the reply that gets stored and spoken for a conversation turn.
#[derive(Clone)]
pub struct TextGenerator {
    backend: Arc<dyn ChatBackend>,
    max_words: usize,
}

impl TextGenerator {
    pub fn new(backend: Arc<dyn ChatBackend>, max_words: usize) -> Self {
        Self { backend, max_words }
    }

    /// Ask the backend for a reply and cap its length.
    pub async fn generate(&self, history: &[Message]) -> Result<String, ChatError> {
        let raw = self.backend.complete(history).await?;
        if raw.is_empty() {
            log::warn!("💬 Endpoint returned no reply text");
            return Ok(NO_REPLY_PLACEHOLDER.to_string());
        }

        let reply = limit_words(&raw, self.max_words);
        if reply.len() != raw.len() {
            log::info!(
                "✂️ Reply truncated to {} words (was {})",
                self.max_words,
                raw.split_whitespace().count()
            );
        }
        Ok(reply)
    }
}
