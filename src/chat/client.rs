use super::history::Message;
use super::ChatBackend;
use crate::config::MAX_REPLY_WORDS;
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretBox};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Path of the generation endpoint relative to the configured base URL.
pub const CHAT_PATH: &str = "api/chat";

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("Remote error: {status} - {message}")]
    Remote { status: u16, message: String },
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(#[from] url::ParseError),
}

#[derive(Debug)]
pub struct ChatConfig {
    pub base_url: Url,
    pub api_token: Option<SecretBox<String>>,
    pub timeout: Duration,
    pub max_reply_words: usize,
}

impl ChatConfig {
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            api_token: None,
            timeout: Duration::from_secs(60),
            max_reply_words: MAX_REPLY_WORDS,
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    messages: &'a [Message],
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    reply: Option<String>,
}

/// HTTP client for the `POST /api/chat` generation endpoint.
pub struct ChatClient {
    client: Client,
    endpoint: Url,
    api_token: Option<SecretBox<String>>,
}

impl ChatClient {
    pub fn new(config: ChatConfig) -> Result<Self, ChatError> {
        let endpoint = Self::endpoint_for(&config.base_url)?;
        let mut builder = Client::builder().timeout(config.timeout);
        // A local chat server is never reached through a proxy
        if Self::is_loopback(&endpoint) {
            builder = builder.no_proxy();
        }
        let client = builder.build()?;

        Ok(Self {
            client,
            endpoint,
            api_token: config.api_token,
        })
    }

    /// Resolve `<base>/api/chat`, keeping any path prefix on the base URL.
    pub fn endpoint_for(base_url: &Url) -> Result<Url, url::ParseError> {
        let mut base = base_url.clone();
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        base.join(CHAT_PATH)
    }

    fn is_loopback(url: &Url) -> bool {
        match url.host() {
            Some(url::Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
            Some(url::Host::Ipv4(ip)) => ip.is_loopback(),
            Some(url::Host::Ipv6(ip)) => ip.is_loopback(),
            None => false,
        }
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Send the whole history and return the raw reply text.
    pub async fn request_reply(&self, messages: &[Message]) -> Result<String, ChatError> {
        let mut request = self
            .client
            .post(self.endpoint.clone())
            .json(&ChatRequest { messages });

        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token.expose_secret());
        }

        log::debug!(
            "💬 Posting {} messages to {}",
            messages.len(),
            self.endpoint
        );

        let response = request.send().await?;
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ChatError::Remote {
                status: status.as_u16(),
                message: error_text,
            });
        }

        let body = response.text().await?;
        let parsed: ChatResponse = serde_json::from_str(&body)
            .map_err(|e| ChatError::InvalidResponse(format!("Invalid JSON: {}", e)))?;

        Ok(parsed.reply.unwrap_or_default())
    }
}

#[async_trait]
impl ChatBackend for ChatClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, ChatError> {
        self.request_reply(messages).await
    }
}
