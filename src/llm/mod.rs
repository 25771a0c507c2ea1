pub mod models;
pub mod openai;
pub mod sse;

use openai::OpenAiCompatibleProvider;

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc::Sender;

use crate::config::AppConfig;
use models::{ChatOptions, ChatResponse, Message};

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Network Error: {0}")]
    Network(String),
    #[error("API Error {status}: {message}")]
    Api { status: u16, message: String },
    #[error("Invalid Response: {0}")]
    InvalidResponse(String),
    #[error("Missing API key for {0}")]
    MissingApiKey(String),
    #[error("Rate Limited")]
    RateLimited,
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn chat(&self, messages: &[Message], options: ChatOptions) -> Result<ChatResponse, LlmError>;

    /// Streams content fragments into `tx` until the completion ends.
    async fn chat_streaming(
        &self,
        messages: &[Message],
        options: ChatOptions,
        tx: Sender<String>,
    ) -> Result<(), LlmError>;
}

/// Builds the two provider tiers from config.
pub struct ProviderFactory;

impl ProviderFactory {
    /// The image-generating tier, gated by plan and credits.
    pub fn create_premium(config: &AppConfig) -> Arc<dyn LlmProvider> {
        Arc::new(OpenAiCompatibleProvider::from_config(&config.providers.premium))
    }

    /// The text-only tier, also used for chat and go-deeper streams.
    pub fn create_free(config: &AppConfig) -> Arc<dyn LlmProvider> {
        Arc::new(OpenAiCompatibleProvider::from_config(&config.providers.free))
    }
}
