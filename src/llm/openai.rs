use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde_json::json;
use tokio::sync::mpsc::Sender;

use crate::config::ProviderConfig;
use crate::llm::{
    models::{ChatOptions, ChatResponse, Message, Usage},
    sse::{SseDecoder, SseEvent},
    LlmError, LlmProvider,
};

/// Any OpenAI chat-completions compatible endpoint (OpenRouter, Hack Club AI, ...).
pub struct OpenAiCompatibleProvider {
    client: Client,
    name: String,
    api_key: String,
    base_url: String,
    default_model: String,
}

impl OpenAiCompatibleProvider {
    pub fn new(name: String, api_key: String, base_url: String, default_model: String) -> Self {
        Self {
            client: Client::new(),
            name,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            default_model,
        }
    }

    pub fn from_config(cfg: &ProviderConfig) -> Self {
        Self::new(
            cfg.name.clone(),
            cfg.api_key.clone(),
            cfg.api_base.clone(),
            cfg.model.clone(),
        )
    }

    fn request_body(&self, messages: &[Message], options: &ChatOptions, stream: bool) -> serde_json::Value {
        let model = options.model.as_deref().unwrap_or(&self.default_model);

        let mut final_messages: Vec<Message> = messages.to_vec();
        if let Some(system) = &options.system_prompt {
            final_messages.insert(0, Message::system(system.clone()));
        }

        let mut body = json!({
            "model": model,
            "messages": final_messages,
            "stream": stream,
            "temperature": options.temperature.unwrap_or(0.7),
            "max_tokens": options.max_tokens.unwrap_or(4096),
        });

        if let Some(modalities) = &options.modalities {
            body["modalities"] = json!(modalities);
        }

        body
    }

    async fn post(&self, body: &serde_json::Value) -> Result<reqwest::Response, LlmError> {
        if self.api_key.is_empty() {
            return Err(LlmError::MissingApiKey(self.name.clone()));
        }

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| LlmError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                return Err(LlmError::RateLimited);
            }
            return Err(LlmError::Api {
                status: status.as_u16(),
                message: upstream_message(&text),
            });
        }

        Ok(response)
    }
}

/// Pulls `error.message` out of an upstream error body, falling back to the raw text.
fn upstream_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|json| json["error"]["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| body.to_string())
}

/// Text content of an assistant message; content may be a string or an array of parts.
fn message_text(message: &serde_json::Value) -> String {
    match &message["content"] {
        serde_json::Value::String(text) => text.clone(),
        serde_json::Value::Array(parts) => parts
            .iter()
            .filter_map(|part| part["text"].as_str())
            .collect::<Vec<_>>()
            .join(""),
        _ => String::new(),
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn chat(&self, messages: &[Message], options: ChatOptions) -> Result<ChatResponse, LlmError> {
        let body = self.request_body(messages, &options, false);
        let response = self.post(&body).await?;

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        let raw = json["choices"][0]["message"].clone();
        if raw.is_null() {
            return Err(LlmError::InvalidResponse("response has no choices".to_string()));
        }

        let usage = json.get("usage").map(|u| Usage {
            input_tokens: u["prompt_tokens"].as_u64().unwrap_or(0) as u32,
            output_tokens: u["completion_tokens"].as_u64().unwrap_or(0) as u32,
        });

        Ok(ChatResponse {
            content: message_text(&raw),
            model: json["model"].as_str().unwrap_or(&self.default_model).to_string(),
            usage,
            raw,
        })
    }

    async fn chat_streaming(
        &self,
        messages: &[Message],
        options: ChatOptions,
        tx: Sender<String>,
    ) -> Result<(), LlmError> {
        let body = self.request_body(messages, &options, true);
        let response = self.post(&body).await?;

        let mut stream = response.bytes_stream();
        let mut decoder = SseDecoder::new();

        while let Some(chunk) = stream.next().await {
            let bytes = chunk.map_err(|e| LlmError::Network(e.to_string()))?;
            for event in decoder.push(&bytes) {
                match event {
                    SseEvent::Delta(content) => {
                        if tx.send(content).await.is_err() {
                            // Receiver dropped.
                            return Ok(());
                        }
                    }
                    SseEvent::Done => return Ok(()),
                }
            }
        }

        if let Some(SseEvent::Delta(content)) = decoder.finish() {
            let _ = tx.send(content).await;
        }

        Ok(())
    }
}
