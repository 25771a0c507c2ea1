use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde_json::Value;
use tokio::sync::mpsc::Sender;
use tracing::debug;

use super::{error_message, ClientError};
use crate::llm::sse::{SseDecoder, SseEvent};

/// Something that turns a request body into a stream of content fragments.
#[async_trait]
pub trait DeltaSource: Send + Sync + 'static {
    /// Sends fragments into `tx` until the completion ends. A dropped
    /// receiver ends the stream early without error.
    async fn stream(&self, body: Value, tx: Sender<String>) -> Result<(), ClientError>;
}

/// A streaming endpoint of the server, e.g. `/api/chat` or `/api/go-deeper`.
#[derive(Clone)]
pub struct SseEndpoint {
    client: Client,
    url: String,
    token: Option<String>,
}

impl SseEndpoint {
    pub fn new(base_url: &str, path: &str, token: Option<String>) -> Self {
        Self {
            client: Client::new(),
            url: format!("{}{}", base_url.trim_end_matches('/'), path),
            token,
        }
    }

    pub fn chat(base_url: &str, token: Option<String>) -> Self {
        Self::new(base_url, "/api/chat", token)
    }

    pub fn go_deeper(base_url: &str, token: Option<String>) -> Self {
        Self::new(base_url, "/api/go-deeper", token)
    }
}

#[async_trait]
impl DeltaSource for SseEndpoint {
    async fn stream(&self, body: Value, tx: Sender<String>) -> Result<(), ClientError> {
        let mut request = self.client.post(&self.url).json(&body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ClientError::Http {
                status: status.as_u16(),
                message: error_message(&text),
            });
        }

        let mut decoder = SseDecoder::new();
        let mut bytes = response.bytes_stream();
        while let Some(chunk) = bytes.next().await {
            let chunk = chunk?;
            for event in decoder.push(&chunk) {
                match event {
                    SseEvent::Delta(content) => {
                        if tx.send(content).await.is_err() {
                            debug!("stream receiver dropped");
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
