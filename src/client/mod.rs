//! Client side of the tutoring API: streaming conversations and debounced
//! whiteboard saves. The CLI uses it; anything else talking to the server can too.

pub mod session;
pub mod snapshot;
pub mod transport;

use thiserror::Error;

pub use session::{ChatMessage, ChatRole, ConversationConfig, SessionStatus, StreamingConversation};
pub use snapshot::{HttpSnapshotSink, Snapshot, SnapshotDebouncer, SnapshotSink};
pub use transport::{DeltaSource, SseEndpoint};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ClientError {
    #[error("Network Error: {0}")]
    Network(String),
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        ClientError::Network(err.to_string())
    }
}

/// Pulls `error` out of the server's JSON error envelope, falling back to the raw body.
pub(crate) fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|json| json["error"].as_str().map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string())
}
