//! A streamed conversation with a turn-based state machine.
//!
//! Each `send_message` starts a turn: the user message plus an empty assistant
//! placeholder that fills up as fragments arrive. Only the current turn may
//! touch the message list; a stale stream task is aborted and its late
//! fragments are ignored.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use super::transport::DeltaSource;

pub const EMPTY_COMPLETION_FALLBACK: &str = "Sorry, I couldn't generate a response. Please try again.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub role: ChatRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    Idle,
    Sending,
    Streaming,
    Error(String),
}

impl SessionStatus {
    pub fn is_busy(&self) -> bool {
        matches!(self, SessionStatus::Sending | SessionStatus::Streaming)
    }
}

type BodyBuilder = Arc<dyn Fn(&[ChatMessage]) -> Value + Send + Sync>;

/// What a conversation sends to its endpoint for a given history.
#[derive(Clone)]
pub struct ConversationConfig {
    pub label: &'static str,
    build_body: BodyBuilder,
}

impl fmt::Debug for ConversationConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversationConfig").field("label", &self.label).finish()
    }
}

fn history_json(history: &[ChatMessage]) -> Vec<Value> {
    history
        .iter()
        .map(|m| json!({ "role": m.role.as_str(), "content": m.content }))
        .collect()
}

impl ConversationConfig {
    pub fn new(label: &'static str, build_body: impl Fn(&[ChatMessage]) -> Value + Send + Sync + 'static) -> Self {
        Self {
            label,
            build_body: Arc::new(build_body),
        }
    }

    /// Free-form tutoring chat about the canvas.
    pub fn chat(canvas_context: Option<String>, is_socratic: bool) -> Self {
        Self::new("chat", move |history| {
            json!({
                "messages": history_json(history),
                "canvasContext": canvas_context,
                "isSocratic": is_socratic,
            })
        })
    }

    /// Follow-up questions about an answer already drawn on the canvas.
    pub fn analysis(image: String, original_answer: String) -> Self {
        Self::new("analysis", move |history| {
            json!({
                "image": image,
                "originalAnswer": original_answer,
                "conversationHistory": history_json(history),
            })
        })
    }

    pub fn body(&self, history: &[ChatMessage]) -> Value {
        (self.build_body)(history)
    }
}

struct Turn {
    user_id: Uuid,
    assistant_id: Uuid,
    user_text: String,
}

struct Inner {
    messages: Vec<ChatMessage>,
    status: SessionStatus,
    generation: u64,
    turn: Option<Turn>,
    task: Option<JoinHandle<()>>,
}

struct Shared {
    inner: Mutex<Inner>,
    revision: watch::Sender<u64>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn bump(&self) {
        self.revision.send_modify(|r| *r = r.wrapping_add(1));
    }

    /// Runs `f` only while `generation` is still the current turn.
    fn with_turn(&self, generation: u64, f: impl FnOnce(&mut Inner, Uuid)) {
        {
            let mut inner = self.lock();
            if inner.generation != generation {
                return;
            }
            let Some(assistant_id) = inner.turn.as_ref().map(|t| t.assistant_id) else {
                return;
            };
            f(&mut inner, assistant_id);
        }
        self.bump();
    }
}

impl Inner {
    fn message_mut(&mut self, id: Uuid) -> Option<&mut ChatMessage> {
        self.messages.iter_mut().find(|m| m.id == id)
    }

    /// Cancels the in-flight turn and removes both of its messages.
    fn rollback(&mut self) -> Option<String> {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.generation = self.generation.wrapping_add(1);
        let turn = self.turn.take()?;
        self.messages
            .retain(|m| m.id != turn.user_id && m.id != turn.assistant_id);
        self.status = SessionStatus::Idle;
        Some(turn.user_text)
    }
}

pub struct StreamingConversation<S: DeltaSource> {
    shared: Arc<Shared>,
    source: Arc<S>,
    config: ConversationConfig,
}

impl<S: DeltaSource> StreamingConversation<S> {
    pub fn new(source: S, config: ConversationConfig) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    messages: Vec::new(),
                    status: SessionStatus::Idle,
                    generation: 0,
                    turn: None,
                    task: None,
                }),
                revision,
            }),
            source: Arc::new(source),
            config,
        }
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        self.shared.lock().messages.clone()
    }

    pub fn status(&self) -> SessionStatus {
        self.shared.lock().status.clone()
    }

    pub fn is_busy(&self) -> bool {
        self.status().is_busy()
    }

    /// Bumped on every state change.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.shared.revision.subscribe()
    }

    /// Resolves once no turn is in flight.
    pub async fn settled(&self) {
        let mut rx = self.subscribe();
        while self.is_busy() {
            if rx.changed().await.is_err() {
                break;
            }
        }
    }

    /// Starts a new turn, aborting any turn still in flight. Blank input is
    /// ignored. Must be called inside a tokio runtime.
    pub fn send_message(&self, content: &str) -> bool {
        let content = content.trim();
        if content.is_empty() {
            return false;
        }

        let (generation, body) = {
            let mut inner = self.shared.lock();
            if let Some(discarded) = inner.rollback() {
                debug!(conversation = self.config.label, "superseded in-flight turn: {}", discarded);
            }

            let user = ChatMessage::new(ChatRole::User, content);
            let assistant = ChatMessage::new(ChatRole::Assistant, "");
            inner.turn = Some(Turn {
                user_id: user.id,
                assistant_id: assistant.id,
                user_text: content.to_string(),
            });
            inner.messages.push(user);
            let body = self.config.body(&inner.messages);
            inner.messages.push(assistant);
            inner.status = SessionStatus::Sending;
            (inner.generation, body)
        };

        let shared = self.shared.clone();
        let source = self.source.clone();
        let label = self.config.label;
        let task = tokio::spawn(async move {
            let (tx, mut rx) = mpsc::channel::<String>(64);
            let producer = source.stream(body, tx);
            let consumer = async {
                while let Some(fragment) = rx.recv().await {
                    shared.with_turn(generation, |inner, assistant_id| {
                        if let Some(message) = inner.message_mut(assistant_id) {
                            message.content.push_str(&fragment);
                        }
                        inner.status = SessionStatus::Streaming;
                    });
                }
            };
            let (result, ()) = tokio::join!(producer, consumer);

            shared.with_turn(generation, |inner, assistant_id| {
                let status = match &result {
                    Ok(()) => {
                        if let Some(message) = inner.message_mut(assistant_id) {
                            if message.content.trim().is_empty() {
                                message.content = EMPTY_COMPLETION_FALLBACK.to_string();
                            }
                        }
                        SessionStatus::Idle
                    }
                    Err(e) => {
                        warn!(conversation = label, "stream failed: {}", e);
                        if let Some(message) = inner.message_mut(assistant_id) {
                            message.content = format!("Sorry, something went wrong: {}", e);
                        }
                        SessionStatus::Error(e.to_string())
                    }
                };
                inner.status = status;
                inner.turn = None;
                inner.task = None;
            });
        });

        {
            let mut inner = self.shared.lock();
            if inner.generation == generation && inner.turn.is_some() {
                inner.task = Some(task);
            }
        }
        self.shared.bump();
        true
    }

    /// Aborts the in-flight turn and removes it from the history, returning
    /// the user's text so it can be edited and resent.
    pub fn stop(&self) -> Option<String> {
        let discarded = self.shared.lock().rollback();
        self.shared.bump();
        discarded
    }

    /// Stops any turn and forgets the whole history.
    pub fn clear(&self) {
        {
            let mut inner = self.shared.lock();
            inner.rollback();
            inner.messages.clear();
            inner.status = SessionStatus::Idle;
        }
        self.shared.bump();
    }
}

impl<S: DeltaSource> Drop for StreamingConversation<S> {
    fn drop(&mut self) {
        if let Some(task) = self.shared.lock().task.take() {
            task.abort();
        }
    }
}
