//! Debounced whiteboard persistence: every edit hands over the full canvas,
//! and only the newest snapshot of a quiet period is written.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error};
use uuid::Uuid;

use super::{error_message, ClientError};

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub data: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview: Option<String>,
}

#[async_trait]
pub trait SnapshotSink: Send + Sync + 'static {
    async fn save(&self, snapshot: &Snapshot) -> Result<(), ClientError>;
}

/// Writes snapshots to `PUT /api/whiteboards/{id}/snapshot`.
pub struct HttpSnapshotSink {
    client: Client,
    url: String,
    token: Option<String>,
}

impl HttpSnapshotSink {
    pub fn new(base_url: &str, whiteboard_id: Uuid, token: Option<String>) -> Self {
        Self {
            client: Client::new(),
            url: format!("{}/api/whiteboards/{}/snapshot", base_url.trim_end_matches('/'), whiteboard_id),
            token,
        }
    }
}

#[async_trait]
impl SnapshotSink for HttpSnapshotSink {
    async fn save(&self, snapshot: &Snapshot) -> Result<(), ClientError> {
        let mut request = self.client.put(&self.url).json(snapshot);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let text = response.text().await.unwrap_or_default();
        Err(ClientError::Http {
            status: status.as_u16(),
            message: error_message(&text),
        })
    }
}

enum Command {
    Update(Snapshot),
    Flush(oneshot::Sender<()>),
}

pub struct SnapshotDebouncer<S: SnapshotSink> {
    tx: mpsc::UnboundedSender<Command>,
    worker: JoinHandle<()>,
    _sink: std::marker::PhantomData<S>,
}

async fn save_logged<S: SnapshotSink>(sink: &S, snapshot: Snapshot) {
    match sink.save(&snapshot).await {
        Ok(()) => debug!("snapshot saved"),
        Err(e) => error!("failed to save snapshot: {}", e),
    }
}

impl<S: SnapshotSink> SnapshotDebouncer<S> {
    /// Spawns the saving task; must be called inside a tokio runtime.
    pub fn new(sink: S, delay: Duration) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Command>();
        let worker = tokio::spawn(async move {
            let mut pending: Option<Snapshot> = None;
            loop {
                let command = if pending.is_some() {
                    match tokio::time::timeout(delay, rx.recv()).await {
                        Ok(command) => command,
                        Err(_) => {
                            if let Some(snapshot) = pending.take() {
                                save_logged(&sink, snapshot).await;
                            }
                            continue;
                        }
                    }
                } else {
                    rx.recv().await
                };

                match command {
                    Some(Command::Update(snapshot)) => pending = Some(snapshot),
                    Some(Command::Flush(done)) => {
                        if let Some(snapshot) = pending.take() {
                            save_logged(&sink, snapshot).await;
                        }
                        let _ = done.send(());
                    }
                    None => {
                        if let Some(snapshot) = pending.take() {
                            save_logged(&sink, snapshot).await;
                        }
                        break;
                    }
                }
            }
        });

        Self {
            tx,
            worker,
            _sink: std::marker::PhantomData,
        }
    }

    /// Replaces the pending snapshot and restarts the quiet period.
    pub fn update(&self, snapshot: Snapshot) {
        if self.tx.send(Command::Update(snapshot)).is_err() {
            error!("snapshot saver stopped, change dropped");
        }
    }

    /// Saves the pending snapshot now, if any, and waits for the write.
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        if self.tx.send(Command::Flush(done)).is_ok() {
            let _ = wait.await;
        }
    }

    /// Saves whatever is pending and stops the saving task.
    pub async fn close(self) {
        let Self { tx, worker, .. } = self;
        drop(tx);
        if let Err(e) = worker.await {
            error!("snapshot saver task failed: {}", e);
        }
    }
}
