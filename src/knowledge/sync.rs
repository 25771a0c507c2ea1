use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::ComposioConfig;
use crate::db::{acquire, service::{DbService, NewKnowledgeEntry}, AccountStatus, ConnectedAccount, DbPool};
use crate::error::AppResult;

/// One document pulled from a connected account.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceDocument {
    pub source_id: String,
    pub title: String,
    pub content: String,
    pub metadata: Value,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectorError {
    #[error("connection expired: {0}")]
    AuthExpired(String),
    #[error("{0}")]
    Other(String),
}

const AUTH_FAILURE_MARKERS: &[&str] = &[
    "unauthorized",
    "unauthenticated",
    "invalid_grant",
    "invalid credentials",
    "expired",
    "revoked",
];

impl ConnectorError {
    /// The HTTP status decides when there is one; the message is only a fallback.
    pub fn classify(status: Option<u16>, message: &str) -> Self {
        if matches!(status, Some(401) | Some(403)) {
            return Self::AuthExpired(message.to_string());
        }
        let lower = message.to_lowercase();
        if AUTH_FAILURE_MARKERS.iter().any(|marker| lower.contains(marker)) {
            Self::AuthExpired(message.to_string())
        } else {
            Self::Other(message.to_string())
        }
    }
}

#[async_trait]
pub trait KnowledgeConnector: Send + Sync {
    async fn fetch_documents(&self, account: &ConnectedAccount) -> Result<Vec<SourceDocument>, ConnectorError>;
}

/// Flattens a JSON value into `key: value` lines of its scalar leaves.
pub fn flatten_json_text(value: &Value) -> String {
    fn walk(value: &Value, key: Option<&str>, out: &mut Vec<String>) {
        match value {
            Value::Object(map) => {
                for (k, v) in map {
                    walk(v, Some(k), out);
                }
            }
            Value::Array(items) => {
                for item in items {
                    walk(item, key, out);
                }
            }
            Value::String(s) if !s.trim().is_empty() => match key {
                Some(k) => out.push(format!("{}: {}", k, s.trim())),
                None => out.push(s.trim().to_string()),
            },
            Value::Number(n) => {
                if let Some(k) = key {
                    out.push(format!("{}: {}", k, n));
                }
            }
            Value::Bool(b) => {
                if let Some(k) = key {
                    out.push(format!("{}: {}", k, b));
                }
            }
            _ => {}
        }
    }

    let mut lines = Vec::new();
    walk(value, None, &mut lines);
    lines.join("\n")
}

/// First array of objects found in `value`, breadth-first.
fn find_item_array(value: &Value) -> Option<&Vec<Value>> {
    let mut queue = vec![value];
    while !queue.is_empty() {
        let mut next = Vec::new();
        for candidate in queue {
            match candidate {
                Value::Array(items) if items.iter().any(Value::is_object) => return Some(items),
                Value::Object(map) => next.extend(map.values()),
                _ => {}
            }
        }
        queue = next;
    }
    None
}

fn item_to_document(item: &Value, provider: &str, account_id: &str) -> Option<SourceDocument> {
    let source_id = match &item["id"] {
        Value::String(s) if !s.is_empty() => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    let title = ["name", "title", "courseName", "descriptionHeading"]
        .iter()
        .find_map(|key| item[*key].as_str())
        .unwrap_or("Untitled")
        .to_string();

    Some(SourceDocument {
        source_id,
        title,
        content: flatten_json_text(item),
        metadata: json!({ "provider": provider, "account_id": account_id }),
    })
}

/// Lists documents through the Composio action execution API.
pub struct ComposioConnector {
    client: Client,
    api_base: String,
    api_key: String,
    actions: HashMap<String, String>,
}

impl ComposioConnector {
    pub fn from_config(cfg: &ComposioConfig) -> Self {
        Self {
            client: Client::new(),
            api_base: cfg.api_base.trim_end_matches('/').to_string(),
            api_key: cfg.api_key.clone(),
            actions: cfg.actions.clone(),
        }
    }
}

#[async_trait]
impl KnowledgeConnector for ComposioConnector {
    async fn fetch_documents(&self, account: &ConnectedAccount) -> Result<Vec<SourceDocument>, ConnectorError> {
        if self.api_key.is_empty() {
            return Err(ConnectorError::Other("Composio API key is not configured".to_string()));
        }
        let action = self
            .actions
            .get(&account.provider)
            .ok_or_else(|| ConnectorError::Other(format!("no sync action for provider {}", account.provider)))?;

        let response = self
            .client
            .post(format!("{}/actions/{}/execute", self.api_base, action))
            .header("x-api-key", &self.api_key)
            .json(&json!({ "connectedAccountId": account.id, "input": {} }))
            .send()
            .await
            .map_err(|e| ConnectorError::Other(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ConnectorError::classify(Some(status.as_u16()), &text));
        }

        let json: Value = response
            .json()
            .await
            .map_err(|e| ConnectorError::Other(e.to_string()))?;

        let succeeded = json["successful"]
            .as_bool()
            .or_else(|| json["successfull"].as_bool())
            .unwrap_or(true);
        if !succeeded {
            let message = json["error"].as_str().unwrap_or("action failed");
            return Err(ConnectorError::classify(None, message));
        }

        let items = find_item_array(&json["data"]).cloned().unwrap_or_default();
        Ok(items
            .iter()
            .filter_map(|item| item_to_document(item, &account.provider, &account.id))
            .collect())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub synced: usize,
    pub expired_accounts: Vec<String>,
    pub failed_accounts: Vec<String>,
}

/// Pulls every connected account's documents into the knowledge base, one item at a time.
pub struct KnowledgeSync {
    db: DbPool,
    connector: Arc<dyn KnowledgeConnector>,
    max_content_chars: usize,
}

impl KnowledgeSync {
    pub fn new(db: DbPool, connector: Arc<dyn KnowledgeConnector>, max_content_chars: usize) -> Self {
        Self {
            db,
            connector,
            max_content_chars,
        }
    }

    /// Best effort: a failing account or item is logged and skipped, never aborts the run.
    pub async fn sync_user(&self, user_id: &str, provider: Option<&str>) -> AppResult<SyncReport> {
        let accounts = {
            let conn = acquire(&self.db)?;
            DbService::list_connected_accounts(&conn, user_id, provider)?
        };

        let mut report = SyncReport::default();
        for account in accounts {
            let documents = match self.connector.fetch_documents(&account).await {
                Ok(documents) => documents,
                Err(ConnectorError::AuthExpired(message)) => {
                    warn!(user_id, account_id = %account.id, provider = %account.provider, "connection expired: {}", message);
                    let conn = acquire(&self.db)?;
                    if let Err(e) = DbService::set_account_status(&conn, &account.id, AccountStatus::Expired) {
                        error!(account_id = %account.id, "failed to mark account expired: {}", e);
                    }
                    report.expired_accounts.push(account.id.clone());
                    continue;
                }
                Err(ConnectorError::Other(message)) => {
                    warn!(user_id, account_id = %account.id, provider = %account.provider, "sync failed: {}", message);
                    report.failed_accounts.push(account.id.clone());
                    continue;
                }
            };

            for document in &documents {
                let entry = NewKnowledgeEntry {
                    user_id,
                    source: &account.provider,
                    source_id: &document.source_id,
                    title: &document.title,
                    content: &document.content,
                    metadata: document.metadata.clone(),
                };
                let conn = acquire(&self.db)?;
                match DbService::upsert_knowledge(&conn, &entry, self.max_content_chars) {
                    Ok(()) => report.synced += 1,
                    Err(e) => error!(user_id, source_id = %document.source_id, "failed to store document: {}", e),
                }
            }
        }

        info!(user_id, synced = report.synced, "knowledge sync finished");
        Ok(report)
    }
}
