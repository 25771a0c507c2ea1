use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::knowledge::KnowledgeSnippet;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChatTurn {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    #[serde(default)]
    pub messages: Vec<ChatTurn>,
    #[serde(default)]
    pub canvas_context: Option<String>,
    #[serde(default)]
    pub is_socratic: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoDeeperRequest {
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub original_answer: Option<String>,
    #[serde(default)]
    pub conversation_history: Vec<ChatTurn>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SyncRequest {
    #[serde(default)]
    pub provider: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SyncResponse {
    pub success: bool,
    pub synced: usize,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub results: Vec<KnowledgeSnippet>,
}

#[derive(Debug, Deserialize)]
pub struct CreateWhiteboardRequest {
    #[serde(default = "default_title")]
    pub title: String,
}

fn default_title() -> String {
    "Untitled".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveSnapshotRequest {
    pub data: Value,
    #[serde(default)]
    pub preview: Option<String>,
    #[serde(default)]
    pub expected_version: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct SaveSnapshotResponse {
    pub success: bool,
    pub version: i64,
}

#[derive(Debug, Deserialize)]
pub struct PaginationQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    50
}
