use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PlanTier {
    Free,
    Premium,
    Enterprise,
}

impl PlanTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Premium => "premium",
            Self::Enterprise => "enterprise",
        }
    }

    pub fn is_paid(&self) -> bool {
        matches!(self, Self::Premium | Self::Enterprise)
    }
}

impl From<&str> for PlanTier {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "premium" => Self::Premium,
            "enterprise" => Self::Enterprise,
            _ => Self::Free,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Active,
    Inactive,
    Canceled,
    PastDue,
}

impl PlanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Canceled => "canceled",
            Self::PastDue => "past_due",
        }
    }
}

impl From<&str> for PlanStatus {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "active" => Self::Active,
            "canceled" | "cancelled" => Self::Canceled,
            "past_due" => Self::PastDue,
            _ => Self::Inactive,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub credits: i64,
    pub plan_tier: PlanTier,
    pub plan_status: PlanStatus,
    pub plan_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KnowledgeEntry {
    pub id: String,
    pub user_id: String,
    pub source: String,
    pub source_id: String,
    pub title: String,
    pub content: String,
    pub metadata: serde_json::Value,
    pub synced_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Whiteboard {
    pub id: Uuid,
    pub user_id: String,
    pub title: String,
    pub data: Option<serde_json::Value>,
    pub preview: Option<String>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Result of writing a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotWrite {
    Saved { version: i64 },
    NotFound,
    VersionMismatch { current: i64 },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Active,
    Expired,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Expired => "expired",
        }
    }
}

impl From<&str> for AccountStatus {
    fn from(s: &str) -> Self {
        match s {
            "active" => Self::Active,
            _ => Self::Expired,
        }
    }
}

/// A third-party account (Drive, Classroom, ...) linked through the connector service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectedAccount {
    pub id: String,
    pub user_id: String,
    pub provider: String,
    pub status: AccountStatus,
    pub created_at: DateTime<Utc>,
}
