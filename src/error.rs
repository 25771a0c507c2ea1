use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

use crate::llm::LlmError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Authentication required")]
    AuthRequired,
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{provider} API key is not configured")]
    MissingApiKey { provider: String },
    #[error("{message}")]
    Upstream { message: String },
    #[error("AI provider timed out")]
    UpstreamTimeout,
    #[error("AI provider returned an unusable response: {0}")]
    UpstreamUnparseable(String),
    #[error("Database error: {0}")]
    Persistence(String),
}

impl AppError {
    pub fn code(&self) -> &'static str {
        match self {
            AppError::AuthRequired => "AUTH_REQUIRED",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Conflict(_) => "CONFLICT",
            AppError::MissingApiKey { .. } => "MISSING_API_KEY",
            AppError::Upstream { .. } => "UPSTREAM_ERROR",
            AppError::UpstreamTimeout => "UPSTREAM_TIMEOUT",
            AppError::UpstreamUnparseable(_) => "UPSTREAM_UNPARSEABLE",
            AppError::Persistence(_) => "PERSISTENCE_ERROR",
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::AuthRequired => StatusCode::UNAUTHORIZED,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::MissingApiKey { .. }
            | AppError::Upstream { .. }
            | AppError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::UpstreamTimeout | AppError::UpstreamUnparseable(_) => StatusCode::BAD_GATEWAY,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let mut body = json!({
            "error": self.to_string(),
            "code": self.code(),
        });
        if let AppError::MissingApiKey { provider } = self {
            body["details"] = json!({ "provider": provider });
        }
        HttpResponse::build(self.status_code()).json(body)
    }
}

impl From<duckdb::Error> for AppError {
    fn from(value: duckdb::Error) -> Self {
        Self::Persistence(value.to_string())
    }
}

impl From<LlmError> for AppError {
    fn from(value: LlmError) -> Self {
        match value {
            LlmError::MissingApiKey(provider) => Self::MissingApiKey { provider },
            LlmError::Api { status, message } => Self::Upstream {
                message: format!("AI provider error {}: {}", status, message),
            },
            LlmError::RateLimited => Self::Upstream {
                message: "AI provider rate limited the request".to_string(),
            },
            LlmError::Network(message) => Self::Upstream { message },
            LlmError::InvalidResponse(message) => Self::UpstreamUnparseable(message),
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;
