use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::db::{acquire, service::DbService, DbPool, Profile};
use crate::error::{AppError, AppResult};
use crate::llm::{
    models::{ChatOptions, Message},
    LlmProvider,
};
use crate::tutor::{
    feedback::{parse_feedback, Feedback},
    image::extract_image_url,
    prompt::{build_instruction, effective_mode, free_tier_system_prompt, InstructionRequest, RequestSource, TutorMode},
};

#[derive(Debug, Clone)]
pub struct TutorSettings {
    pub generate_solution_cost: i64,
    pub premium_timeout: Duration,
    pub free_timeout: Duration,
}

impl TutorSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            generate_solution_cost: config.credits.generate_solution_cost,
            premium_timeout: Duration::from_secs(config.providers.premium.timeout_secs),
            free_timeout: Duration::from_secs(config.providers.free.timeout_secs),
        }
    }
}

/// Body of `POST /api/generate-solution` before validation.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct GenerateSolutionBody {
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub is_socratic: bool,
}

#[derive(Debug, Clone)]
pub struct SolutionRequest {
    pub image: String,
    pub prompt: Option<String>,
    pub mode: TutorMode,
    pub source: RequestSource,
    pub is_socratic: bool,
}

impl GenerateSolutionBody {
    pub fn validate(self) -> AppResult<SolutionRequest> {
        let image = self
            .image
            .filter(|image| !image.trim().is_empty())
            .ok_or_else(|| AppError::Validation("image is required".to_string()))?;
        if !image.starts_with("data:image/") {
            return Err(AppError::Validation("image must be a data:image/... URL".to_string()));
        }

        let mode = match self.mode.as_deref() {
            None => TutorMode::Feedback,
            Some(mode) => mode.parse().map_err(AppError::Validation)?,
        };
        let source = match self.source.as_deref() {
            None => RequestSource::Auto,
            Some(source) => source.parse().map_err(AppError::Validation)?,
        };

        Ok(SolutionRequest {
            image,
            prompt: self.prompt,
            mode,
            source,
            is_socratic: self.is_socratic,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateSolutionResponse {
    pub success: bool,
    pub feedback: Feedback,
    pub text_content: String,
    pub provider: String,
    pub credits_remaining: i64,
    pub is_premium: bool,
    pub image_url: Option<String>,
}

/// Whether a profile may use the image-generating tier for a request costing `cost`.
pub fn is_premium_eligible(profile: &Profile, cost: i64, now: DateTime<Utc>) -> bool {
    let not_expired = profile.plan_expires_at.map_or(true, |expires| expires > now);
    profile.plan_tier.is_paid()
        && profile.plan_status == crate::db::PlanStatus::Active
        && not_expired
        && profile.credits >= cost
}

/// Chooses the premium or free provider for a solution request and normalises the reply.
pub struct TutorRouter {
    db: DbPool,
    premium: Arc<dyn LlmProvider>,
    free: Arc<dyn LlmProvider>,
    settings: TutorSettings,
}

impl TutorRouter {
    pub fn new(db: DbPool, premium: Arc<dyn LlmProvider>, free: Arc<dyn LlmProvider>, settings: TutorSettings) -> Self {
        Self {
            db,
            premium,
            free,
            settings,
        }
    }

    pub fn settings(&self) -> &TutorSettings {
        &self.settings
    }

    pub async fn generate_solution(&self, user_id: &str, request: SolutionRequest) -> AppResult<GenerateSolutionResponse> {
        let profile = {
            let conn = acquire(&self.db)?;
            DbService::get_profile(&conn, user_id)?
        }
        .ok_or(AppError::AuthRequired)?;

        let mode = effective_mode(request.mode, request.is_socratic);
        let instruction = build_instruction(&InstructionRequest {
            mode: request.mode,
            source: request.source,
            is_socratic: request.is_socratic,
            prompt: request.prompt.as_deref(),
        });

        let cost = self.settings.generate_solution_cost;
        if is_premium_eligible(&profile, cost, Utc::now()) {
            if let Some(response) = self.premium_generate(user_id, &instruction, &request.image, mode, cost).await? {
                return Ok(response);
            }
            warn!(user_id, provider = self.premium.name(), "premium reply had no image, using free tier");
        }

        self.free_generate(&profile, &instruction, &request.image, mode).await
    }

    /// `Ok(None)` when the provider answered without an image; nothing is charged then.
    async fn premium_generate(
        &self,
        user_id: &str,
        instruction: &str,
        image: &str,
        mode: TutorMode,
        cost: i64,
    ) -> AppResult<Option<GenerateSolutionResponse>> {
        info!(user_id, provider = self.premium.name(), %mode, "generating premium solution");

        let messages = vec![Message::user_with_image(instruction, image)];
        let options = ChatOptions {
            modalities: Some(vec!["image".to_string(), "text".to_string()]),
            ..Default::default()
        };

        let response = tokio::time::timeout(self.settings.premium_timeout, self.premium.chat(&messages, options))
            .await
            .map_err(|_| AppError::UpstreamTimeout)??;

        let Some(image_url) = extract_image_url(&response.raw) else {
            return Ok(None);
        };

        let credits_remaining = {
            let conn = acquire(&self.db)?;
            match DbService::deduct_credits(&conn, user_id, cost)? {
                Some(remaining) => remaining,
                None => {
                    // Another request spent the credits after our eligibility check.
                    warn!(user_id, cost, "credits no longer sufficient after generation, not charged");
                    DbService::get_profile(&conn, user_id)?.map_or(0, |p| p.credits)
                }
            }
        };

        Ok(Some(GenerateSolutionResponse {
            success: true,
            feedback: parse_feedback(&response.content, mode),
            text_content: response.content,
            provider: self.premium.name().to_string(),
            credits_remaining,
            is_premium: true,
            image_url: Some(image_url),
        }))
    }

    async fn free_generate(
        &self,
        profile: &Profile,
        instruction: &str,
        image: &str,
        mode: TutorMode,
    ) -> AppResult<GenerateSolutionResponse> {
        info!(user_id = %profile.id, provider = self.free.name(), %mode, "generating free-tier feedback");

        let messages = vec![Message::user_with_image(instruction, image)];
        let options = ChatOptions {
            system_prompt: Some(free_tier_system_prompt().to_string()),
            temperature: Some(0.3),
            ..Default::default()
        };

        let response = tokio::time::timeout(self.settings.free_timeout, self.free.chat(&messages, options))
            .await
            .map_err(|_| AppError::UpstreamTimeout)??;

        Ok(GenerateSolutionResponse {
            success: true,
            feedback: parse_feedback(&response.content, mode),
            text_content: response.content,
            provider: self.free.name().to_string(),
            credits_remaining: profile.credits,
            is_premium: false,
            image_url: None,
        })
    }
}
