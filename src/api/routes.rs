use actix_web::{delete, get, post, put, web, HttpResponse};
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info};
use uuid::Uuid;

use crate::api::middleware::AuthUser;
use crate::api::models::{
    ChatRequest, ChatTurn, CreateWhiteboardRequest, GoDeeperRequest, PaginationQuery, SaveSnapshotRequest,
    SaveSnapshotResponse, SearchQuery, SearchResponse, SyncRequest, SyncResponse,
};
use crate::config::AppConfig;
use crate::db::{acquire, service::DbService, DbPool, SnapshotWrite};
use crate::error::{AppError, AppResult};
use crate::knowledge::{sync::KnowledgeSync, KnowledgeSearch};
use crate::llm::{
    models::{ChatOptions, Message as LlmMessage},
    sse::{encode_delta, DONE_FRAME},
    LlmError, LlmProvider,
};
use crate::tutor::{
    prompt::{chat_system_prompt, go_deeper_prompt},
    router::GenerateSolutionBody,
    TutorRouter,
};

/// Canvas snapshots arrive as base64 data URLs.
const MAX_JSON_BYTES: usize = 25 * 1024 * 1024;

/// Providers behind the streaming endpoints.
pub struct StreamProviders {
    /// Text chat about the canvas.
    pub chat: Arc<dyn LlmProvider>,
    /// Image-aware follow-ups on a drawn answer.
    pub vision: Arc<dyn LlmProvider>,
}

fn turns_to_messages(turns: Vec<ChatTurn>) -> Vec<LlmMessage> {
    turns
        .into_iter()
        .filter(|t| matches!(t.role.as_str(), "user" | "assistant") && !t.content.trim().is_empty())
        .map(|t| LlmMessage::new(&t.role, t.content))
        .collect()
}

/// Runs the completion in the background and relays it as SSE frames. The
/// response is held until the first fragment arrives, so a provider that fails
/// before producing anything answers with the usual error envelope. A failure
/// after that point only ends the stream.
async fn sse_response(
    provider: Arc<dyn LlmProvider>,
    messages: Vec<LlmMessage>,
    options: ChatOptions,
    endpoint: &'static str,
) -> AppResult<HttpResponse> {
    let (tx, mut rx) = mpsc::channel::<String>(100);
    let name = provider.name().to_string();

    let task: JoinHandle<Result<(), LlmError>> =
        tokio::spawn(async move { provider.chat_streaming(&messages, options, tx).await });

    let (first, pending) = match rx.recv().await {
        Some(fragment) => (Some(fragment), Some(task)),
        None => {
            // The sender is gone, so the provider finished without output.
            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(provider = %name, endpoint, "stream failed before first token: {}", e);
                    return Err(e.into());
                }
                Err(e) => {
                    error!(provider = %name, endpoint, "stream task aborted: {}", e);
                    return Err(AppError::Upstream {
                        message: "AI provider stream aborted".to_string(),
                    });
                }
            }
            (None, None)
        }
    };

    let stream = async_stream::stream! {
        if let Some(fragment) = first {
            yield Ok::<Bytes, actix_web::Error>(Bytes::from(encode_delta(&fragment)));
        }
        while let Some(fragment) = rx.recv().await {
            yield Ok::<Bytes, actix_web::Error>(Bytes::from(encode_delta(&fragment)));
        }
        if let Some(task) = pending {
            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(provider = %name, endpoint, "stream failed: {}", e),
                Err(e) => error!(provider = %name, endpoint, "stream task aborted: {}", e),
            }
        }
        yield Ok::<Bytes, actix_web::Error>(Bytes::from_static(DONE_FRAME.as_bytes()));
    };

    Ok(HttpResponse::Ok()
        .content_type("text/event-stream")
        .insert_header(("Cache-Control", "no-cache"))
        .streaming(stream))
}

#[post("/generate-solution")]
pub async fn generate_solution(
    user: AuthUser,
    router: web::Data<TutorRouter>,
    body: web::Json<GenerateSolutionBody>,
) -> AppResult<HttpResponse> {
    let request = body.into_inner().validate()?;
    let response = router.generate_solution(&user.user_id, request).await?;
    Ok(HttpResponse::Ok().json(response))
}

#[post("/chat")]
pub async fn chat(
    user: AuthUser,
    config: web::Data<AppConfig>,
    providers: web::Data<StreamProviders>,
    knowledge: web::Data<KnowledgeSearch>,
    body: web::Json<ChatRequest>,
) -> AppResult<HttpResponse> {
    let req = body.into_inner();
    let mut messages = turns_to_messages(req.messages);
    if messages.is_empty() {
        return Err(AppError::Validation("messages are required".to_string()));
    }

    let max_history = config.chat.max_history_messages.max(1);
    if messages.len() > max_history {
        let excess = messages.len() - max_history;
        messages.drain(..excess);
    }

    let latest_question = messages
        .iter()
        .rev()
        .find(|m| m.role == "user")
        .map(|m| m.content.text())
        .unwrap_or_default();
    let context = knowledge.context_for(&user.user_id, &latest_question);
    info!(user_id = %user.user_id, with_knowledge = context.is_some(), "chat stream");

    let options = ChatOptions {
        system_prompt: Some(chat_system_prompt(
            req.is_socratic,
            req.canvas_context.as_deref(),
            context.as_deref(),
        )),
        ..Default::default()
    };

    sse_response(providers.chat.clone(), messages, options, "chat").await
}

#[post("/go-deeper")]
pub async fn go_deeper(
    user: AuthUser,
    providers: web::Data<StreamProviders>,
    body: web::Json<GoDeeperRequest>,
) -> AppResult<HttpResponse> {
    let req = body.into_inner();
    let image = req
        .image
        .filter(|i| i.starts_with("data:image/"))
        .ok_or_else(|| AppError::Validation("image must be a data:image/... URL".to_string()))?;
    let original_answer = req
        .original_answer
        .filter(|a| !a.trim().is_empty())
        .ok_or_else(|| AppError::Validation("originalAnswer is required".to_string()))?;

    let mut messages = vec![LlmMessage::user_with_image(go_deeper_prompt(&original_answer), image)];
    messages.extend(turns_to_messages(req.conversation_history));
    info!(user_id = %user.user_id, turns = messages.len(), "go-deeper stream");

    sse_response(providers.vision.clone(), messages, ChatOptions::default(), "go-deeper").await
}

#[post("/sync")]
pub async fn sync_knowledge(
    user: AuthUser,
    sync: web::Data<KnowledgeSync>,
    body: Option<web::Json<SyncRequest>>,
) -> AppResult<HttpResponse> {
    let provider = body.and_then(|b| b.into_inner().provider);
    let report = sync.sync_user(&user.user_id, provider.as_deref()).await?;
    Ok(HttpResponse::Ok().json(SyncResponse {
        success: true,
        synced: report.synced,
    }))
}

#[get("/search")]
pub async fn search_knowledge(
    user: AuthUser,
    knowledge: web::Data<KnowledgeSearch>,
    query: web::Query<SearchQuery>,
) -> AppResult<HttpResponse> {
    let results = knowledge.search(&user.user_id, &query.q)?;
    Ok(HttpResponse::Ok().json(SearchResponse { results }))
}

#[get("/profile")]
pub async fn get_profile(user: AuthUser, pool: web::Data<DbPool>) -> AppResult<HttpResponse> {
    let conn = acquire(&pool)?;
    match DbService::get_profile(&conn, &user.user_id)? {
        Some(profile) => Ok(HttpResponse::Ok().json(profile)),
        None => Err(AppError::NotFound("profile not found".to_string())),
    }
}

// --- Whiteboards ---

#[post("")]
pub async fn create_whiteboard(
    user: AuthUser,
    pool: web::Data<DbPool>,
    body: web::Json<CreateWhiteboardRequest>,
) -> AppResult<HttpResponse> {
    let conn = acquire(&pool)?;
    let board = DbService::create_whiteboard(&conn, &user.user_id, &body.title)?;
    Ok(HttpResponse::Created().json(board))
}

#[get("")]
pub async fn list_whiteboards(
    user: AuthUser,
    pool: web::Data<DbPool>,
    query: web::Query<PaginationQuery>,
) -> AppResult<HttpResponse> {
    let conn = acquire(&pool)?;
    let boards = DbService::list_whiteboards(&conn, &user.user_id, query.limit, query.offset)?;
    Ok(HttpResponse::Ok().json(boards))
}

#[get("/{id}")]
pub async fn get_whiteboard(user: AuthUser, pool: web::Data<DbPool>, id: web::Path<Uuid>) -> AppResult<HttpResponse> {
    let conn = acquire(&pool)?;
    match DbService::get_whiteboard(&conn, &user.user_id, id.into_inner())? {
        Some(board) => Ok(HttpResponse::Ok().json(board)),
        None => Err(AppError::NotFound("whiteboard not found".to_string())),
    }
}

#[put("/{id}/snapshot")]
pub async fn save_snapshot(
    user: AuthUser,
    pool: web::Data<DbPool>,
    id: web::Path<Uuid>,
    body: web::Json<SaveSnapshotRequest>,
) -> AppResult<HttpResponse> {
    let req = body.into_inner();
    let conn = acquire(&pool)?;
    match DbService::save_snapshot(
        &conn,
        &user.user_id,
        id.into_inner(),
        &req.data,
        req.preview.as_deref(),
        req.expected_version,
    )? {
        SnapshotWrite::Saved { version } => Ok(HttpResponse::Ok().json(SaveSnapshotResponse { success: true, version })),
        SnapshotWrite::NotFound => Err(AppError::NotFound("whiteboard not found".to_string())),
        SnapshotWrite::VersionMismatch { current } => Err(AppError::Conflict(format!(
            "whiteboard was modified elsewhere (current version {})",
            current
        ))),
    }
}

#[delete("/{id}")]
pub async fn delete_whiteboard(user: AuthUser, pool: web::Data<DbPool>, id: web::Path<Uuid>) -> AppResult<HttpResponse> {
    let conn = acquire(&pool)?;
    if DbService::delete_whiteboard(&conn, &user.user_id, id.into_inner())? {
        Ok(HttpResponse::NoContent().finish())
    } else {
        Err(AppError::NotFound("whiteboard not found".to_string()))
    }
}

/// Malformed bodies get the same envelope as every other validation error.
pub fn json_config() -> web::JsonConfig {
    web::JsonConfig::default()
        .limit(MAX_JSON_BYTES)
        .error_handler(|err, _req| AppError::Validation(err.to_string()).into())
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            .app_data(json_config())
            .service(generate_solution)
            .service(chat)
            .service(go_deeper)
            .service(get_profile)
            .service(web::scope("/knowledge").service(sync_knowledge).service(search_knowledge))
            .service(
                web::scope("/whiteboards")
                    .service(create_whiteboard)
                    .service(list_whiteboards)
                    .service(get_whiteboard)
                    .service(save_snapshot)
                    .service(delete_whiteboard),
            ),
    );
}
