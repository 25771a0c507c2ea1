#[cfg(test)]
mod tests {
    use actix_web::{http::StatusCode, test, web, App, HttpResponse};
    use agathon::api::middleware::BearerAuth;
    use agathon::api::routes::{self, StreamProviders};
    use agathon::config::{AppConfig, DatabaseConfig, TokenEntry};
    use agathon::db::{self, acquire, service::DbService, ConnectedAccount, DbPool};
    use agathon::knowledge::sync::{ConnectorError, KnowledgeConnector, KnowledgeSync, SourceDocument};
    use agathon::knowledge::KnowledgeSearch;
    use agathon::llm::models::{ChatOptions, ChatResponse, Message};
    use agathon::llm::sse::DONE_FRAME;
    use agathon::llm::{LlmError, LlmProvider};
    use agathon::tutor::{TutorRouter, TutorSettings};
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tokio::sync::mpsc::Sender;

    const TOKEN: &str = "tok-alice";
    const IMAGE: &str = "data:image/png;base64,iVBORw0KGgo=";

    struct EchoProvider;

    #[async_trait]
    impl LlmProvider for EchoProvider {
        fn name(&self) -> &str {
            "echo"
        }

        async fn chat(&self, _messages: &[Message], _options: ChatOptions) -> Result<ChatResponse, LlmError> {
            let content = r#"{"summary":"Looks right","annotations":[]}"#.to_string();
            Ok(ChatResponse {
                raw: json!({"role": "assistant", "content": content}),
                content,
                model: "echo".to_string(),
                usage: None,
            })
        }

        async fn chat_streaming(&self, _: &[Message], _: ChatOptions, tx: Sender<String>) -> Result<(), LlmError> {
            for part in ["Hi", " there"] {
                let _ = tx.send(part.to_string()).await;
            }
            Ok(())
        }
    }

    /// Streams `partial` (if any) and then fails with `error()`.
    struct FailingProvider {
        partial: Option<&'static str>,
        error: fn() -> LlmError,
    }

    #[async_trait]
    impl LlmProvider for FailingProvider {
        fn name(&self) -> &str {
            "failing"
        }

        async fn chat(&self, _: &[Message], _: ChatOptions) -> Result<ChatResponse, LlmError> {
            Err((self.error)())
        }

        async fn chat_streaming(&self, _: &[Message], _: ChatOptions, tx: Sender<String>) -> Result<(), LlmError> {
            if let Some(partial) = self.partial {
                let _ = tx.send(partial.to_string()).await;
            }
            Err((self.error)())
        }
    }

    fn missing_key() -> LlmError {
        LlmError::MissingApiKey("hackclub".to_string())
    }

    fn upstream_503() -> LlmError {
        LlmError::Api {
            status: 503,
            message: "model overloaded".to_string(),
        }
    }

    struct NoConnector;

    #[async_trait]
    impl KnowledgeConnector for NoConnector {
        async fn fetch_documents(&self, _: &ConnectedAccount) -> Result<Vec<SourceDocument>, ConnectorError> {
            Ok(Vec::new())
        }
    }

    struct State {
        config: web::Data<AppConfig>,
        pool: web::Data<DbPool>,
        router: web::Data<TutorRouter>,
        knowledge: web::Data<KnowledgeSearch>,
        sync: web::Data<KnowledgeSync>,
        providers: web::Data<StreamProviders>,
    }

    fn state() -> State {
        state_with(Arc::new(EchoProvider))
    }

    fn state_with(provider: Arc<dyn LlmProvider>) -> State {
        let mut config = AppConfig::default();
        config.auth.tokens = vec![TokenEntry {
            token: TOKEN.to_string(),
            user_id: "alice".to_string(),
        }];
        let pool = db::get_connection(&DatabaseConfig {
            path: ":memory:".to_string(),
        })
        .unwrap();
        {
            let conn = acquire(&pool).unwrap();
            DbService::ensure_profile(&conn, "alice").unwrap();
        }

        State {
            router: web::Data::new(TutorRouter::new(
                pool.clone(),
                provider.clone(),
                provider.clone(),
                TutorSettings::from_config(&config),
            )),
            knowledge: web::Data::new(KnowledgeSearch::new(pool.clone(), config.knowledge.clone())),
            sync: web::Data::new(KnowledgeSync::new(pool.clone(), Arc::new(NoConnector), 50_000)),
            providers: web::Data::new(StreamProviders {
                chat: provider.clone(),
                vision: provider,
            }),
            config: web::Data::new(config),
            pool: web::Data::new(pool),
        }
    }

    macro_rules! test_app {
        ($state:expr) => {
            test::init_service(
                App::new()
                    .app_data($state.config.clone())
                    .app_data($state.pool.clone())
                    .app_data($state.router.clone())
                    .app_data($state.knowledge.clone())
                    .app_data($state.sync.clone())
                    .app_data($state.providers.clone())
                    .route("/health", web::get().to(|| async { HttpResponse::Ok().finish() }))
                    .wrap(BearerAuth)
                    .configure(routes::configure),
            )
            .await
        };
    }

    fn bearer() -> (&'static str, String) {
        ("Authorization", format!("Bearer {}", TOKEN))
    }

    #[actix_web::test]
    async fn test_auth_required_except_health() {
        let state = state();
        let app = test_app!(state);

        let req = test::TestRequest::get().uri("/health").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);

        let req = test::TestRequest::get().uri("/api/profile").to_request();
        let err = test::try_call_service(&app, req).await.err().expect("request should be rejected");
        assert_eq!(err.as_response_error().status_code(), StatusCode::UNAUTHORIZED);

        let req = test::TestRequest::get()
            .uri("/api/profile")
            .insert_header(("Authorization", "Bearer wrong"))
            .to_request();
        assert!(test::try_call_service(&app, req).await.is_err());

        let req = test::TestRequest::get()
            .uri(&format!("/api/profile?access_token={}", TOKEN))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let profile: Value = test::read_body_json(resp).await;
        assert_eq!(profile["id"], "alice");
        assert_eq!(profile["credits"], 0);
    }

    #[actix_web::test]
    async fn test_generate_solution_validation_and_free_tier() {
        let state = state();
        let app = test_app!(state);

        let req = test::TestRequest::post()
            .uri("/api/generate-solution")
            .insert_header(bearer())
            .set_json(json!({"image": IMAGE, "mode": "solve"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["code"], "VALIDATION_ERROR");

        let req = test::TestRequest::post()
            .uri("/api/generate-solution")
            .insert_header(bearer())
            .set_json(json!({"image": IMAGE, "mode": "feedback", "isSocratic": true}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["isPremium"], false);
        assert_eq!(body["provider"], "echo");
        assert_eq!(body["feedback"]["summary"], "Looks right");
        assert!(body["imageUrl"].is_null());
    }

    #[actix_web::test]
    async fn test_chat_streams_sse_frames() {
        let state = state();
        let app = test_app!(state);

        let req = test::TestRequest::post()
            .uri("/api/chat")
            .insert_header(bearer())
            .set_json(json!({
                "messages": [{"role": "user", "content": "What is a derivative?"}],
                "canvasContext": "f(x) = x^2",
                "isSocratic": false
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers().get("content-type").unwrap(), "text/event-stream");

        let body = test::read_body(resp).await;
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains(r#""content":"Hi""#));
        assert!(text.contains(r#""content":" there""#));
        assert!(text.ends_with(DONE_FRAME));

        let req = test::TestRequest::post()
            .uri("/api/chat")
            .insert_header(bearer())
            .set_json(json!({"messages": []}))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn test_go_deeper_requires_answer() {
        let state = state();
        let app = test_app!(state);

        let req = test::TestRequest::post()
            .uri("/api/go-deeper")
            .insert_header(bearer())
            .set_json(json!({"image": IMAGE}))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);

        let req = test::TestRequest::post()
            .uri("/api/go-deeper")
            .insert_header(bearer())
            .set_json(json!({"image": IMAGE, "originalAnswer": "x = 4", "conversationHistory": []}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let text = String::from_utf8(test::read_body(resp).await.to_vec()).unwrap();
        assert!(text.ends_with(DONE_FRAME));
    }

    #[actix_web::test]
    async fn test_knowledge_endpoints() {
        let state = state();
        let app = test_app!(state);

        let req = test::TestRequest::post()
            .uri("/api/knowledge/sync")
            .insert_header(bearer())
            .set_json(json!({}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body, json!({"success": true, "synced": 0}));

        let req = test::TestRequest::get()
            .uri("/api/knowledge/search?q=photosynthesis")
            .insert_header(bearer())
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["results"], json!([]));
    }

    #[actix_web::test]
    async fn test_whiteboard_lifecycle() {
        let state = state();
        let app = test_app!(state);

        let req = test::TestRequest::post()
            .uri("/api/whiteboards")
            .insert_header(bearer())
            .set_json(json!({"title": "Fractions"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let board: Value = test::read_body_json(resp).await;
        let id = board["id"].as_str().unwrap().to_string();
        let snapshot_uri = format!("/api/whiteboards/{}/snapshot", id);

        let req = test::TestRequest::put()
            .uri(&snapshot_uri)
            .insert_header(bearer())
            .set_json(json!({"data": {"shapes": [1, 2]}, "expectedVersion": 0}))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body, json!({"success": true, "version": 1}));

        let req = test::TestRequest::put()
            .uri(&snapshot_uri)
            .insert_header(bearer())
            .set_json(json!({"data": {"shapes": []}, "expectedVersion": 0}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        let req = test::TestRequest::get()
            .uri(&format!("/api/whiteboards/{}", id))
            .insert_header(bearer())
            .to_request();
        let loaded: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(loaded["data"], json!({"shapes": [1, 2]}));

        let req = test::TestRequest::get()
            .uri("/api/whiteboards")
            .insert_header(bearer())
            .to_request();
        let list: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(list.as_array().unwrap().len(), 1);

        let req = test::TestRequest::delete()
            .uri(&format!("/api/whiteboards/{}", id))
            .insert_header(bearer())
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NO_CONTENT);

        let req = test::TestRequest::get()
            .uri(&format!("/api/whiteboards/{}", id))
            .insert_header(bearer())
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn test_stream_failure_before_output_returns_error_envelope() {
        let state = state_with(Arc::new(FailingProvider {
            partial: None,
            error: missing_key,
        }));
        let app = test_app!(state);

        let req = test::TestRequest::post()
            .uri("/api/chat")
            .insert_header(bearer())
            .set_json(json!({"messages": [{"role": "user", "content": "hello"}]}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["code"], "MISSING_API_KEY");
        assert_eq!(body["details"]["provider"], "hackclub");

        let state = state_with(Arc::new(FailingProvider {
            partial: None,
            error: upstream_503,
        }));
        let app = test_app!(state);

        let req = test::TestRequest::post()
            .uri("/api/go-deeper")
            .insert_header(bearer())
            .set_json(json!({"image": IMAGE, "originalAnswer": "x = 4"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["code"], "UPSTREAM_ERROR");
        assert!(body["error"].as_str().unwrap().contains("model overloaded"));
    }

    #[actix_web::test]
    async fn test_stream_failure_after_output_ends_with_done() {
        let state = state_with(Arc::new(FailingProvider {
            partial: Some("Half an ans"),
            error: upstream_503,
        }));
        let app = test_app!(state);

        let req = test::TestRequest::post()
            .uri("/api/chat")
            .insert_header(bearer())
            .set_json(json!({"messages": [{"role": "user", "content": "hello"}]}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let text = String::from_utf8(test::read_body(resp).await.to_vec()).unwrap();
        assert!(text.contains(r#""content":"Half an ans""#));
        assert!(text.ends_with(DONE_FRAME));
    }

    #[actix_web::test]
    async fn test_generate_solution_provider_errors() {
        let state = state_with(Arc::new(FailingProvider {
            partial: None,
            error: missing_key,
        }));
        let app = test_app!(state);

        let req = test::TestRequest::post()
            .uri("/api/generate-solution")
            .insert_header(bearer())
            .set_json(json!({"image": IMAGE}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["code"], "MISSING_API_KEY");
        assert_eq!(body["details"]["provider"], "hackclub");
    }
}
