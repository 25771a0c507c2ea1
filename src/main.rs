use actix_web::{web, App, HttpResponse, HttpServer, Responder};
use agathon::api::middleware::BearerAuth;
use agathon::api::routes::StreamProviders;
use agathon::cli::{commands::{Cli, Commands}, run_cli};
use agathon::config::AppConfig;
use agathon::db;
use agathon::knowledge::{sync::{ComposioConnector, KnowledgeSync}, KnowledgeSearch};
use agathon::llm::ProviderFactory;
use agathon::tutor::{TutorRouter, TutorSettings};
use clap::Parser;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

async fn health() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({"status": "healthy"}))
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    if !matches!(cli.command, Commands::Serve) {
        if let Err(e) = run_cli(cli.command, &cli.config).await {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
        return Ok(());
    }

    info!("Starting Agathon tutoring server...");

    let config = match AppConfig::load(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    let db_pool = match db::get_connection(&config.database) {
        Ok(pool) => pool,
        Err(e) => {
            error!("Failed to initialize database: {}", e);
            std::process::exit(1);
        }
    };

    if config.auth.tokens.is_empty() {
        warn!("No auth tokens configured; every /api request will be rejected");
    }
    for provider in [&config.providers.premium, &config.providers.free] {
        if provider.api_key.is_empty() {
            warn!(provider = %provider.name, "API key missing; requests to this provider will fail");
        }
    }

    let premium = ProviderFactory::create_premium(&config);
    let free = ProviderFactory::create_free(&config);

    let router = web::Data::new(TutorRouter::new(
        db_pool.clone(),
        premium.clone(),
        free.clone(),
        TutorSettings::from_config(&config),
    ));
    let knowledge = web::Data::new(KnowledgeSearch::new(db_pool.clone(), config.knowledge.clone()));
    let sync = web::Data::new(KnowledgeSync::new(
        db_pool.clone(),
        Arc::new(ComposioConnector::from_config(&config.connectors.composio)),
        config.knowledge.max_content_chars,
    ));
    let providers = web::Data::new(StreamProviders {
        chat: free,
        vision: premium,
    });

    let host = config.server.host.clone();
    let port = config.server.port;
    let config = web::Data::new(config);
    let db_pool = web::Data::new(db_pool);

    info!("Server listening on {}:{}", host, port);

    HttpServer::new(move || {
        App::new()
            .app_data(config.clone())
            .app_data(db_pool.clone())
            .app_data(router.clone())
            .app_data(knowledge.clone())
            .app_data(sync.clone())
            .app_data(providers.clone())
            .route("/health", web::get().to(health))
            .wrap(BearerAuth)
            .configure(agathon::api::routes::configure)
    })
    .bind((host, port))?
    .run()
    .await
}
