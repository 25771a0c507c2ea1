pub mod commands;

use chrono::{Duration, Utc};
use std::error::Error;
use std::io::{self, Write};
use std::sync::Arc;

use crate::cli::commands::{Commands, KnowledgeAction, ProfileAction, WhiteboardAction};
use crate::client::{ChatRole, ConversationConfig, SessionStatus, SseEndpoint, StreamingConversation};
use crate::config::AppConfig;
use crate::db::{get_connection, service::DbService, DbPool, PlanStatus, PlanTier};
use crate::error::AppError;
use crate::knowledge::{sync::{ComposioConnector, KnowledgeSync}, KnowledgeSearch};
use crate::tutor::prompt::{build_instruction_raw, RequestSource};

pub type CliResult = Result<(), Box<dyn Error>>;

pub async fn run_cli(command: Commands, config_path: &str) -> CliResult {
    let config = AppConfig::load(config_path)?;

    match command {
        Commands::Serve => Err("serve is handled by the server entry point".into()),
        Commands::Prompt {
            mode,
            source,
            socratic,
            prompt,
        } => {
            let source: RequestSource = source.parse().map_err(AppError::Validation)?;
            println!("{}", build_instruction_raw(&mode, source, socratic, prompt.as_deref()));
            Ok(())
        }
        Commands::Profile { action } => {
            let pool = get_connection(&config.database)?;
            run_profile(&pool, action)
        }
        Commands::Knowledge { action } => {
            let pool = get_connection(&config.database)?;
            run_knowledge(&pool, &config, action).await
        }
        Commands::Whiteboard { action } => {
            let pool = get_connection(&config.database)?;
            run_whiteboard(&pool, action)
        }
        Commands::Chat {
            server,
            token,
            socratic,
            canvas,
        } => {
            let token = token.or_else(|| config.auth.tokens.first().map(|t| t.token.clone()));
            run_repl(&server, token, socratic, canvas).await
        }
    }
}

fn run_profile(pool: &DbPool, action: ProfileAction) -> CliResult {
    let conn = crate::db::acquire(pool)?;
    match action {
        ProfileAction::Show { user } => {
            let profile = DbService::ensure_profile(&conn, &user)?;
            println!("{}", serde_json::to_string_pretty(&profile)?);
        }
        ProfileAction::Grant { user, amount } => {
            DbService::ensure_profile(&conn, &user)?;
            match DbService::grant_credits(&conn, &user, amount)? {
                Some(balance) => println!("{} now has {} credits", user, balance),
                None => println!("Balance cannot go below zero; nothing changed."),
            }
        }
        ProfileAction::SetPlan {
            user,
            tier,
            status,
            days,
        } => {
            DbService::ensure_profile(&conn, &user)?;
            let expires_at = days.map(|d| Utc::now() + Duration::days(d));
            DbService::set_plan(
                &conn,
                &user,
                PlanTier::from(tier.as_str()),
                PlanStatus::from(status.as_str()),
                expires_at,
            )?;
            println!("Updated plan for {}", user);
        }
    }
    Ok(())
}

async fn run_knowledge(pool: &DbPool, config: &AppConfig, action: KnowledgeAction) -> CliResult {
    match action {
        KnowledgeAction::Search { user, query } => {
            let search = KnowledgeSearch::new(pool.clone(), config.knowledge.clone());
            let results = search.search(&user, &query)?;
            if results.is_empty() {
                println!("No matches.");
            }
            for result in results {
                println!("--- {} [{}:{}]", result.title, result.source, result.source_id);
                println!("{}\n", result.snippet);
            }
        }
        KnowledgeAction::Sync { user, provider } => {
            let sync = KnowledgeSync::new(
                pool.clone(),
                Arc::new(ComposioConnector::from_config(&config.connectors.composio)),
                config.knowledge.max_content_chars,
            );
            let report = sync.sync_user(&user, provider.as_deref()).await?;
            println!("Synced {} documents", report.synced);
            for account in report.expired_accounts {
                println!("Connection {} expired; reconnect it", account);
            }
            for account in report.failed_accounts {
                println!("Connection {} failed; see logs", account);
            }
        }
        KnowledgeAction::AddAccount { user, id, provider } => {
            let conn = crate::db::acquire(pool)?;
            let account = DbService::add_connected_account(&conn, &id, &user, &provider)?;
            println!("Added {} account {} for {}", account.provider, account.id, account.user_id);
        }
    }
    Ok(())
}

fn run_whiteboard(pool: &DbPool, action: WhiteboardAction) -> CliResult {
    let conn = crate::db::acquire(pool)?;
    match action {
        WhiteboardAction::List { user, limit } => {
            let boards = DbService::list_whiteboards(&conn, &user, limit, 0)?;
            if boards.is_empty() {
                println!("No whiteboards found.");
                return Ok(());
            }
            println!("{:<38} | {:<8} | {:<20} | {}", "ID", "Version", "Updated At", "Title");
            println!("{:-<38}-+-{:-<8}-+-{:-<20}-+-{:-<20}", "", "", "", "");
            for b in boards {
                println!(
                    "{:<38} | {:<8} | {:<20} | {}",
                    b.id.to_string(),
                    b.version,
                    b.updated_at.format("%Y-%m-%d %H:%M:%S"),
                    b.title
                );
            }
        }
        WhiteboardAction::Show { user, id } => match DbService::get_whiteboard(&conn, &user, id)? {
            Some(board) => println!("{}", serde_json::to_string_pretty(&board)?),
            None => println!("Whiteboard {} not found.", id),
        },
    }
    Ok(())
}

fn flush_stdout() {
    let _ = io::stdout().flush();
}

/// Prints the growing assistant reply until the turn settles or Ctrl-C stops it.
async fn stream_reply(conversation: &StreamingConversation<SseEndpoint>) {
    let mut updates = conversation.subscribe();
    let mut printed = String::new();

    loop {
        let reply = conversation
            .messages()
            .last()
            .filter(|m| m.role == ChatRole::Assistant)
            .map(|m| m.content.clone())
            .unwrap_or_default();
        match reply.strip_prefix(printed.as_str()) {
            Some(rest) => print!("{}", rest),
            None => print!("\n{}", reply),
        }
        flush_stdout();
        printed = reply;

        if !conversation.is_busy() {
            break;
        }
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                if let Some(text) = conversation.stop() {
                    print!("\n(stopped; \"{}\" was discarded)", text);
                }
                break;
            }
        }
    }
    println!();
}

async fn run_repl(server: &str, token: Option<String>, socratic: bool, canvas: Option<String>) -> CliResult {
    let conversation = StreamingConversation::new(
        SseEndpoint::chat(server, token),
        ConversationConfig::chat(canvas, socratic),
    );

    println!("--- Agathon Tutor ---");
    println!("Server: {}", server);
    println!("Type /clear to start over, /exit to quit.");
    println!("---------------------");

    loop {
        print!("\nYou> ");
        flush_stdout();

        let mut input = String::new();
        if io::stdin().read_line(&mut input)? == 0 {
            break;
        }
        let text = input.trim();

        if text.is_empty() {
            continue;
        }
        if text == "/exit" || text == "/quit" {
            break;
        }
        if text == "/clear" {
            conversation.clear();
            println!("History cleared.");
            continue;
        }

        print!("Tutor> ");
        flush_stdout();
        conversation.send_message(text);
        stream_reply(&conversation).await;

        if let SessionStatus::Error(e) = conversation.status() {
            eprintln!("Request failed: {}", e);
        }
    }
    Ok(())
}
