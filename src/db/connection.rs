use crate::config::DatabaseConfig;
use crate::error::{AppError, AppResult};
use duckdb::{Connection, Result as DbResult};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::info;

pub type DbPool = Arc<Mutex<Connection>>;

pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS profiles (
    id VARCHAR PRIMARY KEY,
    credits BIGINT NOT NULL DEFAULT 0 CHECK (credits >= 0),
    plan_tier VARCHAR NOT NULL DEFAULT 'free',
    plan_status VARCHAR NOT NULL DEFAULT 'inactive',
    plan_expires_at TIMESTAMP,
    created_at TIMESTAMP NOT NULL,
    updated_at TIMESTAMP NOT NULL
);

CREATE TABLE IF NOT EXISTS knowledge_base (
    id VARCHAR PRIMARY KEY,
    user_id VARCHAR NOT NULL,
    source VARCHAR NOT NULL,
    source_id VARCHAR NOT NULL,
    title VARCHAR NOT NULL,
    content TEXT NOT NULL,
    metadata JSON DEFAULT '{}',
    synced_at TIMESTAMP NOT NULL,
    UNIQUE (user_id, source, source_id)
);

CREATE TABLE IF NOT EXISTS whiteboards (
    id VARCHAR PRIMARY KEY,
    user_id VARCHAR NOT NULL,
    title VARCHAR NOT NULL,
    data JSON,
    preview VARCHAR,
    version BIGINT NOT NULL DEFAULT 0,
    created_at TIMESTAMP NOT NULL,
    updated_at TIMESTAMP NOT NULL
);

CREATE TABLE IF NOT EXISTS connected_accounts (
    id VARCHAR PRIMARY KEY,
    user_id VARCHAR NOT NULL,
    provider VARCHAR NOT NULL,
    status VARCHAR NOT NULL DEFAULT 'active',
    created_at TIMESTAMP NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_knowledge_user ON knowledge_base(user_id);
CREATE INDEX IF NOT EXISTS idx_whiteboards_user ON whiteboards(user_id);
"#;

pub fn get_connection(config: &DatabaseConfig) -> DbResult<DbPool> {
    info!("Connecting to DuckDB at {}", config.path);
    let conn = if config.path == ":memory:" {
        Connection::open_in_memory()?
    } else {
        Connection::open(&config.path)?
    };

    init_schema(&conn)?;

    Ok(Arc::new(Mutex::new(conn)))
}

pub fn init_schema(conn: &Connection) -> DbResult<()> {
    info!("Initializing database schema");
    conn.execute_batch(SCHEMA)?;
    Ok(())
}

/// Locks the shared connection. Never hold the guard across an `.await`.
pub fn acquire(pool: &DbPool) -> AppResult<MutexGuard<'_, Connection>> {
    pool.lock()
        .map_err(|_| AppError::Persistence("database connection lock poisoned".to_string()))
}
