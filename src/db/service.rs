use crate::db::models::{
    AccountStatus, ConnectedAccount, KnowledgeEntry, PlanStatus, PlanTier, Profile, SnapshotWrite,
    Whiteboard,
};
use chrono::{DateTime, NaiveDateTime, Utc};
use duckdb::{params, params_from_iter, Connection, Result as DbResult, Row};
use uuid::Uuid;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";
// DuckDB timestamps stop at microseconds.
const TIMESTAMP_WRITE_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// A document fetched from a connector, ready to be upserted.
#[derive(Debug, Clone, PartialEq)]
pub struct NewKnowledgeEntry<'a> {
    pub user_id: &'a str,
    pub source: &'a str,
    pub source_id: &'a str,
    pub title: &'a str,
    pub content: &'a str,
    pub metadata: serde_json::Value,
}

pub struct DbService;

// Timestamps are written from Rust and read back `AS VARCHAR`, so both sides
// agree on UTC without depending on the DuckDB session time zone.
fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_WRITE_FORMAT).to_string()
}

fn parse_timestamp(text: &str) -> DateTime<Utc> {
    if let Ok(ts) = text.parse::<DateTime<Utc>>() {
        return ts;
    }
    NaiveDateTime::parse_from_str(text, TIMESTAMP_FORMAT)
        .map(|naive| naive.and_utc())
        .unwrap_or_else(|_| Utc::now())
}

fn now_string() -> String {
    format_timestamp(Utc::now())
}

/// Keeps at most `max_chars` characters without splitting a code point.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

const PROFILE_COLUMNS: &str = "id, credits, plan_tier, plan_status, CAST(plan_expires_at AS VARCHAR), CAST(created_at AS VARCHAR), CAST(updated_at AS VARCHAR)";
const KNOWLEDGE_COLUMNS: &str = "id, user_id, source, source_id, title, content, CAST(metadata AS VARCHAR), CAST(synced_at AS VARCHAR)";
const WHITEBOARD_COLUMNS: &str = "id, user_id, title, CAST(data AS VARCHAR), preview, version, CAST(created_at AS VARCHAR), CAST(updated_at AS VARCHAR)";

impl DbService {
    fn row_to_profile(row: &Row) -> DbResult<Profile> {
        let expires: Option<String> = row.get(4)?;
        Ok(Profile {
            id: row.get(0)?,
            credits: row.get(1)?,
            plan_tier: PlanTier::from(row.get::<_, String>(2)?.as_str()),
            plan_status: PlanStatus::from(row.get::<_, String>(3)?.as_str()),
            plan_expires_at: expires.as_deref().map(parse_timestamp),
            created_at: parse_timestamp(&row.get::<_, String>(5)?),
            updated_at: parse_timestamp(&row.get::<_, String>(6)?),
        })
    }

    fn row_to_knowledge(row: &Row) -> DbResult<KnowledgeEntry> {
        let meta_str: Option<String> = row.get(6)?;
        let metadata = meta_str
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or(serde_json::json!({}));

        Ok(KnowledgeEntry {
            id: row.get(0)?,
            user_id: row.get(1)?,
            source: row.get(2)?,
            source_id: row.get(3)?,
            title: row.get(4)?,
            content: row.get(5)?,
            metadata,
            synced_at: parse_timestamp(&row.get::<_, String>(7)?),
        })
    }

    fn row_to_whiteboard(row: &Row) -> DbResult<Whiteboard> {
        let data_str: Option<String> = row.get(3)?;
        Ok(Whiteboard {
            id: row.get::<_, String>(0)?.parse().unwrap_or_default(),
            user_id: row.get(1)?,
            title: row.get(2)?,
            data: data_str.and_then(|s| serde_json::from_str(&s).ok()),
            preview: row.get(4)?,
            version: row.get(5)?,
            created_at: parse_timestamp(&row.get::<_, String>(6)?),
            updated_at: parse_timestamp(&row.get::<_, String>(7)?),
        })
    }

    fn row_to_account(row: &Row) -> DbResult<ConnectedAccount> {
        Ok(ConnectedAccount {
            id: row.get(0)?,
            user_id: row.get(1)?,
            provider: row.get(2)?,
            status: AccountStatus::from(row.get::<_, String>(3)?.as_str()),
            created_at: parse_timestamp(&row.get::<_, String>(4)?),
        })
    }

    // --- Profiles ---

    /// Creates a free-tier profile with no credits unless one already exists.
    pub fn ensure_profile(conn: &Connection, user_id: &str) -> DbResult<Profile> {
        let now = now_string();
        conn.execute(
            "INSERT INTO profiles (id, created_at, updated_at) VALUES (?, ?, ?) ON CONFLICT (id) DO NOTHING",
            params![user_id, now, now],
        )?;

        match Self::get_profile(conn, user_id)? {
            Some(profile) => Ok(profile),
            None => Err(duckdb::Error::QueryReturnedNoRows),
        }
    }

    pub fn get_profile(conn: &Connection, user_id: &str) -> DbResult<Option<Profile>> {
        let sql = format!("SELECT {} FROM profiles WHERE id = ?", PROFILE_COLUMNS);
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query_map(params![user_id], Self::row_to_profile)?;

        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    pub fn grant_credits(conn: &Connection, user_id: &str, amount: i64) -> DbResult<Option<i64>> {
        let mut stmt = conn.prepare(
            "UPDATE profiles SET credits = credits + ?, updated_at = ? WHERE id = ? AND credits + ? >= 0 RETURNING credits",
        )?;
        let mut rows = stmt.query_map(params![amount, now_string(), user_id, amount], |row| row.get(0))?;

        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    pub fn set_plan(
        conn: &Connection,
        user_id: &str,
        tier: PlanTier,
        status: PlanStatus,
        expires_at: Option<DateTime<Utc>>,
    ) -> DbResult<usize> {
        conn.execute(
            "UPDATE profiles SET plan_tier = ?, plan_status = ?, plan_expires_at = ?, updated_at = ? WHERE id = ?",
            params![
                tier.as_str(),
                status.as_str(),
                expires_at.map(format_timestamp),
                now_string(),
                user_id
            ],
        )
    }

    /// Atomically takes `cost` credits if the balance covers it.
    ///
    /// Returns the new balance, or `None` when the balance was insufficient (or
    /// the profile does not exist). Check and decrement are one statement, so
    /// concurrent callers cannot both spend the same credits.
    pub fn deduct_credits(conn: &Connection, user_id: &str, cost: i64) -> DbResult<Option<i64>> {
        let mut stmt = conn.prepare(
            "UPDATE profiles SET credits = credits - ?, updated_at = ? WHERE id = ? AND credits >= ? RETURNING credits",
        )?;
        let mut rows = stmt.query_map(params![cost, now_string(), user_id, cost], |row| row.get(0))?;

        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    // --- Knowledge base ---

    /// Inserts or replaces the entry for (user_id, source, source_id). Content is capped at `max_chars`.
    pub fn upsert_knowledge(conn: &Connection, entry: &NewKnowledgeEntry, max_chars: usize) -> DbResult<()> {
        let content = truncate_chars(entry.content, max_chars);
        conn.execute(
            "INSERT INTO knowledge_base (id, user_id, source, source_id, title, content, metadata, synced_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (user_id, source, source_id) DO UPDATE SET
                title = excluded.title,
                content = excluded.content,
                metadata = excluded.metadata,
                synced_at = excluded.synced_at",
            params![
                Uuid::new_v4().to_string(),
                entry.user_id,
                entry.source,
                entry.source_id,
                entry.title,
                content,
                entry.metadata.to_string(),
                now_string()
            ],
        )?;
        Ok(())
    }

    /// Rows whose content contains every term (case-insensitive).
    pub fn search_knowledge_all_terms(
        conn: &Connection,
        user_id: &str,
        terms: &[String],
        limit: usize,
    ) -> DbResult<Vec<KnowledgeEntry>> {
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let mut sql = format!("SELECT {} FROM knowledge_base WHERE user_id = ?", KNOWLEDGE_COLUMNS);
        let mut values = vec![user_id.to_string()];
        for term in terms {
            sql.push_str(" AND content ILIKE ?");
            values.push(format!("%{}%", term));
        }
        sql.push_str(&format!(" ORDER BY synced_at DESC, title, source_id LIMIT {}", limit));

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values.iter()), Self::row_to_knowledge)?;
        rows.collect()
    }

    /// Rows whose title or content contains `term` (case-insensitive).
    pub fn search_knowledge_single_term(
        conn: &Connection,
        user_id: &str,
        term: &str,
        limit: usize,
    ) -> DbResult<Vec<KnowledgeEntry>> {
        let sql = format!(
            "SELECT {} FROM knowledge_base WHERE user_id = ? AND (title ILIKE ? OR content ILIKE ?) ORDER BY synced_at DESC, title, source_id LIMIT {}",
            KNOWLEDGE_COLUMNS, limit
        );
        let pattern = format!("%{}%", term);

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![user_id, pattern, pattern], Self::row_to_knowledge)?;
        rows.collect()
    }

    pub fn get_knowledge(
        conn: &Connection,
        user_id: &str,
        source: &str,
        source_id: &str,
    ) -> DbResult<Option<KnowledgeEntry>> {
        let sql = format!(
            "SELECT {} FROM knowledge_base WHERE user_id = ? AND source = ? AND source_id = ?",
            KNOWLEDGE_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query_map(params![user_id, source, source_id], Self::row_to_knowledge)?;

        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    pub fn count_knowledge(conn: &Connection, user_id: &str) -> DbResult<i64> {
        conn.query_row(
            "SELECT COUNT(*) FROM knowledge_base WHERE user_id = ?",
            params![user_id],
            |row| row.get(0),
        )
    }

    // --- Whiteboards ---

    pub fn create_whiteboard(conn: &Connection, user_id: &str, title: &str) -> DbResult<Whiteboard> {
        let id = Uuid::new_v4();
        let now = now_string();
        conn.execute(
            "INSERT INTO whiteboards (id, user_id, title, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
            params![id.to_string(), user_id, title, now, now],
        )?;

        match Self::get_whiteboard(conn, user_id, id)? {
            Some(board) => Ok(board),
            None => Err(duckdb::Error::QueryReturnedNoRows),
        }
    }

    pub fn get_whiteboard(conn: &Connection, user_id: &str, id: Uuid) -> DbResult<Option<Whiteboard>> {
        let sql = format!("SELECT {} FROM whiteboards WHERE id = ? AND user_id = ?", WHITEBOARD_COLUMNS);
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query_map(params![id.to_string(), user_id], Self::row_to_whiteboard)?;

        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    pub fn list_whiteboards(conn: &Connection, user_id: &str, limit: usize, offset: usize) -> DbResult<Vec<Whiteboard>> {
        let sql = format!(
            "SELECT {} FROM whiteboards WHERE user_id = ? ORDER BY updated_at DESC LIMIT ? OFFSET ?",
            WHITEBOARD_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![user_id, limit as i64, offset as i64], Self::row_to_whiteboard)?;
        rows.collect()
    }

    /// Replaces the stored snapshot wholesale.
    ///
    /// With `expected_version` the write only lands if nobody saved in between;
    /// without it the last writer wins.
    pub fn save_snapshot(
        conn: &Connection,
        user_id: &str,
        id: Uuid,
        data: &serde_json::Value,
        preview: Option<&str>,
        expected_version: Option<i64>,
    ) -> DbResult<SnapshotWrite> {
        let data = data.to_string();
        let now = now_string();
        let id_str = id.to_string();

        let written: Option<i64> = match expected_version {
            Some(version) => {
                let mut stmt = conn.prepare(
                    "UPDATE whiteboards SET data = ?, preview = COALESCE(?, preview), version = version + 1, updated_at = ?
                     WHERE id = ? AND user_id = ? AND version = ? RETURNING version",
                )?;
                let mut rows = stmt.query_map(params![data, preview, now, id_str, user_id, version], |row| row.get(0))?;
                rows.next().transpose()?
            }
            None => {
                let mut stmt = conn.prepare(
                    "UPDATE whiteboards SET data = ?, preview = COALESCE(?, preview), version = version + 1, updated_at = ?
                     WHERE id = ? AND user_id = ? RETURNING version",
                )?;
                let mut rows = stmt.query_map(params![data, preview, now, id_str, user_id], |row| row.get(0))?;
                rows.next().transpose()?
            }
        };

        if let Some(version) = written {
            return Ok(SnapshotWrite::Saved { version });
        }

        match Self::get_whiteboard(conn, user_id, id)? {
            Some(board) => Ok(SnapshotWrite::VersionMismatch { current: board.version }),
            None => Ok(SnapshotWrite::NotFound),
        }
    }

    pub fn delete_whiteboard(conn: &Connection, user_id: &str, id: Uuid) -> DbResult<bool> {
        let deleted = conn.execute(
            "DELETE FROM whiteboards WHERE id = ? AND user_id = ?",
            params![id.to_string(), user_id],
        )?;
        Ok(deleted > 0)
    }

    // --- Connected accounts ---

    pub fn add_connected_account(conn: &Connection, id: &str, user_id: &str, provider: &str) -> DbResult<ConnectedAccount> {
        conn.execute(
            "INSERT INTO connected_accounts (id, user_id, provider, status, created_at) VALUES (?, ?, ?, 'active', ?)
             ON CONFLICT (id) DO UPDATE SET status = 'active'",
            params![id, user_id, provider, now_string()],
        )?;

        let mut stmt = conn.prepare(
            "SELECT id, user_id, provider, status, CAST(created_at AS VARCHAR) FROM connected_accounts WHERE id = ?",
        )?;
        let mut rows = stmt.query_map(params![id], Self::row_to_account)?;
        match rows.next() {
            Some(row) => row,
            None => Err(duckdb::Error::QueryReturnedNoRows),
        }
    }

    /// Active accounts for a user, optionally restricted to one provider.
    pub fn list_connected_accounts(
        conn: &Connection,
        user_id: &str,
        provider: Option<&str>,
    ) -> DbResult<Vec<ConnectedAccount>> {
        let rows = match provider {
            Some(provider) => {
                let mut stmt = conn.prepare(
                    "SELECT id, user_id, provider, status, CAST(created_at AS VARCHAR) FROM connected_accounts
                     WHERE user_id = ? AND status = 'active' AND provider = ? ORDER BY created_at, id",
                )?;
                let rows = stmt.query_map(params![user_id, provider], Self::row_to_account)?;
                rows.collect::<DbResult<Vec<_>>>()?
            }
            None => {
                let mut stmt = conn.prepare(
                    "SELECT id, user_id, provider, status, CAST(created_at AS VARCHAR) FROM connected_accounts
                     WHERE user_id = ? AND status = 'active' ORDER BY created_at, id",
                )?;
                let rows = stmt.query_map(params![user_id], Self::row_to_account)?;
                rows.collect::<DbResult<Vec<_>>>()?
            }
        };
        Ok(rows)
    }

    pub fn set_account_status(conn: &Connection, id: &str, status: AccountStatus) -> DbResult<usize> {
        conn.execute(
            "UPDATE connected_accounts SET status = ? WHERE id = ?",
            params![status.as_str(), id],
        )
    }
}
