#[cfg(test)]
mod tests {
    use agathon::db::connection;
    use agathon::db::service::{DbService, NewKnowledgeEntry};
    use agathon::db::{AccountStatus, PlanStatus, PlanTier, SnapshotWrite};
    use chrono::{Duration, Utc};
    use serde_json::json;
    use uuid::Uuid;

    fn get_test_db() -> duckdb::Connection {
        let conn = duckdb::Connection::open_in_memory().unwrap();
        connection::init_schema(&conn).unwrap();
        conn
    }

    fn entry<'a>(source_id: &'a str, title: &'a str, content: &'a str) -> NewKnowledgeEntry<'a> {
        NewKnowledgeEntry {
            user_id: "alice",
            source: "googledrive",
            source_id,
            title,
            content,
            metadata: json!({"provider": "googledrive"}),
        }
    }

    #[test]
    fn test_profile_defaults_and_plan() {
        let conn = get_test_db();

        let profile = DbService::ensure_profile(&conn, "alice").unwrap();
        assert_eq!(profile.credits, 0);
        assert_eq!(profile.plan_tier, PlanTier::Free);
        assert_eq!(profile.plan_status, PlanStatus::Inactive);
        assert!(profile.plan_expires_at.is_none());

        // A second ensure keeps the existing row.
        DbService::grant_credits(&conn, "alice", 7).unwrap();
        assert_eq!(DbService::ensure_profile(&conn, "alice").unwrap().credits, 7);

        let expires = Utc::now() + Duration::days(30);
        DbService::set_plan(&conn, "alice", PlanTier::Premium, PlanStatus::Active, Some(expires)).unwrap();
        let profile = DbService::get_profile(&conn, "alice").unwrap().unwrap();
        assert_eq!(profile.plan_tier, PlanTier::Premium);
        assert_eq!(profile.plan_status, PlanStatus::Active);
        let stored = profile.plan_expires_at.unwrap();
        assert!((stored - expires).num_seconds().abs() <= 1);

        assert!(DbService::get_profile(&conn, "nobody").unwrap().is_none());
    }

    #[test]
    fn test_deduct_credits_never_goes_negative() {
        let conn = get_test_db();
        DbService::ensure_profile(&conn, "alice").unwrap();
        DbService::grant_credits(&conn, "alice", 3).unwrap();

        assert_eq!(DbService::deduct_credits(&conn, "alice", 2).unwrap(), Some(1));
        assert_eq!(DbService::deduct_credits(&conn, "alice", 2).unwrap(), None);
        assert_eq!(DbService::get_profile(&conn, "alice").unwrap().unwrap().credits, 1);

        assert_eq!(DbService::deduct_credits(&conn, "ghost", 1).unwrap(), None);
        assert_eq!(DbService::grant_credits(&conn, "alice", -5).unwrap(), None);
    }

    #[test]
    fn test_knowledge_upsert_replaces_and_caps() {
        let conn = get_test_db();

        DbService::upsert_knowledge(&conn, &entry("doc-1", "Old title", "old content"), 50_000).unwrap();
        DbService::upsert_knowledge(&conn, &entry("doc-1", "Photosynthesis notes", "chlorophyll absorbs light"), 50_000)
            .unwrap();

        assert_eq!(DbService::count_knowledge(&conn, "alice").unwrap(), 1);
        let stored = DbService::get_knowledge(&conn, "alice", "googledrive", "doc-1").unwrap().unwrap();
        assert_eq!(stored.title, "Photosynthesis notes");
        assert_eq!(stored.content, "chlorophyll absorbs light");
        assert_eq!(stored.metadata["provider"], "googledrive");

        let long = "é".repeat(120);
        DbService::upsert_knowledge(&conn, &entry("doc-2", "Long", &long), 100).unwrap();
        let stored = DbService::get_knowledge(&conn, "alice", "googledrive", "doc-2").unwrap().unwrap();
        assert_eq!(stored.content.chars().count(), 100);
    }

    #[test]
    fn test_knowledge_search_is_user_scoped() {
        let conn = get_test_db();
        DbService::upsert_knowledge(&conn, &entry("doc-1", "Cells", "Mitochondria produce ATP"), 50_000).unwrap();
        DbService::upsert_knowledge(
            &conn,
            &NewKnowledgeEntry {
                user_id: "bob",
                ..entry("doc-9", "Cells", "Mitochondria produce ATP")
            },
            50_000,
        )
        .unwrap();

        let terms = vec!["mitochondria".to_string(), "atp".to_string()];
        let hits = DbService::search_knowledge_all_terms(&conn, "alice", &terms, 3).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].source_id, "doc-1");

        let terms = vec!["mitochondria".to_string(), "ribosome".to_string()];
        assert!(DbService::search_knowledge_all_terms(&conn, "alice", &terms, 3).unwrap().is_empty());

        let by_title = DbService::search_knowledge_single_term(&conn, "alice", "cells", 3).unwrap();
        assert_eq!(by_title.len(), 1);
    }

    #[test]
    fn test_whiteboard_snapshot_round_trip() {
        let conn = get_test_db();
        let board = DbService::create_whiteboard(&conn, "alice", "Algebra").unwrap();
        assert_eq!(board.version, 0);
        assert!(board.data.is_none());

        let snapshot = json!({"shapes": [{"id": "s1", "type": "draw", "points": [[0, 0], [10, 12]]}]});
        let result = DbService::save_snapshot(&conn, "alice", board.id, &snapshot, Some("data:image/png;base64,AAAA"), None)
            .unwrap();
        assert_eq!(result, SnapshotWrite::Saved { version: 1 });

        let loaded = DbService::get_whiteboard(&conn, "alice", board.id).unwrap().unwrap();
        assert_eq!(loaded.data, Some(snapshot));
        assert_eq!(loaded.preview.as_deref(), Some("data:image/png;base64,AAAA"));

        // Other users can neither read nor write it.
        assert!(DbService::get_whiteboard(&conn, "bob", board.id).unwrap().is_none());
        let denied = DbService::save_snapshot(&conn, "bob", board.id, &json!({}), None, None).unwrap();
        assert_eq!(denied, SnapshotWrite::NotFound);
    }

    #[test]
    fn test_whiteboard_compare_and_swap() {
        let conn = get_test_db();
        let board = DbService::create_whiteboard(&conn, "alice", "Geometry").unwrap();

        let first = DbService::save_snapshot(&conn, "alice", board.id, &json!({"v": 1}), None, Some(0)).unwrap();
        assert_eq!(first, SnapshotWrite::Saved { version: 1 });

        let stale = DbService::save_snapshot(&conn, "alice", board.id, &json!({"v": 2}), None, Some(0)).unwrap();
        assert_eq!(stale, SnapshotWrite::VersionMismatch { current: 1 });

        let loaded = DbService::get_whiteboard(&conn, "alice", board.id).unwrap().unwrap();
        assert_eq!(loaded.data, Some(json!({"v": 1})));

        let missing = DbService::save_snapshot(&conn, "alice", Uuid::new_v4(), &json!({}), None, Some(0)).unwrap();
        assert_eq!(missing, SnapshotWrite::NotFound);
    }

    #[test]
    fn test_whiteboard_list_and_delete() {
        let conn = get_test_db();
        let a = DbService::create_whiteboard(&conn, "alice", "One").unwrap();
        DbService::create_whiteboard(&conn, "alice", "Two").unwrap();
        DbService::create_whiteboard(&conn, "bob", "Other").unwrap();

        assert_eq!(DbService::list_whiteboards(&conn, "alice", 10, 0).unwrap().len(), 2);
        assert_eq!(DbService::list_whiteboards(&conn, "alice", 1, 0).unwrap().len(), 1);

        assert!(!DbService::delete_whiteboard(&conn, "bob", a.id).unwrap());
        assert!(DbService::delete_whiteboard(&conn, "alice", a.id).unwrap());
        assert_eq!(DbService::list_whiteboards(&conn, "alice", 10, 0).unwrap().len(), 1);
    }

    #[test]
    fn test_connected_accounts_filtering() {
        let conn = get_test_db();
        DbService::add_connected_account(&conn, "ca_drive", "alice", "googledrive").unwrap();
        DbService::add_connected_account(&conn, "ca_class", "alice", "googleclassroom").unwrap();

        assert_eq!(DbService::list_connected_accounts(&conn, "alice", None).unwrap().len(), 2);
        let drive = DbService::list_connected_accounts(&conn, "alice", Some("googledrive")).unwrap();
        assert_eq!(drive.len(), 1);
        assert_eq!(drive[0].id, "ca_drive");

        DbService::set_account_status(&conn, "ca_drive", AccountStatus::Expired).unwrap();
        let active = DbService::list_connected_accounts(&conn, "alice", None).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, "ca_class");

        // Reconnecting reactivates it.
        let again = DbService::add_connected_account(&conn, "ca_drive", "alice", "googledrive").unwrap();
        assert_eq!(again.status, AccountStatus::Active);
    }

    #[test]
    fn test_schema_needs_no_extension_download() {
        let conn = duckdb::Connection::open_in_memory().unwrap();
        conn.execute_batch("SET autoinstall_known_extensions = false; SET autoload_known_extensions = false;")
            .unwrap();
        connection::init_schema(&conn).unwrap();

        let board = DbService::create_whiteboard(&conn, "alice", "Offline").unwrap();
        DbService::save_snapshot(&conn, "alice", board.id, &json!({"shapes": [1, 2, 3]}), None, None).unwrap();

        let count: i64 = conn
            .query_row(
                "SELECT json_array_length(data, '$.shapes') FROM whiteboards WHERE id = ?",
                [board.id.to_string()],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 3);
    }
}
