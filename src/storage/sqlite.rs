//! SQLite storage backend for attribution records

use super::traits::{
    CommitRangeRow, IngestOutcome, OpenStore, StorageError, StorageResult, Totals, TraceStore,
};
use crate::record::{
    AttributionRecord, Contributor, ContributorType, ConversationEvidence, RangeEvidence,
};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Records of a commit that reads may see: completely ingested, and
/// placeholder records only while the commit has no ranges from real
/// evidence.
const VISIBLE_RECORD: &str = r#"
    r.repo_id = ?1 AND r.revision = ?2 AND r.complete = 1
    AND (r.ground_truth = 1 OR NOT EXISTS (
        SELECT 1 FROM trace_records g
        JOIN trace_files gf ON gf.record_id = g.id
        JOIN trace_conversations gc ON gc.file_id = gf.id
        JOIN trace_ranges gr ON gr.conversation_id = gc.id
        WHERE g.repo_id = r.repo_id AND g.revision = r.revision
          AND g.complete = 1 AND g.ground_truth = 1
    ))
"#;

/// Joins a commit's visible records down to their ranges.
const RANGE_JOIN: &str = r#"
    FROM trace_records r
    JOIN trace_files tf ON tf.record_id = r.id
    JOIN trace_conversations tc ON tc.file_id = tf.id
    JOIN trace_ranges tr ON tr.conversation_id = tc.id
    WHERE
"#;

/// SQLite-backed trace store
///
/// Four tables nest record → file → conversation → range. Nested rows carry
/// an ordinal unique within their parent, so every insert is
/// `INSERT OR IGNORE` against a natural key and replaying an ingestion never
/// duplicates rows. Thread-safe via internal mutex on the connection.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Initialize the database schema
    fn init_schema(conn: &Connection) -> StorageResult<()> {
        conn.execute_batch(
            r#"
            -- One row per evidence submission
            CREATE TABLE IF NOT EXISTS trace_records (
                id TEXT PRIMARY KEY,
                repo_id INTEGER NOT NULL,
                version TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                vcs_type TEXT NOT NULL,
                revision TEXT NOT NULL,
                tool_name TEXT,
                tool_version TEXT,
                metadata_json TEXT NOT NULL,
                -- 0 for placeholder evidence such as diff-derived records
                ground_truth INTEGER NOT NULL DEFAULT 1,
                -- set once every nested row has been written
                complete INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_trace_records_revision
                ON trace_records(repo_id, revision);

            CREATE TABLE IF NOT EXISTS trace_files (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                record_id TEXT NOT NULL,
                ordinal INTEGER NOT NULL,
                path TEXT NOT NULL,
                UNIQUE (record_id, ordinal),
                FOREIGN KEY (record_id) REFERENCES trace_records(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_trace_files_path
                ON trace_files(record_id, path);

            CREATE TABLE IF NOT EXISTS trace_conversations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                file_id INTEGER NOT NULL,
                ordinal INTEGER NOT NULL,
                url TEXT,
                contributor_type TEXT,
                model_id TEXT,
                UNIQUE (file_id, ordinal),
                FOREIGN KEY (file_id) REFERENCES trace_files(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS trace_ranges (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                conversation_id INTEGER NOT NULL,
                ordinal INTEGER NOT NULL,
                start_line INTEGER NOT NULL,
                end_line INTEGER NOT NULL,
                content_hash TEXT,
                contributor_type TEXT NOT NULL,
                model_id TEXT,
                UNIQUE (conversation_id, ordinal),
                FOREIGN KEY (conversation_id) REFERENCES trace_conversations(id) ON DELETE CASCADE
            );

            -- Enable foreign keys
            PRAGMA foreign_keys = ON;

            -- Enable WAL mode for concurrent reads during writes
            PRAGMA journal_mode = WAL;
            "#,
        )?;

        Ok(())
    }

    fn conn(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StorageError::LockPoisoned)
    }

    fn is_complete(conn: &Connection, record_id: &str) -> StorageResult<bool> {
        let complete: Option<bool> = conn
            .query_row(
                "SELECT complete FROM trace_records WHERE id = ?1",
                params![record_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(complete.unwrap_or(false))
    }

    fn insert_record_row(
        conn: &Connection,
        repo_id: i64,
        record: &AttributionRecord,
    ) -> StorageResult<()> {
        let tool = record.tool.as_ref();
        conn.execute(
            r#"
            INSERT OR IGNORE INTO trace_records
                (id, repo_id, version, timestamp, vcs_type, revision,
                 tool_name, tool_version, metadata_json, ground_truth, complete)
            VALUES (?1, ?2, ?3, ?4, 'git', ?5, ?6, ?7, ?8, ?9, 0)
            "#,
            params![
                record.id,
                repo_id,
                record.version,
                record.timestamp,
                record.revision(),
                tool.and_then(|t| t.name.as_deref()),
                tool.and_then(|t| t.version.as_deref()),
                serde_json::to_string(&record.metadata)?,
                record.is_ground_truth(),
            ],
        )?;
        Ok(())
    }

    fn insert_file_row(
        conn: &Connection,
        record_id: &str,
        ordinal: usize,
        path: &str,
    ) -> StorageResult<i64> {
        conn.execute(
            "INSERT OR IGNORE INTO trace_files (record_id, ordinal, path) VALUES (?1, ?2, ?3)",
            params![record_id, ordinal as i64, path],
        )?;
        Ok(conn.query_row(
            "SELECT id FROM trace_files WHERE record_id = ?1 AND ordinal = ?2",
            params![record_id, ordinal as i64],
            |row| row.get(0),
        )?)
    }

    fn insert_conversation_row(
        conn: &Connection,
        file_id: i64,
        ordinal: usize,
        conversation: &ConversationEvidence,
    ) -> StorageResult<i64> {
        let contributor = conversation.contributor.as_ref();
        conn.execute(
            r#"
            INSERT OR IGNORE INTO trace_conversations
                (file_id, ordinal, url, contributor_type, model_id)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                file_id,
                ordinal as i64,
                conversation.url,
                contributor.map(|c| c.kind.as_str()),
                contributor.and_then(|c| c.model_id.as_deref()),
            ],
        )?;
        Ok(conn.query_row(
            "SELECT id FROM trace_conversations WHERE file_id = ?1 AND ordinal = ?2",
            params![file_id, ordinal as i64],
            |row| row.get(0),
        )?)
    }

    fn insert_range_row(
        conn: &Connection,
        conversation_id: i64,
        ordinal: usize,
        range: &RangeEvidence,
        default: Option<&Contributor>,
    ) -> StorageResult<()> {
        let contributor = range.effective_contributor(default);
        conn.execute(
            r#"
            INSERT OR IGNORE INTO trace_ranges
                (conversation_id, ordinal, start_line, end_line, content_hash,
                 contributor_type, model_id)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                conversation_id,
                ordinal as i64,
                range.start_line,
                range.end_line,
                range.content_hash,
                contributor.map_or(ContributorType::Unknown, |c| c.kind).as_str(),
                contributor.and_then(|c| c.model_id.as_deref()),
            ],
        )?;
        Ok(())
    }
}

impl OpenStore for SqliteStore {
    fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl TraceStore for SqliteStore {
    // === Write ===

    fn ingest_record(
        &self,
        repo_id: i64,
        record: &AttributionRecord,
    ) -> StorageResult<IngestOutcome> {
        let conn = self.conn()?;

        if Self::is_complete(&conn, &record.id)? {
            return Ok(IngestOutcome::AlreadyIngested);
        }

        // Fixed nesting order: record, files, conversations, ranges. Each
        // insert is individually duplicate-safe, so a crash anywhere below
        // leaves an incomplete record that the next ingestion finishes.
        Self::insert_record_row(&conn, repo_id, record)?;
        for (file_ordinal, file) in record.files.iter().enumerate() {
            let file_id = Self::insert_file_row(&conn, &record.id, file_ordinal, &file.path)?;
            for (conv_ordinal, conversation) in file.conversations.iter().enumerate() {
                let conversation_id =
                    Self::insert_conversation_row(&conn, file_id, conv_ordinal, conversation)?;
                for (range_ordinal, range) in conversation.ranges.iter().enumerate() {
                    Self::insert_range_row(
                        &conn,
                        conversation_id,
                        range_ordinal,
                        range,
                        conversation.contributor.as_ref(),
                    )?;
                }
            }
        }

        conn.execute(
            "UPDATE trace_records SET complete = 1 WHERE id = ?1",
            params![record.id],
        )?;

        Ok(IngestOutcome::Written)
    }

    fn has_record(&self, record_id: &str) -> StorageResult<bool> {
        let conn = self.conn()?;
        Self::is_complete(&conn, record_id)
    }

    // === Read ===

    fn ranges_for_commit(
        &self,
        repo_id: i64,
        commit_sha: &str,
    ) -> StorageResult<Vec<CommitRangeRow>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT tf.path, tc.id, tr.start_line, tr.end_line, tr.contributor_type, tr.model_id
             {RANGE_JOIN} {VISIBLE_RECORD}
             ORDER BY tr.id"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![repo_id, commit_sha], |row| {
                Ok(CommitRangeRow {
                    path: row.get(0)?,
                    conversation_id: row.get(1)?,
                    start_line: row.get(2)?,
                    end_line: row.get(3)?,
                    contributor_type: ContributorType::from_raw(&row.get::<_, String>(4)?),
                    model_id: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn ranges_for_commit_file(
        &self,
        repo_id: i64,
        commit_sha: &str,
        path: &str,
    ) -> StorageResult<Vec<RangeEvidence>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT tr.start_line, tr.end_line, tr.content_hash, tr.contributor_type, tr.model_id
             {RANGE_JOIN} {VISIBLE_RECORD} AND tf.path = ?3
             ORDER BY tr.id"
        );
        let mut stmt = conn.prepare(&sql)?;
        let ranges = stmt
            .query_map(params![repo_id, commit_sha, path], |row| {
                Ok(RangeEvidence {
                    start_line: row.get(0)?,
                    end_line: row.get(1)?,
                    content_hash: row.get(2)?,
                    contributor: Some(Contributor {
                        kind: ContributorType::from_raw(&row.get::<_, String>(3)?),
                        model_id: row.get(4)?,
                    }),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ranges)
    }

    fn totals_for_commit(&self, repo_id: i64, commit_sha: &str) -> StorageResult<Totals> {
        let conn = self.conn()?;
        let sql = format!("SELECT COUNT(DISTINCT tc.id), COUNT(tr.id) {RANGE_JOIN} {VISIBLE_RECORD}");
        Ok(conn.query_row(&sql, params![repo_id, commit_sha], |row| {
            Ok(Totals {
                conversations: row.get(0)?,
                ranges: row.get(1)?,
            })
        })?)
    }

    fn tool_names_for_commit(
        &self,
        repo_id: i64,
        commit_sha: &str,
    ) -> StorageResult<Vec<String>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT DISTINCT r.tool_name FROM trace_records r
             WHERE {VISIBLE_RECORD} AND r.tool_name IS NOT NULL
             ORDER BY r.tool_name"
        );
        let mut stmt = conn.prepare(&sql)?;
        let names = stmt
            .query_map(params![repo_id, commit_sha], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{FileEvidence, RangeEvidence};

    const REPO: i64 = 1;

    fn create_test_store() -> SqliteStore {
        SqliteStore::open_in_memory().unwrap()
    }

    fn create_test_record(id: &str, sha: &str) -> AttributionRecord {
        AttributionRecord::new(id, "2024-05-01T10:00:00Z", sha)
            .with_tool("codex", Some("0.9".into()))
            .with_file(FileEvidence::new("src/lib.rs").with_conversation(ConversationEvidence {
                url: Some("https://example.com/c/1".into()),
                contributor: Some(Contributor::ai(Some("gpt-5".into()))),
                ranges: vec![
                    RangeEvidence::new(10, 20),
                    RangeEvidence::new(21, 21)
                        .with_contributor(Contributor::new(ContributorType::Human)),
                ],
            }))
    }

    fn count(store: &SqliteStore, table: &str) -> i64 {
        let conn = store.conn().unwrap();
        conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn test_ingest_and_query_ranges() {
        let store = create_test_store();
        let record = create_test_record("rec-1", "abc");

        assert_eq!(store.ingest_record(REPO, &record).unwrap(), IngestOutcome::Written);
        assert!(store.has_record("rec-1").unwrap());

        let rows = store.ranges_for_commit(REPO, "abc").unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].path, "src/lib.rs");
        assert_eq!((rows[0].start_line, rows[0].end_line), (10, 20));
        assert_eq!(rows[0].contributor_type, ContributorType::Ai);
        assert_eq!(rows[0].model_id.as_deref(), Some("gpt-5"));
        // range override replaces the whole conversation contributor
        assert_eq!(rows[1].contributor_type, ContributorType::Human);
        assert_eq!(rows[1].model_id, None);
        assert_eq!(rows[0].conversation_id, rows[1].conversation_id);
    }

    #[test]
    fn test_reingest_is_noop() {
        let store = create_test_store();
        let record = create_test_record("rec-1", "abc");

        store.ingest_record(REPO, &record).unwrap();
        assert_eq!(
            store.ingest_record(REPO, &record).unwrap(),
            IngestOutcome::AlreadyIngested
        );

        assert_eq!(count(&store, "trace_records"), 1);
        assert_eq!(count(&store, "trace_files"), 1);
        assert_eq!(count(&store, "trace_conversations"), 1);
        assert_eq!(count(&store, "trace_ranges"), 2);
        assert_eq!(
            store.totals_for_commit(REPO, "abc").unwrap(),
            Totals { conversations: 1, ranges: 2 }
        );
    }

    #[test]
    fn test_partial_ingest_is_completed_without_duplicates() {
        let store = create_test_store();
        let record = create_test_record("rec-1", "abc");

        // Simulate a crash after the record row and first range were written.
        {
            let conn = store.conn().unwrap();
            SqliteStore::insert_record_row(&conn, REPO, &record).unwrap();
            let file_id = SqliteStore::insert_file_row(&conn, "rec-1", 0, "src/lib.rs").unwrap();
            let conv = &record.files[0].conversations[0];
            let conv_id = SqliteStore::insert_conversation_row(&conn, file_id, 0, conv).unwrap();
            SqliteStore::insert_range_row(&conn, conv_id, 0, &conv.ranges[0], conv.contributor.as_ref())
                .unwrap();
        }

        assert!(!store.has_record("rec-1").unwrap());
        assert!(store.ranges_for_commit(REPO, "abc").unwrap().is_empty());

        assert_eq!(store.ingest_record(REPO, &record).unwrap(), IngestOutcome::Written);
        assert_eq!(count(&store, "trace_ranges"), 2);
        assert_eq!(store.ranges_for_commit(REPO, "abc").unwrap().len(), 2);
    }

    #[test]
    fn test_ranges_for_commit_file_in_insertion_order() {
        let store = create_test_store();
        let record = AttributionRecord::new("rec-1", "t", "abc")
            .with_file(FileEvidence::new("a.rs").with_conversation(ConversationEvidence {
                url: None,
                contributor: Some(Contributor::ai(None)),
                ranges: vec![
                    RangeEvidence::new(50, 60).with_content_hash("h1"),
                    RangeEvidence::new(1, 5),
                ],
            }))
            .with_file(FileEvidence::new("b.rs").with_conversation(ConversationEvidence {
                url: None,
                contributor: None,
                ranges: vec![RangeEvidence::new(3, 4)],
            }));
        store.ingest_record(REPO, &record).unwrap();

        let ranges = store.ranges_for_commit_file(REPO, "abc", "a.rs").unwrap();
        assert_eq!(ranges.len(), 2);
        assert_eq!(ranges[0].start_line, 50);
        assert_eq!(ranges[0].content_hash.as_deref(), Some("h1"));
        assert_eq!(ranges[1].start_line, 1);

        let ranges = store.ranges_for_commit_file(REPO, "abc", "b.rs").unwrap();
        assert_eq!(
            ranges[0].contributor.as_ref().map(|c| c.kind),
            Some(ContributorType::Unknown)
        );

        assert!(store.ranges_for_commit_file(REPO, "abc", "c.rs").unwrap().is_empty());
    }

    #[test]
    fn test_queries_are_scoped_to_repo_and_commit() {
        let store = create_test_store();
        store.ingest_record(REPO, &create_test_record("rec-1", "abc")).unwrap();
        store.ingest_record(2, &create_test_record("rec-2", "abc")).unwrap();
        store.ingest_record(REPO, &create_test_record("rec-3", "def")).unwrap();

        assert_eq!(store.ranges_for_commit(REPO, "abc").unwrap().len(), 2);
        assert_eq!(store.ranges_for_commit(2, "abc").unwrap().len(), 2);
        assert!(store.ranges_for_commit(3, "abc").unwrap().is_empty());
        assert_eq!(store.totals_for_commit(REPO, "zzz").unwrap(), Totals::default());
    }

    #[test]
    fn test_tool_names_distinct_and_sorted() {
        let store = create_test_store();
        store.ingest_record(REPO, &create_test_record("rec-1", "abc")).unwrap();
        store
            .ingest_record(REPO, &create_test_record("rec-2", "abc").with_tool("aider", None))
            .unwrap();
        let mut untooled = create_test_record("rec-3", "abc");
        untooled.tool = None;
        store.ingest_record(REPO, &untooled).unwrap();

        assert_eq!(
            store.tool_names_for_commit(REPO, "abc").unwrap(),
            vec!["aider".to_string(), "codex".to_string()]
        );
    }

    #[test]
    fn test_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("trace.db");
        {
            let store = SqliteStore::open(&path).unwrap();
            store.ingest_record(REPO, &create_test_record("rec-1", "abc")).unwrap();
        }
        let store = SqliteStore::open(&path).unwrap();
        assert!(store.has_record("rec-1").unwrap());
        assert_eq!(store.ranges_for_commit(REPO, "abc").unwrap().len(), 2);
    }

    #[test]
    fn test_placeholder_records_yield_to_real_evidence() {
        let store = create_test_store();
        let mut placeholder = AttributionRecord::new("diff-1", "t", "abc")
            .with_tool("diff-fallback", None)
            .with_file(FileEvidence::new("src/lib.rs").with_conversation(ConversationEvidence {
                url: None,
                contributor: Some(Contributor::ai(None)),
                ranges: vec![RangeEvidence::new(1, 10)],
            }));
        placeholder.metadata.insert(
            crate::record::METADATA_NAMESPACE.into(),
            serde_json::json!({"derived": true, "groundTruth": false}),
        );
        store.ingest_record(REPO, &placeholder).unwrap();

        assert_eq!(store.ranges_for_commit(REPO, "abc").unwrap().len(), 1);
        assert_eq!(store.tool_names_for_commit(REPO, "abc").unwrap(), vec!["diff-fallback".to_string()]);

        store.ingest_record(REPO, &create_test_record("rec-1", "abc")).unwrap();

        let rows = store.ranges_for_commit(REPO, "abc").unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| (r.start_line, r.end_line) != (1, 10)));
        assert_eq!(store.ranges_for_commit_file(REPO, "abc", "src/lib.rs").unwrap().len(), 2);
        assert_eq!(
            store.totals_for_commit(REPO, "abc").unwrap(),
            Totals { conversations: 1, ranges: 2 }
        );
        assert_eq!(store.tool_names_for_commit(REPO, "abc").unwrap(), vec!["codex".to_string()]);
        assert!(store.has_record("diff-1").unwrap());
    }
}
