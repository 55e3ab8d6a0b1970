//! SQLite conversation store

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, params};
use serde::Serialize;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use careroute_core::{ConversationRecord, ConversationStore, HandlerId, Urgency};

/// A stored turn with its row id
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredTurn {
    pub id: i64,
    #[serde(flatten)]
    pub record: ConversationRecord,
}

/// SQLite database wrapper (thread-safe via Arc<Mutex>)
#[derive(Clone)]
pub struct ConversationDb {
    conn: Arc<Mutex<Connection>>,
}

impl ConversationDb {
    /// Open (or create) the database and ensure the schema exists
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }

        let conn = Connection::open(path.as_ref()).context("Failed to open SQLite database")?;
        info!("Initializing conversation database at {:?}", path.as_ref());
        warn!(
            "Conversation database is NOT encrypted. User messages are stored in plaintext at {:?}",
            path.as_ref()
        );

        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory database, mostly for tests and dry runs
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS conversation_turns (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                conversation_id TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                caller_id TEXT NOT NULL,
                input TEXT NOT NULL,
                output TEXT NOT NULL,
                handler_id TEXT NOT NULL,
                urgency TEXT NOT NULL,
                expires_at TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_turns_conversation ON conversation_turns(conversation_id)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_turns_expires ON conversation_turns(expires_at)",
            [],
        )?;
        Ok(())
    }

    /// Append one turn, returning its row id
    pub async fn insert_turn(&self, record: ConversationRecord) -> Result<i64> {
        let conn = Arc::clone(&self.conn);

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap_or_else(|poisoned| {
                warn!("Database mutex was poisoned, recovering");
                poisoned.into_inner()
            });

            conn.execute(
                "INSERT INTO conversation_turns
                    (conversation_id, timestamp, caller_id, input, output, handler_id, urgency, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    &record.conversation_id,
                    timestamp(&record.timestamp),
                    &record.caller_id,
                    &record.input,
                    &record.output,
                    record.handler_id.as_str(),
                    record.urgency.as_str(),
                    timestamp(&record.expires_at),
                ],
            )?;

            debug!("Inserted turn for conversation {}", record.conversation_id);
            Ok(conn.last_insert_rowid())
        })
        .await
        .context("spawn_blocking task panicked")?
    }

    /// All turns of one conversation, oldest first
    pub async fn turns_for(&self, conversation_id: &str) -> Result<Vec<StoredTurn>> {
        let conn = Arc::clone(&self.conn);
        let conversation_id = conversation_id.to_owned();

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap_or_else(|poisoned| {
                warn!("Database mutex was poisoned, recovering");
                poisoned.into_inner()
            });
            let mut stmt = conn.prepare(
                "SELECT id, conversation_id, timestamp, caller_id, input, output, handler_id, urgency, expires_at
                 FROM conversation_turns
                 WHERE conversation_id = ?1
                 ORDER BY timestamp ASC, id ASC",
            )?;
            let turns = stmt
                .query_map(params![&conversation_id], Self::row_to_turn)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(turns)
        })
        .await
        .context("spawn_blocking task panicked")?
    }

    /// Most recent turns across all conversations, newest first
    pub async fn recent_turns(&self, limit: usize) -> Result<Vec<StoredTurn>> {
        let conn = Arc::clone(&self.conn);
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap_or_else(|poisoned| {
                warn!("Database mutex was poisoned, recovering");
                poisoned.into_inner()
            });
            let mut stmt = conn.prepare(
                "SELECT id, conversation_id, timestamp, caller_id, input, output, handler_id, urgency, expires_at
                 FROM conversation_turns
                 ORDER BY timestamp DESC, id DESC
                 LIMIT ?1",
            )?;
            let turns = stmt
                .query_map(params![limit], Self::row_to_turn)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(turns)
        })
        .await
        .context("spawn_blocking task panicked")?
    }

    /// Delete every turn whose expiry is before `now`
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let conn = Arc::clone(&self.conn);

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap_or_else(|poisoned| {
                warn!("Database mutex was poisoned, recovering");
                poisoned.into_inner()
            });
            let deleted = conn.execute(
                "DELETE FROM conversation_turns WHERE expires_at < ?1",
                params![timestamp(&now)],
            )?;
            if deleted > 0 {
                info!("Purged {} expired conversation turns", deleted);
            }
            Ok(deleted)
        })
        .await
        .context("spawn_blocking task panicked")?
    }

    pub async fn count(&self) -> Result<usize> {
        let conn = Arc::clone(&self.conn);

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap_or_else(|poisoned| {
                warn!("Database mutex was poisoned, recovering");
                poisoned.into_inner()
            });
            let n: i64 = conn.query_row("SELECT COUNT(*) FROM conversation_turns", [], |row| row.get(0))?;
            Ok(usize::try_from(n).unwrap_or(0))
        })
        .await
        .context("spawn_blocking task panicked")?
    }

    fn row_to_turn(row: &rusqlite::Row) -> rusqlite::Result<StoredTurn> {
        let handler: String = row.get(6)?;
        let urgency: String = row.get(7)?;
        Ok(StoredTurn {
            id: row.get(0)?,
            record: ConversationRecord {
                conversation_id: row.get(1)?,
                timestamp: parse_timestamp(2, &row.get::<_, String>(2)?)?,
                caller_id: row.get(3)?,
                input: row.get(4)?,
                output: row.get(5)?,
                handler_id: handler
                    .parse::<HandlerId>()
                    .map_err(|e| conversion_error(6, e.to_string()))?,
                urgency: urgency
                    .parse::<Urgency>()
                    .map_err(|e| conversion_error(7, e))?,
                expires_at: parse_timestamp(8, &row.get::<_, String>(8)?)?,
            },
        })
    }
}

#[async_trait]
impl ConversationStore for ConversationDb {
    async fn put(&self, record: ConversationRecord) -> Result<()> {
        self.insert_turn(record).await.map(|_| ())
    }
}

/// Fixed-width UTC form so text comparison matches time order
fn timestamp(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(idx: usize, s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e.to_string()))
}

fn conversion_error(idx: usize, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, msg.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use careroute_core::{ConversationRecorder, RetentionPolicy};
    use chrono::{Duration, SubsecRound};
    use tempfile::TempDir;

    fn turn(conversation_id: &str, urgency: Urgency, age_days: i64, keep_days: i64) -> ConversationRecord {
        // Stored with microsecond precision
        let ts = (Utc::now() - Duration::days(age_days)).trunc_subsecs(6);
        ConversationRecord {
            conversation_id: conversation_id.to_string(),
            timestamp: ts,
            caller_id: "user-1".to_string(),
            input: "I feel dizzy".to_string(),
            output: "Please sit down".to_string(),
            handler_id: HandlerId::IllnessTriage,
            urgency,
            expires_at: ts + Duration::days(keep_days),
        }
    }

    #[tokio::test]
    async fn test_insert_and_read_back() -> Result<()> {
        let dir = TempDir::new()?;
        let db = ConversationDb::new(dir.path().join("turns.db"))?;

        let first = turn("conv-1", Urgency::High, 1, 180);
        let second = turn("conv-1", Urgency::High, 0, 180);
        db.insert_turn(second.clone()).await?;
        db.insert_turn(first.clone()).await?;
        db.insert_turn(turn("conv-2", Urgency::Routine, 0, 30)).await?;

        let turns = db.turns_for("conv-1").await?;
        assert_eq!(turns.len(), 2);
        // Oldest first regardless of insert order.
        assert_eq!(turns[0].record.timestamp, first.timestamp);
        assert_eq!(turns[1].record, second);
        assert_eq!(db.count().await?, 3);
        assert!(db.turns_for("missing").await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_recent_turns_newest_first() -> Result<()> {
        let db = ConversationDb::in_memory()?;
        db.insert_turn(turn("a", Urgency::Routine, 3, 30)).await?;
        db.insert_turn(turn("b", Urgency::Routine, 1, 30)).await?;
        db.insert_turn(turn("c", Urgency::Routine, 2, 30)).await?;

        let recent = db.recent_turns(2).await?;
        let ids: Vec<_> = recent.iter().map(|t| t.record.conversation_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c"]);
        Ok(())
    }

    #[tokio::test]
    async fn test_purge_expired() -> Result<()> {
        let db = ConversationDb::in_memory()?;
        // Expired 10 days ago
        db.insert_turn(turn("old", Urgency::Routine, 40, 30)).await?;
        // Same age but critical, still retained
        db.insert_turn(turn("kept", Urgency::Critical, 40, 365)).await?;

        let deleted = db.purge_expired(Utc::now()).await?;
        assert_eq!(deleted, 1);
        assert!(db.turns_for("old").await?.is_empty());
        assert_eq!(db.turns_for("kept").await?.len(), 1);

        assert_eq!(db.purge_expired(Utc::now()).await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_reopen_keeps_data() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("nested").join("turns.db");
        {
            let db = ConversationDb::new(&path)?;
            db.insert_turn(turn("conv-1", Urgency::Sensitive, 0, 180)).await?;
        }
        let db = ConversationDb::new(&path)?;
        let turns = db.turns_for("conv-1").await?;
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].record.urgency, Urgency::Sensitive);
        Ok(())
    }

    #[tokio::test]
    async fn test_as_recorder_backend() -> Result<()> {
        let db = ConversationDb::in_memory()?;
        let recorder = ConversationRecorder::new(Arc::new(db.clone()), RetentionPolicy::default());
        recorder
            .record("conv-9", "", "help", "calling", HandlerId::Safety, Urgency::Critical)
            .await;

        let turns = db.turns_for("conv-9").await?;
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].record.caller_id, "anonymous");
        assert_eq!(
            turns[0].record.expires_at - turns[0].record.timestamp,
            Duration::days(365)
        );
        Ok(())
    }
}
