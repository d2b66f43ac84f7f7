//! Embedded SQLite memory store
//!
//! Records are scoped by `(bot_id, namespace)`. Reads do keyword matching
//! in process and never surface a record whose `expires_at` has passed.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};
use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{Result, WardenError};
use crate::storage::provider::MemoryStore;
use crate::storage::types::{MemoryRecord, NewMemory, RecallQuery, RecalledMemory};

/// Hits taken from each namespace when synthesizing
const SYNTHESIS_LIMIT_PER_NAMESPACE: usize = 5;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS memories (
    memory_id TEXT PRIMARY KEY,
    bot_id TEXT NOT NULL,
    content TEXT NOT NULL,
    namespace TEXT NOT NULL,
    metadata TEXT NOT NULL DEFAULT '{}',
    created_at INTEGER NOT NULL,
    expires_at INTEGER
);
CREATE INDEX IF NOT EXISTS idx_memories_scope ON memories(bot_id, namespace);
";

/// Local memory store backed by SQLite
pub struct LocalMemoryStore {
    conn: Mutex<Connection>,
}

impl LocalMemoryStore {
    /// Open (or create) the store in a SQLite file
    pub fn open(path: &Path) -> Result<Self> {
        info!("Opening local memory store at {}", path.display());
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::init(conn)
    }

    /// Store backed by a private in-memory database
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn insert_at(&self, memory: &NewMemory, now: DateTime<Utc>) -> Result<String> {
        let memory_id = Uuid::new_v4().to_string();
        let metadata = serde_json::to_string(&memory.metadata)?;
        let expires_at = memory.expires_at(now)?.map(|t| t.timestamp_micros());

        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO memories (memory_id, bot_id, content, namespace, metadata, created_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                memory_id,
                memory.bot_id,
                memory.content,
                memory.namespace,
                metadata,
                now.timestamp_micros(),
                expires_at,
            ],
        )?;

        debug!(
            "Stored memory {} for bot {} in namespace '{}'",
            memory_id, memory.bot_id, memory.namespace
        );
        Ok(memory_id)
    }

    /// Unexpired records in one scope, newest first
    fn live_records(
        &self,
        bot_id: &str,
        namespace: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<MemoryRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT memory_id, bot_id, content, namespace, metadata, created_at, expires_at
             FROM memories
             WHERE bot_id = ?1 AND namespace = ?2 AND (expires_at IS NULL OR expires_at > ?3)
             ORDER BY created_at DESC",
        )?;
        let rows = stmt
            .query_map(params![bot_id, namespace, now.timestamp_micros()], raw_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(RawRecord::into_record).collect()
    }

    fn search_at(&self, query: &RecallQuery, now: DateTime<Utc>) -> Result<Vec<RecalledMemory>> {
        if query.limit == 0 {
            return Ok(Vec::new());
        }

        let records = self.live_records(&query.bot_id, &query.namespace, now)?;
        let needle = query.query.trim().to_lowercase();

        let mut scored: Vec<(MemoryRecord, f32)> = records
            .into_iter()
            .filter_map(|record| {
                if needle.is_empty() {
                    return Some((record, 0.0));
                }
                let score = keyword_score(&record.content, &needle);
                (score > 0.0).then_some((record, score))
            })
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.0.created_at.cmp(&a.0.created_at))
        });
        scored.truncate(query.limit);

        Ok(scored
            .into_iter()
            .map(|(record, relevance_score)| RecalledMemory {
                memory_id: record.memory_id,
                content: record.content,
                metadata: record.metadata,
                created_at: record.created_at,
                relevance_score,
            })
            .collect())
    }

    fn synthesize_at(
        &self,
        bot_id: &str,
        query: &str,
        namespaces: &[String],
        now: DateTime<Utc>,
    ) -> Result<String> {
        let namespaces = if namespaces.is_empty() {
            self.namespaces(bot_id)?
        } else {
            namespaces.to_vec()
        };

        let mut lines = Vec::new();
        for namespace in &namespaces {
            let recall = RecallQuery::new(bot_id, query)
                .in_namespace(namespace.as_str())
                .with_limit(SYNTHESIS_LIMIT_PER_NAMESPACE);
            for hit in self.search_at(&recall, now)? {
                lines.push(format!("[{namespace}] {}", hit.content));
            }
        }
        Ok(lines.join("\n"))
    }

    /// Fetch one live record by id
    pub fn get(&self, bot_id: &str, memory_id: &str) -> Result<Option<MemoryRecord>> {
        let now = Utc::now();
        let conn = self.conn.lock();
        let raw = conn
            .query_row(
                "SELECT memory_id, bot_id, content, namespace, metadata, created_at, expires_at
                 FROM memories WHERE bot_id = ?1 AND memory_id = ?2",
                params![bot_id, memory_id],
                raw_row,
            )
            .optional()?;

        match raw {
            Some(raw) => {
                let record = raw.into_record()?;
                Ok((!record.is_expired(now)).then_some(record))
            }
            None => Ok(None),
        }
    }

    /// Namespaces holding at least one record for a bot, sorted
    pub fn namespaces(&self, bot_id: &str) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT DISTINCT namespace FROM memories WHERE bot_id = ?1 ORDER BY namespace",
        )?;
        let namespaces = stmt
            .query_map(params![bot_id], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(namespaces)
    }

    /// Live (unexpired) records for a bot across all namespaces
    pub fn count(&self, bot_id: &str) -> Result<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM memories WHERE bot_id = ?1 AND (expires_at IS NULL OR expires_at > ?2)",
            params![bot_id, Utc::now().timestamp_micros()],
            |r| r.get(0),
        )?;
        Ok(count as usize)
    }

    /// Physically delete expired rows. Returns how many were removed.
    pub fn purge_expired(&self) -> Result<usize> {
        self.purge_expired_at(Utc::now())
    }

    fn purge_expired_at(&self, now: DateTime<Utc>) -> Result<usize> {
        let conn = self.conn.lock();
        let removed = conn.execute(
            "DELETE FROM memories WHERE expires_at IS NOT NULL AND expires_at <= ?1",
            params![now.timestamp_micros()],
        )?;
        if removed > 0 {
            info!("Purged {} expired memories", removed);
        }
        Ok(removed)
    }
}

#[async_trait]
impl MemoryStore for LocalMemoryStore {
    async fn write(&self, memory: &NewMemory) -> Result<String> {
        self.insert_at(memory, Utc::now())
    }

    async fn read(&self, query: &RecallQuery) -> Result<Vec<RecalledMemory>> {
        self.search_at(query, Utc::now())
    }

    async fn delete(&self, bot_id: &str, memory_id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let removed = conn.execute(
            "DELETE FROM memories WHERE bot_id = ?1 AND memory_id = ?2",
            params![bot_id, memory_id],
        )?;
        Ok(removed > 0)
    }

    async fn synthesize(&self, bot_id: &str, query: &str, namespaces: &[String]) -> Result<String> {
        self.synthesize_at(bot_id, query, namespaces, Utc::now())
    }

    fn name(&self) -> &'static str {
        "local"
    }
}

/// Row as stored, timestamps in microseconds
struct RawRecord {
    memory_id: String,
    bot_id: String,
    content: String,
    namespace: String,
    metadata: String,
    created_at: i64,
    expires_at: Option<i64>,
}

fn raw_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRecord> {
    Ok(RawRecord {
        memory_id: row.get(0)?,
        bot_id: row.get(1)?,
        content: row.get(2)?,
        namespace: row.get(3)?,
        metadata: row.get(4)?,
        created_at: row.get(5)?,
        expires_at: row.get(6)?,
    })
}

impl RawRecord {
    fn into_record(self) -> Result<MemoryRecord> {
        let metadata: BTreeMap<String, Value> = serde_json::from_str(&self.metadata)?;
        Ok(MemoryRecord {
            created_at: from_micros(self.created_at)?,
            expires_at: self.expires_at.map(from_micros).transpose()?,
            memory_id: self.memory_id,
            bot_id: self.bot_id,
            content: self.content,
            namespace: self.namespace,
            metadata,
        })
    }
}

fn from_micros(micros: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_micros(micros)
        .ok_or_else(|| WardenError::Storage(format!("Invalid timestamp in memories table: {micros}")))
}

/// 1.0 when the whole query appears in the content, otherwise the fraction
/// of query terms that do. `needle` must already be trimmed and lowercased.
fn keyword_score(content: &str, needle: &str) -> f32 {
    let haystack = content.to_lowercase();
    if haystack.contains(needle) {
        return 1.0;
    }

    let terms: Vec<&str> = needle.split_whitespace().collect();
    if terms.is_empty() {
        return 0.0;
    }
    let hits = terms.iter().filter(|term| haystack.contains(*term)).count();
    hits as f32 / terms.len() as f32
}
