//! SQLite-backed append-only audit log
//!
//! Appends hold the connection mutex and run inside an `IMMEDIATE`
//! transaction that reads the tail hash and inserts the new row, so
//! concurrent writers (threads or separate handles on the same file) can
//! never both link to the same predecessor.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use serde::Serialize;
use tracing::{debug, warn};

use crate::audit::event::{AuditEvent, GENESIS_HASH, HashInput};
use crate::error::{Result, WardenError};
use crate::policy::{Action, Decision};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS audit_log (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    timestamp TEXT NOT NULL,
    action_snapshot TEXT NOT NULL,
    decision TEXT NOT NULL,
    detail TEXT NOT NULL,
    agent_id TEXT NOT NULL,
    policy_id TEXT,
    hash TEXT NOT NULL,
    prev_hash TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_audit_log_agent ON audit_log(agent_id);
";

const SELECT_COLUMNS: &str =
    "SELECT id, timestamp, action_snapshot, decision, detail, agent_id, policy_id, hash, prev_hash FROM audit_log";

/// Outcome of `AuditLog::verify_chain`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainVerification {
    pub valid: bool,
    /// Id of the first event that failed verification
    pub broken_at: Option<String>,
    /// Events examined, including the failing one
    pub events_checked: usize,
}

impl ChainVerification {
    fn passed(events_checked: usize) -> Self {
        Self {
            valid: true,
            broken_at: None,
            events_checked,
        }
    }

    fn broken(id: String, events_checked: usize) -> Self {
        Self {
            valid: false,
            broken_at: Some(id),
            events_checked,
        }
    }
}

/// A row exactly as stored, before any parsing
struct StoredRow {
    id: String,
    timestamp: String,
    action_snapshot: String,
    decision: String,
    detail: String,
    agent_id: String,
    policy_id: Option<String>,
    hash: String,
    prev_hash: String,
}

impl StoredRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            timestamp: row.get(1)?,
            action_snapshot: row.get(2)?,
            decision: row.get(3)?,
            detail: row.get(4)?,
            agent_id: row.get(5)?,
            policy_id: row.get(6)?,
            hash: row.get(7)?,
            prev_hash: row.get(8)?,
        })
    }

    /// Hash recomputed from the stored text, with nothing parsed back
    fn recompute_hash(&self) -> Result<String> {
        HashInput {
            id: &self.id,
            timestamp: &self.timestamp,
            action: &self.action_snapshot,
            decision: &self.decision,
            detail: &self.detail,
            agent_id: &self.agent_id,
            policy_id: self.policy_id.as_deref(),
            prev_hash: &self.prev_hash,
        }
        .digest()
    }

    fn into_event(self) -> std::result::Result<AuditEvent, String> {
        let timestamp = DateTime::parse_from_rfc3339(&self.timestamp)
            .map_err(|e| format!("bad timestamp on event {}: {e}", self.id))?
            .with_timezone(&Utc);
        let action = serde_json::from_str(&self.action_snapshot)
            .map_err(|e| format!("bad action snapshot on event {}: {e}", self.id))?;
        let decision = self.decision.parse::<Decision>()?;

        Ok(AuditEvent {
            id: self.id,
            timestamp,
            action,
            decision,
            detail: self.detail,
            agent_id: self.agent_id,
            policy_id: self.policy_id,
            prev_hash: self.prev_hash,
            hash: self.hash,
        })
    }
}

/// Append-only, hash-chained event store
pub struct AuditLog {
    conn: Mutex<Connection>,
}

impl AuditLog {
    /// Open (or create) the audit log in a SQLite file
    pub fn open(path: &Path) -> Result<Self> {
        debug!("Opening audit log at {}", path.display());
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::init(conn)
    }

    /// Audit log backed by a private in-memory database
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

    /// Append an event for `action` and return its id
    pub fn write(
        &self,
        action: &Action,
        decision: Decision,
        detail: &str,
        policy_id: Option<&str>,
    ) -> Result<String> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let prev_hash = tail_hash(&tx)?;
        let event = AuditEvent::new(action, decision, detail, policy_id, &prev_hash)?;
        // Same text the hash was computed over
        let snapshot = event.action_snapshot()?;

        tx.execute(
            "INSERT INTO audit_log (id, timestamp, action_snapshot, decision, detail, agent_id, policy_id, hash, prev_hash)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                event.id,
                event.timestamp_string(),
                snapshot,
                event.decision.as_str(),
                event.detail,
                event.agent_id,
                event.policy_id,
                event.hash,
                event.prev_hash,
            ],
        )?;
        tx.commit()?;

        debug!(
            "Audit event {} recorded: {} {} ({})",
            event.id,
            action.action_type(),
            decision,
            event.detail
        );
        Ok(event.id)
    }

    /// Number of stored events
    pub fn count(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM audit_log", [], |r| r.get(0))?;
        Ok(count as usize)
    }

    /// Hash of the most recent event, or the genesis value when empty
    pub fn latest_hash(&self) -> Result<String> {
        let conn = self.conn.lock();
        tail_hash(&conn)
    }

    /// All events in insertion order
    pub fn events(&self) -> Result<Vec<AuditEvent>> {
        self.load_rows(None)?
            .into_iter()
            .map(|row| row.into_event().map_err(WardenError::Serialization))
            .collect()
    }

    /// Events recorded for one agent, in insertion order
    pub fn events_for_agent(&self, agent_id: &str) -> Result<Vec<AuditEvent>> {
        self.load_rows(Some(agent_id))?
            .into_iter()
            .map(|row| row.into_event().map_err(WardenError::Serialization))
            .collect()
    }

    fn load_rows(&self, agent_id: Option<&str>) -> Result<Vec<StoredRow>> {
        let conn = self.conn.lock();
        let rows = match agent_id {
            Some(agent_id) => {
                let mut stmt =
                    conn.prepare(&format!("{SELECT_COLUMNS} WHERE agent_id = ?1 ORDER BY seq"))?;
                let rows = stmt
                    .query_map(params![agent_id], StoredRow::from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows
            }
            None => {
                let mut stmt = conn.prepare(&format!("{SELECT_COLUMNS} ORDER BY seq"))?;
                let rows = stmt
                    .query_map([], StoredRow::from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows
            }
        };
        Ok(rows)
    }

    /// Walk the chain in insertion order, checking each event's own hash and
    /// its link to the previous event's stored hash.
    pub fn verify_chain(&self) -> Result<ChainVerification> {
        let rows = self.load_rows(None)?;
        let total = rows.len();
        let mut expected_prev = GENESIS_HASH.to_string();

        for (index, row) in rows.into_iter().enumerate() {
            let id = row.id.clone();
            let stored_hash = row.hash.clone();

            let linked = row.prev_hash == expected_prev;
            let hashed = row.recompute_hash()? == row.hash;
            let readable = match row.into_event() {
                Ok(_) => true,
                Err(e) => {
                    warn!("Unreadable audit row: {}", e);
                    false
                }
            };
            let intact = linked && hashed && readable;

            if !intact {
                warn!("Audit chain broken at event {} (position {})", id, index);
                return Ok(ChainVerification::broken(id, index + 1));
            }
            expected_prev = stored_hash;
        }

        Ok(ChainVerification::passed(total))
    }

    /// Serialize every event. Only `"json"` is supported.
    pub fn export(&self, format: &str) -> Result<String> {
        match format {
            "json" => Ok(serde_json::to_string_pretty(&self.events()?)?),
            other => Err(WardenError::UnsupportedExportFormat(other.to_string())),
        }
    }
}

fn tail_hash(conn: &Connection) -> Result<String> {
    let hash = conn
        .query_row(
            "SELECT hash FROM audit_log ORDER BY seq DESC LIMIT 1",
            [],
            |r| r.get::<_, String>(0),
        )
        .optional()?;
    Ok(hash.unwrap_or_else(|| GENESIS_HASH.to_string()))
}
