//! Audit event and hash computation
//!
//! Each event commits to its predecessor through `prev_hash`. The `hash` is
//! SHA-256 over a canonical JSON rendering of every other field, so editing
//! any stored column breaks either the event's own hash or the link to it.

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::Result;
use crate::policy::{Action, Decision};

/// `prev_hash` of the first event in a chain
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// A single entry in the audit chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    /// Snapshot of the action as it was evaluated
    pub action: Value,
    pub decision: Decision,
    pub detail: String,
    pub agent_id: String,
    pub policy_id: Option<String>,
    pub prev_hash: String,
    pub hash: String,
}

/// Field order here is the canonical hash input order.
///
/// Every field is the exact text persisted in the `audit_log` row, so a
/// stored event can be re-hashed without parsing anything back.
#[derive(Serialize)]
pub(crate) struct HashInput<'a> {
    pub id: &'a str,
    pub timestamp: &'a str,
    pub action: &'a str,
    pub decision: &'a str,
    pub detail: &'a str,
    pub agent_id: &'a str,
    pub policy_id: Option<&'a str>,
    pub prev_hash: &'a str,
}

impl HashInput<'_> {
    /// SHA-256 of the canonical JSON rendering, lowercase hex
    pub(crate) fn digest(&self) -> Result<String> {
        let canonical = serde_json::to_vec(self)?;

        let mut hasher = Sha256::new();
        hasher.update(&canonical);
        let digest = hasher.finalize();
        Ok(digest.iter().map(|b| format!("{b:02x}")).collect())
    }
}

impl AuditEvent {
    /// Build the next event in a chain whose tail hash is `prev_hash`
    pub fn new(
        action: &Action,
        decision: Decision,
        detail: &str,
        policy_id: Option<&str>,
        prev_hash: &str,
    ) -> Result<Self> {
        let mut event = Self {
            id: Uuid::new_v4().to_string(),
            // Stored with microsecond precision, so hash what will be stored
            timestamp: Utc::now().trunc_subsecs(6),
            action: action.snapshot(),
            decision,
            detail: detail.to_string(),
            agent_id: action.agent_id().to_string(),
            policy_id: policy_id.map(str::to_string),
            prev_hash: prev_hash.to_string(),
            hash: String::new(),
        };
        event.hash = event.compute_hash()?;
        Ok(event)
    }

    /// Timestamp in the exact form that is persisted and hashed
    pub fn timestamp_string(&self) -> String {
        self.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)
    }

    /// Action snapshot in the exact form that is persisted and hashed
    pub fn action_snapshot(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.action)?)
    }

    /// Recompute the hash from every field except `hash` itself
    pub fn compute_hash(&self) -> Result<String> {
        let timestamp = self.timestamp_string();
        let action = self.action_snapshot()?;
        HashInput {
            id: &self.id,
            timestamp: &timestamp,
            action: &action,
            decision: self.decision.as_str(),
            detail: &self.detail,
            agent_id: &self.agent_id,
            policy_id: self.policy_id.as_deref(),
            prev_hash: &self.prev_hash,
        }
        .digest()
    }

    /// True if the stored hash matches the recomputed one
    pub fn is_intact(&self) -> Result<bool> {
        Ok(self.compute_hash()? == self.hash)
    }
}
