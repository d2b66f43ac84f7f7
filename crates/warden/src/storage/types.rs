//! Memory record types shared by every store

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, WardenError};

/// Namespace used when the caller doesn't pick one
pub const DEFAULT_NAMESPACE: &str = "default";

/// Default result cap for recall queries
pub const DEFAULT_RECALL_LIMIT: usize = 10;

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

fn default_limit() -> usize {
    DEFAULT_RECALL_LIMIT
}

/// A memory to be written
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMemory {
    pub bot_id: String,
    pub content: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
    /// Days until expiry. `None` never expires, `Some(0)` is expired on arrival.
    #[serde(default)]
    pub ttl_days: Option<u32>,
}

impl NewMemory {
    pub fn new(bot_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            bot_id: bot_id.into(),
            content: content.into(),
            namespace: default_namespace(),
            metadata: BTreeMap::new(),
            ttl_days: None,
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_ttl_days(mut self, ttl_days: u32) -> Self {
        self.ttl_days = Some(ttl_days);
        self
    }

    /// Expiry computed from a write time.
    ///
    /// A TTL that lands outside the representable date range is an
    /// `InvalidInput` error.
    pub fn expires_at(&self, now: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
        self.ttl_days
            .map(|days| {
                Duration::try_days(i64::from(days))
                    .and_then(|ttl| now.checked_add_signed(ttl))
                    .ok_or_else(|| {
                        WardenError::InvalidInput(format!("ttl_days {days} is out of range"))
                    })
            })
            .transpose()
    }
}

/// A stored memory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub memory_id: String,
    pub bot_id: String,
    pub content: String,
    pub namespace: String,
    pub metadata: BTreeMap<String, Value>,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl MemoryRecord {
    /// Expired records are never returned by reads
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires| expires <= now)
    }
}

/// Parameters for a recall (read) query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecallQuery {
    pub bot_id: String,
    pub query: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

impl RecallQuery {
    pub fn new(bot_id: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            bot_id: bot_id.into(),
            query: query.into(),
            namespace: default_namespace(),
            limit: DEFAULT_RECALL_LIMIT,
        }
    }

    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }
}

/// Uniform read result shape across store implementations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecalledMemory {
    pub memory_id: String,
    pub content: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub relevance_score: f32,
}
