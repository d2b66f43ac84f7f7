//! Memory store trait
//!
//! Abstracts the storage backends (embedded SQLite, remote memory service)
//! behind the four operations the governance gate needs.

use async_trait::async_trait;

use crate::error::Result;
use crate::storage::types::{NewMemory, RecallQuery, RecalledMemory};

/// Capability set shared by every memory backend
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Persist a memory and return its id
    async fn write(&self, memory: &NewMemory) -> Result<String>;

    /// Find unexpired memories for `(bot_id, namespace)` matching the query
    async fn read(&self, query: &RecallQuery) -> Result<Vec<RecalledMemory>>;

    /// Remove a memory. Returns false (not an error) when it didn't exist.
    async fn delete(&self, bot_id: &str, memory_id: &str) -> Result<bool>;

    /// Derive a summary string across namespaces. Empty when nothing matches.
    async fn synthesize(&self, bot_id: &str, query: &str, namespaces: &[String]) -> Result<String>;

    /// Backend name for logging
    fn name(&self) -> &'static str;
}
