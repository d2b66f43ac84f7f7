//! Test utilities for warden - fixtures and instrumented stores
//!
//! Shared by the unit tests and the integration tests under `tests/`.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::audit::AuditLog;
use crate::client::MemoryClient;
use crate::error::Result;
use crate::policy::{Action, PolicyEngine};
use crate::storage::{LocalMemoryStore, MemoryStore, NewMemory, RecallQuery, RecalledMemory};

/// Agent id used by fixtures
pub const TEST_AGENT: &str = "test-agent";

/// Bot id used by fixtures
pub const TEST_BOT: &str = "test-bot";

/// A `data.write` action in the `dev` environment
pub fn sample_action() -> Action {
    Action::new("data.write", TEST_AGENT)
        .with_data("table", "users")
        .with_context("env", "dev")
}

/// Enforced deny-everything-of-this-type policy for `memory.*` actions
pub fn always_deny_policy(action_type: &str) -> Value {
    json!({
        "name": format!("always-deny-{action_type}"),
        "match": { "action.type": action_type },
        "decision": "deny",
        "mode": "enforce",
        "priority": 0,
        "active": true,
        "reason": "denied by test fixture"
    })
}

/// Fresh in-memory audit log
pub fn memory_audit_log() -> Arc<AuditLog> {
    Arc::new(AuditLog::open_in_memory().expect("Failed to open in-memory audit log"))
}

/// Fresh in-memory local store
pub fn memory_store() -> Arc<LocalMemoryStore> {
    Arc::new(LocalMemoryStore::open_in_memory().expect("Failed to open in-memory store"))
}

/// Client over an empty engine, an in-memory audit log and the given store
pub fn client_with_store(store: Arc<dyn MemoryStore>) -> MemoryClient {
    MemoryClient::new(Arc::new(PolicyEngine::new()), memory_audit_log(), store)
        .with_agent_id(TEST_AGENT)
}

/// Store wrapper that counts every call reaching it
pub struct CountingStore {
    inner: Arc<LocalMemoryStore>,
    calls: AtomicUsize,
}

impl CountingStore {
    pub fn new(inner: Arc<LocalMemoryStore>) -> Self {
        Self {
            inner,
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of store operations invoked so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn inner(&self) -> &LocalMemoryStore {
        &self.inner
    }

    fn hit(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl MemoryStore for CountingStore {
    async fn write(&self, memory: &NewMemory) -> Result<String> {
        self.hit();
        self.inner.write(memory).await
    }

    async fn read(&self, query: &RecallQuery) -> Result<Vec<RecalledMemory>> {
        self.hit();
        self.inner.read(query).await
    }

    async fn delete(&self, bot_id: &str, memory_id: &str) -> Result<bool> {
        self.hit();
        self.inner.delete(bot_id, memory_id).await
    }

    async fn synthesize(&self, bot_id: &str, query: &str, namespaces: &[String]) -> Result<String> {
        self.hit();
        self.inner.synthesize(bot_id, query, namespaces).await
    }

    fn name(&self) -> &'static str {
        "counting"
    }
}
