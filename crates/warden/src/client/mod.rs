//! Governance gate in front of the memory store
//!
//! Every operation follows the same sequence: build an `Action`, evaluate
//! it, run the store call only on `allow`, then record the outcome in the
//! audit log. Denied and review-flagged calls are audited too, and the
//! store is never touched for them.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::audit::AuditLog;
use crate::config::{Config, GovernanceConfig};
use crate::error::{Result, WardenError};
use crate::policy::{Action, CheckResult, Decision, PolicyEngine};
use crate::storage::{self, MemoryStore, NewMemory, RecallQuery, RecalledMemory};

pub const ACTION_WRITE: &str = "memory.write";
pub const ACTION_READ: &str = "memory.read";
pub const ACTION_DELETE: &str = "memory.delete";
pub const ACTION_SYNTHESIZE: &str = "memory.synthesize";

/// Policy-gated, audited access to a memory store
#[derive(Clone)]
pub struct MemoryClient {
    policy: Arc<PolicyEngine>,
    audit: Arc<AuditLog>,
    store: Arc<dyn MemoryStore>,
    agent_id: String,
    context: BTreeMap<String, Value>,
}

impl MemoryClient {
    /// Compose a client from already-built parts
    pub fn new(policy: Arc<PolicyEngine>, audit: Arc<AuditLog>, store: Arc<dyn MemoryStore>) -> Self {
        Self {
            policy,
            audit,
            store,
            agent_id: GovernanceConfig::default().agent_id,
            context: BTreeMap::new(),
        }
    }

    /// Build the engine, audit log and store described by `config`.
    ///
    /// Policy files load before packs. The store backend is chosen here
    /// and stays fixed for the client's lifetime.
    pub fn from_config(config: &Config) -> Result<Self> {
        let engine = PolicyEngine::new();
        for path in &config.policy.files {
            engine.load_file(path)?;
        }
        for pack in &config.policy.packs {
            engine.load_pack(pack)?;
        }

        let store = storage::from_config(config)?;
        let audit = AuditLog::open(&config.database_path())?;

        info!(
            "MemoryClient ready: {} policies, {} store, agent {}",
            engine.len(),
            store.name(),
            config.governance.agent_id
        );

        let client = Self::new(Arc::new(engine), Arc::new(audit), store)
            .with_agent_id(config.governance.agent_id.clone());
        Ok(config
            .governance
            .context
            .iter()
            .fold(client, |client, (key, value)| {
                client.with_context(key.clone(), value.clone())
            }))
    }

    pub fn with_agent_id(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = agent_id.into();
        self
    }

    /// Add a context entry attached to every action (e.g. `env = prod`)
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn policy_engine(&self) -> &Arc<PolicyEngine> {
        &self.policy
    }

    pub fn audit_log(&self) -> &Arc<AuditLog> {
        &self.audit
    }

    pub fn store_name(&self) -> &'static str {
        self.store.name()
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    /// Store a memory if policy allows it
    pub async fn write(&self, memory: &NewMemory) -> Result<String> {
        let action = self
            .action(ACTION_WRITE)
            .with_data("bot_id", memory.bot_id.as_str())
            .with_data("namespace", memory.namespace.as_str())
            .with_data("content", memory.content.as_str())
            .with_data("ttl_days", memory.ttl_days)
            .with_data("metadata", json!(memory.metadata));

        self.govern(action, || self.store.write(memory)).await
    }

    /// Recall memories if policy allows it
    pub async fn read(&self, query: &RecallQuery) -> Result<Vec<RecalledMemory>> {
        let action = self
            .action(ACTION_READ)
            .with_data("bot_id", query.bot_id.as_str())
            .with_data("namespace", query.namespace.as_str())
            .with_data("query", query.query.as_str())
            .with_data("limit", query.limit);

        self.govern(action, || self.store.read(query)).await
    }

    /// Delete a memory if policy allows it. `false` when it didn't exist.
    pub async fn delete(&self, bot_id: &str, memory_id: &str) -> Result<bool> {
        let action = self
            .action(ACTION_DELETE)
            .with_data("bot_id", bot_id)
            .with_data("memory_id", memory_id);

        self.govern(action, || self.store.delete(bot_id, memory_id))
            .await
    }

    /// Synthesize across namespaces if policy allows it
    pub async fn synthesize(&self, bot_id: &str, query: &str, namespaces: &[String]) -> Result<String> {
        let action = self
            .action(ACTION_SYNTHESIZE)
            .with_data("bot_id", bot_id)
            .with_data("query", query)
            .with_data("namespaces", namespaces.to_vec());

        self.govern(action, || self.store.synthesize(bot_id, query, namespaces))
            .await
    }

    fn action(&self, action_type: &str) -> Action {
        self.context
            .iter()
            .fold(Action::new(action_type, self.agent_id.as_str()), |action, (k, v)| {
                action.with_context(k.as_str(), v.clone())
            })
    }

    /// Evaluate, execute on allow, audit the terminal state.
    ///
    /// The audit write happens only once the store outcome is known, so a
    /// future dropped mid-call leaves no entry behind.
    async fn govern<T, F, Fut>(&self, action: Action, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let check = self.policy.evaluate(&action);

        match check.decision {
            Decision::Allow => {
                let outcome = operation().await;
                let detail = match &outcome {
                    Ok(_) => check.reason.clone(),
                    Err(e) => {
                        warn!(
                            "Store {} failed for allowed action '{}': {}",
                            self.store.name(),
                            action.action_type(),
                            e
                        );
                        format!("{} | store error: {e}", check.reason)
                    }
                };
                self.audit.write(
                    &action,
                    Decision::Allow,
                    &detail,
                    check.policy_id.as_deref(),
                )?;
                debug!("Action '{}' allowed", action.action_type());
                outcome
            }
            Decision::Deny | Decision::Review => {
                self.audit.write(
                    &action,
                    check.decision,
                    &check.reason,
                    check.policy_id.as_deref(),
                )?;
                Err(blocked(check, &action))
            }
        }
    }
}

fn blocked(check: CheckResult, action: &Action) -> WardenError {
    let policy_id = check.policy_id.unwrap_or_default();
    warn!(
        "Action '{}' for agent {} blocked ({}) by policy '{}': {}",
        action.action_type(),
        action.agent_id(),
        check.decision,
        policy_id,
        check.reason
    );
    match check.decision {
        Decision::Review => WardenError::ReviewRequired {
            policy_id,
            reason: check.reason,
        },
        _ => WardenError::Denied {
            policy_id,
            reason: check.reason,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        CountingStore, TEST_AGENT, TEST_BOT, always_deny_policy, client_with_store, memory_store,
    };

    #[tokio::test]
    async fn test_allowed_write_is_stored_and_audited() {
        let store = memory_store();
        let client = client_with_store(store.clone());

        let id = client
            .write(&NewMemory::new(TEST_BOT, "prefers tea"))
            .await
            .unwrap();
        assert!(store.get(TEST_BOT, &id).unwrap().is_some());

        let events = client.audit_log().events().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].decision, Decision::Allow);
        assert_eq!(events[0].detail, CheckResult::DEFAULT_ALLOW_REASON);
        assert_eq!(events[0].agent_id, TEST_AGENT);
        assert_eq!(events[0].action["type"], "memory.write");
        assert_eq!(events[0].action["data"]["content"], "prefers tea");
    }

    #[tokio::test]
    async fn test_denied_write_never_reaches_store() {
        let store = Arc::new(CountingStore::new(memory_store()));
        let client = client_with_store(store.clone());
        client
            .policy_engine()
            .add_policy(always_deny_policy(ACTION_WRITE))
            .unwrap();

        let err = client
            .write(&NewMemory::new(TEST_BOT, "secret"))
            .await
            .unwrap_err();
        assert!(matches!(err, WardenError::Denied { .. }));
        assert_eq!(err.policy_id(), Some("always-deny-memory.write"));
        assert_eq!(store.calls(), 0);
        assert_eq!(store.inner().count(TEST_BOT).unwrap(), 0);

        let events = client.audit_log().events().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].decision, Decision::Deny);
        assert_eq!(events[0].policy_id.as_deref(), Some("always-deny-memory.write"));
    }

    #[tokio::test]
    async fn test_review_blocks_with_review_error() {
        let store = Arc::new(CountingStore::new(memory_store()));
        let client = client_with_store(store.clone()).with_context("env", "prod");
        client
            .policy_engine()
            .add_policy(json!({
                "name": "review-prod-delete",
                "match": {"action.type": "memory.delete", "context.env": "prod"},
                "decision": "review",
                "mode": "enforce",
                "priority": 10,
                "active": true,
                "reason": "needs approval"
            }))
            .unwrap();

        let err = client.delete(TEST_BOT, "m-1").await.unwrap_err();
        assert!(matches!(err, WardenError::ReviewRequired { .. }));
        assert!(err.is_governance());
        assert_eq!(store.calls(), 0);
        assert_eq!(
            client.audit_log().events().unwrap()[0].decision,
            Decision::Review
        );
    }

    #[tokio::test]
    async fn test_monitor_policy_allows_and_is_recorded() {
        let store = memory_store();
        let client = client_with_store(store.clone());
        client
            .policy_engine()
            .add_policy(json!({
                "name": "watch-reads",
                "match": {"action.type": "memory.read"},
                "decision": "deny",
                "mode": "monitor",
                "priority": 1,
                "active": true,
                "reason": "trialing read restrictions"
            }))
            .unwrap();

        let hits = client
            .read(&RecallQuery::new(TEST_BOT, "anything"))
            .await
            .unwrap();
        assert!(hits.is_empty());

        let event = &client.audit_log().events().unwrap()[0];
        assert_eq!(event.decision, Decision::Allow);
        assert!(event.detail.starts_with("monitor:"));
        assert_eq!(event.policy_id.as_deref(), Some("watch-reads"));
    }

    #[tokio::test]
    async fn test_every_operation_is_audited() {
        let client = client_with_store(memory_store());

        let id = client
            .write(&NewMemory::new(TEST_BOT, "tea at noon").with_namespace("habits"))
            .await
            .unwrap();
        client
            .read(&RecallQuery::new(TEST_BOT, "tea").in_namespace("habits"))
            .await
            .unwrap();
        let summary = client
            .synthesize(TEST_BOT, "tea", &["habits".to_string()])
            .await
            .unwrap();
        assert_eq!(summary, "[habits] tea at noon");
        assert!(client.delete(TEST_BOT, &id).await.unwrap());
        assert!(!client.delete(TEST_BOT, &id).await.unwrap());

        let log = client.audit_log();
        assert_eq!(log.count().unwrap(), 5);
        assert!(log.verify_chain().unwrap().valid);

        let types: Vec<String> = log
            .events()
            .unwrap()
            .iter()
            .map(|e| e.action["type"].as_str().unwrap_or_default().to_string())
            .collect();
        assert_eq!(
            types,
            vec![
                ACTION_WRITE,
                ACTION_READ,
                ACTION_SYNTHESIZE,
                ACTION_DELETE,
                ACTION_DELETE
            ]
        );
    }

    #[tokio::test]
    async fn test_context_flows_into_policy_matching() {
        let client = client_with_store(memory_store()).with_context("data_class", "pii");
        client.policy_engine().load_pack("sensitive-data").unwrap();

        let err = client
            .write(&NewMemory::new(TEST_BOT, "ssn 123-45-6789"))
            .await
            .unwrap_err();
        assert_eq!(err.policy_id(), Some("deny-pii-memory-write"));

        let event = &client.audit_log().events().unwrap()[0];
        assert_eq!(event.action["context"]["data_class"], "pii");
    }

    #[test]
    fn test_from_config_builds_local_client() {
        let dir = tempfile::tempdir().unwrap();
        let policy_file = dir.path().join("policies.yaml");
        std::fs::write(
            &policy_file,
            r#"
policies:
  - name: custom-rule
    match:
      action.type: memory.write
      action.data.namespace: scratch
    decision: deny
    mode: enforce
    priority: 5
    active: true
"#,
        )
        .unwrap();

        let mut config = Config::default();
        config.storage.data_dir = dir.path().join("data");
        config.policy.files = vec![policy_file];
        config.policy.packs = vec!["memory-hygiene".to_string()];
        config.governance.agent_id = "support-bot".to_string();
        config
            .governance
            .context
            .insert("env".to_string(), "prod".to_string());

        let client = MemoryClient::from_config(&config).unwrap();
        assert_eq!(client.store_name(), "local");
        assert_eq!(client.agent_id(), "support-bot");
        assert!(client.policy_engine().get("custom-rule").is_some());
        assert!(client.policy_engine().get("review-prod-memory-delete").is_some());
    }

    #[test]
    fn test_from_config_unknown_pack_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.storage.data_dir = dir.path().to_path_buf();
        config.policy.packs = vec!["no-such-pack".to_string()];

        let err = MemoryClient::from_config(&config).err().unwrap();
        assert!(matches!(err, WardenError::PolicyValidation(_)));
    }
}
