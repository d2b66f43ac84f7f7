//! Ordered policy evaluation
//!
//! Policies are kept sorted by ascending priority (stable, so ties keep load
//! order). Evaluation walks the active policies and the first exact match
//! decides. Monitor-mode matches are logged and always allow.

use std::collections::HashSet;
use std::path::Path;

use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, info};

use crate::error::{Result, WardenError};
use crate::policy::packs::{PACK_NAMES, pack_source};
use crate::policy::types::{Action, CheckResult, Decision, Mode, Policy};

/// Policy store and evaluator
#[derive(Debug, Default)]
pub struct PolicyEngine {
    policies: RwLock<Vec<Policy>>,
}

impl PolicyEngine {
    /// Create an engine with no policies (everything is allowed)
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of the built-in packs
    pub fn available_packs() -> &'static [&'static str] {
        &PACK_NAMES
    }

    /// Load a YAML policy file. Returns the number of policies added.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<usize> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            WardenError::PolicyValidation(format!(
                "failed to read policy file {}: {e}",
                path.display()
            ))
        })?;
        let added = self.load_str(&content, &path.display().to_string())?;
        info!("Loaded {} policies from {}", added, path.display());
        Ok(added)
    }

    /// Load a built-in pack by name
    pub fn load_pack(&self, name: &str) -> Result<usize> {
        let source = pack_source(name).ok_or_else(|| {
            WardenError::PolicyValidation(format!(
                "unknown policy pack '{name}' (available: {})",
                PACK_NAMES.join(", ")
            ))
        })?;
        let added = self.load_str(source, &format!("pack:{name}"))?;
        info!("Loaded policy pack '{}' ({} policies)", name, added);
        Ok(added)
    }

    /// Load a YAML document with a top-level `policies` list.
    ///
    /// The whole document is validated before anything is added.
    pub fn load_str(&self, yaml: &str, source: &str) -> Result<usize> {
        let document: Value = serde_yaml::from_str(yaml).map_err(|e| {
            WardenError::PolicyValidation(format!("malformed YAML in {source}: {e}"))
        })?;

        let entries = document
            .get("policies")
            .and_then(Value::as_array)
            .ok_or_else(|| {
                WardenError::PolicyValidation(format!(
                    "{source}: expected a top-level 'policies' list"
                ))
            })?;

        let parsed = entries
            .iter()
            .map(Policy::from_definition)
            .collect::<Result<Vec<_>>>()?;

        let count = parsed.len();
        self.extend(parsed)?;
        Ok(count)
    }

    /// Add a single policy at runtime, validated like file entries
    pub fn add_policy(&self, definition: Value) -> Result<()> {
        let policy = Policy::from_definition(&definition)?;
        debug!("Adding policy '{}' at runtime", policy.name);
        self.extend(vec![policy])
    }

    fn extend(&self, incoming: Vec<Policy>) -> Result<()> {
        let mut policies = self.policies.write();

        let mut names: HashSet<&str> = policies.iter().map(|p| p.name.as_str()).collect();
        for policy in &incoming {
            if !names.insert(policy.name.as_str()) {
                return Err(WardenError::PolicyValidation(format!(
                    "duplicate policy name '{}'",
                    policy.name
                )));
            }
        }

        policies.extend(incoming);
        policies.sort_by_key(|p| p.priority);
        Ok(())
    }

    /// Evaluate an action against the active policies
    pub fn evaluate(&self, action: &Action) -> CheckResult {
        let flat = action.flatten();
        let policies = self.policies.read();

        let Some(policy) = policies
            .iter()
            .filter(|p| p.active)
            .find(|p| p.matches(&flat))
        else {
            debug!("No policy matched action '{}'", action.action_type());
            return CheckResult::default_allow();
        };

        match policy.mode {
            Mode::Monitor => {
                info!(
                    "Monitor policy '{}' would have returned {} for action '{}' (agent {}): {}",
                    policy.name,
                    policy.decision,
                    action.action_type(),
                    action.agent_id(),
                    policy.reason
                );
                CheckResult {
                    decision: Decision::Allow,
                    reason: format!(
                        "monitor: policy '{}' would {} -- {}",
                        policy.name, policy.decision, policy.reason
                    ),
                    policy_id: Some(policy.name.clone()),
                }
            }
            Mode::Enforce => {
                debug!(
                    "Policy '{}' returned {} for action '{}'",
                    policy.name,
                    policy.decision,
                    action.action_type()
                );
                CheckResult {
                    decision: policy.decision,
                    reason: policy.reason.clone(),
                    policy_id: Some(policy.name.clone()),
                }
            }
        }
    }

    /// Snapshot of all policies in evaluation order
    pub fn policies(&self) -> Vec<Policy> {
        self.policies.read().clone()
    }

    pub fn get(&self, name: &str) -> Option<Policy> {
        self.policies.read().iter().find(|p| p.name == name).cloned()
    }

    pub fn len(&self) -> usize {
        self.policies.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.read().is_empty()
    }

    /// Toggle a policy. Returns false if no policy has that name.
    pub fn set_active(&self, name: &str, active: bool) -> bool {
        let mut policies = self.policies.write();
        match policies.iter_mut().find(|p| p.name == name) {
            Some(policy) => {
                policy.active = active;
                true
            }
            None => false,
        }
    }

    /// Remove a policy. Returns false if no policy has that name.
    pub fn remove_policy(&self, name: &str) -> bool {
        let mut policies = self.policies.write();
        let before = policies.len();
        policies.retain(|p| p.name != name);
        policies.len() != before
    }
}
