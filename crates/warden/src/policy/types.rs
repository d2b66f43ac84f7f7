//! Policy types
//!
//! Defines the action being governed, policy rules with their validation,
//! and the outcome of a single evaluation.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::{Result, WardenError};

/// Fields every policy definition must carry
pub const REQUIRED_FIELDS: [&str; 6] = ["name", "match", "decision", "mode", "priority", "active"];

/// A proposed operation submitted for policy evaluation.
///
/// Built once through the `with_*` methods and read-only afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    #[serde(rename = "type")]
    action_type: String,
    #[serde(default)]
    data: BTreeMap<String, Value>,
    #[serde(default)]
    context: BTreeMap<String, Value>,
    agent_id: String,
}

impl Action {
    pub fn new(action_type: impl Into<String>, agent_id: impl Into<String>) -> Self {
        Self {
            action_type: action_type.into(),
            data: BTreeMap::new(),
            context: BTreeMap::new(),
            agent_id: agent_id.into(),
        }
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn action_type(&self) -> &str {
        &self.action_type
    }

    pub fn data(&self) -> &BTreeMap<String, Value> {
        &self.data
    }

    pub fn context(&self) -> &BTreeMap<String, Value> {
        &self.context
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    /// Flatten into the dot-path map policies match against:
    /// `action.type`, `action.data.<key>`, `context.<key>` and `agent_id`.
    ///
    /// Only one level is flattened; nested values compare as a whole.
    pub fn flatten(&self) -> BTreeMap<String, Value> {
        let mut flat = BTreeMap::new();
        flat.insert(
            "action.type".to_string(),
            Value::String(self.action_type.clone()),
        );
        for (key, value) in &self.data {
            flat.insert(format!("action.data.{key}"), value.clone());
        }
        for (key, value) in &self.context {
            flat.insert(format!("context.{key}"), value.clone());
        }
        flat.insert(
            "agent_id".to_string(),
            Value::String(self.agent_id.clone()),
        );
        flat
    }

    /// JSON snapshot recorded in the audit log. Object keys are sorted.
    pub fn snapshot(&self) -> Value {
        json!({
            "type": self.action_type,
            "data": self.data,
            "context": self.context,
            "agent_id": self.agent_id,
        })
    }
}

/// Outcome a policy prescribes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Allow,
    Deny,
    Review,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Allow => "allow",
            Decision::Deny => "deny",
            Decision::Review => "review",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Decision {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "allow" => Ok(Decision::Allow),
            "deny" => Ok(Decision::Deny),
            "review" => Ok(Decision::Review),
            other => Err(format!(
                "invalid decision '{other}' (expected allow, deny or review)"
            )),
        }
    }
}

/// Whether a matching policy's decision is applied or only observed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Enforce,
    Monitor,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Enforce => "enforce",
            Mode::Monitor => "monitor",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "enforce" => Ok(Mode::Enforce),
            "monitor" => Ok(Mode::Monitor),
            other => Err(format!(
                "invalid mode '{other}' (expected enforce or monitor)"
            )),
        }
    }
}

/// A single validated rule
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Policy {
    /// Unique name, used as the policy id in results and audit events
    pub name: String,
    /// Dot-path -> value pairs that must all be present and equal
    #[serde(rename = "match")]
    pub match_on: BTreeMap<String, Value>,
    pub decision: Decision,
    pub mode: Mode,
    /// Lower values are evaluated first
    pub priority: i64,
    pub active: bool,
    pub reason: String,
}

impl Policy {
    /// Validate an untyped definition (from YAML or a runtime map)
    pub fn from_definition(definition: &Value) -> Result<Self> {
        let fields = definition.as_object().ok_or_else(|| {
            WardenError::PolicyValidation("policy definition must be a mapping".to_string())
        })?;

        let label = fields
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or("<unnamed>")
            .to_string();
        let invalid = |msg: String| WardenError::PolicyValidation(format!("policy '{label}': {msg}"));

        for field in REQUIRED_FIELDS {
            if !fields.contains_key(field) {
                return Err(invalid(format!("missing required field '{field}'")));
            }
        }

        let name = match fields.get("name").and_then(Value::as_str) {
            Some(name) if !name.trim().is_empty() => name.to_string(),
            _ => return Err(invalid("'name' must be a non-empty string".to_string())),
        };

        let match_on: BTreeMap<String, Value> = match fields.get("match") {
            Some(Value::Object(map)) if !map.is_empty() => {
                map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
            }
            Some(Value::Object(_)) => {
                return Err(invalid("'match' must contain at least one entry".to_string()));
            }
            _ => return Err(invalid("'match' must be a mapping".to_string())),
        };

        let decision = fields
            .get("decision")
            .and_then(Value::as_str)
            .ok_or_else(|| invalid("'decision' must be a string".to_string()))?
            .parse::<Decision>()
            .map_err(&invalid)?;

        let mode = fields
            .get("mode")
            .and_then(Value::as_str)
            .ok_or_else(|| invalid("'mode' must be a string".to_string()))?
            .parse::<Mode>()
            .map_err(&invalid)?;

        let priority = fields
            .get("priority")
            .and_then(Value::as_i64)
            .ok_or_else(|| invalid("'priority' must be an integer".to_string()))?;

        let active = fields
            .get("active")
            .and_then(Value::as_bool)
            .ok_or_else(|| invalid("'active' must be a boolean".to_string()))?;

        let reason = match fields.get("reason") {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(reason)) => reason.clone(),
            Some(_) => return Err(invalid("'reason' must be a string".to_string())),
        };

        Ok(Self {
            name,
            match_on,
            decision,
            mode,
            priority,
            active,
            reason,
        })
    }

    /// Exact subset match: every key present in `flat` with an equal value
    pub fn matches(&self, flat: &BTreeMap<String, Value>) -> bool {
        self.match_on
            .iter()
            .all(|(path, expected)| flat.get(path) == Some(expected))
    }
}

/// Result of evaluating one action
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckResult {
    pub decision: Decision,
    pub reason: String,
    /// Name of the policy that decided, `None` for the default allow
    pub policy_id: Option<String>,
}

impl CheckResult {
    pub const DEFAULT_ALLOW_REASON: &'static str = "no policy matched -- default allow";

    pub fn default_allow() -> Self {
        Self {
            decision: Decision::Allow,
            reason: Self::DEFAULT_ALLOW_REASON.to_string(),
            policy_id: None,
        }
    }

    pub fn is_allowed(&self) -> bool {
        self.decision == Decision::Allow
    }
}
