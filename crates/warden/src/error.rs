//! Error types for Warden

use thiserror::Error;

/// Main error type for Warden operations
#[derive(Error, Debug)]
pub enum WardenError {
    /// Malformed policy definition (missing field, bad enum value, bad YAML)
    #[error("Policy validation error: {0}")]
    PolicyValidation(String),

    /// An enforced policy denied the action
    #[error("Action denied by policy '{policy_id}': {reason}")]
    Denied { policy_id: String, reason: String },

    /// An enforced policy flagged the action for human review
    #[error("Action requires review (policy '{policy_id}'): {reason}")]
    ReviewRequired { policy_id: String, reason: String },

    /// The remote memory service rejected our credentials
    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    /// The remote memory service could not be reached or returned 5xx
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// Any other non-success response from the remote memory service
    #[error("Remote store error: {0}")]
    Remote(String),

    /// Local storage errors (SQLite, schema, etc.)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Caller-supplied value outside what the store can represent
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Audit export requested in a format we don't produce
    #[error("Unsupported export format: {0}")]
    UnsupportedExportFormat(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl WardenError {
    /// True for decisions that blocked an action (deny or review)
    pub fn is_governance(&self) -> bool {
        matches!(self, Self::Denied { .. } | Self::ReviewRequired { .. })
    }

    /// The policy that triggered a governance error, if any
    pub fn policy_id(&self) -> Option<&str> {
        match self {
            Self::Denied { policy_id, .. } | Self::ReviewRequired { policy_id, .. } => {
                Some(policy_id)
            }
            _ => None,
        }
    }

    /// Whether a remote failure may be retried against a local fallback.
    ///
    /// Only outages qualify. Auth failures and client errors never do.
    pub fn is_fallback_eligible(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_))
    }
}

impl From<rusqlite::Error> for WardenError {
    fn from(e: rusqlite::Error) -> Self {
        WardenError::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for WardenError {
    fn from(e: serde_json::Error) -> Self {
        WardenError::Serialization(e.to_string())
    }
}

/// Result type alias for Warden operations
pub type Result<T> = std::result::Result<T, WardenError>;
