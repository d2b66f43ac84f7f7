use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{Result, WardenError};

/// Main configuration structure for Warden
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Local database configuration
    #[serde(default)]
    pub storage: StorageConfig,
    /// Policy sources loaded at startup
    #[serde(default)]
    pub policy: PolicyConfig,
    /// Remote memory service configuration
    #[serde(default)]
    pub remote: RemoteStoreConfig,
    /// Identity and context attached to every governed action
    #[serde(default)]
    pub governance: GovernanceConfig,
}

impl Config {
    /// Load configuration from an explicit path, or search the default
    /// locations. Falls back to defaults when no file exists.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::from_file(path);
        }

        let default_paths = [
            dirs::home_dir().map(|h| h.join(".warden").join("config.toml")),
            dirs::config_dir().map(|c| c.join("warden").join("config.toml")),
            Some(PathBuf::from("config.toml")),
        ];

        for path in default_paths.iter().flatten() {
            if path.exists() {
                return Self::from_file(path);
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Config::default())
    }

    /// Read and parse a TOML config file
    pub fn from_file(path: &Path) -> Result<Self> {
        tracing::info!("Loading config from: {}", path.display());
        let content = std::fs::read_to_string(path).map_err(|e| {
            WardenError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        toml::from_str(&content)
            .map_err(|e| WardenError::Config(format!("Failed to parse config: {e}")))
    }

    /// Full path of the SQLite database holding memories and the audit log
    pub fn database_path(&self) -> PathBuf {
        self.storage.data_dir.join(&self.storage.database_file)
    }
}

/// Local database configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Base directory for all storage data
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// SQLite file name inside `data_dir`
    #[serde(default = "default_database_file")]
    pub database_file: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            database_file: default_database_file(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".warden"))
        .unwrap_or_else(|| PathBuf::from(".warden"))
}

fn default_database_file() -> String {
    "warden.db".to_string()
}

/// Policy sources
#[derive(Debug, Clone, Deserialize)]
pub struct PolicyConfig {
    /// YAML policy files, loaded in order
    #[serde(default)]
    pub files: Vec<PathBuf>,
    /// Built-in packs, loaded after files
    #[serde(default = "default_packs")]
    pub packs: Vec<String>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            files: Vec::new(),
            packs: default_packs(),
        }
    }
}

fn default_packs() -> Vec<String> {
    vec!["basic-safety".to_string()]
}

/// Remote memory service configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteStoreConfig {
    /// Base URL of the memory service. Empty disables the remote store.
    #[serde(default)]
    pub api_url: String,
    /// Environment variable name for API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// Request timeout in seconds
    #[serde(default = "default_remote_timeout_secs")]
    pub timeout_secs: u64,
    /// Serve from the local store when the service is down
    #[serde(default = "default_fallback_to_local")]
    pub fallback_to_local: bool,
}

impl RemoteStoreConfig {
    pub fn is_enabled(&self) -> bool {
        !self.api_url.trim().is_empty()
    }
}

impl Default for RemoteStoreConfig {
    fn default() -> Self {
        Self {
            api_url: String::new(),
            api_key_env: default_api_key_env(),
            timeout_secs: default_remote_timeout_secs(),
            fallback_to_local: default_fallback_to_local(),
        }
    }
}

fn default_api_key_env() -> String {
    "WARDEN_MEMORY_API_KEY".to_string()
}

fn default_remote_timeout_secs() -> u64 {
    30
}

fn default_fallback_to_local() -> bool {
    true
}

/// Identity and ambient context for governed actions
#[derive(Debug, Clone, Deserialize)]
pub struct GovernanceConfig {
    /// Agent identifier recorded on every action
    #[serde(default = "default_agent_id")]
    pub agent_id: String,
    /// Context entries merged into every action (e.g. `env = "prod"`)
    #[serde(default)]
    pub context: BTreeMap<String, String>,
}

impl Default for GovernanceConfig {
    fn default() -> Self {
        Self {
            agent_id: default_agent_id(),
            context: BTreeMap::new(),
        }
    }
}

fn default_agent_id() -> String {
    "default-agent".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.storage.database_file, "warden.db");
        assert!(config.policy.files.is_empty());
        assert_eq!(config.policy.packs, vec!["basic-safety".to_string()]);
        assert_eq!(config.remote.api_url, "");
        assert!(!config.remote.is_enabled());
        assert_eq!(config.remote.api_key_env, "WARDEN_MEMORY_API_KEY");
        assert_eq!(config.remote.timeout_secs, 30);
        assert!(config.remote.fallback_to_local);
        assert_eq!(config.governance.agent_id, "default-agent");
        assert!(config.governance.context.is_empty());
    }

    #[test]
    fn test_toml_deserialization() {
        let toml_str = r#"
[storage]
data_dir = "/tmp/warden"
database_file = "gate.db"

[policy]
files = ["/etc/warden/policies.yaml"]
packs = ["basic-safety", "payments-guard"]

[remote]
api_url = "https://memory.example.com"
api_key_env = "MEMORY_KEY"
timeout_secs = 10
fallback_to_local = false

[governance]
agent_id = "support-bot"

[governance.context]
env = "prod"
"#;

        let config: Config = toml::from_str(toml_str).expect("Failed to parse TOML");

        assert_eq!(config.storage.data_dir, PathBuf::from("/tmp/warden"));
        assert_eq!(config.database_path(), PathBuf::from("/tmp/warden/gate.db"));
        assert_eq!(config.policy.files.len(), 1);
        assert_eq!(config.policy.packs.len(), 2);
        assert!(config.remote.is_enabled());
        assert_eq!(config.remote.api_key_env, "MEMORY_KEY");
        assert_eq!(config.remote.timeout_secs, 10);
        assert!(!config.remote.fallback_to_local);
        assert_eq!(config.governance.agent_id, "support-bot");
        assert_eq!(
            config.governance.context.get("env"),
            Some(&"prod".to_string())
        );
    }

    #[test]
    fn test_toml_partial_deserialization() {
        let toml_str = r#"
[remote]
api_url = "https://memory.example.com"
"#;

        let config: Config = toml::from_str(toml_str).expect("Failed to parse partial TOML");

        assert_eq!(config.storage.database_file, "warden.db");
        assert_eq!(config.policy.packs, vec!["basic-safety".to_string()]);
        assert_eq!(config.remote.timeout_secs, 30);
        assert!(config.remote.fallback_to_local);
    }

    #[test]
    fn test_blank_api_url_disables_remote() {
        let toml_str = r#"
[remote]
api_url = "   "
"#;

        let config: Config = toml::from_str(toml_str).expect("Failed to parse TOML");
        assert!(!config.remote.is_enabled());
    }

    #[test]
    fn test_load_from_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[governance]\nagent_id = \"from-file\"\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.governance.agent_id, "from-file");
    }

    #[test]
    fn test_load_missing_explicit_path_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.toml");

        let err = Config::load(Some(&path)).unwrap_err();
        assert!(matches!(err, WardenError::Config(_)));
    }

    #[test]
    fn test_load_malformed_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[storage\nbroken").unwrap();

        let err = Config::load(Some(&path)).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config"));
    }
}
