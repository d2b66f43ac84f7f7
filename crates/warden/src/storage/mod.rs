//! Memory storage backends
//!
//! - `LocalMemoryStore`: embedded SQLite with per-record TTL
//! - `RemoteMemoryStore`: hosted memory service over HTTP, optionally
//!   falling back to a local store during outages

pub mod local;
pub mod provider;
pub mod remote;
pub mod types;

use std::sync::Arc;

use tracing::info;

use crate::config::Config;
use crate::error::Result;

pub use local::LocalMemoryStore;
pub use provider::MemoryStore;
pub use remote::RemoteMemoryStore;
pub use types::{
    DEFAULT_NAMESPACE, DEFAULT_RECALL_LIMIT, MemoryRecord, NewMemory, RecallQuery, RecalledMemory,
};

/// Build the store selected by configuration.
///
/// The remote store is used when `remote.api_url` is set; otherwise the
/// local SQLite store. The choice is made once, here.
pub fn from_config(config: &Config) -> Result<Arc<dyn MemoryStore>> {
    std::fs::create_dir_all(&config.storage.data_dir)?;
    let db_path = config.database_path();

    if !config.remote.is_enabled() {
        info!("Using local memory store");
        return Ok(Arc::new(LocalMemoryStore::open(&db_path)?));
    }

    let fallback = if config.remote.fallback_to_local {
        Some(Arc::new(LocalMemoryStore::open(&db_path)?))
    } else {
        None
    };

    info!("Using remote memory store at {}", config.remote.api_url);
    Ok(Arc::new(RemoteMemoryStore::new(&config.remote, fallback)?))
}
