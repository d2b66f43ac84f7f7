//! Remote memory service client
//!
//! Talks JSON over HTTP to a hosted memory API. When the service is
//! unreachable (transport failure or 5xx) and a local store is attached,
//! the same operation is served locally instead. Authentication failures
//! are surfaced as-is and never fall back.

use std::env;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use url::Url;

use crate::config::RemoteStoreConfig;
use crate::error::{Result, WardenError};
use crate::storage::local::LocalMemoryStore;
use crate::storage::provider::MemoryStore;
use crate::storage::types::{NewMemory, RecallQuery, RecalledMemory};

const API_KEY_HEADER: &str = "X-API-Key";

/// Memory store backed by a remote HTTP service
pub struct RemoteMemoryStore {
    client: Client,
    base_url: Url,
    api_key: String,
    fallback: Option<Arc<LocalMemoryStore>>,
}

#[derive(Debug, Deserialize)]
struct RememberResponse {
    memory_id: String,
}

#[derive(Debug, Deserialize)]
struct RecallResponse {
    #[serde(default)]
    memories: Vec<RecalledMemory>,
}

#[derive(Debug, Deserialize)]
struct DeleteResponse {
    #[serde(default = "default_deleted")]
    deleted: bool,
}

fn default_deleted() -> bool {
    true
}

#[derive(Debug, Serialize)]
struct ReflectRequest<'a> {
    bot_id: &'a str,
    query: &'a str,
    namespaces: &'a [String],
}

#[derive(Debug, Deserialize)]
struct ReflectResponse {
    #[serde(default)]
    synthesis: String,
}

impl RemoteMemoryStore {
    /// Create a store from config, reading the API key from the environment
    /// variable named in `config.api_key_env`.
    pub fn new(config: &RemoteStoreConfig, fallback: Option<Arc<LocalMemoryStore>>) -> Result<Self> {
        let api_key = env::var(&config.api_key_env).map_err(|_| {
            WardenError::Config(format!(
                "API key env var '{}' not set",
                config.api_key_env
            ))
        })?;
        Self::with_api_key(config, api_key, fallback)
    }

    /// Create a store with an explicit API key
    pub fn with_api_key(
        config: &RemoteStoreConfig,
        api_key: impl Into<String>,
        fallback: Option<Arc<LocalMemoryStore>>,
    ) -> Result<Self> {
        let base_url = parse_base_url(&config.api_url)?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| WardenError::Config(format!("Failed to build HTTP client: {e}")))?;

        info!(
            "RemoteMemoryStore initialized with api_url: {}, local fallback: {}",
            base_url,
            fallback.is_some()
        );

        Ok(Self {
            client,
            base_url,
            api_key: api_key.into(),
            fallback,
        })
    }

    pub fn has_fallback(&self) -> bool {
        self.fallback.is_some()
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| WardenError::Config(format!("Invalid endpoint '{path}': {e}")))
    }

    /// Send a request. Only transport failures are errors here.
    async fn dispatch(&self, request: RequestBuilder) -> Result<Response> {
        request
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await
            .map_err(|e| WardenError::StoreUnavailable(e.to_string()))
    }

    /// Send a request and classify the response status
    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let response = self.dispatch(request).await?;
        check_status(response).await
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = self.send(request).await?;
        response
            .json()
            .await
            .map_err(|e| WardenError::Serialization(format!("Invalid response from memory service: {e}")))
    }

    /// Local store to retry on, or the original error when no retry applies
    fn fallback_for(&self, operation: &str, err: WardenError) -> Result<&LocalMemoryStore> {
        match &self.fallback {
            Some(local) if err.is_fallback_eligible() => {
                warn!(
                    "Remote memory {} failed: {}, falling back to local store",
                    operation, err
                );
                Ok(local)
            }
            _ => Err(err),
        }
    }

    async fn remote_write(&self, memory: &NewMemory) -> Result<String> {
        let url = self.endpoint("remember")?;
        debug!("POST {}", url);
        let response: RememberResponse = self.send_json(self.client.post(url).json(memory)).await?;
        Ok(response.memory_id)
    }

    async fn remote_read(&self, query: &RecallQuery) -> Result<Vec<RecalledMemory>> {
        let url = self.endpoint("recall")?;
        debug!("POST {}", url);
        let response: RecallResponse = self.send_json(self.client.post(url).json(query)).await?;
        Ok(response.memories)
    }

    async fn remote_delete(&self, bot_id: &str, memory_id: &str) -> Result<bool> {
        let mut url = self.endpoint(&format!("memory/{}", urlencoding::encode(memory_id)))?;
        url.query_pairs_mut().append_pair("bot_id", bot_id);
        debug!("DELETE {}", url);

        let response = self.dispatch(self.client.delete(url)).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        let response = check_status(response).await?;

        // Some deployments answer 204 with no body
        let body = response
            .text()
            .await
            .map_err(|e| WardenError::StoreUnavailable(e.to_string()))?;
        if body.trim().is_empty() {
            return Ok(true);
        }
        let parsed: DeleteResponse = serde_json::from_str(&body)?;
        Ok(parsed.deleted)
    }

    async fn remote_synthesize(
        &self,
        bot_id: &str,
        query: &str,
        namespaces: &[String],
    ) -> Result<String> {
        let url = self.endpoint("reflect")?;
        debug!("POST {}", url);
        let request = ReflectRequest {
            bot_id,
            query,
            namespaces,
        };
        let response: ReflectResponse =
            self.send_json(self.client.post(url).json(&request)).await?;
        Ok(response.synthesis)
    }
}

#[async_trait]
impl MemoryStore for RemoteMemoryStore {
    async fn write(&self, memory: &NewMemory) -> Result<String> {
        match self.remote_write(memory).await {
            Ok(id) => Ok(id),
            Err(e) => self.fallback_for("write", e)?.write(memory).await,
        }
    }

    async fn read(&self, query: &RecallQuery) -> Result<Vec<RecalledMemory>> {
        match self.remote_read(query).await {
            Ok(memories) => Ok(memories),
            Err(e) => self.fallback_for("read", e)?.read(query).await,
        }
    }

    async fn delete(&self, bot_id: &str, memory_id: &str) -> Result<bool> {
        match self.remote_delete(bot_id, memory_id).await {
            Ok(deleted) => Ok(deleted),
            Err(e) => {
                self.fallback_for("delete", e)?
                    .delete(bot_id, memory_id)
                    .await
            }
        }
    }

    async fn synthesize(&self, bot_id: &str, query: &str, namespaces: &[String]) -> Result<String> {
        match self.remote_synthesize(bot_id, query, namespaces).await {
            Ok(synthesis) => Ok(synthesis),
            Err(e) => {
                self.fallback_for("synthesize", e)?
                    .synthesize(bot_id, query, namespaces)
                    .await
            }
        }
    }

    fn name(&self) -> &'static str {
        "remote"
    }
}

/// Parse the configured base URL so relative endpoints join beneath it
fn parse_base_url(api_url: &str) -> Result<Url> {
    let trimmed = api_url.trim();
    if trimmed.is_empty() {
        return Err(WardenError::Config(
            "Remote memory store requires remote.api_url".to_string(),
        ));
    }
    let with_slash = if trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{trimmed}/")
    };
    Url::parse(&with_slash)
        .map_err(|e| WardenError::Config(format!("Invalid remote.api_url '{trimmed}': {e}")))
}

async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    Err(classify_status(status, &body))
}

fn classify_status(status: StatusCode, body: &str) -> WardenError {
    let message = format!("{} {}", status.as_u16(), body.trim());
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => WardenError::AuthFailed(message),
        s if s.is_server_error() => WardenError::StoreUnavailable(message),
        _ => WardenError::Remote(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn create_test_config(api_url: String) -> RemoteStoreConfig {
        RemoteStoreConfig {
            api_url,
            api_key_env: "WARDEN_TEST_REMOTE_KEY".to_string(),
            timeout_secs: 5,
            fallback_to_local: true,
        }
    }

    fn remote(server: &MockServer, fallback: Option<Arc<LocalMemoryStore>>) -> RemoteMemoryStore {
        RemoteMemoryStore::with_api_key(&create_test_config(server.uri()), "test-key", fallback)
            .unwrap()
    }

    fn local() -> Arc<LocalMemoryStore> {
        Arc::new(LocalMemoryStore::open_in_memory().unwrap())
    }

    #[test]
    fn test_new_missing_api_key() {
        let mut config = create_test_config("https://memory.example.com".to_string());
        config.api_key_env = "WARDEN_TEST_KEY_THAT_IS_NEVER_SET".to_string();

        let err = RemoteMemoryStore::new(&config, None).err().unwrap();
        assert!(matches!(err, WardenError::Config(_)));
        assert!(err.to_string().contains("WARDEN_TEST_KEY_THAT_IS_NEVER_SET"));
    }

    #[test]
    fn test_base_url_keeps_path_prefix() {
        let url = parse_base_url("https://memory.example.com/api/v1").unwrap();
        assert_eq!(
            url.join("recall").unwrap().as_str(),
            "https://memory.example.com/api/v1/recall"
        );
        assert!(parse_base_url("  ").is_err());
    }

    #[test]
    fn test_classify_status() {
        assert!(matches!(
            classify_status(StatusCode::UNAUTHORIZED, ""),
            WardenError::AuthFailed(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::FORBIDDEN, ""),
            WardenError::AuthFailed(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_GATEWAY, ""),
            WardenError::StoreUnavailable(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::UNPROCESSABLE_ENTITY, "bad"),
            WardenError::Remote(_)
        ));
    }

    #[tokio::test]
    async fn test_write_sends_api_key() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/remember"))
            .and(header("X-API-Key", "test-key"))
            .and(body_partial_json(serde_json::json!({
                "bot_id": "bot-1",
                "content": "likes tea",
                "namespace": "prefs"
            })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"memory_id": "m-1"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let store = remote(&server, None);
        let id = store
            .write(&NewMemory::new("bot-1", "likes tea").with_namespace("prefs"))
            .await
            .unwrap();
        assert_eq!(id, "m-1");
    }

    #[tokio::test]
    async fn test_read_parses_memories() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/recall"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "memories": [{
                    "memory_id": "m-1",
                    "content": "likes tea",
                    "created_at": "2026-01-01T00:00:00Z",
                    "relevance_score": 0.9
                }]
            })))
            .mount(&server)
            .await;

        let store = remote(&server, None);
        let hits = store.read(&RecallQuery::new("bot-1", "tea")).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].memory_id, "m-1");
        assert!(hits[0].metadata.is_empty());
    }

    #[tokio::test]
    async fn test_delete_missing_is_false() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/memory/m%2F1"))
            .and(query_param("bot_id", "bot-1"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let store = remote(&server, None);
        assert!(!store.delete("bot-1", "m/1").await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_empty_body_is_true() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/memory/m-1"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let store = remote(&server, None);
        assert!(store.delete("bot-1", "m-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_synthesize() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/reflect"))
            .and(body_partial_json(serde_json::json!({"namespaces": ["prefs"]})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"synthesis": "User likes tea"})),
            )
            .mount(&server)
            .await;

        let store = remote(&server, None);
        let summary = store
            .synthesize("bot-1", "tea", &["prefs".to_string()])
            .await
            .unwrap();
        assert_eq!(summary, "User likes tea");
    }

    #[tokio::test]
    async fn test_falls_back_to_local_on_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .mount(&server)
            .await;

        let fallback = local();
        let store = remote(&server, Some(fallback.clone()));

        let id = store
            .write(&NewMemory::new("bot-1", "stored while remote was down"))
            .await
            .unwrap();
        assert!(fallback.get("bot-1", &id).unwrap().is_some());

        let hits = store
            .read(&RecallQuery::new("bot-1", "remote was down"))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn test_server_error_without_fallback() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let store = remote(&server, None);
        let err = store
            .write(&NewMemory::new("bot-1", "x"))
            .await
            .unwrap_err();
        assert!(matches!(err, WardenError::StoreUnavailable(_)));
        assert!(err.to_string().contains("500"));
    }

    #[tokio::test]
    async fn test_auth_failure_never_falls_back() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .mount(&server)
            .await;

        let fallback = local();
        let store = remote(&server, Some(fallback.clone()));

        let err = store
            .write(&NewMemory::new("bot-1", "should not land anywhere"))
            .await
            .unwrap_err();
        assert!(matches!(err, WardenError::AuthFailed(_)));
        assert_eq!(fallback.count("bot-1").unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unreachable_service_falls_back() {
        // Nothing listens on the discard port
        let config = create_test_config("http://127.0.0.1:9".to_string());
        let fallback = local();
        let store = RemoteMemoryStore::with_api_key(&config, "k", Some(fallback.clone())).unwrap();
        assert!(store.has_fallback());

        store
            .write(&NewMemory::new("bot-1", "offline write"))
            .await
            .unwrap();
        assert_eq!(fallback.count("bot-1").unwrap(), 1);
    }

    #[tokio::test]
    async fn test_malformed_body_is_serialization_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/remember"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let store = remote(&server, Some(local()));
        let err = store
            .write(&NewMemory::new("bot-1", "x"))
            .await
            .unwrap_err();
        assert!(matches!(err, WardenError::Serialization(_)));
    }

    #[tokio::test]
    async fn test_name() {
        let server = MockServer::start().await;
        assert_eq!(remote(&server, None).name(), "remote");
    }
}
