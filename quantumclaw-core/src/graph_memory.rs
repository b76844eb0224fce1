//! Remote knowledge-graph client for the memory subsystem's graph layer.
//!
//! Grounded on `providers::failover`'s circuit-breaker-guarded HTTP client
//! (token-bucket-like failure counting, half-open-style recovery probe) and
//! `delivery`'s append-only queue shape, adapted here to a single always-on
//! remote service rather than a provider pool. The graph layer is optional:
//! every caller treats an `Err`/offline client as "no cross-entity
//! traversal", never as a hard failure.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::audit::AuditLog;
use crate::error::GraphError;

/// Configuration for the remote graph service (`memory.cognee.*`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CogneeConfig {
    pub url: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl Default for CogneeConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8000".into(),
            enabled: false,
            username: None,
            password: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Debug, Clone, Default)]
struct AuthState {
    token: Option<String>,
    expires_at: Option<DateTime<Utc>>,
}

/// A single result row from a graph query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphQueryResult {
    pub id: String,
    pub text: String,
    pub score: f32,
}

/// A node/edge projection over current knowledge entries, returned by
/// `MemorySystem::get_graph`. Lives here rather than in `memory` because the
/// core only ever holds identifiers and this cached projection — the graph
/// backend itself owns the real nodes and edges.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphProjection {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub label: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphEdge {
    pub source: String,
    pub target: String,
    pub weight: f32,
}

const OFFLINE_THRESHOLD: u32 = 6;
const TOKEN_REFRESH_SKEW: chrono::Duration = chrono::Duration::minutes(5);
const PROBE_INTERVAL: Duration = Duration::from_secs(60);

/// Client for the optional remote knowledge-graph service.
///
/// Tracks online/offline state itself; every public method is best-effort —
/// callers fall back to the structured store on `Err` or while offline.
pub struct GraphMemoryClient {
    http: reqwest::Client,
    config: CogneeConfig,
    auth: RwLock<AuthState>,
    online: AtomicBool,
    consecutive_failures: AtomicU32,
    settings_pushed: AtomicBool,
    restart_attempted: AtomicBool,
}

impl GraphMemoryClient {
    pub fn new(config: CogneeConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .unwrap_or_default();
        Self {
            http,
            config,
            auth: RwLock::new(AuthState::default()),
            online: AtomicBool::new(false),
            consecutive_failures: AtomicU32::new(0),
            settings_pushed: AtomicBool::new(false),
            restart_attempted: AtomicBool::new(false),
        }
    }

    fn base(&self) -> &str {
        self.config.url.trim_end_matches('/')
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::Relaxed)
    }

    pub fn status(&self) -> &'static str {
        if self.is_online() { "online" } else { "offline" }
    }

    /// Authenticate (if credentials are configured) and push the embedding
    /// settings on first connect. Called once at boot and again by the
    /// health probe when recovering from offline.
    pub async fn connect(&self) -> Result<(), GraphError> {
        self.authenticate().await?;
        if !self.settings_pushed.load(Ordering::Relaxed) {
            match self.push_settings().await {
                Ok(()) => self.settings_pushed.store(true, Ordering::Relaxed),
                Err(e) => {
                    warn!(error = %e, "graph settings push failed");
                    if !self.restart_attempted.swap(true, Ordering::Relaxed) {
                        self.restart_fallback().await;
                    }
                }
            }
        }
        self.online.store(true, Ordering::Relaxed);
        self.consecutive_failures.store(0, Ordering::Relaxed);
        Ok(())
    }

    async fn authenticate(&self) -> Result<(), GraphError> {
        let (username, password) = match (&self.config.username, &self.config.password) {
            (Some(u), Some(p)) => (u.clone(), p.clone()),
            _ => return Ok(()),
        };
        let resp = self
            .http
            .post(format!("{}/api/v1/auth/login", self.base()))
            .json(&serde_json::json!({ "username": username, "password": password }))
            .send()
            .await
            .map_err(|e| GraphError::AuthFailed {
                message: e.to_string(),
            })?;
        if !resp.status().is_success() {
            return Err(GraphError::AuthFailed {
                message: format!("status {}", resp.status()),
            });
        }
        let token: TokenResponse = resp.json().await.map_err(|e| GraphError::AuthFailed {
            message: e.to_string(),
        })?;
        let expires_at = Utc::now() + chrono::Duration::seconds(token.expires_in);
        let mut auth = self.auth.write().await;
        auth.token = Some(token.access_token);
        auth.expires_at = Some(expires_at);
        Ok(())
    }

    async fn ensure_fresh_token(&self) -> Result<(), GraphError> {
        let needs_refresh = {
            let auth = self.auth.read().await;
            match auth.expires_at {
                Some(exp) => Utc::now() + TOKEN_REFRESH_SKEW >= exp,
                None => auth.token.is_none() && self.config.username.is_some(),
            }
        };
        if needs_refresh {
            self.authenticate().await?;
        }
        Ok(())
    }

    async fn push_settings(&self) -> Result<(), GraphError> {
        let token = self.auth.read().await.token.clone();
        let mut req = self
            .http
            .post(format!("{}/api/v1/settings", self.base()))
            .json(&serde_json::json!({ "embedding_engine": "default" }));
        if let Some(t) = token {
            req = req.bearer_auth(t);
        }
        let resp = req.send().await.map_err(|e| GraphError::SettingsPushFailed {
            message: e.to_string(),
        })?;
        if !resp.status().is_success() {
            return Err(GraphError::SettingsPushFailed {
                message: format!("status {}", resp.status()),
            });
        }
        Ok(())
    }

    /// Exactly one container-restart fallback with environment injection, per boot.
    async fn restart_fallback(&self) {
        let url = format!("{}/api/v1/restart", self.base());
        let _ = self
            .http
            .post(&url)
            .json(&serde_json::json!({ "env": { "cognee_embedding_provider": "default" } }))
            .send()
            .await;
    }

    /// Ingest `text` tagged with `context`.
    pub async fn add(&self, text: &str, context: &str) -> Result<(), GraphError> {
        self.request_with_retry(|auth| {
            let mut req = self
                .http
                .post(format!("{}/api/v1/add", self.base()))
                .json(&serde_json::json!({ "text": text, "context": context }));
            if let Some(t) = auth {
                req = req.bearer_auth(t);
            }
            req
        })
        .await
        .map(|_| ())
    }

    /// Query the graph for entries relevant to `q`.
    pub async fn query(&self, q: &str) -> Result<Vec<GraphQueryResult>, GraphError> {
        let resp = self
            .request_with_retry(|auth| {
                let mut req = self
                    .http
                    .get(format!("{}/api/v1/search", self.base()))
                    .query(&[("query", q)]);
                if let Some(t) = auth {
                    req = req.bearer_auth(t);
                }
                req
            })
            .await?;
        resp.json::<Vec<GraphQueryResult>>()
            .await
            .map_err(|e| GraphError::RequestFailed {
                message: e.to_string(),
            })
    }

    /// Issue a request, refreshing the token first if near expiry, and retry
    /// exactly once on a 401 after re-authenticating.
    async fn request_with_retry(
        &self,
        build: impl Fn(Option<String>) -> reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, GraphError> {
        if !self.is_online() {
            return Err(GraphError::Offline);
        }
        self.ensure_fresh_token().await?;
        let token = self.auth.read().await.token.clone();
        let resp = build(token)
            .send()
            .await
            .map_err(|e| GraphError::RequestFailed {
                message: e.to_string(),
            })?;

        let resp = if resp.status() == reqwest::StatusCode::UNAUTHORIZED {
            self.authenticate().await?;
            let token = self.auth.read().await.token.clone();
            build(token)
                .send()
                .await
                .map_err(|e| GraphError::RequestFailed {
                    message: e.to_string(),
                })?
        } else {
            resp
        };

        if resp.status().is_success() {
            self.consecutive_failures.store(0, Ordering::Relaxed);
            Ok(resp)
        } else {
            self.record_failure();
            Err(GraphError::RequestFailed {
                message: format!("status {}", resp.status()),
            })
        }
    }

    fn record_failure(&self) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        if failures >= OFFLINE_THRESHOLD {
            self.online.store(false, Ordering::Relaxed);
        }
    }

    /// One health-probe cycle: ping the service, reconnecting if it was
    /// offline and flipping offline after `OFFLINE_THRESHOLD` consecutive
    /// failures. Returns the post-probe online state.
    pub async fn probe_once(&self) -> bool {
        let healthy = self
            .http
            .get(format!("{}/api/v1/health", self.base()))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false);

        if healthy {
            self.consecutive_failures.store(0, Ordering::Relaxed);
            if !self.is_online() {
                return self.connect().await.is_ok();
            }
            true
        } else {
            self.record_failure();
            self.is_online()
        }
    }
}

/// Spawn the background health probe: runs every 60s, and on an
/// online/offline transition logs `graph_offline`/`graph_online` to the
/// audit journal per the degradation-recovery contract.
pub fn spawn_health_probe(
    client: Arc<GraphMemoryClient>,
    audit: Arc<AuditLog>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(PROBE_INTERVAL);
        let mut was_online = client.is_online();
        loop {
            interval.tick().await;
            let is_online = client.probe_once().await;
            if was_online && !is_online {
                audit
                    .log(
                        "graph_memory",
                        "graph_offline",
                        "graph service unreachable after consecutive failures",
                        None,
                    )
                    .await;
                warn!("graph memory layer went offline");
            } else if !was_online && is_online {
                audit
                    .log(
                        "graph_memory",
                        "graph_online",
                        "graph service reconnected",
                        None,
                    )
                    .await;
                info!("graph memory layer back online");
            }
            was_online = is_online;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cognee_config_default_disabled() {
        let config = CogneeConfig::default();
        assert!(!config.enabled);
        assert_eq!(config.url, "http://localhost:8000");
    }

    #[test]
    fn test_new_client_starts_offline() {
        let client = GraphMemoryClient::new(CogneeConfig::default());
        assert!(!client.is_online());
        assert_eq!(client.status(), "offline");
    }

    #[tokio::test]
    async fn test_request_while_offline_returns_offline_error() {
        let client = GraphMemoryClient::new(CogneeConfig::default());
        let err = client.query("anything").await.unwrap_err();
        assert!(matches!(err, GraphError::Offline));
    }

    #[tokio::test]
    async fn test_record_failure_flips_offline_after_threshold() {
        let client = GraphMemoryClient::new(CogneeConfig {
            enabled: true,
            ..CogneeConfig::default()
        });
        client.online.store(true, Ordering::Relaxed);
        for _ in 0..OFFLINE_THRESHOLD {
            client.record_failure();
        }
        assert!(!client.is_online());
    }

    #[tokio::test]
    async fn test_probe_once_reconnect_requires_live_service() {
        // No real service at localhost:8000 in the test environment: probe
        // should fail closed (stay/land offline) rather than panic.
        let client = GraphMemoryClient::new(CogneeConfig::default());
        let online = client.probe_once().await;
        assert!(!online);
    }
}
