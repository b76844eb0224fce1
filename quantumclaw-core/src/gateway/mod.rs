//! # WebSocket Gateway
//!
//! Provides a WebSocket-based server for real-time communication between
//! external clients and the Rustant agent. Supports authentication,
//! connection management, session lifecycle, and a structured event protocol.

mod auth;
pub mod channel_bridge;
mod connection;
mod events;
mod server;
mod session;

pub use auth::GatewayAuth;
pub use channel_bridge::ChannelBridge;
pub use connection::ConnectionManager;
pub use events::{ClientMessage, GatewayEvent, ServerMessage};
pub use server::{
    router as gateway_router, run as run_gateway, GatewayServer, SharedGateway, StatusProvider,
};
pub use session::{GatewaySession, SessionManager, SessionState};

use serde::{Deserialize, Serialize};

/// How the dashboard's public URL is exposed to the outside world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TunnelMode {
    #[default]
    None,
    Auto,
    Cloudflare,
    Lt,
    Ngrok,
}

/// Configuration for the WebSocket gateway / dashboard control plane.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Whether the gateway is enabled.
    pub enabled: bool,
    /// Host to bind to.
    pub host: String,
    /// Preferred port to listen on; on `EADDRINUSE` the next 20 ports are tried.
    pub port: u16,
    /// Valid bearer authentication tokens.
    pub auth_tokens: Vec<String>,
    /// When the active `auth_tokens[0]` was issued.
    #[serde(default)]
    pub token_created_at: Option<chrono::DateTime<chrono::Utc>>,
    /// Token lifetime in seconds; `None` means it never expires.
    #[serde(default)]
    pub token_expiry_secs: Option<u64>,
    /// sha-256 hex digest of the configured PIN, if UI access is PIN-gated.
    /// The plaintext PIN is never persisted or logged.
    #[serde(default)]
    pub pin_hash: Option<String>,
    /// Tunnel helper to expose the dashboard publicly.
    #[serde(default)]
    pub tunnel: TunnelMode,
    /// Auth token for the tunnel provider, if it requires one.
    #[serde(default)]
    pub tunnel_token: Option<String>,
    /// Public URL extracted from the tunnel helper's output, once started.
    #[serde(default)]
    pub tunnel_url: Option<String>,
    /// Failed-attempt budget before an IP is locked out (default 10).
    #[serde(default)]
    pub lockout_threshold: Option<u32>,
    /// Window in seconds over which failed attempts accumulate (default 120).
    #[serde(default)]
    pub lockout_window_secs: Option<u64>,
    /// Lockout cooldown in seconds once tripped (default 120).
    #[serde(default)]
    pub lockout_cooldown_secs: Option<u64>,
    /// Requests-per-minute budget per IP on protected endpoints (default 30).
    #[serde(default)]
    pub rate_limit_per_minute: Option<u32>,
    /// Maximum concurrent WebSocket connections.
    pub max_connections: usize,
    /// Session timeout in seconds (0 = no timeout).
    pub session_timeout_secs: u64,
    /// Capacity of the internal broadcast channel backing `subscribe()`.
    #[serde(default = "default_broadcast_capacity")]
    pub broadcast_capacity: usize,
}

fn default_broadcast_capacity() -> usize {
    256
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "127.0.0.1".to_string(),
            port: 8080,
            auth_tokens: Vec::new(),
            token_created_at: None,
            token_expiry_secs: None,
            pin_hash: None,
            tunnel: TunnelMode::None,
            tunnel_token: None,
            tunnel_url: None,
            lockout_threshold: None,
            lockout_window_secs: None,
            lockout_cooldown_secs: None,
            rate_limit_per_minute: None,
            max_connections: 10,
            session_timeout_secs: 3600,
            broadcast_capacity: default_broadcast_capacity(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gateway_config_default() {
        let config = GatewayConfig::default();
        assert!(!config.enabled);
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 8080);
        assert!(config.auth_tokens.is_empty());
        assert_eq!(config.max_connections, 10);
        assert_eq!(config.session_timeout_secs, 3600);
    }

    #[test]
    fn test_gateway_config_serialization() {
        let config = GatewayConfig {
            enabled: true,
            host: "0.0.0.0".into(),
            port: 9090,
            auth_tokens: vec!["token1".into()],
            max_connections: 50,
            session_timeout_secs: 7200,
            ..GatewayConfig::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        let restored: GatewayConfig = serde_json::from_str(&json).unwrap();
        assert!(restored.enabled);
        assert_eq!(restored.port, 9090);
        assert_eq!(restored.auth_tokens.len(), 1);
    }
}
