//! Gateway authentication: bearer tokens, PIN verification, per-IP lockout,
//! and per-IP rate limiting.

use std::net::IpAddr;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use sha2::{Digest, Sha256};

use super::GatewayConfig;

/// Default failed-attempt budget before an IP is locked out.
const DEFAULT_LOCKOUT_THRESHOLD: u32 = 10;
/// Default window over which failed attempts accumulate.
const DEFAULT_LOCKOUT_WINDOW: Duration = Duration::from_secs(120);
/// Default cooldown once an IP is locked out.
const DEFAULT_LOCKOUT_COOLDOWN: Duration = Duration::from_secs(120);
/// Default requests-per-minute budget on protected endpoints.
const DEFAULT_RATE_LIMIT_PER_MIN: u32 = 30;

/// Failed-attempt bookkeeping for a single client IP.
struct LockoutState {
    failures: u32,
    window_start: Instant,
    locked_until: Option<Instant>,
}

/// Sliding-window request counter for a single client IP.
struct RateWindow {
    count: u32,
    window_start: Instant,
}

/// Outcome of a lockout check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockoutStatus {
    Clear,
    Locked { retry_after_secs: u64 },
}

/// Token + PIN + lockout + rate-limit authentication for the dashboard gateway.
pub struct GatewayAuth {
    valid_tokens: Vec<String>,
    pin_hash: Option<String>,
    lockout_threshold: u32,
    lockout_window: Duration,
    lockout_cooldown: Duration,
    rate_limit_per_min: u32,
    lockouts: DashMap<IpAddr, LockoutState>,
    rate_windows: DashMap<IpAddr, RateWindow>,
}

impl std::fmt::Debug for GatewayAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayAuth")
            .field("token_count", &self.valid_tokens.len())
            .field("pin_configured", &self.pin_hash.is_some())
            .finish()
    }
}

/// Hash a PIN (or token) with sha-256, hex-encoded. Used both to persist the
/// configured PIN and to compare an attempt against it without storing or
/// logging plaintext.
pub fn hash_pin(pin: &str) -> String {
    let digest = Sha256::digest(pin.as_bytes());
    let mut out = String::with_capacity(digest.len() * 2);
    for b in digest {
        use std::fmt::Write;
        write!(out, "{b:02x}").ok();
    }
    out
}

impl GatewayAuth {
    /// Create a new auth validator from the gateway config.
    pub fn from_config(config: &GatewayConfig) -> Self {
        Self {
            valid_tokens: config.auth_tokens.clone(),
            pin_hash: config.pin_hash.clone(),
            lockout_threshold: config.lockout_threshold.unwrap_or(DEFAULT_LOCKOUT_THRESHOLD),
            lockout_window: Duration::from_secs(
                config.lockout_window_secs.unwrap_or(DEFAULT_LOCKOUT_WINDOW.as_secs()),
            ),
            lockout_cooldown: Duration::from_secs(
                config
                    .lockout_cooldown_secs
                    .unwrap_or(DEFAULT_LOCKOUT_COOLDOWN.as_secs()),
            ),
            rate_limit_per_min: config
                .rate_limit_per_minute
                .unwrap_or(DEFAULT_RATE_LIMIT_PER_MIN),
            lockouts: DashMap::new(),
            rate_windows: DashMap::new(),
        }
    }

    /// Create a new auth validator with the given tokens (test/legacy helper).
    pub fn new(tokens: Vec<String>) -> Self {
        Self {
            valid_tokens: tokens,
            pin_hash: None,
            lockout_threshold: DEFAULT_LOCKOUT_THRESHOLD,
            lockout_window: DEFAULT_LOCKOUT_WINDOW,
            lockout_cooldown: DEFAULT_LOCKOUT_COOLDOWN,
            rate_limit_per_min: DEFAULT_RATE_LIMIT_PER_MIN,
            lockouts: DashMap::new(),
            rate_windows: DashMap::new(),
        }
    }

    /// Validate a token. Returns `true` if the token is valid.
    ///
    /// If no tokens are configured, all tokens are accepted (open mode).
    pub fn validate(&self, token: &str) -> bool {
        if self.valid_tokens.is_empty() {
            return true; // open mode: no auth required
        }
        self.valid_tokens.iter().any(|t| t == token)
    }

    /// Number of configured tokens.
    pub fn token_count(&self) -> usize {
        self.valid_tokens.len()
    }

    /// Whether the gateway is in open mode (no auth required).
    pub fn is_open_mode(&self) -> bool {
        self.valid_tokens.is_empty()
    }

    /// Whether a PIN gate is configured for UI access.
    pub fn pin_required(&self) -> bool {
        self.pin_hash.is_some()
    }

    /// Verify a PIN attempt against the configured hash. Returns `false`
    /// (never an error) when no PIN is configured — callers should consult
    /// `pin_required()` first if they need to distinguish that case.
    pub fn verify_pin(&self, attempt: &str) -> bool {
        match &self.pin_hash {
            Some(hash) => &hash_pin(attempt) == hash,
            None => false,
        }
    }

    /// Check whether `ip` is currently locked out. Expired lockouts are
    /// cleared as a side effect.
    pub fn check_lockout(&self, ip: IpAddr) -> LockoutStatus {
        let now = Instant::now();
        if let Some(entry) = self.lockouts.get(&ip) {
            if let Some(until) = entry.locked_until {
                if now < until {
                    return LockoutStatus::Locked {
                        retry_after_secs: (until - now).as_secs().max(1),
                    };
                }
            }
        }
        LockoutStatus::Clear
    }

    /// Record a failed auth attempt from `ip`. Once `lockout_threshold`
    /// failures accumulate within `lockout_window`, the IP is locked out
    /// for `lockout_cooldown`.
    pub fn record_failure(&self, ip: IpAddr) -> LockoutStatus {
        let now = Instant::now();
        let mut entry = self.lockouts.entry(ip).or_insert_with(|| LockoutState {
            failures: 0,
            window_start: now,
            locked_until: None,
        });

        if now.duration_since(entry.window_start) > self.lockout_window {
            entry.failures = 0;
            entry.window_start = now;
            entry.locked_until = None;
        }

        entry.failures += 1;
        if entry.failures >= self.lockout_threshold {
            let until = now + self.lockout_cooldown;
            entry.locked_until = Some(until);
            return LockoutStatus::Locked {
                retry_after_secs: self.lockout_cooldown.as_secs().max(1),
            };
        }
        LockoutStatus::Clear
    }

    /// Clear the failure counter for `ip` after a successful auth.
    pub fn record_success(&self, ip: IpAddr) {
        self.lockouts.remove(&ip);
    }

    /// Check and increment the per-minute request counter for `ip`. Returns
    /// `true` if the request is within budget, `false` if it should be
    /// rejected with 429.
    pub fn check_rate_limit(&self, ip: IpAddr) -> bool {
        let now = Instant::now();
        let mut entry = self.rate_windows.entry(ip).or_insert_with(|| RateWindow {
            count: 0,
            window_start: now,
        });

        if now.duration_since(entry.window_start) > Duration::from_secs(60) {
            entry.count = 0;
            entry.window_start = now;
        }

        entry.count += 1;
        entry.count <= self.rate_limit_per_min
    }
}
