//! Embed configuration
//!
//! Configuration is loaded from environment variables; every variable is optional.

use std::env;
use std::time::Duration;

/// Main configuration
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Backend broker configuration
    pub auth: AuthConfig,

    /// Host-frame handshake configuration
    pub bridge: BridgeConfig,

    /// Auth token cookie configuration
    pub token: TokenConfig,
}

/// Backend OAuth broker configuration
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Broker base URL, without the `/api/oauth` suffix
    pub backend_base_url: String,
    /// Bound on every status/refresh request
    pub request_timeout: Duration,
    /// Backoff for transient failures
    pub retry: RetryConfig,
}

/// Retry behaviour for transient backend failures
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts per request, including the first one
    pub max_attempts: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Upper bound on any single delay
    pub max_delay: Duration,
}

/// Host-frame handshake configuration
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// How long the shell waits for the first context before giving up
    pub handshake_timeout: Duration,
    /// Capacity of the raw message tap
    pub raw_tap_capacity: usize,
}

/// Auth token cookie configuration
#[derive(Debug, Clone)]
pub struct TokenConfig {
    pub cookie_name: String,
    pub ttl: Duration,
    pub path: String,
    pub secure: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            backend_base_url: "https://signiflow-procore-backend-net.onrender.com".to_string(),
            request_timeout: Duration::from_secs(5),
            retry: RetryConfig::default(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl RetryConfig {
    /// No retries at all
    pub fn disabled() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (0-indexed): doubles each time, capped
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.initial_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(10),
            raw_tap_capacity: 64,
        }
    }
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            cookie_name: "SigniflowProcoreAdminToken".to_string(),
            ttl: Duration::from_secs(60 * 60), // 1 hour
            path: "/".to_string(),
            secure: true,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        // Auth config
        if let Ok(url) = env::var("BACKEND_BASE_URL")
            && !url.is_empty()
        {
            config.auth.backend_base_url = url.trim_end_matches('/').to_string();
        }
        if let Ok(val) = env::var("AUTH_REQUEST_TIMEOUT_SECS")
            && let Ok(secs) = val.parse::<u64>()
        {
            config.auth.request_timeout = Duration::from_secs(secs);
        }
        if let Ok(val) = env::var("AUTH_RETRY_MAX_ATTEMPTS")
            && let Ok(attempts) = val.parse::<u32>()
        {
            config.auth.retry.max_attempts = attempts.max(1);
        }
        if let Ok(val) = env::var("AUTH_RETRY_INITIAL_DELAY_MS")
            && let Ok(ms) = val.parse::<u64>()
        {
            config.auth.retry.initial_delay = Duration::from_millis(ms);
        }
        if let Ok(val) = env::var("AUTH_RETRY_MAX_DELAY_MS")
            && let Ok(ms) = val.parse::<u64>()
        {
            config.auth.retry.max_delay = Duration::from_millis(ms);
        }

        // Bridge config
        if let Ok(val) = env::var("HANDSHAKE_TIMEOUT_SECS")
            && let Ok(secs) = val.parse::<u64>()
        {
            config.bridge.handshake_timeout = Duration::from_secs(secs);
        }

        // Token config
        if let Ok(name) = env::var("AUTH_TOKEN_COOKIE_NAME")
            && !name.is_empty()
        {
            config.token.cookie_name = name;
        }
        if let Ok(val) = env::var("AUTH_TOKEN_TTL_SECS")
            && let Ok(secs) = val.parse::<u64>()
        {
            config.token.ttl = Duration::from_secs(secs);
        }
        if let Ok(val) = env::var("AUTH_TOKEN_SECURE") {
            config.token.secure = !(val.to_lowercase() == "false" || val == "0");
        }

        config
    }
}
