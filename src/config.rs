//! Server configuration.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::ArenaError;
use crate::game::PromptSchema;

/// Per-side default LLM settings, used when a start request omits a custom
/// endpoint or credential for that side.
#[derive(Debug, Clone, Default)]
pub struct SideDefaults {
    /// Chat-completions endpoint URL.
    pub api_url: Option<String>,
    /// Bearer credential.
    pub api_key: Option<String>,
    /// Model identifier.
    pub model: Option<String>,
}

impl SideDefaults {
    /// True when both endpoint and credential are configured.
    #[must_use]
    pub fn is_usable(&self) -> bool {
        self.api_url.is_some() && self.api_key.is_some()
    }
}

/// Configuration for the arena server.
#[derive(Debug, Clone)]
pub struct ArenaConfig {
    /// Address the HTTP server listens on.
    pub listen_addr: String,
    /// Defaults for White when the client supplies none.
    pub white_defaults: SideDefaults,
    /// Defaults for Black when the client supplies none.
    pub black_defaults: SideDefaults,
    /// Retry budget per turn before a forfeit. Default: 3.
    pub max_retries: u32,
    /// Password that waives the shared-credential cooldown.
    pub bypass_password: Option<String>,
    /// Path of the append-only LLM exchange log.
    pub exchange_log_path: PathBuf,
    /// Prompt schema used for every game. Default: JSON.
    pub prompt_schema: PromptSchema,
    /// Minimum spacing between outbound chat requests. Default: 3s.
    pub rate_limit_interval: Duration,
    /// Shared-credential cooldown window per token. Default: 20 minutes.
    pub cooldown_window: Duration,
    /// How often the idle reaper sweeps. Default: 5 minutes.
    pub reap_interval: Duration,
    /// How long finished games linger before removal. Default: 1 hour.
    pub finished_ttl: Duration,
    /// TTL of the model-list cache. Default: 5 minutes.
    pub model_cache_ttl: Duration,
    /// Event channel capacity per subscriber. Default: 256.
    pub subscriber_capacity: usize,
}

impl ArenaConfig {
    /// Validate configuration values before the server starts.
    pub fn validate(&self) -> Result<(), ArenaError> {
        if self.listen_addr.is_empty() {
            return Err(ArenaError::InvalidConfig {
                reason: "listen_addr must not be empty".to_string(),
            });
        }
        if self.max_retries == 0 {
            return Err(ArenaError::InvalidConfig {
                reason: "max_retries must be >= 1".to_string(),
            });
        }
        if self.subscriber_capacity == 0 {
            return Err(ArenaError::InvalidConfig {
                reason: "subscriber_capacity must be >= 1".to_string(),
            });
        }
        if self.rate_limit_interval.is_zero() {
            return Err(ArenaError::InvalidConfig {
                reason: "rate_limit_interval must be > 0".to_string(),
            });
        }
        if self.cooldown_window.is_zero() {
            return Err(ArenaError::InvalidConfig {
                reason: "cooldown_window must be > 0".to_string(),
            });
        }
        if self.reap_interval.is_zero() {
            return Err(ArenaError::InvalidConfig {
                reason: "reap_interval must be > 0".to_string(),
            });
        }
        if self.finished_ttl.is_zero() {
            return Err(ArenaError::InvalidConfig {
                reason: "finished_ttl must be > 0".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:3000".to_string(),
            white_defaults: SideDefaults::default(),
            black_defaults: SideDefaults::default(),
            max_retries: 3,
            bypass_password: None,
            exchange_log_path: PathBuf::from("llm_exchanges.jsonl"),
            prompt_schema: PromptSchema::Json,
            rate_limit_interval: Duration::from_millis(3000),
            cooldown_window: Duration::from_secs(20 * 60),
            reap_interval: Duration::from_secs(5 * 60),
            finished_ttl: Duration::from_secs(60 * 60),
            model_cache_ttl: Duration::from_secs(5 * 60),
            subscriber_capacity: 256,
        }
    }
}
