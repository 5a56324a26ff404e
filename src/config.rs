//! Process-wide gateway configuration, loaded once at startup and immutable
//! thereafter.

use std::time::Duration;

use crate::error::{CompletionError, Result};

/// Default OpenRouter API base.
pub const OPENROUTER_API_BASE: &str = "https://openrouter.ai/api/v1";

/// Environment variable supplying the gateway API key.
pub const API_KEY_ENV_VAR: &str = "OPENROUTER_API_KEY";

/// Bounded-retry policy for transient gateway failures.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Base duration for exponential backoff.
    pub initial_delay: Duration,
    /// Cap on any single backoff sleep.
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
        }
    }
}

/// Connection settings for the chat-completions gateway.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub api_key: String,
    pub base_url: String,
    /// Target model identifier, forwarded verbatim in each request.
    pub model: String,
    /// Deadline for a non-streaming call, including the response body;
    /// expiry is treated as a transient failure. Streaming calls use it
    /// only to bound the connect phase: an established stream has no
    /// total deadline.
    pub timeout: Duration,
    pub retry: RetryConfig,
}

impl GatewayConfig {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: OPENROUTER_API_BASE.to_string(),
            model: model.into(),
            timeout: Duration::from_secs(60),
            retry: RetryConfig::default(),
        }
    }

    /// Read the API key from the environment (a `.env` file is honored if
    /// present) and fail fast when it is missing, so a misconfigured process
    /// dies at startup instead of deep inside a request.
    pub fn from_env(model: impl Into<String>) -> Result<Self> {
        let _ = dotenvy::dotenv();

        let api_key = std::env::var(API_KEY_ENV_VAR).map_err(|_| {
            CompletionError::Configuration(format!("{API_KEY_ENV_VAR} is not set"))
        })?;
        if api_key.trim().is_empty() {
            return Err(CompletionError::Configuration(format!(
                "{API_KEY_ENV_VAR} is set but empty"
            )));
        }

        tracing::info!("gateway API key loaded from {API_KEY_ENV_VAR}");
        Ok(Self::new(api_key, model))
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}
