//! Configuration types

use crate::{ConfigError, PerspectiveCatalog};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_MODEL: &str = "gemini-2.5-flash";
const DEFAULT_REQUESTS_PER_MINUTE: u32 = 60;
const DEFAULT_MAX_BATCH: usize = 8;
const DEFAULT_CALL_TIMEOUT_SECS: u64 = 30;
const DEFAULT_MAX_ATTEMPTS: u32 = 4;
const DEFAULT_INITIAL_BACKOFF_MS: u64 = 250;
const DEFAULT_MAX_BACKOFF_MS: u64 = 8_000;
const DEFAULT_BACKOFF_MULTIPLIER: f32 = 2.0;
const DEFAULT_JITTER_MS: u64 = 250;
const DEFAULT_FOLLOWER_WAIT_SECS: u64 = 300;
const DEFAULT_STORE_PATH: &str = "./data/libro-cache";
const DEFAULT_STORE_MAX_SIZE_MB: usize = 512;
const DEFAULT_HISTORY_MAX_PAGE: usize = 100;

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

/// Analysis provider configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub provider_type: String,
    pub endpoint: String,
    pub model: String,
    #[serde(skip_serializing, default)]
    pub api_key: Option<String>,
    pub requests_per_minute: u32,
    /// Most perspectives sent in one structured-output call.
    pub max_batch_perspectives: usize,
    /// Upper bound on a single provider call.
    pub call_timeout: Duration,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            provider_type: "gemini".to_string(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: DEFAULT_MODEL.to_string(),
            api_key: None,
            requests_per_minute: DEFAULT_REQUESTS_PER_MINUTE,
            max_batch_perspectives: DEFAULT_MAX_BATCH,
            call_timeout: Duration::from_secs(DEFAULT_CALL_TIMEOUT_SECS),
        }
    }
}

impl ProviderConfig {
    /// Create from environment variables with fallback to defaults.
    ///
    /// Environment variables:
    /// - `LIBRO_PROVIDER_ENDPOINT`: API base URL
    /// - `LIBRO_PROVIDER_MODEL`: Model name (default: gemini-2.5-flash)
    /// - `LIBRO_PROVIDER_API_KEY`: API key (no default)
    /// - `LIBRO_PROVIDER_RPM`: Requests per minute (default: 60)
    /// - `LIBRO_PROVIDER_MAX_BATCH`: Perspectives per call (default: 8)
    /// - `LIBRO_PROVIDER_CALL_TIMEOUT_SECS`: Per-call timeout (default: 30)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            provider_type: defaults.provider_type,
            endpoint: std::env::var("LIBRO_PROVIDER_ENDPOINT").unwrap_or(defaults.endpoint),
            model: std::env::var("LIBRO_PROVIDER_MODEL").unwrap_or(defaults.model),
            api_key: std::env::var("LIBRO_PROVIDER_API_KEY")
                .ok()
                .filter(|k| !k.trim().is_empty()),
            requests_per_minute: env_parse("LIBRO_PROVIDER_RPM")
                .unwrap_or(defaults.requests_per_minute),
            max_batch_perspectives: env_parse("LIBRO_PROVIDER_MAX_BATCH")
                .unwrap_or(defaults.max_batch_perspectives),
            call_timeout: env_parse("LIBRO_PROVIDER_CALL_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.call_timeout),
        }
    }
}

/// Retry configuration for provider calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts including the first.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_multiplier: f32,
    /// Upper bound of the random delay added to every backoff.
    pub jitter: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_backoff: Duration::from_millis(DEFAULT_INITIAL_BACKOFF_MS),
            max_backoff: Duration::from_millis(DEFAULT_MAX_BACKOFF_MS),
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            jitter: Duration::from_millis(DEFAULT_JITTER_MS),
        }
    }
}

impl RetryConfig {
    /// Create from environment variables with fallback to defaults.
    ///
    /// Environment variables:
    /// - `LIBRO_RETRY_MAX_ATTEMPTS` (default: 4)
    /// - `LIBRO_RETRY_INITIAL_BACKOFF_MS` (default: 250)
    /// - `LIBRO_RETRY_MAX_BACKOFF_MS` (default: 8000)
    /// - `LIBRO_RETRY_MULTIPLIER` (default: 2.0)
    /// - `LIBRO_RETRY_JITTER_MS` (default: 250)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_attempts: env_parse("LIBRO_RETRY_MAX_ATTEMPTS").unwrap_or(defaults.max_attempts),
            initial_backoff: env_parse("LIBRO_RETRY_INITIAL_BACKOFF_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.initial_backoff),
            max_backoff: env_parse("LIBRO_RETRY_MAX_BACKOFF_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.max_backoff),
            backoff_multiplier: env_parse("LIBRO_RETRY_MULTIPLIER")
                .unwrap_or(defaults.backoff_multiplier),
            jitter: env_parse("LIBRO_RETRY_JITTER_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.jitter),
        }
    }

    /// Deterministic part of the delay before retry number `retry` (1-based).
    pub fn base_delay(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(32) as i32;
        let factor = f64::from(self.backoff_multiplier).powi(exponent);
        let millis = (self.initial_backoff.as_millis() as f64 * factor)
            .min(self.max_backoff.as_millis() as f64);
        Duration::from_millis(millis.max(0.0) as u64)
    }

    /// Longest single backoff: `max_backoff` (the cap on a honored
    /// `Retry-After` as well) plus full jitter.
    pub fn max_delay(&self) -> Duration {
        self.max_backoff.saturating_add(self.jitter)
    }

    /// Longest time one call chain can take: every attempt hitting
    /// `call_timeout` plus every backoff at [`Self::max_delay`]. `None` on
    /// overflow.
    pub fn checked_worst_case(&self, call_timeout: Duration) -> Option<Duration> {
        let attempts = self.max_attempts.max(1);
        let calls = call_timeout.checked_mul(attempts)?;
        let backoffs = self.max_delay().checked_mul(attempts - 1)?;
        calls.checked_add(backoffs)
    }

    /// [`Self::checked_worst_case`], saturating at `Duration::MAX`.
    pub fn worst_case(&self, call_timeout: Duration) -> Duration {
        self.checked_worst_case(call_timeout).unwrap_or(Duration::MAX)
    }
}

/// Single-flight coordinator configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// How long any caller waits for an in-flight generation.
    pub follower_wait: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            follower_wait: Duration::from_secs(DEFAULT_FOLLOWER_WAIT_SECS),
        }
    }
}

/// Result store configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    pub path: PathBuf,
    pub max_size_mb: usize,
    /// Upper bound on `limit` for history pages.
    pub history_max_page: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_STORE_PATH),
            max_size_mb: DEFAULT_STORE_MAX_SIZE_MB,
            history_max_page: DEFAULT_HISTORY_MAX_PAGE,
        }
    }
}

/// Master configuration struct.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct EngineConfig {
    pub provider: ProviderConfig,
    pub retry: RetryConfig,
    pub coordinator: CoordinatorConfig,
    pub store: StoreConfig,
    /// JSON perspective catalog; the built-in catalog when unset.
    pub perspectives_file: Option<PathBuf>,
}

impl EngineConfig {
    /// Create from `LIBRO_*` environment variables with fallback to defaults.
    ///
    /// Besides the provider and retry variables:
    /// - `LIBRO_FOLLOWER_WAIT_SECS` (default: 300)
    /// - `LIBRO_STORE_PATH` (default: ./data/libro-cache)
    /// - `LIBRO_STORE_MAX_SIZE_MB` (default: 512)
    /// - `LIBRO_HISTORY_MAX_PAGE` (default: 100)
    /// - `LIBRO_PERSPECTIVES_FILE` (default: built-in catalog)
    pub fn from_env() -> Self {
        let coordinator = CoordinatorConfig {
            follower_wait: env_parse("LIBRO_FOLLOWER_WAIT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(CoordinatorConfig::default().follower_wait),
        };
        let store_defaults = StoreConfig::default();
        let store = StoreConfig {
            path: std::env::var("LIBRO_STORE_PATH")
                .map(PathBuf::from)
                .unwrap_or(store_defaults.path),
            max_size_mb: env_parse("LIBRO_STORE_MAX_SIZE_MB").unwrap_or(store_defaults.max_size_mb),
            history_max_page: env_parse("LIBRO_HISTORY_MAX_PAGE")
                .unwrap_or(store_defaults.history_max_page),
        };

        Self {
            provider: ProviderConfig::from_env(),
            retry: RetryConfig::from_env(),
            coordinator,
            store,
            perspectives_file: std::env::var("LIBRO_PERSPECTIVES_FILE")
                .ok()
                .filter(|p| !p.trim().is_empty())
                .map(PathBuf::from),
        }
    }

    /// Longest a single generation may take, covering a batch attempt that
    /// falls back to per-perspective calls.
    pub fn worst_case_generation(&self) -> Duration {
        self.checked_worst_case_generation().unwrap_or(Duration::MAX)
    }

    /// [`Self::worst_case_generation`], `None` on overflow.
    pub fn checked_worst_case_generation(&self) -> Option<Duration> {
        self.retry
            .checked_worst_case(self.provider.call_timeout)?
            .checked_mul(2)
    }

    /// Load the configured perspective catalog.
    pub fn load_catalog(&self) -> Result<PerspectiveCatalog, ConfigError> {
        match &self.perspectives_file {
            Some(path) => PerspectiveCatalog::load(path),
            None => Ok(PerspectiveCatalog::builtin()),
        }
    }

    /// Validate the configuration.
    ///
    /// Validates:
    /// - requests_per_minute, max_batch_perspectives, max_attempts > 0
    /// - call_timeout, initial_backoff and follower_wait are positive
    /// - max_backoff >= initial_backoff, backoff_multiplier > 1.0
    /// - follower_wait exceeds the worst-case generation time
    /// - store size and history page bound are positive
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.provider.requests_per_minute == 0 {
            return Err(invalid("provider.requests_per_minute", "0", "must be greater than 0"));
        }

        if self.provider.max_batch_perspectives == 0 {
            return Err(invalid("provider.max_batch_perspectives", "0", "must be greater than 0"));
        }

        if self.provider.call_timeout.is_zero() {
            return Err(invalid(
                "provider.call_timeout",
                &format!("{:?}", self.provider.call_timeout),
                "must be positive",
            ));
        }

        if self.retry.max_attempts == 0 {
            return Err(invalid("retry.max_attempts", "0", "must be at least 1"));
        }

        if self.retry.initial_backoff.is_zero() {
            return Err(invalid(
                "retry.initial_backoff",
                &format!("{:?}", self.retry.initial_backoff),
                "must be positive",
            ));
        }

        if self.retry.max_backoff < self.retry.initial_backoff {
            return Err(invalid(
                "retry.max_backoff",
                &format!("{:?}", self.retry.max_backoff),
                "must not be shorter than initial_backoff",
            ));
        }

        if self.retry.backoff_multiplier.is_nan() || self.retry.backoff_multiplier <= 1.0 {
            return Err(invalid(
                "retry.backoff_multiplier",
                &self.retry.backoff_multiplier.to_string(),
                "must be greater than 1.0",
            ));
        }

        let worst_case = self.checked_worst_case_generation().ok_or_else(|| {
            invalid(
                "provider.call_timeout",
                &format!("{:?}", self.provider.call_timeout),
                "worst-case generation time overflows",
            )
        })?;
        if self.coordinator.follower_wait <= worst_case {
            return Err(invalid(
                "coordinator.follower_wait",
                &format!("{:?}", self.coordinator.follower_wait),
                &format!("must exceed worst-case generation time {:?}", worst_case),
            ));
        }

        if self.store.max_size_mb == 0 {
            return Err(invalid("store.max_size_mb", "0", "must be greater than 0"));
        }

        if self.store.history_max_page == 0 {
            return Err(invalid("store.history_max_page", "0", "must be greater than 0"));
        }

        Ok(())
    }
}

fn invalid(field: &str, value: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_base_delay_grows_and_caps() {
        let retry = RetryConfig {
            max_attempts: 6,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(500),
            backoff_multiplier: 2.0,
            jitter: Duration::ZERO,
        };
        assert_eq!(retry.base_delay(1), Duration::from_millis(100));
        assert_eq!(retry.base_delay(2), Duration::from_millis(200));
        assert_eq!(retry.base_delay(3), Duration::from_millis(400));
        assert_eq!(retry.base_delay(4), Duration::from_millis(500));
        assert_eq!(retry.base_delay(40), Duration::from_millis(500));
    }

    #[test]
    fn test_worst_case() {
        let retry = RetryConfig {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            jitter: Duration::from_millis(10),
        };
        // 3 x 1s calls + 2 x (1s max backoff + 10ms jitter)
        assert_eq!(
            retry.worst_case(Duration::from_secs(1)),
            Duration::from_millis(5_020)
        );
        assert_eq!(retry.max_delay(), Duration::from_millis(1_010));
    }

    #[test]
    fn test_rejects_overflowing_call_timeout() {
        let mut config = EngineConfig::default();
        config.provider.call_timeout = Duration::from_secs(u64::MAX);
        assert_eq!(config.checked_worst_case_generation(), None);
        assert_eq!(config.worst_case_generation(), Duration::MAX);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { field, .. }) if field == "provider.call_timeout"
        ));
    }

    #[test]
    fn test_huge_jitter_fails_validation_without_panicking() {
        let mut config = EngineConfig::default();
        config.retry.jitter = Duration::from_millis(u64::MAX);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_short_follower_wait() {
        let mut config = EngineConfig::default();
        config.coordinator.follower_wait = config.worst_case_generation();
        match config.validate() {
            Err(ConfigError::InvalidValue { field, .. }) => {
                assert_eq!(field, "coordinator.follower_wait")
            }
            other => panic!("expected follower_wait error, got {:?}", other),
        }
    }

    #[test]
    fn test_rejects_zero_attempts() {
        let mut config = EngineConfig::default();
        config.retry.max_attempts = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { field, .. }) if field == "retry.max_attempts"
        ));
    }

    #[test]
    fn test_rejects_shrinking_multiplier() {
        let mut config = EngineConfig::default();
        config.retry.backoff_multiplier = 0.5;
        assert!(config.validate().is_err());
        config.retry.backoff_multiplier = 1.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { field, reason, .. })
                if field == "retry.backoff_multiplier" && reason == "must be greater than 1.0"
        ));
        config.retry.backoff_multiplier = f32::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_api_key_is_never_serialized() {
        let mut config = ProviderConfig::default();
        config.api_key = Some("secret".to_string());
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("secret"));
    }

    #[test]
    fn test_builtin_catalog_when_no_file() {
        let config = EngineConfig::default();
        assert_eq!(config.load_catalog().unwrap().len(), 13);
    }
}
