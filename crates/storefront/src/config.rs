//! Storefront configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `AZTEC_REMOTE_URL` - Base URL of the remote data/auth service
//! - `AZTEC_REMOTE_ANON_KEY` - Public API key sent with every remote request
//!
//! ## Optional
//! - `AZTEC_SESSION_TTL_HOURS` - Lifetime of a non-remembered session (default: 24)
//! - `AZTEC_REMEMBER_TTL_DAYS` - Lifetime of a remembered session (default: 30)
//! - `AZTEC_IDLE_TIMEOUT_SECS` - Hidden-tab idle threshold for non-remembered sessions (default: 900)
//! - `AZTEC_STARTUP_TIMEOUT_SECS` - Hard limit on the startup validation (default: 10)
//! - `AZTEC_CLEANUP_WAIT_MS` - How long sign-out waits for remote session cleanup (default: 500)
//! - `AZTEC_SYNC_MAX_ATTEMPTS` - Attempts per remote write before parking it (default: 3)
//! - `AZTEC_SYNC_BASE_DELAY_MS` - First retry delay, doubled per attempt (default: 200)
//! - `SENTRY_DSN` - Sentry error tracking DSN
//! - `SENTRY_ENVIRONMENT` - Sentry environment name

use std::time::Duration;

use chrono::TimeDelta;
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use url::Url;

/// Blocklist of common placeholder patterns (case-insensitive)
const PLACEHOLDER_PATTERNS: &[&str] = &[
    "your-",
    "changeme",
    "replace",
    "placeholder",
    "example",
    "xxx",
    "todo",
    "insert",
    "put-your",
];

const MIN_ANON_KEY_LENGTH: usize = 20;

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
    #[error("Insecure secret in {0}: {1}")]
    InsecureSecret(String, String),
}

/// Storefront core configuration.
#[derive(Debug, Clone)]
pub struct StorefrontConfig {
    /// Remote data/auth service connection
    pub remote: RemoteConfig,
    /// Session lifetime and idle policy
    pub session: SessionPolicy,
    /// Retry policy for remote ledger writes
    pub sync: RetryPolicy,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
    /// Sentry environment name
    pub sentry_environment: Option<String>,
}

/// Remote service connection settings.
///
/// Implements `Debug` manually to redact the API key.
#[derive(Clone)]
pub struct RemoteConfig {
    /// Base URL (e.g. `https://abc.supabase.co`)
    pub base_url: Url,
    /// Public API key
    pub anon_key: SecretString,
}

impl std::fmt::Debug for RemoteConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteConfig")
            .field("base_url", &self.base_url.as_str())
            .field("anon_key", &"[REDACTED]")
            .finish()
    }
}

/// Session lifetime and idle-logout policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionPolicy {
    /// Lifetime of a session issued without remember-me.
    pub standard_ttl: TimeDelta,
    /// Lifetime of a remembered session.
    pub remember_ttl: TimeDelta,
    /// How long a non-remembered session may stay hidden before it is ended.
    pub idle_threshold: TimeDelta,
    /// Hard limit on startup validation before loading is forced to finish.
    pub startup_timeout: Duration,
    /// How long teardown waits for the remote cleanup before returning. The
    /// cleanup keeps running in the background past this point.
    pub cleanup_wait: Duration,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            standard_ttl: TimeDelta::hours(24),
            remember_ttl: TimeDelta::days(30),
            idle_threshold: TimeDelta::minutes(15),
            startup_timeout: Duration::from_secs(10),
            cleanup_wait: Duration::from_millis(500),
        }
    }
}

impl SessionPolicy {
    /// Session lifetime for the given remember-me choice.
    #[must_use]
    pub const fn ttl(&self, remember: bool) -> TimeDelta {
        if remember {
            self.remember_ttl
        } else {
            self.standard_ttl
        }
    }
}

/// Retry policy for remote reconciliation writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per operation (at least 1).
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles each time.
    pub base_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// A policy that tries once and never sleeps.
    #[must_use]
    pub const fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Backoff before attempt number `attempt + 1` (1-based `attempt`),
    /// without jitter.
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

impl StorefrontConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing, invalid, or
    /// if the API key looks like a placeholder.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let remote = RemoteConfig::from_env()?;

        let session = SessionPolicy {
            standard_ttl: get_time_delta("AZTEC_SESSION_TTL_HOURS", 24, TimeDelta::try_hours)?,
            remember_ttl: get_time_delta("AZTEC_REMEMBER_TTL_DAYS", 30, TimeDelta::try_days)?,
            idle_threshold: get_time_delta("AZTEC_IDLE_TIMEOUT_SECS", 900, TimeDelta::try_seconds)?,
            startup_timeout: Duration::from_secs(get_number("AZTEC_STARTUP_TIMEOUT_SECS", 10)?),
            cleanup_wait: Duration::from_millis(get_number("AZTEC_CLEANUP_WAIT_MS", 500)?),
        };

        let max_attempts: u32 = get_number("AZTEC_SYNC_MAX_ATTEMPTS", 3)?;
        if max_attempts == 0 {
            return Err(ConfigError::InvalidEnvVar(
                "AZTEC_SYNC_MAX_ATTEMPTS".to_string(),
                "must be at least 1".to_string(),
            ));
        }
        let sync = RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(get_number("AZTEC_SYNC_BASE_DELAY_MS", 200)?),
            ..RetryPolicy::default()
        };

        Ok(Self {
            remote,
            session,
            sync,
            sentry_dsn: get_optional_env("SENTRY_DSN"),
            sentry_environment: get_optional_env("SENTRY_ENVIRONMENT"),
        })
    }

    /// Configuration for tests and local demos: default policies against the
    /// given remote base URL.
    #[must_use]
    pub fn with_remote(base_url: Url, anon_key: SecretString) -> Self {
        Self {
            remote: RemoteConfig { base_url, anon_key },
            session: SessionPolicy::default(),
            sync: RetryPolicy::default(),
            sentry_dsn: None,
            sentry_environment: None,
        }
    }
}

impl RemoteConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let raw_url = get_required_env("AZTEC_REMOTE_URL")?;
        let base_url = Url::parse(&raw_url).map_err(|e| {
            ConfigError::InvalidEnvVar("AZTEC_REMOTE_URL".to_string(), e.to_string())
        })?;
        let anon_key = SecretString::from(get_required_env("AZTEC_REMOTE_ANON_KEY")?);
        validate_anon_key(&anon_key, "AZTEC_REMOTE_ANON_KEY")?;
        Ok(Self { base_url, anon_key })
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Get a required environment variable.
fn get_required_env(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

/// Get an optional environment variable.
fn get_optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Parse an optional numeric environment variable, falling back to `default`.
fn get_number<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    get_optional_env(key).map_or(Ok(default), |raw| parse_number(key, &raw))
}

/// Parse an optional positive duration expressed in whole units of `unit`.
fn get_time_delta(
    key: &str,
    default: i64,
    unit: fn(i64) -> Option<TimeDelta>,
) -> Result<TimeDelta, ConfigError> {
    let value: i64 = get_number(key, default)?;
    to_time_delta(key, value, unit)
}

fn to_time_delta(
    key: &str,
    value: i64,
    unit: fn(i64) -> Option<TimeDelta>,
) -> Result<TimeDelta, ConfigError> {
    if value <= 0 {
        return Err(ConfigError::InvalidEnvVar(
            key.to_string(),
            format!("must be positive (got {value})"),
        ));
    }
    unit(value).ok_or_else(|| {
        ConfigError::InvalidEnvVar(key.to_string(), format!("{value} is out of range"))
    })
}

fn parse_number<T>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
}

/// Validate that an API key is not a placeholder and is long enough to be real.
fn validate_anon_key(key: &SecretString, var_name: &str) -> Result<(), ConfigError> {
    let value = key.expose_secret();
    let lower = value.to_lowercase();

    for pattern in PLACEHOLDER_PATTERNS {
        if lower.contains(pattern) {
            return Err(ConfigError::InsecureSecret(
                var_name.to_string(),
                format!("appears to be a placeholder (contains '{pattern}')"),
            ));
        }
    }

    if value.len() < MIN_ANON_KEY_LENGTH {
        return Err(ConfigError::InsecureSecret(
            var_name.to_string(),
            format!(
                "must be at least {MIN_ANON_KEY_LENGTH} characters (got {})",
                value.len()
            ),
        ));
    }

    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_session_policy() {
        let policy = SessionPolicy::default();
        assert_eq!(policy.ttl(true), TimeDelta::days(30));
        assert_eq!(policy.ttl(false), TimeDelta::hours(24));
        assert_eq!(policy.idle_threshold, TimeDelta::minutes(15));
        assert_eq!(policy.startup_timeout, Duration::from_secs(10));
        assert_eq!(policy.cleanup_wait, Duration::from_millis(500));
    }

    #[test]
    fn test_retry_delay_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 6,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(1),
        };
        assert_eq!(policy.delay_after(1), Duration::from_millis(200));
        assert_eq!(policy.delay_after(2), Duration::from_millis(400));
        assert_eq!(policy.delay_after(3), Duration::from_millis(800));
        assert_eq!(policy.delay_after(4), Duration::from_secs(1));
    }

    #[test]
    fn test_no_retry_never_sleeps() {
        let policy = RetryPolicy::no_retry();
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.delay_after(1), Duration::ZERO);
    }

    #[test]
    fn test_anon_key_placeholder_rejected() {
        let key = SecretString::from("your-anon-key-goes-here-please");
        let err = validate_anon_key(&key, "AZTEC_REMOTE_ANON_KEY").unwrap_err();
        assert!(matches!(err, ConfigError::InsecureSecret(_, _)));
    }

    #[test]
    fn test_anon_key_too_short_rejected() {
        let key = SecretString::from("abc123");
        assert!(validate_anon_key(&key, "AZTEC_REMOTE_ANON_KEY").is_err());
    }

    #[test]
    fn test_anon_key_valid() {
        let key = SecretString::from("eyJhbGciOiJIUzI1NiIsInR5cCI6IkpXVCJ9.k3yB0dy");
        assert!(validate_anon_key(&key, "AZTEC_REMOTE_ANON_KEY").is_ok());
    }

    #[test]
    fn test_parse_number_reports_key() {
        let err = parse_number::<u64>("AZTEC_IDLE_TIMEOUT_SECS", "soon").unwrap_err();
        assert!(err.to_string().contains("AZTEC_IDLE_TIMEOUT_SECS"));
        assert_eq!(parse_number::<u64>("AZTEC_IDLE_TIMEOUT_SECS", " 60 ").unwrap(), 60);
    }

    #[test]
    fn test_time_delta_rejects_out_of_range_and_non_positive() {
        let err = to_time_delta("AZTEC_SESSION_TTL_HOURS", i64::MAX, TimeDelta::try_hours)
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnvVar(ref key, _) if key == "AZTEC_SESSION_TTL_HOURS"));

        assert!(to_time_delta("AZTEC_IDLE_TIMEOUT_SECS", 0, TimeDelta::try_seconds).is_err());
        assert!(to_time_delta("AZTEC_REMEMBER_TTL_DAYS", -3, TimeDelta::try_days).is_err());
        assert_eq!(
            to_time_delta("AZTEC_REMEMBER_TTL_DAYS", 7, TimeDelta::try_days).unwrap(),
            TimeDelta::days(7)
        );
    }

    #[test]
    fn test_remote_config_debug_redacts_key() {
        let config = RemoteConfig {
            base_url: Url::parse("https://farm.example.co").unwrap(),
            anon_key: SecretString::from("super_secret_anon_key_value"),
        };
        let debug_output = format!("{config:?}");
        assert!(debug_output.contains("farm.example.co"));
        assert!(debug_output.contains("[REDACTED]"));
        assert!(!debug_output.contains("super_secret_anon_key_value"));
    }
}
