//! Configuration file parser.
//!
//! The file is TOML by default. A `.json` extension switches to JSON so the
//! legacy `config.json` layout (`pollMinutes`, `emailer.auth.password`, ...)
//! loads unchanged. Unknown top-level keys are accepted but logged.
use secrecy::SecretString;
use serde::{Deserialize, Deserializer};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::util::validate_url;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid JSON in config file: {0}")]
    Json(#[from] serde_json::Error),

    /// SEC-014: Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),

    /// The file parsed but describes a setup that cannot run.
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// A feed to poll.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct SourceConfig {
    pub url: String,
}

/// A mailbox that receives every match.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq, Hash)]
pub struct SubscriberConfig {
    pub email: String,
}

/// SMTP credentials.
///
/// SEC-015: Custom Debug impl masks `password`.
#[derive(Clone, Deserialize)]
pub struct AuthConfig {
    pub user: String,
    #[serde(deserialize_with = "deserialize_secret")]
    pub password: SecretString,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Outbound SMTP relay settings.
#[derive(Debug, Clone, Deserialize)]
pub struct EmailerConfig {
    pub host: String,

    #[serde(default = "default_smtp_port")]
    pub port: u16,

    /// Implicit TLS (SMTPS) when true; opportunistic STARTTLS otherwise.
    #[serde(default)]
    pub secure: bool,

    /// Omitted for relays that accept unauthenticated submission.
    #[serde(default)]
    pub auth: Option<AuthConfig>,

    /// Envelope and header `From` address.
    pub from: String,
}

/// What a cycle does when one of its feeds fails to fetch or parse.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Drop the failing feed and notify for the rest.
    #[default]
    Isolate,
    /// Skip notification for the whole cycle if any feed failed.
    AbortCycle,
}

/// Top-level application configuration.
///
/// Loaded once at startup and shared read-only by every cycle.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Prefix for every notification subject.
    pub title: String,

    /// Minutes between the start of one idle period and the next cycle.
    #[serde(alias = "pollMinutes")]
    pub poll_minutes: u64,

    pub sources: Vec<SourceConfig>,

    /// Case-insensitive patterns matched against entry descriptions.
    pub keywords: Vec<String>,

    pub subscribers: Vec<SubscriberConfig>,

    pub emailer: EmailerConfig,

    /// Upper bound on feeds fetched at the same time.
    #[serde(default = "default_max_concurrent_fetches", alias = "maxConcurrentFetches")]
    pub max_concurrent_fetches: usize,

    /// Upper bound on mails in flight at the same time.
    #[serde(
        default = "default_max_concurrent_deliveries",
        alias = "maxConcurrentDeliveries"
    )]
    pub max_concurrent_deliveries: usize,

    /// Per-request HTTP timeout for feed fetches.
    #[serde(default = "default_fetch_timeout_secs", alias = "fetchTimeoutSecs")]
    pub fetch_timeout_secs: u64,

    #[serde(default, alias = "failurePolicy")]
    pub failure_policy: FailurePolicy,
}

fn default_smtp_port() -> u16 {
    587
}

fn default_max_concurrent_fetches() -> usize {
    10
}

fn default_max_concurrent_deliveries() -> usize {
    8
}

fn default_fetch_timeout_secs() -> u64 {
    30
}

fn deserialize_secret<'de, D>(deserializer: D) -> Result<SecretString, D::Error>
where
    D: Deserializer<'de>,
{
    String::deserialize(deserializer).map(SecretString::from)
}

const KNOWN_KEYS: &[&str] = &[
    "title",
    "poll_minutes",
    "pollMinutes",
    "sources",
    "keywords",
    "subscribers",
    "emailer",
    "max_concurrent_fetches",
    "maxConcurrentFetches",
    "max_concurrent_deliveries",
    "maxConcurrentDeliveries",
    "fetch_timeout_secs",
    "fetchTimeoutSecs",
    "failure_policy",
    "failurePolicy",
];

impl Config {
    /// SEC-014: Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Load and validate configuration from a TOML or JSON file.
    ///
    /// - Missing file → `Err(ConfigError::Io)`
    /// - Invalid syntax → `Err(ConfigError::Parse)` / `Err(ConfigError::Json)`
    /// - Unknown keys → accepted, logged as warning
    /// - Semantically unusable settings → `Err(ConfigError::Invalid)`
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // SEC-014: Check file size before reading to prevent memory exhaustion
        let meta = std::fs::metadata(path)?;
        if meta.len() > Self::MAX_FILE_SIZE {
            return Err(ConfigError::TooLarge(format!(
                "Config file is {} bytes (max {} bytes)",
                meta.len(),
                Self::MAX_FILE_SIZE
            )));
        }

        let content = std::fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

        let config = if is_json {
            Self::from_json_str(&content)?
        } else {
            Self::from_toml_str(&content)?
        };

        config.validate()?;
        tracing::info!(
            path = %path.display(),
            sources = config.sources.len(),
            keywords = config.keywords.len(),
            subscribers = config.subscribers.len(),
            poll_minutes = config.poll_minutes,
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Parse TOML content without validating it.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        if let Ok(raw) = content.parse::<toml::Table>() {
            warn_unknown_keys(raw.keys().map(String::as_str));
        }
        Ok(toml::from_str(content)?)
    }

    /// Parse JSON content without validating it.
    pub fn from_json_str(content: &str) -> Result<Self, ConfigError> {
        if let Ok(serde_json::Value::Object(raw)) =
            serde_json::from_str::<serde_json::Value>(content)
        {
            warn_unknown_keys(raw.keys().map(String::as_str));
        }
        Ok(serde_json::from_str(content)?)
    }

    /// Reject configurations that would make every cycle a no-op or fail.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_minutes == 0 {
            return Err(ConfigError::Invalid(
                "poll_minutes must be at least 1".to_string(),
            ));
        }
        if self.sources.is_empty() {
            return Err(ConfigError::Invalid("no sources configured".to_string()));
        }
        if self.keywords.iter().all(|k| k.trim().is_empty()) {
            return Err(ConfigError::Invalid("no keywords configured".to_string()));
        }
        if self.subscribers.is_empty() {
            return Err(ConfigError::Invalid(
                "no subscribers configured".to_string(),
            ));
        }
        for source in &self.sources {
            validate_url(&source.url)
                .map_err(|e| ConfigError::Invalid(format!("source '{}': {}", source.url, e)))?;
        }
        for subscriber in &self.subscribers {
            if !subscriber.email.contains('@') {
                return Err(ConfigError::Invalid(format!(
                    "subscriber '{}' is not an email address",
                    subscriber.email
                )));
            }
        }
        if self.max_concurrent_fetches == 0 || self.max_concurrent_deliveries == 0 {
            return Err(ConfigError::Invalid(
                "concurrency limits must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_minutes.saturating_mul(60))
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

fn warn_unknown_keys<'a>(keys: impl Iterator<Item = &'a str>) {
    for key in keys {
        if !KNOWN_KEYS.contains(&key) {
            tracing::warn!(key = %key, "Unknown key in config file, ignoring");
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
