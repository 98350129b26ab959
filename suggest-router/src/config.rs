use crate::circuit_breaker::{BreakerSettings, FailureKind};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use synced_cache::config::SyncConfig;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Port cannot be 0")]
    InvalidPort,

    #[error("Timeout cannot be 0: {0}")]
    ZeroTimeout(String),

    #[error("max_suggestions cannot be 0")]
    ZeroMaxSuggestions,

    #[error("Empty provider name")]
    EmptyProviderName,

    #[error("Duplicate provider name: {0}")]
    DuplicateProvider(String),

    #[error("Score for provider {0} must be within [0, 1]")]
    InvalidScore(String),

    #[error("Enabled fraction for flag {0} must be within [0, 1]")]
    InvalidFlagFraction(String),

    #[error("Provider {provider} references unknown flag {flag}")]
    UnknownFlag { provider: String, flag: String },

    #[error("Failure threshold for provider {0} cannot be 0")]
    ZeroFailureThreshold(String),

    #[error("Sync interval for provider {0} cannot be 0")]
    ZeroSyncInterval(String),
}

fn default_max_suggestions() -> usize {
    20
}

fn default_true() -> bool {
    true
}

/// Suggest router configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    /// Main listener for suggest requests
    pub listener: Listener,
    /// Admin listener for health and readiness probes
    pub admin_listener: Listener,
    pub timeouts: Timeouts,
    /// Upper bound on the number of suggestions in one response
    #[serde(default = "default_max_suggestions")]
    pub max_suggestions: usize,
    /// Variants of this deployment, echoed back in every response
    #[serde(default)]
    pub server_variants: Vec<String>,
    #[serde(default)]
    pub flags: HashMap<String, FlagConfig>,
    /// Providers in registration order. The order breaks ranking ties.
    pub providers: Vec<ProviderConfig>,
}

impl Config {
    /// Validates the suggest router configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.listener.validate()?;
        self.admin_listener.validate()?;

        if self.timeouts.global_timeout_ms == 0 {
            return Err(ValidationError::ZeroTimeout("global".into()));
        }

        if self.max_suggestions == 0 {
            return Err(ValidationError::ZeroMaxSuggestions);
        }

        for (name, flag) in &self.flags {
            if !(0.0..=1.0).contains(&flag.enabled) {
                return Err(ValidationError::InvalidFlagFraction(name.clone()));
            }
        }

        let mut provider_names = HashSet::new();
        for provider in &self.providers {
            if provider.name.is_empty() {
                return Err(ValidationError::EmptyProviderName);
            }

            if !provider_names.insert(&provider.name) {
                return Err(ValidationError::DuplicateProvider(provider.name.clone()));
            }

            provider.validate(&self.flags)?;
        }

        Ok(())
    }

    pub fn global_timeout(&self) -> Duration {
        Duration::from_millis(self.timeouts.global_timeout_ms)
    }
}

/// Network listener configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Listener {
    /// Host address to bind to (e.g., "0.0.0.0" or "127.0.0.1")
    pub host: String,
    /// Port number to listen on
    pub port: u16,
}

impl Listener {
    /// Validates the listener configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Timeouts {
    /// Deadline for the whole fan-out, for providers without their own timeout
    pub global_timeout_ms: u64,
}

/// How a flag assigns requests to buckets
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BucketingScheme {
    /// A fresh random draw for every request
    Random,
    /// Derived from the session id so a session always lands in the same bucket
    Session,
}

impl BucketingScheme {
    pub const fn as_str(&self) -> &'static str {
        match self {
            BucketingScheme::Random => "random",
            BucketingScheme::Session => "session",
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct FlagConfig {
    pub scheme: BucketingScheme,
    /// Fraction of buckets, within [0, 1], for which the flag is on
    pub enabled: f64,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct ProviderConfig {
    /// Unique identifier, also used as the `provider` field of suggestions
    pub name: String,
    /// Queried when the request does not name an explicit provider subset
    #[serde(default = "default_true")]
    pub enabled_by_default: bool,
    /// Overrides the global timeout for this provider, even when larger
    pub timeout_ms: Option<u64>,
    /// Score attached to every suggestion of this provider
    pub score: f64,
    /// Optional feature flag gating the provider per request
    pub flag: Option<String>,
    #[serde(flatten)]
    pub kind: ProviderKind,
}

impl ProviderConfig {
    fn validate(&self, flags: &HashMap<String, FlagConfig>) -> Result<(), ValidationError> {
        if !(0.0..=1.0).contains(&self.score) {
            return Err(ValidationError::InvalidScore(self.name.clone()));
        }

        if self.timeout_ms == Some(0) {
            return Err(ValidationError::ZeroTimeout(self.name.clone()));
        }

        if let Some(flag) = &self.flag
            && !flags.contains_key(flag)
        {
            return Err(ValidationError::UnknownFlag {
                provider: self.name.clone(),
                flag: flag.clone(),
            });
        }

        match &self.kind {
            ProviderKind::TopPicks(top_picks) => {
                if top_picks.sync.cron_interval_secs == 0 {
                    return Err(ValidationError::ZeroSyncInterval(self.name.clone()));
                }
            }
            ProviderKind::Remote(remote) => {
                if remote.breaker.failure_threshold == 0 {
                    return Err(ValidationError::ZeroFailureThreshold(self.name.clone()));
                }
            }
        }

        Ok(())
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

/// The closed set of provider implementations
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderKind {
    /// Domain lookups served from a synced dataset
    TopPicks(TopPicksConfig),
    /// Suggestions fetched from an HTTP backend behind a circuit breaker
    Remote(RemoteConfig),
}

fn default_query_char_limit() -> usize {
    4
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct TopPicksConfig {
    pub sync: SyncConfig,
    /// Queries shorter than this are rejected by validation
    #[serde(default = "default_query_char_limit")]
    pub query_char_limit: usize,
}

fn default_max_results() -> usize {
    5
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct RemoteConfig {
    pub url: Url,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    #[serde(default)]
    pub breaker: BreakerConfig,
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_recovery_timeout_secs() -> u64 {
    30
}

fn default_failure_kinds() -> Vec<FailureKind> {
    vec![FailureKind::Timeout, FailureKind::Request, FailureKind::Status]
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct BreakerConfig {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_recovery_timeout_secs")]
    pub recovery_timeout_secs: u64,
    /// Failures older than this no longer count towards the threshold
    pub failure_window_secs: Option<u64>,
    /// Only errors of these kinds drive the breaker
    #[serde(default = "default_failure_kinds")]
    pub failure_kinds: Vec<FailureKind>,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        BreakerConfig {
            failure_threshold: default_failure_threshold(),
            recovery_timeout_secs: default_recovery_timeout_secs(),
            failure_window_secs: None,
            failure_kinds: default_failure_kinds(),
        }
    }
}

impl From<&BreakerConfig> for BreakerSettings {
    fn from(config: &BreakerConfig) -> Self {
        BreakerSettings {
            failure_threshold: config.failure_threshold,
            recovery_timeout: Duration::from_secs(config.recovery_timeout_secs),
            failure_window: config.failure_window_secs.map(Duration::from_secs),
            failure_kinds: config.failure_kinds.iter().copied().collect(),
        }
    }
}
