// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Configuration for the powgate filter.
//!
//! Loaded once from YAML (JSON works too, being a YAML subset) and validated
//! as a whole: a config with any malformed route, CIDR or setting is rejected
//! and never partially applied.

use crate::route::{RouteError, RoutePolicyTree};
use ipnet::IpNet;
use powgate_common::Difficulty;
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Errors raised while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid route: {0}")]
    Route(#[from] RouteError),

    #[error("invalid mempool upstream {value:?}: {reason}")]
    Upstream { value: String, reason: String },

    #[error("invalid {field}: {reason}")]
    Invalid {
        field: &'static str,
        reason: &'static str,
    },
}

/// Configuration for the filter service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Log verbosity; `RUST_LOG` still takes precedence (default: info)
    #[serde(default)]
    pub log_level: Option<LogLevel>,

    /// Expected hash evaluations per proof-of-work solution
    pub difficulty: Difficulty,

    /// Client blocks that bypass every check
    #[serde(default)]
    pub whitelist: Vec<IpNet>,

    /// Peers whose forwarding headers are believed (default: none, so the
    /// TCP peer is always the client)
    #[serde(default)]
    pub trusted_proxies: Vec<IpNet>,

    /// Base URL of the mempool-style API serving the chain tip hash
    pub mempool_upstream_name: String,

    /// What to do with requests whose host has no policy (default: allow)
    #[serde(default)]
    pub unmatched: DefaultAction,

    /// Server bind address (default: 0.0.0.0:8080)
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    #[serde(default)]
    pub challenge: ChallengeConfig,

    #[serde(default)]
    pub anchor: AnchorConfig,

    #[serde(default)]
    pub limiter: LimiterConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,

    #[serde(default)]
    pub virtual_hosts: Vec<VirtualHostConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Critical,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error | LogLevel::Critical => tracing::Level::ERROR,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefaultAction {
    #[default]
    Allow,
    Block,
}

/// Proof-of-work challenge and grant settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChallengeConfig {
    /// How long an issued challenge can be answered, in seconds (default: 300)
    #[serde(default = "default_freshness_secs")]
    pub freshness_secs: u64,

    /// Tolerated client clock lead for `issued_at`, in seconds (default: 30)
    #[serde(default = "default_clock_skew_secs")]
    pub clock_skew_secs: u64,

    /// Anchors accepted in solutions: current plus trailing ones (default: 2)
    #[serde(default = "default_accepted_anchors")]
    pub accepted_anchors: usize,

    /// Lifetime of the grant minted for a verified solution (default: 3600)
    #[serde(default = "default_grant_ttl_secs")]
    pub grant_ttl_secs: u64,

    /// HMAC key for grants; a random per-process key is used when absent
    #[serde(default)]
    pub grant_secret: Option<String>,
}

/// Entropy upstream polling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnchorConfig {
    /// Path of the tip-hash endpoint (default: /api/blocks/tip/hash)
    #[serde(default = "default_anchor_path")]
    pub path: String,

    /// Poll interval in seconds (default: 10)
    #[serde(default = "default_refresh_secs")]
    pub refresh_secs: u64,

    /// Per-fetch timeout in milliseconds (default: 1000)
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

/// Rate limiter bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Minimum idle time before a counter is evicted, in seconds (default: 300)
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,

    /// Upper bound on live counters; beyond it new keys fail open (default: 100000)
    #[serde(default = "default_max_tracked_keys")]
    pub max_tracked_keys: usize,

    /// Eviction sweep interval in seconds (default: 60)
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable Prometheus metrics endpoint (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics endpoint path (default: /metrics)
    #[serde(default = "default_metrics_path")]
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualHostConfig {
    pub host: String,
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteConfig {
    /// Path relative to the parent route; a final `*` segment is a wildcard
    pub path: String,

    /// Explicit match kind; inferred from `path` when absent
    #[serde(default, rename = "match", skip_serializing_if = "Option::is_none")]
    pub kind: Option<MatchKind>,

    pub rate_limit: RateLimitSpec,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<RouteConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    Exact,
    Prefix,
    Wildcard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RateLimitSpec {
    pub unit: TimeUnit,
    pub requests_per_unit: NonZeroU32,
}

impl RateLimitSpec {
    pub fn new(unit: TimeUnit, requests_per_unit: u32) -> Option<Self> {
        Some(Self {
            unit,
            requests_per_unit: NonZeroU32::new(requests_per_unit)?,
        })
    }

    pub fn window(&self) -> Duration {
        self.unit.duration()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeUnit {
    Second,
    Minute,
    Hour,
    Day,
}

impl TimeUnit {
    pub fn duration(self) -> Duration {
        match self {
            TimeUnit::Second => Duration::from_secs(1),
            TimeUnit::Minute => Duration::from_secs(60),
            TimeUnit::Hour => Duration::from_secs(60 * 60),
            TimeUnit::Day => Duration::from_secs(24 * 60 * 60),
        }
    }
}

// Default value functions
fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_freshness_secs() -> u64 {
    300
}

fn default_clock_skew_secs() -> u64 {
    30
}

fn default_accepted_anchors() -> usize {
    2 // current + previous block
}

fn default_grant_ttl_secs() -> u64 {
    3600
}

fn default_anchor_path() -> String {
    "/api/blocks/tip/hash".to_string()
}

fn default_refresh_secs() -> u64 {
    10
}

fn default_timeout_ms() -> u64 {
    1000
}

fn default_retention_secs() -> u64 {
    300
}

fn default_max_tracked_keys() -> usize {
    100_000
}

fn default_cleanup_interval_secs() -> u64 {
    60
}

fn default_true() -> bool {
    true
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

impl Default for ChallengeConfig {
    fn default() -> Self {
        Self {
            freshness_secs: default_freshness_secs(),
            clock_skew_secs: default_clock_skew_secs(),
            accepted_anchors: default_accepted_anchors(),
            grant_ttl_secs: default_grant_ttl_secs(),
            grant_secret: None,
        }
    }
}

impl Default for AnchorConfig {
    fn default() -> Self {
        Self {
            path: default_anchor_path(),
            refresh_secs: default_refresh_secs(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            retention_secs: default_retention_secs(),
            max_tracked_keys: default_max_tracked_keys(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            path: default_metrics_path(),
        }
    }
}

impl ChallengeConfig {
    pub fn grant_ttl(&self) -> Duration {
        Duration::from_secs(self.grant_ttl_secs)
    }
}

impl AnchorConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl LimiterConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}

impl Config {
    /// Read, parse and validate a config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&raw)
    }

    /// Parse and validate a config document.
    pub fn from_yaml(raw: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Check everything serde cannot: the upstream URL, numeric ranges and
    /// every route pattern.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.upstream_url()?;

        let checks: [(bool, &'static str, &'static str); 8] = [
            (self.challenge.freshness_secs > 0, "challenge.freshness_secs", "must be positive"),
            (self.challenge.accepted_anchors > 0, "challenge.accepted_anchors", "must be at least 1"),
            (self.challenge.grant_ttl_secs > 0, "challenge.grant_ttl_secs", "must be positive"),
            (
                self.challenge.grant_secret.as_deref().map_or(true, |s| !s.is_empty()),
                "challenge.grant_secret",
                "must not be empty",
            ),
            (self.anchor.path.starts_with('/'), "anchor.path", "must start with '/'"),
            (
                self.anchor.refresh_secs > 0 && self.anchor.timeout_ms > 0,
                "anchor",
                "refresh_secs and timeout_ms must be positive",
            ),
            (
                self.limiter.max_tracked_keys > 0 && self.limiter.cleanup_interval_secs > 0,
                "limiter",
                "max_tracked_keys and cleanup_interval_secs must be positive",
            ),
            (self.metrics.path.starts_with('/'), "metrics.path", "must start with '/'"),
        ];
        for (ok, field, reason) in checks {
            if !ok {
                return Err(ConfigError::Invalid { field, reason });
            }
        }

        RoutePolicyTree::from_config(&self.virtual_hosts)?;
        Ok(())
    }

    /// Full URL of the anchor endpoint.
    pub fn upstream_url(&self) -> Result<url::Url, ConfigError> {
        let invalid = |reason: String| ConfigError::Upstream {
            value: self.mempool_upstream_name.clone(),
            reason,
        };
        let base = url::Url::parse(&self.mempool_upstream_name).map_err(|e| invalid(e.to_string()))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(invalid(format!("unsupported scheme {:?}", base.scheme())));
        }
        let path = format!("{}{}", base.path().trim_end_matches('/'), self.anchor.path);
        let mut url = base;
        url.set_path(&path);
        Ok(url)
    }

    /// Default tracing directive when `RUST_LOG` is not set.
    pub fn tracing_level(&self) -> tracing::Level {
        self.log_level.map(Into::into).unwrap_or(tracing::Level::INFO)
    }
}
