//! Configuration System
//!
//! Layered configuration for a federated repository: built-in defaults, the
//! user-level file, workspace files and `GRAFT__*` environment variables, in
//! increasing precedence. `GraftConfig::validate` reports every problem at
//! once so a repository never starts from a half-valid description.

use crate::connector::PoolOptions;
use crate::federation::PathRule;
use crate::logging::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

mod facade;
mod merge;
mod sources;

pub use facade::ConfigLoader;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraftConfig {
    #[serde(default)]
    pub federation: FederationConfig,

    /// Connection settings by source name
    #[serde(default)]
    pub sources: HashMap<String, SourceConfig>,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// What to do when one source fails while a node's contributions are read
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FanOutFailurePolicy {
    /// Merge what the other sources returned
    #[default]
    Omit,
    /// Fail the whole read
    Fail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FederationConfig {
    #[serde(default = "default_federation_name")]
    pub name: String,

    /// The one workspace the federation exposes
    #[serde(default = "default_workspace")]
    pub default_workspace: String,

    /// Where merged nodes are kept; required unless the federation is a
    /// single one-rule projection
    #[serde(default)]
    pub cache: Option<CacheConfig>,

    #[serde(default)]
    pub projections: Vec<ProjectionConfig>,

    /// Lifetime of merged nodes whose sources give no cache policy
    #[serde(default)]
    pub default_cache_ttl_ms: Option<u64>,

    #[serde(default)]
    pub fan_out_failure: FanOutFailurePolicy,

    /// Property whose values must agree for contributions to be one node
    #[serde(default = "default_identity_property")]
    pub identity_property: String,
}

fn default_federation_name() -> String {
    "graft".to_string()
}

fn default_workspace() -> String {
    crate::request::DEFAULT_WORKSPACE.to_string()
}

fn default_identity_property() -> String {
    crate::graph::lexicon::IDENTITY.to_string()
}

impl Default for FederationConfig {
    fn default() -> Self {
        Self {
            name: default_federation_name(),
            default_workspace: default_workspace(),
            cache: None,
            projections: Vec::new(),
            default_cache_ttl_ms: None,
            fan_out_failure: FanOutFailurePolicy::default(),
            identity_property: default_identity_property(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    pub source: String,
    #[serde(default = "default_workspace")]
    pub workspace: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectionConfig {
    pub source: String,
    #[serde(default = "default_workspace")]
    pub workspace: String,
    /// Rules in the form `<federated path> => <source path> [$ <exception>]*`
    #[serde(default)]
    pub rules: Vec<String>,
    #[serde(default)]
    pub read_only: bool,
}

impl ProjectionConfig {
    fn is_single_rule(&self) -> bool {
        self.rules.len() == 1
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Times a failed connection attempt is retried
    #[serde(default)]
    pub retry_limit: u32,

    #[serde(default)]
    pub pool: PoolConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    #[serde(default = "default_core_size")]
    pub core_size: usize,
    #[serde(default = "default_max_size")]
    pub max_size: usize,
    #[serde(default)]
    pub validate_before_use: bool,
    #[serde(default = "default_ping_timeout_ms")]
    pub ping_timeout_ms: u64,
    /// Unset waits for a connection until one is returned
    #[serde(default)]
    pub acquire_timeout_ms: Option<u64>,
}

fn default_core_size() -> usize {
    crate::connector::pool::DEFAULT_CORE_SIZE
}

fn default_max_size() -> usize {
    crate::connector::pool::DEFAULT_MAX_SIZE
}

fn default_ping_timeout_ms() -> u64 {
    u64::try_from(crate::connector::pool::DEFAULT_PING_TIMEOUT.as_millis()).unwrap_or(u64::MAX)
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            core_size: default_core_size(),
            max_size: default_max_size(),
            validate_before_use: false,
            ping_timeout_ms: default_ping_timeout_ms(),
            acquire_timeout_ms: None,
        }
    }
}

impl SourceConfig {
    pub fn pool_options(&self) -> PoolOptions {
        PoolOptions {
            core_size: self.pool.core_size,
            max_size: self.pool.max_size,
            validate_before_use: self.pool.validate_before_use,
            ping_timeout: Duration::from_millis(self.pool.ping_timeout_ms),
            acquire_timeout: self.pool.acquire_timeout_ms.map(Duration::from_millis),
            retry_limit: Some(self.retry_limit),
        }
    }
}

/// Configuration validation errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    Federation(String),
    Projection(usize, String),
    Source(String, String),
    Logging(String),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::Federation(msg) => write!(f, "Federation: {}", msg),
            ValidationError::Projection(index, msg) => {
                write!(f, "Projection #{}: {}", index, msg)
            }
            ValidationError::Source(name, msg) => write!(f, "Source '{}': {}", name, msg),
            ValidationError::Logging(msg) => write!(f, "Logging: {}", msg),
        }
    }
}

impl std::error::Error for ValidationError {}

impl FederationConfig {
    /// One projection with one rule needs no cache
    pub fn is_single_projection(&self) -> bool {
        matches!(self.projections.as_slice(), [only] if only.is_single_rule())
    }

    /// Names of every source the federation reads from or caches in
    pub fn referenced_sources(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.projections.iter().map(|p| p.source.as_str()).collect();
        if let Some(cache) = &self.cache {
            names.push(cache.source.as_str());
        }
        names.sort_unstable();
        names.dedup();
        names
    }

    fn validate(&self, errors: &mut Vec<ValidationError>) {
        if self.name.trim().is_empty() {
            errors.push(ValidationError::Federation("name cannot be empty".to_string()));
        }
        if self.default_workspace.is_empty() {
            errors.push(ValidationError::Federation(
                "default workspace cannot be empty".to_string(),
            ));
        }
        if self.identity_property.is_empty() {
            errors.push(ValidationError::Federation(
                "identity property cannot be empty".to_string(),
            ));
        }
        if self.projections.is_empty() {
            errors.push(ValidationError::Federation(
                "at least one projection is required".to_string(),
            ));
        }
        if self.cache.is_none() && !self.projections.is_empty() && !self.is_single_projection() {
            errors.push(ValidationError::Federation(
                "a cache source is required unless the federation is one projection with one rule"
                    .to_string(),
            ));
        }
        if let Some(cache) = &self.cache {
            if cache.source.is_empty() {
                errors.push(ValidationError::Federation(
                    "cache source cannot be empty".to_string(),
                ));
            }
        }
        if self.default_cache_ttl_ms == Some(0) {
            errors.push(ValidationError::Federation(
                "default cache TTL must be positive".to_string(),
            ));
        }
        for (index, projection) in self.projections.iter().enumerate() {
            if projection.source.is_empty() {
                errors.push(ValidationError::Projection(
                    index,
                    "source cannot be empty".to_string(),
                ));
            }
            if projection.rules.is_empty() {
                errors.push(ValidationError::Projection(
                    index,
                    "at least one rule is required".to_string(),
                ));
            }
            for rule in &projection.rules {
                if let Err(e) = PathRule::parse(rule) {
                    errors.push(ValidationError::Projection(index, e.to_string()));
                }
            }
        }
    }
}

impl GraftConfig {
    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        self.federation.validate(&mut errors);

        let mut names: Vec<&String> = self.sources.keys().collect();
        names.sort();
        for name in names {
            let pool = &self.sources[name].pool;
            if pool.max_size == 0 {
                errors.push(ValidationError::Source(
                    name.clone(),
                    "pool max_size must be at least 1".to_string(),
                ));
            }
            if pool.core_size > pool.max_size {
                errors.push(ValidationError::Source(
                    name.clone(),
                    format!(
                        "pool core_size {} exceeds max_size {}",
                        pool.core_size, pool.max_size
                    ),
                ));
            }
        }

        if let Err(e) = self.logging.validate() {
            errors.push(ValidationError::Logging(e));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Connection settings of `source`, defaults when none are configured
    pub fn source(&self, source: &str) -> SourceConfig {
        self.sources.get(source).cloned().unwrap_or_default()
    }
}
