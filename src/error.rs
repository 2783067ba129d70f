//! Error types for the graft federation engine.
//!
//! `GraphError` travels inside request outcomes and is never thrown across the
//! processor boundary. `ConfigError` is raised while building projections,
//! pools and repositories, before any request is processed.

use crate::graph::{Location, Path};
use thiserror::Error;

/// Per-request errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("Path not found: {location} (lowest existing ancestor: {})", display_ancestor(.lowest_existing))]
    PathNotFound {
        location: Location,
        lowest_existing: Option<Path>,
    },

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Unsupported request: {0}")]
    UnsupportedRequest(String),

    #[error("Source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("Repository source '{source_name}' failed: {message}")]
    Source {
        source_name: String,
        message: String,
    },

    #[error("Interrupted while {0}")]
    Interrupted(String),

    #[error("Referential integrity violation: {0}")]
    ReferentialIntegrity(String),

    #[error("Node already exists: {0}")]
    NodeExists(Location),

    #[error("{failed} of {total} requests failed: {summary}")]
    MultipleFailures {
        failed: usize,
        total: usize,
        summary: String,
    },
}

fn display_ancestor(ancestor: &Option<Path>) -> String {
    ancestor
        .as_ref()
        .map(|p| p.to_string())
        .unwrap_or_else(|| "none".to_string())
}

impl GraphError {
    pub fn source_failure(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        GraphError::Source {
            source_name: source_name.into(),
            message: message.into(),
        }
    }

    /// Attribute a connectivity failure to the source it came from
    pub fn attributed_to(self, source_name: &str) -> Self {
        match self {
            GraphError::SourceUnavailable(message) => GraphError::source_failure(source_name, message),
            other => other,
        }
    }

    pub fn path_not_found(location: Location, lowest_existing: Option<Path>) -> Self {
        GraphError::PathNotFound {
            location,
            lowest_existing,
        }
    }

    pub fn is_path_not_found(&self) -> bool {
        matches!(self, GraphError::PathNotFound { .. })
    }

    /// Connectivity failures a caller may retry up to the source's retry limit.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GraphError::SourceUnavailable(_) | GraphError::Source { .. }
        )
    }
}

/// Construction-time configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid projection rule '{rule}': {reason}")]
    InvalidRule { rule: String, reason: String },

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to load configuration: {0}")]
    Load(String),
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::Load(err.to_string())
    }
}

impl From<GraphError> for ConfigError {
    fn from(err: GraphError) -> Self {
        ConfigError::Invalid(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_not_found_mentions_ancestor() {
        let err = GraphError::path_not_found(
            Location::from_path(Path::parse("/a/b/c").unwrap()),
            Some(Path::parse("/a").unwrap()),
        );
        let message = err.to_string();
        assert!(message.contains("/a/b/c"));
        assert!(message.contains("lowest existing ancestor: /a"));
        assert!(err.is_path_not_found());
        assert!(!err.is_retryable());
    }

    #[test]
    fn connectivity_errors_are_retryable() {
        assert!(GraphError::SourceUnavailable("s1".into()).is_retryable());
        assert!(GraphError::source_failure("s1", "timeout").is_retryable());
        assert!(!GraphError::ReferentialIntegrity("x".into()).is_retryable());
    }

    #[test]
    fn unavailable_source_is_attributed_by_name() {
        let err = GraphError::SourceUnavailable("pool exhausted".into()).attributed_to("s2");
        assert_eq!(err, GraphError::source_failure("s2", "pool exhausted"));
        assert!(err.is_retryable());
        assert!(err.to_string().contains("'s2'"));

        let missing = GraphError::InvalidPath("x".into());
        assert_eq!(missing.clone().attributed_to("s2"), missing);
    }
}
