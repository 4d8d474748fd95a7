//! Error types for graph construction, provider calls and state persistence.
//!
//! Errors are categorized so the coordinator can tell retryable provider
//! failures from ones that should fail a node immediately, and so reports can
//! explain what went wrong.

use crate::types::NodeId;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Categories of node failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Rate limiting, eventual consistency, timeouts (retryable)
    Transient,
    /// Rejected by the provider; retrying cannot help
    Permanent,
    /// A dependency failed, so the operation was never attempted
    Upstream,
    /// The pass was cancelled before the operation started
    Cancelled,
    /// No provider handles the resource type
    Configuration,
    /// Bug in the engine itself
    Internal,
}

impl ErrorCategory {
    /// Whether this error category is typically transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient)
    }

    /// Get a user-friendly description of this error category.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Transient => "Transient provider failure",
            Self::Permanent => "Provider rejected the operation",
            Self::Upstream => "Dependency failed",
            Self::Cancelled => "Cancelled",
            Self::Configuration => "Provider not configured",
            Self::Internal => "Internal engine error",
        }
    }

    /// Get actionable advice for resolving this error category.
    pub fn advice(&self) -> &'static str {
        match self {
            Self::Transient => "Run the apply again; completed resources will not be touched",
            Self::Permanent => "Fix the declared inputs and apply again",
            Self::Upstream => "Resolve the failure of the dependency first",
            Self::Cancelled => "Run the apply again to finish the remaining operations",
            Self::Configuration => "Register a provider for the resource type prefix",
            Self::Internal => "Please report this as a bug",
        }
    }
}

/// Errors detected while building or validating a resource graph.
///
/// All of these are fatal before any provider is called.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("duplicate resource node: {0}")]
    DuplicateNode(NodeId),

    #[error("unknown resource node: {0}")]
    UnknownNode(NodeId),

    #[error("'{from}.{property}' references unknown node '{target}'")]
    UnknownReference {
        from: NodeId,
        property: String,
        target: NodeId,
    },

    #[error("export '{name}' references unknown node '{target}'")]
    UnknownExportReference { name: String, target: NodeId },

    #[error("dependency cycle between: {}", join_ids(.nodes))]
    Cycle { nodes: Vec<NodeId> },
}

fn join_ids(ids: &[NodeId]) -> String {
    ids.iter()
        .map(NodeId::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Failure reported by a resource provider.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProviderError {
    /// Worth retrying (rate limit, eventual consistency, timeout)
    #[error("transient provider error: {message}")]
    Transient { message: String },

    /// Retrying cannot help
    #[error("provider rejected the operation: {message}")]
    Permanent { message: String },
}

impl ProviderError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent {
            message: message.into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Transient { .. } => ErrorCategory::Transient,
            Self::Permanent { .. } => ErrorCategory::Permanent,
        }
    }

    /// Whether this error is typically transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }

    /// Classify a free-form failure message from a provider.
    ///
    /// Used when the provider did not say explicitly whether to retry.
    pub fn from_message(message: &str) -> Self {
        let lower = message.to_lowercase();
        let transient = lower.contains("throttl")
            || lower.contains("rate exceeded")
            || lower.contains("too many requests")
            || lower.contains("timed out")
            || lower.contains("connection reset")
            || lower.contains("service unavailable")
            || lower.contains("try again");

        if transient {
            Self::transient(message.trim())
        } else {
            Self::permanent(message.trim())
        }
    }
}

/// Why a node ended a pass in `Failed`.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeError {
    #[error("transient provider error: {message}")]
    Transient { message: String },

    #[error("provider rejected the operation: {message}")]
    Permanent { message: String },

    #[error("upstream node '{node}' failed")]
    UpstreamFailed { node: NodeId },

    #[error("node '{node}' has no output named '{output}'")]
    MissingOutput { node: NodeId, output: String },

    #[error("cancelled before the operation started")]
    Cancelled,

    #[error("no provider registered for resource type '{resource_type}'")]
    NoProvider { resource_type: String },

    #[error("internal error: {message}")]
    Internal { message: String },
}

impl NodeError {
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Transient { .. } => ErrorCategory::Transient,
            Self::Permanent { .. } | Self::MissingOutput { .. } => ErrorCategory::Permanent,
            Self::UpstreamFailed { .. } => ErrorCategory::Upstream,
            Self::Cancelled => ErrorCategory::Cancelled,
            Self::NoProvider { .. } => ErrorCategory::Configuration,
            Self::Internal { .. } => ErrorCategory::Internal,
        }
    }
}

impl From<ProviderError> for NodeError {
    fn from(error: ProviderError) -> Self {
        match error {
            ProviderError::Transient { message } => Self::Transient { message },
            ProviderError::Permanent { message } => Self::Permanent { message },
        }
    }
}

/// State store failures. Never repaired automatically.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("state file {path} is corrupt: {message}")]
    Corruption { path: PathBuf, message: String },

    #[error("state file {path} has version {found}, newest supported is {supported}")]
    UnsupportedVersion {
        path: PathBuf,
        found: u32,
        supported: u32,
    },

    #[error("failed to write state file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize state: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Errors that abort a reconciliation pass.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error("no provider registered for resource type '{0}'")]
    NoProvider(String),

    #[error("failed to describe resource type '{resource_type}': {source}")]
    Describe {
        resource_type: String,
        #[source]
        source: ProviderError,
    },

    #[error("confirmation failed: {0}")]
    Confirm(String),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_error_retryable() {
        assert!(ProviderError::transient("throttled").is_retryable());
        assert!(!ProviderError::permanent("bad cidr").is_retryable());
    }

    #[test]
    fn test_from_message_classification() {
        assert!(ProviderError::from_message("Rate exceeded for DescribeVpcs").is_retryable());
        assert!(ProviderError::from_message("request timed out").is_retryable());
        assert!(!ProviderError::from_message("InvalidParameterValue: cidr").is_retryable());
    }

    #[test]
    fn test_node_error_from_provider_error() {
        let error: NodeError = ProviderError::permanent("denied").into();
        assert_eq!(error.category(), ErrorCategory::Permanent);
        assert_eq!(error.to_string(), "provider rejected the operation: denied");
    }

    #[test]
    fn test_cycle_message_lists_nodes() {
        let error = GraphError::Cycle {
            nodes: vec![NodeId::from("a"), NodeId::from("b")],
        };
        assert_eq!(error.to_string(), "dependency cycle between: a, b");
    }

    #[test]
    fn test_node_error_serializes_with_kind() {
        let error = NodeError::UpstreamFailed {
            node: NodeId::from("vpc"),
        };
        let json = serde_json::to_value(&error).unwrap();
        assert_eq!(json["kind"], "upstream_failed");
        assert_eq!(json["node"], "vpc");
    }
}
