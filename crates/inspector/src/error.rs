//! Inspector error types.
//!
//! Type-discovery failures and per-type aggregation failures never show up
//! here: both degrade silently (with a log line) instead of failing a call.

use cluster_client::ClusterError;
use std::time::Duration;
use thiserror::Error;

/// Errors returned by the inspector core
#[derive(Debug, Error)]
pub enum InspectorError {
    /// Malformed input (apiVersion, kind, name, context)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Absent named resource or unknown context name
    #[error("Not found: {0}")]
    NotFound(String),

    /// Unreachable cluster or unusable credentials; the context is blacklisted
    #[error("Connection error: {0}")]
    Connection(String),

    /// Malformed message on the live channel
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The kubeconfig store could not be read, parsed or written
    #[error("Kubeconfig error: {0}")]
    Kubeconfig(String),

    /// A bounded cluster call did not finish in time
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Cluster API error
    #[error(transparent)]
    Cluster(#[from] ClusterError),

    /// Filesystem error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML (de)serialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl InspectorError {
    /// Whether the caller is at fault (4xx) rather than the cluster or server (5xx).
    pub fn is_client_error(&self) -> bool {
        match self {
            InspectorError::Validation(_)
            | InspectorError::NotFound(_)
            | InspectorError::Protocol(_) => true,
            InspectorError::Cluster(err) => {
                err.is_not_found() || matches!(err, ClusterError::InvalidRequest(_))
            }
            _ => false,
        }
    }
}

/// Result alias for inspector operations
pub type Result<T> = std::result::Result<T, InspectorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_error_split() {
        assert!(InspectorError::Validation("apiVersion is required".into()).is_client_error());
        assert!(InspectorError::NotFound("Widget/a".into()).is_client_error());
        assert!(InspectorError::Cluster(ClusterError::NotFound("x".into())).is_client_error());
        assert!(!InspectorError::Connection("refused".into()).is_client_error());
        assert!(!InspectorError::Timeout(Duration::from_secs(10)).is_client_error());
        assert!(
            !InspectorError::Cluster(ClusterError::Api {
                code: 500,
                message: "boom".into()
            })
            .is_client_error()
        );
    }
}
