//! Cluster client errors

use thiserror::Error;

/// Errors that can occur when talking to a Kubernetes cluster
#[derive(Debug, Error)]
pub enum ClusterError {
    /// The addressed object (or its resource type) does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// The API server answered with a non-success status other than 404
    #[error("Kubernetes API error ({code}): {message}")]
    Api {
        /// HTTP status code returned by the API server
        code: u16,
        /// Message from the API server's Status object
        message: String,
    },

    /// Transport or client-side failure
    #[error("Kubernetes client error: {0}")]
    Kube(#[source] kube::Error),

    /// Building a client configuration failed (kubeconfig, in-cluster env)
    #[error("Client configuration error: {0}")]
    Config(String),

    /// The watch stream reported a failure
    #[error("Watch error: {0}")]
    Watch(String),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid request (e.g., malformed apiVersion)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl ClusterError {
    /// Classify a `kube::Error`, turning API 404s into [`ClusterError::NotFound`].
    pub fn from_kube(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(status) if status.code == 404 => {
                ClusterError::NotFound(status.message.clone())
            }
            kube::Error::Api(status) => ClusterError::Api {
                code: status.code,
                message: status.message.clone(),
            },
            other => ClusterError::Kube(other),
        }
    }

    /// Whether the error means "no such object or no such resource type".
    pub fn is_not_found(&self) -> bool {
        match self {
            ClusterError::NotFound(_) => true,
            ClusterError::Api { message, .. } => message.contains("does not exist"),
            _ => false,
        }
    }
}

impl From<kube::Error> for ClusterError {
    fn from(err: kube::Error) -> Self {
        ClusterError::from_kube(err)
    }
}
