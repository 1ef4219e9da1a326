//! Server error types.

use inspector::InspectorError;
use thiserror::Error;

/// Errors that stop the server from starting or serving
#[derive(Debug, Error)]
pub enum ServerError {
    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Listener could not be bound
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Accept loop failed
    #[error("Server error: {0}")]
    Serve(#[source] std::io::Error),

    /// Inspector core setup failed
    #[error("Inspector error: {0}")]
    Inspector(#[from] InspectorError),
}
