//! Listener configuration from the environment

use crate::error::ServerError;

const DEFAULT_PORT: u16 = 3001;
const DEFAULT_HOST: &str = "0.0.0.0";

/// Where the server listens
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
        }
    }
}

impl ServerConfig {
    /// Read `SERVER_HOST` and `SERVER_PORT` (falling back to `PORT`)
    pub fn from_env() -> Result<Self, ServerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ServerError> {
        let mut config = Self::default();
        if let Some(host) = lookup("SERVER_HOST").filter(|h| !h.trim().is_empty()) {
            config.host = host.trim().to_string();
        }
        if let Some(port) = lookup("SERVER_PORT")
            .or_else(|| lookup("PORT"))
            .filter(|p| !p.trim().is_empty())
        {
            config.port = port.trim().parse().map_err(|e| {
                ServerError::InvalidConfig(format!("invalid port '{}': {}", port, e))
            })?;
        }
        Ok(config)
    }

    /// `host:port` for the listener
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
