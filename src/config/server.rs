// src/config/server.rs
// HTTP server and logging configuration

use serde::{Deserialize, Serialize};

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self {
            host: super::helpers::env_or("HOST", "0.0.0.0"),
            port: super::helpers::env_usize("PORT", 8080) as u16,
        }
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl LoggingConfig {
    pub fn from_env() -> Self {
        Self {
            level: super::helpers::env_or("LOG_LEVEL", "info"),
        }
    }
}
