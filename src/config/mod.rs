// src/config/mod.rs
// Central configuration for the orchestrator - composed from per-domain sub-configs

pub mod helpers;
pub mod loop_config;
pub mod mcp;
pub mod provider;
pub mod server;

use serde::{Deserialize, Serialize};

/// Top-level configuration, composed from domain sub-configs and loaded once
/// at process start. Handed to the router as `Arc<Config>` rather than kept
/// in a global, since every field here is request-relevant but never
/// request-mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: server::ServerConfig,
    pub logging: server::LoggingConfig,
    pub mcp: mcp::McpConfig,
    pub r#loop: loop_config::LoopConfig,
    pub providers: provider::ProviderConfig,
}

impl Config {
    /// Build configuration from the process environment, loading a `.env`
    /// file first when present.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let config = Self {
            server: server::ServerConfig::from_env(),
            logging: server::LoggingConfig::from_env(),
            mcp: mcp::McpConfig::load()?,
            r#loop: loop_config::LoopConfig::from_env(),
            providers: provider::ProviderConfig::from_env(),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate config on startup. Unlike individual sub-config validation,
    /// this checks cross-cutting invariants (e.g. at least one provider
    /// enabled).
    pub fn validate(&self) -> anyhow::Result<()> {
        self.r#loop.validate()?;
        self.providers.validate()?;
        Ok(())
    }
}
