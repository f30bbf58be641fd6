// src/config/mcp.rs
// MCP server configuration file loading (.mira/mcp.json, project then home)

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// One entry of the `mcpServers` map in the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerConfig {
    #[serde(skip)]
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default = "default_timeout_ms")]
    pub timeout: u64,
    #[serde(default)]
    pub needs_db_context: bool,
}

fn default_timeout_ms() -> u64 {
    60_000
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RawMcpConfig {
    #[serde(rename = "mcpServers", default)]
    mcp_servers: HashMap<String, McpServerConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct McpConfig {
    pub servers: Vec<McpServerConfig>,
}

impl McpConfig {
    /// Resolve the config path from `MCP_CONFIG_PATH`, falling back to
    /// `.mira/mcp.json` under the cwd and then under the home directory.
    /// Missing entirely is not an error: the manager simply starts with no
    /// configured servers.
    pub fn load() -> anyhow::Result<Self> {
        if let Some(path) = explicit_path() {
            return Self::load_from(&path);
        }

        for path in default_search_paths() {
            if path.exists() {
                return Self::load_from(&path);
            }
        }

        debug!("[config] no MCP config file found, starting with no servers");
        Ok(Self::default())
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        info!("[config] loading MCP servers from {:?}", path);
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading MCP config at {:?}", path))?;
        let raw: RawMcpConfig =
            serde_json::from_str(&content).context("parsing MCP config JSON")?;

        let servers = raw
            .mcp_servers
            .into_iter()
            .map(|(name, mut cfg)| {
                cfg.name = name;
                cfg
            })
            .collect();

        Ok(Self { servers })
    }
}

fn explicit_path() -> Option<PathBuf> {
    std::env::var("MCP_CONFIG_PATH").ok().map(PathBuf::from)
}

fn default_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Ok(cwd) = std::env::current_dir() {
        paths.push(cwd.join(".mira/mcp.json"));
    }
    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(".mira/mcp.json"));
    }
    paths
}
