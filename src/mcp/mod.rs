// src/mcp/mod.rs
// Model Context Protocol (MCP) client and manager.
// One StdioTransport per configured server, multiplexed by request id; the
// Manager aggregates their tool catalogs under bijective wire names and
// routes tool calls back to the owning server.

pub mod health;
pub mod notifications;
pub mod protocol;
pub mod transport;

pub use health::{HealthMonitor, ServerHealth, TransportConfig};
pub use notifications::{DefaultNotificationHandler, McpNotification, NotificationHandler};
pub use protocol::{sanitize_tool_name, wire_name, McpTool};

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::mcp::McpServerConfig;
use crate::error::{McpError, McpResult};
use protocol::{JsonRpcRequest, McpCapabilities, ToolResult};
use transport::{LogSink, StdioTransport};

/// Lifecycle state of one configured MCP server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerState {
    Starting,
    Ready,
    Failed,
    Stopped,
}

impl std::fmt::Display for ServerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ServerState::Starting => "starting",
            ServerState::Ready => "ready",
            ServerState::Failed => "failed",
            ServerState::Stopped => "stopped",
        };
        write!(f, "{}", s)
    }
}

/// One connected MCP server: its transport, discovered catalog, and state.
pub struct McpClient {
    pub name: String,
    config: McpServerConfig,
    transport: StdioTransport,
    capabilities: RwLock<Option<McpCapabilities>>,
    tools: RwLock<Vec<McpTool>>,
    state: RwLock<ServerState>,
}

impl McpClient {
    async fn start(config: McpServerConfig, log_sink: Option<LogSink>) -> McpResult<Self> {
        info!("[MCP:{}] starting: {}", config.name, config.command);
        let transport = StdioTransport::spawn(&config.command, &config.args, &config.env, log_sink)
            .await
            .map_err(|e| McpError::Transport {
                server: config.name.clone(),
                source: e,
            })?;

        let client = Self {
            name: config.name.clone(),
            config,
            transport,
            capabilities: RwLock::new(None),
            tools: RwLock::new(Vec::new()),
            state: RwLock::new(ServerState::Starting),
        };

        client.initialize().await?;
        client.discover_tools().await?;
        *client.state.write().await = ServerState::Ready;

        Ok(client)
    }

    async fn send_request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> McpResult<serde_json::Value> {
        let id = self.transport.next_id();
        let request = JsonRpcRequest::new(id, method, params);
        let request_json = serde_json::to_string(&request).map_err(|e| McpError::Protocol {
            server: self.name.clone(),
            message: e.to_string(),
        })?;

        debug!("[MCP:{}] -> {} (id={})", self.name, method, id);

        let response = self
            .transport
            .call(id, &request_json, self.config.timeout)
            .await
            .map_err(|e| {
                let msg = e.to_string();
                if msg.contains("timed out") {
                    McpError::Timeout {
                        server: self.name.clone(),
                        method: method.to_string(),
                        timeout_ms: self.config.timeout,
                    }
                } else {
                    McpError::Transport {
                        server: self.name.clone(),
                        source: e,
                    }
                }
            })?;

        if let Some(error) = response.error {
            return Err(McpError::ServerError {
                server: self.name.clone(),
                message: format!("{}: {}", error.code, error.message),
            });
        }

        response.result.ok_or_else(|| McpError::Protocol {
            server: self.name.clone(),
            message: "empty result".to_string(),
        })
    }

    async fn initialize(&self) -> McpResult<()> {
        let params = serde_json::json!({
            "protocolVersion": "2024-11-05",
            "capabilities": { "roots": { "listChanged": true } },
            "clientInfo": { "name": "think-orchestrator", "version": env!("CARGO_PKG_VERSION") }
        });

        let result = self.send_request("initialize", Some(params)).await?;

        if let Ok(caps) = serde_json::from_value::<McpCapabilities>(result.clone()) {
            *self.capabilities.write().await = Some(caps);
        }

        let notif = JsonRpcRequest::notification("notifications/initialized", None);
        if let Ok(notif_json) = serde_json::to_string(&notif) {
            let _ = self.transport.send_notification(&notif_json).await;
        }

        info!(
            "[MCP:{}] initialized (protocol: {})",
            self.name,
            result.get("protocolVersion").and_then(|v| v.as_str()).unwrap_or("unknown")
        );
        Ok(())
    }

    async fn discover_tools(&self) -> McpResult<()> {
        let result = self.send_request("tools/list", None).await?;
        let mut tools = Vec::new();

        if let Some(raw_tools) = result.get("tools").and_then(|t| t.as_array()) {
            for tool_value in raw_tools {
                if let Ok(tool) = serde_json::from_value::<McpTool>(tool_value.clone()) {
                    debug!("[MCP:{}] found tool: {}", self.name, tool.name);
                    tools.push(tool);
                }
            }
        }

        info!("[MCP:{}] discovered {} tools", self.name, tools.len());
        *self.tools.write().await = tools;
        Ok(())
    }

    pub async fn list_tools(&self) -> Vec<McpTool> {
        self.tools.read().await.clone()
    }

    pub async fn call_tool(&self, tool_name: &str, arguments: serde_json::Value) -> McpResult<ToolResult> {
        let params = serde_json::json!({ "name": tool_name, "arguments": arguments });
        info!("[MCP:{}] calling tool: {}", self.name, tool_name);
        let result = self.send_request("tools/call", Some(params)).await?;
        serde_json::from_value(result).map_err(|e| McpError::Protocol {
            server: self.name.clone(),
            message: format!("malformed tool result: {}", e),
        })
    }

    pub async fn state(&self) -> ServerState {
        *self.state.read().await
    }

    pub fn needs_db_context(&self) -> bool {
        self.config.needs_db_context
    }

    async fn mark_failed(&self) {
        *self.state.write().await = ServerState::Failed;
    }

    pub async fn shutdown(&self) {
        let notif = JsonRpcRequest::notification("shutdown", None);
        if let Ok(json) = serde_json::to_string(&notif) {
            let _ = self.transport.send_notification(&json).await;
        }
        self.transport.shutdown().await;
        *self.state.write().await = ServerState::Stopped;
    }
}

/// Filter applied when resolving the tool catalog available to a request.
#[derive(Debug, Clone, Default)]
pub struct ToolFilter {
    pub blocked_servers: Vec<String>,
    pub allowed_tools: Option<Vec<String>>,
}

/// Extra read-only context merged into a tool call's arguments when the
/// target server is configured with `needs_db_context`.
#[derive(Debug, Clone, Default)]
pub struct ToolCallContext {
    pub conversation_id: Option<String>,
    pub api_base: Option<String>,
    pub auth_token: Option<String>,
}

/// Supervises a named set of MCP clients, aggregates their tool catalogs
/// under bijective wire names, and routes calls back to the owning server.
pub struct McpManager {
    clients: RwLock<HashMap<String, Arc<McpClient>>>,
    /// wire_name -> (server_name, original_tool_name)
    wire_map: RwLock<HashMap<String, (String, String)>>,
    health_monitor: Arc<HealthMonitor>,
    log_sink: Option<LogSink>,
}

impl McpManager {
    pub fn new() -> Self {
        let transport_config = TransportConfig::from_env();
        Self {
            clients: RwLock::new(HashMap::new()),
            wire_map: RwLock::new(HashMap::new()),
            health_monitor: Arc::new(HealthMonitor::new(transport_config.health_check_interval_ms)),
            log_sink: None,
        }
    }

    pub fn with_log_sink(mut self, sink: LogSink) -> Self {
        self.log_sink = Some(sink);
        self
    }

    pub fn health_monitor(&self) -> &Arc<HealthMonitor> {
        &self.health_monitor
    }

    /// Start every configured server. A failure in one must not prevent the
    /// others from coming up.
    pub async fn start_all(&self, servers: Vec<McpServerConfig>) {
        for server_config in servers {
            let name = server_config.name.clone();
            match McpClient::start(server_config, self.log_sink.clone()).await {
                Ok(client) => {
                    self.health_monitor.register_server(&name).await;
                    self.register_tools(&name, &client).await;
                    self.clients.write().await.insert(name.clone(), Arc::new(client));
                    info!("[MCP] server '{}' ready", name);
                }
                Err(e) => {
                    warn!("[MCP] failed to start '{}': {}", name, e);
                }
            }
        }
    }

    async fn register_tools(&self, server_name: &str, client: &McpClient) {
        let mut wire_map = self.wire_map.write().await;
        for tool in client.list_tools().await {
            let mut name = wire_name(server_name, &tool.name);
            // Collision resolution: a wire name must be a bijection even when
            // two servers sanitize to the same string (pathological, but the
            // grammar permits it). Suffix deterministically.
            let mut suffix = 1;
            while wire_map.contains_key(&name) {
                suffix += 1;
                name = format!("{}-{}", wire_name(server_name, &tool.name), suffix);
            }
            wire_map.insert(name, (server_name.to_string(), tool.name.clone()));
        }
    }

    /// Union of tool catalogs across `ready` servers, narrowed by `filter`.
    pub async fn available_tools(&self, filter: &ToolFilter) -> Vec<(String, McpTool)> {
        let clients = self.clients.read().await;
        let mut out = Vec::new();

        for (server_name, client) in clients.iter() {
            if filter.blocked_servers.contains(server_name) {
                continue;
            }
            if client.state().await != ServerState::Ready {
                continue;
            }
            for tool in client.list_tools().await {
                let wn = wire_name(server_name, &tool.name);
                if let Some(allowed) = &filter.allowed_tools {
                    if !allowed.contains(&wn) {
                        continue;
                    }
                }
                out.push((wn, tool));
            }
        }
        out
    }

    /// Resolve a wire name and route the call to the owning server, applying
    /// db-context augmentation and health tracking.
    pub async fn call_tool(
        &self,
        wire_name: &str,
        mut arguments: serde_json::Value,
        context: &ToolCallContext,
    ) -> McpResult<ToolResult> {
        let (server_name, original_name) = {
            let wire_map = self.wire_map.read().await;
            wire_map
                .get(wire_name)
                .cloned()
                .ok_or_else(|| McpError::UnknownTool { wire_name: wire_name.to_string() })?
        };

        let client = {
            let clients = self.clients.read().await;
            clients.get(&server_name).cloned()
        };

        let Some(client) = client else {
            return Err(McpError::ServerNotReady {
                server: server_name,
                state: "unregistered".to_string(),
            });
        };

        let state = client.state().await;
        if state != ServerState::Ready {
            return Err(McpError::ServerNotReady {
                server: server_name,
                state: state.to_string(),
            });
        }

        if client.needs_db_context() {
            augment_with_context(&mut arguments, context);
        }

        match client.call_tool(&original_name, arguments).await {
            Ok(result) => {
                self.health_monitor.record_success(&server_name).await;
                Ok(result)
            }
            Err(e) => {
                self.health_monitor.record_failure(&server_name, &e.to_string()).await;
                if matches!(e, McpError::Transport { .. }) {
                    client.mark_failed().await;
                }
                Err(e)
            }
        }
    }

    pub async fn resolve_wire_name(&self, wire_name: &str) -> Option<(String, String)> {
        self.wire_map.read().await.get(wire_name).cloned()
    }

    pub async fn server_count(&self) -> usize {
        self.clients.read().await.len()
    }

    pub async fn list_servers(&self) -> Vec<String> {
        self.clients.read().await.keys().cloned().collect()
    }

    pub async fn ready_servers(&self) -> Vec<String> {
        let clients = self.clients.read().await;
        let mut ready = Vec::new();
        for (name, client) in clients.iter() {
            if client.state().await == ServerState::Ready {
                ready.push(name.clone());
            }
        }
        ready
    }

    pub async fn is_server_healthy(&self, server_name: &str) -> bool {
        self.health_monitor.is_healthy(server_name).await
    }

    pub async fn shutdown_all(&self) {
        let clients = self.clients.read().await;
        for client in clients.values() {
            client.shutdown().await;
        }
    }
}

fn augment_with_context(arguments: &mut serde_json::Value, context: &ToolCallContext) {
    if !arguments.is_object() {
        return;
    }
    let obj = arguments.as_object_mut().unwrap();
    if let Some(id) = &context.conversation_id {
        obj.entry("conversation_id").or_insert_with(|| serde_json::Value::String(id.clone()));
    }
    if let Some(base) = &context.api_base {
        obj.entry("api_base").or_insert_with(|| serde_json::Value::String(base.clone()));
    }
    if let Some(token) = &context.auth_token {
        obj.entry("auth_token").or_insert_with(|| serde_json::Value::String(token.clone()));
    }
}

impl Default for McpManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mcp_manager_creation() {
        let manager = McpManager::new();
        assert_eq!(manager.server_count().await, 0);
    }

    #[tokio::test]
    async fn test_unknown_wire_name_is_unknown_tool_error() {
        let manager = McpManager::new();
        let result = manager
            .call_tool("nope-nothing", serde_json::json!({}), &ToolCallContext::default())
            .await;
        assert!(matches!(result, Err(McpError::UnknownTool { .. })));
    }

    #[test]
    fn test_augment_with_context_only_fills_missing_keys() {
        let mut args = serde_json::json!({ "conversation_id": "existing" });
        let context = ToolCallContext {
            conversation_id: Some("new".to_string()),
            api_base: Some("https://api.example.com".to_string()),
            auth_token: None,
        };
        augment_with_context(&mut args, &context);
        assert_eq!(args["conversation_id"], "existing");
        assert_eq!(args["api_base"], "https://api.example.com");
        assert!(args.get("auth_token").is_none());
    }
}
