// src/api/state.rs
// Shared application state handed to every route. Holds the loaded config
// and the MCP Manager supervising every configured child server; both are
// read-mostly for the life of the process so a plain `Arc` suffices; neither
// field is mutated after construction.

use std::sync::Arc;

use crate::config::Config;
use crate::mcp::McpManager;

pub struct AppState {
    pub config: Arc<Config>,
    pub manager: Arc<McpManager>,
}
