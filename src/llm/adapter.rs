// src/llm/adapter.rs
// The Tool Adapter seam: per-provider translation between the Manager's
// canonical tool catalog/wire names and whatever shape a given provider's
// function-calling API expects.

use serde_json::Value;

use super::message::ConversationMessage;
use super::provider::ProviderReply;
use crate::mcp::McpTool;

/// A tool call as extracted from a provider reply, already resolved back to
/// the Manager's wire-name namespace.
#[derive(Debug, Clone)]
pub struct ExtractedToolCall {
    pub id: String,
    pub wire_name: String,
    pub arguments: Value,
}

/// Translates between the Manager's tool catalog/canonical messages and one
/// provider's specific request/response shape. The Sequential Thinking Loop
/// treats every implementation interchangeably through this trait.
pub trait ToolAdapter: Send + Sync {
    fn provider_name(&self) -> &'static str;

    /// MCP tool catalog -> this provider's tool schema list.
    fn to_provider_tools(&self, tools: &[(String, McpTool)]) -> Vec<Value>;

    /// Does this reply carry at least one tool call (excluding the formatter)?
    fn has_tool_calls(&self, reply: &ProviderReply) -> bool {
        !self.extract_tool_calls(reply).is_empty()
    }

    /// Extract every tool call from a provider reply, reverse-resolving the
    /// provider's own namespacing convention (flat, dotted, or prefixed) back
    /// to a wire name understood by the Manager.
    fn extract_tool_calls(&self, reply: &ProviderReply) -> Vec<ExtractedToolCall>;

    /// Build the assistant-turn message that records the tool calls just
    /// extracted, so the conversation stays coherent for the next round.
    fn assistant_message_for_tool_calls(
        &self,
        reply: &ProviderReply,
        calls: &[ExtractedToolCall],
    ) -> ConversationMessage;

    /// Build the tool-result turn(s) carrying `(call_id, is_error, content)`
    /// tuples back to the provider.
    fn format_tool_results(&self, results: &[(String, bool, String)]) -> Vec<ConversationMessage>;
}

/// Normalize a provider-emitted tool label back to the Manager's wire-name
/// grammar, handling the flat (`server-tool`, already a wire name), dotted
/// (`server.tool`), and double-underscore-prefixed (`mcp__server__tool`)
/// conventions some providers insist on echoing back verbatim.
pub fn normalize_emitted_name(label: &str) -> String {
    if let Some(stripped) = label.strip_prefix("mcp__") {
        if let Some((server, tool)) = stripped.split_once("__") {
            return crate::mcp::wire_name(server, tool);
        }
    }
    if !label.contains('-') && label.contains('.') {
        if let Some((server, tool)) = label.split_once('.') {
            return crate::mcp::wire_name(server, tool);
        }
    }
    label.to_string()
}
