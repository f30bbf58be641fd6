// src/llm/providers/anthropic.rs
// Anthropic-style tool use: tools are {name, description, input_schema},
// replies carry a `content` array of blocks where `tool_use` blocks name the
// call, and results are fed back as a user-turn `tool_result` block keyed by
// `tool_use_id`. This is the wire format `ContentBlock` in message.rs already
// mirrors, so translation here is close to the identity mapping.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::llm::adapter::{normalize_emitted_name, ExtractedToolCall, ToolAdapter};
use crate::llm::message::{ContentBlock, ConversationMessage, MessageContent, Role};
use crate::llm::provider::{ProviderClient, ProviderReply, TokenUsage, ToolChoice};
use crate::mcp::McpTool;

pub struct AnthropicAdapter;

impl ToolAdapter for AnthropicAdapter {
    fn provider_name(&self) -> &'static str {
        "anthropic"
    }

    fn to_provider_tools(&self, tools: &[(String, McpTool)]) -> Vec<Value> {
        tools
            .iter()
            .map(|(wire_name, tool)| {
                json!({
                    "name": wire_name,
                    "description": tool.description,
                    "input_schema": tool.input_schema,
                })
            })
            .collect()
    }

    fn extract_tool_calls(&self, reply: &ProviderReply) -> Vec<ExtractedToolCall> {
        let Some(blocks) = reply.raw["content"].as_array() else {
            return Vec::new();
        };
        blocks
            .iter()
            .filter(|b| b["type"] == "tool_use")
            .filter_map(|b| {
                let id = b["id"].as_str()?.to_string();
                let name = b["name"].as_str()?;
                let arguments = b["input"].clone();
                Some(ExtractedToolCall { id, wire_name: normalize_emitted_name(name), arguments })
            })
            .collect()
    }

    fn assistant_message_for_tool_calls(
        &self,
        reply: &ProviderReply,
        calls: &[ExtractedToolCall],
    ) -> ConversationMessage {
        let blocks = calls
            .iter()
            .map(|c| ContentBlock::ToolUse {
                id: c.id.clone(),
                name: c.wire_name.clone(),
                input: c.arguments.clone(),
            })
            .collect();
        ConversationMessage::assistant_with_tool_uses(reply.text.clone(), blocks)
    }

    fn format_tool_results(&self, results: &[(String, bool, String)]) -> Vec<ConversationMessage> {
        // Anthropic expects every tool_result for a given assistant turn
        // bundled into a single user-role message; the loop only ever hands
        // us one round's worth at a time, so one message suffices here.
        let blocks = results
            .iter()
            .map(|(id, is_error, content)| ContentBlock::ToolResult {
                tool_use_id: id.clone(),
                content: content.clone(),
                is_error: *is_error,
            })
            .collect::<Vec<_>>();
        vec![ConversationMessage {
            role: crate::llm::message::Role::ToolResult,
            content: crate::llm::message::MessageContent::Blocks(blocks),
        }]
    }
}

/// A thin default `ProviderClient` against the Anthropic Messages API.
/// Schema shape and extraction belong to `AnthropicAdapter`; this owns
/// request assembly and the `reqwest` round trip only.
pub struct AnthropicClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
}

impl AnthropicClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            max_tokens: 4096,
        }
    }
}

fn to_anthropic_messages(messages: &[ConversationMessage]) -> Vec<Value> {
    messages
        .iter()
        .filter_map(|msg| match (&msg.role, &msg.content) {
            (Role::User, MessageContent::Text(text)) => Some(json!({"role": "user", "content": text})),
            (Role::Assistant, MessageContent::Text(text)) => Some(json!({"role": "assistant", "content": text})),
            (Role::Assistant, MessageContent::Blocks(blocks)) => {
                let content: Vec<Value> = blocks
                    .iter()
                    .map(|b| match b {
                        ContentBlock::Text { text } => json!({"type": "text", "text": text}),
                        ContentBlock::ToolUse { id, name, input } => {
                            json!({"type": "tool_use", "id": id, "name": name, "input": input})
                        }
                        ContentBlock::ToolResult { tool_use_id, content, is_error } => {
                            json!({"type": "tool_result", "tool_use_id": tool_use_id, "content": content, "is_error": is_error})
                        }
                    })
                    .collect();
                Some(json!({"role": "assistant", "content": content}))
            }
            (Role::ToolUser | Role::ToolResult, MessageContent::Blocks(blocks)) => {
                let content: Vec<Value> = blocks
                    .iter()
                    .filter_map(|b| match b {
                        ContentBlock::ToolResult { tool_use_id, content, is_error } => Some(json!({
                            "type": "tool_result",
                            "tool_use_id": tool_use_id,
                            "content": content,
                            "is_error": is_error,
                        })),
                        _ => None,
                    })
                    .collect();
                Some(json!({"role": "user", "content": content}))
            }
            (_, MessageContent::Text(text)) => Some(json!({"role": "user", "content": text})),
        })
        .collect()
}

#[async_trait]
impl ProviderClient for AnthropicClient {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    async fn complete(
        &self,
        messages: &[ConversationMessage],
        system_prompt: &str,
        tools: &[Value],
        tool_choice: ToolChoice,
    ) -> Result<ProviderReply> {
        let mut body = json!({
            "model": self.model,
            "system": system_prompt,
            "max_tokens": self.max_tokens,
            "messages": to_anthropic_messages(messages),
        });
        if !tools.is_empty() {
            body["tools"] = json!(tools);
            body["tool_choice"] = match tool_choice {
                ToolChoice::Auto => json!({"type": "auto"}),
                ToolChoice::Forced(name) => json!({"type": "tool", "name": name}),
            };
        }

        let response = self
            .http
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&body)
            .send()
            .await
            .context("anthropic request failed")?
            .error_for_status()
            .context("anthropic returned an error status")?;

        let raw: Value = response.json().await.context("anthropic response was not valid JSON")?;
        let text = raw["content"]
            .as_array()
            .and_then(|blocks| blocks.iter().find(|b| b["type"] == "text"))
            .and_then(|b| b["text"].as_str())
            .map(|s| s.to_string());
        let tokens = TokenUsage {
            input: raw["usage"]["input_tokens"].as_i64().unwrap_or(0),
            output: raw["usage"]["output_tokens"].as_i64().unwrap_or(0),
            reasoning: 0,
        };
        Ok(ProviderReply { text, raw, tokens })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::provider::TokenUsage;

    #[test]
    fn extracts_tool_use_blocks_only() {
        let reply = ProviderReply {
            text: Some("checking".to_string()),
            raw: json!({
                "content": [
                    {"type": "text", "text": "checking"},
                    {"type": "tool_use", "id": "toolu_1", "name": "git-diff", "input": {"path": "."}}
                ]
            }),
            tokens: TokenUsage::default(),
        };
        let calls = AnthropicAdapter.extract_tool_calls(&reply);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].wire_name, "git-diff");
        assert_eq!(calls[0].id, "toolu_1");
    }

    #[test]
    fn bundles_all_results_into_one_message() {
        let results = vec![
            ("toolu_1".to_string(), false, "ok".to_string()),
            ("toolu_2".to_string(), true, "boom".to_string()),
        ];
        let messages = AnthropicAdapter.format_tool_results(&results);
        assert_eq!(messages.len(), 1);
    }

    #[test]
    fn message_conversion_bundles_tool_results_into_user_turn() {
        let results = vec![("toolu_1".to_string(), false, "ok".to_string())];
        let messages = AnthropicAdapter.format_tool_results(&results);
        let out = to_anthropic_messages(&messages);
        assert_eq!(out[0]["role"], "user");
        assert_eq!(out[0]["content"][0]["type"], "tool_result");
        assert_eq!(out[0]["content"][0]["tool_use_id"], "toolu_1");
    }
}
