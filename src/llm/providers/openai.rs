// src/llm/providers/openai.rs
// OpenAI-style function calling: tools are {type:"function", function:{name,
// description, parameters}}, replies carry message.tool_calls[] with
// stringified JSON arguments, and a tool result is fed back as a dedicated
// "tool" role message keyed by tool_call_id.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::llm::adapter::{normalize_emitted_name, ExtractedToolCall, ToolAdapter};
use crate::llm::message::{ContentBlock, ConversationMessage, MessageContent, Role};
use crate::llm::provider::{ProviderClient, ProviderReply, TokenUsage, ToolChoice};
use crate::mcp::McpTool;

pub struct OpenAiAdapter;

impl ToolAdapter for OpenAiAdapter {
    fn provider_name(&self) -> &'static str {
        "openai"
    }

    fn to_provider_tools(&self, tools: &[(String, McpTool)]) -> Vec<Value> {
        tools
            .iter()
            .map(|(wire_name, tool)| {
                json!({
                    "type": "function",
                    "function": {
                        "name": wire_name,
                        "description": tool.description,
                        "parameters": tool.input_schema,
                    }
                })
            })
            .collect()
    }

    fn extract_tool_calls(&self, reply: &ProviderReply) -> Vec<ExtractedToolCall> {
        let Some(calls) = reply.raw["choices"][0]["message"]["tool_calls"].as_array() else {
            return Vec::new();
        };
        calls
            .iter()
            .filter_map(|call| {
                let id = call["id"].as_str()?.to_string();
                let name = call["function"]["name"].as_str()?;
                let arguments: Value = call["function"]["arguments"]
                    .as_str()
                    .and_then(|s| serde_json::from_str(s).ok())
                    .unwrap_or(Value::Null);
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
        results
            .iter()
            .map(|(call_id, is_error, content)| {
                ConversationMessage::tool_result(call_id.clone(), content.clone(), *is_error)
            })
            .collect()
    }
}

/// A thin default `ProviderClient` doing the real `reqwest` call to an
/// OpenAI-compatible `/chat/completions` endpoint. Schema shape and
/// extraction are fully owned by `OpenAiAdapter` above; this struct only
/// does request assembly and the network round trip.
pub struct OpenAiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }
}

fn to_openai_messages(system_prompt: &str, messages: &[ConversationMessage]) -> Vec<Value> {
    let mut out = vec![json!({"role": "system", "content": system_prompt})];
    for msg in messages {
        match &msg.content {
            MessageContent::Text(text) => {
                let role = match msg.role {
                    Role::User => "user",
                    Role::Assistant => "assistant",
                    Role::ToolUser | Role::ToolResult => "user",
                };
                out.push(json!({"role": role, "content": text}));
            }
            MessageContent::Blocks(blocks) => {
                let tool_calls: Vec<Value> = blocks
                    .iter()
                    .filter_map(|b| match b {
                        ContentBlock::ToolUse { id, name, input } => Some(json!({
                            "id": id,
                            "type": "function",
                            "function": {"name": name, "arguments": input.to_string()},
                        })),
                        _ => None,
                    })
                    .collect();
                let text: String = blocks
                    .iter()
                    .filter_map(|b| match b {
                        ContentBlock::Text { text } => Some(text.clone()),
                        _ => None,
                    })
                    .collect::<Vec<_>>()
                    .join("\n");
                if !tool_calls.is_empty() {
                    out.push(json!({"role": "assistant", "content": if text.is_empty() { Value::Null } else { json!(text) }, "tool_calls": tool_calls}));
                }
                for b in blocks {
                    if let ContentBlock::ToolResult { tool_use_id, content, .. } = b {
                        out.push(json!({"role": "tool", "tool_call_id": tool_use_id, "content": content}));
                    }
                }
                if tool_calls.is_empty() && !text.is_empty() {
                    out.push(json!({"role": "assistant", "content": text}));
                }
            }
        }
    }
    out
}

#[async_trait]
impl ProviderClient for OpenAiClient {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn complete(
        &self,
        messages: &[ConversationMessage],
        system_prompt: &str,
        tools: &[Value],
        tool_choice: ToolChoice,
    ) -> Result<ProviderReply> {
        let tool_choice_value = match tool_choice {
            ToolChoice::Auto => json!("auto"),
            ToolChoice::Forced(name) => json!({"type": "function", "function": {"name": name}}),
        };
        let mut body = json!({
            "model": self.model,
            "messages": to_openai_messages(system_prompt, messages),
        });
        if !tools.is_empty() {
            body["tools"] = json!(tools);
            body["tool_choice"] = tool_choice_value;
        }

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("openai request failed")?
            .error_for_status()
            .context("openai returned an error status")?;

        let raw: Value = response.json().await.context("openai response was not valid JSON")?;
        let text = raw["choices"][0]["message"]["content"].as_str().map(|s| s.to_string());
        let tokens = TokenUsage {
            input: raw["usage"]["prompt_tokens"].as_i64().unwrap_or(0),
            output: raw["usage"]["completion_tokens"].as_i64().unwrap_or(0),
            reasoning: raw["usage"]["completion_tokens_details"]["reasoning_tokens"].as_i64().unwrap_or(0),
        };
        Ok(ProviderReply { text, raw, tokens })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::provider::TokenUsage;

    #[test]
    fn extracts_tool_calls_with_stringified_arguments() {
        let reply = ProviderReply {
            text: None,
            raw: json!({
                "choices": [{
                    "message": {
                        "content": null,
                        "tool_calls": [{
                            "id": "call_1",
                            "function": {"name": "filesystem-read_file", "arguments": "{\"path\":\"a.rs\"}"}
                        }]
                    }
                }]
            }),
            tokens: TokenUsage::default(),
        };
        let adapter = OpenAiAdapter;
        let calls = adapter.extract_tool_calls(&reply);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].wire_name, "filesystem-read_file");
        assert_eq!(calls[0].arguments["path"], "a.rs");
    }

    #[test]
    fn no_tool_calls_field_yields_empty() {
        let reply = ProviderReply {
            text: Some("hi".to_string()),
            raw: json!({"choices": [{"message": {"content": "hi"}}]}),
            tokens: TokenUsage::default(),
        };
        assert!(!OpenAiAdapter.has_tool_calls(&reply));
    }

    #[test]
    fn message_conversion_keys_tool_results_by_call_id() {
        let messages = vec![ConversationMessage::tool_result("call_1", "ok", false)];
        let out = to_openai_messages("sys", &messages);
        assert_eq!(out[0]["role"], "system");
        assert_eq!(out[1]["role"], "tool");
        assert_eq!(out[1]["tool_call_id"], "call_1");
    }
}
