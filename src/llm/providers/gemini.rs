// src/llm/providers/gemini.rs
// Gemini-style function calling: tools are wrapped in a single
// {function_declarations: [...]} entry, replies carry a `candidates[0]
// .content.parts[]` array where a part can hold either `text` or
// `functionCall: {name, args}`, and results are echoed back as a
// `functionResponse` part. Gemini never assigns its own call id, so one is
// synthesized here.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::llm::adapter::{normalize_emitted_name, ExtractedToolCall, ToolAdapter};
use crate::llm::message::{ContentBlock, ConversationMessage, MessageContent, Role};
use crate::llm::provider::{ProviderClient, ProviderReply, TokenUsage, ToolChoice};
use crate::mcp::McpTool;

pub struct GeminiAdapter;

impl ToolAdapter for GeminiAdapter {
    fn provider_name(&self) -> &'static str {
        "gemini"
    }

    fn to_provider_tools(&self, tools: &[(String, McpTool)]) -> Vec<Value> {
        if tools.is_empty() {
            return Vec::new();
        }
        let declarations: Vec<Value> = tools
            .iter()
            .map(|(wire_name, tool)| {
                json!({
                    "name": wire_name,
                    "description": tool.description,
                    "parameters": tool.input_schema,
                })
            })
            .collect();
        vec![json!({ "functionDeclarations": declarations })]
    }

    fn extract_tool_calls(&self, reply: &ProviderReply) -> Vec<ExtractedToolCall> {
        let Some(parts) = reply.raw["candidates"][0]["content"]["parts"].as_array() else {
            return Vec::new();
        };
        parts
            .iter()
            .filter_map(|part| {
                let fc = part.get("functionCall")?;
                let name = fc["name"].as_str()?;
                let arguments = fc["args"].clone();
                let id = format!("call_{}", Uuid::new_v4());
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

/// A thin default `ProviderClient` against the Gemini `generateContent`
/// endpoint. Schema shape and extraction belong to `GeminiAdapter`; this
/// owns request assembly and the `reqwest` round trip only.
pub struct GeminiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl GeminiClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }
}

fn to_gemini_contents(messages: &[ConversationMessage]) -> Vec<Value> {
    messages
        .iter()
        .filter_map(|msg| match (&msg.role, &msg.content) {
            (Role::User, MessageContent::Text(text)) => {
                Some(json!({"role": "user", "parts": [{"text": text}]}))
            }
            (Role::Assistant, MessageContent::Text(text)) => {
                Some(json!({"role": "model", "parts": [{"text": text}]}))
            }
            (Role::Assistant, MessageContent::Blocks(blocks)) => {
                let parts: Vec<Value> = blocks
                    .iter()
                    .map(|b| match b {
                        ContentBlock::Text { text } => json!({"text": text}),
                        ContentBlock::ToolUse { name, input, .. } => {
                            json!({"functionCall": {"name": name, "args": input}})
                        }
                        ContentBlock::ToolResult { tool_use_id, content, .. } => {
                            json!({"functionResponse": {"name": tool_use_id, "response": {"content": content}}})
                        }
                    })
                    .collect();
                Some(json!({"role": "model", "parts": parts}))
            }
            (Role::ToolUser | Role::ToolResult, MessageContent::Blocks(blocks)) => {
                let parts: Vec<Value> = blocks
                    .iter()
                    .filter_map(|b| match b {
                        ContentBlock::ToolResult { tool_use_id, content, .. } => Some(json!({
                            "functionResponse": {"name": tool_use_id, "response": {"content": content}},
                        })),
                        _ => None,
                    })
                    .collect();
                Some(json!({"role": "user", "parts": parts}))
            }
            (_, MessageContent::Text(text)) => Some(json!({"role": "user", "parts": [{"text": text}]})),
        })
        .collect()
}

#[async_trait]
impl ProviderClient for GeminiClient {
    fn name(&self) -> &'static str {
        "gemini"
    }

    async fn complete(
        &self,
        messages: &[ConversationMessage],
        system_prompt: &str,
        tools: &[Value],
        tool_choice: ToolChoice,
    ) -> Result<ProviderReply> {
        let mut body = json!({
            "systemInstruction": {"parts": [{"text": system_prompt}]},
            "contents": to_gemini_contents(messages),
        });
        if !tools.is_empty() {
            body["tools"] = json!(tools);
            body["toolConfig"] = match tool_choice {
                ToolChoice::Auto => json!({"functionCallingConfig": {"mode": "AUTO"}}),
                ToolChoice::Forced(name) => json!({
                    "functionCallingConfig": {"mode": "ANY", "allowedFunctionNames": [name]}
                }),
            };
        }

        let response = self
            .http
            .post(format!(
                "{}/v1beta/models/{}:generateContent?key={}",
                self.base_url, self.model, self.api_key
            ))
            .json(&body)
            .send()
            .await
            .context("gemini request failed")?
            .error_for_status()
            .context("gemini returned an error status")?;

        let raw: Value = response.json().await.context("gemini response was not valid JSON")?;
        let text = raw["candidates"][0]["content"]["parts"]
            .as_array()
            .and_then(|parts| parts.iter().find_map(|p| p["text"].as_str()))
            .map(|s| s.to_string());
        let tokens = TokenUsage {
            input: raw["usageMetadata"]["promptTokenCount"].as_i64().unwrap_or(0),
            output: raw["usageMetadata"]["candidatesTokenCount"].as_i64().unwrap_or(0),
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
    fn extracts_function_call_parts_and_synthesizes_ids() {
        let reply = ProviderReply {
            text: None,
            raw: json!({
                "candidates": [{
                    "content": {
                        "parts": [
                            {"functionCall": {"name": "filesystem.read_file", "args": {"path": "a.rs"}}}
                        ]
                    }
                }]
            }),
            tokens: TokenUsage::default(),
        };
        let calls = GeminiAdapter.extract_tool_calls(&reply);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].wire_name, "filesystem-read_file");
        assert!(calls[0].id.starts_with("call_"));
    }

    #[test]
    fn text_only_reply_has_no_tool_calls() {
        let reply = ProviderReply {
            text: Some("hi".to_string()),
            raw: json!({"candidates": [{"content": {"parts": [{"text": "hi"}]}}]}),
            tokens: TokenUsage::default(),
        };
        assert!(!GeminiAdapter.has_tool_calls(&reply));
    }

    #[test]
    fn message_conversion_emits_function_response_part() {
        let results = vec![("call_1".to_string(), false, "ok".to_string())];
        let messages = GeminiAdapter.format_tool_results(&results);
        let out = to_gemini_contents(&messages);
        assert_eq!(out[0]["role"], "user");
        assert_eq!(out[0]["parts"][0]["functionResponse"]["name"], "call_1");
    }
}
