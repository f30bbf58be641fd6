// src/llm/message.rs
// Conversation message model. Generalizes the single flat `{role, content}`
// shape into a tagged content-block sequence, so tool_use/tool_result blocks
// survive round-tripping through every provider adapter uniformly.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    ToolUser,
    ToolResult,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    ToolUse { id: String, name: String, input: Value },
    ToolResult { tool_use_id: String, content: String, #[serde(default)] is_error: bool },
}

/// Either a bare string (the common case for plain user/assistant turns) or
/// an ordered sequence of content blocks (used whenever tool calls or tool
/// results are present).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl MessageContent {
    pub fn as_text(&self) -> String {
        match self {
            MessageContent::Text(s) => s.clone(),
            MessageContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::Text { text } => Some(text.clone()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    pub fn tool_use_blocks(&self) -> Vec<(&str, &str, &Value)> {
        match self {
            MessageContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::ToolUse { id, name, input } => {
                        Some((id.as_str(), name.as_str(), input))
                    }
                    _ => None,
                })
                .collect(),
            MessageContent::Text(_) => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub role: Role,
    pub content: MessageContent,
}

impl ConversationMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self { role: Role::User, content: MessageContent::Text(text.into()) }
    }

    pub fn assistant_text(text: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: MessageContent::Text(text.into()) }
    }

    pub fn assistant_with_tool_uses(text: Option<String>, tool_uses: Vec<ContentBlock>) -> Self {
        let mut blocks = Vec::new();
        if let Some(t) = text {
            if !t.is_empty() {
                blocks.push(ContentBlock::Text { text: t });
            }
        }
        blocks.extend(tool_uses);
        Self { role: Role::Assistant, content: MessageContent::Blocks(blocks) }
    }

    pub fn tool_result(tool_use_id: impl Into<String>, content: impl Into<String>, is_error: bool) -> Self {
        Self {
            role: Role::ToolResult,
            content: MessageContent::Blocks(vec![ContentBlock::ToolResult {
                tool_use_id: tool_use_id.into(),
                content: content.into(),
                is_error,
            }]),
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        // System prompts are carried as a normal user-role-adjacent message by
        // convention here; the HTTP/provider layer is responsible for routing
        // it to whatever channel a given provider expects (a `system` role, a
        // separate `system_instruction` field, etc).
        Self { role: Role::User, content: MessageContent::Text(text.into()) }
    }
}
