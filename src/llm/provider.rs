// src/llm/provider.rs
// The seam between the orchestration core and an upstream LLM's HTTP API.
// Schema translation, tool-call extraction and response-formatter handling
// are implemented completely here; the actual network call is behind a
// trait so a collaborator can supply production HTTP plumbing without the
// core depending on any one provider's wire format.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::message::ConversationMessage;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input: i64,
    pub output: i64,
    pub reasoning: i64,
}

/// A provider turn's raw reply, before tool-call extraction. `raw` retains
/// the untouched provider payload so a `ToolAdapter` can apply
/// provider-specific extraction rules.
#[derive(Debug, Clone)]
pub struct ProviderReply {
    pub text: Option<String>,
    pub raw: Value,
    pub tokens: TokenUsage,
}

/// Whether the final round should force a call to `response_formatter`, or
/// leave tool choice free.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolChoice {
    Auto,
    Forced(&'static str),
}

/// A single completion turn against an upstream LLM. Implementors own the
/// real `reqwest` call; everything about schema shape and extraction lives
/// in the paired `ToolAdapter`.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    fn name(&self) -> &'static str;

    async fn complete(
        &self,
        messages: &[ConversationMessage],
        system_prompt: &str,
        tools: &[Value],
        tool_choice: ToolChoice,
    ) -> Result<ProviderReply>;
}
