// src/orchestrator/loop_.rs
// The Sequential Thinking Loop: the central algorithm that drives a provider
// through bounded reasoning rounds, dispatches tool calls through the MCP
// Manager, folds results back into the conversation, and compels a final
// `response_formatter` call. Grounded on the round-loop shape of the
// teacher's `operations/engine/gpt5_orchestrator.rs` (iterate, call
// provider, break on no tool calls, execute tools with synthetic-error
// recovery, fold results back), generalized to a provider-agnostic
// `ToolAdapter`/`McpManager` pair and a mandatory final structured reply.

use std::time::Duration;

use serde_json::Value;
use tokio::io::AsyncWrite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::LoopConfig;
use crate::error::{FormatError, OrchestratorError, OrchestratorResult};
use crate::llm::adapter::ToolAdapter;
use crate::llm::formatter::{response_formatter_schema, FormatterAdapter, RESPONSE_FORMATTER_TOOL_NAME};
use crate::llm::message::ConversationMessage;
use crate::llm::provider::{ProviderClient, ProviderReply, ToolChoice};
use crate::llm::{Artifact, StoreFormat};
use crate::mcp::{McpManager, McpTool, ToolCallContext, ToolFilter};

use super::artifacts::{attach, SideChannel};
use super::status::StatusStreamer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Normal,
    Graph,
}

impl Mode {
    fn system_preamble(&self) -> &'static str {
        match self {
            Mode::Normal => {
                "You are an orchestration assistant that answers the user's request, calling \
                 tools as needed and delivering your final answer through the \
                 `response_formatter` tool."
            }
            Mode::Graph => {
                "You are an orchestration assistant operating in graph-building mode: prefer \
                 tools that extract structured entities and relationships, and surface any \
                 knowledge-graph artifacts they return. Deliver your final answer through the \
                 `response_formatter` tool."
            }
        }
    }
}

pub struct LoopInputs {
    pub message: String,
    pub history: Vec<ConversationMessage>,
    pub pinned_artifacts: Vec<Artifact>,
    pub mode: Mode,
    pub tool_filter: ToolFilter,
    pub tool_context: ToolCallContext,
}

/// Drives one request's worth of reasoning rounds. Borrows the provider and
/// tool adapter for the duration of the call; the MCP Manager is shared
/// across requests via `Arc`.
pub struct SequentialThinkingLoop<'a> {
    provider: &'a dyn ProviderClient,
    tool_adapter: &'a dyn ToolAdapter,
    manager: &'a McpManager,
    config: &'a LoopConfig,
}

impl<'a> SequentialThinkingLoop<'a> {
    pub fn new(
        provider: &'a dyn ProviderClient,
        tool_adapter: &'a dyn ToolAdapter,
        manager: &'a McpManager,
        config: &'a LoopConfig,
    ) -> Self {
        Self { provider, tool_adapter, manager, config }
    }

    pub async fn run<W: AsyncWrite + Unpin + Send>(
        &self,
        inputs: LoopInputs,
        status: &StatusStreamer<W>,
        cancel: &CancellationToken,
    ) -> OrchestratorResult<StoreFormat> {
        let available = self.manager.available_tools(&inputs.tool_filter).await;
        let provider_tools = self.build_provider_tool_list(&available);

        let system_prompt = build_system_prompt(inputs.mode, &inputs.pinned_artifacts);
        let mut messages = inputs.history;
        messages.push(ConversationMessage::user(inputs.message));

        let mut side = SideChannel::default();
        let mut formatter_reply: Option<ProviderReply> = None;

        for round in 1..=self.config.max_rounds {
            if cancel.is_cancelled() {
                return Err(OrchestratorError::Cancelled);
            }

            let tool_choice = if round == self.config.max_rounds {
                ToolChoice::Forced(RESPONSE_FORMATTER_TOOL_NAME)
            } else {
                ToolChoice::Auto
            };

            debug!("[LOOP] round {}/{}", round, self.config.max_rounds);
            let reply = self
                .provider
                .complete(&messages, &system_prompt, &provider_tools, tool_choice)
                .await
                .map_err(|e| OrchestratorError::Transport(e.to_string()))?;

            let calls = self.tool_adapter.extract_tool_calls(&reply);
            if calls.iter().any(|c| c.wire_name == RESPONSE_FORMATTER_TOOL_NAME) {
                formatter_reply = Some(reply);
                break;
            }
            if calls.is_empty() {
                info!("[LOOP] round {} produced no tool calls, ending early", round);
                break;
            }

            messages.push(self.tool_adapter.assistant_message_for_tool_calls(&reply, &calls));

            let mut results = Vec::with_capacity(calls.len());
            for call in &calls {
                if cancel.is_cancelled() {
                    return Err(OrchestratorError::Cancelled);
                }
                status.emit(format!("calling {}", call.wire_name)).await;

                let timeout = Duration::from_millis(self.config.tool_call_timeout_ms);
                let outcome =
                    tokio::time::timeout(timeout, self.manager.call_tool(&call.wire_name, call.arguments.clone(), &inputs.tool_context))
                        .await;

                match outcome {
                    Ok(Ok(tool_result)) => {
                        let text = tool_result
                            .content
                            .iter()
                            .filter_map(|c| c.text.clone())
                            .collect::<Vec<_>>()
                            .join("\n");
                        for entry in &tool_result.bibliography {
                            side.add_bibliography_entry(entry.clone());
                        }
                        side.direct_artifacts.extend(tool_result.artifacts.iter().cloned());
                        side.binary_outputs.extend(tool_result.binary_output.iter().cloned());
                        if let Some(kg) = tool_result.artifacts.iter().find(|a| {
                            a.get("kind").and_then(|k| k.as_str()) == Some("knowledge-graph")
                        }) {
                            if let Some(graph) = parse_knowledge_graph(kg) {
                                side.knowledge_graph.merge(graph);
                            }
                        }
                        results.push((call.id.clone(), tool_result.is_error, text));
                    }
                    Ok(Err(mcp_err)) => {
                        warn!("[LOOP] tool call '{}' failed: {}", call.wire_name, mcp_err);
                        results.push((call.id.clone(), true, format!("tool call failed: {mcp_err}")));
                    }
                    Err(_elapsed) => {
                        warn!("[LOOP] tool call '{}' timed out", call.wire_name);
                        results.push((
                            call.id.clone(),
                            true,
                            format!("tool call timed out after {}ms", self.config.tool_call_timeout_ms),
                        ));
                    }
                }
            }
            messages.extend(self.tool_adapter.format_tool_results(&results));
        }

        let store_format = self.extract_final(formatter_reply, &mut messages, &provider_tools, &system_prompt).await?;
        Ok(attach(store_format, side))
    }

    fn build_provider_tool_list(&self, available: &[(String, McpTool)]) -> Vec<Value> {
        let formatter_schema = response_formatter_schema();
        let formatter_tool = (
            RESPONSE_FORMATTER_TOOL_NAME.to_string(),
            McpTool {
                name: RESPONSE_FORMATTER_TOOL_NAME.to_string(),
                description: formatter_schema["description"].as_str().map(|s| s.to_string()),
                input_schema: formatter_schema.get("input_schema").cloned(),
            },
        );
        let mut all: Vec<(String, McpTool)> = available.to_vec();
        all.push(formatter_tool);
        self.tool_adapter.to_provider_tools(&all)
    }

    async fn extract_final(
        &self,
        formatter_reply: Option<ProviderReply>,
        messages: &mut Vec<ConversationMessage>,
        provider_tools: &[Value],
        system_prompt: &str,
    ) -> OrchestratorResult<StoreFormat> {
        let formatter_adapter = FormatterAdapter::new(self.tool_adapter);
        let mut pending_reply = formatter_reply;
        let mut last_error = String::new();
        let attempts = self.config.max_retries + 1;

        for attempt in 1..=attempts {
            if attempt > 1 {
                tokio::time::sleep(self.config.backoff_for_attempt(attempt - 1)).await;
            }
            let reply = match pending_reply.take() {
                Some(r) => r,
                None => self
                    .provider
                    .complete(messages.as_slice(), system_prompt, provider_tools, ToolChoice::Forced(RESPONSE_FORMATTER_TOOL_NAME))
                    .await
                    .map_err(|e| OrchestratorError::Transport(e.to_string()))?,
            };
            match formatter_adapter.extract(&reply) {
                Ok(store_format) => return Ok(store_format),
                Err(e) => {
                    warn!("[LOOP] formatter extraction failed on attempt {}: {}", attempt, e);
                    last_error = e.to_string();
                }
            }
        }

        Err(OrchestratorError::Format(FormatError::RetriesExhausted { attempts, last_error }))
    }
}

fn build_system_prompt(mode: Mode, pinned_artifacts: &[Artifact]) -> String {
    let mut prompt = String::from(mode.system_preamble());
    if !pinned_artifacts.is_empty() {
        prompt.push_str("\n\n## Pinned context\n");
        for artifact in pinned_artifacts {
            prompt.push_str(&format!(
                "### {} ({})\n{}\n\n",
                artifact.title,
                artifact.kind.as_wire_str(),
                artifact.content
            ));
        }
    }
    prompt.push_str(
        "\n\nWhen you are done reasoning and calling tools, call `response_formatter` exactly \
         once with your final answer as a non-empty `conversation` list of text/artifact \
         segments.",
    );
    prompt
}

fn parse_knowledge_graph(value: &Value) -> Option<super::artifacts::KnowledgeGraph> {
    let mut graph = super::artifacts::KnowledgeGraph::default();
    for node in value.get("nodes")?.as_array()? {
        let id = node.get("id")?.as_str()?.to_string();
        graph.nodes.insert(id, node.clone());
    }
    for edge in value.get("edges")?.as_array()? {
        let source_id = edge.get("source_id")?.as_str()?.to_string();
        let target_id = edge.get("target_id")?.as_str()?.to_string();
        let label = edge.get("label")?.as_str()?.to_string();
        let evidence = edge
            .get("evidence")
            .and_then(|v| v.as_array())
            .map(|arr| arr.iter().filter_map(|v| v.as_str().map(String::from)).collect())
            .unwrap_or_default();
        graph.edges.insert(
            (source_id.clone(), target_id.clone(), label.clone()),
            super::artifacts::Edge { source_id, target_id, label, evidence },
        );
    }
    Some(graph)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::adapter::ExtractedToolCall;
    use crate::llm::provider::TokenUsage;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    struct EchoToolAdapter;
    impl ToolAdapter for EchoToolAdapter {
        fn provider_name(&self) -> &'static str {
            "echo"
        }
        fn to_provider_tools(&self, tools: &[(String, McpTool)]) -> Vec<Value> {
            tools.iter().map(|(name, _)| serde_json::json!({"name": name})).collect()
        }
        fn extract_tool_calls(&self, reply: &ProviderReply) -> Vec<ExtractedToolCall> {
            reply.raw["calls"]
                .as_array()
                .map(|arr| {
                    arr.iter()
                        .map(|c| ExtractedToolCall {
                            id: c["id"].as_str().unwrap().to_string(),
                            wire_name: c["wire_name"].as_str().unwrap().to_string(),
                            arguments: c["arguments"].clone(),
                        })
                        .collect()
                })
                .unwrap_or_default()
        }
        fn assistant_message_for_tool_calls(
            &self,
            _reply: &ProviderReply,
            _calls: &[ExtractedToolCall],
        ) -> ConversationMessage {
            ConversationMessage::assistant_text("")
        }
        fn format_tool_results(&self, results: &[(String, bool, String)]) -> Vec<ConversationMessage> {
            results.iter().map(|(id, err, content)| ConversationMessage::tool_result(id.clone(), content.clone(), *err)).collect()
        }
    }

    struct ScriptedProvider {
        replies: StdMutex<Vec<Value>>,
        calls_made: AtomicUsize,
    }

    #[async_trait]
    impl ProviderClient for ScriptedProvider {
        fn name(&self) -> &'static str {
            "scripted"
        }
        async fn complete(
            &self,
            _messages: &[ConversationMessage],
            _system_prompt: &str,
            _tools: &[Value],
            _tool_choice: ToolChoice,
        ) -> anyhow::Result<ProviderReply> {
            self.calls_made.fetch_add(1, Ordering::SeqCst);
            let mut replies = self.replies.lock().unwrap();
            let raw = if replies.is_empty() { serde_json::json!({"calls": []}) } else { replies.remove(0) };
            Ok(ProviderReply { text: None, raw, tokens: TokenUsage::default() })
        }
    }

    fn formatter_call_reply() -> Value {
        serde_json::json!({
            "calls": [{
                "id": "call_f",
                "wire_name": RESPONSE_FORMATTER_TOOL_NAME,
                "arguments": {"conversation": [{"type": "text", "content": "All done"}]}
            }]
        })
    }

    #[tokio::test]
    async fn completes_when_formatter_called_on_first_round() {
        let provider = ScriptedProvider {
            replies: StdMutex::new(vec![formatter_call_reply()]),
            calls_made: AtomicUsize::new(0),
        };
        let adapter = EchoToolAdapter;
        let manager = McpManager::new();
        let config = LoopConfig {
            max_rounds: 5,
            max_retries: 2,
            retry_backoff_ms: 10,
            retry_backoff_cap_ms: 40,
            tool_call_timeout_ms: 1000,
        };
        let loop_ = SequentialThinkingLoop::new(&provider, &adapter, &manager, &config);
        let (client, _server) = tokio::io::duplex(4096);
        let status = StatusStreamer::new(client);
        let inputs = LoopInputs {
            message: "hello".to_string(),
            history: Vec::new(),
            pinned_artifacts: Vec::new(),
            mode: Mode::Normal,
            tool_filter: ToolFilter::default(),
            tool_context: ToolCallContext::default(),
        };
        let result = loop_.run(inputs, &status, &CancellationToken::new()).await.unwrap();
        assert_eq!(result.conversation.len(), 1);
        assert_eq!(provider.calls_made.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn forces_extra_turn_when_no_formatter_call_in_loop() {
        let provider = ScriptedProvider {
            replies: StdMutex::new(vec![serde_json::json!({"calls": []}), formatter_call_reply()]),
            calls_made: AtomicUsize::new(0),
        };
        let adapter = EchoToolAdapter;
        let manager = McpManager::new();
        let config = LoopConfig {
            max_rounds: 5,
            max_retries: 2,
            retry_backoff_ms: 10,
            retry_backoff_cap_ms: 40,
            tool_call_timeout_ms: 1000,
        };
        let loop_ = SequentialThinkingLoop::new(&provider, &adapter, &manager, &config);
        let (client, _server) = tokio::io::duplex(4096);
        let status = StatusStreamer::new(client);
        let inputs = LoopInputs {
            message: "hello".to_string(),
            history: Vec::new(),
            pinned_artifacts: Vec::new(),
            mode: Mode::Normal,
            tool_filter: ToolFilter::default(),
            tool_context: ToolCallContext::default(),
        };
        let result = loop_.run(inputs, &status, &CancellationToken::new()).await.unwrap();
        assert_eq!(result.conversation.len(), 1);
        assert_eq!(provider.calls_made.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn cancellation_before_first_round_short_circuits() {
        let provider = ScriptedProvider { replies: StdMutex::new(vec![]), calls_made: AtomicUsize::new(0) };
        let adapter = EchoToolAdapter;
        let manager = McpManager::new();
        let config = LoopConfig {
            max_rounds: 3,
            max_retries: 1,
            retry_backoff_ms: 10,
            retry_backoff_cap_ms: 20,
            tool_call_timeout_ms: 1000,
        };
        let loop_ = SequentialThinkingLoop::new(&provider, &adapter, &manager, &config);
        let (client, _server) = tokio::io::duplex(4096);
        let status = StatusStreamer::new(client);
        let inputs = LoopInputs {
            message: "hello".to_string(),
            history: Vec::new(),
            pinned_artifacts: Vec::new(),
            mode: Mode::Normal,
            tool_filter: ToolFilter::default(),
            tool_context: ToolCallContext::default(),
        };
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = loop_.run(inputs, &status, &cancel).await;
        assert!(matches!(result, Err(OrchestratorError::Cancelled)));
    }
}
