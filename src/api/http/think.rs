// src/api/http/think.rs
// POST /v1/think - runs one Sequential Thinking Loop request to completion,
// streaming ndjson status lines as the loop executes tools and finishing
// with exactly one `result` or `error` line. Bridges the locally-driven
// `StatusStreamer` to an axum streaming response body over a duplex pipe.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tracing::error;

use crate::error::OrchestratorError;
use crate::llm::message::ConversationMessage;
use crate::llm::providers::{AnthropicAdapter, AnthropicClient, GeminiAdapter, GeminiClient, OpenAiAdapter, OpenAiClient};
use crate::llm::{Artifact, ProviderClient, ToolAdapter};
use crate::mcp::{ToolCallContext, ToolFilter};
use crate::orchestrator::{LoopInputs, Mode, SequentialThinkingLoop, StatusStreamer};

use crate::api::state::AppState;

#[derive(Debug, Deserialize)]
pub struct HistoryTurn {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct PinnedArtifactInput {
    pub kind: String,
    pub title: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ThinkRequest {
    pub message: String,
    pub history: Vec<HistoryTurn>,
    pub pinned_artifacts: Vec<PinnedArtifactInput>,
    pub blocked_servers: Vec<String>,
    pub allowed_tools: Option<Vec<String>>,
    pub mode: String,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub conversation_id: Option<String>,
}

impl Default for ThinkRequest {
    fn default() -> Self {
        Self {
            message: String::new(),
            history: Vec::new(),
            pinned_artifacts: Vec::new(),
            blocked_servers: Vec::new(),
            allowed_tools: None,
            mode: "normal".to_string(),
            provider: None,
            model: None,
            conversation_id: None,
        }
    }
}

fn history_to_messages(history: Vec<HistoryTurn>) -> Vec<ConversationMessage> {
    history
        .into_iter()
        .map(|turn| match turn.role.as_str() {
            "assistant" => ConversationMessage::assistant_text(turn.content),
            _ => ConversationMessage::user(turn.content),
        })
        .collect()
}

fn pinned_to_artifacts(pinned: Vec<PinnedArtifactInput>) -> Vec<Artifact> {
    pinned
        .into_iter()
        .enumerate()
        .map(|(i, p)| {
            let kind = crate::llm::formatter::normalize_kind(&p.kind);
            Artifact::new(kind, p.title, p.content, i)
        })
        .collect()
}

/// Resolves the requested provider name (or the configured default) to a
/// concrete `(ProviderClient, ToolAdapter)` pair. Boxed as trait objects so
/// the loop can treat every provider interchangeably.
fn build_provider(
    name: &str,
    providers: &crate::config::provider::ProviderConfig,
    model_override: Option<&str>,
) -> anyhow::Result<(Box<dyn ProviderClient>, Box<dyn ToolAdapter>)> {
    match name {
        "openai" => {
            let settings = &providers.openai;
            if !settings.enabled {
                anyhow::bail!("openai provider is not configured (OPENAI_API_KEY missing)");
            }
            let model = model_override.unwrap_or(&settings.model);
            let client = OpenAiClient::new(settings.base_url.clone(), settings.api_key.clone(), model);
            Ok((Box::new(client), Box::new(OpenAiAdapter)))
        }
        "anthropic" => {
            let settings = &providers.anthropic;
            if !settings.enabled {
                anyhow::bail!("anthropic provider is not configured (ANTHROPIC_API_KEY missing)");
            }
            let model = model_override.unwrap_or(&settings.model);
            let client = AnthropicClient::new(settings.base_url.clone(), settings.api_key.clone(), model);
            Ok((Box::new(client), Box::new(AnthropicAdapter)))
        }
        "gemini" => {
            let settings = &providers.gemini;
            if !settings.enabled {
                anyhow::bail!("gemini provider is not configured (GOOGLE_API_KEY missing)");
            }
            let model = model_override.unwrap_or(&settings.model);
            let client = GeminiClient::new(settings.base_url.clone(), settings.api_key.clone(), model);
            Ok((Box::new(client), Box::new(GeminiAdapter)))
        }
        other => anyhow::bail!("unknown provider '{other}'"),
    }
}

async fn run_think(
    state: Arc<AppState>,
    req: ThinkRequest,
    streamer: &StatusStreamer<tokio::io::DuplexStream>,
    cancel: &CancellationToken,
) -> Result<crate::llm::StoreFormat, OrchestratorError> {
    let provider_name = req
        .provider
        .clone()
        .unwrap_or_else(|| state.config.providers.default_provider.clone());
    let (provider, adapter) = build_provider(&provider_name, &state.config.providers, req.model.as_deref())
        .map_err(|e| OrchestratorError::internal(e.to_string()))?;

    let mode = if req.mode == "graph" { Mode::Graph } else { Mode::Normal };
    let tool_filter = ToolFilter { blocked_servers: req.blocked_servers.clone(), allowed_tools: req.allowed_tools.clone() };
    let tool_context = ToolCallContext {
        conversation_id: req.conversation_id.clone(),
        api_base: None,
        auth_token: None,
    };

    let inputs = LoopInputs {
        message: req.message,
        history: history_to_messages(req.history),
        pinned_artifacts: pinned_to_artifacts(req.pinned_artifacts),
        mode,
        tool_filter,
        tool_context,
    };

    let loop_runner = SequentialThinkingLoop::new(provider.as_ref(), adapter.as_ref(), &state.manager, &state.config.r#loop);
    loop_runner.run(inputs, streamer, cancel).await
}

pub async fn think_handler(State(state): State<Arc<AppState>>, Json(req): Json<ThinkRequest>) -> Response {
    let (client, server) = tokio::io::duplex(64 * 1024);
    let cancel = CancellationToken::new();

    tokio::spawn(async move {
        let streamer = StatusStreamer::with_cancellation(client, cancel.clone());
        match run_think(state, req, &streamer, &cancel).await {
            Ok(store_format) => streamer.result(&store_format).await,
            Err(err) => {
                error!(error = %err, "[ORCHESTRATOR] request failed");
                streamer.error(&err).await;
            }
        }
    });

    let body = Body::from_stream(ReaderStream::new(server));
    (StatusCode::OK, [(header::CONTENT_TYPE, "application/x-ndjson")], body).into_response()
}
