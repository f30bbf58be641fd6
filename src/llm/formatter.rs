// src/llm/formatter.rs
// The response-formatter contract: the canonical `StoreFormat` reply shape,
// the `response_formatter` tool schema that a provider is constrained to
// call on the final round, and the adapter that extracts/validates it.
// Extraction finds the tool call by name and parses its arguments as a
// typed struct; the struct shape and validation rules are this system's own.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{FormatError, FormatResult};
use crate::llm::adapter::ToolAdapter;
use crate::llm::provider::ProviderReply;

pub const RESPONSE_FORMATTER_TOOL_NAME: &str = "response_formatter";

/// The closed set of artifact kinds this system ever emits. `Image` carries
/// its media subtype (`image/png`, `image/svg+xml`, ...) since the wire form
/// is `image/<subtype>`, not a bare literal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactKind {
    TextMarkdown,
    Code,
    Image(String),
    KnowledgeGraph,
    Bibliography,
    Html,
    Svg,
    Mermaid,
    React,
    Binary,
}

impl ArtifactKind {
    pub fn as_wire_str(&self) -> String {
        match self {
            ArtifactKind::TextMarkdown => "text/markdown".to_string(),
            ArtifactKind::Code => "code".to_string(),
            ArtifactKind::Image(subtype) => format!("image/{subtype}"),
            ArtifactKind::KnowledgeGraph => "knowledge-graph".to_string(),
            ArtifactKind::Bibliography => "bibliography".to_string(),
            ArtifactKind::Html => "html".to_string(),
            ArtifactKind::Svg => "svg".to_string(),
            ArtifactKind::Mermaid => "mermaid".to_string(),
            ArtifactKind::React => "react".to_string(),
            ArtifactKind::Binary => "binary".to_string(),
        }
    }
}

impl Serialize for ArtifactKind {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.as_wire_str())
    }
}

impl<'de> Deserialize<'de> for ArtifactKind {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(if let Some(subtype) = s.strip_prefix("image/") {
            ArtifactKind::Image(subtype.to_string())
        } else {
            match s.as_str() {
                "text/markdown" => ArtifactKind::TextMarkdown,
                "code" => ArtifactKind::Code,
                "knowledge-graph" => ArtifactKind::KnowledgeGraph,
                "bibliography" => ArtifactKind::Bibliography,
                "html" => ArtifactKind::Html,
                "svg" => ArtifactKind::Svg,
                "mermaid" => ArtifactKind::Mermaid,
                "react" => ArtifactKind::React,
                "binary" => ArtifactKind::Binary,
                _ => ArtifactKind::TextMarkdown,
            }
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub id: String,
    pub kind: ArtifactKind,
    pub title: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    pub position: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl Artifact {
    pub fn new(kind: ArtifactKind, title: impl Into<String>, content: impl Into<String>, position: usize) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            title: title.into(),
            content: content.into(),
            language: None,
            position,
            metadata: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Segment {
    Text { content: String },
    Artifact { artifact_id: String, summary: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreFormat {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
    pub conversation: Vec<Segment>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<Artifact>,
}

impl StoreFormat {
    /// Every `artifact_id` referenced by a segment must resolve to an entry
    /// in `artifacts`, and `conversation` must never be empty.
    pub fn validate_invariants(&self) -> FormatResult<()> {
        if self.conversation.is_empty() {
            return Err(FormatError::InvalidShape("conversation must not be empty".to_string()));
        }
        for seg in &self.conversation {
            if let Segment::Artifact { artifact_id, .. } = seg {
                if !self.artifacts.iter().any(|a| &a.id == artifact_id) {
                    return Err(FormatError::InvalidShape(format!(
                        "segment references unknown artifact_id '{artifact_id}'"
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Raw shape accepted from the `response_formatter` tool call, before
/// artifacts (appended later by the aggregator) exist.
#[derive(Debug, Deserialize)]
struct RawFormatterArgs {
    #[serde(default)]
    thinking: Option<String>,
    conversation: Vec<RawSegment>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum RawSegment {
    Text { content: String },
    Artifact { artifact: RawInlineArtifact, #[serde(default)] summary: Option<String> },
}

#[derive(Debug, Deserialize)]
struct RawInlineArtifact {
    #[serde(default)]
    id: Option<String>,
    kind: String,
    title: String,
    content: String,
    #[serde(default)]
    language: Option<String>,
}

/// The JSON Schema for the `response_formatter` tool, handed to every
/// provider's `to_provider_tools`/tool list alongside the real tool catalog.
pub fn response_formatter_schema() -> Value {
    serde_json::json!({
        "name": RESPONSE_FORMATTER_TOOL_NAME,
        "description": "Deliver the final structured reply to the user. Must be called exactly once, on the last round.",
        "input_schema": {
            "type": "object",
            "properties": {
                "thinking": {"type": "string", "description": "Optional private reasoning summary, never shown verbatim to the user."},
                "conversation": {
                    "type": "array",
                    "minItems": 1,
                    "items": {
                        "oneOf": [
                            {
                                "type": "object",
                                "properties": {
                                    "type": {"const": "text"},
                                    "content": {"type": "string"}
                                },
                                "required": ["type", "content"]
                            },
                            {
                                "type": "object",
                                "properties": {
                                    "type": {"const": "artifact"},
                                    "artifact": {
                                        "type": "object",
                                        "properties": {
                                            "kind": {"type": "string"},
                                            "title": {"type": "string"},
                                            "content": {"type": "string"},
                                            "language": {"type": "string"}
                                        },
                                        "required": ["kind", "title", "content"]
                                    },
                                    "summary": {"type": "string"}
                                },
                                "required": ["type", "artifact"]
                            }
                        ]
                    }
                }
            },
            "required": ["conversation"]
        }
    })
}

/// Maps a known set of aliases onto the closed artifact-kind set: MIME-ish
/// code variants collapse to `Code`, any graph spelling collapses to
/// `KnowledgeGraph`, and anything unrecognized falls back to `TextMarkdown`.
pub fn normalize_kind(raw: &str) -> ArtifactKind {
    let lower = raw.to_ascii_lowercase();
    if lower.is_empty() {
        return ArtifactKind::TextMarkdown;
    }
    if let Some(subtype) = lower.strip_prefix("image/") {
        return ArtifactKind::Image(subtype.to_string());
    }
    match lower.as_str() {
        "text/markdown" | "markdown" | "text" => ArtifactKind::TextMarkdown,
        "code" | "application/vnd.ant.code" => ArtifactKind::Code,
        "knowledge-graph" | "graph" | "application/vnd.knowledge-graph" | "knowledge_graph" => {
            ArtifactKind::KnowledgeGraph
        }
        "bibliography" => ArtifactKind::Bibliography,
        "html" | "text/html" => ArtifactKind::Html,
        "svg" | "image/svg+xml" => ArtifactKind::Svg,
        "mermaid" => ArtifactKind::Mermaid,
        "react" | "application/vnd.ant.react" => ArtifactKind::React,
        "binary" => ArtifactKind::Binary,
        other if other.starts_with("code/") => ArtifactKind::Code,
        _ => ArtifactKind::TextMarkdown,
    }
}

pub struct FormatterAdapter<'a> {
    pub tool_adapter: &'a dyn ToolAdapter,
}

impl<'a> FormatterAdapter<'a> {
    pub fn new(tool_adapter: &'a dyn ToolAdapter) -> Self {
        Self { tool_adapter }
    }

    /// Find the provider's invocation of `response_formatter` in `reply`,
    /// parse its arguments (however the adapter's extraction surfaces them),
    /// and validate the resulting shape.
    pub fn extract(&self, reply: &ProviderReply) -> FormatResult<StoreFormat> {
        let calls = self.tool_adapter.extract_tool_calls(reply);
        let call = calls
            .iter()
            .find(|c| c.wire_name == RESPONSE_FORMATTER_TOOL_NAME)
            .ok_or(FormatError::MissingFormatterCall)?;

        let raw: RawFormatterArgs = serde_json::from_value(call.arguments.clone())
            .map_err(|e| FormatError::InvalidArguments(e.to_string()))?;

        let mut artifacts = Vec::new();
        let mut conversation = Vec::new();
        for (position, seg) in raw.conversation.into_iter().enumerate() {
            match seg {
                RawSegment::Text { content } => {
                    if content.is_empty() {
                        return Err(FormatError::InvalidShape(
                            "text segment must have non-empty content".to_string(),
                        ));
                    }
                    conversation.push(Segment::Text { content });
                }
                RawSegment::Artifact { artifact, summary } => {
                    let id = artifact.id.unwrap_or_else(|| Uuid::new_v4().to_string());
                    let kind = normalize_kind(&artifact.kind);
                    artifacts.push(Artifact {
                        id: id.clone(),
                        kind,
                        title: artifact.title,
                        content: artifact.content,
                        language: artifact.language,
                        position,
                        metadata: None,
                    });
                    conversation.push(Segment::Artifact {
                        artifact_id: id,
                        summary: summary.unwrap_or_default(),
                    });
                }
            }
        }

        let store_format = StoreFormat { thinking: raw.thinking, conversation, artifacts };
        self.validate_shape(&store_format)?;
        Ok(store_format)
    }

    pub fn validate_shape(&self, store_format: &StoreFormat) -> FormatResult<()> {
        store_format.validate_invariants()
    }
}
