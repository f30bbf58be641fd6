// src/orchestrator/mod.rs
// The Sequential Thinking Loop, its Artifact Aggregator, and its Status
// Streamer: the orchestration core that ties the LLM provider seam (`llm`)
// to the MCP subprocess layer (`mcp`) into one bounded multi-round request.

pub mod artifacts;
pub mod loop_;
pub mod status;

pub use artifacts::{normalize_kind, Edge, KnowledgeGraph, SideChannel};
pub use loop_::{LoopInputs, Mode, SequentialThinkingLoop};
pub use status::StatusStreamer;
