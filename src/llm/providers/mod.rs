// src/llm/providers/mod.rs
// Concrete ToolAdapter implementations, one per upstream wire format. Each
// pairs with a ProviderClient supplying the actual HTTP call; the adapter
// owns only schema translation and tool-call extraction.

pub mod anthropic;
pub mod gemini;
pub mod openai;

pub use anthropic::{AnthropicAdapter, AnthropicClient};
pub use gemini::{GeminiAdapter, GeminiClient};
pub use openai::{OpenAiAdapter, OpenAiClient};
