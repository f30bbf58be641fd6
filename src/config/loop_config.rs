// src/config/loop_config.rs
// Bounds for the Sequential Thinking Loop

use serde::{Deserialize, Serialize};

/// Bounds and timing for the round loop and the final formatter retry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopConfig {
    /// Hard cap on reasoning rounds before the formatter is forced.
    pub max_rounds: usize,
    /// Retries for a failing `response_formatter` extraction/validation.
    pub max_retries: u32,
    /// Base back-off in milliseconds; doubled per attempt and capped.
    pub retry_backoff_ms: u64,
    /// Cap applied to the doubled back-off.
    pub retry_backoff_cap_ms: u64,
    /// Per-tool-call timeout.
    pub tool_call_timeout_ms: u64,
}

impl LoopConfig {
    pub fn from_env() -> Self {
        Self {
            max_rounds: super::helpers::env_usize("LOOP_MAX_ROUNDS", 5),
            max_retries: super::helpers::env_usize("LOOP_MAX_RETRIES", 3) as u32,
            retry_backoff_ms: super::helpers::env_usize("LOOP_RETRY_BACKOFF_MS", 1_000) as u64,
            retry_backoff_cap_ms: super::helpers::env_usize("LOOP_RETRY_BACKOFF_CAP_MS", 4_000)
                as u64,
            tool_call_timeout_ms: super::helpers::env_usize("TOOL_CALL_TIMEOUT_MS", 60_000)
                as u64,
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_rounds == 0 {
            return Err(anyhow::anyhow!("LOOP_MAX_ROUNDS must be at least 1"));
        }
        Ok(())
    }

    /// Back-off for the nth (1-indexed) formatter retry attempt.
    pub fn backoff_for_attempt(&self, attempt: u32) -> std::time::Duration {
        let ms = self
            .retry_backoff_ms
            .saturating_mul(1u64 << attempt.saturating_sub(1).min(16))
            .min(self.retry_backoff_cap_ms);
        std::time::Duration::from_millis(ms)
    }
}
