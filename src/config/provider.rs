// src/config/provider.rs
// LLM provider configuration (API keys, models, enablement)

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiSettings {
    pub enabled: bool,
    pub api_key: String,
    pub model: String,
    pub base_url: String,
}

impl OpenAiSettings {
    fn from_env() -> Self {
        let api_key = super::helpers::env_or("OPENAI_API_KEY", "");
        Self {
            enabled: !api_key.is_empty(),
            api_key,
            model: super::helpers::env_or("OPENAI_MODEL", "gpt-5.1"),
            base_url: super::helpers::env_or("OPENAI_BASE_URL", "https://api.openai.com/v1"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicSettings {
    pub enabled: bool,
    pub api_key: String,
    pub model: String,
    pub base_url: String,
}

impl AnthropicSettings {
    fn from_env() -> Self {
        let api_key = super::helpers::env_or("ANTHROPIC_API_KEY", "");
        Self {
            enabled: !api_key.is_empty(),
            api_key,
            model: super::helpers::env_or("ANTHROPIC_MODEL", "claude-sonnet-4-5"),
            base_url: super::helpers::env_or("ANTHROPIC_BASE_URL", "https://api.anthropic.com"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiSettings {
    pub enabled: bool,
    pub api_key: String,
    pub model: String,
    pub base_url: String,
}

impl GeminiSettings {
    fn from_env() -> Self {
        let api_key = super::helpers::env_or("GOOGLE_API_KEY", "");
        Self {
            enabled: !api_key.is_empty(),
            api_key,
            model: super::helpers::env_or("GEMINI_MODEL", "gemini-3-pro"),
            base_url: super::helpers::env_or(
                "GEMINI_BASE_URL",
                "https://generativelanguage.googleapis.com/v1beta",
            ),
        }
    }
}

/// Per-provider settings. Absence of a provider's API key disables that
/// provider at startup rather than failing configuration load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub openai: OpenAiSettings,
    pub anthropic: AnthropicSettings,
    pub gemini: GeminiSettings,
    /// Which provider drives a request absent an explicit `provider` field.
    pub default_provider: String,
}

impl ProviderConfig {
    pub fn from_env() -> Self {
        Self {
            openai: OpenAiSettings::from_env(),
            anthropic: AnthropicSettings::from_env(),
            gemini: GeminiSettings::from_env(),
            default_provider: super::helpers::env_or("DEFAULT_PROVIDER", "openai"),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.openai.enabled && !self.anthropic.enabled && !self.gemini.enabled {
            return Err(anyhow::anyhow!(
                "no LLM provider is configured; set OPENAI_API_KEY, ANTHROPIC_API_KEY, or GOOGLE_API_KEY"
            ));
        }
        Ok(())
    }

    pub fn is_enabled(&self, provider: &str) -> bool {
        match provider {
            "openai" => self.openai.enabled,
            "anthropic" => self.anthropic.enabled,
            "gemini" => self.gemini.enabled,
            _ => false,
        }
    }
}
