use crate::retry::RetryPolicy;
use rondo_core::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Supported LLM vendors.
///
/// OpenRouter, Grok, and Nvidia speak the OpenAI-compatible chat wire
/// format against different endpoints; Claude and Gemini have their own
/// schemas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// OpenAI.
    OpenAi,
    /// Azure OpenAI deployments (requires `base_url` and `api_version`).
    Azure,
    /// OpenRouter (OpenAI-compatible, with fallback-model routing).
    OpenRouter,
    /// xAI Grok (OpenAI-compatible, text-only).
    Grok,
    /// Nvidia inference endpoints (OpenAI-compatible, text-only).
    Nvidia,
    /// Anthropic Claude.
    Claude,
    /// Google Gemini.
    Gemini,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::OpenAi => "openai",
            Self::Azure => "azure",
            Self::OpenRouter => "openrouter",
            Self::Grok => "grok",
            Self::Nvidia => "nvidia",
            Self::Claude => "claude",
            Self::Gemini => "gemini",
        };
        f.write_str(name)
    }
}

/// Session configuration for one provider.
///
/// Resolved once before the first round and read-only afterwards;
/// switching providers means building a new session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Which vendor to talk to.
    pub provider: ProviderKind,
    /// Model or deployment name.
    pub model: String,
    /// API credential.
    pub api_key: String,
    /// Endpoint override; per-provider default when absent.
    pub base_url: Option<String>,
    /// API version (Azure only).
    pub api_version: Option<String>,
    /// Use the Responses API instead of chat completions (OpenAI/Azure).
    #[serde(default)]
    pub use_responses_api: bool,
    /// Fallback model ids for OpenRouter auto-routing.
    #[serde(default)]
    pub fallback_models: Vec<String>,
    /// Maximum tokens per completion.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Ceiling on model→tool rounds per user turn.
    #[serde(default = "default_max_rounds")]
    pub max_rounds: u32,
    /// Vendor request timeout in milliseconds.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Per-tool-call timeout in milliseconds.
    #[serde(default = "default_tool_timeout_ms")]
    pub tool_timeout_ms: u64,
    /// Retry/backoff policy for rate-limited and transient errors.
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Enable vendor-side context caching where supported.
    #[serde(default = "default_true")]
    pub cache_enabled: bool,
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_max_rounds() -> u32 {
    200
}

fn default_request_timeout_ms() -> u64 {
    120_000
}

fn default_tool_timeout_ms() -> u64 {
    300_000
}

fn default_true() -> bool {
    true
}

impl ProviderConfig {
    /// Creates a config with defaults for everything but the identity
    /// fields.
    pub fn new(
        provider: ProviderKind,
        model: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            model: model.into(),
            api_key: api_key.into(),
            base_url: None,
            api_version: None,
            use_responses_api: false,
            fallback_models: Vec::new(),
            max_tokens: default_max_tokens(),
            max_rounds: default_max_rounds(),
            request_timeout_ms: default_request_timeout_ms(),
            tool_timeout_ms: default_tool_timeout_ms(),
            retry: RetryPolicy::default(),
            cache_enabled: true,
        }
    }

    /// The effective endpoint base URL.
    pub fn base_url(&self) -> &str {
        if let Some(url) = &self.base_url {
            return url;
        }
        match self.provider {
            ProviderKind::OpenAi => "https://api.openai.com/v1",
            ProviderKind::Azure => "",
            ProviderKind::OpenRouter => "https://openrouter.ai/api/v1",
            ProviderKind::Grok => "https://api.x.ai/v1",
            ProviderKind::Nvidia => "https://integrate.api.nvidia.com/v1",
            ProviderKind::Claude => "https://api.anthropic.com",
            ProviderKind::Gemini => "https://generativelanguage.googleapis.com",
        }
    }

    /// Vendor request timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Per-tool-call timeout.
    pub fn tool_timeout(&self) -> Duration {
        Duration::from_millis(self.tool_timeout_ms)
    }

    /// Validates fields that cannot be defaulted. Called once at
    /// session start; failures are fatal, never retried.
    pub fn validate(&self) -> EngineResult<()> {
        if self.model.trim().is_empty() {
            return Err(EngineError::Fatal("model name is empty".into()));
        }
        if self.api_key.trim().is_empty() {
            return Err(EngineError::Fatal("api_key is empty".into()));
        }
        if self.provider == ProviderKind::Azure {
            if self.base_url.is_none() {
                return Err(EngineError::Fatal(
                    "azure provider requires an explicit base_url".into(),
                ));
            }
            if self.api_version.is_none() {
                return Err(EngineError::Fatal(
                    "azure provider requires api_version".into(),
                ));
            }
        }
        if self.max_rounds == 0 {
            return Err(EngineError::Fatal("max_rounds must be at least 1".into()));
        }
        Ok(())
    }
}
