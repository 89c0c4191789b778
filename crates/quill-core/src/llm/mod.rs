//! Provider adapters and streaming plumbing
//!
//! Every backend implements [`Provider`]: one trait covering configuration
//! checks, local token estimation, context-window discovery, model listing,
//! settings saves, and the streaming `chat` call. The per-provider modules
//! differ only in wire formats and framing; record splitting is shared
//! ([`scanner`]) and event semantics are shared ([`stream`]).

pub mod providers;
pub mod scanner;
pub mod stream;
pub mod wire;

pub use providers::{build_provider, GeminiProvider, OllamaProvider, OpenAiProvider};
pub use scanner::{Framing, RecordScanner};
pub use stream::{collect_final, ChatStream, StreamEvent};
pub use wire::{conversation_messages, MergePolicy, WireMessage, WireRole};

use crate::config::{ProviderSettings, SettingField, SettingsPatch};
use crate::context::TokenEstimator;
use crate::error::QuillResult;
use crate::history::ConversationEntry;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Supported backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Local model server (no API key)
    Ollama,
    /// OpenAI-compatible hosted API
    OpenAi,
    /// Gemini hosted API
    Gemini,
}

impl ProviderKind {
    pub fn all() -> [ProviderKind; 3] {
        [Self::Ollama, Self::OpenAi, Self::Gemini]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ollama => "ollama",
            Self::OpenAi => "openai",
            Self::Gemini => "gemini",
        }
    }

    /// Hosted providers need a key; the local server does not
    pub fn requires_api_key(&self) -> bool {
        !matches!(self, Self::Ollama)
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One model a provider offers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    /// Identifier sent in requests
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Context window reported by the provider, when it reports one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_window: Option<u32>,
}

impl ModelDescriptor {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: None,
            context_window: None,
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn with_context_window(mut self, tokens: u32) -> Self {
        self.context_window = Some(tokens);
        self
    }
}

/// Uniform contract every backend adapter implements
#[async_trait]
pub trait Provider: Send + Sync {
    /// Which backend this adapter talks to
    fn kind(&self) -> ProviderKind;

    /// True iff the minimum required fields are present (hosted providers
    /// need an API key and model; the local server needs a URL and model)
    fn is_configured(&self) -> bool;

    /// Snapshot of the live settings
    fn settings(&self) -> ProviderSettings;

    /// Merge changed fields into the live config, re-validating connectivity
    /// where the provider supports it
    async fn apply_settings(&self, patch: SettingsPatch) -> QuillResult<()>;

    /// Declarative settings form for this provider
    fn settings_schema(&self) -> Vec<SettingField> {
        crate::config::settings_schema(self.kind())
    }

    /// Fast, local, approximate token count; exactness is not guaranteed
    fn estimate_tokens(&self, entries: &[ConversationEntry]) -> usize {
        TokenEstimator::new().estimate_entries(entries)
    }

    /// Effective context window: a capability-introspected size when the
    /// backend exposes one, else the configured value, else `None` (callers
    /// fall back to the 4096 default)
    fn context_window(&self) -> Option<u32>;

    /// Query the backend for available models, falling back to the built-in
    /// list on any failure; never errors. The result is cached per instance.
    async fn refresh_models(&self) -> Vec<ModelDescriptor>;

    /// Most recently fetched model list (built-ins before the first refresh)
    fn models(&self) -> Vec<ModelDescriptor>;

    /// Open a streaming chat request for the given entries
    ///
    /// Request-setup failures return `Err`; once a stream exists it yields
    /// cumulative [`StreamEvent::Update`]s and exactly one terminal event.
    async fn chat(
        &self,
        entries: &[ConversationEntry],
        system_prompt: Option<&str>,
    ) -> QuillResult<ChatStream>;
}
