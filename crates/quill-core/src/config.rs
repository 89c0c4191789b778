//! Engine and provider configuration
//!
//! Provider settings are mutated only through an explicit save
//! ([`ProviderSettings::apply`] via the adapter's `apply_settings`), never as
//! a side effect of chatting. The engine-level config persists to a TOML
//! file.

use crate::error::QuillResult;
use crate::llm::ProviderKind;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Default proactive-summarization trigger, percent of the context window
pub const DEFAULT_SUMMARIZE_THRESHOLD_PERCENT: u8 = 85;
/// Default share of eligible messages a summarization tries to compress
pub const DEFAULT_SUMMARY_TARGET_PERCENT: u8 = 50;

/// Per-provider connection and model settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderSettings {
    /// API key; the local server needs none
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Base server URL
    pub server: String,
    /// Model identifier sent with each request
    pub model: String,
    /// System prompt prepended to every chat
    #[serde(default)]
    pub system_prompt: String,
    /// Configured context window; introspected values take precedence and
    /// absent both, the engine falls back to 4096
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_context_tokens: Option<u32>,
}

impl ProviderSettings {
    /// Built-in defaults for a provider
    pub fn defaults_for(kind: ProviderKind) -> Self {
        match kind {
            ProviderKind::Ollama => Self {
                api_key: None,
                server: "http://localhost:11434".to_string(),
                model: "llama3.1".to_string(),
                system_prompt: String::new(),
                max_context_tokens: None,
            },
            ProviderKind::OpenAi => Self {
                api_key: None,
                server: "https://api.openai.com".to_string(),
                model: "gpt-4o-mini".to_string(),
                system_prompt: String::new(),
                max_context_tokens: None,
            },
            ProviderKind::Gemini => Self {
                api_key: None,
                server: "https://generativelanguage.googleapis.com".to_string(),
                model: "gemini-1.5-flash".to_string(),
                system_prompt: String::new(),
                max_context_tokens: None,
            },
        }
    }

    /// Set the API key
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Set the server URL
    pub fn with_server(mut self, server: impl Into<String>) -> Self {
        self.server = server.into();
        self
    }

    /// Set the model
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set the system prompt
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// Set the configured context window
    pub fn with_max_context_tokens(mut self, tokens: u32) -> Self {
        self.max_context_tokens = Some(tokens);
        self
    }

    /// Merge changed fields from a settings-save into the live config.
    ///
    /// `None` fields are unchanged; an empty `api_key` clears the stored key
    /// (a cleared text field in a settings form).
    pub fn apply(&mut self, patch: &SettingsPatch) {
        if let Some(key) = &patch.api_key {
            self.api_key = if key.is_empty() {
                None
            } else {
                Some(key.clone())
            };
        }
        if let Some(server) = &patch.server {
            self.server = server.trim_end_matches('/').to_string();
        }
        if let Some(model) = &patch.model {
            self.model = model.clone();
        }
        if let Some(prompt) = &patch.system_prompt {
            self.system_prompt = prompt.clone();
        }
        if let Some(max) = patch.max_context_tokens {
            self.max_context_tokens = if max == 0 { None } else { Some(max) };
        }
    }

    /// System prompt, if one is configured
    pub fn system_prompt(&self) -> Option<&str> {
        if self.system_prompt.is_empty() {
            None
        } else {
            Some(&self.system_prompt)
        }
    }
}

/// Changed fields from a settings-save operation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SettingsPatch {
    pub api_key: Option<String>,
    pub server: Option<String>,
    pub model: Option<String>,
    pub system_prompt: Option<String>,
    /// `Some(0)` clears the configured window
    pub max_context_tokens: Option<u32>,
}

/// Input kind of one settings-form field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettingKind {
    Text,
    Secret,
    Url,
    Number,
}

/// Declarative description of one configurable provider field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingField {
    pub key: &'static str,
    pub label: &'static str,
    pub kind: SettingKind,
    pub required: bool,
}

/// The settings form a provider exposes
pub fn settings_schema(kind: ProviderKind) -> Vec<SettingField> {
    let mut fields = vec![SettingField {
        key: "server",
        label: "Server URL",
        kind: SettingKind::Url,
        required: true,
    }];
    if kind.requires_api_key() {
        fields.push(SettingField {
            key: "api_key",
            label: "API key",
            kind: SettingKind::Secret,
            required: true,
        });
    }
    fields.push(SettingField {
        key: "model",
        label: "Model",
        kind: SettingKind::Text,
        required: true,
    });
    fields.push(SettingField {
        key: "system_prompt",
        label: "System prompt",
        kind: SettingKind::Text,
        required: false,
    });
    fields.push(SettingField {
        key: "max_context_tokens",
        label: "Context window (tokens)",
        kind: SettingKind::Number,
        required: false,
    });
    fields
}

fn default_threshold() -> u8 {
    DEFAULT_SUMMARIZE_THRESHOLD_PERCENT
}

fn default_target() -> u8 {
    DEFAULT_SUMMARY_TARGET_PERCENT
}

/// Top-level engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuillConfig {
    /// Provider used for chats and summarization
    pub active_provider: ProviderKind,
    /// Per-provider settings; absent providers use their defaults
    #[serde(default)]
    pub providers: HashMap<ProviderKind, ProviderSettings>,
    /// Proactive summarization trigger, percent of the window
    #[serde(default = "default_threshold")]
    pub summarize_threshold_percent: u8,
    /// Share of eligible messages summarization compresses
    #[serde(default = "default_target")]
    pub summary_target_percent: u8,
}

impl Default for QuillConfig {
    fn default() -> Self {
        let mut providers = HashMap::new();
        for kind in ProviderKind::all() {
            providers.insert(kind, ProviderSettings::defaults_for(kind));
        }
        Self {
            active_provider: ProviderKind::Ollama,
            providers,
            summarize_threshold_percent: DEFAULT_SUMMARIZE_THRESHOLD_PERCENT,
            summary_target_percent: DEFAULT_SUMMARY_TARGET_PERCENT,
        }
    }
}

impl QuillConfig {
    /// Settings for a provider, falling back to its defaults
    pub fn provider(&self, kind: ProviderKind) -> ProviderSettings {
        self.providers
            .get(&kind)
            .cloned()
            .unwrap_or_else(|| ProviderSettings::defaults_for(kind))
    }

    /// Load from a TOML file
    pub fn load(path: &Path) -> QuillResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }

    /// Save to a TOML file, creating parent directories
    pub fn save(&self, path: &Path) -> QuillResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Default config file location
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("quill")
            .join("config.toml")
    }
}
