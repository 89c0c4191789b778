//! Local-server adapter
//!
//! Talks to an Ollama-compatible server: `POST /api/chat` for NDJSON-streamed
//! generation, `GET /api/tags` for the installed model list, `POST /api/show`
//! for context-window introspection. No API key is involved; configuration
//! needs a reachable server and a model name.

use crate::config::{ProviderSettings, SettingsPatch};
use crate::error::{QuillError, QuillResult};
use crate::history::ConversationEntry;
use crate::llm::providers::{drive_stream, StreamContext};
use crate::llm::scanner::Framing;
use crate::llm::stream::{ChatStream, StreamEvent};
use crate::llm::wire::{conversation_messages, MergePolicy};
use crate::llm::{ModelDescriptor, Provider, ProviderKind};
use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

const LIST_TIMEOUT: Duration = Duration::from_secs(30);
const PING_TIMEOUT: Duration = Duration::from_secs(10);

/// Models offered before the server has been queried successfully
fn builtin_models() -> Vec<ModelDescriptor> {
    ["llama3.1", "llama3.2", "mistral", "qwen2.5-coder"]
        .into_iter()
        .map(ModelDescriptor::new)
        .collect()
}

pub struct OllamaProvider {
    settings: RwLock<ProviderSettings>,
    models: RwLock<Vec<ModelDescriptor>>,
    /// Context length reported by `/api/show` for the configured model
    introspected_window: RwLock<Option<u32>>,
    client: Client,
}

impl OllamaProvider {
    pub fn new(settings: ProviderSettings) -> Self {
        Self {
            settings: RwLock::new(settings),
            models: RwLock::new(builtin_models()),
            introspected_window: RwLock::new(None),
            client: Client::builder()
                .connect_timeout(PING_TIMEOUT)
                .build()
                .unwrap_or_default(),
        }
    }

    fn base_url(&self) -> String {
        self.settings.read().server.trim_end_matches('/').to_string()
    }

    async fn fetch_models(&self) -> QuillResult<Vec<ModelDescriptor>> {
        let url = format!("{}/api/tags", self.base_url());
        let response = self
            .client
            .get(&url)
            .timeout(LIST_TIMEOUT)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(QuillError::http_status(
                "model list request rejected",
                url,
                response.status().as_u16(),
            ));
        }
        let body: Value = response.json().await?;
        let models = body["models"]
            .as_array()
            .map(|list| {
                list.iter()
                    .filter_map(|m| m["name"].as_str().map(ModelDescriptor::new))
                    .collect()
            })
            .unwrap_or_default();
        Ok(models)
    }

    /// Ask the server for the configured model's context length.
    /// Best-effort; any failure leaves the cached value unchanged.
    async fn introspect_window(&self) -> Option<u32> {
        let model = self.settings.read().model.clone();
        let url = format!("{}/api/show", self.base_url());
        let response = self
            .client
            .post(&url)
            .timeout(LIST_TIMEOUT)
            .json(&json!({ "model": model }))
            .send()
            .await
            .ok()?;
        if !response.status().is_success() {
            return None;
        }
        let body: Value = response.json().await.ok()?;
        // model_info keys are architecture-prefixed, e.g. "llama.context_length"
        let window = body["model_info"].as_object()?.iter().find_map(|(key, value)| {
            if key.ends_with(".context_length") {
                value.as_u64()
            } else {
                None
            }
        })?;
        u32::try_from(window).ok()
    }
}

fn request_body(
    settings: &ProviderSettings,
    entries: &[ConversationEntry],
    system_prompt: Option<&str>,
) -> Value {
    let mut messages: Vec<Value> = Vec::new();
    if let Some(prompt) = system_prompt {
        messages.push(json!({ "role": "system", "content": prompt }));
    }
    for message in conversation_messages(entries, MergePolicy::Preserve) {
        messages.push(json!({
            "role": message.role.openai_label(),
            "content": message.content,
        }));
    }
    json!({
        "model": settings.model,
        "messages": messages,
        "stream": true,
    })
}

fn decode_record(value: &Value, ctx: &mut StreamContext) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    if let Some(message) = value["error"].as_str() {
        events.push(ctx.fail(QuillError::provider(
            ProviderKind::Ollama.as_str(),
            message,
        )));
        return events;
    }
    if let Some(text) = value["message"]["content"].as_str() {
        if !text.is_empty() {
            events.push(ctx.push_text(text));
        }
    }
    if value["done"].as_bool() == Some(true) {
        ctx.reported_prompt_tokens = value["prompt_eval_count"].as_u64().map(|v| v as u32);
        ctx.reported_completion_tokens = value["eval_count"].as_u64().map(|v| v as u32);
        events.push(ctx.done());
    }
    events
}

#[async_trait]
impl Provider for OllamaProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Ollama
    }

    fn is_configured(&self) -> bool {
        let settings = self.settings.read();
        !settings.server.is_empty() && !settings.model.is_empty()
    }

    fn settings(&self) -> ProviderSettings {
        self.settings.read().clone()
    }

    async fn apply_settings(&self, patch: SettingsPatch) -> QuillResult<()> {
        let mut candidate = self.settings.read().clone();
        candidate.apply(&patch);
        if candidate.server.is_empty() {
            return Err(QuillError::config_field("server URL is required", "server"));
        }
        if candidate.model.is_empty() {
            return Err(QuillError::config_field("model is required", "model"));
        }

        // Confirm the server answers before committing the new settings
        let url = format!("{}/api/tags", candidate.server.trim_end_matches('/'));
        let response = self
            .client
            .get(&url)
            .timeout(PING_TIMEOUT)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(QuillError::http_status(
                "server is not reachable",
                url,
                response.status().as_u16(),
            ));
        }

        *self.settings.write() = candidate;
        let window = self.introspect_window().await;
        *self.introspected_window.write() = window;
        debug!(window = ?window, "ollama settings applied");
        Ok(())
    }

    fn context_window(&self) -> Option<u32> {
        let introspected = *self.introspected_window.read();
        introspected.or(self.settings.read().max_context_tokens)
    }

    async fn refresh_models(&self) -> Vec<ModelDescriptor> {
        match self.fetch_models().await {
            Ok(models) => {
                let window = self.introspect_window().await;
                *self.introspected_window.write() = window;
                *self.models.write() = models.clone();
                models
            }
            Err(e) => {
                warn!(error = %e, "model list fetch failed; keeping cached list");
                self.models.read().clone()
            }
        }
    }

    fn models(&self) -> Vec<ModelDescriptor> {
        self.models.read().clone()
    }

    async fn chat(
        &self,
        entries: &[ConversationEntry],
        system_prompt: Option<&str>,
    ) -> QuillResult<ChatStream> {
        let settings = self.settings.read().clone();
        let body = request_body(&settings, entries, system_prompt);
        let url = format!("{}/api/chat", self.base_url());
        debug!(model = %settings.model, "opening ollama chat stream");

        let response = self.client.post(&url).json(&body).send().await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let detail = response.text().await.unwrap_or_default();
            return Err(QuillError::http_status(
                format!("chat request rejected: {detail}"),
                url,
                status,
            ));
        }

        let prompt_tokens = self.estimate_tokens(entries)
            + system_prompt
                .map(|p| crate::context::TokenEstimator::new().estimate_string(p))
                .unwrap_or(0);
        let context = StreamContext::new(
            Framing::NewlineDelimited,
            ProviderKind::Ollama,
            self.context_window(),
            prompt_tokens,
        );
        Ok(drive_stream(response.bytes_stream(), context, decode_record))
    }
}
