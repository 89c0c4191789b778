//! OpenAI-compatible hosted adapter
//!
//! `POST /v1/chat/completions` with `stream: true` returns SSE lines; the
//! brace-delimited scanner lifts the JSON payloads straight out of them, so
//! `data:` prefixes and the `[DONE]` sentinel need no dedicated parsing.
//! Usage accounting arrives in a final usage-only chunk when requested via
//! `stream_options`.

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

fn builtin_models() -> Vec<ModelDescriptor> {
    ["gpt-4o", "gpt-4o-mini", "gpt-4-turbo", "o1-mini"]
        .into_iter()
        .map(ModelDescriptor::new)
        .collect()
}

/// The models endpoint lists every family the account can reach; only the
/// chat-capable ones belong in a model picker.
fn is_chat_model(id: &str) -> bool {
    id.starts_with("gpt-") || id.starts_with("o1") || id.starts_with("o3")
}

pub struct OpenAiProvider {
    settings: RwLock<ProviderSettings>,
    models: RwLock<Vec<ModelDescriptor>>,
    client: Client,
}

impl OpenAiProvider {
    pub fn new(settings: ProviderSettings) -> Self {
        Self {
            settings: RwLock::new(settings),
            models: RwLock::new(builtin_models()),
            client: Client::builder()
                .connect_timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
        }
    }

    fn base_url(&self) -> String {
        self.settings.read().server.trim_end_matches('/').to_string()
    }

    async fn fetch_models(&self) -> QuillResult<Vec<ModelDescriptor>> {
        let (url, api_key) = {
            let settings = self.settings.read();
            let key = settings
                .api_key
                .clone()
                .ok_or_else(|| QuillError::config_field("API key is required", "api_key"))?;
            (
                format!("{}/v1/models", settings.server.trim_end_matches('/')),
                key,
            )
        };
        let response = self
            .client
            .get(&url)
            .bearer_auth(api_key)
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
        let mut models: Vec<ModelDescriptor> = body["data"]
            .as_array()
            .map(|list| {
                list.iter()
                    .filter_map(|m| m["id"].as_str())
                    .filter(|id| is_chat_model(id))
                    .map(ModelDescriptor::new)
                    .collect()
            })
            .unwrap_or_default();
        models.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(models)
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
        "stream_options": { "include_usage": true },
    })
}

fn decode_record(value: &Value, ctx: &mut StreamContext) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    if let Some(error) = value.get("error").filter(|e| !e.is_null()) {
        let message = error["message"].as_str().unwrap_or("stream error");
        events.push(ctx.fail(QuillError::provider(
            ProviderKind::OpenAi.as_str(),
            message,
        )));
        return events;
    }
    // Delta chunks carry "usage": null until the final usage-only chunk
    if let Some(usage) = value.get("usage").filter(|u| u.is_object()) {
        ctx.reported_prompt_tokens = usage["prompt_tokens"].as_u64().map(|v| v as u32);
        ctx.reported_completion_tokens = usage["completion_tokens"].as_u64().map(|v| v as u32);
    }
    if let Some(text) = value["choices"][0]["delta"]["content"].as_str() {
        if !text.is_empty() {
            events.push(ctx.push_text(text));
        }
    }
    events
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }

    fn is_configured(&self) -> bool {
        let settings = self.settings.read();
        settings.api_key.is_some() && !settings.model.is_empty()
    }

    fn settings(&self) -> ProviderSettings {
        self.settings.read().clone()
    }

    async fn apply_settings(&self, patch: SettingsPatch) -> QuillResult<()> {
        let mut candidate = self.settings.read().clone();
        candidate.apply(&patch);
        if candidate.api_key.is_none() {
            return Err(QuillError::config_field("API key is required", "api_key"));
        }
        if candidate.model.is_empty() {
            return Err(QuillError::config_field("model is required", "model"));
        }
        if candidate.server.is_empty() {
            return Err(QuillError::config_field("server URL is required", "server"));
        }
        *self.settings.write() = candidate;
        Ok(())
    }

    fn context_window(&self) -> Option<u32> {
        // No capability endpoint; the configured value is all there is
        self.settings.read().max_context_tokens
    }

    async fn refresh_models(&self) -> Vec<ModelDescriptor> {
        match self.fetch_models().await {
            Ok(models) if !models.is_empty() => {
                *self.models.write() = models.clone();
                models
            }
            Ok(_) => self.models.read().clone(),
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
        let api_key = settings
            .api_key
            .clone()
            .ok_or_else(|| QuillError::config_field("API key is required", "api_key"))?;
        let body = request_body(&settings, entries, system_prompt);
        let url = format!("{}/v1/chat/completions", self.base_url());
        debug!(model = %settings.model, "opening openai chat stream");

        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await?;
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
            Framing::BraceDelimited,
            ProviderKind::OpenAi,
            self.context_window(),
            prompt_tokens,
        );
        Ok(drive_stream(response.bytes_stream(), context, decode_record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::providers::test_support::{final_text, run_chunked};

    fn context(window: Option<u32>) -> StreamContext {
        StreamContext::new(Framing::BraceDelimited, ProviderKind::OpenAi, window, 0)
    }

    #[tokio::test]
    async fn test_sse_stream_with_usage_chunk() {
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"},\"index\":0}],\"usage\":null}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}],\"usage\":null}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}],\"usage\":null}\n\n",
            "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}],\"usage\":null}\n\n",
            "data: {\"choices\":[],\"usage\":{\"prompt_tokens\":60,\"completion_tokens\":40}}\n\n",
            "data: [DONE]\n\n",
        )
        .as_bytes();

        for chunk_size in [3, 11, body.len()] {
            let events = run_chunked(body, chunk_size, context(Some(200)), decode_record).await;
            assert_eq!(final_text(&events), "Hello");
            match events.last() {
                Some(StreamEvent::Done {
                    context_ratio_percent,
                    ..
                }) => assert_eq!(*context_ratio_percent, 50),
                other => panic!("expected Done, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_role_only_delta_emits_nothing() {
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"hey\"}}]}\n\n",
            "data: [DONE]\n\n",
        )
        .as_bytes();

        let events = run_chunked(body, 64, context(None), decode_record).await;
        let updates = events
            .iter()
            .filter(|e| matches!(e, StreamEvent::Update { .. }))
            .count();
        assert_eq!(updates, 1);
        assert_eq!(final_text(&events), "hey");
    }

    #[tokio::test]
    async fn test_error_object_fails_stream() {
        let body =
            b"{\"error\":{\"message\":\"rate limited\",\"type\":\"requests\",\"code\":429}}";
        let events = run_chunked(body, 8, context(None), decode_record).await;
        assert!(matches!(
            events.last(),
            Some(StreamEvent::Failed(QuillError::Provider { .. }))
        ));
    }

    #[test]
    fn test_request_body_asks_for_usage() {
        let settings = ProviderSettings::defaults_for(ProviderKind::OpenAi);
        let entries = [ConversationEntry::user("hi")];
        let body = request_body(&settings, &entries, None);

        assert_eq!(body["stream"], true);
        assert_eq!(body["stream_options"]["include_usage"], true);
        assert_eq!(body["messages"][0]["role"], "user");
    }

    #[test]
    fn test_chat_model_filter() {
        assert!(is_chat_model("gpt-4o"));
        assert!(is_chat_model("o1-mini"));
        assert!(is_chat_model("o3-mini"));
        assert!(!is_chat_model("whisper-1"));
        assert!(!is_chat_model("text-embedding-3-small"));
    }

    #[test]
    fn test_requires_api_key() {
        let bare = OpenAiProvider::new(ProviderSettings::defaults_for(ProviderKind::OpenAi));
        assert!(!bare.is_configured());

        let keyed = OpenAiProvider::new(
            ProviderSettings::defaults_for(ProviderKind::OpenAi).with_api_key("sk-test"),
        );
        assert!(keyed.is_configured());
    }

    #[tokio::test]
    async fn test_apply_settings_requires_key() {
        let provider = OpenAiProvider::new(ProviderSettings::defaults_for(ProviderKind::OpenAi));
        let patch = SettingsPatch {
            model: Some("gpt-4o".to_string()),
            ..SettingsPatch::default()
        };
        let err = provider.apply_settings(patch).await.unwrap_err();
        assert!(matches!(err, QuillError::Config { .. }));
    }
}
