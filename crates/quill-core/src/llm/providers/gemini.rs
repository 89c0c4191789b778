//! Gemini hosted adapter
//!
//! `streamGenerateContent` returns one JSON array whose elements arrive
//! incrementally; the brace-delimited scanner peels each element off as a
//! record. The models endpoint reports `inputTokenLimit` per model, which
//! doubles as context-window introspection. The API rejects consecutive
//! same-role turns, so outgoing user runs are collapsed.

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
    vec![
        ModelDescriptor::new("gemini-1.5-flash")
            .with_display_name("Gemini 1.5 Flash")
            .with_context_window(1_048_576),
        ModelDescriptor::new("gemini-1.5-pro")
            .with_display_name("Gemini 1.5 Pro")
            .with_context_window(2_097_152),
        ModelDescriptor::new("gemini-2.0-flash")
            .with_display_name("Gemini 2.0 Flash")
            .with_context_window(1_048_576),
    ]
}

/// The API key travels in the query string; strip it before a URL lands in
/// an error or a log line.
fn strip_query(url: &str) -> &str {
    url.split('?').next().unwrap_or(url)
}

pub struct GeminiProvider {
    settings: RwLock<ProviderSettings>,
    models: RwLock<Vec<ModelDescriptor>>,
    client: Client,
}

impl GeminiProvider {
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

    fn api_key(&self) -> QuillResult<String> {
        self.settings
            .read()
            .api_key
            .clone()
            .ok_or_else(|| QuillError::config_field("API key is required", "api_key"))
    }

    async fn fetch_models(&self) -> QuillResult<Vec<ModelDescriptor>> {
        let url = format!("{}/v1beta/models?key={}", self.base_url(), self.api_key()?);
        let response = self
            .client
            .get(&url)
            .timeout(LIST_TIMEOUT)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(QuillError::http_status(
                "model list request rejected",
                strip_query(&url),
                response.status().as_u16(),
            ));
        }
        let body: Value = response.json().await?;
        Ok(parse_models(&body))
    }
}

fn parse_models(body: &Value) -> Vec<ModelDescriptor> {
    body["models"]
        .as_array()
        .map(|list| {
            list.iter()
                .filter_map(|model| {
                    let name = model["name"].as_str()?;
                    let supports_chat = model["supportedGenerationMethods"]
                        .as_array()
                        .map(|methods| {
                            methods.iter().any(|m| m.as_str() == Some("generateContent"))
                        })
                        .unwrap_or(true);
                    if !supports_chat {
                        return None;
                    }
                    let id = name.strip_prefix("models/").unwrap_or(name);
                    let mut descriptor = ModelDescriptor::new(id);
                    if let Some(display) = model["displayName"].as_str() {
                        descriptor = descriptor.with_display_name(display);
                    }
                    if let Some(limit) = model["inputTokenLimit"]
                        .as_u64()
                        .and_then(|v| u32::try_from(v).ok())
                    {
                        descriptor = descriptor.with_context_window(limit);
                    }
                    Some(descriptor)
                })
                .collect()
        })
        .unwrap_or_default()
}

fn request_body(entries: &[ConversationEntry], system_prompt: Option<&str>) -> Value {
    let contents: Vec<Value> = conversation_messages(entries, MergePolicy::CollapseUserRuns)
        .into_iter()
        .map(|message| {
            json!({
                "role": message.role.gemini_label(),
                "parts": [{ "text": message.content }],
            })
        })
        .collect();
    let mut body = json!({ "contents": contents });
    if let Some(prompt) = system_prompt {
        body["systemInstruction"] = json!({ "parts": [{ "text": prompt }] });
    }
    body
}

fn decode_record(value: &Value, ctx: &mut StreamContext) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    if let Some(error) = value.get("error").filter(|e| !e.is_null()) {
        let message = error["message"].as_str().unwrap_or("stream error");
        events.push(ctx.fail(QuillError::provider(
            ProviderKind::Gemini.as_str(),
            message,
        )));
        return events;
    }
    if let Some(usage) = value.get("usageMetadata") {
        ctx.reported_prompt_tokens = usage["promptTokenCount"].as_u64().map(|v| v as u32);
        ctx.reported_completion_tokens = usage["candidatesTokenCount"].as_u64().map(|v| v as u32);
    }
    if let Some(parts) = value["candidates"][0]["content"]["parts"].as_array() {
        let mut delta = String::new();
        for part in parts {
            if let Some(text) = part["text"].as_str() {
                delta.push_str(text);
            }
        }
        if !delta.is_empty() {
            events.push(ctx.push_text(&delta));
        }
    }
    events
}

#[async_trait]
impl Provider for GeminiProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Gemini
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
        let model = self.settings.read().model.clone();
        let introspected = self
            .models
            .read()
            .iter()
            .find(|m| m.id == model)
            .and_then(|m| m.context_window);
        introspected.or(self.settings.read().max_context_tokens)
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
        let api_key = self.api_key()?;
        let body = request_body(entries, system_prompt);
        let url = format!(
            "{}/v1beta/models/{}:streamGenerateContent?key={}",
            self.base_url(),
            settings.model,
            api_key,
        );
        debug!(model = %settings.model, "opening gemini chat stream");

        let response = self.client.post(&url).json(&body).send().await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let detail = response.text().await.unwrap_or_default();
            return Err(QuillError::http_status(
                format!("chat request rejected: {detail}"),
                strip_query(&url),
                status,
            ));
        }

        let prompt_tokens = self.estimate_tokens(entries)
            + system_prompt
                .map(|p| crate::context::TokenEstimator::new().estimate_string(p))
                .unwrap_or(0);
        let context = StreamContext::new(
            Framing::BraceDelimited,
            ProviderKind::Gemini,
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
        StreamContext::new(Framing::BraceDelimited, ProviderKind::Gemini, window, 0)
    }

    #[tokio::test]
    async fn test_array_stream_accumulates() {
        let body = concat!(
            "[{\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"Hel\"}],\"role\":\"model\"}}]},\r\n",
            "{\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"lo\"},{\"text\":\" there\"}],\"role\":\"model\"}}]},\r\n",
            "{\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"!\"}],\"role\":\"model\"},\
             \"finishReason\":\"STOP\"}],\
             \"usageMetadata\":{\"promptTokenCount\":30,\"candidatesTokenCount\":10,\"totalTokenCount\":40}}]",
        )
        .as_bytes();

        for chunk_size in [1, 13, body.len()] {
            let events = run_chunked(body, chunk_size, context(Some(80)), decode_record).await;
            assert_eq!(final_text(&events), "Hello there!");
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
    async fn test_error_element_fails_stream() {
        let body = b"[{\"error\":{\"code\":429,\"message\":\"quota exhausted\",\"status\":\"RESOURCE_EXHAUSTED\"}}]";
        let events = run_chunked(body, 16, context(None), decode_record).await;
        assert!(matches!(
            events.last(),
            Some(StreamEvent::Failed(QuillError::Provider { .. }))
        ));
    }

    #[test]
    fn test_request_collapses_user_runs() {
        let entries = [
            ConversationEntry::file_context("main.rs", "rust", "fn main() {}"),
            ConversationEntry::user("what does this do?"),
            ConversationEntry::model("it is the entry point"),
        ];
        let body = request_body(&entries, Some("you are terse"));

        let contents = body["contents"].as_array().unwrap();
        assert_eq!(contents.len(), 2);
        assert_eq!(contents[0]["role"], "user");
        assert_eq!(contents[1]["role"], "model");
        let first = contents[0]["parts"][0]["text"].as_str().unwrap();
        assert!(first.contains("```rust"));
        assert!(first.contains("what does this do?"));
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "you are terse");
    }

    #[test]
    fn test_parse_models_strips_prefix_and_reads_limits() {
        let body = serde_json::json!({
            "models": [
                {
                    "name": "models/gemini-1.5-flash",
                    "displayName": "Gemini 1.5 Flash",
                    "inputTokenLimit": 1048576,
                    "supportedGenerationMethods": ["generateContent", "countTokens"]
                },
                {
                    "name": "models/embedding-001",
                    "displayName": "Embedding 001",
                    "inputTokenLimit": 2048,
                    "supportedGenerationMethods": ["embedContent"]
                }
            ]
        });

        let models = parse_models(&body);
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].id, "gemini-1.5-flash");
        assert_eq!(models[0].context_window, Some(1_048_576));
    }

    #[test]
    fn test_introspected_window_tracks_configured_model() {
        let provider = GeminiProvider::new(
            ProviderSettings::defaults_for(ProviderKind::Gemini).with_api_key("k"),
        );
        // Built-in descriptor for the default model carries a window
        assert_eq!(provider.context_window(), Some(1_048_576));
    }

    #[test]
    fn test_strip_query_removes_key() {
        let url = "https://example.com/v1beta/models/x:streamGenerateContent?key=secret";
        assert_eq!(
            strip_query(url),
            "https://example.com/v1beta/models/x:streamGenerateContent"
        );
        assert_eq!(strip_query("https://example.com/path"), "https://example.com/path");
    }

    #[tokio::test]
    async fn test_transport_errors_omit_api_key() {
        // Nothing listens on port 9, so the request dies in the transport
        // before any HTTP status arrives.
        let provider = GeminiProvider::new(
            ProviderSettings::defaults_for(ProviderKind::Gemini)
                .with_api_key("super-secret-key")
                .with_server("http://127.0.0.1:9"),
        );
        let entries = [ConversationEntry::user("hello")];

        let err = match provider.chat(&entries, None).await {
            Err(e) => e,
            Ok(_) => panic!("expected a transport error"),
        };
        let rendered = format!("{err} {err:?}");
        assert!(
            !rendered.contains("super-secret-key"),
            "api key leaked into error: {rendered}"
        );
        match err {
            QuillError::Http { url, .. } => {
                if let Some(url) = url {
                    assert!(!url.contains('?'), "query survived redaction: {url}");
                }
            }
            other => panic!("expected Http, got {other:?}"),
        }
    }
}
