//! Backend adapters
//!
//! Each adapter owns its live settings, an instance-local model cache, and a
//! `reqwest` client. Response decoding differs per backend only in the
//! record JSON; the chunk loop, malformed-record skipping, and terminal-event
//! bookkeeping are shared in [`drive_stream`].

pub mod gemini;
pub mod ollama;
pub mod openai;

pub use gemini::GeminiProvider;
pub use ollama::OllamaProvider;
pub use openai::OpenAiProvider;

use crate::config::ProviderSettings;
use crate::context::budget::DEFAULT_CONTEXT_WINDOW;
use crate::context::TokenEstimator;
use crate::error::QuillError;
use crate::llm::scanner::{Framing, RecordScanner};
use crate::llm::stream::{ChatStream, StreamEvent};
use crate::llm::{Provider, ProviderKind};
use futures::StreamExt;
use serde_json::Value;
use std::sync::Arc;
use tracing::warn;

/// Construct the adapter for a backend
pub fn build_provider(kind: ProviderKind, settings: ProviderSettings) -> Arc<dyn Provider> {
    match kind {
        ProviderKind::Ollama => Arc::new(OllamaProvider::new(settings)),
        ProviderKind::OpenAi => Arc::new(OpenAiProvider::new(settings)),
        ProviderKind::Gemini => Arc::new(GeminiProvider::new(settings)),
    }
}

/// Mutable state threaded through one streaming response
pub(crate) struct StreamContext {
    pub scanner: RecordScanner,
    pub provider: ProviderKind,
    /// Cumulative response text
    pub text: String,
    /// Local estimate of the outgoing prompt
    pub prompt_tokens: usize,
    /// Token counts the backend reported, when it reports any
    pub reported_prompt_tokens: Option<u32>,
    pub reported_completion_tokens: Option<u32>,
    /// Window the final ratio is measured against
    pub window: Option<u32>,
    /// Set once a terminal event has been emitted; nothing follows it
    pub terminated: bool,
}

impl StreamContext {
    pub(crate) fn new(
        framing: Framing,
        provider: ProviderKind,
        window: Option<u32>,
        prompt_tokens: usize,
    ) -> Self {
        Self {
            scanner: RecordScanner::new(framing),
            provider,
            text: String::new(),
            prompt_tokens,
            reported_prompt_tokens: None,
            reported_completion_tokens: None,
            window,
            terminated: false,
        }
    }

    /// Append a delta and produce the cumulative update event
    pub(crate) fn push_text(&mut self, delta: &str) -> StreamEvent {
        self.text.push_str(delta);
        StreamEvent::Update {
            text: self.text.clone(),
        }
    }

    /// Terminal success event
    pub(crate) fn done(&mut self) -> StreamEvent {
        self.terminated = true;
        StreamEvent::Done {
            text: self.text.clone(),
            context_ratio_percent: self.ratio_percent(),
        }
    }

    /// Terminal failure event
    pub(crate) fn fail(&mut self, err: QuillError) -> StreamEvent {
        self.terminated = true;
        StreamEvent::Failed(err)
    }

    /// Final request size as a percentage of the window, preferring
    /// backend-reported token counts over the local estimate
    fn ratio_percent(&self) -> u16 {
        let prompt = self
            .reported_prompt_tokens
            .map(|p| p as usize)
            .unwrap_or(self.prompt_tokens);
        let completion = match self.reported_completion_tokens {
            Some(c) => c as usize,
            None => TokenEstimator::new().estimate_string(&self.text),
        };
        let window = self.window.unwrap_or(DEFAULT_CONTEXT_WINDOW).max(1) as f64;
        (((prompt + completion) as f64 / window) * 100.0).round() as u16
    }
}

/// Turn a chunked HTTP body into chat events
///
/// `decode` maps one parsed record to events; malformed records are logged
/// and skipped, never escalated. A transport error mid-stream yields one
/// `Failed`; otherwise stream end yields `Done` unless the backend already
/// signalled completion in-band.
pub(crate) fn drive_stream<B, C, F>(byte_stream: B, context: StreamContext, decode: F) -> ChatStream
where
    B: futures::Stream<Item = Result<C, reqwest::Error>> + Send + 'static,
    C: AsRef<[u8]> + Send + 'static,
    F: FnMut(&Value, &mut StreamContext) -> Vec<StreamEvent> + Send + 'static,
{
    let state = Arc::new(tokio::sync::Mutex::new((context, decode)));

    let body = {
        let state = state.clone();
        byte_stream
            .flat_map(move |chunk_result| {
                let state = state.clone();
                futures::stream::once(async move {
                    let mut guard = state.lock().await;
                    let (ctx, decode) = &mut *guard;
                    let events = match chunk_result {
                        Ok(chunk) if !ctx.terminated => {
                            let mut events = Vec::new();
                            for record in ctx.scanner.feed(chunk.as_ref()) {
                                decode_one(&record, ctx, decode, &mut events);
                            }
                            events
                        }
                        Err(e) if !ctx.terminated => vec![ctx.fail(QuillError::from(e))],
                        _ => Vec::new(),
                    };
                    futures::stream::iter(events)
                })
            })
            .flatten()
    };

    let tail = futures::stream::once(async move {
        let mut guard = state.lock().await;
        let (ctx, decode) = &mut *guard;
        let mut events = Vec::new();
        if !ctx.terminated {
            if let Some(record) = ctx.scanner.finish() {
                decode_one(&record, ctx, decode, &mut events);
            }
            if !ctx.terminated {
                events.push(ctx.done());
            }
        }
        futures::stream::iter(events)
    })
    .flatten();

    Box::pin(body.chain(tail))
}

fn decode_one<F>(
    record: &str,
    ctx: &mut StreamContext,
    decode: &mut F,
    events: &mut Vec<StreamEvent>,
) where
    F: FnMut(&Value, &mut StreamContext) -> Vec<StreamEvent>,
{
    if ctx.terminated {
        return;
    }
    match serde_json::from_str::<Value>(record) {
        Ok(value) => events.extend(decode(&value, ctx)),
        Err(e) => {
            warn!(provider = %ctx.provider, error = %e, "skipping malformed stream record");
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::llm::stream::StreamEvent;

    /// Run a decode fn over a byte body split at the given chunk size,
    /// collecting every emitted event
    pub(crate) async fn run_chunked<F>(
        body: &[u8],
        chunk_size: usize,
        context: StreamContext,
        decode: F,
    ) -> Vec<StreamEvent>
    where
        F: FnMut(&Value, &mut StreamContext) -> Vec<StreamEvent> + Send + 'static,
    {
        let chunks: Vec<Result<Vec<u8>, reqwest::Error>> = body
            .chunks(chunk_size.max(1))
            .map(|c| Ok(c.to_vec()))
            .collect();
        let stream = drive_stream(futures::stream::iter(chunks), context, decode);
        stream.collect::<Vec<_>>().await
    }

    /// Final text of a terminal `Done`, panicking on `Failed`
    pub(crate) fn final_text(events: &[StreamEvent]) -> &str {
        match events.last() {
            Some(StreamEvent::Done { text, .. }) => text,
            other => panic!("expected terminal Done, got {other:?}"),
        }
    }
}
