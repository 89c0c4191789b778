//! Streaming chat events
//!
//! A chat call yields zero or more `Update`s followed by exactly one terminal
//! event (`Done` or `Failed`); nothing follows a terminal event and there is
//! no mid-stream cancellation. `Update` carries the cumulative text so far,
//! not a delta, so a consumer can re-render instead of appending.

use crate::error::{QuillError, QuillResult};
use futures::{Stream, StreamExt};
use std::pin::Pin;

/// One event from a streaming chat response
#[derive(Debug)]
pub enum StreamEvent {
    /// Cumulative response text so far
    Update { text: String },
    /// Terminal success with the final text and the request's estimated
    /// share of the context window
    Done {
        text: String,
        context_ratio_percent: u16,
    },
    /// Terminal failure; accumulated partial text is discarded by callers
    Failed(QuillError),
}

impl StreamEvent {
    /// True for `Done` and `Failed`
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Update { .. })
    }
}

/// Boxed stream of chat events
pub type ChatStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;

/// Drain a stream to its terminal event
///
/// Used for side-channel requests (summarization) where intermediate updates
/// are not rendered.
pub async fn collect_final(mut stream: ChatStream) -> QuillResult<(String, u16)> {
    while let Some(event) = stream.next().await {
        match event {
            StreamEvent::Update { .. } => {}
            StreamEvent::Done {
                text,
                context_ratio_percent,
            } => return Ok((text, context_ratio_percent)),
            StreamEvent::Failed(err) => return Err(err),
        }
    }
    Err(QuillError::http("stream ended without a terminal event"))
}
