//! Notification fan-out
//!
//! Engine-side happenings are broadcast to any number of renderer
//! subscribers. Publishing never blocks and never fails: with no
//! subscribers the notification is dropped, and a subscriber that falls
//! behind the channel capacity observes a lag error rather than applying
//! backpressure to the engine.

use crate::history::ConversationEntry;
use crate::llm::ProviderKind;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;

/// Something a renderer may want to react to
#[derive(Debug, Clone)]
pub enum Notification {
    EntryAppended {
        session_id: Uuid,
        entry: ConversationEntry,
    },
    StreamStarted {
        session_id: Uuid,
        provider: ProviderKind,
    },
    /// Cumulative text of the in-flight model turn
    StreamUpdate {
        session_id: Uuid,
        text: String,
    },
    StreamFinished {
        session_id: Uuid,
        context_ratio_percent: u16,
    },
    GenerationFailed {
        session_id: Uuid,
        message: String,
    },
    HistoryPruned {
        session_id: Uuid,
        dropped_turns: usize,
        dropped_files: Vec<String>,
    },
    SummarizeStarted {
        session_id: Uuid,
    },
    SummarizeFinished {
        session_id: Uuid,
        tokens_before: usize,
        tokens_after: usize,
    },
    SummarizeFailed {
        session_id: Uuid,
        message: String,
    },
    SessionCreated {
        session_id: Uuid,
    },
    SessionSwitched {
        session_id: Uuid,
    },
    SessionDeleted {
        session_id: Uuid,
    },
}

impl Notification {
    /// Stable label for logging and routing
    pub fn kind(&self) -> &'static str {
        match self {
            Self::EntryAppended { .. } => "entry_appended",
            Self::StreamStarted { .. } => "stream_started",
            Self::StreamUpdate { .. } => "stream_update",
            Self::StreamFinished { .. } => "stream_finished",
            Self::GenerationFailed { .. } => "generation_failed",
            Self::HistoryPruned { .. } => "history_pruned",
            Self::SummarizeStarted { .. } => "summarize_started",
            Self::SummarizeFinished { .. } => "summarize_finished",
            Self::SummarizeFailed { .. } => "summarize_failed",
            Self::SessionCreated { .. } => "session_created",
            Self::SessionSwitched { .. } => "session_switched",
            Self::SessionDeleted { .. } => "session_deleted",
        }
    }

    /// Session the notification concerns
    pub fn session_id(&self) -> Uuid {
        match self {
            Self::EntryAppended { session_id, .. }
            | Self::StreamStarted { session_id, .. }
            | Self::StreamUpdate { session_id, .. }
            | Self::StreamFinished { session_id, .. }
            | Self::GenerationFailed { session_id, .. }
            | Self::HistoryPruned { session_id, .. }
            | Self::SummarizeStarted { session_id }
            | Self::SummarizeFinished { session_id, .. }
            | Self::SummarizeFailed { session_id, .. }
            | Self::SessionCreated { session_id }
            | Self::SessionSwitched { session_id }
            | Self::SessionDeleted { session_id } => *session_id,
        }
    }
}

/// Broadcast channel wrapper the engine publishes through
#[derive(Debug, Clone)]
pub struct NotificationBus {
    sender: broadcast::Sender<Notification>,
    capacity: usize,
}

impl NotificationBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender, capacity }
    }

    /// Publish to all current subscribers; returns how many received it
    pub fn publish(&self, notification: Notification) -> usize {
        match self.sender.send(notification) {
            Ok(count) => count,
            Err(_) => 0,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }

    /// Subscribe as a `futures`-compatible stream
    pub fn subscribe_stream(&self) -> BroadcastStream<Notification> {
        BroadcastStream::new(self.sender.subscribe())
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for NotificationBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_stream::StreamExt;

    #[test]
    fn test_publish_without_subscribers_is_dropped() {
        let bus = NotificationBus::default();
        let delivered = bus.publish(Notification::SessionCreated {
            session_id: Uuid::new_v4(),
        });
        assert_eq!(delivered, 0);
    }

    #[tokio::test]
    async fn test_all_subscribers_receive() {
        let bus = NotificationBus::new(8);
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();
        let id = Uuid::new_v4();

        let delivered = bus.publish(Notification::SessionSwitched { session_id: id });
        assert_eq!(delivered, 2);

        let a = first.recv().await.unwrap();
        let b = second.recv().await.unwrap();
        assert_eq!(a.kind(), "session_switched");
        assert_eq!(b.session_id(), id);
    }

    #[tokio::test]
    async fn test_stream_subscription() {
        let bus = NotificationBus::default();
        let mut stream = bus.subscribe_stream();
        let id = Uuid::new_v4();

        bus.publish(Notification::StreamUpdate {
            session_id: id,
            text: "partial".to_string(),
        });

        let received = stream.next().await.unwrap().unwrap();
        match received {
            Notification::StreamUpdate { text, .. } => assert_eq!(text, "partial"),
            other => panic!("unexpected notification {}", other.kind()),
        }
    }

    #[test]
    fn test_kind_labels_are_distinct() {
        let id = Uuid::new_v4();
        let notifications = [
            Notification::SummarizeStarted { session_id: id },
            Notification::SummarizeFinished {
                session_id: id,
                tokens_before: 100,
                tokens_after: 20,
            },
            Notification::SummarizeFailed {
                session_id: id,
                message: "x".to_string(),
            },
        ];
        let kinds: Vec<_> = notifications.iter().map(|n| n.kind()).collect();
        assert_eq!(kinds, ["summarize_started", "summarize_finished", "summarize_failed"]);
    }
}
