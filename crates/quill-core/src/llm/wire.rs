//! Provider wire-format conversion
//!
//! Turns history entries into the generic role/content list providers
//! serialize into their request bodies. File snapshots travel as user
//! messages in fenced-block form. APIs that reject consecutive same-role
//! turns get user runs (user turns and file snapshots) collapsed into one
//! message; content is concatenated in order, with no separator beyond the
//! fenced block's own trailing newline.

use crate::history::ConversationEntry;

/// Role of an outgoing message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireRole {
    User,
    Model,
}

impl WireRole {
    /// Label for OpenAI-style APIs ("assistant" for model turns)
    pub fn openai_label(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Model => "assistant",
        }
    }

    /// Label for Gemini-style APIs ("model" for model turns)
    pub fn gemini_label(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Model => "model",
        }
    }
}

/// One outgoing message before provider-specific serialization
#[derive(Debug, Clone, PartialEq)]
pub struct WireMessage {
    pub role: WireRole,
    pub content: String,
}

/// Whether consecutive user-role items are merged
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergePolicy {
    /// One wire message per entry
    Preserve,
    /// Collapse runs of user turns/file snapshots into one user message
    CollapseUserRuns,
}

/// Convert history entries to wire messages
///
/// Notices, error records, and in-flight placeholders never reach the wire.
pub fn conversation_messages(
    entries: &[ConversationEntry],
    policy: MergePolicy,
) -> Vec<WireMessage> {
    let mut messages: Vec<WireMessage> = Vec::new();
    for entry in entries.iter().filter(|e| e.is_sendable()) {
        let (role, content) = match entry {
            ConversationEntry::UserTurn { content, .. } => (WireRole::User, content.clone()),
            ConversationEntry::FileContext { .. } => (WireRole::User, entry.wire_text()),
            ConversationEntry::ModelTurn { content, .. } => (WireRole::Model, content.clone()),
            _ => continue,
        };

        if policy == MergePolicy::CollapseUserRuns && role == WireRole::User {
            if let Some(last) = messages.last_mut() {
                if last.role == WireRole::User {
                    if !last.content.is_empty() && !last.content.ends_with('\n') {
                        last.content.push('\n');
                    }
                    last.content.push_str(&content);
                    continue;
                }
            }
        }
        messages.push(WireMessage { role, content });
    }
    messages
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_role_mapping() {
        let entries = vec![
            ConversationEntry::user("hi"),
            ConversationEntry::model("hello"),
        ];
        let messages = conversation_messages(&entries, MergePolicy::Preserve);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, WireRole::User);
        assert_eq!(messages[0].content, "hi");
        assert_eq!(messages[1].role, WireRole::Model);
        assert_eq!(messages[1].content, "hello");
        assert_eq!(messages[1].role.openai_label(), "assistant");
        assert_eq!(messages[1].role.gemini_label(), "model");
    }

    #[test]
    fn test_collapse_merges_user_run() {
        let entries = vec![
            ConversationEntry::file_context("a.js", "javascript", "1"),
            ConversationEntry::file_context("b.js", "javascript", "2"),
            ConversationEntry::user("explain these"),
            ConversationEntry::model("sure"),
        ];
        let messages = conversation_messages(&entries, MergePolicy::CollapseUserRuns);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, WireRole::User);
        assert_eq!(
            messages[0].content,
            "File: a.js\n```javascript\n1\n```\nFile: b.js\n```javascript\n2\n```\nexplain these"
        );
        assert_eq!(messages[1].role, WireRole::Model);
    }

    #[test]
    fn test_preserve_keeps_run_separate() {
        let entries = vec![
            ConversationEntry::file_context("a.js", "javascript", "1"),
            ConversationEntry::user("explain"),
        ];
        let messages = conversation_messages(&entries, MergePolicy::Preserve);
        assert_eq!(messages.len(), 2);
    }

    #[test]
    fn test_user_turns_merge_with_newline() {
        // Two user turns in a row (possible after a failed generation)
        let entries = vec![
            ConversationEntry::user("first"),
            ConversationEntry::user("second"),
        ];
        let messages = conversation_messages(&entries, MergePolicy::CollapseUserRuns);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "first\nsecond");
    }

    #[test]
    fn test_local_entries_excluded() {
        let entries = vec![
            ConversationEntry::notice("note"),
            ConversationEntry::user("hi"),
            ConversationEntry::error("failed"),
            ConversationEntry::pending_model(),
        ];
        let messages = conversation_messages(&entries, MergePolicy::Preserve);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "hi");
    }

    #[test]
    fn test_model_turns_never_merge() {
        let entries = vec![
            ConversationEntry::model("summary"),
            ConversationEntry::model("answer"),
        ];
        let messages = conversation_messages(&entries, MergePolicy::CollapseUserRuns);
        assert_eq!(messages.len(), 2);
    }
}
