//! Typed conversation entries
//!
//! A history is an ordered log of these entries. User and model turns are the
//! "eligible" conversation kinds that pruning and summarization operate on;
//! file snapshots ride along as context, and notices/errors are local-only
//! audit records that never reach a provider.

use crate::history::patch::PatchKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One entry in a session's conversation log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConversationEntry {
    /// A turn typed by the user
    UserTurn {
        id: String,
        content: String,
        timestamp: DateTime<Utc>,
    },
    /// A turn produced by the model
    ModelTurn {
        id: String,
        content: String,
        timestamp: DateTime<Utc>,
        /// Applied-state of diff blocks in `content`, keyed by stable patch key
        #[serde(default, skip_serializing_if = "HashMap::is_empty")]
        patch_status: HashMap<PatchKey, bool>,
        /// True while streamed text is still arriving; in-flight turns are
        /// never sent, estimated, summarized, or persisted as pending
        #[serde(skip)]
        pending: bool,
    },
    /// Full-text snapshot of an external file; `id` is the file path
    FileContext {
        id: String,
        filename: String,
        language: String,
        content: String,
        timestamp: DateTime<Utc>,
    },
    /// Informational note shown to the user, never sent to a provider
    SystemNotice {
        content: String,
        timestamp: DateTime<Utc>,
    },
    /// Record of a failed generation, never sent to a provider
    ErrorEntry {
        content: String,
        timestamp: DateTime<Utc>,
    },
}

fn new_entry_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

impl ConversationEntry {
    /// Create a user turn with a fresh id
    pub fn user(content: impl Into<String>) -> Self {
        Self::UserTurn {
            id: new_entry_id(),
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    /// Create a completed model turn with a fresh id
    pub fn model(content: impl Into<String>) -> Self {
        Self::ModelTurn {
            id: new_entry_id(),
            content: content.into(),
            timestamp: Utc::now(),
            patch_status: HashMap::new(),
            pending: false,
        }
    }

    /// Create an empty in-flight model turn awaiting streamed text
    pub fn pending_model() -> Self {
        Self::ModelTurn {
            id: new_entry_id(),
            content: String::new(),
            timestamp: Utc::now(),
            patch_status: HashMap::new(),
            pending: true,
        }
    }

    /// Create a file snapshot; the path doubles as the entry id and the
    /// display filename is its last segment
    pub fn file_context(
        path: impl Into<String>,
        language: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let path = path.into();
        let filename = path
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(path.as_str())
            .to_string();
        Self::FileContext {
            id: path,
            filename,
            language: language.into(),
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    /// Create a system notice
    pub fn notice(content: impl Into<String>) -> Self {
        Self::SystemNotice {
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    /// Create an error record
    pub fn error(content: impl Into<String>) -> Self {
        Self::ErrorEntry {
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    /// Entry id, if this kind carries one
    pub fn id(&self) -> Option<&str> {
        match self {
            Self::UserTurn { id, .. } | Self::ModelTurn { id, .. } | Self::FileContext { id, .. } => {
                Some(id)
            }
            Self::SystemNotice { .. } | Self::ErrorEntry { .. } => None,
        }
    }

    /// Entry creation time
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::UserTurn { timestamp, .. }
            | Self::ModelTurn { timestamp, .. }
            | Self::FileContext { timestamp, .. }
            | Self::SystemNotice { timestamp, .. }
            | Self::ErrorEntry { timestamp, .. } => *timestamp,
        }
    }

    /// Text content of the entry
    pub fn content(&self) -> &str {
        match self {
            Self::UserTurn { content, .. }
            | Self::ModelTurn { content, .. }
            | Self::FileContext { content, .. }
            | Self::SystemNotice { content, .. }
            | Self::ErrorEntry { content, .. } => content,
        }
    }

    /// True for completed user/model turns — the kinds pruning and
    /// summarization target
    pub fn is_eligible(&self) -> bool {
        match self {
            Self::UserTurn { .. } => true,
            Self::ModelTurn { pending, .. } => !pending,
            _ => false,
        }
    }

    /// True for entries that go to the provider (turns plus file snapshots,
    /// excluding in-flight placeholders)
    pub fn is_sendable(&self) -> bool {
        match self {
            Self::UserTurn { .. } | Self::FileContext { .. } => true,
            Self::ModelTurn { pending, .. } => !pending,
            Self::SystemNotice { .. } | Self::ErrorEntry { .. } => false,
        }
    }

    /// True if this is a file snapshot
    pub fn is_file_context(&self) -> bool {
        matches!(self, Self::FileContext { .. })
    }

    /// True if this is an in-flight model turn
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::ModelTurn { pending: true, .. })
    }

    /// Role label used when rendering turns into a summarization prompt
    pub fn role_label(&self) -> &'static str {
        match self {
            Self::UserTurn { .. } => "User",
            Self::ModelTurn { .. } => "Model",
            Self::FileContext { .. } => "File",
            Self::SystemNotice { .. } => "System",
            Self::ErrorEntry { .. } => "Error",
        }
    }

    /// Fenced-block rendering of a file snapshot, used both on the wire and
    /// for token measurement; other kinds render as their plain content.
    ///
    /// The trailing newline is part of the block so that merged user runs can
    /// concatenate parts without inserting separators.
    pub fn wire_text(&self) -> String {
        match self {
            Self::FileContext {
                filename,
                language,
                content,
                ..
            } => format!("File: {filename}\n```{language}\n{content}\n```\n"),
            other => other.content().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constructors_assign_unique_ids() {
        let a = ConversationEntry::user("hi");
        let b = ConversationEntry::user("hi");
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_file_context_id_is_path() {
        let entry = ConversationEntry::file_context("src/main.js", "javascript", "let x = 1;");
        assert_eq!(entry.id(), Some("src/main.js"));
        match &entry {
            ConversationEntry::FileContext { filename, .. } => assert_eq!(filename, "main.js"),
            other => panic!("unexpected kind: {other:?}"),
        }
    }

    #[test]
    fn test_fenced_block_rendering() {
        let entry = ConversationEntry::file_context("a.js", "javascript", "let x = 1;");
        assert_eq!(
            entry.wire_text(),
            "File: a.js\n```javascript\nlet x = 1;\n```\n"
        );
    }

    #[test]
    fn test_eligibility() {
        assert!(ConversationEntry::user("q").is_eligible());
        assert!(ConversationEntry::model("a").is_eligible());
        assert!(!ConversationEntry::pending_model().is_eligible());
        assert!(!ConversationEntry::notice("n").is_eligible());
        assert!(!ConversationEntry::file_context("f", "text", "c").is_eligible());
        assert!(ConversationEntry::file_context("f", "text", "c").is_sendable());
    }

    #[test]
    fn test_serde_kind_tagging() {
        let entry = ConversationEntry::notice("summarized 4 messages");
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["kind"], "system_notice");
        let back: ConversationEntry = serde_json::from_value(json).unwrap();
        assert_eq!(back, entry);
    }
}
