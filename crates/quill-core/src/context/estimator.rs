//! Token estimation for conversation entries
//!
//! Exact tokenization varies by provider and none expose a free synchronous
//! tokenizer, so budgeting runs on a character-count approximation. Entries
//! that never reach a provider (notices, error records, in-flight
//! placeholders) estimate to zero.

use crate::history::ConversationEntry;

/// Token estimator for conversation entries
#[derive(Debug, Clone)]
pub struct TokenEstimator {
    /// Characters per token (average)
    chars_per_token: f32,
    /// Overhead tokens per message (role, formatting)
    message_overhead: usize,
}

impl Default for TokenEstimator {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenEstimator {
    /// Create a new token estimator with default settings
    pub fn new() -> Self {
        Self {
            chars_per_token: 4.0, // Common approximation for English text
            message_overhead: 4,  // Role token + formatting
        }
    }

    /// Estimate tokens for a single entry
    ///
    /// File snapshots are measured over their fenced-block rendering, since
    /// that is the text actually sent.
    pub fn estimate_entry(&self, entry: &ConversationEntry) -> usize {
        if !entry.is_sendable() {
            return 0;
        }
        let text = match entry {
            ConversationEntry::FileContext { .. } => entry.wire_text(),
            other => other.content().to_string(),
        };
        self.estimate_string(&text) + self.message_overhead
    }

    /// Estimate tokens for a sequence of entries
    pub fn estimate_entries(&self, entries: &[ConversationEntry]) -> usize {
        entries.iter().map(|e| self.estimate_entry(e)).sum()
    }

    /// Estimate tokens for a string
    pub fn estimate_string(&self, text: &str) -> usize {
        (text.len() as f32 / self.chars_per_token).ceil() as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_string() {
        let estimator = TokenEstimator::new();

        // 100 chars / 4 chars per token = 25 tokens
        let text = "a".repeat(100);
        assert_eq!(estimator.estimate_string(&text), 25);

        // Rounds up
        assert_eq!(estimator.estimate_string("abcde"), 2);
        assert_eq!(estimator.estimate_string(""), 0);
    }

    #[test]
    fn test_estimate_turn_includes_overhead() {
        let estimator = TokenEstimator::new();
        let turn = ConversationEntry::user("a".repeat(100));
        assert_eq!(estimator.estimate_entry(&turn), 29);

        let empty = ConversationEntry::user("");
        assert_eq!(estimator.estimate_entry(&empty), 4); // Just overhead
    }

    #[test]
    fn test_file_snapshot_measured_as_fenced_block() {
        let estimator = TokenEstimator::new();
        let entry = ConversationEntry::file_context("a.js", "javascript", "let x = 1;");
        let expected = estimator.estimate_string(&entry.wire_text()) + 4;
        assert_eq!(estimator.estimate_entry(&entry), expected);
        assert!(estimator.estimate_entry(&entry) > estimator.estimate_string("let x = 1;"));
    }

    #[test]
    fn test_local_only_entries_are_free() {
        let estimator = TokenEstimator::new();
        assert_eq!(estimator.estimate_entry(&ConversationEntry::notice("n")), 0);
        assert_eq!(estimator.estimate_entry(&ConversationEntry::error("e")), 0);
        assert_eq!(
            estimator.estimate_entry(&ConversationEntry::pending_model()),
            0
        );
    }

    #[test]
    fn test_estimate_conversation() {
        let estimator = TokenEstimator::new();
        let entries = vec![
            ConversationEntry::user("a".repeat(40)),  // 10 + 4
            ConversationEntry::model("b".repeat(20)), // 5 + 4
            ConversationEntry::notice("ignored"),     // 0
        ];
        assert_eq!(estimator.estimate_entries(&entries), 23);
    }
}
