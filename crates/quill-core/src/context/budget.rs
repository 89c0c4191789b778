//! Context-window budgeting
//!
//! Builds the entry list actually sent to a provider. Works on a copy; the
//! canonical history is never mutated here. Pass 1 drops the oldest
//! conversational turns, pass 2 falls back to dropping anything (file
//! snapshots included) until the budget fits or only the keep-floor remains.

use crate::context::estimator::TokenEstimator;
use crate::history::{ConversationEntry, MIN_MESSAGES_TO_KEEP};
use tracing::{debug, warn};

/// Context window assumed when a provider declares none
pub const DEFAULT_CONTEXT_WINDOW: u32 = 4096;

/// Result of budgeting one outgoing request
#[derive(Debug, Clone)]
pub struct PreparedContext {
    /// Entries to send, oldest first
    pub entries: Vec<ConversationEntry>,
    /// Estimate of `entries` after pruning
    pub estimated_tokens: usize,
    /// Window the estimate was measured against
    pub max_tokens: usize,
    /// Conversational turns dropped (both passes)
    pub dropped_turns: usize,
    /// Filenames of file snapshots dropped by the fallback pass
    pub dropped_files: Vec<String>,
    /// True when even the fallback pass could not fit the budget; the
    /// request is sent anyway and the provider's rejection flows through the
    /// normal error path
    pub over_budget: bool,
}

/// Token-budget controller
#[derive(Debug, Clone, Default)]
pub struct ContextBudget {
    estimator: TokenEstimator,
}

impl ContextBudget {
    pub fn new(estimator: TokenEstimator) -> Self {
        Self { estimator }
    }

    /// Estimated usage of the full (unpruned) history as a percentage of the
    /// window; drives proactive summarization
    pub fn usage_percent(&self, entries: &[ConversationEntry], max_tokens: Option<u32>) -> f64 {
        let max = max_tokens.unwrap_or(DEFAULT_CONTEXT_WINDOW).max(1) as f64;
        (self.estimator.estimate_entries(entries) as f64 / max) * 100.0
    }

    /// Produce a sendable copy of `entries` that fits `max_tokens`
    pub fn prepare_for_send(
        &self,
        entries: &[ConversationEntry],
        max_tokens: Option<u32>,
    ) -> PreparedContext {
        let max = max_tokens.unwrap_or(DEFAULT_CONTEXT_WINDOW) as usize;
        let mut kept: Vec<ConversationEntry> = entries
            .iter()
            .filter(|e| e.is_sendable())
            .cloned()
            .collect();
        let mut current = self.estimator.estimate_entries(&kept);
        let mut dropped_turns = 0usize;
        let mut dropped_files = Vec::new();

        // Pass 1: oldest conversational turns only, file snapshots stay
        while current > max && kept.len() > MIN_MESSAGES_TO_KEEP {
            let Some(pos) = kept.iter().position(|e| e.is_eligible()) else {
                break;
            };
            let removed = kept.remove(pos);
            current -= self.estimator.estimate_entry(&removed);
            dropped_turns += 1;
        }

        // Pass 2: still over, drop unconditionally from the front
        while current > max && kept.len() > MIN_MESSAGES_TO_KEEP {
            let removed = kept.remove(0);
            current -= self.estimator.estimate_entry(&removed);
            match &removed {
                ConversationEntry::FileContext { filename, .. } => {
                    dropped_files.push(filename.clone());
                }
                _ => dropped_turns += 1,
            }
        }

        let over_budget = current > max;
        if over_budget {
            warn!(
                estimated = current,
                max, "context still over budget after pruning; sending anyway"
            );
        } else if dropped_turns > 0 || !dropped_files.is_empty() {
            debug!(
                dropped_turns,
                dropped_files = dropped_files.len(),
                estimated = current,
                max,
                "pruned context to fit budget"
            );
        }

        PreparedContext {
            entries: kept,
            estimated_tokens: current,
            max_tokens: max,
            dropped_turns,
            dropped_files,
            over_budget,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alternating_turns(pairs: usize, chars: usize) -> Vec<ConversationEntry> {
        let mut entries = Vec::new();
        for i in 0..pairs {
            entries.push(ConversationEntry::user("u".repeat(chars)));
            entries.push(ConversationEntry::model(format!(
                "{}{}",
                "m".repeat(chars.saturating_sub(2)),
                i % 100
            )));
        }
        entries
    }

    #[test]
    fn test_huge_window_passes_everything_through() {
        let budget = ContextBudget::default();
        let entries = vec![
            ConversationEntry::user("hi"),
            ConversationEntry::model("hello"),
        ];
        let prepared = budget.prepare_for_send(&entries, Some(1_000_000));
        assert_eq!(prepared.entries.len(), 2);
        assert_eq!(prepared.dropped_turns, 0);
        assert!(!prepared.over_budget);
        assert_eq!(prepared.entries[0].content(), "hi");
        assert_eq!(prepared.entries[1].content(), "hello");
    }

    #[test]
    fn test_pass_one_drops_oldest_until_under_budget() {
        let budget = ContextBudget::default();
        // 20 turns x 100 chars: 29 estimated tokens each, 580 total
        let entries = alternating_turns(10, 100);
        let prepared = budget.prepare_for_send(&entries, Some(200));

        assert!(prepared.estimated_tokens <= 200);
        assert!(!prepared.entries.is_empty());
        assert_eq!(prepared.entries.len(), 6); // 6 * 29 = 174
        assert_eq!(prepared.dropped_turns, 14);
        // Survivors are the most recent turns, order intact
        let tail: Vec<_> = entries[14..].to_vec();
        assert_eq!(prepared.entries, tail);
    }

    #[test]
    fn test_budget_invariant_or_floor() {
        let budget = ContextBudget::default();
        for window in [1u32, 40, 120, 700] {
            let entries = alternating_turns(8, 64);
            let prepared = budget.prepare_for_send(&entries, Some(window));
            let estimator = TokenEstimator::new();
            assert!(
                estimator.estimate_entries(&prepared.entries) <= window as usize
                    || prepared.entries.len() <= MIN_MESSAGES_TO_KEEP,
                "window {window}: invariant violated"
            );
        }
    }

    #[test]
    fn test_pass_one_leaves_file_snapshots() {
        let budget = ContextBudget::default();
        let mut entries = vec![ConversationEntry::file_context(
            "ctx.rs",
            "rust",
            "x".repeat(200),
        )];
        entries.extend(alternating_turns(5, 100));
        let prepared = budget.prepare_for_send(&entries, Some(200));

        assert!(prepared.entries[0].is_file_context());
        assert!(prepared.dropped_files.is_empty());
        assert!(prepared.estimated_tokens <= 200);
    }

    #[test]
    fn test_pass_two_drops_files_as_fallback() {
        let budget = ContextBudget::default();
        let entries = vec![
            ConversationEntry::file_context("big1.rs", "rust", "x".repeat(4000)),
            ConversationEntry::file_context("big2.rs", "rust", "y".repeat(4000)),
            ConversationEntry::user("tiny question"),
        ];
        let prepared = budget.prepare_for_send(&entries, Some(50));

        assert_eq!(prepared.dropped_turns, 1);
        assert_eq!(prepared.dropped_files, vec!["big1.rs".to_string()]);
        assert_eq!(prepared.entries.len(), MIN_MESSAGES_TO_KEEP);
        assert!(prepared.over_budget); // big2.rs alone still exceeds 50
    }

    #[test]
    fn test_notices_and_pending_never_sent() {
        let budget = ContextBudget::default();
        let entries = vec![
            ConversationEntry::notice("system note"),
            ConversationEntry::user("hi"),
            ConversationEntry::error("previous failure"),
            ConversationEntry::pending_model(),
        ];
        let prepared = budget.prepare_for_send(&entries, None);
        assert_eq!(prepared.entries.len(), 1);
        assert_eq!(prepared.entries[0].content(), "hi");
    }

    #[test]
    fn test_usage_percent() {
        let budget = ContextBudget::default();
        // 4096-char turn = 1024 + 4 tokens against the 4096 fallback window
        let entries = vec![ConversationEntry::user("a".repeat(4096))];
        let pct = budget.usage_percent(&entries, None);
        assert!((pct - 25.09).abs() < 0.1, "got {pct}");
    }
}
