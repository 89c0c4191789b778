//! Summarization planning
//!
//! Decides which leading slice of a conversation gets compressed into a
//! single summary turn. Planning is pure: the caller (the engine) sends
//! the prompt to the active provider and splices the result back in.
//! Recent turns are always preserved so the model keeps short-term
//! context even after aggressive compression.

use crate::config::DEFAULT_SUMMARY_TARGET_PERCENT;
use crate::context::estimator::TokenEstimator;
use crate::history::ConversationEntry;

/// Eligible messages that are never summarized away, counted from the
/// end of the conversation.
pub const MAX_RECENT_MESSAGES_TO_PRESERVE: usize = 5;

/// Every summary turn starts with this line so renderers and follow-up
/// summarization passes can recognize it.
pub const SUMMARY_PREFIX: &str = "Summary of prior conversation:";

/// A concrete compression decision over a snapshot of the history.
///
/// `start..start + count` is the entry range to replace, including any
/// notices or file snapshots interleaved with the summarized turns;
/// those are discarded with the range. `eligible` holds only the user
/// and model turns the summary prompt is built from.
#[derive(Debug, Clone)]
pub struct SummaryPlan {
    pub start: usize,
    pub count: usize,
    pub eligible: Vec<ConversationEntry>,
}

/// Pure planner for history compression.
#[derive(Debug, Clone, Copy)]
pub struct SummaryPolicy {
    target_percent: u8,
}

impl Default for SummaryPolicy {
    fn default() -> Self {
        Self {
            target_percent: DEFAULT_SUMMARY_TARGET_PERCENT,
        }
    }
}

impl SummaryPolicy {
    /// `target_percent` is the share of eligible messages to fold into
    /// the summary, before the recency floor is applied.
    pub fn new(target_percent: u8) -> Self {
        Self { target_percent }
    }

    /// Work out what to compress, or `None` when the conversation is
    /// too short to be worth it.
    ///
    /// Leading file snapshots are never part of the summarized block.
    /// The plan covers at most `total - MAX_RECENT_MESSAGES_TO_PRESERVE`
    /// eligible messages and aborts below two, which makes repeated
    /// invocations on an already-compressed history a no-op.
    pub fn plan(&self, entries: &[ConversationEntry]) -> Option<SummaryPlan> {
        let block_start = entries.iter().position(|e| !e.is_file_context())?;
        let block = &entries[block_start..];

        let total_eligible = block.iter().filter(|e| e.is_eligible()).count();
        let max_possible = total_eligible.saturating_sub(MAX_RECENT_MESSAGES_TO_PRESERVE);
        let target = total_eligible * self.target_percent as usize / 100;
        let final_count = target.min(max_possible);
        if final_count < 2 {
            return None;
        }

        // Walk forward to the final_count-th eligible message; everything
        // up to and including it is replaced.
        let mut seen = 0usize;
        let mut count = 0usize;
        let mut eligible = Vec::with_capacity(final_count);
        for (offset, entry) in block.iter().enumerate() {
            if entry.is_eligible() {
                seen += 1;
                eligible.push(entry.clone());
                if seen == final_count {
                    count = offset + 1;
                    break;
                }
            }
        }

        Some(SummaryPlan {
            start: block_start,
            count,
            eligible,
        })
    }
}

/// Build the side-channel prompt that asks the model to compress the
/// given turns. The transcript is rendered as `Role: content` lines.
pub fn summary_prompt(eligible: &[ConversationEntry]) -> String {
    let transcript = eligible
        .iter()
        .map(|entry| format!("{}: {}", entry.role_label(), entry.content()))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "Summarize the following conversation concisely, preserving key decisions, \
         code changes, and unresolved questions. Respond with only the summary text.\n\n\
         {transcript}"
    )
}

/// Build the two entries that replace a summarized range: the summary
/// model turn and a notice reporting the before/after token estimates.
/// Returns `(replacements, tokens_before, tokens_after)`.
pub fn replacement_entries(
    summary_text: &str,
    replaced: &[ConversationEntry],
    estimator: &TokenEstimator,
) -> (Vec<ConversationEntry>, usize, usize) {
    let tokens_before = estimator.estimate_entries(replaced);
    let summary_turn =
        ConversationEntry::model(format!("{SUMMARY_PREFIX}\n{}", summary_text.trim()));
    let tokens_after = estimator.estimate_entry(&summary_turn);
    let compressed = replaced.iter().filter(|e| e.is_eligible()).count();
    let notice = ConversationEntry::notice(format!(
        "Summarized {compressed} messages: ~{tokens_before} tokens compressed to ~{tokens_after}"
    ));
    (vec![summary_turn, notice], tokens_before, tokens_after)
}
