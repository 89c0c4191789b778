//! Ordered, mutable conversation log
//!
//! Ordering is insertion order and is never rearranged; every mutation either
//! appends, removes from the front under a keep-floor, or splices a
//! contiguous range. Callers must complete a read-modify-write against the
//! store without awaiting in between.

use crate::error::{QuillError, QuillResult};
use crate::history::entry::ConversationEntry;
use crate::history::patch::PatchKey;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Entries never pruned away: at least this many always remain
pub const MIN_MESSAGES_TO_KEEP: usize = 1;

/// The conversation log of one session
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HistoryStore {
    entries: Vec<ConversationEntry>,
}

impl HistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: Vec<ConversationEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[ConversationEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Find an entry by id
    pub fn entry(&self, id: &str) -> Option<&ConversationEntry> {
        self.entries.iter().find(|e| e.id() == Some(id))
    }

    /// Append an entry. A file snapshot first removes any existing snapshot
    /// with the same id, so at most one live snapshot exists per file path.
    pub fn append(&mut self, entry: ConversationEntry) {
        if entry.is_file_context() {
            if let Some(id) = entry.id() {
                let before = self.entries.len();
                let id = id.to_string();
                self.entries.retain(|e| e.id() != Some(id.as_str()));
                if self.entries.len() < before {
                    debug!(file = %id, "replacing existing file snapshot");
                }
            }
        }
        self.entries.push(entry);
    }

    /// Remove matching entries from the front, never shrinking the store
    /// below [`MIN_MESSAGES_TO_KEEP`]. Non-matching entries are skipped over
    /// and left in place. Returns the removed entries in removal order.
    pub fn prune_oldest_eligible<F>(&mut self, predicate: F) -> Vec<ConversationEntry>
    where
        F: Fn(&ConversationEntry) -> bool,
    {
        let mut removed = Vec::new();
        let mut index = 0;
        while index < self.entries.len() && self.entries.len() > MIN_MESSAGES_TO_KEEP {
            if predicate(&self.entries[index]) {
                removed.push(self.entries.remove(index));
            } else {
                index += 1;
            }
        }
        if !removed.is_empty() {
            debug!(count = removed.len(), "pruned oldest entries");
        }
        removed
    }

    /// Atomically replace `count` entries starting at `start` with
    /// `replacements`. Entries before and after the range are untouched.
    /// Returns the removed range.
    pub fn splice(
        &mut self,
        start: usize,
        count: usize,
        replacements: Vec<ConversationEntry>,
    ) -> QuillResult<Vec<ConversationEntry>> {
        let end = start
            .checked_add(count)
            .filter(|end| *end <= self.entries.len())
            .ok_or_else(|| {
                QuillError::invalid_input(format!(
                    "splice range {start}+{count} exceeds history length {}",
                    self.entries.len()
                ))
            })?;
        debug!(start, count, added = replacements.len(), "splicing history range");
        Ok(self.entries.splice(start..end, replacements).collect())
    }

    /// The entries summarization may compress: completed user/model turns
    pub fn eligible_for_summarization(&self) -> Vec<&ConversationEntry> {
        self.entries.iter().filter(|e| e.is_eligible()).collect()
    }

    /// Append an in-flight model turn and return its id
    pub fn begin_pending_model(&mut self) -> String {
        let entry = ConversationEntry::pending_model();
        let id = entry.id().map(str::to_string).unwrap_or_default();
        self.entries.push(entry);
        id
    }

    /// Replace the cumulative text of an in-flight model turn
    pub fn update_pending(&mut self, id: &str, cumulative_text: &str) -> bool {
        for entry in self.entries.iter_mut().rev() {
            if let ConversationEntry::ModelTurn {
                id: entry_id,
                content,
                pending: true,
                ..
            } = entry
            {
                if entry_id == id {
                    content.clear();
                    content.push_str(cumulative_text);
                    return true;
                }
            }
        }
        false
    }

    /// Mark an in-flight model turn complete with its final text
    pub fn complete_pending(&mut self, id: &str, final_text: &str) -> bool {
        for entry in self.entries.iter_mut().rev() {
            if let ConversationEntry::ModelTurn {
                id: entry_id,
                content,
                pending,
                ..
            } = entry
            {
                if entry_id == id && *pending {
                    content.clear();
                    content.push_str(final_text);
                    *pending = false;
                    return true;
                }
            }
        }
        false
    }

    /// Remove an entry by id, returning it if present
    pub fn remove_entry(&mut self, id: &str) -> Option<ConversationEntry> {
        let pos = self.entries.iter().position(|e| e.id() == Some(id))?;
        Some(self.entries.remove(pos))
    }

    /// Set the applied-state of one diff block on a model turn
    pub fn set_patch_status(&mut self, turn_id: &str, key: PatchKey, applied: bool) -> bool {
        for entry in self.entries.iter_mut() {
            if let ConversationEntry::ModelTurn {
                id, patch_status, ..
            } = entry
            {
                if id == turn_id {
                    patch_status.insert(key, applied);
                    return true;
                }
            }
        }
        false
    }

    /// Applied-state of one diff block, if recorded
    pub fn patch_status(&self, turn_id: &str, key: &PatchKey) -> Option<bool> {
        match self.entry(turn_id)? {
            ConversationEntry::ModelTurn { patch_status, .. } => patch_status.get(key).copied(),
            _ => None,
        }
    }
}
