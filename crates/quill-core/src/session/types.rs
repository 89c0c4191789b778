//! Session state
//!
//! A session bundles one conversation log with the state a renderer needs
//! to restore its view: prompt draft, prompt recall history, and scroll
//! position. [`SessionMeta`] is the lightweight listing row persisted
//! separately from full content so renames and switches never rewrite a
//! conversation blob.

use crate::history::HistoryStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Upper bound on recalled prompts per session
pub const PROMPT_HISTORY_MAX: usize = 50;

pub const DEFAULT_SESSION_NAME: &str = "New chat";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
    #[serde(default)]
    pub history: HistoryStore,
    /// Unsent prompt text, restored when the session becomes active again
    #[serde(default)]
    pub prompt_draft: String,
    /// Previously sent prompts, oldest first
    #[serde(default)]
    pub prompt_history: Vec<String>,
    /// Opaque renderer scroll offset
    #[serde(default)]
    pub scroll_position: f64,
}

impl Session {
    pub fn new() -> Self {
        Self::with_name(DEFAULT_SESSION_NAME)
    }

    pub fn with_name(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            created_at: now,
            last_modified: now,
            history: HistoryStore::new(),
            prompt_draft: String::new(),
            prompt_history: Vec::new(),
            scroll_position: 0.0,
        }
    }

    /// Bump the modification stamp
    pub fn touch(&mut self) {
        self.last_modified = Utc::now();
    }

    /// Record a sent prompt for up-arrow recall. Consecutive duplicates
    /// collapse into one and the list is capped at [`PROMPT_HISTORY_MAX`],
    /// dropping the oldest.
    pub fn push_prompt(&mut self, prompt: &str) {
        if prompt.is_empty() {
            return;
        }
        if self.prompt_history.last().map(String::as_str) == Some(prompt) {
            return;
        }
        self.prompt_history.push(prompt.to_string());
        if self.prompt_history.len() > PROMPT_HISTORY_MAX {
            let excess = self.prompt_history.len() - PROMPT_HISTORY_MAX;
            self.prompt_history.drain(..excess);
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// Listing row for a session; everything a session picker needs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMeta {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
}

impl From<&Session> for SessionMeta {
    fn from(session: &Session) -> Self {
        Self {
            id: session.id,
            name: session.name.clone(),
            created_at: session.created_at,
            last_modified: session.last_modified,
        }
    }
}
