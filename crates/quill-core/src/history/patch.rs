//! Diff-block identity for model turns
//!
//! Model responses may contain ```diff fenced blocks the user can apply to
//! the workspace. Applied-state is tracked per block under a [`PatchKey`]
//! derived from the block's target path and first hunk header, so statuses
//! survive re-rendering and edits elsewhere in the same message (a positional
//! index would not).

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

static DIFF_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?ms)^```diff[ \t]*\r?\n(.*?)^```[ \t]*(?:\r?\n|\z)").unwrap());
static NEW_PATH: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^\+\+\+ (?:b/)?(\S+)").unwrap());
static OLD_PATH: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^--- (?:a/)?(\S+)").unwrap());
static HUNK_HEADER: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^@@[^\n]*").unwrap());

/// Stable identity of one diff block within a model turn
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PatchKey(String);

impl PatchKey {
    /// Derive a key from a block's target path and hunk header
    pub fn derive(target_path: &str, hunk_header: &str) -> Self {
        Self(short_hash(&format!("{target_path}\n{hunk_header}")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One ```diff fenced block extracted from model-turn markdown
#[derive(Debug, Clone, PartialEq)]
pub struct DiffBlock {
    pub key: PatchKey,
    /// Path the patch applies to, empty when the block carries no file header
    pub target_path: String,
    /// First `@@` hunk header, empty when absent
    pub hunk_header: String,
    /// Block body between the fences
    pub body: String,
}

/// Extract all diff blocks from a model turn's markdown content, in order
pub fn diff_blocks(markdown: &str) -> Vec<DiffBlock> {
    DIFF_FENCE
        .captures_iter(markdown)
        .map(|cap| {
            let body = cap[1].to_string();
            let target_path = parse_target_path(&body);
            let hunk_header = HUNK_HEADER
                .find(&body)
                .map(|m| m.as_str().trim_end().to_string())
                .unwrap_or_default();
            let key = if target_path.is_empty() && hunk_header.is_empty() {
                // Headerless block: fall back to hashing the body itself
                PatchKey(short_hash(&body))
            } else {
                PatchKey::derive(&target_path, &hunk_header)
            };
            DiffBlock {
                key,
                target_path,
                hunk_header,
                body,
            }
        })
        .collect()
}

fn parse_target_path(body: &str) -> String {
    // Prefer the post-image path; a deletion's +++ side is /dev/null
    if let Some(cap) = NEW_PATH.captures(body) {
        let path = &cap[1];
        if path != "/dev/null" {
            return path.to_string();
        }
    }
    if let Some(cap) = OLD_PATH.captures(body) {
        let path = &cap[1];
        if path != "/dev/null" {
            return path.to_string();
        }
    }
    String::new()
}

fn short_hash(input: &str) -> String {
    use fmt::Write as _;

    let digest = Sha256::digest(input.as_bytes());
    let mut out = String::with_capacity(16);
    for byte in &digest[..8] {
        // Writing to a String cannot fail
        let _ = write!(out, "{byte:02x}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const PATCH: &str = "Here is the fix:\n\n```diff\n--- a/src/app.js\n+++ b/src/app.js\n@@ -1,3 +1,4 @@\n-let x = 1;\n+let x = 2;\n```\n\nDone.";

    #[test]
    fn test_extracts_block_with_path_and_hunk() {
        let blocks = diff_blocks(PATCH);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].target_path, "src/app.js");
        assert_eq!(blocks[0].hunk_header, "@@ -1,3 +1,4 @@");
    }

    #[test]
    fn test_key_is_stable_across_reordering() {
        let blocks = diff_blocks(PATCH);
        let reordered = format!("Different prose first.\n\n```diff\n+++ b/other.js\n@@ -9 +9 @@\n-a\n+b\n```\n\n{PATCH}");
        let blocks2 = diff_blocks(&reordered);
        assert_eq!(blocks2.len(), 2);
        // Same block found at a different position keeps its key
        assert_eq!(blocks2[1].key, blocks[0].key);
        assert_ne!(blocks2[0].key, blocks2[1].key);
    }

    #[test]
    fn test_deletion_falls_back_to_old_path() {
        let md = "```diff\n--- a/gone.rs\n+++ /dev/null\n@@ -1,5 +0,0 @@\n-fn main() {}\n```";
        let blocks = diff_blocks(md);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].target_path, "gone.rs");
    }

    #[test]
    fn test_headerless_block_keys_on_body() {
        let a = diff_blocks("```diff\n-old line\n+new line\n```");
        let b = diff_blocks("```diff\n-old line\n+different\n```");
        assert_eq!(a.len(), 1);
        assert!(a[0].target_path.is_empty());
        assert_ne!(a[0].key, b[0].key);
    }

    #[test]
    fn test_non_diff_fences_ignored() {
        let md = "```javascript\nlet x = { y: 1 };\n```";
        assert!(diff_blocks(md).is_empty());
    }
}
