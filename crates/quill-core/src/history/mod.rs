//! Conversation history: typed entries, the ordered store, and diff-block
//! identity for patch tracking

pub mod entry;
pub mod patch;
pub mod store;

pub use entry::ConversationEntry;
pub use patch::{diff_blocks, DiffBlock, PatchKey};
pub use store::{HistoryStore, MIN_MESSAGES_TO_KEEP};
