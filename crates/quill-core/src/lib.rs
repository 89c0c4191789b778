//! Quill core library
//!
//! Token-budget-aware conversation engine for multi-provider AI assistants:
//! streaming chat over Ollama, OpenAI, and Gemini, a typed conversation
//! history with file snapshots and patch tracking, context budgeting with
//! automatic summarization, and persistent multi-session management.

pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod events;
pub mod history;
pub mod llm;
pub mod session;

// Re-export commonly used types
pub use config::{settings_schema, ProviderSettings, QuillConfig, SettingField, SettingsPatch};
pub use context::{ContextBudget, PreparedContext, SummaryPolicy, TokenEstimator};
pub use engine::{ChatEngine, FileSource, SendOutcome, StaleContextPrompt, StaleResolution};
pub use error::{QuillError, QuillResult};
pub use events::{Notification, NotificationBus};
pub use history::{diff_blocks, ConversationEntry, DiffBlock, HistoryStore, PatchKey};
pub use llm::{
    ChatStream, ModelDescriptor, Provider, ProviderKind, StreamEvent,
};
pub use session::{
    FileKvStore, KeyValueStore, MemoryKvStore, Session, SessionManager, SessionMeta,
};
