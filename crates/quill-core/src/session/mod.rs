//! Sessions: state, persistence, and lifecycle

pub mod manager;
pub mod storage;
pub mod types;

pub use manager::SessionManager;
pub use storage::{session_key, FileKvStore, KeyValueStore, MemoryKvStore, METADATA_KEY};
pub use types::{Session, SessionMeta, DEFAULT_SESSION_NAME, PROMPT_HISTORY_MAX};
