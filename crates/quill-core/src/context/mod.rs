//! Context window management
//!
//! Everything that decides what actually goes over the wire: token
//! estimation, budget enforcement ahead of a send, and summarization
//! planning for compressing old conversation into a single turn.

pub mod budget;
pub mod estimator;
pub mod summarizer;

pub use budget::{ContextBudget, PreparedContext, DEFAULT_CONTEXT_WINDOW};
pub use estimator::TokenEstimator;
pub use summarizer::{
    replacement_entries, summary_prompt, SummaryPlan, SummaryPolicy,
    MAX_RECENT_MESSAGES_TO_PRESERVE, SUMMARY_PREFIX,
};
