//! Context management: token estimation, transcript compaction, and
//! final per-call message assembly within a token budget.

pub mod builder;
pub mod compactor;
pub mod tokens;

pub use builder::{BuildReport, ContextBuilder};
pub use tokens::{estimate_conversation_tokens, estimate_message_tokens, estimate_tokens};
