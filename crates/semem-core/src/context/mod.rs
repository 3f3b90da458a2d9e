//! Per-session context window management.

pub mod summarizer;
pub mod window;

pub use summarizer::{ExtractiveSummarizer, Summarizer};
pub use window::ContextWindowManager;
