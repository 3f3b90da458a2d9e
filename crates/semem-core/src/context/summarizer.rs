//! Text generation for context-window summaries.
//!
//! The window manager decides *which* items are condensed; a `Summarizer`
//! produces the text. `ExtractiveSummarizer` needs no model and is the default.

use semem_types::context::ContextItem;
use semem_types::error::MemoryError;

/// Condenses a set of context items into one block of text.
///
/// Uses RPITIT (native async fn in traits, Rust 2024 edition) so an
/// LLM-backed implementation can await a completion call.
pub trait Summarizer: Send + Sync {
    fn summarize(
        &self,
        items: &[ContextItem],
    ) -> impl std::future::Future<Output = Result<String, MemoryError>> + Send;
}

/// Joins a truncated prompt/response line per item.
#[derive(Debug, Clone)]
pub struct ExtractiveSummarizer {
    pub max_prompt_chars: usize,
    pub max_response_chars: usize,
}

impl Default for ExtractiveSummarizer {
    fn default() -> Self {
        Self {
            max_prompt_chars: 80,
            max_response_chars: 160,
        }
    }
}

impl Summarizer for ExtractiveSummarizer {
    async fn summarize(&self, items: &[ContextItem]) -> Result<String, MemoryError> {
        Ok(items
            .iter()
            .map(|item| {
                format!(
                    "- {}: {}",
                    truncate_chars(item.prompt.trim(), self.max_prompt_chars),
                    truncate_chars(item.response.trim(), self.max_response_chars)
                )
            })
            .collect::<Vec<_>>()
            .join("\n"))
    }
}

/// Truncate on a char boundary, marking the cut with an ellipsis.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}
