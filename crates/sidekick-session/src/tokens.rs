//! Token estimation for message sets
//!
//! Two strategies: an exact BPE count (`cl100k_base`) with a fixed
//! per-message overhead, and a chars/4 heuristic used when the encoder cannot
//! be loaded. Both grow monotonically with content length, which the history
//! window relies on to terminate.

use std::sync::Arc;

use sidekick_ai::Message;
use tiktoken_rs::CoreBPE;

/// Fixed cost of role and formatting tokens per message
pub const PER_MESSAGE_OVERHEAD: usize = 4;

/// Estimates the token cost of a message set
pub trait TokenCounter: Send + Sync {
    fn count(&self, messages: &[Message]) -> usize;

    /// Short name for logs
    fn name(&self) -> &'static str;
}

/// Exact counter backed by a subword encoder
pub struct BpeCounter {
    bpe: CoreBPE,
}

impl BpeCounter {
    /// Load the `cl100k_base` encoding
    pub fn new() -> Option<Self> {
        match tiktoken_rs::cl100k_base() {
            Ok(bpe) => Some(Self { bpe }),
            Err(e) => {
                tracing::warn!("BPE encoder unavailable: {}", e);
                None
            }
        }
    }
}

impl TokenCounter for BpeCounter {
    fn count(&self, messages: &[Message]) -> usize {
        messages
            .iter()
            .map(|m| self.bpe.encode_with_special_tokens(m.content()).len() + PER_MESSAGE_OVERHEAD)
            .sum()
    }

    fn name(&self) -> &'static str {
        "bpe"
    }
}

/// Coarse 4-characters-per-token estimate
#[derive(Debug, Default, Clone, Copy)]
pub struct HeuristicCounter;

impl TokenCounter for HeuristicCounter {
    fn count(&self, messages: &[Message]) -> usize {
        messages.iter().map(|m| m.content().chars().count() / 4).sum()
    }

    fn name(&self) -> &'static str {
        "heuristic"
    }
}

/// The exact counter when available, otherwise the heuristic
pub fn default_counter() -> Arc<dyn TokenCounter> {
    match BpeCounter::new() {
        Some(counter) => Arc::new(counter),
        None => {
            tracing::warn!("Falling back to chars/4 token estimate");
            Arc::new(HeuristicCounter)
        }
    }
}
