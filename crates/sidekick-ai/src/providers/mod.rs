//! Completion provider implementations

pub mod openai;

use crate::{CompletionRequest, MessageEventStream, Result};
use async_trait::async_trait;

/// Trait for completion backends
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Stream a response as reasoning/answer fragments
    async fn stream(&self, request: &CompletionRequest) -> Result<MessageEventStream>;

    /// Request a single complete response
    async fn complete(&self, request: &CompletionRequest) -> Result<String>;
}

/// Get an API key from a provided value or the environment
pub fn get_api_key(provided: Option<&str>, env_var: &str) -> Option<String> {
    if let Some(key) = provided {
        return Some(key.to_string());
    }

    std::env::var(env_var).ok().filter(|k| !k.is_empty())
}
