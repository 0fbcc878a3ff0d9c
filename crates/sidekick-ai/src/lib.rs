//! sidekick-ai: completion backend abstraction
//!
//! This crate provides the message model shared by the session engine and a
//! provider for OpenAI-compatible chat completion servers, in both streaming
//! and single-response modes.

pub mod error;
pub mod providers;
pub mod retry;
pub mod stream;
pub mod types;

pub use error::{Error, Result};
pub use providers::LlmProvider;
pub use stream::{MessageEvent, MessageEventStream};
pub use types::*;
