//! Streaming event types

use crate::types::Role;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use tokio_stream::Stream;

/// Token usage reported at the end of a stream
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input: u32,
    pub output: u32,
}

/// Events emitted during message streaming
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageEvent {
    /// Role marker sent before any content
    Start { role: Role },
    /// Reasoning content delta
    ThinkingDelta { delta: String },
    /// Answer content delta
    TextDelta { delta: String },
    /// Stream completed successfully
    Done { usage: Usage },
    /// Error occurred
    Error { message: String },
}

impl MessageEvent {
    pub fn thinking(delta: impl Into<String>) -> Self {
        Self::ThinkingDelta {
            delta: delta.into(),
        }
    }

    pub fn text(delta: impl Into<String>) -> Self {
        Self::TextDelta {
            delta: delta.into(),
        }
    }

    /// Whether this event carries non-empty reasoning or answer text
    pub fn is_content(&self) -> bool {
        match self {
            MessageEvent::ThinkingDelta { delta } | MessageEvent::TextDelta { delta } => {
                !delta.is_empty()
            }
            _ => false,
        }
    }
}

/// A stream of message events
pub type MessageEventStream = Pin<Box<dyn Stream<Item = MessageEvent> + Send>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_kinds() {
        assert!(MessageEvent::thinking("a").is_content());
        assert!(MessageEvent::text("b").is_content());
        assert!(!MessageEvent::text("").is_content());
        assert!(!MessageEvent::Start { role: Role::Assistant }.is_content());
        assert!(!MessageEvent::Done { usage: Usage::default() }.is_content());
    }
}
