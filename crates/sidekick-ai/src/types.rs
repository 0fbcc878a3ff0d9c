//! Core types for completion requests

use serde::{Deserialize, Serialize};

/// Message roles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    /// Get the role as the wire string
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    /// Human-readable label used when rendering transcripts
    pub fn label(&self) -> &'static str {
        match self {
            Role::System => "System",
            Role::User => "User",
            Role::Assistant => "Assistant",
        }
    }
}

/// A single conversation message.
///
/// Messages are immutable once built: fields are private and only readable
/// through accessors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    role: Role,
    content: String,
}

impl Message {
    /// Create a message with an explicit role
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    /// Create a system message
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Create an assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn content(&self) -> &str {
        &self.content
    }
}

/// Model and endpoint settings for a provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Model identifier sent with each request
    pub id: String,
    /// Base URL, e.g. `http://localhost:8000/v1`
    pub base_url: String,
    /// Maximum tokens to generate per response
    pub max_tokens: u32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            id: "my-model".to_string(),
            base_url: "http://localhost:8000/v1".to_string(),
            max_tokens: 32768,
        }
    }
}

/// Sampling parameters for one request
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sampling {
    pub temperature: f32,
    pub top_p: f32,
}

impl Sampling {
    /// Recommended sampling for thinking and non-thinking modes
    pub fn for_thinking(thinking: bool) -> Self {
        if thinking {
            Self {
                temperature: 0.6,
                top_p: 0.95,
            }
        } else {
            Self {
                temperature: 0.7,
                top_p: 0.8,
            }
        }
    }
}

/// Instruction appended before the user turn when thinking mode is on
pub const THINKING_INSTRUCTION: &str =
    "Please provide your reasoning in <think> tags before your answer.";

/// Everything a provider needs for one completion
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    /// System prompt
    pub system_prompt: Option<String>,
    /// Free-text context (retrieved summaries)
    pub context: Option<String>,
    /// Prior conversation messages
    pub history: Vec<Message>,
    /// Current user input
    pub input: String,
    /// Ask the model to reason before answering
    pub thinking: bool,
    /// Override the model's max_tokens
    pub max_tokens: Option<u32>,
}

impl CompletionRequest {
    /// Create a request for a single prompt with no history
    pub fn prompt(system_prompt: impl Into<String>, input: impl Into<String>) -> Self {
        Self {
            system_prompt: Some(system_prompt.into()),
            input: input.into(),
            ..Default::default()
        }
    }

    /// Flatten into the ordered message list sent to the backend.
    ///
    /// Layout: system prompt, `Context:` block, history, thinking instruction,
    /// user input.
    pub fn messages(&self) -> Vec<Message> {
        let mut messages = Vec::with_capacity(self.history.len() + 4);

        if let Some(ref system_prompt) = self.system_prompt {
            if !system_prompt.is_empty() {
                messages.push(Message::system(system_prompt.clone()));
            }
        }

        if let Some(ref context) = self.context {
            if !context.trim().is_empty() {
                messages.push(Message::system(format!("Context: {}", context)));
            }
        }

        messages.extend(self.history.iter().cloned());

        if self.thinking {
            messages.push(Message::system(THINKING_INSTRUCTION));
        }

        messages.push(Message::user(self.input.trim()));
        messages
    }

    pub fn sampling(&self) -> Sampling {
        Sampling::for_thinking(self.thinking)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_layout_full() {
        let request = CompletionRequest {
            system_prompt: Some("be nice".into()),
            context: Some("earlier we discussed refunds".into()),
            history: vec![Message::user("hi"), Message::assistant("hello")],
            input: "  what now?  ".into(),
            thinking: true,
            max_tokens: None,
        };

        let messages = request.messages();
        let roles: Vec<Role> = messages.iter().map(|m| m.role()).collect();
        assert_eq!(
            roles,
            vec![
                Role::System,
                Role::System,
                Role::User,
                Role::Assistant,
                Role::System,
                Role::User
            ]
        );
        assert_eq!(messages[1].content(), "Context: earlier we discussed refunds");
        assert_eq!(messages[4].content(), THINKING_INSTRUCTION);
        assert_eq!(messages[5].content(), "what now?");
    }

    #[test]
    fn test_message_layout_skips_empty_context() {
        let request = CompletionRequest {
            context: Some("   ".into()),
            input: "hi".into(),
            ..Default::default()
        };
        let messages = request.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role(), Role::User);
    }

    #[test]
    fn test_sampling_modes() {
        assert_eq!(Sampling::for_thinking(true).temperature, 0.6);
        assert_eq!(Sampling::for_thinking(false).top_p, 0.8);
    }

    #[test]
    fn test_role_serde() {
        let json = serde_json::to_string(&Message::assistant("x")).unwrap();
        assert_eq!(json, r#"{"role":"assistant","content":"x"}"#);
    }
}
