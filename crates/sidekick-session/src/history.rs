//! Token-budgeted sliding window of conversation turns

use std::collections::VecDeque;

use sidekick_ai::Message;

use crate::tokens::TokenCounter;

/// Conversation history: pinned system messages plus a window of
/// user/assistant pairs.
///
/// Pairs are appended atomically and evicted oldest-first. The token count is
/// taken over the window only; system messages are never counted or evicted.
#[derive(Debug, Clone, Default)]
pub struct History {
    system: Vec<Message>,
    window: VecDeque<Message>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a history pinned to a system prompt
    pub fn with_system(prompt: impl Into<String>) -> Self {
        Self {
            system: vec![Message::system(prompt)],
            window: VecDeque::new(),
        }
    }

    pub fn system_messages(&self) -> &[Message] {
        &self.system
    }

    /// System messages joined into one prompt, if any
    pub fn system_prompt(&self) -> Option<String> {
        if self.system.is_empty() {
            return None;
        }
        Some(
            self.system
                .iter()
                .map(|m| m.content())
                .collect::<Vec<_>>()
                .join("\n\n"),
        )
    }

    /// The windowed messages, oldest first
    pub fn messages(&self) -> Vec<Message> {
        self.window.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    /// Number of complete pairs in the window
    pub fn pair_count(&self) -> usize {
        self.window.len() / 2
    }

    /// Append one turn. Both messages land before any trim can run.
    pub fn append_pair(&mut self, user: Message, assistant: Message) {
        self.window.push_back(user);
        self.window.push_back(assistant);
    }

    /// Token count of the current window, recomputed from scratch
    pub fn token_count(&mut self, counter: &dyn TokenCounter) -> usize {
        counter.count(self.window.make_contiguous())
    }

    /// Evict the oldest pairs until the window fits `budget` or is empty.
    ///
    /// Returns the number of messages removed.
    pub fn trim(&mut self, budget: usize, counter: &dyn TokenCounter) -> usize {
        let mut removed = 0;

        while !self.window.is_empty() && self.token_count(counter) > budget {
            if self.window.len() >= 2 {
                self.window.pop_front();
                self.window.pop_front();
                removed += 2;
            } else {
                // A lone message only appears if a pair was broken elsewhere.
                self.window.pop_front();
                removed += 1;
            }
        }

        if removed > 0 {
            tracing::debug!(
                removed,
                remaining = self.window.len(),
                budget,
                "trimmed history window"
            );
        }
        removed
    }
}

/// Render messages as `Role: content` lines
pub fn render_transcript<'a>(messages: impl IntoIterator<Item = &'a Message>) -> String {
    messages
        .into_iter()
        .map(|m| format!("{}: {}", m.role().label(), m.content()))
        .collect::<Vec<_>>()
        .join("\n")
}
