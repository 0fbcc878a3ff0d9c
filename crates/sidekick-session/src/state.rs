//! Per-run session state shared between the turn loop and the interrupt path

use std::sync::Arc;

use parking_lot::Mutex;
use sidekick_ai::Message;

use crate::history::History;

/// Mutable state of one process run. Never persisted.
#[derive(Debug, Default)]
pub struct SessionState {
    pub history: History,
    /// Tokens of every pair appended this run, independent of trimming
    pub total_tokens_used: usize,
    /// Set when an autosave has been started for the latest turn
    pub save_guard: bool,
}

impl SessionState {
    pub fn new(history: History) -> Self {
        Self {
            history,
            ..Default::default()
        }
    }

    /// Window messages and joined system prompt, cloned out of the lock
    pub fn snapshot(&self) -> (Vec<Message>, Option<String>) {
        (self.history.messages(), self.history.system_prompt())
    }

    /// Claim the right to run the emergency save.
    ///
    /// Returns true at most once per guard period, and only when there is
    /// something to save.
    pub fn claim_emergency_save(&mut self) -> bool {
        if self.save_guard || self.history.pair_count() == 0 {
            return false;
        }
        self.save_guard = true;
        true
    }
}

/// State handle cloned into whoever needs to observe the session
pub type SharedState = Arc<Mutex<SessionState>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emergency_save_claimed_once() {
        let mut history = History::new();
        history.append_pair(Message::user("q"), Message::assistant("a"));
        let mut state = SessionState::new(history);

        assert!(state.claim_emergency_save());
        assert!(!state.claim_emergency_save());
    }

    #[test]
    fn test_emergency_save_skipped_when_guarded_or_empty() {
        let mut empty = SessionState::default();
        assert!(!empty.claim_emergency_save());

        let mut history = History::new();
        history.append_pair(Message::user("q"), Message::assistant("a"));
        let mut guarded = SessionState::new(history);
        guarded.save_guard = true;
        assert!(!guarded.claim_emergency_save());
    }
}
