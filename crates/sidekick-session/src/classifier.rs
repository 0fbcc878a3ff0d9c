//! Reasoning/answer classification of a streamed response
//!
//! The backend interleaves reasoning fragments and answer fragments. The
//! classifier forwards each fragment to the sink as it arrives, emits the
//! reasoning delimiters at the phase boundaries, and assembles the
//! [`StreamResult`] once the stream ends.

use sidekick_ai::MessageEvent;

use crate::sink::RenderSink;

/// Opening reasoning delimiter
pub const THINK_OPEN: &str = "<think>";
/// Closing reasoning delimiter
pub const THINK_CLOSE: &str = "</think>";

/// Classified response
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamResult {
    /// All reasoning fragments, trimmed
    pub reasoning: String,
    /// All answer fragments, trimmed
    pub answer: String,
    /// Answer prefixed by the delimited reasoning; stored as the assistant message
    pub full_transcript: String,
}

impl StreamResult {
    /// A result whose whole content is `text`, used when the backend fails
    pub fn answer_only(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            reasoning: String::new(),
            answer: text.clone(),
            full_transcript: text,
        }
    }
}

/// Which kind of fragment the classifier is collecting
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum Phase {
    #[default]
    Untagged,
    Reasoning,
    Answer,
}

/// Streaming reasoning/answer state machine
#[derive(Debug, Default)]
pub struct StreamClassifier {
    phase: Phase,
    saw_reasoning: bool,
    reasoning: String,
    answer: String,
}

impl StreamClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one event. Role markers, terminal events and empty fragments are
    /// ignored and cause no transition.
    pub fn push(&mut self, event: &MessageEvent, sink: &mut dyn RenderSink) {
        match event {
            MessageEvent::ThinkingDelta { delta } if !delta.is_empty() => {
                self.push_reasoning(delta, sink)
            }
            MessageEvent::TextDelta { delta } if !delta.is_empty() => {
                self.push_answer(delta, sink)
            }
            _ => {}
        }
    }

    fn push_reasoning(&mut self, delta: &str, sink: &mut dyn RenderSink) {
        if self.phase == Phase::Untagged {
            self.phase = Phase::Reasoning;
            sink.reasoning_start();
        }
        // Reasoning that arrives after the answer started is kept in the
        // reasoning block but no delimiter is emitted again.
        self.saw_reasoning = true;
        self.reasoning.push_str(delta);
        sink.reasoning_delta(delta);
    }

    fn push_answer(&mut self, delta: &str, sink: &mut dyn RenderSink) {
        if self.phase == Phase::Reasoning {
            sink.reasoning_end(self.reasoning.trim());
        }
        self.phase = Phase::Answer;
        self.answer.push_str(delta);
        sink.answer_delta(delta);
    }

    /// End of stream: close an open reasoning block and build the result
    pub fn finish(self, sink: &mut dyn RenderSink) -> StreamResult {
        if self.phase == Phase::Reasoning {
            sink.reasoning_end(self.reasoning.trim());
        }
        sink.response_end();

        if !self.saw_reasoning {
            return StreamResult::answer_only(self.answer.trim());
        }

        let transcript = format!(
            "{THINK_OPEN}\n{}{THINK_CLOSE}\n\n{}",
            self.reasoning, self.answer
        );
        let transcript = transcript.trim();

        match split_reasoning(transcript) {
            Some((reasoning, answer)) => StreamResult {
                reasoning: reasoning.to_string(),
                answer: answer.to_string(),
                full_transcript: transcript.to_string(),
            },
            None => StreamResult::answer_only(transcript),
        }
    }
}

/// Split a transcript into `(reasoning, answer)` at the first closing
/// delimiter.
///
/// Returns `None` when the delimiters are missing or malformed (an opening tag
/// without a later closing tag, or a closing tag before any opening tag); the
/// caller then treats the whole text as the answer.
pub fn split_reasoning(transcript: &str) -> Option<(&str, &str)> {
    let (head, tail) = transcript.split_once(THINK_CLOSE)?;
    let (_, reasoning) = head.split_once(THINK_OPEN)?;
    Some((reasoning.trim(), tail.trim()))
}

/// Remove an inline reasoning block from a non-streamed response
pub fn strip_reasoning(text: &str) -> &str {
    match split_reasoning(text) {
        Some((_, answer)) => answer,
        None => text.trim(),
    }
}
