//! The interactive turn loop
//!
//! Each turn retrieves related summaries, streams the response through the
//! classifier, records the pair, autosaves when the cumulative token total
//! crosses a window boundary, and trims the window. The whole loop is raced
//! against an interrupt token; when it fires, the pending await is dropped and
//! the emergency save runs unless an autosave already covered the latest turn.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use sidekick_ai::{CompletionRequest, LlmProvider, Message, MessageEvent};
use tokio_util::sync::CancellationToken;

use crate::classifier::{StreamClassifier, StreamResult};
use crate::history::History;
use crate::memory::{MemoryClient, format_context_block};
use crate::progress::ProgressIndicator;
use crate::sink::RenderSink;
use crate::state::{SessionState, SharedState};
use crate::tokens::TokenCounter;

/// Default token budget of the history window
pub const DEFAULT_WINDOW_TOKENS: usize = 8000;

/// Upper bound on the save that runs after an interrupt
pub const DEFAULT_SAVE_TIMEOUT: Duration = Duration::from_secs(20);

/// Exit code after the interrupt path
pub const INTERRUPTED_EXIT_CODE: i32 = 130;

/// Source of user input lines
#[async_trait]
pub trait InputSource: Send {
    /// The next line, or `None` at end of input
    async fn next_line(&mut self) -> Option<String>;
}

/// Per-run knobs
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Token budget of the history window; also the autosave cadence
    pub window_tokens: usize,
    /// Ask the model to reason before answering
    pub thinking: bool,
    /// Override the model's max_tokens for chat responses
    pub max_tokens: Option<u32>,
    /// How long the save after an interrupt may take before it is abandoned
    pub save_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            window_tokens: DEFAULT_WINDOW_TOKENS,
            thinking: true,
            max_tokens: None,
            save_timeout: DEFAULT_SAVE_TIMEOUT,
        }
    }
}

/// Why the loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionExit {
    /// The user typed `quit` or `exit`
    Quit,
    EndOfInput,
    Interrupted,
}

impl SessionExit {
    pub fn exit_code(self) -> i32 {
        match self {
            SessionExit::Interrupted => INTERRUPTED_EXIT_CODE,
            SessionExit::Quit | SessionExit::EndOfInput => 0,
        }
    }
}

/// Whether a line ends the session
pub fn is_exit_command(line: &str) -> bool {
    let line = line.trim();
    line.eq_ignore_ascii_case("quit") || line.eq_ignore_ascii_case("exit")
}

/// One interactive conversation
pub struct Session {
    provider: Arc<dyn LlmProvider>,
    counter: Arc<dyn TokenCounter>,
    memory: Option<MemoryClient>,
    indicator: ProgressIndicator,
    state: SharedState,
    context: String,
    /// Summaries already appended to `context`
    recalled: HashSet<String>,
    config: SessionConfig,
}

impl Session {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        counter: Arc<dyn TokenCounter>,
        indicator: ProgressIndicator,
        history: History,
        config: SessionConfig,
    ) -> Self {
        Self {
            provider,
            counter,
            memory: None,
            indicator,
            state: Arc::new(Mutex::new(SessionState::new(history))),
            context: String::new(),
            recalled: HashSet::new(),
            config,
        }
    }

    /// Enable retrieval and autosave
    pub fn with_memory(mut self, memory: MemoryClient) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn state(&self) -> SharedState {
        self.state.clone()
    }

    /// Run turns until the user quits, input ends, or `interrupt` fires
    pub async fn run(
        &mut self,
        input: &mut dyn InputSource,
        sink: &mut dyn RenderSink,
        interrupt: &CancellationToken,
    ) -> SessionExit {
        let finished = tokio::select! {
            biased;
            _ = interrupt.cancelled() => None,
            exit = self.turns(input, sink) => Some(exit),
        };

        match finished {
            Some(exit) => {
                tracing::debug!(?exit, "session finished");
                exit
            }
            None => {
                self.on_interrupt(sink).await;
                SessionExit::Interrupted
            }
        }
    }

    async fn turns(
        &mut self,
        input: &mut dyn InputSource,
        sink: &mut dyn RenderSink,
    ) -> SessionExit {
        loop {
            let Some(line) = input.next_line().await else {
                return SessionExit::EndOfInput;
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if is_exit_command(line) {
                return SessionExit::Quit;
            }

            self.state.lock().save_guard = false;
            self.turn(line, sink).await;
        }
    }

    async fn turn(&mut self, input: &str, sink: &mut dyn RenderSink) {
        let (history, system_prompt) = self.state.lock().snapshot();

        if let Some(block) = self.recall(&history, system_prompt.as_deref(), input, sink).await {
            if !self.context.is_empty() {
                self.context.push_str("\n\n");
            }
            self.context.push_str(&block);
        }

        let request = CompletionRequest {
            system_prompt,
            context: (!self.context.is_empty()).then(|| self.context.clone()),
            history,
            input: input.to_string(),
            thinking: self.config.thinking,
            max_tokens: self.config.max_tokens,
        };
        let result = self.stream_response(&request, sink).await;

        let window = self.config.window_tokens;
        let crossed = {
            let user = Message::user(input);
            let assistant = Message::assistant(result.full_transcript);
            let pair_tokens = self.counter.count(&[user.clone(), assistant.clone()]);

            let mut state = self.state.lock();
            state.history.append_pair(user, assistant);
            let previous = state.total_tokens_used;
            state.total_tokens_used += pair_tokens;
            let crossed = window > 0 && previous / window != state.total_tokens_used / window;
            if crossed && self.memory.is_some() {
                state.save_guard = true;
            }

            tracing::debug!(
                pair_tokens,
                total = state.total_tokens_used,
                crossed,
                "recorded turn"
            );
            crossed
        };

        if crossed {
            self.autosave(sink).await;
        }

        let counter = self.counter.clone();
        self.state.lock().history.trim(window, counter.as_ref());
    }

    /// Retrieve related summaries not yet in the context and render them as a block
    async fn recall(
        &mut self,
        history: &[Message],
        system_prompt: Option<&str>,
        input: &str,
        sink: &mut dyn RenderSink,
    ) -> Option<String> {
        let memory = self.memory.as_ref()?;
        let mut found = memory.retrieve(history, system_prompt, input).await;
        found.retain(|record| {
            self.recalled
                .insert(format!("{} {} {}", record.date, record.time, record.summary))
        });
        if found.is_empty() {
            return None;
        }
        sink.notice(&format!(
            "Recalled {} earlier conversation{}",
            found.len(),
            if found.len() == 1 { "" } else { "s" }
        ));
        Some(format_context_block(&found))
    }

    async fn stream_response(
        &self,
        request: &CompletionRequest,
        sink: &mut dyn RenderSink,
    ) -> StreamResult {
        let mut progress = self.indicator.start("Thinking...");

        let mut stream = match self.provider.stream(request).await {
            Ok(stream) => stream,
            Err(e) => {
                progress.stop().await;
                return backend_failure(&e.to_string(), sink);
            }
        };

        let mut classifier = StreamClassifier::new();
        let mut received = false;

        while let Some(event) = stream.next().await {
            if event.is_content() && !received {
                received = true;
                progress.stop().await;
            }
            match event {
                MessageEvent::Done { usage } => {
                    tracing::debug!(input = usage.input, output = usage.output, "stream done");
                    break;
                }
                MessageEvent::Error { message } => {
                    progress.stop().await;
                    if !received {
                        return backend_failure(&message, sink);
                    }
                    tracing::warn!("Stream ended with error: {}", message);
                    sink.error(&format!("Stream interrupted: {}", message));
                    break;
                }
                event => classifier.push(&event, sink),
            }
        }

        progress.stop().await;
        classifier.finish(sink)
    }

    async fn autosave(&self, sink: &mut dyn RenderSink) {
        let Some(memory) = self.memory.as_ref() else {
            return;
        };
        let (history, system_prompt) = self.state.lock().snapshot();

        match memory.save(&history, system_prompt.as_deref()).await {
            Ok(record) => sink.notice(&format!("Conversation saved (tags: {})", record.tags)),
            Err(e) => {
                tracing::warn!("Autosave failed: {}", e);
                sink.error(&format!("Autosave failed: {}", e));
            }
        }
    }

    /// Clear the spinner and save once unless an autosave already ran
    async fn on_interrupt(&self, sink: &mut dyn RenderSink) {
        self.indicator.shutdown().await;

        let Some(memory) = self.memory.as_ref() else {
            return;
        };
        let snapshot = {
            let mut state = self.state.lock();
            state.claim_emergency_save().then(|| state.snapshot())
        };
        let Some((history, system_prompt)) = snapshot else {
            tracing::debug!("interrupt: nothing to save");
            return;
        };

        sink.notice("Saving conversation before exit...");
        let save = memory.save(&history, system_prompt.as_deref());
        match tokio::time::timeout(self.config.save_timeout, save).await {
            Ok(Ok(record)) => sink.notice(&format!("Conversation saved (tags: {})", record.tags)),
            Ok(Err(e)) => {
                tracing::warn!("Save on interrupt failed: {}", e);
                sink.error(&format!("Save failed: {}", e));
            }
            Err(_) => {
                tracing::warn!(timeout = ?self.config.save_timeout, "Save on interrupt timed out");
                self.indicator.shutdown().await;
                sink.error("Save timed out; conversation not saved");
            }
        }
    }
}

/// Substitute an error message for the answer
fn backend_failure(message: &str, sink: &mut dyn RenderSink) -> StreamResult {
    let text = format!("Error: {}", message);
    tracing::warn!("Completion failed: {}", message);
    sink.error(&text);
    StreamResult::answer_only(text)
}
