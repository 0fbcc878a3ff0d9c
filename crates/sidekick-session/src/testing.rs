//! Mock collaborators shared by the unit tests

use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use sidekick_ai::{CompletionRequest, LlmProvider, MessageEvent, MessageEventStream};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::memory::StoreTransport;
use crate::session::InputSource;
use crate::sink::RenderSink;

/// Completion used when nothing is scripted; parses as both a summary and a tag list
pub const DEFAULT_COMPLETION: &str = "Summary: talked about things\nTags: [\"chat\"]";

pub enum ScriptedStream {
    Events(Vec<MessageEvent>),
    Fail(String),
    /// Never yields; used to park the session mid-stream
    Pending,
}

#[derive(Default)]
pub struct MockProvider {
    completions: Mutex<VecDeque<std::result::Result<String, String>>>,
    streams: Mutex<VecDeque<ScriptedStream>>,
    completion_requests: Mutex<Vec<CompletionRequest>>,
    stream_requests: Mutex<Vec<CompletionRequest>>,
    stall_after: Mutex<Option<usize>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_completion(&self, response: std::result::Result<String, String>) {
        self.completions.lock().push_back(response);
    }

    pub fn push_stream(&self, stream: ScriptedStream) {
        self.streams.lock().push_back(stream);
    }

    /// Answer the first `served` completions, then hang forever
    pub fn stall_completions_after(&self, served: usize) {
        *self.stall_after.lock() = Some(served);
    }

    pub fn completion_calls(&self) -> usize {
        self.completion_requests.lock().len()
    }

    pub fn stream_calls(&self) -> usize {
        self.stream_requests.lock().len()
    }

    pub fn last_completion(&self) -> Option<CompletionRequest> {
        self.completion_requests.lock().last().cloned()
    }

    pub fn last_stream(&self) -> Option<CompletionRequest> {
        self.stream_requests.lock().last().cloned()
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    async fn stream(&self, request: &CompletionRequest) -> sidekick_ai::Result<MessageEventStream> {
        self.stream_requests.lock().push(request.clone());
        let scripted = self
            .streams
            .lock()
            .pop_front()
            .unwrap_or_else(|| ScriptedStream::Events(vec![MessageEvent::text("ok")]));

        match scripted {
            ScriptedStream::Events(events) => Ok(Box::pin(async_stream::stream! {
                for event in events {
                    yield event;
                }
            })),
            ScriptedStream::Fail(message) => Err(sidekick_ai::Error::api("mock", message)),
            ScriptedStream::Pending => Ok(Box::pin(futures::stream::pending())),
        }
    }

    async fn complete(&self, request: &CompletionRequest) -> sidekick_ai::Result<String> {
        let calls = {
            let mut requests = self.completion_requests.lock();
            requests.push(request.clone());
            requests.len()
        };
        if self.stall_after.lock().is_some_and(|served| calls > served) {
            futures::future::pending::<()>().await;
        }
        let scripted = self
            .completions
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(DEFAULT_COMPLETION.to_string()));
        scripted.map_err(|message| sidekick_ai::Error::api("mock", message))
    }
}

/// In-memory stand-in for the SQL-over-HTTP store
#[derive(Default)]
pub struct MockStore {
    responses: Mutex<VecDeque<std::result::Result<Value, String>>>,
    bodies: Mutex<Vec<Value>>,
}

impl MockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_response(&self, response: std::result::Result<Value, String>) {
        self.responses.lock().push_back(response);
    }

    pub fn calls(&self) -> usize {
        self.bodies.lock().len()
    }

    pub fn bodies(&self) -> Vec<Value> {
        self.bodies.lock().clone()
    }

    /// Number of INSERT statements received
    pub fn inserts(&self) -> usize {
        self.bodies
            .lock()
            .iter()
            .filter(|b| b.to_string().contains("INSERT INTO"))
            .count()
    }
}

#[async_trait]
impl StoreTransport for MockStore {
    async fn execute(&self, body: Value) -> Result<Value> {
        self.bodies.lock().push(body);
        let scripted = self
            .responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(json!({ "results": [{ "last_insert_id": 1 }] })));
        scripted.map_err(Error::Store)
    }
}

/// Input that replays fixed lines, then either ends or fires an interrupt
pub struct ScriptedInput {
    lines: VecDeque<String>,
    interrupt_when_done: Option<CancellationToken>,
}

impl ScriptedInput {
    pub fn new<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            lines: lines.into_iter().map(Into::into).collect(),
            interrupt_when_done: None,
        }
    }

    /// After the last line, cancel `token` and wait at the prompt forever
    pub fn then_interrupt(mut self, token: CancellationToken) -> Self {
        self.interrupt_when_done = Some(token);
        self
    }
}

#[async_trait]
impl InputSource for ScriptedInput {
    async fn next_line(&mut self) -> Option<String> {
        if let Some(line) = self.lines.pop_front() {
            return Some(line);
        }
        match &self.interrupt_when_done {
            Some(token) => {
                token.cancel();
                std::future::pending().await
            }
            None => None,
        }
    }
}

/// Sink that records everything the session renders
#[derive(Default)]
pub struct RecordingSink {
    pub reasoning: String,
    pub answers: Vec<String>,
    current: String,
    pub notices: Vec<String>,
    pub errors: Vec<String>,
}

impl RenderSink for RecordingSink {
    fn reasoning_start(&mut self) {}

    fn reasoning_delta(&mut self, delta: &str) {
        self.reasoning.push_str(delta);
    }

    fn reasoning_end(&mut self, _reasoning: &str) {}

    fn answer_delta(&mut self, delta: &str) {
        self.current.push_str(delta);
    }

    fn response_end(&mut self) {
        self.answers.push(std::mem::take(&mut self.current));
    }

    fn notice(&mut self, message: &str) {
        self.notices.push(message.to_string());
    }

    fn error(&mut self, message: &str) {
        self.errors.push(message.to_string());
    }
}
