//! OpenAI-compatible Chat Completions provider
//!
//! Works against any server exposing `/chat/completions` (vLLM, llama.cpp,
//! SGLang, OpenAI itself). Reasoning models report their thinking through a
//! separate `reasoning_content` delta field, which is surfaced as
//! [`MessageEvent::ThinkingDelta`].

use async_stream::stream;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest_eventsource::{Event, EventSource};
use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    providers::LlmProvider,
    retry::RetryConfig,
    stream::{MessageEvent, MessageEventStream, Usage},
    types::{CompletionRequest, ModelConfig, Role},
};

/// OpenAI-compatible API client
pub struct OpenAIProvider {
    client: reqwest::Client,
    api_key: Option<String>,
    model: ModelConfig,
    retry_config: RetryConfig,
}

impl OpenAIProvider {
    /// Create a new provider for the given model endpoint
    pub fn new(model: ModelConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: None,
            model,
            retry_config: RetryConfig::default(),
        }
    }

    /// Set the bearer token sent with every request
    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key;
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.model.base_url.trim_end_matches('/'))
    }

    fn request_builder(&self, body: &OpenAIRequest) -> reqwest::RequestBuilder {
        let builder = self.client.post(self.endpoint()).json(body);
        match self.api_key {
            Some(ref key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    fn build_request(&self, request: &CompletionRequest, stream: bool) -> OpenAIRequest {
        let messages = request
            .messages()
            .iter()
            .map(|m| OpenAIMessage {
                role: m.role().as_str(),
                content: m.content().to_string(),
            })
            .collect();

        let sampling = request.sampling();
        OpenAIRequest {
            model: self.model.id.clone(),
            messages,
            stream,
            max_tokens: Some(request.max_tokens.unwrap_or(self.model.max_tokens)),
            temperature: Some(sampling.temperature),
            top_p: Some(sampling.top_p),
        }
    }

    async fn complete_once(&self, body: &OpenAIRequest) -> Result<String> {
        let response = self.request_builder(body).send().await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::api(status.as_u16().to_string(), text));
        }

        let parsed: CompletionResponse = response.json().await?;
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| Error::UnexpectedResponse("response has no choices".to_string()))?;

        choice
            .message
            .content
            .ok_or_else(|| Error::UnexpectedResponse("choice has no content".to_string()))
    }
}

#[async_trait]
impl LlmProvider for OpenAIProvider {
    async fn stream(&self, request: &CompletionRequest) -> Result<MessageEventStream> {
        let body = self.build_request(request, true);
        tracing::debug!(
            model = %body.model,
            messages = body.messages.len(),
            "opening completion stream"
        );

        let event_source = EventSource::new(self.request_builder(&body))
            .map_err(|e| Error::Sse(format!("Failed to create event source: {}", e)))?;

        Ok(Box::pin(create_stream(event_source)))
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let body = self.build_request(request, false);
        let mut attempt = 0u32;

        loop {
            match self.complete_once(&body).await {
                Ok(text) => return Ok(text),
                Err(e) if attempt < self.retry_config.max_retries && e.is_retryable() => {
                    let delay = self.retry_config.delay_for_attempt(attempt);
                    tracing::warn!(
                        "Completion failed (attempt {}/{}): {}. Retrying in {:?}...",
                        attempt + 1,
                        self.retry_config.max_retries + 1,
                        e,
                        delay
                    );
                    attempt += 1;
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Translate one streamed chunk into message events.
///
/// Reasoning is reported before answer text when a delta carries both.
fn chunk_events(chunk: &StreamChunk) -> Vec<MessageEvent> {
    let mut events = Vec::new();

    for choice in &chunk.choices {
        let delta = &choice.delta;
        let mut had_content = false;

        if let Some(ref reasoning) = delta.reasoning_content {
            events.push(MessageEvent::thinking(reasoning.clone()));
            had_content = true;
        }
        if let Some(ref content) = delta.content {
            events.push(MessageEvent::text(content.clone()));
            had_content = true;
        }
        if !had_content && delta.role.as_deref() == Some("assistant") {
            events.push(MessageEvent::Start {
                role: Role::Assistant,
            });
        }
    }

    events
}

fn create_stream(mut event_source: EventSource) -> impl futures::Stream<Item = MessageEvent> {
    stream! {
        let mut usage = Usage::default();

        while let Some(event) = event_source.next().await {
            match event {
                Ok(Event::Open) => {}
                Ok(Event::Message(msg)) => {
                    if msg.data == "[DONE]" {
                        break;
                    }

                    match serde_json::from_str::<StreamChunk>(&msg.data) {
                        Ok(chunk) => {
                            for event in chunk_events(&chunk) {
                                yield event;
                            }
                            if let Some(ref stream_usage) = chunk.usage {
                                usage.input = stream_usage.prompt_tokens;
                                usage.output = stream_usage.completion_tokens;
                            }
                        }
                        Err(e) => {
                            // A single bad chunk is skipped rather than ending the answer.
                            tracing::debug!("Skipping unparsable chunk: {}", e);
                        }
                    }
                }
                Err(reqwest_eventsource::Error::StreamEnded) => break,
                Err(e) => {
                    event_source.close();
                    yield MessageEvent::Error {
                        message: format!("SSE error: {}", e),
                    };
                    return;
                }
            }
        }

        event_source.close();
        yield MessageEvent::Done { usage };
    }
}

// Request/Response types

#[derive(Debug, Serialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
}

#[derive(Debug, Serialize)]
struct OpenAIMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    content: Option<String>,
}

// Streaming response types

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<StreamUsage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default, alias = "reasoning")]
    reasoning_content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}
