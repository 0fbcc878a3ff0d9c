//! Tag extraction and normalization
//!
//! Tags are short lowercase identifiers derived from a conversation by asking
//! the backend for a bracketed list. The response is parsed by an ordered chain
//! of strategies; the first one that yields strings wins.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use sidekick_ai::{CompletionRequest, LlmProvider, Message};

use crate::classifier::strip_reasoning;
use crate::history::render_transcript;
use crate::progress::ProgressIndicator;

/// Replacement for characters outside `[a-z0-9-]`
pub const TAG_SEPARATOR: char = '-';

/// Placeholder the model may emit when it finds nothing to tag
pub const RESERVED_TAG: &str = "none";

/// Maximum length of the stored, space-joined tag string
pub const MAX_TAGS_LEN: usize = 500;

const TAG_SYSTEM_PROMPT: &str = "\
You label conversations for later retrieval. Respond with ONLY a JSON list of \
3 to 8 short lowercase tags naming the topics, entities and intents discussed, \
for example [\"refund-request\", \"order-tracking\"]. No prose, no explanation.";

const TAG_PROMPT: &str = "\
Produce the tag list for this conversation.

<conversation>
{conversation}
</conversation>";

/// Normalize one raw tag.
///
/// Lowercases, maps every character outside `[a-z0-9-]` (whitespace included)
/// to the separator, collapses separator runs and strips them from both ends.
pub fn normalize_tag(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());

    for ch in raw.chars().flat_map(char::to_lowercase) {
        let ch = if ch.is_ascii_lowercase() || ch.is_ascii_digit() {
            ch
        } else {
            TAG_SEPARATOR
        };
        if ch == TAG_SEPARATOR && (out.is_empty() || out.ends_with(TAG_SEPARATOR)) {
            continue;
        }
        out.push(ch);
    }

    while out.ends_with(TAG_SEPARATOR) {
        out.pop();
    }
    out
}

/// Normalize, drop empties and the reserved tag, de-duplicate in order
pub fn normalize_tags<I, S>(raw: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut tags: Vec<String> = Vec::new();
    for tag in raw {
        let tag = normalize_tag(tag.as_ref());
        if tag.is_empty() || tag == RESERVED_TAG || tags.contains(&tag) {
            continue;
        }
        tags.push(tag);
    }
    tags
}

/// Join tags for storage, truncated to [`MAX_TAGS_LEN`]
pub fn join_tags(tags: &[String]) -> String {
    let joined = tags.join(" ");
    if joined.len() <= MAX_TAGS_LEN {
        return joined;
    }
    // Tags are ASCII after normalization, so byte and char boundaries agree.
    joined[..MAX_TAGS_LEN].trim_end().to_string()
}

static LIST_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[[^\[\]]*\]").unwrap());

static QUOTED_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""([^"\n]*)"|'([^'\n]*)'"#).unwrap());

type TagParser = fn(&str) -> Option<Vec<String>>;

/// Strategies tried in order
const TAG_PARSERS: &[TagParser] = &[parse_bracketed_list, parse_quoted_strings];

/// First `[...]` substring parsed as a JSON array
fn parse_bracketed_list(text: &str) -> Option<Vec<String>> {
    let list = LIST_PATTERN.find(text)?;
    let values: Vec<serde_json::Value> = serde_json::from_str(list.as_str()).ok()?;
    Some(
        values
            .into_iter()
            .filter_map(|v| match v {
                serde_json::Value::String(s) => Some(s),
                serde_json::Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .collect(),
    )
}

/// Every single- or double-quoted substring anywhere in the text
fn parse_quoted_strings(text: &str) -> Option<Vec<String>> {
    let found: Vec<String> = QUOTED_PATTERN
        .captures_iter(text)
        .filter_map(|c| c.get(1).or_else(|| c.get(2)))
        .map(|m| m.as_str().to_string())
        .collect();
    if found.is_empty() { None } else { Some(found) }
}

/// Parse a model response into normalized tags; never fails
pub fn parse_tags(response: &str) -> Vec<String> {
    let text = strip_reasoning(response);
    for parser in TAG_PARSERS {
        if let Some(raw) = parser(text) {
            return normalize_tags(raw);
        }
    }
    Vec::new()
}

/// Build the role-prefixed transcript used for tagging and summaries
pub fn build_transcript(
    history: &[Message],
    system_prompt: Option<&str>,
    current_input: Option<&str>,
) -> String {
    let mut lines = Vec::new();
    if let Some(prompt) = system_prompt.filter(|p| !p.trim().is_empty()) {
        lines.push(format!("System: {}", prompt));
    }
    if !history.is_empty() {
        lines.push(render_transcript(history));
    }
    if let Some(input) = current_input.filter(|i| !i.trim().is_empty()) {
        lines.push(format!("User: {}", input));
    }
    lines.join("\n")
}

/// Derives tags from a conversation through the completion backend
#[derive(Clone)]
pub struct TagExtractor {
    provider: Arc<dyn LlmProvider>,
    indicator: ProgressIndicator,
}

impl TagExtractor {
    pub fn new(provider: Arc<dyn LlmProvider>, indicator: ProgressIndicator) -> Self {
        Self {
            provider,
            indicator,
        }
    }

    /// Extract tags from `history` plus an optional unsaved user turn.
    ///
    /// Any request or parse failure yields an empty list.
    pub async fn extract(
        &self,
        history: &[Message],
        system_prompt: Option<&str>,
        current_input: Option<&str>,
    ) -> Vec<String> {
        if history.is_empty() && current_input.is_none_or(|i| i.trim().is_empty()) {
            return Vec::new();
        }

        let transcript = build_transcript(history, system_prompt, current_input);
        let request = CompletionRequest {
            max_tokens: Some(1024),
            ..CompletionRequest::prompt(
                TAG_SYSTEM_PROMPT,
                TAG_PROMPT.replace("{conversation}", &transcript),
            )
        };

        let mut progress = self.indicator.start("Tagging...");
        let response = self.provider.complete(&request).await;
        progress.stop().await;

        match response {
            Ok(text) => {
                let tags = parse_tags(&text);
                tracing::debug!(?tags, "extracted tags");
                tags
            }
            Err(e) => {
                tracing::warn!("Tag extraction failed: {}", e);
                Vec::new()
            }
        }
    }
}
