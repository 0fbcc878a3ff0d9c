//! Conversation memory backed by a SQL-over-HTTP store
//!
//! Saving asks the backend for a summary of the transcript, derives tags, and
//! writes one row. Retrieval derives tags from the live conversation and looks
//! up earlier summaries whose stored tags overlap.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Local;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use sidekick_ai::{CompletionRequest, LlmProvider, Message};

use crate::classifier::strip_reasoning;
use crate::error::{Error, Result};
use crate::progress::ProgressIndicator;
use crate::tags::{TagExtractor, build_transcript, join_tags, parse_tags};

/// Default table holding saved summaries
pub const DEFAULT_TABLE: &str = "conversation_summaries";

/// Default number of summaries pulled into context per turn
pub const DEFAULT_MAX_RESULTS: usize = 3;

/// Default timeout applied to every store request
pub const STORE_TIMEOUT: Duration = Duration::from_secs(10);

/// Length of the raw-response fallback when no `Summary:` section is found
const SUMMARY_FALLBACK_CHARS: usize = 1000;

const SUMMARY_SYSTEM_PROMPT: &str = "\
You write compact notes about conversations so they can be recalled later.";

const SUMMARY_PROMPT: &str = "\
Summarize the conversation below in a few sentences, keeping names, decisions \
and open questions. Then list short topic tags.

Respond in exactly this format:
Summary: <summary>
Tags: [\"tag-one\", \"tag-two\"]

<conversation>
{conversation}
</conversation>";

/// A stored conversation summary
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedSummary {
    pub summary: String,
    /// Space-joined normalized tags
    pub tags: String,
    pub date: String,
    pub time: String,
}

/// Executes one JSON request against the store
#[async_trait]
pub trait StoreTransport: Send + Sync {
    async fn execute(&self, body: Value) -> Result<Value>;
}

/// Store reached over HTTP POST with optional basic auth
pub struct HttpStore {
    client: Client,
    url: String,
    username: Option<String>,
    password: Option<String>,
}

impl HttpStore {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
            username: None,
            password: None,
        })
    }

    pub fn with_credentials(mut self, username: Option<String>, password: Option<String>) -> Self {
        self.username = username;
        self.password = password;
        self
    }
}

#[async_trait]
impl StoreTransport for HttpStore {
    async fn execute(&self, body: Value) -> Result<Value> {
        let mut request = self.client.post(&self.url).json(&body);
        if let Some(ref username) = self.username {
            request = request.basic_auth(username, self.password.as_ref());
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::StoreStatus {
                status: status.as_u16(),
                body,
            });
        }

        let value: Value = response.json().await?;
        check_store_errors(&value)?;
        Ok(value)
    }
}

/// The per-statement result elements of a store response
fn result_elements(value: &Value) -> Vec<&Value> {
    match value.get("results").and_then(Value::as_array) {
        Some(results) => results.iter().collect(),
        None => match value.as_array() {
            Some(items) => items.iter().collect(),
            None => vec![value],
        },
    }
}

/// Fail if any result element carries an `error` field
fn check_store_errors(value: &Value) -> Result<()> {
    for element in result_elements(value) {
        if let Some(error) = element.get("error").filter(|e| !e.is_null()) {
            return Err(Error::Store(value_text(Some(error))));
        }
    }
    Ok(())
}

fn value_text(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

/// Store table and retrieval limits
#[derive(Debug, Clone)]
pub struct MemorySettings {
    pub table: String,
    pub max_results: usize,
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self {
            table: DEFAULT_TABLE.to_string(),
            max_results: DEFAULT_MAX_RESULTS,
        }
    }
}

impl MemorySettings {
    /// The table name is interpolated into SQL, so only plain identifiers pass
    pub fn validate(&self) -> Result<()> {
        let mut chars = self.table.chars();
        let valid = chars
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
            && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid {
            return Err(Error::Config(format!("invalid table name: {:?}", self.table)));
        }
        if self.max_results == 0 {
            return Err(Error::Config("max_results must be at least 1".into()));
        }
        Ok(())
    }
}

/// Build the tag-overlap query and its named values
fn build_select(table: &str, tags: &[String], limit: usize) -> (String, Map<String, Value>) {
    let mut values = Map::new();
    let clauses: Vec<String> = tags
        .iter()
        .enumerate()
        .map(|(i, tag)| {
            let name = format!("t{}", i);
            values.insert(name.clone(), Value::String(format!("%{}%", tag)));
            format!("LOWER(tags) LIKE :{}", name)
        })
        .collect();
    values.insert("limit".into(), json!(limit));

    let sql = format!(
        "SELECT summary, tags, date, time FROM {} WHERE {} ORDER BY id DESC LIMIT :limit",
        table,
        clauses.join(" OR ")
    );
    (sql, values)
}

/// Extract the summary text from a `Summary: ... Tags: ...` response
fn parse_summary(response: &str) -> String {
    let text = strip_reasoning(response);
    if let Some((_, rest)) = text.split_once("Summary:") {
        let summary = match rest.split_once("Tags:") {
            Some((summary, _)) => summary,
            None => rest,
        };
        let summary = summary.trim();
        if !summary.is_empty() {
            return summary.to_string();
        }
    }
    response.trim().chars().take(SUMMARY_FALLBACK_CHARS).collect()
}

/// Tags listed after `Tags:` in a summary response
fn parse_summary_tags(response: &str) -> Vec<String> {
    match strip_reasoning(response).split_once("Tags:") {
        Some((_, tags)) => parse_tags(tags),
        None => Vec::new(),
    }
}

type RowParser = fn(&Value) -> Option<Vec<SavedSummary>>;

const ROW_PARSERS: &[RowParser] = &[parse_columns_rows, parse_summary_objects];

/// Parse a query response; any shape that yields nothing gives an empty list
pub fn parse_summaries(value: &Value) -> Vec<SavedSummary> {
    ROW_PARSERS
        .iter()
        .find_map(|parser| parser(value).filter(|rows| !rows.is_empty()))
        .unwrap_or_default()
}

/// `{"columns": [...], "rows": [[...]]}` result elements
fn parse_columns_rows(value: &Value) -> Option<Vec<SavedSummary>> {
    let mut found = Vec::new();
    for element in result_elements(value) {
        let Some(columns) = element.get("columns").and_then(Value::as_array) else {
            continue;
        };
        let Some(rows) = element.get("rows").and_then(Value::as_array) else {
            continue;
        };
        let index = |name: &str| columns.iter().position(|c| c.as_str() == Some(name));
        let Some(summary_at) = index("summary") else {
            continue;
        };
        let (tags_at, date_at, time_at) = (index("tags"), index("date"), index("time"));

        for row in rows.iter().filter_map(Value::as_array) {
            let cell = |at: Option<usize>| value_text(at.and_then(|i| row.get(i)));
            let summary = cell(Some(summary_at));
            if summary.is_empty() {
                continue;
            }
            found.push(SavedSummary {
                summary,
                tags: cell(tags_at),
                date: cell(date_at),
                time: cell(time_at),
            });
        }
    }
    Some(found)
}

/// Any object anywhere in the response carrying a string `summary`
fn parse_summary_objects(value: &Value) -> Option<Vec<SavedSummary>> {
    fn walk(value: &Value, found: &mut Vec<SavedSummary>) {
        match value {
            Value::Object(map) => {
                if let Some(Value::String(summary)) = map.get("summary") {
                    found.push(SavedSummary {
                        summary: summary.clone(),
                        tags: value_text(map.get("tags")),
                        date: value_text(map.get("date")),
                        time: value_text(map.get("time")),
                    });
                    return;
                }
                map.values().for_each(|v| walk(v, found));
            }
            Value::Array(items) => items.iter().for_each(|v| walk(v, found)),
            _ => {}
        }
    }

    let mut found = Vec::new();
    walk(value, &mut found);
    Some(found)
}

/// Render retrieved summaries as a dated context block
pub fn format_context_block(summaries: &[SavedSummary]) -> String {
    let mut block = String::from("Relevant earlier conversations:");
    for record in summaries {
        block.push_str(&format!(
            "\n- [{} {}] {}",
            record.date, record.time, record.summary
        ));
        if !record.tags.is_empty() {
            block.push_str(&format!(" (tags: {})", record.tags));
        }
    }
    block
}

/// Saves and retrieves conversation summaries
pub struct MemoryClient {
    store: Arc<dyn StoreTransport>,
    provider: Arc<dyn LlmProvider>,
    extractor: TagExtractor,
    indicator: ProgressIndicator,
    settings: MemorySettings,
}

impl MemoryClient {
    pub fn new(
        store: Arc<dyn StoreTransport>,
        provider: Arc<dyn LlmProvider>,
        indicator: ProgressIndicator,
        settings: MemorySettings,
    ) -> Self {
        let extractor = TagExtractor::new(provider.clone(), indicator.clone());
        Self {
            store,
            provider,
            extractor,
            indicator,
            settings,
        }
    }

    /// Summarize `history` and write it to the store
    pub async fn save(
        &self,
        history: &[Message],
        system_prompt: Option<&str>,
    ) -> Result<SavedSummary> {
        let mut progress = self.indicator.start("Saving conversation...");
        let result = self.summarize_and_insert(history, system_prompt).await;
        progress.stop().await;
        result
    }

    async fn summarize_and_insert(
        &self,
        history: &[Message],
        system_prompt: Option<&str>,
    ) -> Result<SavedSummary> {
        let transcript = build_transcript(history, system_prompt, None);
        let request = CompletionRequest {
            max_tokens: Some(2048),
            ..CompletionRequest::prompt(
                SUMMARY_SYSTEM_PROMPT,
                SUMMARY_PROMPT.replace("{conversation}", &transcript),
            )
        };
        let response = self.provider.complete(&request).await?;
        let summary = parse_summary(&response);

        let mut tags = self.extractor.extract(history, system_prompt, None).await;
        if tags.is_empty() {
            tags = parse_summary_tags(&response);
        }

        let now = Local::now();
        let record = SavedSummary {
            summary,
            tags: join_tags(&tags),
            date: now.format("%Y-%m-%d").to_string(),
            time: now.format("%H:%M:%S").to_string(),
        };

        let statement = format!(
            "INSERT INTO {} (summary, tags, date, time) VALUES (:summary, :tags, :date, :time)",
            self.settings.table
        );
        let body = json!({
            "transaction": [{
                "statement": statement,
                "values": {
                    "summary": record.summary,
                    "tags": record.tags,
                    "date": record.date,
                    "time": record.time,
                },
            }]
        });
        self.store.execute(body).await?;

        tracing::debug!(tags = %record.tags, "saved conversation summary");
        Ok(record)
    }

    /// Look up earlier summaries sharing a tag with the live conversation.
    ///
    /// Failures are logged and yield an empty list.
    pub async fn retrieve(
        &self,
        history: &[Message],
        system_prompt: Option<&str>,
        input: &str,
    ) -> Vec<SavedSummary> {
        let mut progress = self.indicator.start("Searching memory...");
        let summaries = self.lookup(history, system_prompt, input).await;
        progress.stop().await;
        summaries
    }

    async fn lookup(
        &self,
        history: &[Message],
        system_prompt: Option<&str>,
        input: &str,
    ) -> Vec<SavedSummary> {
        let tags = self.extractor.extract(history, system_prompt, Some(input)).await;
        if tags.is_empty() {
            return Vec::new();
        }

        let (sql, values) = build_select(&self.settings.table, &tags, self.settings.max_results);
        let body = json!({ "transaction": [{ "query": sql, "values": values }] });

        match self.store.execute(body).await {
            Ok(response) => {
                let summaries = parse_summaries(&response);
                tracing::debug!(count = summaries.len(), ?tags, "retrieved summaries");
                summaries
            }
            Err(e) => {
                tracing::warn!("Memory retrieval failed: {}", e);
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockProvider, MockStore};

    fn client(provider: Arc<MockProvider>, store: Arc<MockStore>) -> MemoryClient {
        MemoryClient::new(
            store,
            provider,
            ProgressIndicator::hidden(),
            MemorySettings::default(),
        )
    }

    fn conversation() -> Vec<Message> {
        vec![
            Message::user("My order 1234 never arrived"),
            Message::assistant("Sorry to hear that, let me check."),
        ]
    }

    #[test]
    fn test_parse_summary_contract() {
        let response = "Summary: Customer asked about a late order.\nTags: [\"orders\"]";
        assert_eq!(parse_summary(response), "Customer asked about a late order.");
        assert_eq!(parse_summary_tags(response), vec!["orders"]);
    }

    #[test]
    fn test_parse_summary_after_reasoning() {
        let response = "<think>Summary: draft</think>\nSummary: final\nTags: []";
        assert_eq!(parse_summary(response), "final");
    }

    #[test]
    fn test_parse_summary_fallback_truncates() {
        let response = "x".repeat(1500);
        assert_eq!(parse_summary(&response).len(), SUMMARY_FALLBACK_CHARS);
        assert_eq!(parse_summary("  plain note  "), "plain note");
    }

    #[test]
    fn test_build_select() {
        let tags = vec!["refund".to_string(), "order-status".to_string()];
        let (sql, values) = build_select("conversation_summaries", &tags, 3);
        assert_eq!(
            sql,
            "SELECT summary, tags, date, time FROM conversation_summaries \
             WHERE LOWER(tags) LIKE :t0 OR LOWER(tags) LIKE :t1 ORDER BY id DESC LIMIT :limit"
        );
        assert_eq!(values["t0"], "%refund%");
        assert_eq!(values["t1"], "%order-status%");
        assert_eq!(values["limit"], 3);
    }

    #[test]
    fn test_parse_columns_rows() {
        let response = json!({
            "results": [{
                "columns": ["summary", "tags", "date", "time"],
                "rows": [
                    ["late order", "orders refund", "2024-05-01", "10:00:00"],
                    ["billing", "invoice", "2024-04-30", "09:15:00"]
                ]
            }]
        });
        let summaries = parse_summaries(&response);
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].summary, "late order");
        assert_eq!(summaries[1].date, "2024-04-30");
    }

    #[test]
    fn test_parse_summary_objects_fallback() {
        let response = json!([
            { "ok": true },
            { "data": { "rows": [{ "summary": "found it", "tags": "a b", "date": "d", "time": null }] } }
        ]);
        let summaries = parse_summaries(&response);
        assert_eq!(
            summaries,
            vec![SavedSummary {
                summary: "found it".into(),
                tags: "a b".into(),
                date: "d".into(),
                time: String::new(),
            }]
        );
    }

    #[test]
    fn test_parse_summaries_garbage() {
        assert!(parse_summaries(&json!({ "results": [{ "rows_affected": 1 }] })).is_empty());
        assert!(parse_summaries(&json!("nope")).is_empty());
    }

    #[test]
    fn test_check_store_errors() {
        assert!(check_store_errors(&json!({ "results": [{ "last_insert_id": 4 }] })).is_ok());
        let err = check_store_errors(&json!({ "results": [{ "error": "no such table" }] }))
            .unwrap_err();
        assert!(matches!(err, Error::Store(ref m) if m == "no such table"));
        assert!(check_store_errors(&json!([{ "error": null }])).is_ok());
    }

    #[test]
    fn test_settings_validate() {
        assert!(MemorySettings::default().validate().is_ok());
        let bad = MemorySettings {
            table: "x; DROP TABLE y".into(),
            ..Default::default()
        };
        assert!(matches!(bad.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_format_context_block() {
        let block = format_context_block(&[SavedSummary {
            summary: "late order".into(),
            tags: "orders".into(),
            date: "2024-05-01".into(),
            time: "10:00:00".into(),
        }]);
        assert_eq!(
            block,
            "Relevant earlier conversations:\n- [2024-05-01 10:00:00] late order (tags: orders)"
        );
    }

    #[tokio::test]
    async fn test_retrieve_without_tags_skips_store() {
        let provider = Arc::new(MockProvider::new());
        provider.push_completion(Ok("[]".into()));
        let store = Arc::new(MockStore::new());
        let memory = client(provider.clone(), store.clone());

        let found = memory.retrieve(&[], None, "hello").await;
        assert!(found.is_empty());
        assert_eq!(provider.completion_calls(), 1);
        assert_eq!(store.calls(), 0);
    }

    #[tokio::test]
    async fn test_retrieve_queries_by_tag() {
        let provider = Arc::new(MockProvider::new());
        provider.push_completion(Ok(r#"["Refund"]"#.into()));
        let store = Arc::new(MockStore::new());
        store.push_response(Ok(json!({
            "results": [{ "columns": ["summary", "tags", "date", "time"],
                          "rows": [["asked for a refund", "refund", "2024-05-01", "10:00:00"]] }]
        })));
        let memory = client(provider, store.clone());

        let found = memory.retrieve(&conversation(), None, "refund please").await;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].summary, "asked for a refund");

        let bodies = store.bodies();
        let body = &bodies[0]["transaction"][0];
        assert!(body["query"].as_str().unwrap().contains("LOWER(tags) LIKE :t0"));
        assert_eq!(body["values"]["t0"], "%refund%");
    }

    #[tokio::test]
    async fn test_retrieve_store_failure_is_empty() {
        let provider = Arc::new(MockProvider::new());
        provider.push_completion(Ok(r#"["refund"]"#.into()));
        let store = Arc::new(MockStore::new());
        store.push_response(Err("connection reset".into()));
        let memory = client(provider, store.clone());

        assert!(memory.retrieve(&[], None, "refund").await.is_empty());
        assert_eq!(store.calls(), 1);
    }

    #[tokio::test]
    async fn test_save_inserts_summary() {
        let provider = Arc::new(MockProvider::new());
        provider.push_completion(Ok("Summary: Late order 1234.\nTags: [\"orders\"]".into()));
        provider.push_completion(Ok(r#"["Orders", "Shipping Delay"]"#.into()));
        let store = Arc::new(MockStore::new());
        let indicator = ProgressIndicator::hidden();
        let memory = MemoryClient::new(
            store.clone(),
            provider.clone(),
            indicator.clone(),
            MemorySettings::default(),
        );

        let record = memory.save(&conversation(), Some("be helpful")).await.unwrap();
        assert_eq!(record.summary, "Late order 1234.");
        assert_eq!(record.tags, "orders shipping-delay");
        assert_eq!(record.date.len(), 10);
        assert_eq!(record.time.len(), 8);
        assert_eq!(indicator.active_refs(), 0);

        let bodies = store.bodies();
        let body = &bodies[0]["transaction"][0];
        assert_eq!(
            body["statement"],
            "INSERT INTO conversation_summaries (summary, tags, date, time) \
             VALUES (:summary, :tags, :date, :time)"
        );
        assert_eq!(body["values"]["tags"], "orders shipping-delay");
    }

    #[tokio::test]
    async fn test_save_falls_back_to_summary_tags() {
        let provider = Arc::new(MockProvider::new());
        provider.push_completion(Ok("Summary: s\nTags: [\"billing\"]".into()));
        provider.push_completion(Err("tagging failed".into()));
        let store = Arc::new(MockStore::new());
        let memory = client(provider, store);

        let record = memory.save(&conversation(), None).await.unwrap();
        assert_eq!(record.tags, "billing");
    }

    #[tokio::test]
    async fn test_save_propagates_store_failure() {
        let provider = Arc::new(MockProvider::new());
        let store = Arc::new(MockStore::new());
        store.push_response(Err("disk full".into()));
        let memory = client(provider, store);

        let err = memory.save(&conversation(), None).await.unwrap_err();
        assert!(matches!(err, Error::Store(_)));
    }

    #[tokio::test]
    async fn test_save_propagates_summary_failure() {
        let provider = Arc::new(MockProvider::new());
        provider.push_completion(Err("backend down".into()));
        let store = Arc::new(MockStore::new());
        let memory = client(provider, store.clone());

        let err = memory.save(&conversation(), None).await.unwrap_err();
        assert!(matches!(err, Error::Ai(_)));
        assert_eq!(store.calls(), 0);
    }
}
