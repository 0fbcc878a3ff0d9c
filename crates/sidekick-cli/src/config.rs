//! Configuration file support

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Configuration for sidekick
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the OpenAI-compatible server
    pub base_url: Option<String>,
    /// Model id sent with every request
    pub model: Option<String>,
    /// API key (alternative to SIDEKICK_API_KEY)
    pub api_key: Option<String>,
    /// Ask the model to reason before answering
    pub thinking: Option<bool>,
    /// Maximum tokens per response
    pub max_tokens: Option<u32>,
    /// Inline system prompt
    pub system_prompt: Option<String>,
    /// System prompt file path, used when `system_prompt` is unset
    pub system_prompt_file: Option<String>,
    /// History window budget in tokens
    pub window_tokens: Option<usize>,
    /// Conversation memory store
    #[serde(default)]
    pub memory: MemoryConfig,
}

/// Memory store configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Defaults to on when `url` is set
    pub enabled: Option<bool>,
    pub url: Option<String>,
    pub username: Option<String>,
    /// Alternative to SIDEKICK_MEMORY_PASSWORD
    pub password: Option<String>,
    pub table: Option<String>,
    pub max_results: Option<usize>,
    pub timeout_secs: Option<u64>,
}

impl Config {
    /// Get the config directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("sidekick")
    }

    /// Get the config file path
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("SIDEKICK_CONFIG_PATH") {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }

    /// Load config from file; a missing file yields the defaults
    pub fn load() -> Result<Self> {
        let path = Self::config_path();
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Write the example config if no config file exists
    pub fn init() -> std::io::Result<PathBuf> {
        let path = Self::config_path();
        if path.exists() {
            return Ok(path);
        }

        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::write(&path, example_config())?;
        Ok(path)
    }

    /// Resolve the system prompt from the inline value or the prompt file
    pub fn system_prompt(&self) -> Result<Option<String>> {
        if let Some(ref prompt) = self.system_prompt {
            return Ok(Some(prompt.clone()));
        }
        let Some(ref file) = self.system_prompt_file else {
            return Ok(None);
        };

        let path = expand_home(file);
        let prompt = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read system prompt file {}", path.display()))?;
        Ok(Some(prompt.trim().to_string()))
    }
}

fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}

/// Generate example config content
pub fn example_config() -> &'static str {
    r#"# sidekick configuration file
# Place at ~/.config/sidekick/config.toml (Linux) or set SIDEKICK_CONFIG_PATH

# OpenAI-compatible server
base_url = "http://localhost:8000/v1"
model = "my-model"

# API key (optional for local servers; SIDEKICK_API_KEY also works)
# api_key = "..."

# Ask the model to reason in <think> tags before answering
thinking = true

# Maximum tokens per response
max_tokens = 32768

# System prompt (inline, or read from a file)
# system_prompt = "You are a helpful AI assistant."
# system_prompt_file = "~/.config/sidekick/system_prompt.txt"

# History window budget in tokens; also how often the conversation is autosaved
window_tokens = 8000

# Conversation memory (SQL-over-HTTP store)
[memory]
# enabled = true
# url = "http://localhost:4001/db/execute"
# username = "sidekick"
# password = "..."   # or SIDEKICK_MEMORY_PASSWORD
table = "conversation_summaries"
max_results = 3
timeout_secs = 10
"#
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_example_config_parses() {
        let config = Config::parse(example_config()).unwrap();
        assert_eq!(config.base_url.as_deref(), Some("http://localhost:8000/v1"));
        assert_eq!(config.model.as_deref(), Some("my-model"));
        assert_eq!(config.thinking, Some(true));
        assert_eq!(config.window_tokens, Some(8000));
        assert_eq!(config.memory.url, None);
        assert_eq!(config.memory.table.as_deref(), Some("conversation_summaries"));
        assert_eq!(config.memory.max_results, Some(3));
    }

    #[test]
    fn test_empty_config_is_default() {
        let config = Config::parse("").unwrap();
        assert!(config.model.is_none());
        assert!(config.memory.enabled.is_none());
    }

    #[test]
    fn test_invalid_config_is_error() {
        assert!(Config::parse("window_tokens = \"lots\"").is_err());
    }

    #[test]
    fn test_inline_system_prompt_wins() {
        let config = Config {
            system_prompt: Some("inline".into()),
            system_prompt_file: Some("/nonexistent/prompt.txt".into()),
            ..Default::default()
        };
        assert_eq!(config.system_prompt().unwrap().as_deref(), Some("inline"));
    }

    #[test]
    fn test_missing_prompt_file_is_error() {
        let config = Config {
            system_prompt_file: Some("/nonexistent/prompt.txt".into()),
            ..Default::default()
        };
        assert!(config.system_prompt().is_err());
    }
}
