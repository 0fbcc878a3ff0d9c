//! sidekick - interactive chat with conversation memory

mod config;
mod terminal;

use std::io::IsTerminal;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::Parser;
use sidekick_ai::providers::{get_api_key, openai::OpenAIProvider};
use sidekick_ai::{LlmProvider, ModelConfig};
use sidekick_session::memory::{DEFAULT_MAX_RESULTS, DEFAULT_TABLE, STORE_TIMEOUT};
use sidekick_session::{
    DrawTarget, History, HttpStore, MemoryClient, MemorySettings, ProgressIndicator, Session,
    SessionConfig, SessionExit, default_counter,
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::terminal::{StdinInput, TerminalSink};

const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a helpful AI assistant. Be concise and clear in your responses.";

/// sidekick - chat with a local model that remembers earlier conversations
#[derive(Parser, Debug)]
#[command(name = "sidekick")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Model id sent to the server (default: my-model)
    #[arg(short, long)]
    model: Option<String>,

    /// Base URL of the OpenAI-compatible server
    #[arg(long)]
    base_url: Option<String>,

    /// Disable thinking mode
    #[arg(long)]
    no_thinking: bool,

    /// History window budget in tokens
    #[arg(short, long)]
    window: Option<usize>,

    /// Disable conversation memory
    #[arg(long)]
    no_memory: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Initialize config file
    #[arg(long)]
    init_config: bool,
}

/// Memory store settings after merging config and environment
struct StoreSettings {
    url: String,
    username: Option<String>,
    password: Option<String>,
    timeout: Duration,
    memory: MemorySettings,
}

/// Everything needed to start a session
struct Startup {
    model: ModelConfig,
    api_key: Option<String>,
    system_prompt: String,
    session: SessionConfig,
    store: Option<StoreSettings>,
}

impl Startup {
    /// Merge config with CLI args (CLI takes precedence)
    fn resolve(args: &Args, cfg: &Config) -> anyhow::Result<Self> {
        let defaults = ModelConfig::default();
        let model = ModelConfig {
            id: args.model.clone().or(cfg.model.clone()).unwrap_or(defaults.id),
            base_url: args
                .base_url
                .clone()
                .or(cfg.base_url.clone())
                .unwrap_or(defaults.base_url),
            max_tokens: cfg.max_tokens.unwrap_or(defaults.max_tokens),
        };

        let session = SessionConfig {
            window_tokens: args
                .window
                .or(cfg.window_tokens)
                .unwrap_or(SessionConfig::default().window_tokens),
            thinking: !args.no_thinking && cfg.thinking.unwrap_or(true),
            ..SessionConfig::default()
        };
        if session.window_tokens == 0 {
            bail!("window_tokens must be greater than zero");
        }

        let system_prompt = cfg
            .system_prompt()?
            .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string());

        Ok(Self {
            api_key: get_api_key(cfg.api_key.as_deref(), "SIDEKICK_API_KEY"),
            model,
            system_prompt,
            session,
            store: Self::resolve_store(args, cfg)?,
        })
    }

    fn resolve_store(args: &Args, cfg: &Config) -> anyhow::Result<Option<StoreSettings>> {
        let memory = &cfg.memory;
        let enabled = memory.enabled.unwrap_or(memory.url.is_some());
        if args.no_memory || !enabled {
            return Ok(None);
        }
        let Some(ref url) = memory.url else {
            bail!("memory.url is required when memory is enabled");
        };

        let settings = MemorySettings {
            table: memory
                .table
                .clone()
                .unwrap_or_else(|| DEFAULT_TABLE.to_string()),
            max_results: memory.max_results.unwrap_or(DEFAULT_MAX_RESULTS),
        };
        settings.validate()?;

        Ok(Some(StoreSettings {
            url: url.clone(),
            username: memory.username.clone(),
            password: get_api_key(memory.password.as_deref(), "SIDEKICK_MEMORY_PASSWORD"),
            timeout: memory
                .timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(STORE_TIMEOUT),
            memory: settings,
        }))
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("sidekick=debug,sidekick_ai=debug,sidekick_session=debug")
    } else {
        match EnvFilter::try_from_default_env() {
            Ok(filter) => filter,
            // Stay quiet unless asked; the terminal is the chat surface.
            Err(_) => return,
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_tracing(args.verbose);

    // Initialize config and exit
    if args.init_config {
        match Config::init() {
            Ok(path) => {
                println!("Config file created at: {}", path.display());
                println!("\nExample config:\n{}", config::example_config());
            }
            Err(e) => {
                eprintln!("Error creating config: {}", e);
                std::process::exit(1);
            }
        }
        return Ok(());
    }

    let startup = match Config::load().and_then(|cfg| Startup::resolve(&args, &cfg)) {
        Ok(startup) => startup,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    };

    let exit = run(startup).await?;
    std::process::exit(exit.exit_code());
}

async fn run(startup: Startup) -> anyhow::Result<SessionExit> {
    let target = if std::io::stdout().is_terminal() {
        DrawTarget::Stdout
    } else {
        DrawTarget::Hidden
    };
    let indicator = ProgressIndicator::new(target);

    tracing::debug!(
        model = %startup.model.id,
        base_url = %startup.model.base_url,
        memory = startup.store.is_some(),
        "starting session"
    );

    let provider: Arc<dyn LlmProvider> =
        Arc::new(OpenAIProvider::new(startup.model).with_api_key(startup.api_key));

    let mut session = Session::new(
        provider.clone(),
        default_counter(),
        indicator.clone(),
        History::with_system(startup.system_prompt),
        startup.session,
    );

    if let Some(store) = startup.store {
        let transport = HttpStore::new(store.url, store.timeout)
            .context("Failed to create memory store client")?
            .with_credentials(store.username, store.password);
        session = session.with_memory(MemoryClient::new(
            Arc::new(transport),
            provider,
            indicator.clone(),
            store.memory,
        ));
    }

    let interrupt = CancellationToken::new();
    tokio::spawn(watch_interrupts(interrupt.clone()));

    println!("Welcome to AI Sidekick! Type 'quit' to exit.");

    let mut input = StdinInput::new();
    let mut sink = TerminalSink::new();
    let exit = session.run(&mut input, &mut sink, &interrupt).await;

    indicator.shutdown().await;
    if exit == SessionExit::Interrupted {
        println!();
    }
    println!("Goodbye!");

    Ok(exit)
}

/// The first Ctrl-C starts the graceful exit; a second one exits at once.
async fn watch_interrupts(interrupt: CancellationToken) {
    loop {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Failed to listen for Ctrl-C: {}", e);
            return;
        }
        if interrupt.is_cancelled() {
            eprintln!();
            std::process::exit(SessionExit::Interrupted.exit_code());
        }
        interrupt.cancel();
    }
}
