//! sidekick-session: the conversation session engine
//!
//! Streamed responses are split into reasoning and answer text and recorded in
//! a token-budgeted history window. Conversation summaries are saved to and
//! recalled from an external store.

pub mod classifier;
pub mod error;
pub mod history;
pub mod memory;
pub mod progress;
pub mod session;
pub mod sink;
pub mod state;
pub mod tags;
pub mod tokens;

#[cfg(test)]
mod testing;

pub use classifier::{StreamClassifier, StreamResult};
pub use error::{Error, Result};
pub use history::History;
pub use memory::{HttpStore, MemoryClient, MemorySettings, SavedSummary, StoreTransport};
pub use progress::{DrawTarget, ProgressGuard, ProgressIndicator};
pub use session::{InputSource, Session, SessionConfig, SessionExit};
pub use sink::RenderSink;
pub use state::{SessionState, SharedState};
pub use tags::TagExtractor;
pub use tokens::{TokenCounter, default_counter};
