//! Error types for sidekick-session

use thiserror::Error;

/// Result type alias using sidekick-session Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during session operations
#[derive(Error, Debug)]
pub enum Error {
    /// An error from the completion backend
    #[error(transparent)]
    Ai(#[from] sidekick_ai::Error),

    /// HTTP failure talking to the memory store
    #[error("Memory store request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The memory store answered with a non-success status
    #[error("Memory store returned {status}: {body}")]
    StoreStatus { status: u16, body: String },

    /// The memory store reported an error inside a 2xx response
    #[error("Memory store error: {0}")]
    Store(String),

    /// Invalid memory or session settings
    #[error("Invalid configuration: {0}")]
    Config(String),
}
