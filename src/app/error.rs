use thiserror::Error;

use crate::domain::IdentifierError;

#[derive(Error, Debug)]
pub enum BookwatchError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Response parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Identifier(#[from] IdentifierError),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Access forbidden: {0}")]
    Forbidden(String),

    #[error("Unexpected status {status} from {url}")]
    UnexpectedStatus { status: u16, url: String },

    #[error("Download aborted after {consecutive_errors} consecutive failures without a single page")]
    CircuitOpen { consecutive_errors: u32 },

    #[error("Book not found: {0}")]
    BookNotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl BookwatchError {
    /// Classify a transport failure, keeping timeouts distinguishable.
    pub fn transport(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            let url = err.url().map(|u| u.to_string()).unwrap_or_default();
            BookwatchError::Timeout(url)
        } else {
            BookwatchError::Http(err)
        }
    }
}

pub type Result<T> = std::result::Result<T, BookwatchError>;
