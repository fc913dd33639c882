//! Error taxonomy for the scraping and resolution pipeline.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ScoutError>;

/// Failures of a single page fetch. No variant is retried internally.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("http {status} from {url}")]
    Status { url: String, status: u16 },

    /// A 200 whose body is too short to be a real page (interstitials, truncation).
    #[error("body from {url} too small ({len} < {min} bytes)")]
    BodyTooSmall { url: String, len: usize, min: usize },

    #[error("request to {url} failed: {message}")]
    Network { url: String, message: String },

    #[error("failed to build http client: {0}")]
    Client(String),
}

impl FetchError {
    pub fn url(&self) -> Option<&str> {
        match self {
            Self::Timeout { url }
            | Self::Status { url, .. }
            | Self::BodyTooSmall { url, .. }
            | Self::Network { url, .. } => Some(url),
            Self::Client(_) => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ScoutError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// Expected structure absent from the markup.
    #[error("parse error: {0}")]
    Parse(String),

    /// Extracted data failed a sanity check; the extraction is discarded.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Several name-only candidates and the resolver refuses to pick one.
    #[error("ambiguous match for {name:?}: {candidates:?}")]
    AmbiguousMatch { name: String, candidates: Vec<i64> },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("player {0} does not exist")]
    UnknownPlayer(i64),

    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("operation cancelled")]
    Cancelled,
}

impl ScoutError {
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Whether a caller-side retry could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Fetch(FetchError::Timeout { .. }) | Self::Fetch(FetchError::Network { .. }) => {
                true
            }
            Self::Fetch(FetchError::Status { status, .. }) => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        let timeout = ScoutError::from(FetchError::Timeout {
            url: "https://x".to_string(),
        });
        assert!(timeout.is_transient());

        let not_found = ScoutError::from(FetchError::Status {
            url: "https://x".to_string(),
            status: 404,
        });
        assert!(!not_found.is_transient());

        let throttled = ScoutError::from(FetchError::Status {
            url: "https://x".to_string(),
            status: 429,
        });
        assert!(throttled.is_transient());
        assert!(!ScoutError::validation("bad name").is_transient());
    }
}
