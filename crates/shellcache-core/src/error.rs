use thiserror::Error;

use crate::worker::WorkerState;

/// Result type used across the cache lifecycle.
pub type Result<T> = std::result::Result<T, CacheError>;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("Corrupt cache entry: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Transport failure reported by a fetcher that is not backed by reqwest
    #[error("Network error: {0}")]
    Transport(String),

    #[error("Unsuccessful response from {url}: status {status}")]
    Status { url: String, status: u16 },

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid manifest: {0}")]
    Manifest(String),

    #[error("Cannot {action} while worker is {state:?}")]
    InvalidState {
        action: &'static str,
        state: WorkerState,
    },
}

/// Maximum length for URLs quoted in error messages
const MAX_ERROR_URL_LENGTH: usize = 200;

impl CacheError {
    /// Truncate a URL to avoid logging excessive data (query strings can be huge)
    fn truncate_url(url: &str) -> String {
        if url.len() <= MAX_ERROR_URL_LENGTH {
            url.to_string()
        } else {
            let mut end = MAX_ERROR_URL_LENGTH;
            while !url.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated, {} total bytes)", &url[..end], url.len())
        }
    }

    pub fn from_status(url: &str, status: u16) -> Self {
        CacheError::Status {
            url: Self::truncate_url(url),
            status,
        }
    }

    /// True when the failure came from the network layer rather than the store.
    pub fn is_network(&self) -> bool {
        matches!(self, CacheError::Network(_) | CacheError::Transport(_) | CacheError::Status { .. })
    }
}
