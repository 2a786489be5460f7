use thiserror::Error;

#[derive(Debug, Error)]
pub enum VcsError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Rate limited: retry after {retry_after_secs:?} seconds")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Unsupported repository: {0}")]
    UnsupportedRepository(String),

    #[error("Missing VCS token for {0}")]
    MissingToken(String),
}

impl VcsError {
    /// Whether the error should abort a sync rather than invalidate one release
    pub fn is_fatal(&self) -> bool {
        !matches!(self, VcsError::NotFound(_) | VcsError::InvalidResponse(_))
    }
}
