use thiserror::Error;

/// Failures while turning a page into a fragment. Absent optional fields are
/// never reported here; they resolve to their defaults at extraction time.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("malformed record token: {0:?}")]
    MalformedRecord(String),

    #[error("missing element: {0}")]
    MissingElement(&'static str),

    #[error("malformed team identity: {0:?}")]
    MalformedTeam(String),

    #[error("invalid selector: {0}")]
    Selector(String),
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("unexpected status {status} for {url}")]
    Status { status: u16, url: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("no page for {0}")]
    NotFound(String),
}

impl FetchError {
    /// Rate limiting, server-side failures and transport errors are retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Status { status, .. } => *status == 429 || *status >= 500,
            FetchError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            FetchError::NotFound(_) => false,
        }
    }
}
