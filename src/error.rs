use thiserror::Error;

/// Fatal problems decoding a positional payload. Missing or mismatched
/// fields are never reported here; they decode to empty values.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid payload envelope: {0}")]
    InvalidEnvelope(#[from] serde_json::Error),

    #[error("payload too short: {len} elements, need at least {min}")]
    TooShort { len: usize, min: usize },

    #[error("listing payload missing at index {0}")]
    MissingPayload(usize),

    #[error("parser panicked: {message}\n{backtrace}")]
    Panicked { message: String, backtrace: String },
}

/// Failures surfaced by crawl jobs and the structured-search client
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("navigation failed: {0}")]
    Navigation(String),

    #[error("element not found: {0}")]
    ElementNotFound(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("browser error: {0}")]
    Browser(String),

    #[error("listing payload not available: {0}")]
    PayloadUnavailable(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API returned status {status}: {body}")]
    Api { status: u16, body: String },

    #[error("parse error: {0}")]
    Parse(#[from] ParseError),
}

impl CrawlError {
    /// Shutdown requested by the exit monitor or a deadline; not a failure
    pub fn is_cancellation(&self) -> bool {
        matches!(self, CrawlError::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, CrawlError>;
