use thiserror::Error;

#[derive(Error, Debug)]
pub enum PromptError {
    /// Unknown duration key or other input impossible with a valid surface.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The collaborator returned JSON that fails schema, count or field
    /// validation (distinct from a transport failure).
    #[error("Malformed collaborator response: {0}")]
    MalformedResponse(String),

    /// Quota/rate-limit condition, classified at the HTTP boundary.
    #[error("API Quota Exceeded: {0}")]
    QuotaExceeded(String),

    #[error("API error: {0}")]
    Api(String),

    /// A stored image reference could not be decoded for revision.
    #[error("Invalid image state: {0}")]
    InvalidState(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PromptError {
    /// Whether a per-scene failure escalates to a run-fatal error.
    /// Only quota exhaustion cancels strictly-later unstarted scenes.
    pub fn is_fatal(&self) -> bool {
        matches!(self, PromptError::QuotaExceeded(_))
    }
}

pub type Result<T> = std::result::Result<T, PromptError>;
