use thiserror::Error;

/// Failure reported by one of the external collaborators (text generation,
/// web search, page fetching).
#[derive(Debug, Error)]
pub enum PortError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("backend responded with status {code}: {body}")]
    Status { code: u16, body: String },

    #[error("rate limit exceeded, try again later")]
    RateLimited,

    #[error("input too long, reduce the prompt size")]
    PayloadTooLarge,

    #[error("could not parse backend response: {0}")]
    Parse(String),

    #[error("request timed out")]
    Timeout,
}

impl PortError {
    pub fn status(code: u16, body: impl Into<String>) -> Self {
        match code {
            429 => PortError::RateLimited,
            413 => PortError::PayloadTooLarge,
            _ => PortError::Status {
                code,
                body: body.into(),
            },
        }
    }

    /// Whether repeating the same request might succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            PortError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            PortError::Status { code, .. } => *code >= 500,
            PortError::RateLimited | PortError::Timeout => true,
            PortError::PayloadTooLarge | PortError::Parse(_) => false,
        }
    }
}
