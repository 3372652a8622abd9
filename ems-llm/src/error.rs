use thiserror::Error;

pub type Result<T> = std::result::Result<T, LlmError>;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("http error: {0}")]
    Http(String),

    #[error("completion service timed out: {0}")]
    Timeout(String),

    #[error("completion service returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("unexpected response format: {0}")]
    ResponseFormat(String),

    #[error("completion service returned an empty response")]
    EmptyResponse,
}

impl From<reqwest::Error> for LlmError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            return Self::Timeout(e.to_string());
        }
        Self::Http(e.to_string())
    }
}

impl From<serde_json::Error> for LlmError {
    fn from(e: serde_json::Error) -> Self {
        Self::ResponseFormat(e.to_string())
    }
}

/// Keeps error bodies short enough for a log line.
pub(crate) fn truncate_body(body: &str) -> String {
    const MAX_BODY_CHARS: usize = 512;
    if body.chars().count() <= MAX_BODY_CHARS {
        return body.to_string();
    }
    let mut out: String = body.chars().take(MAX_BODY_CHARS).collect();
    out.push_str("...");
    out
}
