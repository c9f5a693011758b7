use thiserror::Error;

#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Structured error body returned by the generation service.
    #[error("API error {code}: {message}")]
    Api {
        code: String,
        message: String,
        details: Option<serde_json::Value>,
    },

    /// Non-success status without a structured error body.
    #[error("unexpected status {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    #[error("session expired")]
    AuthExpired,

    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("invalid UTF-8 in stream: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),
}

pub type Result<T> = std::result::Result<T, GenerationError>;
