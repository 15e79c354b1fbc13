use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlatformError {
    #[error("HTTP request failed: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("JSON deserialization failed: {0}")]
    SerdeJson(#[from] serde_json::Error),
    #[error("HTTP response status not OK ({status}): {body}")]
    Status { status: u16, body: String },
    #[error("Chat info error: {0}")]
    ChatInfo(String),
    #[error("No saved session for account: {0}")]
    MissingSession(String),
    #[error("Server returned an error: {0}")]
    Server(String),
    #[error("Chat stream error: {0}")]
    Stream(String),
    #[error("Chat event parsing error: {0}")]
    Parse(String),
}

pub type Result<T, E = PlatformError> = std::result::Result<T, E>;
