use thiserror::Error;

use crate::platform::PlatformError;

#[derive(Error, Debug)]
pub enum ChatbotError {
    #[error("Invalid rule: {0}")]
    InvalidRule(String),
    #[error("Invalid command '{0}': commands must start with '!'")]
    InvalidCommand(String),
    #[error("Error parsing channel ID '{0}'")]
    InvalidChannelId(String),
    #[error("Error resolving chat client for {username}: {source}")]
    ClientResolution {
        username: String,
        #[source]
        source: PlatformError,
    },
    #[error("Error sending chat: {0}")]
    Send(#[source] PlatformError),
    #[error("Error getting message: {0}")]
    Message(String),
    #[error("Error rendering message template: {0}")]
    Template(String),
    #[error("Not found: {0}")]
    NotFound(String),
}

pub type Result<T, E = ChatbotError> = std::result::Result<T, E>;
