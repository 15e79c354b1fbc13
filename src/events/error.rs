use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EventsError {
    #[error("No producer registered for key: {0}")]
    NotFound(String),
    #[error("Producer key is empty")]
    EmptyKey,
}

pub type Result<T, E = EventsError> = std::result::Result<T, E>;
