use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;
use thiserror::Error;

use crate::chatbot::ChatbotError;
use crate::events::EventsError;
use crate::service::ServiceError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum WebError {
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Upstream platform error: {0}")]
    BadGateway(String),
    #[error("Internal server error: {0}")]
    InternalServerError(String),
    #[error("JSON serialization error: {0}")]
    JsonSerialization(#[from] serde_json::Error),
}

impl From<ServiceError> for WebError {
    fn from(error: ServiceError) -> Self {
        let message = error.to_string();
        match error {
            ServiceError::Store(
                StoreError::ChatbotNotFound(_)
                | StoreError::RuleNotFound(_)
                | StoreError::PageNotFound(_),
            ) => WebError::NotFound(message),
            ServiceError::Store(StoreError::Io { .. } | StoreError::Parse(_)) => {
                WebError::InternalServerError(message)
            }
            ServiceError::Chatbot(
                ChatbotError::InvalidRule(_)
                | ChatbotError::InvalidCommand(_)
                | ChatbotError::InvalidChannelId(_)
                | ChatbotError::Message(_)
                | ChatbotError::Template(_),
            ) => WebError::BadRequest(message),
            ServiceError::Chatbot(ChatbotError::NotFound(_)) => WebError::NotFound(message),
            ServiceError::Chatbot(ChatbotError::ClientResolution { .. } | ChatbotError::Send(_)) => {
                WebError::BadGateway(message)
            }
            ServiceError::Events(EventsError::EmptyKey) => WebError::BadRequest(message),
            ServiceError::Events(EventsError::NotFound(_)) => WebError::NotFound(message),
        }
    }
}

impl IntoResponse for WebError {
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            WebError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            WebError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            WebError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg.clone()),
            WebError::InternalServerError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
            WebError::JsonSerialization(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("JSON error: {}", err),
            ),
        };

        let body = Json(json!({
            "error": error_message,
            "status": status.as_u16()
        }));

        (status, body).into_response()
    }
}

pub type Result<T, E = WebError> = std::result::Result<T, E>;
