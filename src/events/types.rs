use crate::platform::{ChatView, LivestreamResponse};

/// Output of the API producer, keyed by page name.
#[derive(Debug, Clone)]
pub enum ApiEvent {
    Snapshot {
        name: String,
        response: LivestreamResponse,
    },
    Stopped {
        name: String,
    },
}

impl ApiEvent {
    pub fn name(&self) -> &str {
        match self {
            ApiEvent::Snapshot { name, .. } | ApiEvent::Stopped { name } => name,
        }
    }
}

/// Output of the chat producer, keyed by livestream URL.
#[derive(Debug, Clone)]
pub enum ChatEvent {
    Message { livestream: String, view: ChatView },
    Stopped { livestream: String },
}

impl ChatEvent {
    pub fn livestream(&self) -> &str {
        match self {
            ChatEvent::Message { livestream, .. } | ChatEvent::Stopped { livestream } => livestream,
        }
    }
}

/// A follower delivered to follow-triggered rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiFollower {
    pub username: String,
}
