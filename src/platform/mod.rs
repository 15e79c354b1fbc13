use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::BoxStream;

pub mod client;
pub mod error;
pub mod stats;
pub mod stream;
pub mod types;

pub use client::HttpChatClientFactory;
pub use error::PlatformError;
pub use stats::HttpStatsFetcher;
pub use stream::SseChatStreamSource;
pub use types::{ChatView, Follower, LivestreamResponse, SessionCookie};

use error::Result as PlatformResult;

/// Posts chat messages into one livestream on behalf of one account.
#[async_trait]
pub trait ChatSender: Send + Sync {
    /// Sends `text`; `channel_id` posts as that channel instead of the account itself.
    async fn send(&self, text: &str, channel_id: Option<i64>) -> PlatformResult<()>;
}

#[async_trait]
pub trait ChatClientFactory: Send + Sync {
    async fn connect(
        &self,
        username: &str,
        livestream_url: &str,
    ) -> PlatformResult<Arc<dyn ChatSender>>;
}

#[async_trait]
pub trait StatsFetcher: Send + Sync {
    async fn fetch(&self, api_url: &str) -> PlatformResult<LivestreamResponse>;
}

pub type ChatViewStream = BoxStream<'static, PlatformResult<ChatView>>;

#[async_trait]
pub trait ChatStreamSource: Send + Sync {
    /// Opens the live chat stream of a livestream. The stream ends or yields an
    /// error when the upstream connection fails.
    async fn subscribe(&self, livestream_url: &str) -> PlatformResult<ChatViewStream>;
}

/// Saved login sessions, keyed by account username.
pub trait SessionStore: Send + Sync {
    fn cookies(&self, username: &str) -> Option<Vec<SessionCookie>>;
}
