use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

pub mod api;
pub mod chat;
pub mod error;
mod registry;
pub mod types;

pub use api::ApiProducer;
pub use chat::ChatProducer;
pub use error::EventsError;
pub use types::{ApiEvent, ApiFollower, ChatEvent};

use crate::platform::{ChatStreamSource, StatsFetcher};

/// Both producers, sharing one lifecycle.
#[derive(Clone)]
pub struct Producers {
    pub api: ApiProducer,
    pub chat: ChatProducer,
}

/// Consumer ends of the producer output queues.
pub struct ProducerQueues {
    pub api: mpsc::Receiver<ApiEvent>,
    pub chat: mpsc::Receiver<ChatEvent>,
}

impl Producers {
    pub fn new(
        fetcher: Arc<dyn StatsFetcher>,
        source: Arc<dyn ChatStreamSource>,
        queue_capacity: usize,
        chat_resubscribe_after: Duration,
    ) -> (Self, ProducerQueues) {
        let (api_tx, api_rx) = mpsc::channel(queue_capacity);
        let (chat_tx, chat_rx) = mpsc::channel(queue_capacity);

        let producers = Self {
            api: ApiProducer::new(fetcher, api_tx),
            chat: ChatProducer::new(source, chat_tx, chat_resubscribe_after),
        };

        (
            producers,
            ProducerQueues {
                api: api_rx,
                chat: chat_rx,
            },
        )
    }

    /// Cancels every live producer. Each publishes its stop event as it exits.
    pub fn shutdown(&self) {
        tracing::info!("Shutting down event producers");
        self.api.shutdown();
        self.chat.shutdown();
    }
}
