use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::chatbot::Chatbot;
use crate::events::{ApiEvent, ChatEvent, ProducerQueues};
use crate::platform::LivestreamResponse;
use crate::platform::types::CHAT_TYPE_INIT;

/// What is known about a monitored page from its statistics API.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PageState {
    pub name: String,
    pub api_active: bool,
    pub is_live: bool,
    pub latest: Option<LivestreamResponse>,
    /// Follow events dropped because a rule's queue stayed full.
    pub dropped_events: u64,
}

/// Page bookkeeping fed by API producer events.
#[derive(Clone, Default)]
pub struct PageTracker {
    pages: Arc<Mutex<HashMap<String, PageState>>>,
}

impl PageTracker {
    pub fn record(&self, event: &ApiEvent) {
        let mut pages = self.pages.lock();
        let page = pages
            .entry(event.name().to_string())
            .or_insert_with(|| PageState {
                name: event.name().to_string(),
                ..Default::default()
            });

        match event {
            ApiEvent::Snapshot { response, .. } => {
                page.api_active = true;
                page.is_live = response.is_live();
                page.latest = Some(response.clone());
            }
            ApiEvent::Stopped { .. } => {
                page.api_active = false;
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<PageState> {
        self.pages.lock().get(name).cloned()
    }

    pub fn snapshot(&self) -> Vec<PageState> {
        let mut pages: Vec<PageState> = self.pages.lock().values().cloned().collect();
        pages.sort_by(|a, b| a.name.cmp(&b.name));
        pages
    }
}

/// Drains both producer queues and routes every event to the engine and the page tracker.
pub struct Dispatcher {
    engine: Chatbot,
    pages: PageTracker,
    queues: ProducerQueues,
    cancel: CancellationToken,
}

impl Dispatcher {
    pub fn new(
        engine: Chatbot,
        pages: PageTracker,
        queues: ProducerQueues,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            engine,
            pages,
            queues,
            cancel,
        }
    }

    pub async fn run(mut self) {
        tracing::info!("Event dispatcher started");

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                Some(event) = self.queues.api.recv() => self.process_api(event).await,
                Some(event) = self.queues.chat.recv() => self.process_chat(event).await,
                else => break,
            }
        }

        tracing::info!("Event dispatcher stopped");
    }

    async fn process_api(&self, event: ApiEvent) {
        if event.name().is_empty() {
            tracing::error!("Received API event with empty page name");
            return;
        }

        self.pages.record(&event);
        if let ApiEvent::Stopped { name } = &event {
            tracing::info!(page.name = %name, "Page API inactive");
        }
        self.engine.handle_api(&event).await;
    }

    async fn process_chat(&self, event: ChatEvent) {
        match &event {
            ChatEvent::Stopped { livestream } => {
                tracing::info!(livestream.url = %livestream, "Chat stream inactive");
            }
            ChatEvent::Message { view, .. } if view.kind == CHAT_TYPE_INIT => {}
            ChatEvent::Message { .. } => self.engine.handle_chat(&event).await,
        }
    }
}
