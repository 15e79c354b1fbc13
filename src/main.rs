use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod chatbot;
mod config;
mod dispatcher;
mod error;
mod events;
mod platform;
mod service;
mod state;
mod store;
mod web;

#[cfg(test)]
mod testing;

use crate::chatbot::{BroadcastNotifier, Chatbot};
use crate::config::load_settings;
use crate::dispatcher::{Dispatcher, PageTracker};
use crate::error::Result as AppResult;
use crate::events::Producers;
use crate::platform::{HttpChatClientFactory, HttpStatsFetcher, SseChatStreamSource};
use crate::service::ChatbotService;
use crate::state::AppState;
use crate::store::JsonStore;
use crate::web::run_server;

const NOTIFICATION_CAPACITY: usize = 256;

#[tokio::main]
async fn main() -> AppResult<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("{}=info,tower_http=debug", env!("CARGO_PKG_NAME")).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let app_settings = load_settings()?;
    tracing::info!("Configuration loaded: {:?}", app_settings);

    let store = Arc::new(JsonStore::load(&app_settings.storage.data_path).await?);
    tracing::info!(
        chatbots = store.chatbots().len(),
        path = %app_settings.storage.data_path.display(),
        "Store loaded"
    );

    let http = reqwest::Client::builder()
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()?;

    let notifier = BroadcastNotifier::new(NOTIFICATION_CAPACITY);
    let engine = Chatbot::new(
        Arc::new(HttpChatClientFactory::new(http.clone(), store.clone())),
        Arc::new(notifier.clone()),
        app_settings.engine.settings(),
    );
    let (producers, queues) = Producers::new(
        Arc::new(HttpStatsFetcher::new(http.clone())),
        Arc::new(SseChatStreamSource::new(http)),
        app_settings.producers.queue_capacity,
        app_settings.producers.chat_resubscribe_after(),
    );

    let cancel = CancellationToken::new();
    let pages = PageTracker::default();
    let dispatcher = tokio::spawn(
        Dispatcher::new(engine.clone(), pages.clone(), queues, cancel.clone()).run(),
    );

    let app_state = AppState {
        service: ChatbotService::new(
            engine,
            producers.clone(),
            store,
            app_settings.producers.api_interval(),
        ),
        pages,
        notifier,
    };

    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for shutdown signal");
            return;
        }
        tracing::info!("Shutdown signal received");
        shutdown.cancel();
    });

    let served = run_server(app_state, app_settings.server, cancel.clone()).await;

    producers.shutdown();
    cancel.cancel();
    if let Err(e) = dispatcher.await {
        tracing::error!(error = %e, "Event dispatcher task failed");
    }

    served
}
