use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use super::error::Result as EventsResult;
use super::registry::{TaskClaim, TaskRegistry};
use super::types::ApiEvent;
use crate::platform::StatsFetcher;

struct ApiProducerInner {
    fetcher: Arc<dyn StatsFetcher>,
    tx: mpsc::Sender<ApiEvent>,
    tasks: TaskRegistry,
}

/// Polls page statistics on an interval, one task per page name.
#[derive(Clone)]
pub struct ApiProducer {
    inner: Arc<ApiProducerInner>,
}

impl ApiProducer {
    pub fn new(fetcher: Arc<dyn StatsFetcher>, tx: mpsc::Sender<ApiEvent>) -> Self {
        Self {
            inner: Arc::new(ApiProducerInner {
                fetcher,
                tx,
                tasks: TaskRegistry::default(),
            }),
        }
    }

    /// Starts polling `api_url` for `name`. Does nothing if a poller for `name` is already live.
    pub fn start(&self, name: &str, api_url: &str, interval: Duration) -> EventsResult<()> {
        let Some(claim) = self.inner.tasks.claim(name)? else {
            tracing::debug!(producer.key = %name, "API producer already active");
            return Ok(());
        };

        tracing::info!(producer.key = %name, interval_secs = interval.as_secs(), "Starting API producer");
        tokio::spawn(run_api_producer(
            self.inner.clone(),
            name.to_string(),
            api_url.to_string(),
            interval,
            claim,
        ));

        Ok(())
    }

    pub fn stop(&self, name: &str) -> EventsResult<()> {
        self.inner.tasks.cancel(name)
    }

    pub fn active(&self, name: &str) -> bool {
        self.inner.tasks.is_active(name)
    }

    pub fn active_keys(&self) -> Vec<String> {
        self.inner.tasks.keys()
    }

    pub fn shutdown(&self) {
        self.inner.tasks.cancel_all();
    }
}

async fn run_api_producer(
    inner: Arc<ApiProducerInner>,
    name: String,
    api_url: String,
    interval: Duration,
    claim: TaskClaim,
) {
    let cancel = claim.cancel.clone();

    loop {
        let fetched = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            fetched = inner.fetcher.fetch(&api_url) => fetched,
        };

        match fetched {
            Ok(response) => {
                let event = ApiEvent::Snapshot {
                    name: name.clone(),
                    response,
                };
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    sent = inner.tx.send(event) => {
                        if sent.is_err() {
                            tracing::warn!(producer.key = %name, "API event queue closed");
                            break;
                        }
                    }
                }
            }
            Err(e) => {
                tracing::error!(producer.key = %name, error = %e, "API request failed, stopping producer");
                break;
            }
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }

    if inner.tasks.release(&name, claim.generation) {
        tracing::info!(producer.key = %name, "API producer stopped");
        if inner.tx.send(ApiEvent::Stopped { name }).await.is_err() {
            tracing::debug!("API event queue closed before stop event");
        }
    }
}
