use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::mpsc;

use super::error::Result as EventsResult;
use super::registry::{TaskClaim, TaskRegistry};
use super::types::ChatEvent;
use crate::platform::ChatStreamSource;

struct ChatProducerInner {
    source: Arc<dyn ChatStreamSource>,
    tx: mpsc::Sender<ChatEvent>,
    tasks: TaskRegistry,
    resubscribe_after: Duration,
}

/// Forwards live chat for each livestream URL, one task per URL.
#[derive(Clone)]
pub struct ChatProducer {
    inner: Arc<ChatProducerInner>,
}

enum StreamExit {
    Cancelled,
    Resubscribe,
    Failed,
}

impl ChatProducer {
    pub fn new(
        source: Arc<dyn ChatStreamSource>,
        tx: mpsc::Sender<ChatEvent>,
        resubscribe_after: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(ChatProducerInner {
                source,
                tx,
                tasks: TaskRegistry::default(),
                resubscribe_after,
            }),
        }
    }

    pub fn start(&self, livestream_url: &str) -> EventsResult<()> {
        let Some(claim) = self.inner.tasks.claim(livestream_url)? else {
            tracing::debug!(livestream.url = %livestream_url, "Chat producer already active");
            return Ok(());
        };

        tracing::info!(livestream.url = %livestream_url, "Starting chat producer");
        tokio::spawn(run_chat_producer(
            self.inner.clone(),
            livestream_url.to_string(),
            claim,
        ));

        Ok(())
    }

    pub fn stop(&self, livestream_url: &str) -> EventsResult<()> {
        self.inner.tasks.cancel(livestream_url)
    }

    pub fn active(&self, livestream_url: &str) -> bool {
        self.inner.tasks.is_active(livestream_url)
    }

    pub fn active_keys(&self) -> Vec<String> {
        self.inner.tasks.keys()
    }

    pub fn shutdown(&self) {
        self.inner.tasks.cancel_all();
    }
}

async fn run_chat_producer(inner: Arc<ChatProducerInner>, livestream: String, claim: TaskClaim) {
    loop {
        match stream_once(&inner, &livestream, &claim).await {
            StreamExit::Resubscribe => {
                tracing::debug!(livestream.url = %livestream, "Resubscribing to chat stream");
            }
            StreamExit::Cancelled | StreamExit::Failed => break,
        }
    }

    if inner.tasks.release(&livestream, claim.generation) {
        tracing::info!(livestream.url = %livestream, "Chat producer stopped");
        if inner
            .tx
            .send(ChatEvent::Stopped { livestream })
            .await
            .is_err()
        {
            tracing::debug!("Chat event queue closed before stop event");
        }
    }
}

/// Runs one subscription until it is cancelled, fails, or reaches the resubscribe window.
async fn stream_once(
    inner: &ChatProducerInner,
    livestream: &str,
    claim: &TaskClaim,
) -> StreamExit {
    let cancel = &claim.cancel;

    let subscribed = tokio::select! {
        biased;
        _ = cancel.cancelled() => return StreamExit::Cancelled,
        subscribed = inner.source.subscribe(livestream) => subscribed,
    };
    let mut stream = match subscribed {
        Ok(stream) => stream,
        Err(e) => {
            tracing::error!(livestream.url = %livestream, error = %e, "Error starting chat stream");
            return StreamExit::Failed;
        }
    };

    let resubscribe = tokio::time::sleep(inner.resubscribe_after);
    tokio::pin!(resubscribe);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return StreamExit::Cancelled,
            _ = &mut resubscribe => return StreamExit::Resubscribe,
            item = stream.next() => match item {
                Some(Ok(view)) => {
                    let event = ChatEvent::Message {
                        livestream: livestream.to_string(),
                        view,
                    };
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return StreamExit::Cancelled,
                        sent = inner.tx.send(event) => {
                            if sent.is_err() {
                                tracing::warn!(livestream.url = %livestream, "Chat event queue closed");
                                return StreamExit::Failed;
                            }
                        }
                    }
                }
                Some(Err(e)) => {
                    tracing::error!(livestream.url = %livestream, error = %e, "Chat stream returned error");
                    return StreamExit::Failed;
                }
                None => {
                    tracing::warn!(livestream.url = %livestream, "Chat stream ended");
                    return StreamExit::Failed;
                }
            }
        }
    }
}
