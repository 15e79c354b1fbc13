use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use super::error::{ChatbotError, Result as ChatbotResult};
use crate::platform::{ChatClientFactory, ChatSender};

/// Chat clients by username, then by livestream URL. Built lazily and shared by runners.
pub struct ClientCache {
    factory: Arc<dyn ChatClientFactory>,
    clients: Mutex<HashMap<String, HashMap<String, Arc<dyn ChatSender>>>>,
}

impl ClientCache {
    pub fn new(factory: Arc<dyn ChatClientFactory>) -> Self {
        Self {
            factory,
            clients: Mutex::new(HashMap::new()),
        }
    }

    fn cached(&self, username: &str, livestream_url: &str) -> Option<Arc<dyn ChatSender>> {
        self.clients
            .lock()
            .get(username)
            .and_then(|by_livestream| by_livestream.get(livestream_url))
            .cloned()
    }

    /// Returns the client for this identity and livestream, connecting on first use.
    pub async fn resolve(
        &self,
        username: &str,
        livestream_url: &str,
    ) -> ChatbotResult<Arc<dyn ChatSender>> {
        if let Some(client) = self.cached(username, livestream_url) {
            return Ok(client);
        }

        let connected = self
            .factory
            .connect(username, livestream_url)
            .await
            .map_err(|source| ChatbotError::ClientResolution {
                username: username.to_string(),
                source,
            })?;

        let mut clients = self.clients.lock();
        let client = clients
            .entry(username.to_string())
            .or_default()
            .entry(livestream_url.to_string())
            .or_insert(connected)
            .clone();

        tracing::debug!(account.username = %username, livestream.url = %livestream_url, "Chat client ready");
        Ok(client)
    }
}
