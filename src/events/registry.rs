use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use super::error::{EventsError, Result as EventsResult};

struct TaskEntry {
    cancel: CancellationToken,
    generation: u64,
}

/// A claim on a key, handed to the task that owns it.
#[derive(Debug, Clone)]
pub(crate) struct TaskClaim {
    pub cancel: CancellationToken,
    pub generation: u64,
}

/// Tracks at most one live background task per key.
#[derive(Default)]
pub(crate) struct TaskRegistry {
    entries: Mutex<HashMap<String, TaskEntry>>,
    next_generation: AtomicU64,
}

impl TaskRegistry {
    /// Registers a new task under `key`, or returns `None` when a live one already exists.
    /// An entry whose token was already cancelled is replaced.
    pub fn claim(&self, key: &str) -> EventsResult<Option<TaskClaim>> {
        if key.is_empty() {
            return Err(EventsError::EmptyKey);
        }

        let mut entries = self.entries.lock();
        if let Some(existing) = entries.get(key) {
            if !existing.cancel.is_cancelled() {
                return Ok(None);
            }
        }

        let claim = TaskClaim {
            cancel: CancellationToken::new(),
            generation: self.next_generation.fetch_add(1, Ordering::Relaxed),
        };
        entries.insert(
            key.to_string(),
            TaskEntry {
                cancel: claim.cancel.clone(),
                generation: claim.generation,
            },
        );

        Ok(Some(claim))
    }

    /// Removes `key` if it still belongs to `generation`. Returns whether it did.
    pub fn release(&self, key: &str, generation: u64) -> bool {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.generation == generation => {
                entries.remove(key);
                true
            }
            _ => false,
        }
    }

    pub fn cancel(&self, key: &str) -> EventsResult<()> {
        let entries = self.entries.lock();
        let entry = entries
            .get(key)
            .ok_or_else(|| EventsError::NotFound(key.to_string()))?;
        entry.cancel.cancel();
        Ok(())
    }

    pub fn cancel_all(&self) {
        for entry in self.entries.lock().values() {
            entry.cancel.cancel();
        }
    }

    pub fn is_active(&self, key: &str) -> bool {
        self.entries
            .lock()
            .get(key)
            .is_some_and(|entry| !entry.cancel.is_cancelled())
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries.lock().keys().cloned().collect()
    }
}
