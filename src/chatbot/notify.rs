use serde::Serialize;
use tokio::sync::broadcast;

/// Rule state change pushed to the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleStatus {
    RuleActive { rule_id: i64 },
    RuleInactive { rule_id: i64 },
    RuleError { rule_id: i64, message: String },
}

impl RuleStatus {
    pub fn rule_id(&self) -> i64 {
        match self {
            RuleStatus::RuleActive { rule_id }
            | RuleStatus::RuleInactive { rule_id }
            | RuleStatus::RuleError { rule_id, .. } => *rule_id,
        }
    }
}

/// One-way sink for rule notifications. Never blocks and never fails.
pub trait RuleNotifier: Send + Sync {
    fn notify(&self, status: RuleStatus);
}

/// Fans notifications out to any number of websocket subscribers.
#[derive(Clone)]
pub struct BroadcastNotifier {
    tx: broadcast::Sender<RuleStatus>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RuleStatus> {
        self.tx.subscribe()
    }
}

impl RuleNotifier for BroadcastNotifier {
    fn notify(&self, status: RuleStatus) {
        tracing::trace!(rule.id = status.rule_id(), status = ?status, "Rule notification");
        // No subscribers is not an error.
        let _ = self.tx.send(status);
    }
}
