use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;

use crate::events::ApiFollower;
use crate::platform::{ChatView, Follower};

/// Where a rule listens, keyed by livestream URL for chat triggers or page key for follows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Subscription {
    Command { livestream: String, command: String },
    Follow { page: String },
    Raid { livestream: String },
    Rant { livestream: String },
    Sub { livestream: String },
}

impl Subscription {
    pub fn scope(&self) -> &str {
        match self {
            Subscription::Command { livestream, .. }
            | Subscription::Raid { livestream }
            | Subscription::Rant { livestream }
            | Subscription::Sub { livestream } => livestream,
            Subscription::Follow { page } => page,
        }
    }
}

/// Chat-keyed shapes that take every event without a token match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiveShape {
    Raid,
    Rant,
    Sub,
}

/// Receiving end of a rule's input queue.
#[derive(Debug)]
pub enum RunnerInput {
    Chat(mpsc::Receiver<ChatView>),
    Follow(mpsc::Receiver<ApiFollower>),
}

struct FollowEntry {
    tx: mpsc::Sender<ApiFollower>,
    latest: DateTime<Utc>,
}

#[derive(Default)]
struct ReceiverState {
    on_command: HashMap<String, HashMap<i64, mpsc::Sender<ChatView>>>,
    on_follow: HashMap<i64, FollowEntry>,
    on_raid: HashMap<i64, mpsc::Sender<ChatView>>,
    on_rant: HashMap<i64, mpsc::Sender<ChatView>>,
    on_sub: HashMap<i64, mpsc::Sender<ChatView>>,
}

impl ReceiverState {
    fn live(&mut self, shape: LiveShape) -> &mut HashMap<i64, mpsc::Sender<ChatView>> {
        match shape {
            LiveShape::Raid => &mut self.on_raid,
            LiveShape::Rant => &mut self.on_rant,
            LiveShape::Sub => &mut self.on_sub,
        }
    }
}

/// Rule queues for one scope key.
#[derive(Default)]
struct Receiver {
    state: Mutex<ReceiverState>,
    overflow: AtomicU64,
}

/// Maps scope keys to the queues of the rules interested in them.
pub struct ReceiverRegistry {
    receivers: Mutex<HashMap<String, Arc<Receiver>>>,
    queue_depth: usize,
    delivery_timeout: Duration,
    follow_offset: chrono::Duration,
}

impl ReceiverRegistry {
    pub fn new(
        queue_depth: usize,
        delivery_timeout: Duration,
        follow_offset: chrono::Duration,
    ) -> Self {
        Self {
            receivers: Mutex::new(HashMap::new()),
            queue_depth: queue_depth.max(1),
            delivery_timeout,
            follow_offset,
        }
    }

    fn receiver(&self, scope: &str) -> Option<Arc<Receiver>> {
        self.receivers.lock().get(scope).cloned()
    }

    fn receiver_or_create(&self, scope: &str) -> Arc<Receiver> {
        self.receivers
            .lock()
            .entry(scope.to_string())
            .or_default()
            .clone()
    }

    /// Creates the rule's input queue and registers its sending end.
    /// A previous registration of the same rule under the same subscription is replaced.
    pub fn register(&self, subscription: &Subscription, rule_id: i64) -> RunnerInput {
        let receiver = self.receiver_or_create(subscription.scope());
        let mut state = receiver.state.lock();

        match subscription {
            Subscription::Follow { .. } => {
                let (tx, rx) = mpsc::channel(self.queue_depth);
                state.on_follow.insert(
                    rule_id,
                    FollowEntry {
                        tx,
                        latest: Utc::now(),
                    },
                );
                RunnerInput::Follow(rx)
            }
            Subscription::Command { command, .. } => {
                let (tx, rx) = mpsc::channel(self.queue_depth);
                state
                    .on_command
                    .entry(command.clone())
                    .or_default()
                    .insert(rule_id, tx);
                RunnerInput::Chat(rx)
            }
            Subscription::Raid { .. } => {
                let (tx, rx) = mpsc::channel(self.queue_depth);
                state.live(LiveShape::Raid).insert(rule_id, tx);
                RunnerInput::Chat(rx)
            }
            Subscription::Rant { .. } => {
                let (tx, rx) = mpsc::channel(self.queue_depth);
                state.live(LiveShape::Rant).insert(rule_id, tx);
                RunnerInput::Chat(rx)
            }
            Subscription::Sub { .. } => {
                let (tx, rx) = mpsc::channel(self.queue_depth);
                state.live(LiveShape::Sub).insert(rule_id, tx);
                RunnerInput::Chat(rx)
            }
        }
    }

    /// Drops the rule's sending end, closing its queue. Returns whether an entry was removed.
    pub fn deregister(&self, subscription: &Subscription, rule_id: i64) -> bool {
        let Some(receiver) = self.receiver(subscription.scope()) else {
            return false;
        };
        let mut state = receiver.state.lock();

        match subscription {
            Subscription::Follow { .. } => state.on_follow.remove(&rule_id).is_some(),
            Subscription::Command { command, .. } => {
                let Some(rules) = state.on_command.get_mut(command) else {
                    return false;
                };
                let removed = rules.remove(&rule_id).is_some();
                if rules.is_empty() {
                    state.on_command.remove(command);
                }
                removed
            }
            Subscription::Raid { .. } => state.live(LiveShape::Raid).remove(&rule_id).is_some(),
            Subscription::Rant { .. } => state.live(LiveShape::Rant).remove(&rule_id).is_some(),
            Subscription::Sub { .. } => state.live(LiveShape::Sub).remove(&rule_id).is_some(),
        }
    }

    /// Delivers a chat message to every rule registered for its leading `!command` token.
    pub async fn dispatch_command(&self, livestream: &str, view: &ChatView) -> usize {
        let Some(command) = command_token(&view.text) else {
            return 0;
        };
        let Some(receiver) = self.receiver(livestream) else {
            return 0;
        };

        let targets: Vec<(i64, mpsc::Sender<ChatView>)> = {
            let state = receiver.state.lock();
            match state.on_command.get(command) {
                Some(rules) => rules.iter().map(|(id, tx)| (*id, tx.clone())).collect(),
                None => return 0,
            }
        };

        self.deliver(&receiver, livestream, targets, view).await
    }

    /// Delivers a chat message to every rule registered for `shape`.
    pub async fn dispatch_live(&self, livestream: &str, shape: LiveShape, view: &ChatView) -> usize {
        let Some(receiver) = self.receiver(livestream) else {
            return 0;
        };

        let targets: Vec<(i64, mpsc::Sender<ChatView>)> = {
            let mut state = receiver.state.lock();
            state
                .live(shape)
                .iter()
                .map(|(id, tx)| (*id, tx.clone()))
                .collect()
        };

        self.deliver(&receiver, livestream, targets, view).await
    }

    /// Delivers followers newer than each rule's high-water mark and advances the mark.
    pub async fn dispatch_follow(&self, page: &str, followers: &[Follower]) -> usize {
        let Some(receiver) = self.receiver(page) else {
            return 0;
        };

        let mut observed: Vec<(DateTime<Utc>, &str)> = Vec::with_capacity(followers.len());
        for follower in followers {
            match DateTime::parse_from_rfc3339(&follower.followed_on) {
                Ok(followed_on) => observed.push((
                    followed_on.with_timezone(&Utc) + self.follow_offset,
                    follower.username.as_str(),
                )),
                Err(e) => tracing::warn!(
                    page.name = %page,
                    follower = %follower.username,
                    followed_on = %follower.followed_on,
                    error = %e,
                    "Skipping follower with malformed timestamp"
                ),
            }
        }
        observed.sort_by_key(|(followed_on, _)| *followed_on);

        let deliveries: Vec<(i64, mpsc::Sender<ApiFollower>, Vec<ApiFollower>)> = {
            let mut state = receiver.state.lock();
            state
                .on_follow
                .iter_mut()
                .filter_map(|(rule_id, entry)| {
                    let fresh: Vec<ApiFollower> = observed
                        .iter()
                        .filter(|(followed_on, _)| *followed_on > entry.latest)
                        .map(|(_, username)| ApiFollower {
                            username: username.to_string(),
                        })
                        .collect();
                    if let Some((newest, _)) = observed.last() {
                        if *newest > entry.latest {
                            entry.latest = *newest;
                        }
                    }
                    (!fresh.is_empty()).then(|| (*rule_id, entry.tx.clone(), fresh))
                })
                .collect()
        };

        let mut delivered = 0;
        for (rule_id, tx, fresh) in deliveries {
            for follower in fresh {
                if self
                    .deliver_one(&receiver, page, rule_id, &tx, follower)
                    .await
                {
                    delivered += 1;
                }
            }
        }
        delivered
    }

    async fn deliver(
        &self,
        receiver: &Receiver,
        scope: &str,
        targets: Vec<(i64, mpsc::Sender<ChatView>)>,
        view: &ChatView,
    ) -> usize {
        let mut delivered = 0;
        for (rule_id, tx) in targets {
            if self
                .deliver_one(receiver, scope, rule_id, &tx, view.clone())
                .await
            {
                delivered += 1;
            }
        }
        delivered
    }

    async fn deliver_one<T>(
        &self,
        receiver: &Receiver,
        scope: &str,
        rule_id: i64,
        tx: &mpsc::Sender<T>,
        item: T,
    ) -> bool {
        match tx.send_timeout(item, self.delivery_timeout).await {
            Ok(()) => true,
            Err(SendTimeoutError::Timeout(_)) => {
                let dropped = receiver.overflow.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::warn!(
                    rule.id = rule_id,
                    scope = %scope,
                    dropped_total = dropped,
                    "Rule queue full, dropping event"
                );
                false
            }
            Err(SendTimeoutError::Closed(_)) => {
                tracing::debug!(rule.id = rule_id, scope = %scope, "Rule queue closed");
                false
            }
        }
    }

    /// Events dropped for `scope` because a rule's queue stayed full.
    pub fn overflow(&self, scope: &str) -> u64 {
        self.receiver(scope)
            .map_or(0, |receiver| receiver.overflow.load(Ordering::Relaxed))
    }

    /// Number of rules registered under `scope`.
    #[cfg(test)]
    pub(crate) fn registered(&self, scope: &str) -> usize {
        self.receiver(scope).map_or(0, |receiver| {
            let state = receiver.state.lock();
            state.on_command.values().map(HashMap::len).sum::<usize>()
                + state.on_follow.len()
                + state.on_raid.len()
                + state.on_rant.len()
                + state.on_sub.len()
        })
    }
}

/// The `!command` token a chat message starts with, if any.
pub fn command_token(text: &str) -> Option<&str> {
    if !text.starts_with('!') {
        return None;
    }
    text.split(char::is_whitespace).next()
}
