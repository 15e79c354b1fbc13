use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use super::clients::ClientCache;
use super::error::{ChatbotError, Result as ChatbotResult};
use super::notify::{RuleNotifier, RuleStatus};
use super::receiver::{LiveShape, ReceiverRegistry, Subscription};
use super::rule::{Rule, Trigger};
use super::runner::Runner;
use crate::events::{ApiEvent, ChatEvent};
use crate::platform::types::{CHAT_TYPE_MESSAGES, CHAT_TYPE_RAIDING, CHAT_TYPE_SUBSCRIBER};
use crate::platform::{ChatClientFactory, ChatView};

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub runner_queue_depth: usize,
    /// Wait after stopping a running rule before starting it again.
    pub restart_grace: Duration,
    pub delivery_timeout: Duration,
    /// Correction applied to follower timestamps reported by the statistics API.
    pub follow_timestamp_offset: chrono::Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            runner_queue_depth: 10,
            restart_grace: Duration::from_secs(1),
            delivery_timeout: Duration::from_secs(2),
            follow_timestamp_offset: chrono::Duration::hours(-4),
        }
    }
}

struct RunnerHandle {
    cancel: CancellationToken,
    generation: u64,
    subscription: Option<Subscription>,
}

/// Active runners of one chatbot.
#[derive(Default)]
struct Bot {
    runners: Mutex<HashMap<i64, RunnerHandle>>,
}

struct ChatbotInner {
    bots: Mutex<HashMap<i64, Arc<Bot>>>,
    receivers: ReceiverRegistry,
    clients: ClientCache,
    notifier: Arc<dyn RuleNotifier>,
    settings: EngineSettings,
    next_generation: AtomicU64,
}

/// Runs and stops rules, and routes producer events to their runners.
#[derive(Clone)]
pub struct Chatbot {
    inner: Arc<ChatbotInner>,
}

impl Chatbot {
    pub fn new(
        factory: Arc<dyn ChatClientFactory>,
        notifier: Arc<dyn RuleNotifier>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            inner: Arc::new(ChatbotInner {
                bots: Mutex::new(HashMap::new()),
                receivers: ReceiverRegistry::new(
                    settings.runner_queue_depth,
                    settings.delivery_timeout,
                    settings.follow_timestamp_offset,
                ),
                clients: ClientCache::new(factory),
                notifier,
                settings,
                next_generation: AtomicU64::new(0),
            }),
        }
    }

    /// Starts `rule` against `livestream_url`, replacing a runner already active for it.
    #[tracing::instrument(skip(self, rule), fields(rule.id = rule.id, chatbot.id = rule.chatbot_id))]
    pub async fn run(&self, rule: &Rule, livestream_url: &str) -> ChatbotResult<()> {
        let spec = rule.validate()?;
        let (chatbot_id, rule_id) = (spec.chatbot_id, spec.rule_id);

        if self.stop_runner(chatbot_id, rule_id) {
            tokio::time::sleep(self.inner.settings.restart_grace).await;
        }

        let client = self
            .inner
            .clients
            .resolve(&spec.username, livestream_url)
            .await?;

        let subscription = subscription_for(&spec.trigger, livestream_url);
        let cancel = CancellationToken::new();
        let mut runner = Runner::new(
            spec,
            client,
            None,
            self.inner.notifier.clone(),
            cancel.clone(),
        )?;

        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let bot = self.bot_or_create(chatbot_id);
        {
            // Registration and handle swap share the runner lock, so the last
            // handle inserted always owns the live queue.
            let mut runners = bot.runners.lock();
            if let Some(subscription) = &subscription {
                runner.attach(self.inner.receivers.register(subscription, rule_id));
            }
            let replaced = runners.insert(
                rule_id,
                RunnerHandle {
                    cancel,
                    generation,
                    subscription: subscription.clone(),
                },
            );
            if let Some(previous) = replaced {
                // Lost a race with a concurrent run of the same rule.
                previous.cancel.cancel();
                if previous.subscription != subscription {
                    self.release_subscription(previous.subscription.as_ref(), rule_id);
                }
            }
        }

        tracing::info!(livestream.url = %livestream_url, "Starting rule runner");
        tokio::spawn(drive_runner(
            self.inner.clone(),
            chatbot_id,
            rule_id,
            generation,
            runner,
        ));

        Ok(())
    }

    /// Stops `rule` if it is running. Stopping an idle rule succeeds.
    pub fn stop(&self, rule: &Rule) -> ChatbotResult<()> {
        if self.stop_runner(rule.chatbot_id, rule.id) {
            tracing::info!(rule.id = rule.id, chatbot.id = rule.chatbot_id, "Stopped rule runner");
        }
        Ok(())
    }

    /// Cancels and forgets the runner of a rule. Returns whether one was running.
    pub fn stop_runner(&self, chatbot_id: i64, rule_id: i64) -> bool {
        let Some(bot) = self.bot(chatbot_id) else {
            return false;
        };
        let mut runners = bot.runners.lock();
        let Some(handle) = runners.remove(&rule_id) else {
            return false;
        };

        handle.cancel.cancel();
        self.release_subscription(handle.subscription.as_ref(), rule_id);
        true
    }

    pub fn running(&self, chatbot_id: i64, rule_id: i64) -> bool {
        self.bot(chatbot_id)
            .is_some_and(|bot| bot.runners.lock().contains_key(&rule_id))
    }

    pub fn running_rules(&self, chatbot_id: i64) -> Vec<i64> {
        let mut ids: Vec<i64> = self
            .bot(chatbot_id)
            .map(|bot| bot.runners.lock().keys().copied().collect())
            .unwrap_or_default();
        ids.sort_unstable();
        ids
    }

    /// Runs every rule, continuing past failures. Returns the failures by rule id.
    pub async fn run_all(
        &self,
        rules: &[Rule],
        livestream_url: &str,
    ) -> Vec<(i64, ChatbotError)> {
        let mut failures = Vec::new();
        for rule in rules {
            if let Err(e) = self.run(rule, livestream_url).await {
                tracing::error!(rule.id = rule.id, error = %e, "Error running rule");
                failures.push((rule.id, e));
            }
        }
        failures
    }

    /// Stops every runner of a chatbot. Returns how many were stopped.
    pub fn stop_all(&self, chatbot_id: i64) -> usize {
        let Some(bot) = self.bot(chatbot_id) else {
            return 0;
        };
        let mut runners = bot.runners.lock();
        let stopped = runners.len();
        for (rule_id, handle) in runners.drain() {
            handle.cancel.cancel();
            self.release_subscription(handle.subscription.as_ref(), rule_id);
        }
        drop(runners);

        tracing::info!(chatbot.id = chatbot_id, stopped, "Stopped all rules");
        stopped
    }

    /// Stops every runner of a deleted chatbot and drops its bookkeeping.
    pub fn remove_bot(&self, chatbot_id: i64) -> ChatbotResult<()> {
        if self.bot(chatbot_id).is_none() {
            return Err(ChatbotError::NotFound(format!("chatbot {}", chatbot_id)));
        }
        self.stop_all(chatbot_id);
        self.inner.bots.lock().remove(&chatbot_id);
        Ok(())
    }

    /// Routes a statistics snapshot to the follow rules watching its page.
    pub async fn handle_api(&self, event: &ApiEvent) {
        match event {
            ApiEvent::Snapshot { name, response } => {
                let delivered = self
                    .inner
                    .receivers
                    .dispatch_follow(name, &response.followers.recent_followers)
                    .await;
                if delivered > 0 {
                    tracing::debug!(page.name = %name, delivered, "Delivered new followers");
                }
            }
            ApiEvent::Stopped { name } => {
                tracing::debug!(page.name = %name, "API producer stopped");
            }
        }
    }

    /// Routes a chat message to command, raid, rant and sub rules of its livestream.
    pub async fn handle_chat(&self, event: &ChatEvent) {
        let ChatEvent::Message { livestream, view } = event else {
            return;
        };

        match view.kind.as_str() {
            CHAT_TYPE_MESSAGES | CHAT_TYPE_RAIDING | CHAT_TYPE_SUBSCRIBER => {
                self.handle_message(livestream, view).await
            }
            other => tracing::trace!(livestream.url = %livestream, chat.kind = %other, "Ignoring chat event"),
        }
    }

    async fn handle_message(&self, livestream: &str, view: &ChatView) {
        let receivers = &self.inner.receivers;

        let commands = receivers.dispatch_command(livestream, view).await;
        let raids = if view.raid {
            receivers.dispatch_live(livestream, LiveShape::Raid, view).await
        } else {
            0
        };
        let rants = if view.rant > 0 {
            receivers.dispatch_live(livestream, LiveShape::Rant, view).await
        } else {
            0
        };
        let subs = if view.sub {
            receivers.dispatch_live(livestream, LiveShape::Sub, view).await
        } else {
            0
        };

        tracing::trace!(
            livestream.url = %livestream,
            commands,
            raids,
            rants,
            subs,
            "Dispatched chat message"
        );
    }

    /// Events dropped for a scope because a rule's queue stayed full.
    pub fn dropped_events(&self, scope: &str) -> u64 {
        self.inner.receivers.overflow(scope)
    }

    fn bot(&self, chatbot_id: i64) -> Option<Arc<Bot>> {
        self.inner.bots.lock().get(&chatbot_id).cloned()
    }

    fn bot_or_create(&self, chatbot_id: i64) -> Arc<Bot> {
        self.inner
            .bots
            .lock()
            .entry(chatbot_id)
            .or_default()
            .clone()
    }

    fn release_subscription(&self, subscription: Option<&Subscription>, rule_id: i64) {
        if let Some(subscription) = subscription {
            self.inner.receivers.deregister(subscription, rule_id);
        }
    }

    #[cfg(test)]
    pub(crate) fn registered(&self, scope: &str) -> usize {
        self.inner.receivers.registered(scope)
    }
}

fn subscription_for(trigger: &Trigger, livestream_url: &str) -> Option<Subscription> {
    let livestream = livestream_url.to_string();
    match trigger {
        Trigger::Timer(_) => None,
        Trigger::Command(command) => Some(Subscription::Command {
            livestream,
            command: command.command.clone(),
        }),
        Trigger::Follow(page) => Some(Subscription::Follow { page: page.key() }),
        Trigger::Raid => Some(Subscription::Raid { livestream }),
        Trigger::Rant(_) => Some(Subscription::Rant { livestream }),
        Trigger::Sub => Some(Subscription::Sub { livestream }),
    }
}

async fn drive_runner(
    inner: Arc<ChatbotInner>,
    chatbot_id: i64,
    rule_id: i64,
    generation: u64,
    runner: Runner,
) {
    inner.notifier.notify(RuleStatus::RuleActive { rule_id });

    // The runner gets its own task so a panic still reaches the cleanup below.
    match tokio::spawn(runner.run()).await {
        Ok(Ok(())) => {
            tracing::info!(rule.id = rule_id, chatbot.id = chatbot_id, "Rule runner stopped");
        }
        Ok(Err(e)) => {
            tracing::error!(rule.id = rule_id, chatbot.id = chatbot_id, error = %e, "Rule runner returned error");
            inner.notifier.notify(RuleStatus::RuleError {
                rule_id,
                message: e.to_string(),
            });
        }
        Err(e) => {
            tracing::error!(rule.id = rule_id, chatbot.id = chatbot_id, error = %e, "Rule runner panicked");
            inner.notifier.notify(RuleStatus::RuleError {
                rule_id,
                message: format!("runner failed: {}", e),
            });
        }
    }

    if !cleanup_runner(&inner, chatbot_id, rule_id, generation) {
        inner.notifier.notify(RuleStatus::RuleInactive { rule_id });
    }
}

/// Removes the runner's own registrations. Returns true if a newer runner now owns the rule.
fn cleanup_runner(inner: &ChatbotInner, chatbot_id: i64, rule_id: i64, generation: u64) -> bool {
    let Some(bot) = inner.bots.lock().get(&chatbot_id).cloned() else {
        return false;
    };

    let mut runners = bot.runners.lock();
    match runners.get(&rule_id) {
        Some(handle) if handle.generation == generation => {
            if let Some(handle) = runners.remove(&rule_id) {
                handle.cancel.cancel();
                if let Some(subscription) = &handle.subscription {
                    inner.receivers.deregister(subscription, rule_id);
                }
            }
            false
        }
        Some(_) => true,
        None => false,
    }
}
