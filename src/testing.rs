//! Fakes for the platform collaborators, shared by unit tests.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures_util::StreamExt;
use futures_util::stream;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::chatbot::notify::{RuleNotifier, RuleStatus};
use crate::chatbot::rule::{
    Rule, RuleMessage, RuleParameters, RuleSender, RuleTrigger, RuleTriggerCommand,
    RuleTriggerEvent, RuleTriggerEventPage, EventMarker,
};
use crate::platform::error::{PlatformError, Result as PlatformResult};
use crate::platform::types::CHAT_TYPE_MESSAGES;
use crate::platform::{
    ChatClientFactory, ChatSender, ChatStreamSource, ChatView, ChatViewStream,
    LivestreamResponse, StatsFetcher,
};

#[derive(Default)]
pub struct RecordingSender {
    sent: Mutex<Vec<(String, Option<i64>)>>,
    failing: AtomicBool,
    panicking: AtomicBool,
}

impl RecordingSender {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_panicking(&self, panicking: bool) {
        self.panicking.store(panicking, Ordering::SeqCst);
    }

    pub fn texts(&self) -> Vec<String> {
        self.sent.lock().iter().map(|(text, _)| text.clone()).collect()
    }

    pub fn sent(&self) -> Vec<(String, Option<i64>)> {
        self.sent.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.sent.lock().len()
    }
}

#[async_trait]
impl ChatSender for RecordingSender {
    async fn send(&self, text: &str, channel_id: Option<i64>) -> PlatformResult<()> {
        if self.panicking.load(Ordering::SeqCst) {
            panic!("scripted send panic");
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(PlatformError::Server("scripted send failure".to_string()));
        }
        self.sent.lock().push((text.to_string(), channel_id));
        Ok(())
    }
}

/// Hands out one shared recording sender to every identity.
#[derive(Default)]
pub struct FakeClientFactory {
    sender: Arc<RecordingSender>,
    connects: AtomicUsize,
    refused: Mutex<HashSet<String>>,
}

impl FakeClientFactory {
    pub fn sender(&self) -> Arc<RecordingSender> {
        self.sender.clone()
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn refuse(&self, username: &str) {
        self.refused.lock().insert(username.to_string());
    }
}

#[async_trait]
impl ChatClientFactory for FakeClientFactory {
    async fn connect(
        &self,
        username: &str,
        _livestream_url: &str,
    ) -> PlatformResult<Arc<dyn ChatSender>> {
        if self.refused.lock().contains(username) {
            return Err(PlatformError::MissingSession(username.to_string()));
        }
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(self.sender.clone())
    }
}

#[derive(Default)]
pub struct FakeStatsFetcher {
    calls: AtomicUsize,
    failing: AtomicBool,
    response: Mutex<LivestreamResponse>,
}

impl FakeStatsFetcher {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_response(&self, response: LivestreamResponse) {
        *self.response.lock() = response;
    }
}

#[async_trait]
impl StatsFetcher for FakeStatsFetcher {
    async fn fetch(&self, _api_url: &str) -> PlatformResult<LivestreamResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(PlatformError::Status {
                status: 500,
                body: "scripted failure".to_string(),
            });
        }
        Ok(self.response.lock().clone())
    }
}

/// Each subscription gets a fresh stream fed through `push`.
#[derive(Default)]
pub struct FakeChatStreamSource {
    subscriptions: AtomicUsize,
    refusing: AtomicBool,
    current: Mutex<Option<mpsc::UnboundedSender<PlatformResult<ChatView>>>>,
}

impl FakeChatStreamSource {
    pub fn subscriptions(&self) -> usize {
        self.subscriptions.load(Ordering::SeqCst)
    }

    pub fn set_refusing(&self, refusing: bool) {
        self.refusing.store(refusing, Ordering::SeqCst);
    }

    pub fn push(&self, item: PlatformResult<ChatView>) {
        if let Some(tx) = self.current.lock().as_ref() {
            let _ = tx.send(item);
        }
    }

    pub fn fail(&self, reason: &str) {
        self.push(Err(PlatformError::Stream(reason.to_string())));
    }
}

#[async_trait]
impl ChatStreamSource for FakeChatStreamSource {
    async fn subscribe(&self, livestream_url: &str) -> PlatformResult<ChatViewStream> {
        if self.refusing.load(Ordering::SeqCst) {
            return Err(PlatformError::ChatInfo(format!(
                "no chat for {}",
                livestream_url
            )));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        *self.current.lock() = Some(tx);
        self.subscriptions.fetch_add(1, Ordering::SeqCst);

        let items = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });
        Ok(items.boxed())
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    statuses: Mutex<Vec<RuleStatus>>,
}

impl RecordingNotifier {
    pub fn statuses(&self) -> Vec<RuleStatus> {
        self.statuses.lock().clone()
    }

    pub fn contains(&self, status: &RuleStatus) -> bool {
        self.statuses.lock().contains(status)
    }

    pub fn count_active(&self, rule_id: i64) -> usize {
        self.statuses
            .lock()
            .iter()
            .filter(|status| **status == RuleStatus::RuleActive { rule_id })
            .count()
    }
}

impl RuleNotifier for RecordingNotifier {
    fn notify(&self, status: RuleStatus) {
        self.statuses.lock().push(status);
    }
}

pub fn chat_view(username: &str, text: &str) -> ChatView {
    ChatView {
        badges: Vec::new(),
        channel_name: String::new(),
        color: String::new(),
        image_url: String::new(),
        is_follower: false,
        rant: 0,
        text: text.to_string(),
        time: Utc::now(),
        kind: CHAT_TYPE_MESSAGES.to_string(),
        username: username.to_string(),
        raid: false,
        sub: false,
    }
}

fn rule(id: i64, chatbot_id: i64, text: &str, trigger: RuleTrigger) -> Rule {
    Rule {
        id,
        chatbot_id,
        display: format!("rule {}", id),
        parameters: Some(RuleParameters {
            message: Some(RuleMessage {
                from_file: None,
                from_text: text.to_string(),
            }),
            send_as: Some(RuleSender {
                channel_id: None,
                display: "botuser".to_string(),
                username: "botuser".to_string(),
            }),
            trigger: Some(trigger),
        }),
    }
}

pub fn command_rule(id: i64, chatbot_id: i64, command: &str, text: &str) -> Rule {
    rule(
        id,
        chatbot_id,
        text,
        RuleTrigger {
            on_command: Some(RuleTriggerCommand {
                command: command.to_string(),
                restrict: None,
                timeout: 0,
            }),
            ..Default::default()
        },
    )
}

pub fn timer_rule(id: i64, chatbot_id: i64, seconds: u64, text: &str) -> Rule {
    rule(
        id,
        chatbot_id,
        text,
        RuleTrigger {
            on_timer: Some(seconds),
            ..Default::default()
        },
    )
}

pub fn follow_rule(id: i64, chatbot_id: i64, account: &str, text: &str) -> Rule {
    rule(
        id,
        chatbot_id,
        text,
        RuleTrigger {
            on_event: Some(RuleTriggerEvent {
                from_account: Some(RuleTriggerEventPage {
                    name: account.to_string(),
                    on_follow: Some(EventMarker {}),
                }),
                ..Default::default()
            }),
            ..Default::default()
        },
    )
}

/// Polls `condition` until it holds or `timeout` passes.
pub async fn wait_for(condition: impl Fn() -> bool, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
