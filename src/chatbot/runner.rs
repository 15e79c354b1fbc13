use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::error::{ChatbotError, Result as ChatbotResult};
use super::message::MessageSource;
use super::notify::{RuleNotifier, RuleStatus};
use super::receiver::RunnerInput;
use super::rule::{CommandRestriction, CommandTrigger, RuleSpec, Trigger};
use super::template::{ChatFields, Template};
use crate::events::ApiFollower;
use crate::platform::{ChatSender, ChatView};

/// Resolves, renders and sends a rule's message.
struct ChatAction {
    client: Arc<dyn ChatSender>,
    channel_id: Option<i64>,
    message: MessageSource,
    template: Template,
}

impl ChatAction {
    async fn chat(&mut self, fields: Option<&ChatFields>) -> ChatbotResult<()> {
        let text = self.message.next_message().await?;
        let text = match fields {
            Some(fields) => self.template.render(&text, fields)?,
            None => text,
        };

        self.client
            .send(&text, self.channel_id)
            .await
            .map_err(ChatbotError::Send)
    }
}

/// Executes one active rule until cancelled or until sending fails.
pub struct Runner {
    rule_id: i64,
    trigger: Trigger,
    input: Option<RunnerInput>,
    action: ChatAction,
    notifier: Arc<dyn RuleNotifier>,
    cancel: CancellationToken,
}

impl Runner {
    pub fn new(
        spec: RuleSpec,
        client: Arc<dyn ChatSender>,
        input: Option<RunnerInput>,
        notifier: Arc<dyn RuleNotifier>,
        cancel: CancellationToken,
    ) -> ChatbotResult<Self> {
        Ok(Self {
            rule_id: spec.rule_id,
            trigger: spec.trigger,
            input,
            action: ChatAction {
                client,
                channel_id: spec.channel_id,
                message: spec.message,
                template: Template::new()?,
            },
            notifier,
            cancel,
        })
    }

    /// Sets the queue the runner reads its trigger events from.
    pub fn attach(&mut self, input: RunnerInput) {
        self.input = Some(input);
    }

    /// Runs the trigger loop. `Ok` means the runner was stopped; any error is fatal to it.
    pub async fn run(mut self) -> ChatbotResult<()> {
        let trigger = self.trigger.clone();
        match (trigger, self.input.take()) {
            (Trigger::Timer(interval), _) => self.run_on_timer(interval).await,
            (Trigger::Command(command), Some(RunnerInput::Chat(rx))) => {
                self.run_on_command(&command, rx).await
            }
            (Trigger::Follow(_), Some(RunnerInput::Follow(rx))) => self.run_on_follow(rx).await,
            (Trigger::Raid, Some(RunnerInput::Chat(rx))) => {
                self.run_on_live(rx, |view| view.raid).await
            }
            (Trigger::Rant(range), Some(RunnerInput::Chat(rx))) => {
                self.run_on_live(rx, move |view| range.contains(view.rant / 100))
                    .await
            }
            (Trigger::Sub, Some(RunnerInput::Chat(rx))) => {
                self.run_on_live(rx, |view| view.sub).await
            }
            (trigger, _) => Err(ChatbotError::InvalidRule(format!(
                "no input queue matches trigger {:?}",
                trigger
            ))),
        }
    }

    fn notify_active(&self) {
        self.notifier.notify(RuleStatus::RuleActive {
            rule_id: self.rule_id,
        });
    }

    async fn run_on_timer(&mut self, interval: Duration) -> ChatbotResult<()> {
        loop {
            if self.cancel.is_cancelled() {
                return Ok(());
            }
            self.notify_active();
            self.action.chat(None).await?;

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }

    async fn run_on_command(
        &mut self,
        command: &CommandTrigger,
        mut rx: mpsc::Receiver<ChatView>,
    ) -> ChatbotResult<()> {
        let mut last_triggered: Option<Instant> = None;

        loop {
            self.notify_active();

            let view = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Ok(()),
                view = rx.recv() => match view {
                    Some(view) => view,
                    None => return Ok(()),
                },
            };

            let now = Instant::now();
            if let Some(previous) = last_triggered {
                if now.duration_since(previous) < command.timeout {
                    tracing::trace!(rule.id = self.rule_id, "Command throttled");
                    continue;
                }
            }

            if let Some(restrict) = &command.restrict {
                if is_blocked(restrict, &view) {
                    tracing::debug!(rule.id = self.rule_id, chat.username = %view.username, "Command blocked by restriction");
                    continue;
                }
            }

            self.action.chat(Some(&ChatFields::from_view(&view))).await?;
            last_triggered = Some(now);
        }
    }

    async fn run_on_follow(&mut self, mut rx: mpsc::Receiver<ApiFollower>) -> ChatbotResult<()> {
        loop {
            let follower = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Ok(()),
                follower = rx.recv() => match follower {
                    Some(follower) => follower,
                    None => return Ok(()),
                },
            };

            self.action
                .chat(Some(&ChatFields::from_follower(&follower.username)))
                .await?;
        }
    }

    async fn run_on_live<F>(&mut self, mut rx: mpsc::Receiver<ChatView>, accept: F) -> ChatbotResult<()>
    where
        F: Fn(&ChatView) -> bool,
    {
        loop {
            let view = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Ok(()),
                view = rx.recv() => match view {
                    Some(view) => view,
                    None => return Ok(()),
                },
            };

            if !accept(&view) {
                tracing::trace!(rule.id = self.rule_id, "Live stream event ignored");
                continue;
            }

            self.action.chat(Some(&ChatFields::from_view(&view))).await?;
        }
    }
}

/// True when the sender fails any configured gate.
fn is_blocked(restrict: &CommandRestriction, view: &ChatView) -> bool {
    if restrict.to_follower && !view.is_follower {
        return true;
    }
    if restrict.to_subscriber && !view.is_subscriber() {
        return true;
    }
    view.rant < restrict.to_rant.saturating_mul(100)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chatbot::rule::RantRange;
    use crate::testing::{RecordingNotifier, RecordingSender, chat_view, wait_for};

    struct Harness {
        sender: Arc<RecordingSender>,
        notifier: Arc<RecordingNotifier>,
        cancel: CancellationToken,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                sender: Arc::new(RecordingSender::default()),
                notifier: Arc::new(RecordingNotifier::default()),
                cancel: CancellationToken::new(),
            }
        }

        fn runner(&self, trigger: Trigger, text: &str, input: Option<RunnerInput>) -> Runner {
            let spec = RuleSpec {
                rule_id: 1,
                chatbot_id: 1,
                username: "botuser".to_string(),
                channel_id: None,
                message: MessageSource::Text(text.to_string()),
                trigger,
            };
            Runner::new(
                spec,
                self.sender.clone(),
                input,
                self.notifier.clone(),
                self.cancel.clone(),
            )
            .unwrap()
        }
    }

    fn command(command: &str, timeout_secs: u64, restrict: Option<CommandRestriction>) -> Trigger {
        Trigger::Command(CommandTrigger {
            command: command.to_string(),
            restrict,
            timeout: Duration::from_secs(timeout_secs),
        })
    }

    fn rant_view(username: &str, text: &str, rant: i64) -> ChatView {
        let mut view = chat_view(username, text);
        view.rant = rant;
        view
    }

    #[tokio::test]
    async fn test_command_throttles_repeat_triggers() {
        let harness = Harness::new();
        let (tx, rx) = mpsc::channel(10);
        let runner = harness.runner(
            command("!hello", 5, None),
            "Hi {{.Username}}",
            Some(RunnerInput::Chat(rx)),
        );
        let task = tokio::spawn(runner.run());

        tx.send(chat_view("bob", "!hello")).await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        tx.send(chat_view("bob", "!hello")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(harness.sender.texts(), vec!["Hi bob".to_string()]);

        harness.cancel.cancel();
        assert!(task.await.unwrap().is_ok());
        assert!(harness.notifier.count_active(1) >= 2);
    }

    #[tokio::test]
    async fn test_restriction_skip_does_not_reset_throttle() {
        let harness = Harness::new();
        let (tx, rx) = mpsc::channel(10);
        let restrict = CommandRestriction {
            to_follower: false,
            to_subscriber: false,
            to_rant: 5,
        };
        let runner = harness.runner(
            command("!shout", 1, Some(restrict)),
            "{{.DisplayName}} paid ${{.Rant}}",
            Some(RunnerInput::Chat(rx)),
        );
        let task = tokio::spawn(runner.run());

        tx.send(rant_view("bob", "!shout", 500)).await.unwrap();
        assert!(wait_for(|| harness.sender.count() == 1, Duration::from_secs(1)).await);

        tokio::time::sleep(Duration::from_millis(1100)).await;
        tx.send(rant_view("carol", "!shout", 300)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(rant_view("dave", "!shout", 700)).await.unwrap();
        assert!(wait_for(|| harness.sender.count() == 2, Duration::from_secs(1)).await);

        assert_eq!(
            harness.sender.texts(),
            vec!["bob paid $5".to_string(), "dave paid $7".to_string()]
        );

        harness.cancel.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_follower_and_subscriber_gates() {
        let harness = Harness::new();
        let (tx, rx) = mpsc::channel(10);
        let restrict = CommandRestriction {
            to_follower: true,
            to_subscriber: true,
            to_rant: 0,
        };
        let runner = harness.runner(
            command("!vip", 0, Some(restrict)),
            "welcome {{.Username}}",
            Some(RunnerInput::Chat(rx)),
        );
        let task = tokio::spawn(runner.run());

        let mut stranger = chat_view("stranger", "!vip");
        stranger.is_follower = false;
        let mut follower_only = chat_view("fan", "!vip");
        follower_only.is_follower = true;
        let mut supporter = chat_view("supporter", "!vip");
        supporter.is_follower = true;
        supporter.badges = vec!["recurring_subscription".to_string()];

        tx.send(stranger).await.unwrap();
        tx.send(follower_only).await.unwrap();
        tx.send(supporter).await.unwrap();
        assert!(wait_for(|| harness.sender.count() == 1, Duration::from_secs(1)).await);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(harness.sender.texts(), vec!["welcome supporter".to_string()]);
        harness.cancel.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_rant_range_filters_amounts() {
        let harness = Harness::new();
        let (tx, rx) = mpsc::channel(10);
        let runner = harness.runner(
            Trigger::Rant(RantRange {
                min_amount: 5,
                max_amount: 0,
            }),
            "thanks {{.Username}} for ${{.Rant}}",
            Some(RunnerInput::Chat(rx)),
        );
        let task = tokio::spawn(runner.run());

        tx.send(rant_view("cheap", "hi", 300)).await.unwrap();
        tx.send(rant_view("generous", "hi", 700)).await.unwrap();
        assert!(wait_for(|| harness.sender.count() == 1, Duration::from_secs(1)).await);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(
            harness.sender.texts(),
            vec!["thanks generous for $7".to_string()]
        );
        harness.cancel.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_raid_requires_flag() {
        let harness = Harness::new();
        let (tx, rx) = mpsc::channel(10);
        let runner = harness.runner(Trigger::Raid, "raid by {{.DisplayName}}", Some(RunnerInput::Chat(rx)));
        let task = tokio::spawn(runner.run());

        tx.send(chat_view("plain", "hello")).await.unwrap();
        let mut raid = chat_view("raider", "raiding!");
        raid.raid = true;
        tx.send(raid).await.unwrap();
        assert!(wait_for(|| harness.sender.count() == 1, Duration::from_secs(1)).await);

        assert_eq!(harness.sender.texts(), vec!["raid by raider".to_string()]);
        harness.cancel.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_follow_sends_per_follower() {
        let harness = Harness::new();
        let (tx, rx) = mpsc::channel(10);
        let page = crate::chatbot::rule::Page {
            name: "streamer".to_string(),
            kind: crate::chatbot::rule::PageKind::Account,
        };
        let runner = harness.runner(
            Trigger::Follow(page),
            "thanks for the follow {{.DisplayName}}",
            Some(RunnerInput::Follow(rx)),
        );
        let task = tokio::spawn(runner.run());

        tx.send(ApiFollower { username: "alice".to_string() }).await.unwrap();
        tx.send(ApiFollower { username: "zed".to_string() }).await.unwrap();
        assert!(wait_for(|| harness.sender.count() == 2, Duration::from_secs(1)).await);

        assert_eq!(
            harness.sender.texts(),
            vec![
                "thanks for the follow alice".to_string(),
                "thanks for the follow zed".to_string()
            ]
        );
        harness.cancel.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_timer_sends_until_cancelled() {
        let harness = Harness::new();
        let runner = harness.runner(
            Trigger::Timer(Duration::from_millis(20)),
            "{{.Username}} is not rendered for timers",
            None,
        );
        let task = tokio::spawn(runner.run());

        assert!(wait_for(|| harness.sender.count() >= 3, Duration::from_secs(1)).await);
        harness.cancel.cancel();
        task.await.unwrap().unwrap();

        let sent = harness.sender.count();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(harness.sender.count(), sent);
        assert_eq!(
            harness.sender.texts()[0],
            "{{.Username}} is not rendered for timers"
        );
    }

    #[tokio::test]
    async fn test_send_failure_is_fatal() {
        let harness = Harness::new();
        harness.sender.set_failing(true);
        let (tx, rx) = mpsc::channel(10);
        let runner = harness.runner(command("!x", 0, None), "x", Some(RunnerInput::Chat(rx)));
        let task = tokio::spawn(runner.run());

        tx.send(chat_view("bob", "!x")).await.unwrap();
        let result = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(ChatbotError::Send(_))));
    }

    #[tokio::test]
    async fn test_closed_queue_ends_runner() {
        let harness = Harness::new();
        let (tx, rx) = mpsc::channel(10);
        let runner = harness.runner(Trigger::Sub, "x", Some(RunnerInput::Chat(rx)));
        let task = tokio::spawn(runner.run());

        drop(tx);
        let result = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_sub_requires_flag() {
        let harness = Harness::new();
        let (tx, rx) = mpsc::channel(10);
        let mut runner = harness.runner(Trigger::Sub, "welcome {{.DisplayName}}", None);
        runner.attach(RunnerInput::Chat(rx));
        let task = tokio::spawn(runner.run());

        tx.send(chat_view("lurker", "hello")).await.unwrap();
        let mut sub = chat_view("supporter", "");
        sub.kind = crate::platform::types::CHAT_TYPE_SUBSCRIBER.to_string();
        sub.sub = true;
        tx.send(sub).await.unwrap();
        assert!(wait_for(|| harness.sender.count() == 1, Duration::from_secs(1)).await);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(harness.sender.texts(), vec!["welcome supporter".to_string()]);
        harness.cancel.cancel();
        task.await.unwrap().unwrap();
    }

    #[test]
    fn test_is_blocked_extreme_rant_thresholds() {
        let huge = CommandRestriction {
            to_rant: i64::MAX / 10,
            ..Default::default()
        };
        assert!(is_blocked(&huge, &rant_view("a", "!x", 500)));

        let negative = CommandRestriction {
            to_rant: i64::MIN / 10,
            ..Default::default()
        };
        assert!(!is_blocked(&negative, &rant_view("a", "!x", 0)));
    }

    #[test]
    fn test_is_blocked_rant_threshold() {
        let restrict = CommandRestriction {
            to_rant: 5,
            ..Default::default()
        };
        assert!(is_blocked(&restrict, &rant_view("a", "!x", 499)));
        assert!(!is_blocked(&restrict, &rant_view("a", "!x", 500)));
    }
}
