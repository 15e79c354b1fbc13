use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::{ChatbotError, Result as ChatbotResult};
use super::message::MessageSource;

pub const PREFIX_ACCOUNT: &str = "/user/";
pub const PREFIX_CHANNEL: &str = "/c/";

/// A stored rule, as persisted and exchanged over the API.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub id: i64,
    pub chatbot_id: i64,
    #[serde(default)]
    pub display: String,
    #[serde(default)]
    pub parameters: Option<RuleParameters>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleParameters {
    pub message: Option<RuleMessage>,
    pub send_as: Option<RuleSender>,
    pub trigger: Option<RuleTrigger>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleMessage {
    pub from_file: Option<RuleMessageFile>,
    pub from_text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleMessageFile {
    pub filepath: String,
    pub random_read: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleSender {
    pub channel_id: Option<String>,
    pub display: String,
    pub username: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleTrigger {
    pub on_command: Option<RuleTriggerCommand>,
    pub on_event: Option<RuleTriggerEvent>,
    /// Seconds between messages.
    pub on_timer: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleTriggerCommand {
    pub command: String,
    pub restrict: Option<CommandRestriction>,
    /// Minimum seconds between two triggers.
    pub timeout: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandRestriction {
    pub to_follower: bool,
    pub to_subscriber: bool,
    /// Minimum rant in whole currency units.
    pub to_rant: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleTriggerEvent {
    pub from_account: Option<RuleTriggerEventPage>,
    pub from_channel: Option<RuleTriggerEventPage>,
    pub from_live_stream: Option<RuleTriggerEventLiveStream>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleTriggerEventPage {
    pub name: String,
    pub on_follow: Option<EventMarker>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleTriggerEventLiveStream {
    pub on_raid: Option<EventMarker>,
    pub on_rant: Option<RantRange>,
    pub on_sub: Option<EventMarker>,
}

/// Present-or-absent marker for events that carry no settings, serialized as `{}`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMarker {}

/// Rant amount bounds in whole currency units. Zero leaves that side open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RantRange {
    pub min_amount: i64,
    pub max_amount: i64,
}

impl RantRange {
    pub fn contains(&self, amount: i64) -> bool {
        (self.min_amount == 0 || amount >= self.min_amount)
            && (self.max_amount == 0 || amount <= self.max_amount)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageKind {
    Account,
    Channel,
}

/// A monitored account or channel page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub name: String,
    pub kind: PageKind,
}

impl Page {
    pub fn prefix(&self) -> &'static str {
        match self.kind {
            PageKind::Account => PREFIX_ACCOUNT,
            PageKind::Channel => PREFIX_CHANNEL,
        }
    }

    /// Key used by the API producer and the follow receivers, e.g. `/user/somename`.
    pub fn key(&self) -> String {
        format!("{}{}", self.prefix(), self.name.replace(' ', ""))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTrigger {
    pub command: String,
    pub restrict: Option<CommandRestriction>,
    pub timeout: Duration,
}

/// What makes a rule fire. Exactly one per rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    Command(CommandTrigger),
    Timer(Duration),
    Follow(Page),
    Raid,
    Rant(RantRange),
    Sub,
}

impl Trigger {
    pub fn page(&self) -> Option<&Page> {
        match self {
            Trigger::Follow(page) => Some(page),
            _ => None,
        }
    }

    /// Whether the rule reacts to the livestream's chat.
    pub fn uses_chat(&self) -> bool {
        matches!(
            self,
            Trigger::Command(_) | Trigger::Raid | Trigger::Rant(_) | Trigger::Sub
        )
    }
}

/// A rule checked and resolved into the parts a runner needs.
#[derive(Debug)]
pub struct RuleSpec {
    pub rule_id: i64,
    pub chatbot_id: i64,
    pub username: String,
    pub channel_id: Option<i64>,
    pub message: MessageSource,
    pub trigger: Trigger,
}

impl Rule {
    pub fn validate(&self) -> ChatbotResult<RuleSpec> {
        let parameters = self
            .parameters
            .as_ref()
            .ok_or_else(|| ChatbotError::InvalidRule("parameters are missing".to_string()))?;
        let sender = parameters
            .send_as
            .as_ref()
            .ok_or_else(|| ChatbotError::InvalidRule("sender is missing".to_string()))?;
        if sender.username.is_empty() {
            return Err(ChatbotError::InvalidRule(
                "sender username is empty".to_string(),
            ));
        }
        let message = parameters
            .message
            .as_ref()
            .ok_or_else(|| ChatbotError::InvalidRule("message is missing".to_string()))?;
        let trigger = parameters
            .trigger
            .as_ref()
            .ok_or_else(|| ChatbotError::InvalidRule("trigger is missing".to_string()))?;

        Ok(RuleSpec {
            rule_id: self.id,
            chatbot_id: self.chatbot_id,
            username: sender.username.clone(),
            channel_id: sender.channel_id_int()?,
            message: MessageSource::from_rule(message),
            trigger: trigger.resolve()?,
        })
    }

    /// Page monitored by this rule's trigger, if it is a follow rule.
    pub fn page(&self) -> Option<Page> {
        let trigger = self.parameters.as_ref()?.trigger.as_ref()?;
        trigger.resolve().ok()?.page().cloned()
    }
}

impl RuleSender {
    /// Parses the channel identity to post as. A missing or blank id posts as the user.
    pub fn channel_id_int(&self) -> ChatbotResult<Option<i64>> {
        match self.channel_id.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(raw) => raw
                .parse::<i64>()
                .map(Some)
                .map_err(|_| ChatbotError::InvalidChannelId(raw.to_string())),
        }
    }
}

impl RuleTrigger {
    pub fn resolve(&self) -> ChatbotResult<Trigger> {
        let populated = [
            self.on_command.is_some(),
            self.on_event.is_some(),
            self.on_timer.is_some(),
        ]
        .iter()
        .filter(|set| **set)
        .count();
        if populated != 1 {
            return Err(ChatbotError::InvalidRule(format!(
                "trigger must have exactly one of on_command, on_event, on_timer ({} set)",
                populated
            )));
        }

        if let Some(command) = &self.on_command {
            return command.resolve();
        }
        if let Some(seconds) = self.on_timer {
            if seconds == 0 {
                return Err(ChatbotError::InvalidRule(
                    "timer interval must be at least one second".to_string(),
                ));
            }
            return Ok(Trigger::Timer(Duration::from_secs(seconds)));
        }
        match &self.on_event {
            Some(event) => event.resolve(),
            None => Err(ChatbotError::InvalidRule("trigger is empty".to_string())),
        }
    }
}

impl RuleTriggerCommand {
    fn resolve(&self) -> ChatbotResult<Trigger> {
        if self.command.is_empty() || !self.command.starts_with('!') {
            return Err(ChatbotError::InvalidCommand(self.command.clone()));
        }

        Ok(Trigger::Command(CommandTrigger {
            command: self.command.clone(),
            restrict: self.restrict,
            timeout: Duration::from_secs(self.timeout),
        }))
    }
}

impl RuleTriggerEvent {
    fn resolve(&self) -> ChatbotResult<Trigger> {
        match (&self.from_account, &self.from_channel, &self.from_live_stream) {
            (Some(account), None, None) => account.resolve(PageKind::Account),
            (None, Some(channel), None) => channel.resolve(PageKind::Channel),
            (None, None, Some(live)) => live.resolve(),
            _ => Err(ChatbotError::InvalidRule(
                "event must come from exactly one of account, channel, live stream".to_string(),
            )),
        }
    }
}

impl RuleTriggerEventPage {
    fn resolve(&self, kind: PageKind) -> ChatbotResult<Trigger> {
        if self.name.trim().is_empty() {
            return Err(ChatbotError::InvalidRule("page name is empty".to_string()));
        }
        if self.on_follow.is_none() {
            return Err(ChatbotError::InvalidRule(
                "page event has no on_follow".to_string(),
            ));
        }

        Ok(Trigger::Follow(Page {
            name: self.name.clone(),
            kind,
        }))
    }
}

impl RuleTriggerEventLiveStream {
    fn resolve(&self) -> ChatbotResult<Trigger> {
        match (&self.on_raid, &self.on_rant, &self.on_sub) {
            (Some(_), None, None) => Ok(Trigger::Raid),
            (None, Some(range), None) => Ok(Trigger::Rant(*range)),
            (None, None, Some(_)) => Ok(Trigger::Sub),
            _ => Err(ChatbotError::InvalidRule(
                "live stream event must be exactly one of on_raid, on_rant, on_sub".to_string(),
            )),
        }
    }
}

/// Sorts rules by display label, ignoring case.
pub fn sort_rules(rules: &mut [Rule]) {
    rules.sort_by_key(|rule| rule.display.to_lowercase());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule_from_json(json: &str) -> Rule {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_parse_command_rule() {
        let rule = rule_from_json(
            r#"{
                "id": 3,
                "chatbot_id": 1,
                "display": "Greeting",
                "parameters": {
                    "message": {"from_text": "Hi {{.Username}}"},
                    "send_as": {"username": "botuser", "display": "botuser", "channel_id": "42"},
                    "trigger": {
                        "on_command": {"command": "!hello", "timeout": 5, "restrict": {"to_follower": true, "to_rant": 2}}
                    }
                }
            }"#,
        );

        let spec = rule.validate().unwrap();
        assert_eq!(spec.rule_id, 3);
        assert_eq!(spec.chatbot_id, 1);
        assert_eq!(spec.username, "botuser");
        assert_eq!(spec.channel_id, Some(42));
        match spec.trigger {
            Trigger::Command(command) => {
                assert_eq!(command.command, "!hello");
                assert_eq!(command.timeout, Duration::from_secs(5));
                let restrict = command.restrict.unwrap();
                assert!(restrict.to_follower);
                assert!(!restrict.to_subscriber);
                assert_eq!(restrict.to_rant, 2);
            }
            other => panic!("unexpected trigger: {:?}", other),
        }
    }

    #[test]
    fn test_parse_follow_rule_page_key() {
        let rule = rule_from_json(
            r#"{
                "id": 4, "chatbot_id": 1, "display": "follow",
                "parameters": {
                    "message": {"from_text": "Thanks {{.Username}}"},
                    "send_as": {"username": "botuser"},
                    "trigger": {"on_event": {"from_channel": {"name": "My Channel", "on_follow": {}}}}
                }
            }"#,
        );

        let spec = rule.validate().unwrap();
        let page = spec.trigger.page().unwrap();
        assert_eq!(page.kind, PageKind::Channel);
        assert_eq!(page.key(), "/c/MyChannel");
        assert!(!spec.trigger.uses_chat());
        assert_eq!(rule.page().unwrap().key(), "/c/MyChannel");

        let account = Page {
            name: "some user".to_string(),
            kind: PageKind::Account,
        };
        assert_eq!(account.key(), "/user/someuser");
    }

    #[test]
    fn test_rejects_multiple_trigger_arms() {
        let rule = rule_from_json(
            r#"{
                "id": 5, "chatbot_id": 1,
                "parameters": {
                    "message": {"from_text": "x"},
                    "send_as": {"username": "botuser"},
                    "trigger": {"on_command": {"command": "!x"}, "on_timer": 60}
                }
            }"#,
        );
        assert!(matches!(rule.validate(), Err(ChatbotError::InvalidRule(_))));
    }

    #[test]
    fn test_rejects_missing_trigger_and_sender() {
        let mut rule = rule_from_json(
            r#"{
                "id": 6, "chatbot_id": 1,
                "parameters": {"message": {"from_text": "x"}, "send_as": {"username": "botuser"}}
            }"#,
        );
        assert!(matches!(rule.validate(), Err(ChatbotError::InvalidRule(_))));

        rule.parameters = Some(RuleParameters {
            message: Some(RuleMessage::default()),
            send_as: None,
            trigger: Some(RuleTrigger {
                on_timer: Some(10),
                ..Default::default()
            }),
        });
        assert!(matches!(rule.validate(), Err(ChatbotError::InvalidRule(_))));

        rule.parameters = None;
        assert!(matches!(rule.validate(), Err(ChatbotError::InvalidRule(_))));
    }

    #[test]
    fn test_rejects_bad_command_and_channel_id() {
        let trigger = RuleTrigger {
            on_command: Some(RuleTriggerCommand {
                command: "hello".to_string(),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(matches!(
            trigger.resolve(),
            Err(ChatbotError::InvalidCommand(_))
        ));

        let sender = RuleSender {
            channel_id: Some("abc".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            sender.channel_id_int(),
            Err(ChatbotError::InvalidChannelId(_))
        ));

        let blank = RuleSender {
            channel_id: Some(" ".to_string()),
            ..Default::default()
        };
        assert_eq!(blank.channel_id_int().unwrap(), None);
    }

    #[test]
    fn test_live_stream_event_needs_one_leaf() {
        let event = RuleTriggerEventLiveStream {
            on_raid: Some(EventMarker {}),
            on_sub: Some(EventMarker {}),
            ..Default::default()
        };
        assert!(event.resolve().is_err());

        let rant = RuleTriggerEventLiveStream {
            on_rant: Some(RantRange {
                min_amount: 5,
                max_amount: 0,
            }),
            ..Default::default()
        };
        assert_eq!(
            rant.resolve().unwrap(),
            Trigger::Rant(RantRange {
                min_amount: 5,
                max_amount: 0
            })
        );
    }

    #[test]
    fn test_rant_range_open_bounds() {
        let at_least_five = RantRange {
            min_amount: 5,
            max_amount: 0,
        };
        assert!(!at_least_five.contains(3));
        assert!(at_least_five.contains(5));
        assert!(at_least_five.contains(500));

        let up_to_ten = RantRange {
            min_amount: 0,
            max_amount: 10,
        };
        assert!(up_to_ten.contains(1));
        assert!(!up_to_ten.contains(11));
    }

    #[test]
    fn test_sort_rules_ignores_case() {
        let mut rules = vec![
            Rule {
                id: 1,
                display: "beta".to_string(),
                ..Default::default()
            },
            Rule {
                id: 2,
                display: "Alpha".to_string(),
                ..Default::default()
            },
            Rule {
                id: 3,
                display: "Charlie".to_string(),
                ..Default::default()
            },
        ];
        sort_rules(&mut rules);
        let ids: Vec<i64> = rules.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![2, 1, 3]);
    }
}
