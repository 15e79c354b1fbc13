use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const CHAT_BADGE_RECURRING_SUBSCRIPTION: &str = "recurring_subscription";
pub const CHAT_BADGE_LOCALS_SUPPORTER: &str = "locals_supporter";

pub const CHAT_TYPE_INIT: &str = "init";
pub const CHAT_TYPE_MESSAGES: &str = "messages";
pub const CHAT_TYPE_SUBSCRIBER: &str = "locals_supporter";
pub const CHAT_TYPE_RAIDING: &str = "raid_confirmed";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Follower {
    pub username: String,
    pub followed_on: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Followers {
    pub num_followers: i64,
    pub num_followers_total: i64,
    pub latest_follower: Follower,
    pub recent_followers: Vec<Follower>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Subscriber {
    pub user: String,
    pub username: String,
    pub amount_cents: i64,
    pub amount_dollars: i64,
    pub subscribed_on: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Subscribers {
    pub num_subscribers: i64,
    pub latest_subscriber: Subscriber,
    pub recent_subscribers: Vec<Subscriber>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Livestream {
    pub id: String,
    pub title: String,
    pub created_on: String,
    pub is_live: bool,
    pub likes: i64,
    pub dislikes: i64,
    pub watching_now: i64,
}

/// Snapshot returned by a page's statistics endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LivestreamResponse {
    pub now: i64,
    #[serde(rename = "type")]
    pub kind: String,
    pub user_id: String,
    pub username: String,
    pub channel_id: i64,
    pub channel_name: String,
    pub max_num_results: i64,
    pub followers: Followers,
    pub subscribers: Subscribers,
    pub livestreams: Vec<Livestream>,
}

impl LivestreamResponse {
    pub fn is_live(&self) -> bool {
        !self.livestreams.is_empty()
    }
}

/// A single chat message as seen on the live chat stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatView {
    pub badges: Vec<String>,
    pub channel_name: String,
    pub color: String,
    pub image_url: String,
    pub is_follower: bool,
    /// Rant amount in hundredths of the currency unit, zero when the message is not a rant.
    pub rant: i64,
    pub text: String,
    pub time: DateTime<Utc>,
    pub kind: String,
    pub username: String,
    pub raid: bool,
    pub sub: bool,
}

impl ChatView {
    pub fn is_subscriber(&self) -> bool {
        self.badges.iter().any(|badge| {
            badge == CHAT_BADGE_LOCALS_SUPPORTER || badge == CHAT_BADGE_RECURRING_SUBSCRIPTION
        })
    }

    pub fn display_name(&self) -> &str {
        if self.channel_name.is_empty() {
            &self.username
        } else {
            &self.channel_name
        }
    }
}

/// Chat endpoints resolved from a livestream page.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatInfo {
    pub channel_id: i64,
    pub chat_id: String,
    pub url_prefix: String,
}

impl ChatInfo {
    pub fn message_url(&self) -> String {
        format!("{}/chat/{}/message", self.url_prefix, self.chat_id)
    }

    pub fn stream_url(&self) -> String {
        format!("{}/chat/{}/stream", self.url_prefix, self.chat_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionCookie {
    pub name: String,
    pub value: String,
}
