use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use futures_util::stream::{self, BoxStream};
use serde::Deserialize;

use super::client::fetch_chat_info;
use super::error::{PlatformError, Result as PlatformResult};
use super::types::{CHAT_TYPE_RAIDING, CHAT_TYPE_SUBSCRIBER, ChatView};
use super::{ChatStreamSource, ChatViewStream};

#[derive(Deserialize, Debug, Default)]
#[serde(default)]
struct ChatEvent {
    #[serde(rename = "type")]
    kind: String,
    data: ChatEventData,
}

#[derive(Deserialize, Debug, Default)]
#[serde(default)]
struct ChatEventData {
    // Either objects or arrays depending on the event; only objects carry channel info.
    channels: Vec<serde_json::Value>,
    messages: Vec<ChatEventMessage>,
    users: Vec<ChatEventUser>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(default)]
struct ChatEventMessage {
    channel_id: Option<i64>,
    rant: Option<ChatEventRant>,
    text: String,
    time: String,
    user_id: String,
}

#[derive(Deserialize, Debug, Default)]
#[serde(default)]
struct ChatEventRant {
    price_cents: i64,
}

#[derive(Deserialize, Debug, Default)]
#[serde(default)]
struct ChatEventUser {
    badges: Vec<String>,
    color: String,
    id: String,
    #[serde(rename = "image.1")]
    image: String,
    is_follower: bool,
    username: String,
}

#[derive(Deserialize, Debug, Default)]
#[serde(default)]
struct ChatEventChannel {
    id: String,
    #[serde(rename = "image.1")]
    image: String,
    username: String,
}

/// Turns a server-sent event payload into the chat views it carries.
pub fn parse_event(payload: &str) -> PlatformResult<Vec<ChatView>> {
    let event: ChatEvent = serde_json::from_str(payload)
        .map_err(|e| PlatformError::Parse(format!("error un-marshaling event: {}", e)))?;

    let users: HashMap<&str, &ChatEventUser> = event
        .data
        .users
        .iter()
        .map(|user| (user.id.as_str(), user))
        .collect();

    let channels: HashMap<String, ChatEventChannel> = event
        .data
        .channels
        .iter()
        .filter(|value| value.is_object())
        .filter_map(|value| serde_json::from_value::<ChatEventChannel>(value.clone()).ok())
        .map(|channel| (channel.id.clone(), channel))
        .collect();

    let raid = event.kind == CHAT_TYPE_RAIDING;
    let sub = event.kind == CHAT_TYPE_SUBSCRIBER;

    let mut views = Vec::with_capacity(event.data.messages.len());
    for message in &event.data.messages {
        let user = users.get(message.user_id.as_str()).ok_or_else(|| {
            PlatformError::Parse(format!("user ID does not exist: {}", message.user_id))
        })?;

        let time = DateTime::parse_from_rfc3339(&message.time)
            .map_err(|e| PlatformError::Parse(format!("error parsing message time: {}", e)))?
            .with_timezone(&Utc);

        let mut view = ChatView {
            badges: user.badges.clone(),
            channel_name: String::new(),
            color: user.color.clone(),
            image_url: user.image.clone(),
            is_follower: user.is_follower,
            rant: message.rant.as_ref().map_or(0, |rant| rant.price_cents),
            text: message.text.clone(),
            time,
            kind: event.kind.clone(),
            username: user.username.clone(),
            raid,
            sub,
        };

        if let Some(channel_id) = message.channel_id {
            let channel = channels.get(&channel_id.to_string()).ok_or_else(|| {
                PlatformError::Parse(format!("channel ID does not exist: {}", channel_id))
            })?;
            view.image_url = channel.image.clone();
            view.channel_name = channel.username.clone();
        }

        views.push(view);
    }

    Ok(views)
}

/// Incremental `text/event-stream` decoder yielding the joined `data:` payload of each event.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer
            .extend(chunk.iter().copied().filter(|byte| *byte != b'\r'));

        let mut payloads = Vec::new();
        while let Some(end) = find_event_boundary(&self.buffer) {
            let block: Vec<u8> = self.buffer.drain(..end + 2).collect();
            let block = String::from_utf8_lossy(&block[..end]);

            let data: Vec<&str> = block
                .lines()
                .filter_map(|line| line.strip_prefix("data:"))
                .map(|line| line.strip_prefix(' ').unwrap_or(line))
                .collect();

            if !data.is_empty() {
                payloads.push(data.join("\n"));
            }
        }

        payloads
    }
}

fn find_event_boundary(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|pair| pair == b"\n\n")
}

struct StreamState {
    bytes: BoxStream<'static, Result<Vec<u8>, reqwest::Error>>,
    decoder: SseDecoder,
    pending: VecDeque<PlatformResult<ChatView>>,
    done: bool,
}

/// Subscribes to a livestream's chat through its server-sent event endpoint.
#[derive(Clone)]
pub struct SseChatStreamSource {
    http: reqwest::Client,
}

impl SseChatStreamSource {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl ChatStreamSource for SseChatStreamSource {
    async fn subscribe(&self, livestream_url: &str) -> PlatformResult<ChatViewStream> {
        let chat_info = fetch_chat_info(&self.http, livestream_url, None).await?;
        let stream_url = chat_info.stream_url();

        let response = self
            .http
            .get(&stream_url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PlatformError::Status {
                status: status.as_u16(),
                body,
            });
        }

        tracing::debug!(livestream.url = %livestream_url, stream.url = %stream_url, "Subscribed to chat stream");

        let state = StreamState {
            bytes: response
                .bytes_stream()
                .map(|chunk| chunk.map(|bytes| bytes.to_vec()))
                .boxed(),
            decoder: SseDecoder::new(),
            pending: VecDeque::new(),
            done: false,
        };

        let views = stream::unfold(state, |mut state| async move {
            loop {
                if let Some(item) = state.pending.pop_front() {
                    return Some((item, state));
                }
                if state.done {
                    return None;
                }

                match state.bytes.next().await {
                    Some(Ok(chunk)) => {
                        for payload in state.decoder.push(&chunk) {
                            match parse_event(&payload) {
                                Ok(views) => state.pending.extend(views.into_iter().map(Ok)),
                                Err(e) => state.pending.push_back(Err(e)),
                            }
                        }
                    }
                    Some(Err(e)) => {
                        state.done = true;
                        state
                            .pending
                            .push_back(Err(PlatformError::Stream(e.to_string())));
                    }
                    None => {
                        state.done = true;
                    }
                }
            }
        });

        Ok(views.boxed())
    }
}
