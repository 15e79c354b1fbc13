use std::sync::Arc;

use async_trait::async_trait;
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::{Deserialize, Serialize};

use super::error::{PlatformError, Result as PlatformResult};
use super::types::{ChatInfo, SessionCookie};
use super::{ChatClientFactory, ChatSender, SessionStore};

const CHAT_FUNCTION_MARKER: &str = "RumbleChat(";
const REQUEST_ID_LENGTH: usize = 32;

#[derive(Serialize, Debug)]
struct ChatRequest<'a> {
    data: ChatData<'a>,
}

#[derive(Serialize, Debug)]
struct ChatData<'a> {
    request_id: String,
    message: ChatMessage<'a>,
    rant: Option<String>,
    channel_id: Option<i64>,
}

#[derive(Serialize, Debug)]
struct ChatMessage<'a> {
    text: &'a str,
}

#[derive(Deserialize, Debug, Default)]
struct ChatResponse {
    #[serde(default)]
    errors: Vec<ChatResponseError>,
}

#[derive(Deserialize, Debug)]
struct ChatResponseError {
    #[serde(default)]
    message: String,
}

/// Chat client for one account in one livestream.
pub struct HttpChatClient {
    http: reqwest::Client,
    cookie_header: String,
    chat_info: ChatInfo,
}

impl HttpChatClient {
    pub async fn connect(
        http: reqwest::Client,
        cookies: &[SessionCookie],
        livestream_url: &str,
    ) -> PlatformResult<Self> {
        let cookie_header = cookie_header(cookies);
        let chat_info = fetch_chat_info(&http, livestream_url, Some(&cookie_header)).await?;

        tracing::debug!(
            livestream.url = %livestream_url,
            chat.id = %chat_info.chat_id,
            "Resolved chat info for chat client"
        );

        Ok(Self {
            http,
            cookie_header,
            chat_info,
        })
    }
}

#[async_trait]
impl ChatSender for HttpChatClient {
    async fn send(&self, text: &str, channel_id: Option<i64>) -> PlatformResult<()> {
        let body = ChatRequest {
            data: ChatData {
                request_id: random_request_id(),
                message: ChatMessage { text },
                rant: None,
                channel_id,
            },
        };

        let response = self
            .http
            .post(self.chat_info.message_url())
            .header(reqwest::header::COOKIE, &self.cookie_header)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let response_body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(PlatformError::Status {
                status: status.as_u16(),
                body: response_body,
            });
        }

        check_send_response(&response_body)
    }
}

/// Reads server-reported errors from a successful send. An unreadable body counts as success.
fn check_send_response(body: &str) -> PlatformResult<()> {
    let parsed: ChatResponse = match serde_json::from_str(body) {
        Ok(parsed) => parsed,
        Err(e) => {
            tracing::debug!(error = %e, body = %body, "Unparseable chat send response, assuming success");
            ChatResponse::default()
        }
    };

    match parsed.errors.first() {
        Some(first) => Err(PlatformError::Server(first.message.clone())),
        None => Ok(()),
    }
}

/// Builds authenticated chat clients from saved sessions.
pub struct HttpChatClientFactory {
    http: reqwest::Client,
    sessions: Arc<dyn SessionStore>,
}

impl HttpChatClientFactory {
    pub fn new(http: reqwest::Client, sessions: Arc<dyn SessionStore>) -> Self {
        Self { http, sessions }
    }
}

#[async_trait]
impl ChatClientFactory for HttpChatClientFactory {
    async fn connect(
        &self,
        username: &str,
        livestream_url: &str,
    ) -> PlatformResult<Arc<dyn ChatSender>> {
        let cookies = self
            .sessions
            .cookies(username)
            .ok_or_else(|| PlatformError::MissingSession(username.to_string()))?;

        let client = HttpChatClient::connect(self.http.clone(), &cookies, livestream_url).await?;
        Ok(Arc::new(client))
    }
}

pub async fn fetch_chat_info(
    http: &reqwest::Client,
    livestream_url: &str,
    cookie_header: Option<&str>,
) -> PlatformResult<ChatInfo> {
    if livestream_url.is_empty() {
        return Err(PlatformError::ChatInfo("stream url is empty".to_string()));
    }

    let mut request = http.get(livestream_url);
    if let Some(cookies) = cookie_header {
        request = request.header(reqwest::header::COOKIE, cookies);
    }

    let response = request.send().await?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(PlatformError::Status {
            status: status.as_u16(),
            body,
        });
    }

    let page = response.text().await?;
    extract_chat_info(&page)
}

/// Finds the `RumbleChat(...)` call in a livestream page and reads the chat endpoints from it.
pub fn extract_chat_info(page: &str) -> PlatformResult<ChatInfo> {
    for line in page.lines() {
        let Some(start) = line.find(CHAT_FUNCTION_MARKER) else {
            continue;
        };
        let start = start + CHAT_FUNCTION_MARKER.len();
        let end = line[start..].find(");").ok_or_else(|| {
            PlatformError::ChatInfo("error finding end of chat function in webpage".to_string())
        })?;

        let args = parse_rumble_chat_args(&line[start..start + end]);
        if args.len() < 6 {
            return Err(PlatformError::ChatInfo(format!(
                "chat function has {} arguments, expected at least 6",
                args.len()
            )));
        }

        let channel_id = args[5].parse::<i64>().map_err(|e| {
            PlatformError::ChatInfo(format!(
                "error converting channel ID argument '{}' to int: {}",
                args[5], e
            ))
        })?;

        return Ok(ChatInfo {
            channel_id,
            chat_id: args[1].clone(),
            url_prefix: args[0].clone(),
        });
    }

    Err(PlatformError::ChatInfo(
        "did not find RumbleChat function call".to_string(),
    ))
}

/// Splits call arguments on top-level commas; commas inside `[...]` belong to the argument.
fn parse_rumble_chat_args(args: &str) -> Vec<String> {
    let mut depth = 0i32;
    let mut parsed = Vec::new();
    let mut current = String::new();

    for c in args.chars() {
        if c == ',' && depth == 0 {
            parsed.push(trim_arg(&current));
            current.clear();
            continue;
        }
        match c {
            '[' => depth += 1,
            ']' => depth -= 1,
            _ => {}
        }
        current.push(c);
    }
    if !current.is_empty() {
        parsed.push(trim_arg(&current));
    }

    parsed
}

fn trim_arg(arg: &str) -> String {
    arg.trim().trim_matches('"').to_string()
}

fn cookie_header(cookies: &[SessionCookie]) -> String {
    cookies
        .iter()
        .map(|cookie| format!("{}={}", cookie.name, cookie.value))
        .collect::<Vec<_>>()
        .join("; ")
}

fn random_request_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(REQUEST_ID_LENGTH)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rumble_chat_args_keeps_bracketed_commas() {
        let args = parse_rumble_chat_args(
            r#""https://web7.rumble.com", "abc123", ["a", "b"], 0, true, 4242"#,
        );
        assert_eq!(
            args,
            vec![
                "https://web7.rumble.com",
                "abc123",
                r#"["a", "b"]"#,
                "0",
                "true",
                "4242"
            ]
        );
    }

    #[test]
    fn test_extract_chat_info_from_page() {
        let page = r#"<html>
<script>window.something = 1;</script>
<script>RumbleChat("https://web7.rumble.com", "abc123", ["x", "y"], 0, true, 4242, {});</script>
</html>"#;

        let info = extract_chat_info(page).unwrap();
        assert_eq!(info.url_prefix, "https://web7.rumble.com");
        assert_eq!(info.chat_id, "abc123");
        assert_eq!(info.channel_id, 4242);
    }

    #[test]
    fn test_extract_chat_info_missing_call() {
        let result = extract_chat_info("<html><body>offline</body></html>");
        assert!(matches!(result, Err(PlatformError::ChatInfo(_))));
    }

    #[test]
    fn test_extract_chat_info_bad_channel_id() {
        let page = r#"RumbleChat("https://x", "abc", [], 0, true, notanumber);"#;
        assert!(matches!(
            extract_chat_info(page),
            Err(PlatformError::ChatInfo(_))
        ));
    }

    #[test]
    fn test_send_response_errors() {
        assert!(check_send_response(r#"{"data": {}}"#).is_ok());
        assert!(check_send_response("<html>ok</html>").is_ok());
        assert!(matches!(
            check_send_response(r#"{"errors": [{"code": 99, "message": "slow down"}]}"#),
            Err(PlatformError::Server(ref message)) if message == "slow down"
        ));
    }

    #[test]
    fn test_cookie_header_joins_pairs() {
        let cookies = vec![
            SessionCookie {
                name: "u_s".to_string(),
                value: "token".to_string(),
            },
            SessionCookie {
                name: "a_s".to_string(),
                value: "other".to_string(),
            },
        ];
        assert_eq!(cookie_header(&cookies), "u_s=token; a_s=other");
    }

    #[test]
    fn test_random_request_id_is_alphanumeric() {
        let id = random_request_id();
        assert_eq!(id.len(), REQUEST_ID_LENGTH);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
    }
}
