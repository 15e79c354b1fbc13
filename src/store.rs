use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::chatbot::rule::{Page, PageKind, Rule, sort_rules};
use crate::platform::{SessionCookie, SessionStore};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid store file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Chatbot {0} not found")]
    ChatbotNotFound(i64),
    #[error("Rule {0} not found")]
    RuleNotFound(i64),
    #[error("No API URL stored for page {0}")]
    PageNotFound(String),
}

pub type Result<T, E = StoreError> = std::result::Result<T, E>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatbotRecord {
    pub id: i64,
    pub name: String,
    /// Livestream the chatbot's rules post into.
    pub url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountRecord {
    pub username: String,
    pub cookies: Vec<SessionCookie>,
    pub api_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelRecord {
    pub name: String,
    pub api_url: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreData {
    pub chatbots: Vec<ChatbotRecord>,
    pub rules: Vec<Rule>,
    pub accounts: Vec<AccountRecord>,
    pub channels: Vec<ChannelRecord>,
}

/// Chatbots, rules and account sessions read from a JSON file.
pub struct JsonStore {
    path: PathBuf,
    data: RwLock<StoreData>,
}

impl JsonStore {
    pub fn from_data(path: impl Into<PathBuf>, data: StoreData) -> Self {
        Self {
            path: path.into(),
            data: RwLock::new(data),
        }
    }

    /// Loads the store. A missing file yields an empty store.
    pub async fn load(path: &Path) -> Result<Self> {
        let data = match tokio::fs::read_to_string(path).await {
            Ok(contents) => serde_json::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), "Store file not found, starting empty");
                StoreData::default()
            }
            Err(source) => {
                return Err(StoreError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        Ok(Self::from_data(path, data))
    }

    /// Re-reads the file, replacing what is in memory.
    pub async fn reload(&self) -> Result<()> {
        let fresh = Self::load(&self.path).await?;
        *self.data.write() = fresh.data.into_inner();
        Ok(())
    }

    pub fn chatbots(&self) -> Vec<ChatbotRecord> {
        self.data.read().chatbots.clone()
    }

    pub fn chatbot(&self, id: i64) -> Result<ChatbotRecord> {
        self.data
            .read()
            .chatbots
            .iter()
            .find(|chatbot| chatbot.id == id)
            .cloned()
            .ok_or(StoreError::ChatbotNotFound(id))
    }

    pub fn rule(&self, id: i64) -> Result<Rule> {
        self.data
            .read()
            .rules
            .iter()
            .find(|rule| rule.id == id)
            .cloned()
            .ok_or(StoreError::RuleNotFound(id))
    }

    /// Rules of a chatbot, sorted by display label.
    pub fn rules_for(&self, chatbot_id: i64) -> Vec<Rule> {
        let mut rules: Vec<Rule> = self
            .data
            .read()
            .rules
            .iter()
            .filter(|rule| rule.chatbot_id == chatbot_id)
            .cloned()
            .collect();
        sort_rules(&mut rules);
        rules
    }

    /// Statistics API URL of an account or channel page.
    pub fn page_api_url(&self, page: &Page) -> Result<String> {
        let data = self.data.read();
        let url = match page.kind {
            PageKind::Account => data
                .accounts
                .iter()
                .find(|account| account.username == page.name)
                .and_then(|account| account.api_url.clone()),
            PageKind::Channel => data
                .channels
                .iter()
                .find(|channel| channel.name == page.name)
                .map(|channel| channel.api_url.clone()),
        };

        url.filter(|url| !url.is_empty())
            .ok_or_else(|| StoreError::PageNotFound(page.key()))
    }
}

impl SessionStore for JsonStore {
    fn cookies(&self, username: &str) -> Option<Vec<SessionCookie>> {
        self.data
            .read()
            .accounts
            .iter()
            .find(|account| account.username == username)
            .map(|account| account.cookies.clone())
            .filter(|cookies| !cookies.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STORE: &str = r#"{
        "chatbots": [{"id": 1, "name": "main", "url": "https://rumble.test/live-1"}],
        "rules": [
            {"id": 11, "chatbot_id": 1, "display": "zeta", "parameters": null},
            {"id": 12, "chatbot_id": 1, "display": "Alpha", "parameters": null},
            {"id": 13, "chatbot_id": 2, "display": "other", "parameters": null}
        ],
        "accounts": [
            {"username": "botuser", "cookies": [{"name": "u_s", "value": "abc"}], "api_url": "https://stats/user"},
            {"username": "loggedout", "cookies": []}
        ],
        "channels": [{"name": "My Channel", "api_url": "https://stats/channel"}]
    }"#;

    fn store() -> JsonStore {
        JsonStore::from_data("unused.json", serde_json::from_str(STORE).unwrap())
    }

    #[test]
    fn test_lookups() {
        let store = store();
        assert_eq!(store.chatbot(1).unwrap().url, "https://rumble.test/live-1");
        assert!(matches!(store.chatbot(9), Err(StoreError::ChatbotNotFound(9))));
        assert_eq!(store.rule(13).unwrap().chatbot_id, 2);
        assert!(matches!(store.rule(99), Err(StoreError::RuleNotFound(99))));

        let ids: Vec<i64> = store.rules_for(1).iter().map(|rule| rule.id).collect();
        assert_eq!(ids, vec![12, 11]);
    }

    #[test]
    fn test_sessions() {
        let store = store();
        let cookies = store.cookies("botuser").unwrap();
        assert_eq!(cookies[0].name, "u_s");
        assert!(store.cookies("loggedout").is_none());
        assert!(store.cookies("stranger").is_none());
    }

    #[test]
    fn test_page_api_urls() {
        let store = store();
        let account = Page {
            name: "botuser".to_string(),
            kind: PageKind::Account,
        };
        let channel = Page {
            name: "My Channel".to_string(),
            kind: PageKind::Channel,
        };
        let missing = Page {
            name: "loggedout".to_string(),
            kind: PageKind::Account,
        };

        assert_eq!(store.page_api_url(&account).unwrap(), "https://stats/user");
        assert_eq!(store.page_api_url(&channel).unwrap(), "https://stats/channel");
        assert!(matches!(
            store.page_api_url(&missing),
            Err(StoreError::PageNotFound(ref key)) if key == "/user/loggedout"
        ));
    }

    #[tokio::test]
    async fn test_load_missing_file_is_empty() {
        let path = std::env::temp_dir().join(format!("streambot-{}.json", uuid::Uuid::new_v4()));
        let store = JsonStore::load(&path).await.unwrap();
        assert!(store.chatbots().is_empty());
    }

    #[tokio::test]
    async fn test_load_and_reload_file() {
        let path = std::env::temp_dir().join(format!("streambot-{}.json", uuid::Uuid::new_v4()));
        std::fs::write(&path, r#"{"chatbots": [{"id": 1, "name": "a", "url": "u"}]}"#).unwrap();
        let store = JsonStore::load(&path).await.unwrap();
        assert_eq!(store.chatbots().len(), 1);

        std::fs::write(&path, STORE).unwrap();
        store.reload().await.unwrap();
        assert_eq!(store.rules_for(1).len(), 2);

        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(store.reload().await, Err(StoreError::Parse(_))));
        std::fs::remove_file(path).unwrap();
    }
}
