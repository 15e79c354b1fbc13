use regex::{Captures, Regex};

use super::error::{ChatbotError, Result as ChatbotResult};
use crate::platform::ChatView;

const FIELD_PATTERN: &str = r"\{\{\s*\.(\w+)\s*\}\}";

/// Values available to a message template as `{{.Field}}`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatFields {
    pub channel_name: String,
    pub display_name: String,
    pub username: String,
    /// Whole currency units.
    pub rant: i64,
}

impl ChatFields {
    pub fn from_view(view: &ChatView) -> Self {
        Self {
            channel_name: view.channel_name.clone(),
            display_name: view.display_name().to_string(),
            username: view.username.clone(),
            rant: view.rant / 100,
        }
    }

    pub fn from_follower(username: &str) -> Self {
        Self {
            display_name: username.to_string(),
            username: username.to_string(),
            ..Default::default()
        }
    }

    fn get(&self, field: &str) -> Option<String> {
        match field {
            "ChannelName" => Some(self.channel_name.clone()),
            "DisplayName" => Some(self.display_name.clone()),
            "Username" => Some(self.username.clone()),
            "Rant" => Some(self.rant.to_string()),
            _ => None,
        }
    }
}

/// Substitutes `{{.Field}}` placeholders. Compiled once per runner.
#[derive(Debug, Clone)]
pub struct Template {
    pattern: Regex,
}

impl Template {
    pub fn new() -> ChatbotResult<Self> {
        let pattern = Regex::new(FIELD_PATTERN)
            .map_err(|e| ChatbotError::Template(format!("invalid field pattern: {}", e)))?;
        Ok(Self { pattern })
    }

    pub fn render(&self, text: &str, fields: &ChatFields) -> ChatbotResult<String> {
        if let Some(unknown) = self
            .pattern
            .captures_iter(text)
            .map(|caps| caps[1].to_string())
            .find(|name| fields.get(name).is_none())
        {
            return Err(ChatbotError::Template(format!(
                "can't evaluate field {}",
                unknown
            )));
        }

        let rendered = self.pattern.replace_all(text, |caps: &Captures| {
            fields.get(&caps[1]).unwrap_or_default()
        });
        Ok(rendered.into_owned())
    }
}
