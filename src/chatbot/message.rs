use std::path::PathBuf;

use rand::Rng;

use super::error::{ChatbotError, Result as ChatbotResult};
use super::rule::RuleMessage;

/// Where a rule's message text comes from.
#[derive(Debug, Clone)]
pub enum MessageSource {
    Text(String),
    File(FileMessage),
}

/// Lines of a text file, loaded on first use.
#[derive(Debug, Clone)]
pub struct FileMessage {
    path: PathBuf,
    random: bool,
    lines: Vec<String>,
    next: usize,
}

impl MessageSource {
    pub fn from_rule(message: &RuleMessage) -> Self {
        match &message.from_file {
            Some(file) => MessageSource::File(FileMessage {
                path: PathBuf::from(&file.filepath),
                random: file.random_read,
                lines: Vec::new(),
                next: 0,
            }),
            None => MessageSource::Text(message.from_text.clone()),
        }
    }

    pub async fn next_message(&mut self) -> ChatbotResult<String> {
        match self {
            MessageSource::Text(text) => Ok(text.clone()),
            MessageSource::File(file) => file.next_line().await,
        }
    }
}

impl FileMessage {
    async fn load(&mut self) -> ChatbotResult<()> {
        if self.path.as_os_str().is_empty() {
            return Err(ChatbotError::Message("filepath is empty".to_string()));
        }

        let contents = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            ChatbotError::Message(format!(
                "error opening file {}: {}",
                self.path.display(),
                e
            ))
        })?;

        self.lines = contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();
        self.next = 0;

        if self.lines.is_empty() {
            return Err(ChatbotError::Message(format!(
                "no lines read from {}",
                self.path.display()
            )));
        }

        Ok(())
    }

    async fn next_line(&mut self) -> ChatbotResult<String> {
        if self.lines.is_empty() {
            self.load().await?;
        }

        if self.random {
            let index = rand::thread_rng().gen_range(0..self.lines.len());
            return Ok(self.lines[index].clone());
        }

        let line = self.lines[self.next].clone();
        self.next = (self.next + 1) % self.lines.len();
        Ok(line)
    }
}
