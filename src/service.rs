use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::chatbot::{Chatbot, ChatbotError, Rule};
use crate::events::{EventsError, Producers};
use crate::store::{JsonStore, StoreError};

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Chatbot(#[from] ChatbotError),
    #[error(transparent)]
    Events(#[from] EventsError),
}

pub type Result<T, E = ServiceError> = std::result::Result<T, E>;

/// A stored rule together with whether it currently runs.
#[derive(Debug, Clone, Serialize)]
pub struct RuleView {
    #[serde(flatten)]
    pub rule: Rule,
    pub running: bool,
}

/// Runs stored rules end to end: producers first, then the engine.
#[derive(Clone)]
pub struct ChatbotService {
    engine: Chatbot,
    producers: Producers,
    store: Arc<JsonStore>,
    api_interval: Duration,
}

impl ChatbotService {
    pub fn new(
        engine: Chatbot,
        producers: Producers,
        store: Arc<JsonStore>,
        api_interval: Duration,
    ) -> Self {
        Self {
            engine,
            producers,
            store,
            api_interval,
        }
    }

    pub fn engine(&self) -> &Chatbot {
        &self.engine
    }

    pub fn store(&self) -> &JsonStore {
        &self.store
    }

    #[tracing::instrument(skip(self), fields(rule.id = rule_id))]
    pub async fn run_rule(&self, rule_id: i64) -> Result<()> {
        let rule = self.store.rule(rule_id)?;
        self.start_rule(&rule).await
    }

    async fn start_rule(&self, rule: &Rule) -> Result<()> {
        let chatbot = self.store.chatbot(rule.chatbot_id)?;
        let trigger = rule.validate()?.trigger;

        if trigger.uses_chat() {
            self.producers.chat.start(&chatbot.url)?;
        }
        if let Some(page) = trigger.page() {
            let api_url = self.store.page_api_url(page)?;
            self.producers
                .api
                .start(&page.key(), &api_url, self.api_interval)?;
        }

        self.engine.run(rule, &chatbot.url).await?;
        Ok(())
    }

    pub fn stop_rule(&self, rule_id: i64) -> Result<()> {
        let rule = self.store.rule(rule_id)?;
        self.engine.stop(&rule)?;
        Ok(())
    }

    /// Runs every rule of a chatbot, continuing past failures.
    pub async fn run_chatbot(&self, chatbot_id: i64) -> Result<Vec<(i64, ServiceError)>> {
        self.store.chatbot(chatbot_id)?;

        let mut failures = Vec::new();
        for rule in self.store.rules_for(chatbot_id) {
            if let Err(e) = self.start_rule(&rule).await {
                tracing::error!(rule.id = rule.id, chatbot.id = chatbot_id, error = %e, "Error running rule");
                failures.push((rule.id, e));
            }
        }
        Ok(failures)
    }

    pub fn stop_chatbot(&self, chatbot_id: i64) -> Result<usize> {
        self.store.chatbot(chatbot_id)?;
        Ok(self.engine.stop_all(chatbot_id))
    }

    /// Stops every runner of a chatbot and drops its engine state, e.g. once it was deleted.
    pub fn remove_chatbot(&self, chatbot_id: i64) -> Result<()> {
        self.engine.remove_bot(chatbot_id)?;
        tracing::info!(chatbot.id = chatbot_id, "Removed chatbot from engine");
        Ok(())
    }

    pub fn rules_with_status(&self, chatbot_id: i64) -> Result<Vec<RuleView>> {
        self.store.chatbot(chatbot_id)?;

        let running = self.engine.running_rules(chatbot_id);
        Ok(self
            .store
            .rules_for(chatbot_id)
            .into_iter()
            .map(|rule| RuleView {
                running: running.binary_search(&rule.id).is_ok(),
                rule,
            })
            .collect())
    }
}
