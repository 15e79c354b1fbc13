use std::path::PathBuf;
use std::time::Duration;

use config::{Config, Environment, File};
use serde::Deserialize;

use crate::chatbot::EngineSettings;
use crate::error::{ConfigError, Result as AppResult};

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct StorageConfig {
    pub data_path: PathBuf,
}

#[derive(Debug, Deserialize)]
pub struct ProducersConfig {
    pub api_interval_secs: u64,
    pub chat_resubscribe_mins: u64,
    pub queue_capacity: usize,
}

impl ProducersConfig {
    pub fn api_interval(&self) -> Duration {
        Duration::from_secs(self.api_interval_secs)
    }

    pub fn chat_resubscribe_after(&self) -> Duration {
        Duration::from_secs(self.chat_resubscribe_mins * 60)
    }
}

#[derive(Debug, Deserialize)]
pub struct EngineConfig {
    pub runner_queue_depth: usize,
    pub restart_grace_ms: u64,
    pub delivery_timeout_ms: u64,
    pub follow_timestamp_offset_hours: i64,
}

impl EngineConfig {
    pub fn settings(&self) -> EngineSettings {
        EngineSettings {
            runner_queue_depth: self.runner_queue_depth,
            restart_grace: Duration::from_millis(self.restart_grace_ms),
            delivery_timeout: Duration::from_millis(self.delivery_timeout_ms),
            follow_timestamp_offset: chrono::Duration::hours(self.follow_timestamp_offset_hours),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AppSettings {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub producers: ProducersConfig,
    pub engine: EngineConfig,
}

impl AppSettings {
    fn validate(self) -> AppResult<Self> {
        if self.producers.api_interval_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "producers.api_interval_secs must be positive".to_string(),
            )
            .into());
        }
        if self.producers.queue_capacity == 0 || self.engine.runner_queue_depth == 0 {
            return Err(ConfigError::InvalidValue(
                "queue capacities must be positive".to_string(),
            )
            .into());
        }
        Ok(self)
    }
}

pub fn load_settings() -> AppResult<AppSettings> {
    let builder = Config::builder()
        .add_source(
            Environment::with_prefix("STREAMBOT")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("server.cors_origins")
                .try_parsing(true),
        )
        .add_source(File::with_name("config").required(false));

    build_settings(builder)
}

fn build_settings(
    builder: config::ConfigBuilder<config::builder::DefaultState>,
) -> AppResult<AppSettings> {
    let settings = builder
        .set_default("server.port", 8080_i64)
        .and_then(|b| b.set_default("server.cors_origins", Vec::<String>::new()))
        .and_then(|b| b.set_default("storage.data_path", "streambot.json"))
        .and_then(|b| b.set_default("producers.api_interval_secs", 10_i64))
        .and_then(|b| b.set_default("producers.chat_resubscribe_mins", 90_i64))
        .and_then(|b| b.set_default("producers.queue_capacity", 10_i64))
        .and_then(|b| b.set_default("engine.runner_queue_depth", 10_i64))
        .and_then(|b| b.set_default("engine.restart_grace_ms", 1000_i64))
        .and_then(|b| b.set_default("engine.delivery_timeout_ms", 2000_i64))
        .and_then(|b| b.set_default("engine.follow_timestamp_offset_hours", -4_i64))
        .map_err(|e| ConfigError::Load(e.to_string()))?
        .build()
        .map_err(|e| ConfigError::Load(e.to_string()))?;

    settings
        .try_deserialize::<AppSettings>()
        .map_err(|e| ConfigError::Load(e.to_string()))?
        .validate()
}
