pub mod clients;
pub mod engine;
pub mod error;
pub mod message;
pub mod notify;
pub mod receiver;
pub mod rule;
pub mod runner;
pub mod template;

pub use engine::{Chatbot, EngineSettings};
pub use error::ChatbotError;
pub use notify::{BroadcastNotifier, RuleStatus};
pub use rule::Rule;
