use crate::chatbot::BroadcastNotifier;
use crate::dispatcher::PageTracker;
use crate::service::ChatbotService;

#[derive(Clone)]
pub struct AppState {
    pub service: ChatbotService,
    pub pages: PageTracker,
    pub notifier: BroadcastNotifier,
}
