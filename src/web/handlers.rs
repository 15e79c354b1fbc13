use axum::{
    extract::{Path, State},
    response::Json,
};
use serde::Serialize;

use super::error::Result as WebResult;
use crate::dispatcher::PageState;
use crate::service::RuleView;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct RuleControlResponse {
    pub rule_id: i64,
    pub running: bool,
}

#[derive(Debug, Serialize)]
pub struct RuleFailure {
    pub rule_id: i64,
    pub error: String,
}

#[derive(Debug, Serialize)]
pub struct ChatbotControlResponse {
    pub chatbot_id: i64,
    pub running: Vec<i64>,
    pub failures: Vec<RuleFailure>,
}

pub async fn list_rules_handler(
    State(app_state): State<AppState>,
    Path(chatbot_id): Path<i64>,
) -> WebResult<Json<Vec<RuleView>>> {
    let rules = app_state.service.rules_with_status(chatbot_id)?;
    Ok(Json(rules))
}

pub async fn run_rule_handler(
    State(app_state): State<AppState>,
    Path(rule_id): Path<i64>,
) -> WebResult<Json<RuleControlResponse>> {
    tracing::info!(rule.id = rule_id, "HTTP: Received run rule request");
    app_state.service.run_rule(rule_id).await.map_err(|e| {
        tracing::error!(rule.id = rule_id, error = %e, "Failed to run rule");
        e
    })?;

    Ok(Json(RuleControlResponse {
        rule_id,
        running: true,
    }))
}

pub async fn stop_rule_handler(
    State(app_state): State<AppState>,
    Path(rule_id): Path<i64>,
) -> WebResult<Json<RuleControlResponse>> {
    tracing::info!(rule.id = rule_id, "HTTP: Received stop rule request");
    app_state.service.stop_rule(rule_id)?;

    Ok(Json(RuleControlResponse {
        rule_id,
        running: false,
    }))
}

pub async fn run_chatbot_handler(
    State(app_state): State<AppState>,
    Path(chatbot_id): Path<i64>,
) -> WebResult<Json<ChatbotControlResponse>> {
    tracing::info!(chatbot.id = chatbot_id, "HTTP: Received run chatbot request");
    let failures = app_state
        .service
        .run_chatbot(chatbot_id)
        .await?
        .into_iter()
        .map(|(rule_id, e)| RuleFailure {
            rule_id,
            error: e.to_string(),
        })
        .collect();

    Ok(Json(ChatbotControlResponse {
        chatbot_id,
        running: app_state.service.engine().running_rules(chatbot_id),
        failures,
    }))
}

pub async fn stop_chatbot_handler(
    State(app_state): State<AppState>,
    Path(chatbot_id): Path<i64>,
) -> WebResult<Json<ChatbotControlResponse>> {
    tracing::info!(chatbot.id = chatbot_id, "HTTP: Received stop chatbot request");
    app_state.service.stop_chatbot(chatbot_id)?;

    Ok(Json(ChatbotControlResponse {
        chatbot_id,
        running: app_state.service.engine().running_rules(chatbot_id),
        failures: Vec::new(),
    }))
}

pub async fn remove_chatbot_handler(
    State(app_state): State<AppState>,
    Path(chatbot_id): Path<i64>,
) -> WebResult<Json<ChatbotControlResponse>> {
    tracing::info!(chatbot.id = chatbot_id, "HTTP: Received remove chatbot request");
    app_state.service.remove_chatbot(chatbot_id)?;

    Ok(Json(ChatbotControlResponse {
        chatbot_id,
        running: Vec::new(),
        failures: Vec::new(),
    }))
}

pub async fn list_pages_handler(State(app_state): State<AppState>) -> Json<Vec<PageState>> {
    let engine = app_state.service.engine();
    let pages = app_state
        .pages
        .snapshot()
        .into_iter()
        .map(|mut page| {
            page.dropped_events = engine.dropped_events(&page.name);
            page
        })
        .collect();
    Json(pages)
}
