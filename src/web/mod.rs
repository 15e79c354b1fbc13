use axum::{
    Router,
    routing::{any, delete, get, post},
};
use http::HeaderValue;
use std::net::SocketAddr;
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::ServerConfig;
use crate::error::Result as AppResult;
use crate::state::AppState;

pub mod error;
pub mod handlers;
pub mod ws;

pub use self::error::WebError;

fn cors_layer(origins: &[String]) -> CorsLayer {
    let cors_origins_result: Result<Vec<HeaderValue>, _> = origins
        .iter()
        .map(|origin| {
            origin
                .parse()
                .map_err(|e| format!("Invalid CORS origin '{origin}': {e}"))
        })
        .collect();

    let cors_origins = cors_origins_result.unwrap_or_else(|e| {
        tracing::error!(error = %e, "CORS config error. Defaulting to restrictive");
        vec![]
    });

    if cors_origins.is_empty() {
        tracing::info!("Restrictive CORS policy applied (no origins configured)");
        return CorsLayer::new();
    }

    tracing::info!(
        cors.origins.count = cors_origins.len(),
        "CORS configured with allowed origins"
    );
    CorsLayer::new()
        .allow_methods(vec![
            http::Method::GET,
            http::Method::POST,
            http::Method::DELETE,
        ])
        .allow_origin(cors_origins)
        .allow_headers(vec![http::header::CONTENT_TYPE, http::header::ACCEPT])
}

pub fn router(app_state: AppState, cors: CorsLayer) -> Router {
    Router::new()
        .route(
            "/api/chatbots/{id}/rules",
            get(handlers::list_rules_handler),
        )
        .route(
            "/api/chatbots/{id}",
            delete(handlers::remove_chatbot_handler),
        )
        .route("/api/chatbots/{id}/run", post(handlers::run_chatbot_handler))
        .route(
            "/api/chatbots/{id}/stop",
            post(handlers::stop_chatbot_handler),
        )
        .route("/api/rules/{id}/run", post(handlers::run_rule_handler))
        .route("/api/rules/{id}/stop", post(handlers::stop_rule_handler))
        .route("/api/pages", get(handlers::list_pages_handler))
        .route("/ws", any(ws::ws_handler))
        .with_state(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

#[tracing::instrument(skip(app_state, server_config, shutdown), fields(
    server.port = server_config.port,
    cors.origins.count = server_config.cors_origins.len()
))]
pub async fn run_server(
    app_state: AppState,
    server_config: ServerConfig,
    shutdown: CancellationToken,
) -> AppResult<()> {
    let app = router(app_state, cors_layer(&server_config.cors_origins));

    let addr = SocketAddr::from(([0, 0, 0, 0], server_config.port));
    tracing::info!(server.address = %addr, "HTTP server starting");

    axum::serve(tokio::net::TcpListener::bind(addr).await?, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(Into::into)
}
