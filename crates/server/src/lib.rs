//! Public-address relay.
//!
//! Accepts WebSocket sessions, keeps a registry of who is connected and fans
//! every operator broadcast out to all other sessions.

pub mod config;
pub mod registry;
pub mod relay;
pub mod state;
pub mod ws;

use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::{HeaderValue, Method, StatusCode},
    routing::get,
    Json, Router,
};
use pa_shared::WS_PATH;
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use config::CorsOrigin;
use state::AppState;

#[derive(Debug, Serialize)]
struct Health {
    status: &'static str,
    clients: usize,
}

async fn health(State(state): State<AppState>) -> Result<Json<Health>, StatusCode> {
    let clients = state
        .relay
        .clients_count()
        .await
        .ok_or(StatusCode::SERVICE_UNAVAILABLE)?;
    Ok(Json(Health {
        status: "ok",
        clients,
    }))
}

/// Build the CORS layer for the configured origin.
pub fn cors_layer(origin: &CorsOrigin) -> Result<CorsLayer> {
    let layer = CorsLayer::new().allow_methods([Method::GET, Method::POST]);
    Ok(match origin {
        CorsOrigin::Any => layer.allow_origin(Any),
        CorsOrigin::Exact(origin) => layer.allow_origin(
            origin
                .parse::<HeaderValue>()
                .with_context(|| format!("invalid CORS origin: {}", origin))?,
        ),
    })
}

/// Build the relay router.
pub fn router(state: AppState, cors: CorsLayer) -> Router {
    Router::new()
        .route(WS_PATH, get(ws::ws_handler))
        .route("/health", get(health))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
