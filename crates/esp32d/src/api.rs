use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::Json;
use axum::Router;
use axum::extract::Path;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::get;
use axum::routing::post;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tower_http::trace::TraceLayer;

use crate::entities::Command;
use crate::registry::Registry;
use crate::services;
use crate::services::ServiceError;
use crate::services::UpdateFirmwareRequest;

/// Response for the /v1/ping endpoint
#[derive(Serialize)]
struct PingResponse {
    status: String,
}

/// Response for the /v1/info endpoint
#[derive(Serialize)]
struct InfoResponse {
    version: String,
    hostname: String,
    instances: usize,
}

#[derive(Serialize)]
struct CommandResponse {
    success: bool,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

fn error_response(status: StatusCode, error: impl ToString) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
        }),
    )
        .into_response()
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub version: &'static str,
    pub registry: Arc<RwLock<Registry>>,
}

/// Handler for GET /v1/ping
#[tracing::instrument]
async fn ping() -> impl IntoResponse {
    tracing::debug!("Handling /v1/ping request");
    (
        StatusCode::OK,
        Json(PingResponse {
            status: "ok".to_string(),
        }),
    )
}

/// Handler for GET /v1/info
#[tracing::instrument(skip(state))]
async fn info(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    tracing::debug!("Handling /v1/info request");

    let hostname = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());

    (
        StatusCode::OK,
        Json(InfoResponse {
            version: state.version.to_string(),
            hostname,
            instances: state.registry.read().await.len(),
        }),
    )
}

/// Handler for GET /v1/entities
#[tracing::instrument(skip(state))]
async fn list_entities(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let entities: Vec<_> = state
        .registry
        .read()
        .await
        .entities()
        .map(|handle| handle.state_json())
        .collect();
    Json(entities)
}

/// Handler for GET /v1/entities/:unique_id
#[tracing::instrument(skip(state))]
async fn get_entity(
    State(state): State<Arc<AppState>>,
    Path(unique_id): Path<String>,
) -> Response {
    let Some(handle) = state.registry.read().await.find_entity(&unique_id) else {
        return error_response(StatusCode::NOT_FOUND, format!("Unknown entity {}", unique_id));
    };
    Json(handle.state_json()).into_response()
}

/// Handler for POST /v1/entities/:unique_id/command
#[tracing::instrument(skip(state))]
async fn entity_command(
    State(state): State<Arc<AppState>>,
    Path(unique_id): Path<String>,
    Json(command): Json<Command>,
) -> Response {
    let Some(handle) = state.registry.read().await.find_entity(&unique_id) else {
        return error_response(StatusCode::NOT_FOUND, format!("Unknown entity {}", unique_id));
    };
    let success = handle.apply(command).await;
    Json(CommandResponse { success }).into_response()
}

/// Handler for POST /v1/services/update_firmware
#[tracing::instrument(skip(state))]
async fn update_firmware(
    State(state): State<Arc<AppState>>,
    Json(request): Json<UpdateFirmwareRequest>,
) -> Response {
    match services::update_firmware(&state.registry, request).await {
        Ok(()) => Json(CommandResponse { success: true }).into_response(),
        Err(e @ ServiceError::NotRegistered(_)) => error_response(StatusCode::NOT_FOUND, e),
        Err(e) if e.is_validation() => error_response(StatusCode::BAD_REQUEST, e),
        Err(e) => error_response(StatusCode::BAD_GATEWAY, e),
    }
}

/// Create the API router with all endpoints
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/ping", get(ping))
        .route("/v1/info", get(info))
        .route("/v1/entities", get(list_entities))
        .route("/v1/entities/:unique_id", get(get_entity))
        .route("/v1/entities/:unique_id/command", post(entity_command))
        .route("/v1/services/update_firmware", post(update_firmware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP API server
///
/// Binds to `listen:port` and serves until `shutdown_rx` fires.
pub async fn serve(
    listen: &str,
    port: u16,
    registry: Arc<RwLock<Registry>>,
    shutdown_rx: tokio::sync::oneshot::Receiver<()>,
) -> anyhow::Result<()> {
    let version = env!("CARGO_PKG_VERSION");

    let state = Arc::new(AppState { version, registry });
    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", listen, port)
        .parse()
        .with_context(|| format!("Invalid API listen address {}:{}", listen, port))?;
    tracing::info!("Starting HTTP API server on {}", addr);

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown_rx.await.ok();
            tracing::info!("HTTP API server shutting down gracefully");
        })
        .await?;

    Ok(())
}
