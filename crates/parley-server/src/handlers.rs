//! HTTP handlers for Parley server.
//!
//! This module maps requests onto room operations and room errors onto
//! status codes. It holds no chat logic of its own.

use crate::config::Config;
use crate::metrics::{self, RequestTimer};
use anyhow::{Context, Result};
use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use parley_core::{
    MemoryStore, Message, Participant, RelayError, ResilientStore, Room, Store, SystemClock,
    ValidationErrors,
};
use serde::Deserialize;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::{debug, error, info, warn};

/// Header carrying the caller's participant name.
const USER_HEADER: &str = "user";

/// Shared server state.
pub struct AppState {
    /// The chat room.
    pub room: Room,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(room: Room, config: Config) -> Self {
        Self { room, config }
    }
}

/// Run the HTTP server and the expiry sweeper.
///
/// # Errors
///
/// Returns an error if the store is unreachable or the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let store = ResilientStore::new(MemoryStore::new(), config.store.to_policy());
    store.ping().await.context("Store is unreachable")?;

    let room = Room::new(Arc::new(store), Arc::new(SystemClock));
    let state = Arc::new(AppState::new(room.clone(), config.clone()));

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let sweeper = Arc::new(room.sweeper(config.sweeper.to_sweeper_config()))
        .spawn(metrics::record_sweep);

    let app = app(state);

    // Bind and serve
    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    info!("Parley server listening on {}", addr);

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    sweeper.shutdown().await;
    served?;

    info!("Parley server stopped");
    Ok(())
}

/// Build the HTTP router.
pub fn app(state: Arc<AppState>) -> Router {
    let cors = state.config.http.cors;
    let router = Router::new()
        .route("/participants", post(join_handler).get(participants_handler))
        .route("/messages", post(post_message_handler).get(messages_handler))
        .route("/status", post(status_handler))
        .route("/health", get(health_handler))
        .with_state(state);

    if cors {
        router.layer(CorsLayer::permissive())
    } else {
        router
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

/// A room error on its way to the client.
#[derive(Debug)]
pub struct ApiError(RelayError);

impl From<RelayError> for ApiError {
    fn from(err: RelayError) -> Self {
        Self(err)
    }
}

/// Status code for a room error.
#[must_use]
pub fn status_for(err: &RelayError) -> StatusCode {
    match err {
        RelayError::InvalidName(_)
        | RelayError::InvalidMessage(_)
        | RelayError::InvalidLimit(_)
        | RelayError::UnknownSender(_)
        | RelayError::UnknownRecipient(_) => StatusCode::UNPROCESSABLE_ENTITY,
        RelayError::NameTaken(_) => StatusCode::CONFLICT,
        RelayError::UnknownParticipant(_) => StatusCode::NOT_FOUND,
        RelayError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        metrics::record_error(&self.0);

        if status.is_server_error() {
            warn!(error = %self.0, "Request failed");
        } else {
            debug!(error = %self.0, kind = self.0.kind(), "Request rejected");
        }

        let details: Vec<String> = self
            .0
            .field_errors()
            .iter()
            .map(|e| format!("{}: {}", e.field, e.message))
            .collect();

        (
            status,
            Json(serde_json::json!({
                "error": self.0.to_string(),
                "details": details,
            })),
        )
            .into_response()
    }
}

/// Caller name from the `User` header, empty if missing.
fn caller(headers: &HeaderMap) -> String {
    headers
        .get(USER_HEADER)
        .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
        .unwrap_or_default()
}

/// Body of `POST /participants`.
#[derive(Debug, Deserialize)]
pub struct JoinRequest {
    #[serde(default)]
    pub name: String,
}

/// Body of `POST /messages`.
#[derive(Debug, Deserialize)]
pub struct PostRequest {
    #[serde(default)]
    pub to: String,
    #[serde(default)]
    pub text: String,
    #[serde(rename = "type", default)]
    pub kind: String,
}

/// Query of `GET /messages`.
///
/// `limit` is kept as text and parsed by [`ListQuery::limit`].
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub limit: Option<String>,
}

impl ListQuery {
    fn limit(&self) -> Result<Option<i64>, RelayError> {
        let Some(raw) = self.limit.as_deref() else {
            return Ok(None);
        };
        raw.trim().parse().map(Some).map_err(|_| {
            let mut errors = ValidationErrors::new();
            errors.push("limit", format!("must be an integer, got {raw:?}"));
            RelayError::InvalidMessage(errors)
        })
    }
}

/// The `User` header as a viewer name, rejected if missing or blank.
fn viewer(headers: &HeaderMap) -> Result<String, RelayError> {
    let name = caller(headers);
    if name.trim().is_empty() {
        let mut errors = ValidationErrors::new();
        errors.push("user", "is required");
        return Err(RelayError::InvalidMessage(errors));
    }
    Ok(name)
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn join_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<JoinRequest>,
) -> Result<(StatusCode, Json<Participant>), ApiError> {
    let _timer = RequestTimer::new("join");
    let participant = state.room.join(&body.name).await?;
    metrics::record_join();
    Ok((StatusCode::CREATED, Json(participant)))
}

async fn participants_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Participant>>, ApiError> {
    let _timer = RequestTimer::new("participants");
    let participants = state.room.list_participants().await?;
    metrics::set_active_participants(participants.len());
    Ok(Json(participants))
}

async fn post_message_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<PostRequest>,
) -> Result<(StatusCode, Json<Message>), ApiError> {
    let _timer = RequestTimer::new("post_message");
    let from = caller(&headers);
    let message = state
        .room
        .post_message(&from, &body.to, &body.text, &body.kind)
        .await?;
    metrics::record_message(message.kind);
    Ok((StatusCode::CREATED, Json(message)))
}

async fn messages_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Message>>, ApiError> {
    let _timer = RequestTimer::new("messages");
    let viewer = viewer(&headers)?;
    let limit = query.limit()?;
    let messages = state.room.list_messages(&viewer, limit).await?;
    Ok(Json(messages))
}

async fn status_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let _timer = RequestTimer::new("status");
    state.room.heartbeat(&caller(&headers)).await?;
    metrics::record_heartbeat();
    Ok(StatusCode::OK)
}
