//! HTTP listener: websocket upgrade, join validation and health

use anyhow::Result;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures::StreamExt;
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::signaling::Signaling;
use crate::auth::{AuthError, Authenticator};
use crate::lifecycle::JoinError;

/// Shared state handed to every request handler
#[derive(Clone)]
pub struct AppState {
    pub signaling: Arc<Signaling>,
    pub auth: Arc<Authenticator>,
}

/// Build the router with all routes
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/session/info", get(session_info_handler))
        .route("/api/ws/video", get(video_ws_handler))
        .with_state(state)
}

/// HTTP server for the signaling service
pub struct ServerListener {
    addr: String,
    state: AppState,
}

impl ServerListener {
    pub fn new(addr: String, signaling: Arc<Signaling>, auth: Arc<Authenticator>) -> Self {
        Self {
            addr,
            state: AppState { signaling, auth },
        }
    }

    /// Bind the configured address and serve until `shutdown` fires
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        let listener = TcpListener::bind(&self.addr).await?;
        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener
    ///
    /// The duration sweep runs alongside. On shutdown every live session is
    /// closed so upgraded connections drain instead of being cut.
    pub async fn serve(&self, listener: TcpListener, shutdown: CancellationToken) -> Result<()> {
        let local: SocketAddr = listener.local_addr()?;
        tracing::info!(%local, "Signaling server listening");

        let sweeper = tokio::spawn(
            Arc::clone(&self.state.signaling).run_sweeper(shutdown.child_token()),
        );

        let signaling = Arc::clone(&self.state.signaling);
        let router = build_router(self.state.clone());
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                shutdown.cancelled().await;
                tracing::info!("Shutdown signal received");
                signaling.drain().await;
            })
            .await?;

        sweeper.await?;
        tracing::info!("Signaling server stopped");
        Ok(())
    }
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "sessions": state.signaling.hub().session_count(),
    }))
}

#[derive(Debug, Deserialize)]
struct SessionInfoQuery {
    booking_id: Uuid,
    timezone: String,
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
}

async fn session_info_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<SessionInfoQuery>,
) -> Response {
    let token = bearer_token(&headers).unwrap_or_default();
    let identity = match state.auth.authenticate(token, query.booking_id).await {
        Ok(identity) => identity,
        Err(e) => return e.into_response(),
    };

    match state
        .signaling
        .lifecycle()
        .validate_and_start_session(
            query.booking_id,
            identity.party_id,
            identity.role,
            &query.timezone,
        )
        .await
    {
        Ok(info) => Json(info).into_response(),
        Err(e) => e.into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct VideoQuery {
    #[serde(default)]
    token: String,
    booking_id: Uuid,
    timezone: String,
}

/// Authenticate and check the join window, then upgrade
///
/// Every rejection happens before any session is touched.
async fn video_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<VideoQuery>,
) -> Response {
    let identity = match state.auth.authenticate(&query.token, query.booking_id).await {
        Ok(identity) => identity,
        Err(e) => return e.into_response(),
    };

    let signaling = Arc::clone(&state.signaling);
    match signaling
        .lifecycle()
        .validate_and_start_session(
            query.booking_id,
            identity.party_id,
            identity.role,
            &query.timezone,
        )
        .await
    {
        Ok(info) if info.can_join => {}
        Ok(info) => return (StatusCode::FORBIDDEN, Json(info)).into_response(),
        Err(e) => return e.into_response(),
    }

    ws.max_message_size(signaling.config().max_message_size)
        .on_upgrade(move |socket| async move {
            let registration = signaling.register_connection(identity).await;
            let (sink, stream) = socket.split();
            signaling.spawn_connection(registration, stream, sink);
        })
}

fn error_body(status: StatusCode, message: String) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = match &self {
            AuthError::MissingToken | AuthError::InvalidToken => StatusCode::UNAUTHORIZED,
            AuthError::BookingNotFound => StatusCode::NOT_FOUND,
            AuthError::NotParticipant => StatusCode::FORBIDDEN,
            AuthError::MissingProfile => StatusCode::BAD_REQUEST,
            AuthError::Issue(_) | AuthError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!("Authentication failed: {}", self);
        }
        error_body(status, self.to_string())
    }
}

impl IntoResponse for JoinError {
    fn into_response(self) -> Response {
        let status = match &self {
            JoinError::BookingNotFound => StatusCode::NOT_FOUND,
            JoinError::Unauthorized => StatusCode::FORBIDDEN,
            JoinError::InvalidTimezone(_) | JoinError::UnschedulableTime(_) => {
                StatusCode::BAD_REQUEST
            }
            JoinError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!("Join validation failed: {}", self);
        }
        error_body(status, self.to_string())
    }
}
