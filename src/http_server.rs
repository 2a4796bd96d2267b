/// HTTP Server Module
///
/// Dashboard endpoints: pairing, status, a manual send trigger and a
/// Server-Sent-Events feed of lifecycle events.

use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        Html, Json,
    },
    routing::{get, post},
    Router,
};
use chrono::Utc;
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use tokio_stream::{wrappers::BroadcastStream, Stream, StreamExt};
use tower_http::cors::CorsLayer;

use crate::courier::{Courier, CycleOutcome, Trigger};
use crate::events::DashboardEvent;
use crate::session::ConnectionState;

const DASHBOARD_HTML: &str = include_str!("../static/dashboard.html");

#[derive(Clone)]
pub struct AppState {
    pub courier: Arc<Courier>,
    /// Bearer token required by the mutating endpoints, when set
    pub dashboard_secret: Option<String>,
}

type ApiResult = Result<(StatusCode, Json<serde_json::Value>), StatusCode>;

/// Create and configure the HTTP server router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(dashboard))
        .route("/health", get(health_check))
        .route("/status", get(status_endpoint))
        .route("/scheduler-status", get(scheduler_status_endpoint))
        .route("/qr", get(qr_endpoint))
        .route("/events", get(events_endpoint))
        .route("/send-youtube-short", post(send_endpoint))
        .route("/logout", post(logout_endpoint))
        .route("/refresh-qr", post(refresh_qr_endpoint))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), StatusCode> {
    let Some(secret) = &state.dashboard_secret else {
        return Ok(());
    };

    let token = headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "));

    match token {
        Some(token) if token == secret.as_str() => Ok(()),
        _ => Err(StatusCode::UNAUTHORIZED),
    }
}

async fn dashboard() -> Html<&'static str> {
    Html(DASHBOARD_HTML)
}

/// Health check endpoint
async fn health_check() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "shorts_drop_bot",
        "timestamp": Utc::now().to_rfc3339()
    }))
}

/// Connection state plus delivery loop summary
async fn status_endpoint(State(state): State<AppState>) -> Json<serde_json::Value> {
    let monitor = state.courier.monitor();
    let session = monitor.state().await;

    Json(json!({
        "isReady": session.is_ready(),
        "connectionStatus": session.label(),
        "hasQr": session.qr().is_some(),
        "user": session.user(),
        "messenger": state.courier.deliverer().messenger().name(),
        "scheduler": state.courier.status().await,
    }))
}

async fn scheduler_status_endpoint(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!(state.courier.status().await))
}

async fn qr_endpoint(State(state): State<AppState>) -> Json<serde_json::Value> {
    let session = state.courier.monitor().state().await;
    Json(json!({
        "qr": session.qr(),
        "status": session.label(),
    }))
}

/// Manual delivery: skips the interval check, still recorded by the gate
async fn send_endpoint(State(state): State<AppState>, headers: HeaderMap) -> ApiResult {
    authorize(&state, &headers)?;
    log::info!("Manual send requested from the dashboard");

    let outcome = state.courier.run_cycle(Trigger::Manual).await;
    let code = match &outcome {
        CycleOutcome::Sent { .. } => StatusCode::OK,
        CycleOutcome::AlreadyInProgress => StatusCode::CONFLICT,
        CycleOutcome::NotReady | CycleOutcome::BreakerOpen { .. } => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        CycleOutcome::NoContent { .. } => StatusCode::OK,
        CycleOutcome::GateDenied { .. } => StatusCode::TOO_MANY_REQUESTS,
        CycleOutcome::Failed { .. } => StatusCode::BAD_GATEWAY,
    };

    let message = match &outcome {
        CycleOutcome::Sent { .. } => "Video enviado exitosamente".to_string(),
        CycleOutcome::AlreadyInProgress => "Ya hay un envío en curso".to_string(),
        CycleOutcome::NotReady => "WhatsApp no está conectado".to_string(),
        CycleOutcome::BreakerOpen { .. } => {
            "Envíos pausados tras varios fallos seguidos".to_string()
        }
        CycleOutcome::GateDenied { .. } => "Todavía no toca enviar".to_string(),
        CycleOutcome::NoContent { message } | CycleOutcome::Failed { message, .. } => {
            message.clone()
        }
    };

    let mut body = json!({
        "success": outcome.is_sent(),
        "message": message,
    });
    if let (Some(map), Ok(serde_json::Value::Object(detail))) =
        (body.as_object_mut(), serde_json::to_value(&outcome))
    {
        map.extend(detail);
    }
    Ok((code, Json(body)))
}

async fn logout_endpoint(State(state): State<AppState>, headers: HeaderMap) -> ApiResult {
    authorize(&state, &headers)?;

    let messenger = state.courier.deliverer().messenger();
    match messenger.logout().await {
        Ok(()) => {
            state
                .courier
                .monitor()
                .transition(ConnectionState::Disconnected)
                .await;
            Ok((
                StatusCode::OK,
                Json(json!({ "success": true, "message": "Sesión cerrada" })),
            ))
        }
        Err(e) => {
            log::error!("Logout failed: {:#}", e);
            Ok((
                StatusCode::BAD_GATEWAY,
                Json(json!({ "success": false, "message": e.to_string() })),
            ))
        }
    }
}

async fn refresh_qr_endpoint(State(state): State<AppState>, headers: HeaderMap) -> ApiResult {
    authorize(&state, &headers)?;

    let messenger = state.courier.deliverer().messenger();
    match messenger.restart().await {
        Ok(()) => {
            state
                .courier
                .monitor()
                .transition(ConnectionState::Reauthenticating)
                .await;
            Ok((
                StatusCode::OK,
                Json(json!({ "success": true, "message": "Generando nuevo código QR" })),
            ))
        }
        Err(e) => {
            log::error!("Session restart failed: {:#}", e);
            Ok((
                StatusCode::BAD_GATEWAY,
                Json(json!({ "success": false, "message": e.to_string() })),
            ))
        }
    }
}

fn to_sse(event: &DashboardEvent) -> Event {
    match Event::default().event(event.name()).json_data(event) {
        Ok(sse) => sse,
        Err(e) => {
            log::warn!("Could not encode {} event: {}", event.name(), e);
            Event::default().event(event.name())
        }
    }
}

/// Lifecycle feed: a `connection` snapshot first, then live events
async fn events_endpoint(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let snapshot = state.courier.monitor().connection_event().await;
    let live = BroadcastStream::new(state.courier.events().subscribe())
        .filter_map(|event| event.ok());

    let stream = tokio_stream::once(snapshot)
        .chain(live)
        .map(|event| Ok(to_sse(&event)));

    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// Start the HTTP server
pub async fn start_server(state: AppState, port: u16) -> Result<()> {
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port))
        .await
        .context("Failed to bind HTTP server")?;

    log::info!("Dashboard listening on http://0.0.0.0:{}", port);

    axum::serve(listener, app)
        .await
        .context("HTTP server error")?;

    Ok(())
}
