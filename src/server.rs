use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::broadcast::error::RecvError;
use tower_http::cors::CorsLayer;

use crate::error::TelemetryError;
use crate::muscle::CaptureMode;
use crate::telemetry::TelemetryHandle;
use crate::types::Segment;

impl IntoResponse for TelemetryError {
    fn into_response(self) -> Response {
        let status = match &self {
            TelemetryError::CalibrationOrder => StatusCode::CONFLICT,
            TelemetryError::InvalidMode(_) => StatusCode::BAD_REQUEST,
            TelemetryError::SensorUnavailable { .. } | TelemetryError::ChannelClosed => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

type ApiResult = Result<Response, TelemetryError>;

pub fn router(handle: TelemetryHandle) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/metrics", get(latest_metrics))
        .route("/history", get(history))
        .route("/health", get(health))
        .route("/reset", post(reset_session))
        .route("/imu/calibrate", post(calibrate_imu))
        .route("/imu/thigh", get(thigh_readout))
        .route("/imu/shin", get(shin_readout))
        .route("/muscle/calibrate", post(calibrate_muscle))
        .route("/muscle/calibrate/start", post(start_calibration))
        .layer(CorsLayer::permissive())
        .with_state(handle)
}

/// Serve until `shutdown` resolves.
pub async fn serve(
    handle: TelemetryHandle,
    addr: SocketAddr,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    log::info!("Telemetry server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, router(handle))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

async fn latest_metrics(State(handle): State<TelemetryHandle>) -> impl IntoResponse {
    Json(handle.latest().await)
}

async fn history(State(handle): State<TelemetryHandle>) -> impl IntoResponse {
    Json(handle.history().await)
}

async fn health(State(handle): State<TelemetryHandle>) -> impl IntoResponse {
    Json(json!({
        "sensors": handle.health().await,
        "session": handle.summary().await,
        "subscribers": handle.subscriber_count(),
    }))
}

async fn reset_session(State(handle): State<TelemetryHandle>) -> ApiResult {
    let summary = handle.reset_session().await?;
    Ok(Json(json!({
        "status": "reset",
        "history_len": summary.history_len,
        "sequence": summary.sequence,
    }))
    .into_response())
}

async fn calibrate_imu(State(handle): State<TelemetryHandle>) -> ApiResult {
    let pose = handle.calibrate_imu().await?;
    Ok(Json(json!({ "status": "ok", "pose": pose })).into_response())
}

async fn thigh_readout(State(handle): State<TelemetryHandle>) -> ApiResult {
    Ok(Json(handle.segment(Segment::Thigh).await?).into_response())
}

async fn shin_readout(State(handle): State<TelemetryHandle>) -> ApiResult {
    Ok(Json(handle.segment(Segment::Shin).await?).into_response())
}

#[derive(Deserialize)]
struct ModeQuery {
    mode: Option<String>,
}

async fn calibrate_muscle(
    State(handle): State<TelemetryHandle>,
    Query(query): Query<ModeQuery>,
) -> ApiResult {
    let mode: CaptureMode = query.mode.as_deref().unwrap_or_default().parse()?;
    let status = handle.calibrate_muscle(mode).await?;
    Ok(Json(status).into_response())
}

async fn start_calibration(State(handle): State<TelemetryHandle>) -> ApiResult {
    Ok(Json(handle.start_calibration().await?).into_response())
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(handle): State<TelemetryHandle>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| stream_metrics(socket, handle))
}

/// Push loop for one subscriber, one task per connection.
async fn stream_metrics(socket: WebSocket, handle: TelemetryHandle) {
    let mut updates = handle.subscribe();
    let (mut sender, mut receiver) = socket.split();
    log::info!("Subscriber connected ({} active)", handle.subscriber_count());

    loop {
        tokio::select! {
            update = updates.recv() => match update {
                Ok(metrics) => {
                    let payload = match serde_json::to_string(&metrics) {
                        Ok(p) => p,
                        Err(e) => {
                            log::error!("Failed to encode metrics {}: {}", metrics.sequence, e);
                            continue;
                        }
                    };
                    if let Err(e) = sender.send(Message::Text(payload)).await {
                        log::warn!("{}", TelemetryError::SubscriberDelivery(e.to_string()));
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    log::debug!("Subscriber lagging, skipped {} snapshots", skipped);
                }
                Err(RecvError::Closed) => break,
            },
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    log::debug!("Subscriber socket error: {}", e);
                    break;
                }
                // Inbound text is ignored; pings are answered by axum.
                Some(Ok(_)) => {}
            },
        }
    }

    drop(updates);
    log::info!("Subscriber disconnected ({} active)", handle.subscriber_count());
}
