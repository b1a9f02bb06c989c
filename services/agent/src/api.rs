//! HTTP ingress.
//!
//! `POST /v1/cast/{topic}` accepts a cast addressed to this host and queues
//! it for the recover manager. The response only acknowledges receipt; the
//! recovery runs afterwards.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use revive_bus::{topic_host, CastMessage};
use revive_id::HostId;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

/// Shared ingress state.
#[derive(Clone)]
pub struct IngressState {
    pub host: HostId,
    pub base_topic: String,
    pub queue: mpsc::Sender<CastMessage>,
}

/// Body of every non-health response.
#[derive(Debug, Serialize, Deserialize)]
pub struct CastResponse {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Service status: "ok".
    pub status: String,
    pub service: String,
    pub version: String,
    pub host: String,
    /// Current timestamp (ISO 8601).
    pub timestamp: String,
}

/// Build the ingress router.
pub fn router(state: IngressState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/cast/{topic}", post(cast))
        .with_state(state)
}

async fn healthz(State(state): State<IngressState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        service: "revive-agent".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        host: state.host.to_string(),
        timestamp: Utc::now().to_rfc3339(),
    })
}

async fn cast(
    State(state): State<IngressState>,
    Path(topic): Path<String>,
    Json(message): Json<CastMessage>,
) -> Response {
    if topic_host(&state.base_topic, &topic).as_ref() != Some(&state.host) {
        warn!(topic = %topic, host = %state.host, "Rejecting cast for another topic");
        return reply(
            StatusCode::NOT_FOUND,
            "rejected",
            Some(format!("topic '{topic}' is not served by {}", state.host)),
        );
    }

    match state.queue.try_send(message) {
        Ok(()) => {
            debug!(topic = %topic, "Cast accepted");
            reply(StatusCode::ACCEPTED, "accepted", None)
        }
        Err(TrySendError::Full(_)) => reply(
            StatusCode::SERVICE_UNAVAILABLE,
            "unavailable",
            Some("recovery queue is full".to_string()),
        ),
        Err(TrySendError::Closed(_)) => reply(
            StatusCode::SERVICE_UNAVAILABLE,
            "unavailable",
            Some("recover manager is not running".to_string()),
        ),
    }
}

fn reply(status: StatusCode, label: &str, error: Option<String>) -> Response {
    (
        status,
        Json(CastResponse {
            status: label.to_string(),
            error,
        }),
    )
        .into_response()
}
