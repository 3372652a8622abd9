use crate::server::AppState;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Extension, Json};
use chrono::Utc;
use std::sync::Arc;

pub fn router() -> axum::Router {
    axum::Router::new().route("/api/v1/health", get(get_health))
}

#[tracing::instrument(level = "debug", skip_all)]
async fn get_health(
    Extension(state): Extension<Arc<AppState>>,
) -> (StatusCode, Json<serde_json::Value>) {
    let store = state.store.ping().await;
    let ready = store.is_ok();
    if let Err(e) = &store {
        tracing::warn!(error = %e, "health check store ping failed");
    }
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(serde_json::json!({
            "status": if ready { "ok" } else { "degraded" },
            "ready": ready,
            "checked_at": Utc::now(),
            "uptime_seconds": (Utc::now() - state.started_at).num_seconds().max(0),
            "checks": {
                "store": {
                    "location": state.store.location(),
                    "ok": ready,
                    "error": store.err().map(|e| e.to_string()),
                }
            }
        })),
    )
}
