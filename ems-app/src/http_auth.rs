use crate::config::EmsConfig;
use crate::server::AppState;
use axum::body::Body;
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use serde_json::json;
use std::sync::Arc;

/// Header carrying the caller's username.
pub const USER_HEADER: &str = "x-ems-user";

#[derive(Debug, Clone, Default)]
pub struct AuthPolicy {
    /// When set, every identified request must also carry this bearer token.
    pub api_token: Option<String>,
}

impl AuthPolicy {
    pub fn from_config(cfg: &EmsConfig) -> Self {
        Self {
            api_token: cfg.security.api_token().map(str::to_string),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuthPolicyExt(pub AuthPolicy);

fn parse_bearer_token(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let mut parts = raw.trim().splitn(2, char::is_whitespace);
    let scheme = parts.next()?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = parts.next()?.trim();
    if token.is_empty() {
        return None;
    }
    Some(token.to_string())
}

fn username_from_headers(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get(USER_HEADER)?.to_str().ok()?.trim();
    (!raw.is_empty()).then(|| raw.to_string())
}

fn rejection(status: StatusCode, code: &str, message: &str) -> Response {
    tracing::warn!(error_code = code, status = status.as_u16(), error = %message, "request rejected");
    (
        status,
        Json(json!({
            "status": "error",
            "error": message,
            "error_code": code,
        })),
    )
        .into_response()
}

/// Resolves the caller into an [`ems_store::Identity`] request extension.
#[tracing::instrument(level = "debug", skip_all)]
pub async fn require_identity(
    Extension(state): Extension<Arc<AppState>>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let policy = req
        .extensions()
        .get::<AuthPolicyExt>()
        .map(|v| v.0.clone())
        .unwrap_or_default();

    if let Some(expected) = policy.api_token.as_deref() {
        let Some(provided) = parse_bearer_token(req.headers()) else {
            return rejection(
                StatusCode::UNAUTHORIZED,
                "missing_bearer_token",
                "missing bearer token",
            );
        };
        if provided != expected {
            return rejection(
                StatusCode::UNAUTHORIZED,
                "invalid_bearer_token",
                "invalid bearer token",
            );
        }
    }

    let Some(username) = username_from_headers(req.headers()) else {
        return rejection(
            StatusCode::UNAUTHORIZED,
            "missing_user",
            "missing x-ems-user header",
        );
    };
    let identity = match state.store.identity_by_username(&username).await {
        Ok(Some(identity)) => identity,
        Ok(None) => {
            return rejection(StatusCode::UNAUTHORIZED, "unknown_user", "unknown user");
        }
        Err(e) => {
            tracing::error!(error = %e, "identity lookup failed");
            return rejection(
                StatusCode::SERVICE_UNAVAILABLE,
                "store_unavailable",
                "record store unavailable",
            );
        }
    };
    tracing::debug!(account_id = identity.account_id, "caller identified");
    req.extensions_mut().insert(identity);
    next.run(req).await
}
