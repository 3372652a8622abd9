pub mod chat;
pub mod health;

use axum::Router;

/// Routes that need no caller identity.
pub fn public_router() -> Router {
    Router::new().merge(health::router())
}

/// Routes that run behind [`crate::http_auth::require_identity`].
pub fn identified_router() -> Router {
    Router::new().merge(chat::router())
}
