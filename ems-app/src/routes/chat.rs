use crate::server::AppState;
use axum::body::Bytes;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json};
use chrono::Utc;
use ems_store::Identity;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::Instrument;

/// Sent when a reply is not ready within the request's reply budget.
pub const REPLY_TIMEOUT_TEXT: &str =
    "Sorry, that is taking longer than expected. Please check back in a moment.";

#[derive(Debug, Deserialize)]
struct ChatRequest {
    #[serde(default)]
    message: Option<String>,
}

pub fn router() -> axum::Router {
    axum::Router::new()
        .route("/api/v1/chat", post(post_chat))
        .route("/api/v1/chat/pending", get(get_pending))
}

fn bad_request(message: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "status": "error", "error": message })),
    )
        .into_response()
}

// Raw bytes so malformed JSON gets the same error shape as a blank message.
#[tracing::instrument(level = "info", skip_all, fields(account_id = identity.account_id))]
async fn post_chat(
    Extension(state): Extension<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    body: Bytes,
) -> Response {
    let request: ChatRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            tracing::debug!(error = %e, "chat body is not valid json");
            return bad_request("Invalid JSON body.");
        }
    };
    let message = request.message.unwrap_or_default();
    if message.trim().is_empty() {
        return bad_request("Message is required.");
    }

    // Detached so an expired wait never drops a message after its action was claimed.
    let assistant = state.assistant.clone();
    let task = tokio::spawn(
        async move { assistant.handle_message(&identity, &message).await }
            .instrument(tracing::Span::current()),
    );
    let text = match tokio::time::timeout(state.reply_budget, task).await {
        Ok(Ok(reply)) => reply.text,
        Ok(Err(e)) => {
            tracing::error!(error = %e, "chat message task failed");
            REPLY_TIMEOUT_TEXT.to_string()
        }
        Err(_) => {
            tracing::warn!(
                budget_ms = state.reply_budget.as_millis() as u64,
                "reply budget exhausted; message continues in background"
            );
            REPLY_TIMEOUT_TEXT.to_string()
        }
    };
    Json(json!({ "reply": text })).into_response()
}

#[tracing::instrument(level = "debug", skip_all, fields(account_id = identity.account_id))]
async fn get_pending(
    Extension(state): Extension<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
) -> Response {
    match state.assistant.live_pending(&identity, Utc::now()).await {
        Ok(pending) => Json(json!({ "pending": pending })).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "pending action lookup failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "error", "error": "record store unavailable" })),
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::REPLY_TIMEOUT_TEXT;
    use crate::assistant::testing::{Fixture, ScriptedCompletion};
    use crate::assistant::{Assistant, AssistantSettings};
    use crate::http_auth::{AuthPolicy, USER_HEADER};
    use crate::server::{AppState, app_router};
    use axum::Router;
    use axum::body::{Body, to_bytes};
    use axum::http::{Method, Request, StatusCode};
    use std::sync::Arc;
    use std::time::Duration;
    use tower::util::ServiceExt;

    const CREATE_LAUNCH: &str = r#"{"action":"create_event","reason":"asked to create an event","params":{"title":"Launch","venue_name":"Hall A"}}"#;

    async fn router_with(replies: &[&str]) -> Router {
        let fx = Fixture::new().await;
        let assistant = Assistant::new(
            fx.store.clone(),
            Arc::new(ScriptedCompletion::new(replies.iter().copied())),
            AssistantSettings::default(),
        );
        app_router(
            Arc::new(AppState::new(fx.store.clone(), assistant)),
            AuthPolicy::default(),
        )
    }

    /// Every completion takes `delay`; replies wait at most `budget`.
    async fn slow_router(replies: &[&str], delay: Duration, budget: Duration) -> Router {
        let fx = Fixture::new().await;
        let llm = ScriptedCompletion::new(replies.iter().copied()).with_delay(delay);
        let assistant = Assistant::new(fx.store.clone(), Arc::new(llm), AssistantSettings::default());
        app_router(
            Arc::new(AppState::new(fx.store.clone(), assistant).with_reply_budget(budget)),
            AuthPolicy::default(),
        )
    }

    async fn call(
        router: Router,
        method: Method,
        uri: &str,
        body: &str,
    ) -> (StatusCode, serde_json::Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header(USER_HEADER, "olga")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .expect("request");
        let response = router.oneshot(request).await.expect("response");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("response body");
        (status, serde_json::from_slice(&bytes).expect("json body"))
    }

    #[tokio::test]
    async fn blank_message_is_rejected() {
        let router = router_with(&[]).await;
        let (status, body) = call(router.clone(), Method::POST, "/api/v1/chat", r#"{"message":"  "}"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Message is required.");

        let (status, body) = call(router, Method::POST, "/api/v1/chat", "{}").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Message is required.");
    }

    #[tokio::test]
    async fn malformed_json_is_rejected() {
        let router = router_with(&[]).await;
        let (status, body) = call(router, Method::POST, "/api/v1/chat", "{not json").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["status"], "error");
        assert_eq!(body["error"], "Invalid JSON body.");
    }

    #[tokio::test]
    async fn staged_action_is_visible_until_confirmed() {
        let router = router_with(&[CREATE_LAUNCH]).await;

        let (status, body) = call(
            router.clone(),
            Method::POST,
            "/api/v1/chat",
            r#"{"message":"create Launch at Hall A"}"#,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let reply = body["reply"].as_str().expect("reply text");
        assert!(reply.contains("`create_event`"));

        let (status, body) = call(router.clone(), Method::GET, "/api/v1/chat/pending", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["pending"]["kind"], "create_event");
        assert_eq!(body["pending"]["params"]["title"], "Launch");

        let (status, body) = call(router.clone(), Method::POST, "/api/v1/chat", r#"{"message":"yes"}"#).await;
        assert_eq!(status, StatusCode::OK);
        assert!(
            body["reply"]
                .as_str()
                .expect("reply text")
                .starts_with("✅ Event 'Launch' has been created")
        );

        let (_, body) = call(router, Method::GET, "/api/v1/chat/pending", "").await;
        assert!(body["pending"].is_null());
    }

    #[tokio::test]
    async fn slow_question_gets_fallback_reply_within_budget() {
        let router = slow_router(
            &[r#"{"action":"none"}"#, "It starts at noon."],
            Duration::from_millis(400),
            Duration::from_millis(100),
        )
        .await;
        let started = std::time::Instant::now();
        let (status, body) = call(
            router,
            Method::POST,
            "/api/v1/chat",
            r#"{"message":"when does Launch start?"}"#,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["reply"], REPLY_TIMEOUT_TEXT);
        assert!(started.elapsed() < Duration::from_millis(400));
    }

    #[tokio::test]
    async fn timed_out_message_still_completes_in_background() {
        let router = slow_router(
            &[CREATE_LAUNCH],
            Duration::from_millis(200),
            Duration::from_millis(50),
        )
        .await;
        let (status, body) = call(
            router.clone(),
            Method::POST,
            "/api/v1/chat",
            r#"{"message":"create Launch at Hall A"}"#,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["reply"], REPLY_TIMEOUT_TEXT);

        tokio::time::sleep(Duration::from_millis(600)).await;
        let (status, body) = call(router, Method::GET, "/api/v1/chat/pending", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["pending"]["kind"], "create_event");
    }

    #[tokio::test]
    async fn fast_reply_is_returned_unchanged() {
        let router = slow_router(
            &[r#"{"action":"none"}"#, "It starts at noon."],
            Duration::from_millis(10),
            Duration::from_secs(5),
        )
        .await;
        let (status, body) = call(
            router,
            Method::POST,
            "/api/v1/chat",
            r#"{"message":"when does Launch start?"}"#,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["reply"], "It starts at noon.");
    }

    #[tokio::test]
    async fn health_needs_no_identity() {
        let router = router_with(&[]).await;
        let response = router
            .oneshot(
                Request::builder()
                    .uri("/api/v1/health")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("response body");
        let body: serde_json::Value = serde_json::from_slice(&bytes).expect("json");
        assert_eq!(body["ready"], true);
    }
}
