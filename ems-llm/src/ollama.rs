use crate::error::{LlmError, Result, truncate_body};
use crate::types::{ChatMessage, CompletionRequest};
use serde::{Deserialize, Serialize};

#[derive(Clone)]
pub struct OllamaClient {
    http: reqwest::Client,
    chat_url: String,
    model: String,
}

impl OllamaClient {
    pub fn new(http: reqwest::Client, base_url: &str, model: &str) -> Self {
        Self {
            http,
            chat_url: format!("{base_url}/api/chat"),
            model: model.to_string(),
        }
    }

    #[tracing::instrument(level = "info", skip_all)]
    pub async fn chat(&self, request: &CompletionRequest) -> Result<String> {
        let req = OllamaChatRequest {
            model: self.model.clone(),
            messages: request.messages(),
            stream: false,
            options: OllamaOptions {
                temperature: request.temperature,
            },
        };

        let response = self.http.post(&self.chat_url).json(&req).send().await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            tracing::error!(status = status.as_u16(), body = %truncate_body(&body), "ollama chat failed");
            return Err(LlmError::Status {
                status: status.as_u16(),
                body: truncate_body(&body),
            });
        }

        let parsed: OllamaChatResponse = serde_json::from_str(&body)?;
        parsed.into_text()
    }
}

#[derive(Debug, Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    #[serde(default)]
    message: Option<OllamaMessage>,
}

#[derive(Debug, Deserialize)]
struct OllamaMessage {
    #[serde(default)]
    content: Option<String>,
}

impl OllamaChatResponse {
    fn into_text(self) -> Result<String> {
        let content = self
            .message
            .and_then(|m| m.content)
            .map(|c| c.trim().to_string())
            .unwrap_or_default();
        if content.is_empty() {
            return Err(LlmError::EmptyResponse);
        }
        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Json;
    use axum::http::StatusCode;
    use axum::routing::post;
    use serde_json::json;

    async fn spawn_stub(app: axum::Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind stub");
        let addr = listener.local_addr().expect("stub addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        format!("http://{addr}")
    }

    fn client(base_url: &str) -> OllamaClient {
        OllamaClient::new(reqwest::Client::new(), base_url, "llama3.1:latest")
    }

    fn request() -> CompletionRequest {
        CompletionRequest::new("system", "hello", 0.1)
    }

    #[tokio::test]
    async fn returns_trimmed_message_content() {
        let app = axum::Router::new().route(
            "/api/chat",
            post(|Json(body): Json<serde_json::Value>| async move {
                assert_eq!(body["stream"], json!(false));
                assert_eq!(body["messages"][0]["role"], json!("system"));
                assert_eq!(body["messages"][1]["content"], json!("hello"));
                Json(json!({ "message": { "role": "assistant", "content": "  hi there \n" } }))
            }),
        );
        let base = spawn_stub(app).await;
        let text = client(&base).chat(&request()).await.expect("chat ok");
        assert_eq!(text, "hi there");
    }

    #[tokio::test]
    async fn non_success_status_is_described() {
        let app = axum::Router::new().route(
            "/api/chat",
            post(|| async { (StatusCode::SERVICE_UNAVAILABLE, "model loading") }),
        );
        let base = spawn_stub(app).await;
        let err = client(&base).chat(&request()).await.expect_err("must fail");
        match err {
            LlmError::Status { status, body } => {
                assert_eq!(status, 503);
                assert_eq!(body, "model loading");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn malformed_body_is_a_format_error() {
        let app = axum::Router::new().route("/api/chat", post(|| async { "not json" }));
        let base = spawn_stub(app).await;
        let err = client(&base).chat(&request()).await.expect_err("must fail");
        assert!(matches!(err, LlmError::ResponseFormat(_)));
    }

    #[tokio::test]
    async fn missing_content_is_an_empty_response() {
        let app = axum::Router::new().route(
            "/api/chat",
            post(|| async { Json(json!({ "message": { "role": "assistant" } })) }),
        );
        let base = spawn_stub(app).await;
        let err = client(&base).chat(&request()).await.expect_err("must fail");
        assert!(matches!(err, LlmError::EmptyResponse));
    }

    #[tokio::test]
    async fn unreachable_service_is_a_transport_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);
        let err = client(&format!("http://{addr}"))
            .chat(&request())
            .await
            .expect_err("must fail");
        assert!(matches!(err, LlmError::Http(_) | LlmError::Timeout(_)));
    }
}
