use crate::error::{LlmError, Result};
use crate::ollama::OllamaClient;
use crate::openai::OpenAiClient;
use crate::types::CompletionRequest;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Anything that can turn a system + user prompt into reply text.
///
/// The assistant depends on this seam rather than on [`LlmClient`] so tests can
/// script replies.
#[async_trait]
pub trait TextCompletion: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Ollama,
    #[serde(rename = "openai")]
    OpenAi,
}

impl std::str::FromStr for Provider {
    type Err = LlmError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "openai" => Ok(Self::OpenAi),
            other => Err(LlmError::InvalidInput(format!(
                "unknown provider {other:?}; expected ollama or openai"
            ))),
        }
    }
}

#[derive(Clone)]
pub struct LlmClient {
    provider: Provider,
    base_url: String,
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl LlmClient {
    #[tracing::instrument(level = "debug", skip_all, fields(provider = ?provider, model = %model))]
    pub fn new(
        provider: Provider,
        base_url: &str,
        api_key: &str,
        model: &str,
        timeout: Duration,
    ) -> Result<Self> {
        if model.trim().is_empty() {
            return Err(LlmError::InvalidInput("model is required".to_string()));
        }
        if base_url.trim().is_empty() {
            return Err(LlmError::InvalidInput("base_url is required".to_string()));
        }
        if provider == Provider::OpenAi && api_key.trim().is_empty() {
            return Err(LlmError::InvalidInput(
                "openai provider requires an api key".to_string(),
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LlmError::InvalidInput(format!("http client build failed: {e}")))?;
        Ok(Self {
            provider,
            base_url: base_url.trim().trim_end_matches('/').to_string(),
            api_key: api_key.trim().to_string(),
            model: model.trim().to_string(),
            client,
        })
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl TextCompletion for LlmClient {
    #[tracing::instrument(level = "info", skip_all, fields(provider = ?self.provider, model = %self.model))]
    async fn complete(&self, request: CompletionRequest) -> Result<String> {
        let started = Instant::now();
        let result = match self.provider {
            Provider::Ollama => {
                OllamaClient::new(self.client.clone(), &self.base_url, &self.model)
                    .chat(&request)
                    .await
            }
            Provider::OpenAi => {
                OpenAiClient::new(
                    self.client.clone(),
                    &self.base_url,
                    &self.api_key,
                    &self.model,
                )
                .chat(&request)
                .await
            }
        };
        match &result {
            Ok(text) => tracing::info!(
                latency_ms = started.elapsed().as_millis() as u64,
                reply_chars = text.chars().count(),
                temperature = request.temperature,
                "completion succeeded"
            ),
            Err(e) => tracing::warn!(
                latency_ms = started.elapsed().as_millis() as u64,
                error = %e,
                "completion failed"
            ),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::post;

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

    #[test]
    fn provider_parses_case_insensitively() {
        assert_eq!(" Ollama ".parse::<Provider>().expect("ollama"), Provider::Ollama);
        assert_eq!("OPENAI".parse::<Provider>().expect("openai"), Provider::OpenAi);
        assert!("anthropic".parse::<Provider>().is_err());
    }

    #[test]
    fn openai_without_key_is_rejected() {
        let err = LlmClient::new(
            Provider::OpenAi,
            "https://api.openai.com",
            "  ",
            "gpt-4o-mini",
            Duration::from_secs(5),
        )
        .err()
        .expect("missing key must fail");
        assert!(matches!(err, LlmError::InvalidInput(_)));
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let client = LlmClient::new(
            Provider::Ollama,
            "http://localhost:11434/",
            "",
            "llama3.1:latest",
            Duration::from_secs(5),
        )
        .expect("client");
        assert_eq!(client.base_url, "http://localhost:11434");
        assert_eq!(client.model(), "llama3.1:latest");
        assert_eq!(client.provider(), Provider::Ollama);
    }

    #[tokio::test]
    async fn slow_service_times_out() {
        let app = axum::Router::new().route(
            "/api/chat",
            post(|| async {
                tokio::time::sleep(Duration::from_secs(3)).await;
                "too late"
            }),
        );
        let base = spawn_stub(app).await;
        let client = LlmClient::new(
            Provider::Ollama,
            &base,
            "",
            "llama3.1:latest",
            Duration::from_millis(200),
        )
        .expect("client");
        let started = Instant::now();
        let err = client
            .complete(CompletionRequest::new("sys", "user", 0.1))
            .await
            .expect_err("must time out");
        assert!(matches!(err, LlmError::Timeout(_)), "unexpected error: {err:?}");
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
