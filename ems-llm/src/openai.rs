use crate::error::{LlmError, Result, truncate_body};
use crate::types::{ChatMessage, CompletionRequest};
use serde::{Deserialize, Serialize};

#[derive(Clone)]
pub struct OpenAiClient {
    http: reqwest::Client,
    completions_url: String,
    api_key: String,
    model: String,
}

impl OpenAiClient {
    pub fn new(http: reqwest::Client, base_url: &str, api_key: &str, model: &str) -> Self {
        Self {
            http,
            completions_url: format!("{base_url}/v1/chat/completions"),
            api_key: api_key.to_string(),
            model: model.to_string(),
        }
    }

    #[tracing::instrument(level = "info", skip_all)]
    pub async fn chat(&self, request: &CompletionRequest) -> Result<String> {
        let req = OpenAiChatRequest {
            model: self.model.clone(),
            messages: request.messages(),
            temperature: request.temperature,
        };

        let response = self
            .http
            .post(&self.completions_url)
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            tracing::error!(status = status.as_u16(), body = %truncate_body(&body), "openai chat failed");
            return Err(LlmError::Status {
                status: status.as_u16(),
                body: truncate_body(&body),
            });
        }

        let parsed: OpenAiChatResponse = serde_json::from_str(&body)?;
        parsed.into_text()
    }
}

#[derive(Debug, Serialize)]
struct OpenAiChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct OpenAiChatResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiChatResponse {
    fn into_text(self) -> Result<String> {
        let choice = self.choices.into_iter().next().ok_or_else(|| {
            LlmError::ResponseFormat("openai response missing choices".to_string())
        })?;
        let content = choice.message.content.unwrap_or_default().trim().to_string();
        if content.is_empty() {
            return Err(LlmError::EmptyResponse);
        }
        Ok(content)
    }
}
