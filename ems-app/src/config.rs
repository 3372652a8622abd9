//! EMS configuration loader.
//!
//! TOML file first, then environment overrides, then validation.

use ems_llm::Provider;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

const REPLY_MARGIN: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EmsConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub assistant: AssistantConfig,
    #[serde(default)]
    pub security: SecurityConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default = "default_http_timeout_seconds")]
    pub http_timeout_seconds: u64,
    #[serde(default = "default_http_max_in_flight")]
    pub http_max_in_flight: usize,
}

fn default_bind_addr() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_http_timeout_seconds() -> u64 {
    240
}

fn default_http_max_in_flight() -> usize {
    64
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            http_timeout_seconds: default_http_timeout_seconds(),
            http_max_in_flight: default_http_max_in_flight(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_database_path")]
    pub database_path: String,
}

fn default_database_path() -> String {
    "~/.ems/ems.sqlite3".to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: Provider,
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_llm_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default = "default_classify_temperature")]
    pub classify_temperature: f32,
    #[serde(default = "default_answer_temperature")]
    pub answer_temperature: f32,
}

fn default_provider() -> Provider {
    Provider::Ollama
}

fn default_llm_base_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_model() -> String {
    "llama3.1:latest".to_string()
}

fn default_llm_timeout_seconds() -> u64 {
    90
}

fn default_classify_temperature() -> f32 {
    0.1
}

fn default_answer_temperature() -> f32 {
    0.2
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            base_url: default_llm_base_url(),
            model: default_model(),
            api_key: String::new(),
            timeout_seconds: default_llm_timeout_seconds(),
            classify_temperature: default_classify_temperature(),
            answer_temperature: default_answer_temperature(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssistantConfig {
    #[serde(default = "default_pending_ttl_minutes")]
    pub pending_ttl_minutes: u32,
    /// Seconds between sweeps of expired pending actions. Zero disables it.
    #[serde(default = "default_sweep_interval_seconds")]
    pub sweep_interval_seconds: u64,
    #[serde(default = "default_upcoming_events_limit")]
    pub upcoming_events_limit: usize,
    #[serde(default = "default_bookings_limit")]
    pub bookings_limit: usize,
    #[serde(default = "default_organizer_events_limit")]
    pub organizer_events_limit: usize,
}

fn default_pending_ttl_minutes() -> u32 {
    5
}

fn default_sweep_interval_seconds() -> u64 {
    60
}

fn default_upcoming_events_limit() -> usize {
    20
}

fn default_bookings_limit() -> usize {
    20
}

fn default_organizer_events_limit() -> usize {
    30
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            pending_ttl_minutes: default_pending_ttl_minutes(),
            sweep_interval_seconds: default_sweep_interval_seconds(),
            upcoming_events_limit: default_upcoming_events_limit(),
            bookings_limit: default_bookings_limit(),
            organizer_events_limit: default_organizer_events_limit(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SecurityConfig {
    /// Bearer token required on chat routes when non-empty.
    #[serde(default)]
    pub api_token: String,
}

impl SecurityConfig {
    pub fn api_token(&self) -> Option<&str> {
        Some(self.api_token.trim()).filter(|t| !t.is_empty())
    }
}

impl EmsConfig {
    pub async fn load(path: Option<PathBuf>) -> anyhow::Result<Self> {
        Ok(Self::load_with_path(path).await?.0)
    }

    pub async fn load_with_path(path: Option<PathBuf>) -> anyhow::Result<(Self, PathBuf)> {
        let path = path.unwrap_or_else(default_config_path);
        let contents = tokio::fs::read_to_string(&path).await.map_err(|e| {
            anyhow::anyhow!(
                "read config {}: {e} (run `ems init` to create one)",
                path.display()
            )
        })?;
        let mut cfg = Self::from_toml_str(&contents)
            .map_err(|e| anyhow::anyhow!("parse config {}: {e}", path.display()))?;
        cfg.apply_env_overrides(|key| std::env::var(key).ok());
        cfg.validate()?;
        Ok((cfg, path))
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = var("EMS_BIND_ADDR") {
            self.server.bind_addr = v;
        }
        if let Some(v) = var("EMS_DATABASE_PATH") {
            self.store.database_path = v;
        }
        if let Some(v) = var("EMS_LLM_PROVIDER") {
            match v.parse::<Provider>() {
                Ok(provider) => self.llm.provider = provider,
                Err(e) => tracing::warn!(error = %e, "ignoring EMS_LLM_PROVIDER override"),
            }
        }
        if let Some(v) = var("EMS_LLM_BASE_URL") {
            self.llm.base_url = v;
        }
        if let Some(v) = var("EMS_MODEL") {
            self.llm.model = v;
        }
        if let Some(v) = var("OPENAI_API_KEY") {
            self.llm.api_key = v;
        }
        if let Some(v) = var("EMS_API_TOKEN") {
            self.security.api_token = v;
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.bind_addr()?;
        if self.server.http_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("server.http_timeout_seconds must be > 0"));
        }
        if self.server.http_max_in_flight == 0 {
            return Err(anyhow::anyhow!("server.http_max_in_flight must be > 0"));
        }
        if self.store.database_path.trim().is_empty() {
            return Err(anyhow::anyhow!("store.database_path is required"));
        }
        if self.llm.model.trim().is_empty() {
            return Err(anyhow::anyhow!("llm.model is required"));
        }
        if self.llm.base_url.trim().is_empty() {
            return Err(anyhow::anyhow!("llm.base_url is required"));
        }
        if self.llm.timeout_seconds == 0 {
            return Err(anyhow::anyhow!("llm.timeout_seconds must be > 0"));
        }
        if self.llm.provider == Provider::OpenAi && self.llm.api_key.trim().is_empty() {
            return Err(anyhow::anyhow!(
                "llm.provider = \"openai\" requires llm.api_key or OPENAI_API_KEY"
            ));
        }
        for (name, value) in [
            ("llm.classify_temperature", self.llm.classify_temperature),
            ("llm.answer_temperature", self.llm.answer_temperature),
        ] {
            if !(0.0..=2.0).contains(&value) {
                return Err(anyhow::anyhow!("{name} must be within 0.0..=2.0"));
            }
        }
        if self.assistant.pending_ttl_minutes == 0 {
            return Err(anyhow::anyhow!("assistant.pending_ttl_minutes must be > 0"));
        }
        for (name, value) in [
            ("assistant.upcoming_events_limit", self.assistant.upcoming_events_limit),
            ("assistant.bookings_limit", self.assistant.bookings_limit),
            ("assistant.organizer_events_limit", self.assistant.organizer_events_limit),
        ] {
            if value == 0 {
                return Err(anyhow::anyhow!("{name} must be > 0"));
            }
        }
        // A free-text message can make two sequential completions.
        if self.server.http_timeout_seconds <= self.llm.timeout_seconds.saturating_mul(2) {
            return Err(anyhow::anyhow!(
                "server.http_timeout_seconds ({}) must exceed twice llm.timeout_seconds ({})",
                self.server.http_timeout_seconds,
                self.llm.timeout_seconds
            ));
        }
        Ok(())
    }

    /// Time allowed to produce a chat reply before answering with a fallback,
    /// kept just under the HTTP timeout so the client always gets a body.
    pub fn reply_budget(&self) -> Duration {
        Duration::from_secs(self.server.http_timeout_seconds).saturating_sub(REPLY_MARGIN)
    }

    pub fn bind_addr(&self) -> anyhow::Result<SocketAddr> {
        self.server
            .bind_addr
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("server.bind_addr {:?}: {e}", self.server.bind_addr))
    }
}

pub fn default_config_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    Path::new(&home).join(".ems").join("config.toml")
}

/// Expands a leading `~/` against `$HOME`.
pub fn expand_home(path: &str) -> anyhow::Result<PathBuf> {
    let trimmed = path.trim();
    let Some(rest) = trimmed.strip_prefix("~/") else {
        return Ok(PathBuf::from(trimmed));
    };
    let home = std::env::var("HOME").map_err(|_| anyhow::anyhow!("HOME is not set"))?;
    Ok(Path::new(&home).join(rest))
}
