use crate::assistant::{Assistant, AssistantSettings, ContextLimits};
use crate::config::{EmsConfig, expand_home};
use crate::http_auth::{self, AuthPolicy};
use crate::routes;
use anyhow::Result;
use axum::Extension;
use axum::Router;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::response::Response;
use chrono::{DateTime, Utc};
use ems_llm::LlmClient;
use ems_store::{OrganizerStatus, Store};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tower::limit::GlobalConcurrencyLimitLayer;
use tower_http::classify::ServerErrorsFailureClass;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

pub struct AppState {
    pub store: Store,
    pub assistant: Arc<Assistant>,
    pub started_at: DateTime<Utc>,
    /// How long a chat request may wait for its reply before the fallback.
    pub reply_budget: Duration,
}

impl AppState {
    pub fn new(store: Store, assistant: Assistant) -> Self {
        Self {
            store,
            assistant: Arc::new(assistant),
            started_at: Utc::now(),
            reply_budget: EmsConfig::default().reply_budget(),
        }
    }

    pub fn with_reply_budget(mut self, reply_budget: Duration) -> Self {
        self.reply_budget = reply_budget;
        self
    }
}

pub fn assistant_settings(cfg: &EmsConfig) -> AssistantSettings {
    AssistantSettings {
        pending_ttl_minutes: cfg.assistant.pending_ttl_minutes,
        classify_temperature: cfg.llm.classify_temperature,
        answer_temperature: cfg.llm.answer_temperature,
        context_limits: ContextLimits {
            upcoming_events: cfg.assistant.upcoming_events_limit,
            bookings: cfg.assistant.bookings_limit,
            organizer_events: cfg.assistant.organizer_events_limit,
        },
    }
}

fn build_llm_client(cfg: &EmsConfig) -> Result<LlmClient> {
    Ok(LlmClient::new(
        cfg.llm.provider,
        &cfg.llm.base_url,
        &cfg.llm.api_key,
        &cfg.llm.model,
        Duration::from_secs(cfg.llm.timeout_seconds),
    )?)
}

async fn open_store(cfg: &EmsConfig) -> Result<Store> {
    let path = expand_home(&cfg.store.database_path)?;
    Ok(Store::open(path).await?)
}

async fn build_state(cfg: &EmsConfig) -> Result<Arc<AppState>> {
    let store = open_store(cfg).await?;
    let llm = Arc::new(build_llm_client(cfg)?);
    let assistant = Assistant::new(store.clone(), llm, assistant_settings(cfg));
    Ok(Arc::new(
        AppState::new(store, assistant).with_reply_budget(cfg.reply_budget()),
    ))
}

/// Health is public; chat routes require an identity.
pub fn app_router(state: Arc<AppState>, policy: AuthPolicy) -> Router {
    let identified = routes::identified_router()
        .route_layer(axum::middleware::from_fn(http_auth::require_identity))
        .layer(Extension(http_auth::AuthPolicyExt(policy)));
    routes::public_router()
        .merge(identified)
        .layer(Extension(state))
}

pub async fn doctor(config_path: Option<PathBuf>) -> Result<()> {
    let (cfg, path) = EmsConfig::load_with_path(config_path).await?;
    let client = build_llm_client(&cfg)?;
    let store = open_store(&cfg).await?;
    store.ping().await?;
    tracing::info!(
        config_path = %path.display(),
        bind_addr = %cfg.bind_addr()?,
        database = %store.location(),
        provider = ?client.provider(),
        model = %client.model(),
        pending_ttl_minutes = cfg.assistant.pending_ttl_minutes,
        api_token_configured = cfg.security.api_token().is_some(),
        "config ok"
    );
    println!("config ok: {}", path.display());
    println!("database ok: {}", store.location());
    println!("llm: {:?} {}", client.provider(), client.model());
    Ok(())
}

pub async fn chat_one_shot(
    config_path: Option<PathBuf>,
    username: &str,
    message: &str,
) -> Result<String> {
    let cfg = EmsConfig::load(config_path).await?;
    let state = build_state(&cfg).await?;
    let identity = state
        .store
        .identity_by_username(username)
        .await?
        .ok_or_else(|| anyhow::anyhow!("unknown user: {username}"))?;
    if message.trim().is_empty() {
        return Err(anyhow::anyhow!("Message is required."));
    }
    let reply = state.assistant.handle_message(&identity, message).await;
    Ok(reply.text)
}

pub async fn set_organizer_status(
    config_path: Option<PathBuf>,
    organizer_id: i64,
    status: OrganizerStatus,
) -> Result<()> {
    let cfg = EmsConfig::load(config_path).await?;
    let store = open_store(&cfg).await?;
    let organizer = store.set_organizer_status(organizer_id, status).await?;
    tracing::info!(organizer_id, status = %organizer.status, "organizer status updated");
    println!(
        "organizer {} ({}) is now {}",
        organizer.id, organizer.name, organizer.status
    );
    Ok(())
}

pub async fn purge_pending(config_path: Option<PathBuf>) -> Result<usize> {
    let cfg = EmsConfig::load(config_path).await?;
    let store = open_store(&cfg).await?;
    Ok(store.purge_expired_pending(Utc::now()).await?)
}

pub async fn serve(config_path: Option<PathBuf>) -> Result<()> {
    let (cfg, path) = EmsConfig::load_with_path(config_path).await?;
    let addr = cfg.bind_addr()?;
    tracing::info!(config_path = %path.display(), %addr, "starting ems");

    let listener = preflight_bind_listener(addr).await?;
    let state = build_state(&cfg).await?;

    let shutdown = CancellationToken::new();
    let sweeper = spawn_pending_sweeper(
        state.clone(),
        Duration::from_secs(cfg.assistant.sweep_interval_seconds),
        shutdown.child_token(),
    );

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(|request: &Request<_>| {
            tracing::info_span!(
                "http.request",
                method = %request.method(),
                uri = %request.uri(),
                version = ?request.version(),
                request_id = %request_id_from_headers(request.headers())
            )
        })
        .on_request(|request: &Request<_>, _span: &tracing::Span| {
            tracing::info!(
                method = %request.method(),
                uri = %request.uri(),
                request_id = %request_id_from_headers(request.headers()),
                "http request started"
            );
        })
        .on_response(
            |response: &Response, latency: Duration, _span: &tracing::Span| {
                tracing::info!(
                    status = response.status().as_u16(),
                    latency_ms = latency.as_millis() as u64,
                    "http request completed"
                );
            },
        )
        .on_failure(
            |error: ServerErrorsFailureClass, latency: Duration, _span: &tracing::Span| {
                tracing::error!(
                    error_class = %error,
                    latency_ms = latency.as_millis() as u64,
                    "http request failed"
                );
            },
        );

    let app = app_router(state, AuthPolicy::from_config(&cfg))
        .layer(GlobalConcurrencyLimitLayer::new(cfg.server.http_max_in_flight))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(cfg.server.http_timeout_seconds),
        ))
        .layer(trace_layer)
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid));

    tracing::info!(%addr, reply_budget_ms = cfg.reply_budget().as_millis() as u64, "ems serving");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;
    tracing::info!("http server shutdown completed");

    shutdown.cancel();
    if let Some(handle) = sweeper {
        match handle.await {
            Ok(()) => tracing::info!("pending sweeper stopped"),
            Err(e) => tracing::error!(error = %e, "pending sweeper join failed during shutdown"),
        }
    }
    Ok(())
}

/// Periodically removes expired pending actions and idle identity locks.
/// A zero period disables the sweep; lazy expiry still applies.
fn spawn_pending_sweeper(
    state: Arc<AppState>,
    period: Duration,
    shutdown: CancellationToken,
) -> Option<JoinHandle<()>> {
    if period.is_zero() {
        tracing::info!("pending sweeper disabled");
        return None;
    }
    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    sweep_once(&state, Utc::now()).await;
                }
            }
        }
    }))
}

async fn sweep_once(state: &AppState, now: DateTime<Utc>) -> usize {
    let purged = match state.store.purge_expired_pending(now).await {
        Ok(purged) => purged,
        Err(e) => {
            tracing::error!(error = %e, "pending sweep failed");
            0
        }
    };
    let pruned = state.assistant.prune_idle_locks();
    if purged > 0 || pruned > 0 {
        tracing::info!(purged, pruned_locks = pruned, "pending sweep completed");
    }
    purged
}

async fn preflight_bind_listener(addr: SocketAddr) -> Result<tokio::net::TcpListener> {
    tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| anyhow::anyhow!("bind {addr}: {e} (is another ems instance running?)"))
}

fn request_id_from_headers(headers: &HeaderMap) -> String {
    headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
        .unwrap_or_else(|| "missing".to_string())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut terminate = match signal(SignalKind::terminate()) {
            Ok(sig) => sig,
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler; falling back to ctrl_c only");
                if let Err(ctrlc_err) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %ctrlc_err, "failed to await ctrl-c signal");
                }
                shutdown.cancel();
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!("received ctrl-c; beginning graceful shutdown");
            }
            _ = terminate.recv() => {
                tracing::warn!("received SIGTERM; beginning graceful shutdown");
            }
            _ = shutdown.cancelled() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::select! {
            result = tokio::signal::ctrl_c() => match result {
                Ok(()) => tracing::warn!("received ctrl-c; beginning graceful shutdown"),
                Err(e) => tracing::error!(error = %e, "failed to await ctrl-c signal"),
            },
            _ = shutdown.cancelled() => {}
        }
    }
    shutdown.cancel();
}
