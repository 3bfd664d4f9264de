//! OpenID login service
//!
//! Single-binary Rust service that:
//! 1. Loads the relying party configuration (realm, stores, discovery table)
//! 2. Serves `/login`, which redirects the user agent to its OpenID provider
//! 3. Serves `/return`, which verifies the provider's assertion
//! 4. Prunes expired associations and nonces in the background

mod config;
mod error;
mod login;
mod metrics;
mod service;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::{Query, State};
use axum::http::{Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use discovery::{Discovery, HtmlDiscovery, StaticDiscovery};
use openid_auth::TokenCodec;
use openid_rp::{
    AssociationStore, FileAssociationStore, HttpChannel, MemoryAssociationStore, MemoryNonceStore,
    RelyingParty, spawn_cleanup_task,
};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use metrics_exporter_prometheus::PrometheusHandle;

use crate::config::{Config, StoreKind};
use crate::login::{LoginParams, LoginState};
use crate::service::{DRAIN_TIMEOUT, ServiceMetrics};

/// Shared application state accessible from all handlers
#[derive(Clone)]
struct AppState {
    login: LoginState,
    prometheus: PrometheusHandle,
}

/// Build the axum router with all routes and shared state.
///
/// Applies a concurrency limit layer based on `max_connections`.
fn build_router(state: AppState, max_connections: usize) -> Router {
    Router::new()
        .route("/login", get(login_handler))
        .route("/return", get(return_handler).post(return_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

/// Wire discovery, stores, and the direct channel from configuration.
async fn build_relying_party(config: &Config) -> Result<RelyingParty> {
    let rp_config = &config.relying_party;
    let settings = rp_config.security.clone();
    let client = reqwest::Client::new();

    let direct_timeout = settings
        .direct_request_timeout
        .to_std()
        .context("direct_request_timeout must not be negative")?;

    let discovery: Arc<dyn Discovery> = if config.discovery.endpoints.is_empty() {
        Arc::new(HtmlDiscovery::new(
            client.clone(),
            Duration::from_secs(config.discovery.timeout_secs),
        ))
    } else {
        let table = StaticDiscovery::new();
        for row in &config.discovery.endpoints {
            table
                .insert(&row.identifier, row.to_endpoint()?)
                .with_context(|| format!("invalid discovery identifier {}", row.identifier))?;
        }
        info!(identifiers = table.len(), "using static discovery table");
        Arc::new(table)
    };

    let associations: Arc<dyn AssociationStore> = match rp_config.store {
        StoreKind::Memory => Arc::new(MemoryAssociationStore::new()),
        StoreKind::File => {
            let path = rp_config
                .store_path
                .clone()
                .context("store = \"file\" requires store_path")?;
            let store = FileAssociationStore::load(path.clone())
                .await
                .with_context(|| format!("failed to open association store {}", path.display()))?;
            Arc::new(store)
        }
    };
    let nonces = Arc::new(MemoryNonceStore::new(
        settings.maximum_message_age + settings.maximum_clock_skew,
    ));

    let token_codec = match &rp_config.token_key {
        Some(key) => TokenCodec::new(key.expose().clone())?,
        None => {
            warn!("no token key configured; 1.x logins will not survive a restart");
            TokenCodec::generate()
        }
    };

    Ok(RelyingParty::new(
        discovery,
        associations,
        nonces,
        Arc::new(HttpChannel::new(client, direct_timeout)),
        token_codec,
        settings,
    ))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting openid-login");

    // Install Prometheus metrics recorder before any metrics are emitted
    let prometheus_handle = metrics::install_recorder();

    // CLI: simple --config flag parsing
    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;
    let realm = config.realm()?;
    let return_to = config.return_to()?;

    info!(
        listen_addr = %config.server.listen_addr,
        realm = %realm,
        return_to = %return_to,
        store = ?config.relying_party.store,
        static_endpoints = config.discovery.endpoints.len(),
        "configuration loaded"
    );

    let rp = Arc::new(build_relying_party(&config).await?);

    let cleanup_task = spawn_cleanup_task(
        rp.association_store(),
        rp.nonce_store(),
        Duration::from_secs(config.relying_party.cleanup_interval_secs),
    );

    let service_metrics = ServiceMetrics::new();
    let in_flight = service_metrics.in_flight.clone();

    let app_state = AppState {
        login: LoginState {
            rp,
            realm,
            return_to,
            metrics: service_metrics,
        },
        prometheus: prometheus_handle,
    };

    let app = build_router(app_state, config.server.max_connections);

    let listen_addr = config.server.listen_addr;
    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind to {listen_addr}"))?;
    info!(addr = %listen_addr, "accepting requests");

    // The drain timeout starts when the shutdown signal fires, not when the
    // server starts.
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    shutdown_signal().await;
    let _ = shutdown_tx.send(());

    match tokio::time::timeout(DRAIN_TIMEOUT, server_handle).await {
        Ok(Ok(Ok(()))) => {
            info!("all in-flight requests drained");
        }
        Ok(Ok(Err(e))) => {
            error!(error = %e, "server error during shutdown");
        }
        Ok(Err(e)) => {
            error!(error = %e, "server task panicked");
        }
        Err(_) => {
            let remaining = in_flight.load(Ordering::Relaxed);
            warn!(
                remaining,
                drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
                "drain timeout exceeded, forcing shutdown"
            );
        }
    }

    cleanup_task.abort();
    info!("shutdown complete");
    Ok(())
}

fn request_id() -> String {
    format!("req_{}", uuid::Uuid::new_v4().as_simple())
}

/// Start a login: 302 to the provider, or a JSON error.
async fn login_handler(
    State(state): State<AppState>,
    Query(params): Query<LoginParams>,
) -> Response {
    let started = Instant::now();
    let _in_flight = state.login.metrics.track();
    let request_id = request_id();

    let response = match login::begin_login(&state.login, params, &request_id).await {
        Ok(redirect) => (
            StatusCode::FOUND,
            [(axum::http::header::LOCATION, redirect.url.to_string())],
        )
            .into_response(),
        Err(e) => {
            state.login.metrics.errors_total.fetch_add(1, Ordering::Relaxed);
            warn!(request_id = %request_id, error = %e, "login failed");
            e.into_response_with_id(&request_id)
        }
    };

    metrics::record_request(
        "login",
        response.status().as_u16(),
        started.elapsed().as_secs_f64(),
    );
    response
}

/// Provider callback; accepts both redirect (GET) and form-post (POST) answers.
async fn return_handler(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    body: String,
) -> Response {
    let started = Instant::now();
    let _in_flight = state.login.metrics.track();
    let request_id = request_id();

    let response =
        match login::incoming_request(&state.login.return_to, &method, &uri, &body) {
            Ok(incoming) => {
                let (status, body) =
                    login::complete_login(&state.login, &incoming, &request_id).await;
                (
                    status,
                    [(axum::http::header::CONTENT_TYPE, "application/json")],
                    body.to_string(),
                )
                    .into_response()
            }
            Err(e) => e.into_response_with_id(&request_id),
        };

    metrics::record_request(
        "return",
        response.status().as_u16(),
        started.elapsed().as_secs_f64(),
    );
    response
}

/// Health endpoint: JSON with uptime, login counters, and store sizes.
/// Returns 503 when a store cannot be read.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let login = &state.login;
    let uptime = login.metrics.started_at.elapsed().as_secs();
    let associations = login.rp.association_store().len().await;
    let nonces = login.rp.nonce_store().len().await;

    let (status_code, body) = match (associations, nonces) {
        (Ok(associations), Ok(nonces)) => (
            StatusCode::OK,
            serde_json::json!({
                "status": "healthy",
                "uptime_seconds": uptime,
                "logins_started": login.metrics.logins_started.load(Ordering::Relaxed),
                "logins_completed": login.metrics.logins_completed.load(Ordering::Relaxed),
                "errors_total": login.metrics.errors_total.load(Ordering::Relaxed),
                "associations": associations,
                "nonces": nonces,
            }),
        ),
        (Err(e), _) | (_, Err(e)) => (
            StatusCode::SERVICE_UNAVAILABLE,
            serde_json::json!({
                "status": "degraded",
                "uptime_seconds": uptime,
                "error": e.to_string(),
            }),
        ),
    };

    (
        status_code,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

/// Prometheus metrics endpoint, text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
