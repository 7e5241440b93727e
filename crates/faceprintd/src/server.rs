//! Router assembly, startup, and graceful shutdown.

use crate::config::Config;
use crate::middleware::request_id;
use crate::routes::{api_info, faces, health, not_found};
use crate::state::AppState;
use anyhow::Context;
use axum::extract::DefaultBodyLimit;
use axum::http::StatusCode;
use axum::middleware::from_fn;
use axum::routing::{get, post};
use axum::Router;
use faceprint_core::{BackendAdapter, CorpusStore, FaceService};
use faceprint_store::SqliteCorpus;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

/// Build the router with all routes and middleware.
///
/// Layers run outermost first: tracing, request id, CORS, timeout, body limit.
pub fn build_router(state: AppState) -> Router {
    let config = Arc::clone(&state.config);

    let cors = if config.cors_enabled {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        CorsLayer::new()
    };

    Router::new()
        .route("/", get(api_info))
        .route("/health", get(health::health_check))
        .route("/register", post(faces::register))
        .route("/verify", post(faces::verify))
        .route("/faces/{id}", get(faces::get_face))
        .fallback(not_found)
        .layer(DefaultBodyLimit::max(config.max_body_bytes()))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            config.request_timeout(),
        ))
        .layer(cors)
        .layer(from_fn(request_id))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Open the corpus, prepare the backend adapter, and serve until shutdown.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let store = SqliteCorpus::open(&config.db_path)
        .with_context(|| format!("opening corpus at {}", config.db_path.display()))?;
    store
        .bind_backend(&config.backend.to_string())
        .context("corpus backend check")?;

    let loader = config.backend.loader(&config.model_dir);
    let adapter = Arc::new(BackendAdapter::new(loader).with_pool_size(config.model_pool_size));

    if config.warm_up {
        let adapter = Arc::clone(&adapter);
        match tokio::task::spawn_blocking(move || adapter.warm_up()).await? {
            Ok(()) => tracing::info!("face model warmed up"),
            // Not fatal: initialization is retried on the next request.
            Err(err) => tracing::warn!(error = %err, "warm-up failed; will retry on first request"),
        }
    }

    let store: Arc<dyn CorpusStore> = Arc::new(store);
    let service = FaceService::new(adapter, store, config.similarity_threshold);

    let addr = config.bind_addr;
    tracing::info!(
        addr = %addr,
        db = %config.db_path.display(),
        backend = %config.backend,
        model_dir = %config.model_dir.display(),
        threshold = config.similarity_threshold,
        pool_size = config.model_pool_size,
        "faceprintd starting"
    );
    tracing::info!(
        timeout_secs = config.request_timeout_secs,
        max_body_mb = config.max_body_mb,
        cors = config.cors_enabled,
        "http limits"
    );

    let app = build_router(AppState::new(config, service));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("faceprintd stopped");
    Ok(())
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!(error = %err, "cannot listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received Ctrl+C, shutting down"),
        _ = terminate => tracing::info!("received SIGTERM, shutting down"),
    }
}
