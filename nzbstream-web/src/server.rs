//! HTTP server wiring for nzbstream
//!
//! Builds the collaborators from configuration, mounts the streaming and API
//! routes and runs until interrupted.

use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::routing::{get, post};
use nzbstream_core::acquisition::{TracingHealthReporter, WebhookHealthReporter};
use nzbstream_core::store::open_store;
use nzbstream_core::{
    AcquisitionService, IndexerHealthReporter, NzbStreamConfig, NzbStreamError, SabnzbdClient,
    WebDavClient,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::fallback::FailureStream;
use crate::handlers::{delete_stream, health, inspect_stream, publish_stream, stream_media};
use crate::proxy::StreamingProxy;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub acquisition: AcquisitionService,
    pub proxy: Arc<StreamingProxy>,
    pub fallback: Arc<FailureStream>,
    pub public_url: String,
    pub started_at: Instant,
}

/// Connects to the store and constructs every collaborator.
///
/// # Errors
/// - `NzbStreamError::Configuration` - Required settings are missing
/// - `NzbStreamError::Store` - Shared store is unreachable
/// - `NzbStreamError::Backend` / `NzbStreamError::WebDav` - HTTP clients failed to build
pub async fn build_state(config: &NzbStreamConfig) -> Result<AppState, Box<dyn std::error::Error>> {
    config.validate().map_err(NzbStreamError::from)?;

    let store = open_store(&config.store)
        .await
        .map_err(NzbStreamError::from)?;
    let backend = Arc::new(SabnzbdClient::new(&config.backend).map_err(NzbStreamError::from)?);
    let fs = Arc::new(WebDavClient::new(&config.webdav).map_err(NzbStreamError::from)?);

    let health: Arc<dyn IndexerHealthReporter> = match &config.acquisition.health_webhook {
        Some(url) => {
            let client = reqwest::Client::builder()
                .timeout(config.backend.request_timeout)
                .build()?;
            Arc::new(WebhookHealthReporter::new(url.clone(), client))
        }
        None => Arc::new(TracingHealthReporter),
    };

    let fallback = match &config.server.failure_video {
        Some(path) => match FailureStream::load(path).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(
                    "Failed to load failure video {}: {}; using placeholder",
                    path.display(),
                    e
                );
                FailureStream::placeholder()
            }
        },
        None => FailureStream::placeholder(),
    };

    let proxy = StreamingProxy::new(&config.webdav, &config.server)?;
    let acquisition = AcquisitionService::new(config, store, backend, fs, health);

    Ok(AppState {
        acquisition,
        proxy: Arc::new(proxy),
        fallback: Arc::new(fallback),
        public_url: config.server.public_url.clone(),
        started_at: Instant::now(),
    })
}

/// Routes for the streaming endpoint, the JSON API and health.
///
/// `/stream` answers GET and HEAD; any other method gets 405.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/stream", get(stream_media))
        .route("/api/streams", post(publish_stream))
        .route(
            "/api/streams/{key}",
            get(inspect_stream).delete(delete_stream),
        )
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serves until Ctrl-C, then stops acquisition polling.
///
/// # Errors
/// - `Box<dyn std::error::Error>` - Startup failed or the listener could not bind
pub async fn run_server(config: NzbStreamConfig) -> Result<(), Box<dyn std::error::Error>> {
    let state = build_state(&config).await?;
    let acquisition = state.acquisition.clone();
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(config.server.bind).await?;
    info!("nzbstream listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
            info!("Shutting down");
            acquisition.shutdown();
        })
        .await?;
    Ok(())
}
