//! The `/stream` endpoint.

use axum::extract::{Query, State};
use axum::http::{HeaderMap, Method};
use axum::response::Response;
use nzbstream_core::{RequestHash, RequestedEpisode};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, warn};

use crate::server::AppState;

/// Query parameters of `/stream`. Numbers arrive as text so a malformed
/// value degrades to "not given" instead of rejecting the request.
#[derive(Debug, Default, Deserialize)]
pub struct StreamQuery {
    pub key: Option<String>,
    pub season: Option<String>,
    pub episode: Option<String>,
}

impl StreamQuery {
    pub fn requested_episode(&self) -> Option<RequestedEpisode> {
        let parse = |value: &Option<String>| value.as_deref().and_then(|v| v.trim().parse().ok());
        RequestedEpisode::from_parts(parse(&self.season), parse(&self.episode))
    }
}

/// Streams the file behind `key`, acquiring it first if needed.
///
/// Every failure is answered with the failure video so players never see a
/// raw error body.
pub async fn stream_media(
    State(state): State<AppState>,
    method: Method,
    Query(query): Query<StreamQuery>,
    headers: HeaderMap,
) -> Response {
    let Some(key) = query.key.as_deref().map(str::trim).filter(|k| !k.is_empty()) else {
        return state
            .fallback
            .respond(&method, &headers, "Missing stream key");
    };
    let request_hash = RequestHash::new(key);
    let episode = query.requested_episode();

    // Cancelled when this future is dropped, i.e. the client went away
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();

    let file = match state
        .acquisition
        .acquire(&request_hash, episode, &cancel)
        .await
    {
        Ok(file) => file,
        Err(e) => {
            info!(request = %request_hash, "Serving failure video: {}", e);
            return state.fallback.respond(&method, &headers, &e.diagnostic());
        }
    };

    match state.proxy.serve(&method, &file, &headers).await {
        Ok(response) => response,
        Err(e) => {
            warn!(
                request = %request_hash,
                path = %file.view_path,
                "Upstream failed: {}",
                e
            );
            if e.is_gone() {
                let acquisition = state.acquisition.clone();
                let content_hash = file.content_hash.clone();
                tokio::spawn(
                    async move {
                        if let Err(e) = acquisition.invalidate_content(&content_hash).await {
                            warn!("Failed to invalidate stale record: {}", e);
                        } else {
                            debug!("Invalidated record for vanished file");
                        }
                    }
                    .in_current_span(),
                );
            }
            state.fallback.respond(&method, &headers, &e.diagnostic())
        }
    }
}
