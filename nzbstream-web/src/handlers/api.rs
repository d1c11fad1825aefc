//! JSON API for publishing, inspecting and retrying streams

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use nzbstream_core::acquisition::StreamInspection;
use nzbstream_core::{RequestHash, StreamMetadata};
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use crate::server::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishResponse {
    pub key: String,
    pub stream_url: String,
}

/// `POST /api/streams`: stores metadata for a search result.
pub async fn publish_stream(
    State(state): State<AppState>,
    Json(metadata): Json<StreamMetadata>,
) -> Result<Json<PublishResponse>, StatusCode> {
    if metadata.download_url.trim().is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let key = state.acquisition.publish(&metadata).await.map_err(|e| {
        warn!("Failed to publish '{}': {}", metadata.title, e);
        StatusCode::SERVICE_UNAVAILABLE
    })?;

    Ok(Json(PublishResponse {
        stream_url: format!(
            "{}/stream?key={}",
            state.public_url.trim_end_matches('/'),
            key
        ),
        key: key.as_str().to_string(),
    }))
}

/// `GET /api/streams/{key}`: what the store and this process know.
pub async fn inspect_stream(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<StreamInspection>, StatusCode> {
    match state.acquisition.inspect(&RequestHash::new(key)).await {
        Ok(Some(inspection)) => Ok(Json(inspection)),
        Ok(None) => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            warn!("Inspect failed: {}", e);
            Err(StatusCode::SERVICE_UNAVAILABLE)
        }
    }
}

/// `DELETE /api/streams/{key}`: forgets the stream so the next request retries.
pub async fn delete_stream(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let request_hash = RequestHash::new(key);
    match state.acquisition.invalidate(&request_hash).await {
        Ok(content_hash) => {
            info!(request = %request_hash, "Stream invalidated via API");
            Ok(Json(json!({
                "key": request_hash.as_str(),
                "contentHash": content_hash.as_ref().map(|h| h.as_str()),
                "invalidated": true,
            })))
        }
        Err(e) => {
            warn!("Invalidate failed: {}", e);
            Err(StatusCode::SERVICE_UNAVAILABLE)
        }
    }
}

/// `GET /health`
pub async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let (metadata_entries, playable_entries) = state.acquisition.cache().entry_counts();
    Json(json!({
        "status": "ok",
        "uptimeSeconds": state.started_at.elapsed().as_secs(),
        "cache": {
            "metadataEntries": metadata_entries,
            "playableEntries": playable_entries,
        },
    }))
}
