//! Shared fixtures: a loopback WebDAV file server and an app over mocks.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::body::Body;
use axum::http::header::{CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, RANGE};
use axum::http::{HeaderMap, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use nzbstream_core::store::SharedStore;
use nzbstream_core::test_mocks::{MockBackend, MockRemoteFs, RecordingHealthReporter};
use nzbstream_core::{
    AcquisitionRecord, AcquisitionService, ContentHash, ContentType, InMemoryStore,
    NzbStreamConfig, RequestHash, StateStore, StreamMetadata,
};
use nzbstream_web::handlers::range::{RangeOutcome, content_range, parse_range_header};
use nzbstream_web::{AppState, FailureStream, StreamingProxy, build_router};
use tower::ServiceExt;

pub const MOVIE_PATH: &str = "/content/movies/Job/movie.mkv";
pub const EMPTY_PATH: &str = "/content/movies/Job/empty.mkv";
pub const STALLED_PATH: &str = "/content/movies/Job/stalled.mkv";
pub const READ_TIMEOUT: Duration = Duration::from_millis(500);
pub const MOVIE_SIZE: usize = 1000;

pub fn movie_bytes() -> Vec<u8> {
    (0..MOVIE_SIZE).map(|i| (i % 251) as u8).collect()
}

async fn serve_movie(headers: HeaderMap) -> Response {
    let data = movie_bytes();
    let total = data.len() as u64;
    let outcome = headers
        .get(RANGE)
        .and_then(|v| v.to_str().ok())
        .map(|range| parse_range_header(range, total))
        .unwrap_or(RangeOutcome::Full);

    match outcome {
        RangeOutcome::Full => (
            [(CONTENT_TYPE, "application/octet-stream".to_string())],
            data,
        )
            .into_response(),
        RangeOutcome::Partial { start, end } => (
            StatusCode::PARTIAL_CONTENT,
            [
                (CONTENT_TYPE, "application/octet-stream".to_string()),
                (CONTENT_RANGE, content_range(start, end, total)),
            ],
            data[start as usize..=end as usize].to_vec(),
        )
            .into_response(),
        RangeOutcome::Unsatisfiable => StatusCode::RANGE_NOT_SATISFIABLE.into_response(),
    }
}

async fn serve_empty() -> Response {
    ([(CONTENT_LENGTH, "0")], Vec::<u8>::new()).into_response()
}

/// Accepts the request and never answers within the read timeout.
async fn serve_stalled() -> Response {
    tokio::time::sleep(READ_TIMEOUT * 20).await;
    StatusCode::OK.into_response()
}

/// Starts the fake WebDAV share on an ephemeral port and returns its base URL.
pub async fn spawn_upstream() -> String {
    let app = Router::new()
        .route(MOVIE_PATH, get(serve_movie))
        .route(EMPTY_PATH, get(serve_empty))
        .route(STALLED_PATH, get(serve_stalled));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

pub fn movie_metadata() -> StreamMetadata {
    StreamMetadata {
        download_url: "https://indexer.example/getnzb/job".to_string(),
        title: "Job".to_string(),
        size: MOVIE_SIZE as u64,
        file_name: Some("Job.nzb".to_string()),
        content_type: ContentType::Movie,
        source_indexer: Some("indexer-a".to_string()),
        source_file_id: Some("job".to_string()),
        raw_content_id: "tt0000001".to_string(),
    }
}

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub store: Arc<InMemoryStore>,
    pub backend: Arc<MockBackend>,
    pub request_hash: RequestHash,
    pub content_hash: ContentHash,
}

impl TestApp {
    /// App whose movie is already published but not yet acquired.
    pub async fn new() -> Self {
        let upstream = spawn_upstream().await;
        let mut config = NzbStreamConfig::for_testing();
        config.webdav.url = upstream;
        config.server.public_url = "http://nzbstream.test".to_string();
        config.server.upstream_read_timeout = READ_TIMEOUT;

        let store = Arc::new(InMemoryStore::new());
        let backend = Arc::new(MockBackend::completing_after(1));
        let acquisition = AcquisitionService::new(
            &config,
            SharedStore::from_backend(store.clone()),
            backend.clone(),
            Arc::new(MockRemoteFs::new()),
            Arc::new(RecordingHealthReporter::new()),
        );

        let state = AppState {
            acquisition,
            proxy: Arc::new(StreamingProxy::new(&config.webdav, &config.server).unwrap()),
            fallback: Arc::new(FailureStream::placeholder()),
            public_url: config.server.public_url.clone(),
            started_at: Instant::now(),
        };

        let metadata = movie_metadata();
        let request_hash = state.acquisition.publish(&metadata).await.unwrap();

        Self {
            router: build_router(state.clone()),
            state,
            store,
            backend,
            request_hash,
            content_hash: metadata.content_hash(),
        }
    }

    /// App whose movie is ready at `view_path`.
    pub async fn with_ready(view_path: &str) -> Self {
        let app = Self::new().await;
        let name = view_path.rsplit('/').next().unwrap_or_default();
        app.store
            .write_record(
                &app.content_hash,
                &AcquisitionRecord::ready(Some("nzo_1".to_string()), view_path, name),
                Duration::from_secs(60),
            )
            .await
            .unwrap();
        app
    }

    pub fn stream_uri(&self) -> String {
        format!("/stream?key={}", self.request_hash)
    }

    pub async fn send(&self, request: Request<Body>) -> Response {
        self.router.clone().oneshot(request).await.unwrap()
    }
}

pub async fn body_bytes(response: Response) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}
