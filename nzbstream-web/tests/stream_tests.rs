//! End-to-end tests of `/stream` against a loopback WebDAV share.

mod common;

use std::time::Duration;

use axum::body::Body;
use axum::http::header::{
    ACCEPT_RANGES, CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, RANGE,
};
use axum::http::{Method, Request, StatusCode};
use common::{
    EMPTY_PATH, MOVIE_PATH, READ_TIMEOUT, STALLED_PATH, TestApp, body_bytes, movie_bytes,
};
use nzbstream_core::{AcquisitionRecord, StateStore};
use nzbstream_web::FAILURE_HEADER;

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn ranged(uri: &str, range: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(RANGE, range)
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn test_range_request_relays_partial_content() {
    let app = TestApp::with_ready(MOVIE_PATH).await;

    let response = app.send(ranged(&app.stream_uri(), "bytes=100-199")).await;

    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    let headers = response.headers().clone();
    assert_eq!(headers[CONTENT_RANGE], "bytes 100-199/1000");
    assert_eq!(headers[CONTENT_LENGTH], "100");
    assert_eq!(headers[ACCEPT_RANGES], "bytes");
    assert_eq!(headers[CONTENT_TYPE], "video/x-matroska");
    assert_eq!(
        headers[CONTENT_DISPOSITION],
        "inline; filename=\"movie.mkv\"; filename*=UTF-8''movie.mkv"
    );
    assert_eq!(headers["access-control-allow-origin"], "*");
    assert!(headers.get(FAILURE_HEADER).is_none());

    let body = body_bytes(response).await;
    assert_eq!(body, movie_bytes()[100..200].to_vec());
    assert_eq!(app.backend.submit_count(), 0);
}

#[tokio::test]
async fn test_full_request_streams_whole_file() {
    let app = TestApp::with_ready(MOVIE_PATH).await;

    let response = app.send(get(&app.stream_uri())).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await, movie_bytes());
}

#[tokio::test]
async fn test_head_is_emulated_with_ranged_get() {
    let app = TestApp::with_ready(MOVIE_PATH).await;

    let request = Request::builder()
        .method(Method::HEAD)
        .uri(app.stream_uri())
        .body(Body::empty())
        .unwrap();
    let response = app.send(request).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[CONTENT_LENGTH], "1000");
    assert!(response.headers().get(CONTENT_RANGE).is_none());
    assert_eq!(response.headers()[ACCEPT_RANGES], "bytes");
    assert!(body_bytes(response).await.is_empty());
}

#[tokio::test]
async fn test_unknown_key_serves_failure_video() {
    let app = TestApp::with_ready(MOVIE_PATH).await;

    let response = app.send(get("/stream?key=does-not-exist")).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[CONTENT_TYPE], "video/mp4");
    let failure = response.headers()[FAILURE_HEADER].to_str().unwrap();
    assert!(failure.contains("expired or unknown"), "{failure}");
    assert!(!body_bytes(response).await.is_empty());
}

#[tokio::test]
async fn test_missing_key_serves_failure_video() {
    let app = TestApp::new().await;

    let response = app.send(get("/stream")).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[FAILURE_HEADER], "Missing stream key");
}

#[tokio::test]
async fn test_failure_video_honours_range() {
    let app = TestApp::new().await;

    let response = app.send(ranged("/stream?key=nope", "bytes=0-7")).await;

    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(response.headers()[CONTENT_RANGE], "bytes 0-7/32");
    assert!(response.headers().contains_key(FAILURE_HEADER));
}

#[tokio::test]
async fn test_other_methods_are_rejected() {
    let app = TestApp::with_ready(MOVIE_PATH).await;

    let request = Request::builder()
        .method(Method::POST)
        .uri(app.stream_uri())
        .body(Body::empty())
        .unwrap();
    let response = app.send(request).await;

    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn test_failed_record_message_reaches_header() {
    let app = TestApp::new().await;
    app.store
        .write_record(
            &app.content_hash,
            &AcquisitionRecord::failed(Some("nzo_1".to_string()), "Repair failed"),
            Duration::from_secs(60),
        )
        .await
        .unwrap();

    let response = app.send(get(&app.stream_uri())).await;

    assert_eq!(response.headers()[FAILURE_HEADER], "Repair failed");
    assert_eq!(app.backend.submit_count(), 0);
}

#[tokio::test]
async fn test_vanished_file_invalidates_record() {
    let app = TestApp::with_ready("/content/movies/Job/gone.mkv").await;

    let response = app.send(get(&app.stream_uri())).await;

    assert_eq!(response.status(), StatusCode::OK);
    let failure = response.headers()[FAILURE_HEADER].to_str().unwrap();
    assert!(failure.contains("404"), "{failure}");

    let mut cleared = false;
    for _ in 0..50 {
        if app.store.load_record(&app.content_hash).await.unwrap().is_none() {
            cleared = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(cleared, "stale record was not invalidated");
}

#[tokio::test]
async fn test_empty_upstream_body_serves_failure_video() {
    let app = TestApp::with_ready(EMPTY_PATH).await;

    let response = app.send(get(&app.stream_uri())).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[FAILURE_HEADER], "Remote file is empty");
    assert!(app.store.load_record(&app.content_hash).await.unwrap().is_some());
}

#[tokio::test]
async fn test_stalled_upstream_serves_failure_video() {
    let app = TestApp::with_ready(STALLED_PATH).await;

    let started = std::time::Instant::now();
    let response = app.send(get(&app.stream_uri())).await;

    assert!(started.elapsed() < READ_TIMEOUT * 10);
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[FAILURE_HEADER],
        "Remote filesystem timed out"
    );
    assert!(app.store.load_record(&app.content_hash).await.unwrap().is_some());
}
