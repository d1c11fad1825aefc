//! Failure video served in place of an error body.
//!
//! Media players render a broken request as a spinner or a cryptic codec
//! error. Answering with a short, valid video plus a diagnostic header keeps
//! the player UI usable and tells operators what went wrong.

use std::path::Path;

use axum::body::Body;
use axum::http::header::{
    ACCEPT_RANGES, CACHE_CONTROL, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE,
};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;

use crate::handlers::range::{RangeOutcome, content_range, extract_range_header, parse_range_header};
use crate::proxy::insert_cors_headers;

/// Response header carrying the failure diagnostic.
pub const FAILURE_HEADER: &str = "x-nzbstream-failure";

const MAX_MESSAGE_LEN: usize = 500;

/// Smallest well-formed MP4: an `ftyp` box followed by an empty `free` box.
const PLACEHOLDER_MP4: &[u8] = &[
    0x00, 0x00, 0x00, 0x18, b'f', b't', b'y', b'p', b'i', b's', b'o', b'm', 0x00, 0x00, 0x02,
    0x00, b'i', b's', b'o', b'm', b'm', b'p', b'4', b'1', 0x00, 0x00, 0x00, 0x08, b'f', b'r',
    b'e', b'e',
];

/// Failure video held in memory for the life of the process.
#[derive(Debug, Clone)]
pub struct FailureStream {
    data: Bytes,
    content_type: String,
}

impl FailureStream {
    pub fn new(data: impl Into<Bytes>, content_type: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            content_type: content_type.into(),
        }
    }

    /// Built-in placeholder used when no video is configured.
    pub fn placeholder() -> Self {
        Self::new(Bytes::from_static(PLACEHOLDER_MP4), "video/mp4")
    }

    /// Loads a video file into memory, guessing its type from the extension.
    ///
    /// # Errors
    /// - `std::io::Error` - File is missing or unreadable
    pub async fn load(path: &Path) -> std::io::Result<Self> {
        let data = tokio::fs::read(path).await?;
        let content_type = mime_guess::from_path(path)
            .first_raw()
            .unwrap_or("video/mp4");
        Ok(Self::new(data, content_type))
    }

    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Answers `method` with the failure video, honouring `Range`.
    pub fn respond(&self, method: &Method, headers: &HeaderMap, message: &str) -> Response {
        let total_size = self.len();
        let outcome = extract_range_header(headers)
            .map(|range| parse_range_header(&range, total_size))
            .unwrap_or(RangeOutcome::Full);

        let mut builder = Response::builder()
            .header(CONTENT_TYPE, self.content_type.as_str())
            .header(ACCEPT_RANGES, "bytes")
            .header(CACHE_CONTROL, "no-store")
            .header(FAILURE_HEADER, sanitize_failure_message(message));

        let body = match outcome {
            RangeOutcome::Full => {
                builder = builder
                    .status(StatusCode::OK)
                    .header(CONTENT_LENGTH, total_size);
                self.data.clone()
            }
            RangeOutcome::Partial { start, end } => {
                builder = builder
                    .status(StatusCode::PARTIAL_CONTENT)
                    .header(CONTENT_RANGE, content_range(start, end, total_size))
                    .header(CONTENT_LENGTH, outcome.body_len(total_size));
                self.data.slice(start as usize..=end as usize)
            }
            RangeOutcome::Unsatisfiable => {
                builder = builder
                    .status(StatusCode::RANGE_NOT_SATISFIABLE)
                    .header(CONTENT_RANGE, format!("bytes */{total_size}"))
                    .header(CONTENT_LENGTH, 0);
                Bytes::new()
            }
        };

        if let Some(headers) = builder.headers_mut() {
            insert_cors_headers(headers);
        }

        let body = if method == Method::HEAD {
            Body::empty()
        } else {
            Body::from(body)
        };

        builder
            .body(body)
            .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
    }
}

impl Default for FailureStream {
    fn default() -> Self {
        Self::placeholder()
    }
}

/// Makes `message` safe to carry in a header value.
///
/// Control characters are dropped, anything outside printable ASCII becomes
/// `?`, and the result is capped at 500 characters.
pub fn sanitize_failure_message(message: &str) -> HeaderValue {
    let cleaned: String = message
        .chars()
        .filter(|c| !c.is_control())
        .map(|c| if c.is_ascii() { c } else { '?' })
        .take(MAX_MESSAGE_LEN)
        .collect();
    let cleaned = cleaned.trim();

    let text = if cleaned.is_empty() {
        "unknown error"
    } else {
        cleaned
    };
    HeaderValue::from_str(text).unwrap_or_else(|_| HeaderValue::from_static("unknown error"))
}

#[cfg(test)]
mod tests {
    use axum::http::header::RANGE;
    use proptest::prelude::*;

    use super::*;

    async fn body_bytes(response: Response) -> Bytes {
        axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
    }

    fn stream() -> FailureStream {
        FailureStream::new((0u8..100).collect::<Vec<u8>>(), "video/mp4")
    }

    fn range(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(RANGE, value.parse().unwrap());
        headers
    }

    #[tokio::test]
    async fn test_full_response_carries_failure_header() {
        let response = stream().respond(&Method::GET, &HeaderMap::new(), "backend down");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[FAILURE_HEADER], "backend down");
        assert_eq!(response.headers()[CONTENT_LENGTH], "100");
        assert_eq!(response.headers()[ACCEPT_RANGES], "bytes");
        assert_eq!(response.headers()["access-control-allow-origin"], "*");
        assert_eq!(body_bytes(response).await.len(), 100);
    }

    #[tokio::test]
    async fn test_partial_response_slices_data() {
        let response = stream().respond(&Method::GET, &range("bytes=10-19"), "x");

        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(response.headers()[CONTENT_RANGE], "bytes 10-19/100");
        assert_eq!(response.headers()[CONTENT_LENGTH], "10");
        let body = body_bytes(response).await;
        assert_eq!(body.as_ref(), &(10u8..20).collect::<Vec<u8>>()[..]);
    }

    #[tokio::test]
    async fn test_unsatisfiable_range() {
        let response = stream().respond(&Method::GET, &range("bytes=500-"), "x");

        assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
        assert_eq!(response.headers()[CONTENT_RANGE], "bytes */100");
        assert!(body_bytes(response).await.is_empty());
    }

    #[tokio::test]
    async fn test_head_has_headers_but_no_body() {
        let response = stream().respond(&Method::HEAD, &HeaderMap::new(), "x");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[CONTENT_LENGTH], "100");
        assert!(body_bytes(response).await.is_empty());
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("failed.webm");
        std::fs::write(&path, b"webm-bytes").unwrap();

        let stream = FailureStream::load(&path).await.unwrap();
        assert_eq!(stream.len(), 10);

        let response = stream.respond(&Method::GET, &HeaderMap::new(), "x");
        assert_eq!(response.headers()[CONTENT_TYPE], "video/webm");
    }

    #[tokio::test]
    async fn test_load_missing_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        assert!(FailureStream::load(&dir.path().join("nope.mp4")).await.is_err());
    }

    #[test]
    fn test_placeholder_is_small_mp4() {
        let placeholder = FailureStream::placeholder();
        assert_eq!(placeholder.len(), 32);
        assert_eq!(&PLACEHOLDER_MP4[4..8], b"ftyp");
    }

    #[test]
    fn test_sanitize_failure_message() {
        assert_eq!(sanitize_failure_message("line\r\nbreak"), "linebreak");
        assert_eq!(sanitize_failure_message("caf\u{e9}"), "caf?");
        assert_eq!(sanitize_failure_message("\n\t"), "unknown error");
        assert_eq!(sanitize_failure_message(&"a".repeat(900)).len(), 500);
    }

    proptest! {
        #[test]
        fn sanitized_messages_are_valid_headers(message in any::<String>()) {
            let value = sanitize_failure_message(&message);
            let text = value.to_str().unwrap();
            prop_assert!(text.len() <= MAX_MESSAGE_LEN);
            prop_assert!(text.chars().all(|c| c.is_ascii() && !c.is_control()));
        }
    }
}
