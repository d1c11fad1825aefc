//! Range-aware relay from the remote filesystem to the client.
//!
//! The upstream body is streamed straight through; dropping the response
//! (client disconnect) drops the upstream body and closes that connection.

use std::time::Duration;

use axum::body::Body;
use axum::http::header::{
    ACCEPT_RANGES, CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, HeaderName,
    IF_RANGE, RANGE,
};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::Response;
use futures::StreamExt;
use nzbstream_core::PlayableFile;
use nzbstream_core::config::{ServerConfig, WebDavConfig};
use nzbstream_core::webdav::remote_url;
use tracing::{debug, trace};

use crate::handlers::range::total_from_content_range;

/// Upstream headers never relayed to the client.
const STRIPPED_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "authorization",
    "cookie",
    "set-cookie",
    "www-authenticate",
    "content-disposition",
    "access-control-allow-origin",
    "access-control-allow-methods",
    "access-control-allow-headers",
    "access-control-expose-headers",
];

const GENERIC_CONTENT_TYPES: &[&str] = &[
    "application/octet-stream",
    "binary/octet-stream",
    "application/binary",
    "application/unknown",
];

/// Errors reaching or reading the remote file.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("Upstream request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Upstream returned HTTP {status}")]
    Status { status: u16 },

    #[error("Upstream returned an empty body")]
    EmptyBody,

    #[error("Upstream sent nothing for {waited:?}")]
    Timeout { waited: Duration },

    #[error("Failed to build response: {0}")]
    Response(#[from] axum::http::Error),
}

impl UpstreamError {
    /// The remote file is gone, so the record pointing at it is stale.
    pub fn is_gone(&self) -> bool {
        matches!(self, UpstreamError::Status { status: 404 | 410 })
    }

    /// Message for the failure response header.
    pub fn diagnostic(&self) -> String {
        match self {
            UpstreamError::Request(e) if e.is_timeout() => {
                "Remote filesystem timed out".to_string()
            }
            UpstreamError::Timeout { .. } => "Remote filesystem timed out".to_string(),
            UpstreamError::Request(_) => "Remote filesystem is unreachable".to_string(),
            UpstreamError::Status { status } if self.is_gone() => {
                format!("File is no longer available (HTTP {status}); retrying next request")
            }
            UpstreamError::Status { status } => format!("Remote filesystem returned HTTP {status}"),
            UpstreamError::EmptyBody => "Remote file is empty".to_string(),
            UpstreamError::Response(_) => "Failed to relay remote file".to_string(),
        }
    }
}

/// Relays files from the WebDAV share over one pooled HTTP client.
pub struct StreamingProxy {
    base_url: String,
    username: Option<String>,
    password: Option<String>,
    read_timeout: Duration,
    client: reqwest::Client,
}

impl StreamingProxy {
    /// # Errors
    /// - `UpstreamError::Request` - HTTP client could not be constructed
    pub fn new(webdav: &WebDavConfig, server: &ServerConfig) -> Result<Self, UpstreamError> {
        // No overall timeout: bodies stream for as long as the client plays,
        // but each read must make progress within `upstream_read_timeout`
        let client = reqwest::Client::builder()
            .connect_timeout(server.upstream_connect_timeout)
            .read_timeout(server.upstream_read_timeout)
            .pool_max_idle_per_host(server.upstream_pool_idle)
            .tcp_keepalive(Duration::from_secs(60))
            .build()?;

        Ok(Self {
            base_url: webdav.url.trim_end_matches('/').to_string(),
            username: webdav.username.clone(),
            password: webdav.password.clone(),
            read_timeout: server.upstream_read_timeout,
            client,
        })
    }

    pub fn upstream_url(&self, view_path: &str) -> String {
        remote_url(&self.base_url, view_path)
    }

    /// Relays `file` for a GET or HEAD request.
    ///
    /// HEAD is emulated with a one-byte ranged GET because WebDAV servers
    /// in front of download folders often mishandle it.
    ///
    /// # Errors
    /// - `UpstreamError::Request` - Network failure or connect timeout
    /// - `UpstreamError::Timeout` - No headers or first chunk within the read timeout
    /// - `UpstreamError::Status` - Upstream answered with a non-2xx status
    /// - `UpstreamError::EmptyBody` - Upstream sent no bytes for a GET
    pub async fn serve(
        &self,
        method: &Method,
        file: &PlayableFile,
        client_headers: &HeaderMap,
    ) -> Result<Response, UpstreamError> {
        let is_head = method == Method::HEAD;
        let url = self.upstream_url(&file.view_path);

        let mut request = self.client.get(&url);
        if let Some(user) = &self.username {
            request = request.basic_auth(user, self.password.as_ref());
        }
        if is_head {
            request = request.header(RANGE, "bytes=0-0");
        } else {
            for name in [RANGE, IF_RANGE] {
                if let Some(value) = client_headers.get(&name) {
                    request = request.header(name, value.clone());
                }
            }
        }

        trace!("Fetching {}", url);
        let upstream = self.within_read_timeout(request.send()).await??;
        let status = upstream.status();
        if !status.is_success() {
            debug!("Upstream returned {} for {}", status, file.view_path);
            return Err(UpstreamError::Status {
                status: status.as_u16(),
            });
        }

        let mut headers = relay_headers(upstream.headers());
        headers.insert(CONTENT_TYPE, content_type_for(upstream.headers(), &file.file_name));
        headers.insert(ACCEPT_RANGES, HeaderValue::from_static("bytes"));
        if let Ok(value) = HeaderValue::from_str(&content_disposition(&file.file_name)) {
            headers.insert(CONTENT_DISPOSITION, value);
        }
        insert_cors_headers(&mut headers);

        if is_head {
            let total = upstream
                .headers()
                .get(CONTENT_RANGE)
                .and_then(|value| value.to_str().ok())
                .and_then(total_from_content_range)
                .or_else(|| upstream.content_length());
            headers.remove(CONTENT_RANGE);
            headers.remove(CONTENT_LENGTH);
            if let Some(total) = total {
                headers.insert(CONTENT_LENGTH, HeaderValue::from(total));
            }
            // Dropping the upstream response here cancels the body
            drop(upstream);
            return build_response(StatusCode::OK, headers, Body::empty());
        }

        let mut stream = upstream.bytes_stream();
        let first = match self.within_read_timeout(stream.next()).await? {
            Some(chunk) => chunk?,
            None => return Err(UpstreamError::EmptyBody),
        };
        let body = futures::stream::once(async move { Ok(first) }).chain(stream);

        build_response(status, headers, Body::from_stream(body))
    }

    async fn within_read_timeout<F: std::future::Future>(
        &self,
        future: F,
    ) -> Result<F::Output, UpstreamError> {
        tokio::time::timeout(self.read_timeout, future)
            .await
            .map_err(|_| UpstreamError::Timeout {
                waited: self.read_timeout,
            })
    }
}

fn build_response(
    status: StatusCode,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, UpstreamError> {
    let mut builder = Response::builder().status(status);
    if let Some(target) = builder.headers_mut() {
        *target = headers;
    }
    Ok(builder.body(body)?)
}

/// Copies upstream headers minus hop-by-hop, credential and CORS headers.
fn relay_headers(upstream: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(upstream.len());
    for (name, value) in upstream {
        if !STRIPPED_HEADERS.contains(&name.as_str()) {
            headers.append(name.clone(), value.clone());
        }
    }
    headers
}

/// Upstream `Content-Type` unless missing or generic, else guessed from the name.
pub fn content_type_for(upstream: &HeaderMap, file_name: &str) -> HeaderValue {
    let upstream_type = upstream
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.split(';').next().unwrap_or_default().trim().to_ascii_lowercase())
        .filter(|value| !value.is_empty() && !GENERIC_CONTENT_TYPES.contains(&value.as_str()));

    if upstream_type.is_some() {
        if let Some(value) = upstream.get(CONTENT_TYPE) {
            return value.clone();
        }
    }

    let guessed = mime_guess::from_path(file_name)
        .first_raw()
        .unwrap_or("application/octet-stream");
    HeaderValue::from_static(guessed)
}

/// Removes characters that break `filename="..."` or file systems.
pub fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|c| !c.is_control() && !matches!(c, '\\' | '/' | ':' | '*' | '?' | '"' | '<' | '>' | '|'))
        .collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        "video".to_string()
    } else {
        cleaned.to_string()
    }
}

/// `inline` disposition with an ASCII fallback name and the full UTF-8 name.
pub fn content_disposition(file_name: &str) -> String {
    let sanitized = sanitize_filename(file_name);
    let ascii: String = sanitized
        .chars()
        .map(|c| if c.is_ascii() { c } else { '_' })
        .collect();
    format!(
        "inline; filename=\"{ascii}\"; filename*=UTF-8''{}",
        urlencoding::encode(&sanitized)
    )
}

/// Permissive CORS headers for browser-based players.
pub fn insert_cors_headers(headers: &mut HeaderMap) {
    headers.insert(
        HeaderName::from_static("access-control-allow-origin"),
        HeaderValue::from_static("*"),
    );
    headers.insert(
        HeaderName::from_static("access-control-allow-methods"),
        HeaderValue::from_static("GET, HEAD, OPTIONS"),
    );
    headers.insert(
        HeaderName::from_static("access-control-allow-headers"),
        HeaderValue::from_static("Range, If-Range"),
    );
    headers.insert(
        HeaderName::from_static("access-control-expose-headers"),
        HeaderValue::from_static(
            "Content-Length, Content-Range, Accept-Ranges, Content-Type, X-NzbStream-Failure",
        ),
    );
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn test_hop_by_hop_and_credentials_are_stripped() {
        let mut upstream = HeaderMap::new();
        upstream.insert("connection", HeaderValue::from_static("keep-alive"));
        upstream.insert("transfer-encoding", HeaderValue::from_static("chunked"));
        upstream.insert("set-cookie", HeaderValue::from_static("session=1"));
        upstream.insert("www-authenticate", HeaderValue::from_static("Basic"));
        upstream.insert("etag", HeaderValue::from_static("\"abc\""));
        upstream.insert(CONTENT_RANGE, HeaderValue::from_static("bytes 0-9/10"));

        let relayed = relay_headers(&upstream);
        assert_eq!(relayed.len(), 2);
        assert!(relayed.contains_key("etag"));
        assert!(relayed.contains_key(CONTENT_RANGE));
    }

    #[test]
    fn test_content_type_inferred_for_generic_upstream() {
        let mut upstream = HeaderMap::new();
        assert_eq!(content_type_for(&upstream, "movie.mp4"), "video/mp4");

        upstream.insert(CONTENT_TYPE, HeaderValue::from_static("application/octet-stream"));
        assert_eq!(content_type_for(&upstream, "movie.mkv"), "video/x-matroska");

        upstream.insert(CONTENT_TYPE, HeaderValue::from_static("video/webm"));
        assert_eq!(content_type_for(&upstream, "movie.mkv"), "video/webm");
    }

    #[test]
    fn test_unknown_extension_stays_generic() {
        assert_eq!(
            content_type_for(&HeaderMap::new(), "movie.zzz"),
            "application/octet-stream"
        );
    }

    #[test]
    fn test_content_disposition_sanitizes() {
        assert_eq!(
            content_disposition("Movie: \"Cut\" <2024>?.mkv"),
            "inline; filename=\"Movie Cut 2024.mkv\"; filename*=UTF-8''Movie%20Cut%202024.mkv"
        );
        assert_eq!(sanitize_filename("/\\|*"), "video");
        assert!(content_disposition("Amélie.mkv").starts_with("inline; filename=\"Am_lie.mkv\""));
    }

    #[test]
    fn test_gone_statuses() {
        assert!(UpstreamError::Status { status: 404 }.is_gone());
        assert!(UpstreamError::Status { status: 410 }.is_gone());
        assert!(!UpstreamError::Status { status: 500 }.is_gone());
        assert!(!UpstreamError::EmptyBody.is_gone());

        let stalled = UpstreamError::Timeout {
            waited: Duration::from_secs(30),
        };
        assert!(!stalled.is_gone());
        assert_eq!(stalled.diagnostic(), "Remote filesystem timed out");
    }

    proptest! {
        #[test]
        fn content_disposition_is_always_a_valid_header(name in any::<String>()) {
            let value = content_disposition(&name);
            prop_assert!(HeaderValue::from_str(&value).is_ok());
            let sanitized = sanitize_filename(&name);
            prop_assert!(!sanitized.contains(['"', '/', '\\', ':', '*', '?', '<', '>', '|']));
        }
    }
}
