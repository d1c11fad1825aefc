//! HTTP Range request handling for video streaming
//!
//! Implements the single-range subset of RFC 7233 that media players use.
//! Multi-range requests are answered with the full body.

use axum::http::HeaderMap;
use axum::http::header::RANGE;

/// What a `Range` header asks for, resolved against a known size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeOutcome {
    /// No usable range; serve everything with 200
    Full,
    /// Inclusive byte range to serve with 206
    Partial { start: u64, end: u64 },
    /// Range starts at or past the end; answer 416
    Unsatisfiable,
}

impl RangeOutcome {
    /// Number of bytes the response body carries.
    pub fn body_len(&self, total_size: u64) -> u64 {
        match *self {
            RangeOutcome::Full => total_size,
            RangeOutcome::Partial { start, end } => end - start + 1,
            RangeOutcome::Unsatisfiable => 0,
        }
    }
}

/// Parse HTTP Range header against `total_size`.
///
/// Handles `bytes=start-end`, open ended `bytes=start-` and suffix
/// `bytes=-N` forms. The end is clamped to the last byte. Malformed
/// headers fall back to the full body.
///
/// # Examples
/// ```
/// use nzbstream_web::handlers::range::{RangeOutcome, parse_range_header};
/// let outcome = parse_range_header("bytes=100-199", 1000);
/// assert_eq!(outcome, RangeOutcome::Partial { start: 100, end: 199 });
/// ```
pub fn parse_range_header(range: &str, total_size: u64) -> RangeOutcome {
    let Some(range_spec) = range.trim().strip_prefix("bytes=") else {
        return RangeOutcome::Full;
    };
    if range_spec.contains(',') {
        return RangeOutcome::Full;
    }
    let Some((start_str, end_str)) = range_spec.trim().split_once('-') else {
        return RangeOutcome::Full;
    };
    let last = match total_size.checked_sub(1) {
        Some(last) => last,
        None => return RangeOutcome::Unsatisfiable,
    };

    if start_str.is_empty() {
        // Suffix range: the final N bytes
        return match end_str.parse::<u64>() {
            Ok(0) => RangeOutcome::Unsatisfiable,
            Ok(suffix) => RangeOutcome::Partial {
                start: total_size.saturating_sub(suffix),
                end: last,
            },
            Err(_) => RangeOutcome::Full,
        };
    }

    let Ok(start) = start_str.parse::<u64>() else {
        return RangeOutcome::Full;
    };
    if start >= total_size {
        return RangeOutcome::Unsatisfiable;
    }

    let end = if end_str.is_empty() {
        last
    } else {
        match end_str.parse::<u64>() {
            Ok(end) if end >= start => end.min(last),
            _ => return RangeOutcome::Full,
        }
    };

    RangeOutcome::Partial { start, end }
}

/// Extract the Range header value, if present and valid UTF-8.
pub fn extract_range_header(headers: &HeaderMap) -> Option<String> {
    headers
        .get(RANGE)
        .and_then(|range| range.to_str().ok())
        .map(|s| s.to_string())
}

/// `Content-Range` value for a partial response.
pub fn content_range(start: u64, end: u64, total_size: u64) -> String {
    format!("bytes {start}-{end}/{total_size}")
}

/// Total size from a `Content-Range` value such as `bytes 0-0/1000`.
///
/// Returns `None` when the total is unknown (`*`) or the value is malformed.
pub fn total_from_content_range(value: &str) -> Option<u64> {
    let (_, total) = value.trim().rsplit_once('/')?;
    total.trim().parse().ok()
}
