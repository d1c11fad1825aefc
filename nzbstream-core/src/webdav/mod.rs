//! Remote filesystem access and playable-file resolution.

pub mod client;
pub mod resolver;

use async_trait::async_trait;

pub use self::client::WebDavClient;
pub use self::resolver::{FileCandidate, FileResolver};

/// Errors from listing the remote filesystem.
#[derive(Debug, thiserror::Error)]
pub enum WebDavError {
    #[error("WebDAV request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Directory not found: {path}")]
    NotFound { path: String },

    #[error("WebDAV returned HTTP {status} for {path}")]
    Status { status: u16, path: String },

    #[error("Malformed WebDAV response: {reason}")]
    Parse { reason: String },
}

/// One child of a listed directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub size: u64,
    pub is_directory: bool,
}

impl DirEntry {
    pub fn file(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            size,
            is_directory: false,
        }
    }

    pub fn directory(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            size: 0,
            is_directory: true,
        }
    }
}

/// Read-only view of the backend's completed downloads.
#[async_trait]
pub trait RemoteFilesystem: Send + Sync {
    /// Lists the immediate children of `path`.
    ///
    /// # Errors
    /// - `WebDavError::NotFound` - Directory does not exist
    /// - `WebDavError::Request` - Network failure or timeout
    async fn list_directory(&self, path: &str) -> Result<Vec<DirEntry>, WebDavError>;
}

/// Joins a directory path and a child name with exactly one separator.
pub fn join_path(parent: &str, child: &str) -> String {
    format!(
        "{}/{}",
        parent.trim_end_matches('/'),
        child.trim_matches('/')
    )
}

/// Canonical form of a remote path: leading slash, no trailing slash.
pub fn normalize_path(path: &str) -> String {
    let trimmed = path.trim().trim_matches('/');
    format!("/{trimmed}")
}

/// Absolute URL of a remote path under `base_url`, each segment percent-encoded.
pub fn remote_url(base_url: &str, path: &str) -> String {
    let encoded: Vec<String> = path
        .split('/')
        .filter(|segment| !segment.is_empty())
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect();
    format!("{}/{}", base_url.trim_end_matches('/'), encoded.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_helpers() {
        assert_eq!(join_path("/content/tv/", "Show"), "/content/tv/Show");
        assert_eq!(join_path("/content", "/a/"), "/content/a");
        assert_eq!(normalize_path("content/movies/"), "/content/movies");
        assert_eq!(normalize_path("/"), "/");
    }

    #[test]
    fn test_remote_url_encodes_segments() {
        assert_eq!(
            remote_url("http://dav:8080/", "/content/tv/Show S01/a#1.mkv"),
            "http://dav:8080/content/tv/Show%20S01/a%231.mkv"
        );
    }
}
