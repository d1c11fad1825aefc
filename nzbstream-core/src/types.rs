//! Domain types shared by the store, the orchestrator and the web layer.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

/// Extensions removed from job names before they are used as folder names.
const JOB_NAME_EXTENSIONS: &[&str] = &[
    "nzb", "mkv", "mp4", "m4v", "avi", "mov", "wmv", "flv", "webm", "ts", "m2ts", "mpg", "mpeg",
];

/// Opaque key a client uses to request a stream.
///
/// One request hash exists per search result surfaced to a client, so many
/// request hashes can point at the same download.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestHash(String);

impl RequestHash {
    /// Wraps a key received from a client.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Derives the request hash for a freshly surfaced search result.
    pub fn for_metadata(metadata: &StreamMetadata) -> Self {
        let material = format!("{}|{}", metadata.raw_content_id, metadata.download_url);
        Self(sha1_hex(material.as_bytes()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Content-addressed key of an acquisition: SHA-1 of the download URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
    /// Computes the content hash of a download URL.
    pub fn from_download_url(download_url: &str) -> Self {
        Self(sha1_hex(download_url.trim().as_bytes()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn sha1_hex(bytes: &[u8]) -> String {
    hex::encode(Sha1::digest(bytes))
}

/// Kind of media a stream belongs to; selects the backend category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Movie,
    Series,
    #[serde(other)]
    Other,
}

/// Everything known about one surfaced search result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamMetadata {
    pub download_url: String,
    pub title: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(rename = "type")]
    pub content_type: ContentType,
    #[serde(default)]
    pub source_indexer: Option<String>,
    #[serde(default)]
    pub source_file_id: Option<String>,
    pub raw_content_id: String,
}

impl StreamMetadata {
    pub fn content_hash(&self) -> ContentHash {
        ContentHash::from_download_url(&self.download_url)
    }

    /// Name the backend job is submitted under.
    ///
    /// Prefers the release file name, falls back to the title.
    pub fn job_name(&self) -> String {
        let candidate = self
            .file_name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or(&self.title);
        sanitize_job_name(candidate)
    }
}

/// Strips directory components and a trailing media/nzb extension.
pub fn sanitize_job_name(raw: &str) -> String {
    let base = raw
        .trim()
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default();

    let stem = match base.rsplit_once('.') {
        Some((stem, ext))
            if !stem.is_empty() && JOB_NAME_EXTENSIONS.contains(&ext.to_lowercase().as_str()) =>
        {
            stem
        }
        _ => base,
    };

    stem.trim().to_string()
}

/// Lifecycle state of one content hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AcquisitionStatus {
    Pending,
    Ready,
    Failed,
}

impl AcquisitionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AcquisitionStatus::Pending => "pending",
            AcquisitionStatus::Ready => "ready",
            AcquisitionStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for AcquisitionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(AcquisitionStatus::Pending),
            "ready" => Ok(AcquisitionStatus::Ready),
            "failed" => Ok(AcquisitionStatus::Failed),
            other => Err(format!("Unknown acquisition status: {other}")),
        }
    }
}

/// Persisted outcome of acquiring one download.
///
/// `view_path` is only ever set on ready records; use the constructors
/// rather than building the struct by hand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcquisitionRecord {
    pub status: AcquisitionStatus,
    pub backend_job_id: Option<String>,
    pub view_path: Option<String>,
    pub file_name: Option<String>,
    pub failure_message: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl AcquisitionRecord {
    pub fn pending(backend_job_id: impl Into<String>) -> Self {
        Self {
            status: AcquisitionStatus::Pending,
            backend_job_id: Some(backend_job_id.into()),
            view_path: None,
            file_name: None,
            failure_message: None,
            updated_at: Utc::now(),
        }
    }

    pub fn ready(
        backend_job_id: Option<String>,
        view_path: impl Into<String>,
        file_name: impl Into<String>,
    ) -> Self {
        Self {
            status: AcquisitionStatus::Ready,
            backend_job_id,
            view_path: Some(view_path.into()),
            file_name: Some(file_name.into()),
            failure_message: None,
            updated_at: Utc::now(),
        }
    }

    pub fn failed(backend_job_id: Option<String>, message: impl Into<String>) -> Self {
        Self {
            status: AcquisitionStatus::Failed,
            backend_job_id,
            view_path: None,
            file_name: None,
            failure_message: Some(message.into()),
            updated_at: Utc::now(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status != AcquisitionStatus::Pending
    }

    /// Returns the playable file if this record is ready.
    pub fn playable(&self, content_hash: &ContentHash) -> Option<PlayableFile> {
        if self.status != AcquisitionStatus::Ready {
            return None;
        }
        let view_path = self.view_path.as_deref().filter(|p| !p.is_empty())?;
        let file_name = self.file_name.clone().unwrap_or_else(|| {
            view_path
                .rsplit('/')
                .next()
                .unwrap_or(view_path)
                .to_string()
        });
        Some(PlayableFile {
            content_hash: content_hash.clone(),
            view_path: view_path.to_string(),
            file_name,
        })
    }
}

/// A resolved file on the remote filesystem that can be streamed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayableFile {
    pub content_hash: ContentHash,
    /// Absolute path on the remote filesystem
    pub view_path: String,
    pub file_name: String,
}

/// Season/episode pair used to pick the right file out of a season pack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestedEpisode {
    pub season: u32,
    pub episode: u32,
}

impl RequestedEpisode {
    pub fn new(season: u32, episode: u32) -> Self {
        Self { season, episode }
    }

    /// Builds an episode request only when both parts are present.
    pub fn from_parts(season: Option<u32>, episode: Option<u32>) -> Option<Self> {
        Some(Self::new(season?, episode?))
    }
}

impl fmt::Display for RequestedEpisode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S{:02}E{:02}", self.season, self.episode)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn metadata(url: &str) -> StreamMetadata {
        StreamMetadata {
            download_url: url.to_string(),
            title: "Some Movie 2024".to_string(),
            size: 4_000_000_000,
            file_name: Some("Some.Movie.2024.1080p.WEB-DL.nzb".to_string()),
            content_type: ContentType::Movie,
            source_indexer: Some("indexer-a".to_string()),
            source_file_id: Some("42".to_string()),
            raw_content_id: "tt0000001".to_string(),
        }
    }

    #[test]
    fn test_content_hash_is_stable_per_url() {
        let a = metadata("https://indexer.example/get/1");
        let mut b = metadata("https://indexer.example/get/1");
        b.raw_content_id = "tt0000001:1:2".to_string();

        assert_eq!(a.content_hash(), b.content_hash());
        assert_ne!(RequestHash::for_metadata(&a), RequestHash::for_metadata(&b));
        assert_eq!(a.content_hash().as_str().len(), 40);
    }

    #[test]
    fn test_sanitize_job_name() {
        assert_eq!(
            sanitize_job_name("Some.Movie.2024.1080p.WEB-DL.nzb"),
            "Some.Movie.2024.1080p.WEB-DL"
        );
        assert_eq!(sanitize_job_name("/downloads/tv/Show.S01E02.mkv"), "Show.S01E02");
        assert_eq!(sanitize_job_name("C:\\jobs\\Release.Name"), "Release.Name");
        assert_eq!(sanitize_job_name("Movie.2024.1080p"), "Movie.2024.1080p");
    }

    #[test]
    fn test_job_name_falls_back_to_title() {
        let mut meta = metadata("https://indexer.example/get/1");
        meta.file_name = Some("  ".to_string());
        assert_eq!(meta.job_name(), "Some Movie 2024");
    }

    #[test]
    fn test_metadata_wire_format() {
        let json = serde_json::json!({
            "downloadUrl": "https://indexer.example/get/9",
            "title": "Show",
            "size": 10,
            "type": "series",
            "rawContentId": "tt1:1:2"
        });
        let meta: StreamMetadata = serde_json::from_value(json).unwrap();
        assert_eq!(meta.content_type, ContentType::Series);
        assert_eq!(meta.file_name, None);

        let other: ContentType = serde_json::from_str("\"anime\"").unwrap();
        assert_eq!(other, ContentType::Other);
    }

    #[test]
    fn test_only_ready_records_are_playable() {
        let hash = ContentHash::from_download_url("u");
        assert!(AcquisitionRecord::pending("job").playable(&hash).is_none());
        assert!(
            AcquisitionRecord::failed(None, "boom")
                .playable(&hash)
                .is_none()
        );

        let ready = AcquisitionRecord::ready(
            Some("job".to_string()),
            "/content/movies/Job/file.mkv",
            "file.mkv",
        );
        let file = ready.playable(&hash).unwrap();
        assert_eq!(file.view_path, "/content/movies/Job/file.mkv");
        assert!(ready.is_terminal());
    }

    proptest! {
        #[test]
        fn sanitized_job_names_have_no_separators(raw in ".{0,80}") {
            let name = sanitize_job_name(&raw);
            prop_assert!(!name.contains('/'));
            prop_assert!(!name.contains('\\'));
            prop_assert_eq!(name.trim(), name.as_str());
        }
    }
}
