//! Picks the file to stream out of a completed job folder.
//!
//! The folder is walked breadth-first. The largest video file wins, unless an
//! episode was requested and some file names that episode, in which case the
//! largest matching file wins. Ties keep the file seen first.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use regex::Regex;
use tracing::{debug, warn};

use super::{RemoteFilesystem, WebDavError, join_path, normalize_path};
use crate::types::RequestedEpisode;

/// Extensions treated as playable video.
const VIDEO_EXTENSIONS: &[&str] = &[
    "mkv", "mp4", "m4v", "avi", "mov", "wmv", "flv", "webm", "ts", "m2ts", "mpg", "mpeg",
];

/// Root under which the backend exposes completed jobs.
pub const CONTENT_ROOT: &str = "/content";

/// A video file found during resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileCandidate {
    /// Absolute remote path
    pub path: String,
    pub name: String,
    pub size: u64,
    pub matches_episode: bool,
}

/// Returns true when `name` has a known video extension.
pub fn is_video_file(name: &str) -> bool {
    name.rsplit_once('.')
        .is_some_and(|(_, ext)| VIDEO_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
}

/// Folder the backend places a job's files in.
pub fn job_folder(category: &str, job_name: &str) -> String {
    join_path(&join_path(CONTENT_ROOT, category), job_name)
}

/// Case-insensitive matcher for the common episode naming conventions.
#[derive(Debug)]
pub struct EpisodeMatcher {
    patterns: Vec<Regex>,
}

impl EpisodeMatcher {
    pub fn new(requested: RequestedEpisode) -> Self {
        let (season, episode) = (requested.season, requested.episode);
        let sources = [
            // S01E02, s1e2, S01.E02, S01 E02
            format!(r"(?i)(?:^|[^a-z0-9])s0*{season}[ ._-]*e0*{episode}(?:\D|$)"),
            // 1x02
            format!(r"(?i)(?:^|\D)0*{season}x0*{episode}(?:\D|$)"),
            // Episode 2, Ep.02
            format!(r"(?i)(?:^|[^a-z])ep(?:isode)?[ ._-]*0*{episode}(?:\D|$)"),
        ];

        let patterns = sources
            .iter()
            .filter_map(|source| match Regex::new(source) {
                Ok(regex) => Some(regex),
                Err(e) => {
                    warn!("Skipping episode pattern {}: {}", source, e);
                    None
                }
            })
            .collect();

        Self { patterns }
    }

    pub fn matches(&self, file_name: &str) -> bool {
        self.patterns.iter().any(|p| p.is_match(file_name))
    }
}

/// Breadth-first search for the best playable file under a job folder.
#[derive(Clone)]
pub struct FileResolver {
    fs: Arc<dyn RemoteFilesystem>,
    max_depth: usize,
}

impl FileResolver {
    pub fn new(fs: Arc<dyn RemoteFilesystem>, max_depth: usize) -> Self {
        Self { fs, max_depth }
    }

    /// Finds the file to stream for a job.
    ///
    /// Returns `Ok(None)` when the folder holds no video file, including when
    /// the folder does not exist yet.
    ///
    /// # Errors
    /// - `WebDavError` - The job folder itself could not be listed
    pub async fn find_best_file(
        &self,
        category: &str,
        job_name: &str,
        requested: Option<RequestedEpisode>,
    ) -> Result<Option<FileCandidate>, WebDavError> {
        self.find_in(&job_folder(category, job_name), requested).await
    }

    /// Same as [`find_best_file`](Self::find_best_file) for an explicit root.
    pub async fn find_in(
        &self,
        root: &str,
        requested: Option<RequestedEpisode>,
    ) -> Result<Option<FileCandidate>, WebDavError> {
        let matcher = requested.map(EpisodeMatcher::new);
        let root = normalize_path(root);

        let mut queue = VecDeque::from([(root.clone(), 0usize)]);
        let mut visited = HashSet::from([root.clone()]);
        let mut best: Option<FileCandidate> = None;
        let mut best_episode: Option<FileCandidate> = None;

        while let Some((dir, depth)) = queue.pop_front() {
            let entries = match self.fs.list_directory(&dir).await {
                Ok(entries) => entries,
                Err(WebDavError::NotFound { .. }) if dir == root => return Ok(None),
                Err(e) if dir == root => return Err(e),
                Err(e) => {
                    warn!("Skipping unreadable directory {}: {}", dir, e);
                    continue;
                }
            };

            for entry in entries {
                let path = join_path(&dir, &entry.name);

                if entry.is_directory {
                    if depth < self.max_depth && visited.insert(normalize_path(&path)) {
                        queue.push_back((path, depth + 1));
                    }
                    continue;
                }
                if !is_video_file(&entry.name) || !visited.insert(normalize_path(&path)) {
                    continue;
                }

                let matches_episode = matcher.as_ref().is_some_and(|m| m.matches(&entry.name));
                let candidate = FileCandidate {
                    path,
                    name: entry.name,
                    size: entry.size,
                    matches_episode,
                };

                if matches_episode && is_larger(&candidate, best_episode.as_ref()) {
                    best_episode = Some(candidate.clone());
                }
                if is_larger(&candidate, best.as_ref()) {
                    best = Some(candidate);
                }
            }
        }

        let chosen = match (requested, best_episode) {
            (Some(_), Some(episode)) => Some(episode),
            (Some(ep), None) => {
                debug!("No file under {} names {}, using largest video", root, ep);
                best
            }
            (None, _) => best,
        };
        Ok(chosen)
    }
}

fn is_larger(candidate: &FileCandidate, current: Option<&FileCandidate>) -> bool {
    current.is_none_or(|current| candidate.size > current.size)
}
