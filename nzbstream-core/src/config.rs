//! Centralized configuration for nzbstream.
//!
//! All tunable parameters and collaborator endpoints are defined here so the
//! orchestration logic never carries hidden defaults of its own.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::types::ContentType;

/// Errors raised when a configuration cannot be used to start the service.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required setting: {name}")]
    Missing { name: &'static str },

    #[error("Invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Central configuration for all nzbstream components.
#[derive(Debug, Clone, Default)]
pub struct NzbStreamConfig {
    pub backend: BackendConfig,
    pub webdav: WebDavConfig,
    pub store: StoreConfig,
    pub cache: CacheConfig,
    pub acquisition: AcquisitionConfig,
    pub server: ServerConfig,
}

/// Download backend (SABnzbd-compatible API) settings.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Base URL of the backend, e.g. `http://nzbdav:3000`
    pub url: String,
    /// API key passed as `apikey`
    pub api_key: String,
    /// Category for movie content
    pub movie_category: String,
    /// Category for series content
    pub series_category: String,
    /// Category used when the content type is unknown
    pub default_category: String,
    /// Per-request timeout
    pub request_timeout: Duration,
}

impl BackendConfig {
    /// Backend category a content type is filed under.
    pub fn category_for(&self, content_type: ContentType) -> &str {
        match content_type {
            ContentType::Movie => &self.movie_category,
            ContentType::Series => &self.series_category,
            ContentType::Other => &self.default_category,
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            api_key: String::new(),
            movie_category: "movies".to_string(),
            series_category: "tv".to_string(),
            default_category: "default".to_string(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Remote filesystem (WebDAV) settings.
#[derive(Debug, Clone)]
pub struct WebDavConfig {
    /// Base URL of the WebDAV share
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Per-request timeout for directory listings
    pub request_timeout: Duration,
    /// Maximum directory depth searched below a job folder
    pub max_depth: usize,
}

impl Default for WebDavConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            username: None,
            password: None,
            request_timeout: Duration::from_secs(30),
            max_depth: 6,
        }
    }
}

/// Distributed store settings.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// `redis://...` for a shared store, `memory` for a process-local one
    pub url: String,
    /// Prefix applied to every key
    pub key_prefix: String,
    /// Timeout applied to each store round trip
    pub call_timeout: Duration,
    /// Lifetime of stream metadata entries
    pub metadata_ttl: Duration,
    /// Lifetime of terminal acquisition records
    pub record_ttl: Duration,
    /// Lifetime of pending acquisition records
    pub pending_ttl: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: "memory".to_string(),
            key_prefix: "nzbstream".to_string(),
            call_timeout: Duration::from_secs(5),
            metadata_ttl: Duration::from_secs(3 * 24 * 60 * 60), // 3 days
            record_ttl: Duration::from_secs(7 * 24 * 60 * 60),   // 7 days
            pending_ttl: Duration::from_secs(2 * 60 * 60),       // 2 hours
        }
    }
}

/// In-process cache settings.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum entries per local cache
    pub max_entries: u64,
    /// Time-to-live of local entries
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            ttl: Duration::from_secs(600),
        }
    }
}

/// What a caller does when the build lock stays contended past the wait window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockContentionPolicy {
    /// Retry the lock once, then build without it
    BuildAnyway,
    /// Give up with a timeout error
    Fail,
}

impl std::str::FromStr for LockContentionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "build" | "build-anyway" => Ok(LockContentionPolicy::BuildAnyway),
            "fail" => Ok(LockContentionPolicy::Fail),
            _ => Err(format!("Invalid lock contention policy: {s}")),
        }
    }
}

/// Acquisition state machine timing.
#[derive(Debug, Clone)]
pub struct AcquisitionConfig {
    /// TTL of the distributed build lock
    pub lock_ttl: Duration,
    /// How long a non-builder waits for the builder's result
    pub lock_wait: Duration,
    pub contention_policy: LockContentionPolicy,
    /// Wall-clock deadline for polling one backend job
    pub poll_deadline: Duration,
    /// First poll delay
    pub poll_initial: Duration,
    /// Poll delay cap
    pub poll_max: Duration,
    /// First delay while waiting on a contended lock
    pub wait_initial: Duration,
    /// Delay cap while waiting on a contended lock
    pub wait_max: Duration,
    /// Consecutive poll errors tolerated before the build is abandoned
    pub max_poll_errors: u32,
    /// Endpoint notified when an indexer result turns out to be broken
    pub health_webhook: Option<String>,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            lock_ttl: Duration::from_secs(60),
            lock_wait: Duration::from_secs(30),
            contention_policy: LockContentionPolicy::BuildAnyway,
            poll_deadline: Duration::from_secs(15 * 60),
            poll_initial: Duration::from_millis(500),
            poll_max: Duration::from_secs(5),
            wait_initial: Duration::from_millis(250),
            wait_max: Duration::from_secs(2),
            max_poll_errors: 5,
            health_webhook: None,
        }
    }
}

/// HTTP server and streaming proxy settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    /// Public base URL used when handing out stream links
    pub public_url: String,
    /// Video served when acquisition or streaming fails
    pub failure_video: Option<PathBuf>,
    /// Connect timeout for upstream streaming requests
    pub upstream_connect_timeout: Duration,
    /// Longest wait for upstream response headers or the next body chunk
    pub upstream_read_timeout: Duration,
    /// Idle keep-alive connections kept per upstream host
    pub upstream_pool_idle: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 7000)),
            public_url: "http://127.0.0.1:7000".to_string(),
            failure_video: None,
            upstream_connect_timeout: Duration::from_secs(10),
            upstream_read_timeout: Duration::from_secs(30),
            upstream_pool_idle: 32,
        }
    }
}

impl NzbStreamConfig {
    /// Creates configuration with environment variable overrides.
    ///
    /// Values that fail to parse are ignored and the default is kept.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("NZBSTREAM_BACKEND_URL") {
            config.backend.url = url;
        }
        if let Ok(key) = std::env::var("NZBSTREAM_BACKEND_API_KEY") {
            config.backend.api_key = key;
        }
        if let Ok(category) = std::env::var("NZBSTREAM_MOVIE_CATEGORY") {
            config.backend.movie_category = category;
        }
        if let Ok(category) = std::env::var("NZBSTREAM_SERIES_CATEGORY") {
            config.backend.series_category = category;
        }

        if let Ok(url) = std::env::var("NZBSTREAM_WEBDAV_URL") {
            config.webdav.url = url;
        }
        if let Ok(user) = std::env::var("NZBSTREAM_WEBDAV_USER") {
            config.webdav.username = Some(user);
        }
        if let Ok(password) = std::env::var("NZBSTREAM_WEBDAV_PASSWORD") {
            config.webdav.password = Some(password);
        }

        if let Ok(url) = std::env::var("NZBSTREAM_STORE_URL") {
            config.store.url = url;
        }
        if let Some(ttl) = env_secs("NZBSTREAM_METADATA_TTL_SECS") {
            config.store.metadata_ttl = ttl;
        }

        if let Ok(entries) = std::env::var("NZBSTREAM_CACHE_MAX_ENTRIES") {
            if let Ok(count) = entries.parse::<u64>() {
                config.cache.max_entries = count;
            }
        }
        if let Some(ttl) = env_secs("NZBSTREAM_CACHE_TTL_SECS") {
            config.cache.ttl = ttl;
        }

        if let Some(deadline) = env_secs("NZBSTREAM_POLL_DEADLINE_SECS") {
            config.acquisition.poll_deadline = deadline;
        }
        if let Some(ttl) = env_secs("NZBSTREAM_LOCK_TTL_SECS") {
            config.acquisition.lock_ttl = ttl;
        }
        if let Some(wait) = env_secs("NZBSTREAM_LOCK_WAIT_SECS") {
            config.acquisition.lock_wait = wait;
        }
        if let Ok(policy) = std::env::var("NZBSTREAM_LOCK_CONTENTION") {
            if let Ok(policy) = policy.parse() {
                config.acquisition.contention_policy = policy;
            }
        }

        if let Ok(url) = std::env::var("NZBSTREAM_HEALTH_WEBHOOK") {
            config.acquisition.health_webhook = Some(url).filter(|u| !u.trim().is_empty());
        }

        if let Ok(bind) = std::env::var("NZBSTREAM_BIND") {
            if let Ok(addr) = bind.parse::<SocketAddr>() {
                config.server.bind = addr;
            }
        }
        if let Ok(url) = std::env::var("NZBSTREAM_PUBLIC_URL") {
            config.server.public_url = url;
        }
        if let Ok(path) = std::env::var("NZBSTREAM_FAILURE_VIDEO") {
            config.server.failure_video = Some(PathBuf::from(path));
        }
        if let Some(timeout) = env_secs("NZBSTREAM_UPSTREAM_READ_TIMEOUT_SECS") {
            config.server.upstream_read_timeout = timeout;
        }

        config
    }

    /// Creates a configuration with short deadlines for tests.
    pub fn for_testing() -> Self {
        let mut config = Self::default();
        config.backend.url = "http://backend.test".to_string();
        config.webdav.url = "http://webdav.test".to_string();
        config.acquisition = AcquisitionConfig {
            lock_ttl: Duration::from_secs(10),
            lock_wait: Duration::from_secs(5),
            contention_policy: LockContentionPolicy::BuildAnyway,
            poll_deadline: Duration::from_secs(30),
            poll_initial: Duration::from_millis(10),
            poll_max: Duration::from_millis(100),
            wait_initial: Duration::from_millis(10),
            wait_max: Duration::from_millis(50),
            max_poll_errors: 3,
            health_webhook: None,
        };
        config
    }

    /// Checks that every collaborator needed to serve streams is configured.
    ///
    /// # Errors
    /// - `ConfigError::Missing` - Backend or WebDAV URL is empty
    /// - `ConfigError::Invalid` - Lock TTL is not longer than the lock wait window
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.backend.url.trim().is_empty() {
            return Err(ConfigError::Missing {
                name: "NZBSTREAM_BACKEND_URL",
            });
        }
        if self.webdav.url.trim().is_empty() {
            return Err(ConfigError::Missing {
                name: "NZBSTREAM_WEBDAV_URL",
            });
        }
        if self.acquisition.lock_ttl <= self.acquisition.lock_wait {
            return Err(ConfigError::Invalid {
                name: "NZBSTREAM_LOCK_TTL_SECS",
                reason: "lock TTL must exceed the lock wait window".to_string(),
            });
        }
        Ok(())
    }
}

fn env_secs(name: &str) -> Option<Duration> {
    std::env::var(name)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let config = NzbStreamConfig::default();

        assert_eq!(config.backend.movie_category, "movies");
        assert_eq!(config.backend.series_category, "tv");
        assert_eq!(config.backend.default_category, "default");
        assert_eq!(config.webdav.max_depth, 6);
        assert_eq!(config.store.url, "memory");
        assert_eq!(config.acquisition.lock_ttl, Duration::from_secs(60));
        assert_eq!(
            config.acquisition.contention_policy,
            LockContentionPolicy::BuildAnyway
        );
    }

    #[test]
    fn test_validate_requires_collaborator_urls() {
        let config = NzbStreamConfig::default();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Missing {
                name: "NZBSTREAM_BACKEND_URL"
            })
        ));

        assert!(NzbStreamConfig::for_testing().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_short_lock_ttl() {
        let mut config = NzbStreamConfig::for_testing();
        config.acquisition.lock_ttl = Duration::from_secs(1);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn test_category_selection() {
        let backend = BackendConfig::default();
        assert_eq!(backend.category_for(ContentType::Movie), "movies");
        assert_eq!(backend.category_for(ContentType::Series), "tv");
        assert_eq!(backend.category_for(ContentType::Other), "default");
    }

    #[test]
    fn test_contention_policy_parsing() {
        assert_eq!(
            "fail".parse::<LockContentionPolicy>(),
            Ok(LockContentionPolicy::Fail)
        );
        assert_eq!(
            "Build-Anyway".parse::<LockContentionPolicy>(),
            Ok(LockContentionPolicy::BuildAnyway)
        );
        assert!("sometimes".parse::<LockContentionPolicy>().is_err());
    }

    #[test]
    fn test_env_override() {
        unsafe {
            std::env::set_var("NZBSTREAM_BACKEND_URL", "http://sab:8080");
            std::env::set_var("NZBSTREAM_LOCK_WAIT_SECS", "12");
            std::env::set_var("NZBSTREAM_CACHE_MAX_ENTRIES", "not-a-number");
            std::env::set_var("NZBSTREAM_LOCK_CONTENTION", "fail");
            std::env::set_var("NZBSTREAM_UPSTREAM_READ_TIMEOUT_SECS", "45");
        }

        let config = NzbStreamConfig::from_env();

        assert_eq!(config.backend.url, "http://sab:8080");
        assert_eq!(config.acquisition.lock_wait, Duration::from_secs(12));
        assert_eq!(config.cache.max_entries, 10_000);
        assert_eq!(
            config.acquisition.contention_policy,
            LockContentionPolicy::Fail
        );
        assert_eq!(config.server.upstream_read_timeout, Duration::from_secs(45));

        unsafe {
            std::env::remove_var("NZBSTREAM_BACKEND_URL");
            std::env::remove_var("NZBSTREAM_LOCK_WAIT_SECS");
            std::env::remove_var("NZBSTREAM_CACHE_MAX_ENTRIES");
            std::env::remove_var("NZBSTREAM_LOCK_CONTENTION");
            std::env::remove_var("NZBSTREAM_UPSTREAM_READ_TIMEOUT_SECS");
        }
    }
}
