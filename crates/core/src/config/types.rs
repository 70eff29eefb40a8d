use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub manager: ManagerConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub crawl: CrawlConfig,
    #[serde(default)]
    pub detector: DetectorConfig,
    /// Pattern backends available to the command-line driver.
    #[serde(default)]
    pub backends: Vec<BackendConfig>,
}

/// Search manager configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ManagerConfig {
    /// Size of the worker pool shared by every search and crawl.
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            worker_threads: default_worker_threads(),
        }
    }
}

fn default_worker_threads() -> usize {
    6
}

/// HTTP fetch configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HttpConfig {
    /// Page fetch timeout in milliseconds (default: 5000)
    #[serde(default = "default_http_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_http_timeout_ms(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_http_timeout_ms() -> u64 {
    5000
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (X11; Linux x86_64; rv:128.0) Gecko/20100101 Firefox/128.0".to_string()
}

/// Which crawl cache implementation to use
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CacheBackend {
    #[default]
    Memory,
    Sqlite,
}

/// Crawl phase configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CrawlConfig {
    /// Timeout for fetching crawl data over HTTP (default: 10s)
    #[serde(default = "default_crawl_timeout_ms")]
    pub crawl_timeout_ms: u64,
    /// Timeout for resolving a magnet link into torrent bytes (default: 20s)
    #[serde(default = "default_magnet_timeout_secs")]
    pub magnet_timeout_secs: u64,
    /// How long a failed crawl URL is skipped (default: 10 minutes)
    #[serde(default = "default_failed_url_ttl_secs")]
    pub failed_url_ttl_secs: u64,
    #[serde(default)]
    pub cache: CacheBackend,
    #[serde(default = "default_cache_max_entries")]
    pub cache_max_entries: usize,
    #[serde(default = "default_cache_max_bytes")]
    pub cache_max_bytes: u64,
    /// Database file used when `cache = "sqlite"`
    #[serde(default = "default_cache_path")]
    pub cache_path: PathBuf,
}

impl CrawlConfig {
    pub fn crawl_timeout(&self) -> Duration {
        Duration::from_millis(self.crawl_timeout_ms)
    }

    pub fn magnet_timeout(&self) -> Duration {
        Duration::from_secs(self.magnet_timeout_secs)
    }

    pub fn failed_url_ttl(&self) -> Duration {
        Duration::from_secs(self.failed_url_ttl_secs)
    }
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            crawl_timeout_ms: default_crawl_timeout_ms(),
            magnet_timeout_secs: default_magnet_timeout_secs(),
            failed_url_ttl_secs: default_failed_url_ttl_secs(),
            cache: CacheBackend::default(),
            cache_max_entries: default_cache_max_entries(),
            cache_max_bytes: default_cache_max_bytes(),
            cache_path: default_cache_path(),
        }
    }
}

fn default_crawl_timeout_ms() -> u64 {
    10_000
}

fn default_magnet_timeout_secs() -> u64 {
    20
}

fn default_failed_url_ttl_secs() -> u64 {
    600
}

fn default_cache_max_entries() -> usize {
    4096
}

fn default_cache_max_bytes() -> u64 {
    64 * 1024 * 1024
}

fn default_cache_path() -> PathBuf {
    PathBuf::from("fanout-crawl-cache.db")
}

/// Keyword detector configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DetectorConfig {
    /// Minimum spacing between two histogram rebuilds (default: 1000ms)
    #[serde(default = "default_dispatch_interval_ms")]
    pub dispatch_interval_ms: u64,
    /// Pending rebuild requests kept before the oldest is dropped
    #[serde(default = "default_max_pending_requests")]
    pub max_pending_requests: usize,
}

impl DetectorConfig {
    pub fn dispatch_interval(&self) -> Duration {
        Duration::from_millis(self.dispatch_interval_ms)
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            dispatch_interval_ms: default_dispatch_interval_ms(),
            max_pending_requests: default_max_pending_requests(),
        }
    }
}

fn default_dispatch_interval_ms() -> u64 {
    1000
}

fn default_max_pending_requests() -> usize {
    4
}

/// Second-stage behavior of a pattern backend
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CrawlMode {
    /// Results are published as found.
    #[default]
    None,
    /// Results carry a `.torrent` or magnet link that is fetched and expanded
    /// into one child result per file.
    TorrentFile,
    /// Listing entries are placeholders. Each details page is fetched and
    /// `details_pattern` turns it into a complete torrent result.
    DetailsPage,
}

/// A regex-driven web backend
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackendConfig {
    pub name: String,
    pub domain: String,
    /// Page URL template. Supports `{domain}`, `{keywords}` and `{page}`.
    pub search_url: String,
    /// Primary result pattern with named groups.
    pub pattern: String,
    /// Tried when the primary pattern yields nothing on a page.
    #[serde(default)]
    pub alt_pattern: Option<String>,
    /// Marker where the interesting part of a page starts.
    #[serde(default)]
    pub page_prefix: Option<String>,
    /// Marker where the interesting part of a page ends.
    #[serde(default)]
    pub page_suffix: Option<String>,
    #[serde(default = "default_pages")]
    pub pages: u32,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    #[serde(default = "default_num_crawls")]
    pub num_crawls: u32,
    #[serde(default)]
    pub crawl: CrawlMode,
    /// Applied to a fetched details page in `details_page` crawl mode.
    #[serde(default)]
    pub details_pattern: Option<String>,
    /// Drop matches unrelated to the query keywords.
    #[serde(default = "default_true")]
    pub keyword_filter: bool,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_pages() -> u32 {
    1
}

fn default_max_results() -> usize {
    20
}

fn default_num_crawls() -> u32 {
    10
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.manager.worker_threads, 6);
        assert_eq!(config.http.timeout(), Duration::from_secs(5));
        assert_eq!(config.crawl.crawl_timeout(), Duration::from_secs(10));
        assert_eq!(config.crawl.magnet_timeout(), Duration::from_secs(20));
        assert_eq!(config.crawl.failed_url_ttl(), Duration::from_secs(600));
        assert_eq!(config.crawl.cache, CacheBackend::Memory);
        assert_eq!(config.detector.dispatch_interval(), Duration::from_secs(1));
        assert_eq!(config.detector.max_pending_requests, 4);
    }

    #[test]
    fn test_deserialize_backend() {
        let toml = r#"
[[backends]]
name = "example"
domain = "example.org"
search_url = "https://{domain}/search/{keywords}/{page}"
pattern = '<a href="(?P<details_url>[^"]+)">(?P<display_name>[^<]+)</a>'
crawl = "torrent_file"
pages = 3
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.backends.len(), 1);

        let backend = &config.backends[0];
        assert_eq!(backend.name, "example");
        assert_eq!(backend.pages, 3);
        assert_eq!(backend.max_results, 20);
        assert_eq!(backend.num_crawls, 10);
        assert_eq!(backend.crawl, CrawlMode::TorrentFile);
        assert!(backend.alt_pattern.is_none());
        assert!(backend.keyword_filter);
        assert!(backend.enabled);
    }

    #[test]
    fn test_deserialize_details_page_backend() {
        let toml = r#"
[[backends]]
name = "listing"
domain = "example.org"
search_url = "https://{domain}/search/{keywords}/{page}"
pattern = '<a href="(?P<details_url>[^"]+)">(?P<display_name>[^<]+)</a>'
crawl = "details_page"
details_pattern = 'href="(?P<magnet>magnet:[^"]+)"'
"#;
        let config: Config = toml::from_str(toml).unwrap();
        let backend = &config.backends[0];
        assert_eq!(backend.crawl, CrawlMode::DetailsPage);
        assert!(backend.details_pattern.as_deref().unwrap().contains("magnet"));
    }

    #[test]
    fn test_deserialize_sqlite_cache() {
        let toml = r#"
[crawl]
cache = "sqlite"
cache_path = "/tmp/crawl.db"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.crawl.cache, CacheBackend::Sqlite);
        assert_eq!(config.crawl.cache_path, PathBuf::from("/tmp/crawl.db"));
    }
}
