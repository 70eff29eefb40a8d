//! Second-stage crawling: fetch a result's `.torrent` (or detail data),
//! expand it into children, and memoize both successes and failures.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tracing::{debug, warn};

use super::magnet::{MagnetDownloader, MagnetError};
use super::paged::{run_pages, PageSource};
use super::performer::{ResultSink, SearchPerformer, SearchToken, StopHandle};
use super::torrent_parser::{parse_torrent_info_hash, TorrentParseError};
use super::{FetchError, SearchResult};
use crate::cache::{cache_from_config, CacheError, CrawlCache};
use crate::config::CrawlConfig;
use crate::metrics;

const FAILED_PREFIX: &str = "failed:";

#[derive(Debug, Error)]
pub enum CrawlError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Magnet(#[from] MagnetError),

    #[error("No magnet downloader registered")]
    NoMagnetDownloader,

    #[error(transparent)]
    Parse(#[from] TorrentParseError),

    #[error("Invalid crawl data: {0}")]
    InvalidData(String),
}

/// Wall-clock source for negative-cache stamps.
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> i64;
}

#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// Shared crawl dependencies, built once and handed to every crawling
/// performer.
pub struct CrawlContext {
    cache: Mutex<Box<dyn CrawlCache>>,
    magnet: Option<Arc<dyn MagnetDownloader>>,
    clock: Arc<dyn Clock>,
    crawl_timeout: Duration,
    magnet_timeout: Duration,
    failed_url_ttl: Duration,
}

impl CrawlContext {
    pub fn new(cache: Box<dyn CrawlCache>, config: &CrawlConfig) -> Self {
        Self {
            cache: Mutex::new(cache),
            magnet: None,
            clock: Arc::new(SystemClock),
            crawl_timeout: config.crawl_timeout(),
            magnet_timeout: config.magnet_timeout(),
            failed_url_ttl: config.failed_url_ttl(),
        }
    }

    /// Context with the cache selected in `config`.
    pub fn from_config(config: &CrawlConfig) -> Result<Self, CacheError> {
        Ok(Self::new(cache_from_config(config)?, config))
    }

    pub fn with_magnet_downloader(mut self, downloader: Arc<dyn MagnetDownloader>) -> Self {
        self.magnet = Some(downloader);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn crawl_timeout(&self) -> Duration {
        self.crawl_timeout
    }

    /// Drop every cached entry, positive and negative.
    pub fn clear_cache(&self) {
        if let Err(e) = self.with_cache(|cache| cache.clear()) {
            warn!(error = %e, "Failed to clear crawl cache");
        }
    }

    /// `(entries, bytes)` currently held by the cache.
    pub fn cache_size(&self) -> (usize, u64) {
        self.with_cache(|cache| {
            let entries = cache.num_entries().unwrap_or_else(|e| {
                warn!(error = %e, "Failed to count crawl cache entries");
                0
            });
            let bytes = cache.size_in_bytes().unwrap_or_else(|e| {
                warn!(error = %e, "Failed to size crawl cache");
                0
            });
            (entries, bytes)
        })
    }

    fn with_cache<T>(&self, f: impl FnOnce(&mut dyn CrawlCache) -> T) -> T {
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        f(cache.as_mut())
    }

    fn cache_get(&self, key: &str) -> Option<Vec<u8>> {
        self.with_cache(|cache| cache.get(key)).unwrap_or_else(|e| {
            warn!(key, error = %e, "Crawl cache read failed");
            None
        })
    }

    fn cache_put(&self, key: &str, data: &[u8]) {
        if let Err(e) = self.with_cache(|cache| cache.put(key, data)) {
            warn!(key, error = %e, "Crawl cache write failed");
        }
    }

    fn cache_remove(&self, key: &str) {
        if let Err(e) = self.with_cache(|cache| cache.remove(key)) {
            warn!(key, error = %e, "Crawl cache remove failed");
        }
    }

    /// Whether `url` failed within the TTL. A stale failure entry is evicted.
    fn recently_failed(&self, url: &str) -> bool {
        let key = failed_key(url);
        let Some(stamp) = self.cache_get(&key) else {
            return false;
        };
        let failed_at = match <[u8; 8]>::try_from(stamp.as_slice()) {
            Ok(bytes) => i64::from_be_bytes(bytes),
            Err(_) => {
                self.cache_remove(&key);
                return false;
            }
        };
        let age = self.clock.now_millis().saturating_sub(failed_at);
        if age < self.failed_url_ttl.as_millis() as i64 {
            true
        } else {
            self.cache_remove(&key);
            false
        }
    }

    fn mark_failed(&self, url: &str) {
        let now = self.clock.now_millis();
        self.cache_put(&failed_key(url), &now.to_be_bytes());
    }
}

fn failed_key(url: &str) -> String {
    format!("{FAILED_PREFIX}{url}")
}

/// Crawl hooks of a paged backend.
pub trait CrawlSource: PageSource {
    /// Where the crawl data for `sr` lives. `None` when `sr` already carries
    /// everything `crawl_result` needs.
    fn crawl_url(&self, sr: &SearchResult) -> Option<String>;

    /// Turn fetched (or absent) data into child results.
    fn crawl_result(&self, sr: &SearchResult, data: Option<&[u8]>) -> Result<Vec<SearchResult>, CrawlError>;

    /// Crawls allowed over the performer's lifetime.
    fn num_crawls(&self) -> u32;
}

/// Runs the crawl algorithm for one performer against a shared
/// [`CrawlContext`], spending from a fixed budget.
pub struct Crawler {
    context: Arc<CrawlContext>,
    remaining: AtomicU32,
}

impl Crawler {
    pub fn new(context: Arc<CrawlContext>, num_crawls: u32) -> Self {
        Self {
            context,
            remaining: AtomicU32::new(num_crawls),
        }
    }

    pub fn remaining(&self) -> u32 {
        self.remaining.load(Ordering::SeqCst)
    }

    fn take_budget(&self) -> bool {
        self.remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    pub async fn crawl<S: CrawlSource>(&self, source: &S, sink: &ResultSink, sr: SearchResult) {
        let web = source.web();
        if !self.take_budget() {
            debug!(performer = web.name(), "Crawl budget exhausted");
            return;
        }

        let Some(url) = source.crawl_url(&sr) else {
            match source.crawl_result(&sr, None) {
                Ok(children) => publish(&sr, children, sink),
                Err(e) => warn!(performer = web.name(), error = %e, "Crawl without data failed"),
            }
            return;
        };

        let ctx = &self.context;
        if ctx.recently_failed(&url) {
            debug!(performer = web.name(), url = %url, "Skipping recently failed crawl");
            metrics::CRAWL_CACHE_LOOKUPS.with_label_values(&["negative"]).inc();
            return;
        }

        let hash = sr.torrent_hash().map(str::to_string);
        let cached = match ctx.cache_get(&url) {
            Some(data) => {
                // reseed the hash key so mirrors sharing it keep hitting
                if let Some(h) = &hash {
                    ctx.cache_put(h, &data);
                }
                Some(data)
            }
            None => hash.as_deref().and_then(|h| ctx.cache_get(h)),
        };

        let (data, hash) = match cached {
            Some(data) => {
                metrics::CRAWL_CACHE_LOOKUPS.with_label_values(&["hit"]).inc();
                (data, hash)
            }
            None => {
                metrics::CRAWL_CACHE_LOOKUPS.with_label_values(&["miss"]).inc();
                if web.is_stopped() {
                    return;
                }
                match self.fetch(source, &sr, &url).await {
                    Ok(data) => {
                        // results without a known hash are keyed by the parsed one
                        let hash = hash.or_else(|| {
                            sr.is_torrent()
                                .then(|| parse_torrent_info_hash(&data).ok())
                                .flatten()
                        });
                        ctx.cache_put(&url, &data);
                        if let Some(h) = &hash {
                            ctx.cache_put(h, &data);
                        }
                        (data, hash)
                    }
                    Err(e) => {
                        warn!(performer = web.name(), url = %url, error = %e, "Crawl fetch failed");
                        ctx.mark_failed(&url);
                        return;
                    }
                }
            }
        };

        match source.crawl_result(&sr, Some(&data)) {
            Ok(children) if children.is_empty() => {
                debug!(performer = web.name(), url = %url, "Crawl yielded nothing");
                ctx.mark_failed(&url);
            }
            Ok(children) => publish(&sr, children, sink),
            Err(e) => {
                warn!(performer = web.name(), url = %url, error = %e, "Crawl data unusable, evicting");
                ctx.cache_remove(&url);
                if let Some(h) = &hash {
                    ctx.cache_remove(h);
                }
            }
        }
    }

    async fn fetch<S: CrawlSource>(
        &self,
        source: &S,
        sr: &SearchResult,
        url: &str,
    ) -> Result<Vec<u8>, CrawlError> {
        if url.starts_with("magnet:") {
            let downloader = self
                .context
                .magnet
                .as_ref()
                .ok_or(CrawlError::NoMagnetDownloader)?;
            Ok(downloader.download(url, self.context.magnet_timeout).await?)
        } else {
            let referrer = sr.referrer_url().or(Some(sr.details_url()).filter(|u| !u.is_empty()));
            Ok(source
                .web()
                .fetch_bytes(url, referrer, self.context.crawl_timeout)
                .await?)
        }
    }
}

fn publish(sr: &SearchResult, children: Vec<SearchResult>, sink: &ResultSink) {
    sr.set_crawlable_children(children.clone());
    sink.emit(children);
}

/// Paged performer with a crawl phase.
pub struct CrawlPagedWebSearchPerformer<S> {
    source: S,
    crawler: Crawler,
    ddos: AtomicBool,
}

impl<S: CrawlSource> CrawlPagedWebSearchPerformer<S> {
    pub fn new(source: S, context: Arc<CrawlContext>) -> Self {
        let crawler = Crawler::new(context, source.num_crawls());
        Self {
            source,
            crawler,
            ddos: AtomicBool::new(false),
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn remaining_crawls(&self) -> u32 {
        self.crawler.remaining()
    }
}

#[async_trait]
impl<S: CrawlSource> SearchPerformer for CrawlPagedWebSearchPerformer<S> {
    fn token(&self) -> SearchToken {
        self.source.web().token()
    }

    fn name(&self) -> &str {
        self.source.web().name()
    }

    fn stop_handle(&self) -> &StopHandle {
        self.source.web().stop_handle()
    }

    fn is_ddos_protection_active(&self) -> bool {
        self.ddos.load(Ordering::SeqCst)
    }

    async fn perform(&self, sink: &ResultSink) {
        run_pages(&self.source, &self.ddos, sink).await;
    }

    async fn crawl(&self, sink: &ResultSink, sr: SearchResult) {
        self.crawler.crawl(&self.source, sink, sr).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::LruCrawlCache;
    use crate::config::HttpConfig;
    use crate::search::http::HttpError;
    use crate::search::PerformerEvent;
    use crate::testing::{
        fixtures, ManualClock, MockFetcher, MockMagnetDownloader, TorrentPageSource,
    };
    use tokio::sync::mpsc::UnboundedReceiver;

    const TORRENT_URL: &str = "https://torrents.test/t/1.torrent";

    struct Harness {
        fetcher: Arc<MockFetcher>,
        clock: Arc<ManualClock>,
        context: Arc<CrawlContext>,
        performer: Arc<CrawlPagedWebSearchPerformer<TorrentPageSource>>,
    }

    fn harness_with(num_crawls: u32, magnet: Option<Arc<MockMagnetDownloader>>) -> Harness {
        let fetcher = Arc::new(MockFetcher::new());
        let clock = Arc::new(ManualClock::new(1_000_000));
        let mut context = CrawlContext::new(
            Box::new(LruCrawlCache::new(100, 1 << 20)),
            &CrawlConfig::default(),
        )
        .with_clock(clock.clone());
        if let Some(magnet) = magnet {
            context = context.with_magnet_downloader(magnet);
        }
        let context = Arc::new(context);
        let source = TorrentPageSource::new(fetcher.clone(), 1, "linux", num_crawls, &HttpConfig::default());
        let performer = Arc::new(CrawlPagedWebSearchPerformer::new(source, context.clone()));
        Harness {
            fetcher,
            clock,
            context,
            performer,
        }
    }

    fn harness() -> Harness {
        harness_with(10, None)
    }

    fn placeholder(url: &str) -> SearchResult {
        SearchResult::builder("Linux ISO collection")
            .details_url("https://torrents.test/d/1")
            .source("torrents")
            .torrent(url, fixtures::INFO_HASH, 5, None)
            .preliminary(true)
            .crawlable()
            .build()
    }

    async fn crawl_once(h: &Harness, sr: SearchResult) -> Vec<SearchResult> {
        let (sink, mut rx) = ResultSink::detached(h.performer.clone());
        h.performer.crawl(&sink, sr).await;
        drop(sink);
        collect(&mut rx).await
    }

    async fn collect(rx: &mut UnboundedReceiver<PerformerEvent>) -> Vec<SearchResult> {
        let mut out = Vec::new();
        while let Some(event) = rx.recv().await {
            if let PerformerEvent::Results { results, .. } = event {
                out.extend(results);
            }
        }
        out
    }

    #[tokio::test]
    async fn test_crawl_expands_and_caches() {
        let h = harness();
        let data = fixtures::multi_file_torrent("iso", &[("a.iso", 10), ("b.iso", 20)]);
        h.fetcher.set_bytes(TORRENT_URL, data.clone());

        let sr = placeholder(TORRENT_URL);
        let children = crawl_once(&h, sr.clone()).await;

        assert_eq!(children.len(), 2);
        assert!(sr.is_crawl_complete());
        assert_eq!(sr.crawled_children().unwrap().len(), 2);
        assert_eq!(h.context.cache_size().0, 2);

        let referrers: Vec<_> = h.fetcher.requests().iter().map(|r| r.referrer.clone()).collect();
        assert_eq!(referrers, vec![Some("https://torrents.test/d/1".to_string())]);

        // second crawl of an equivalent result hits the cache
        let again = crawl_once(&h, placeholder(TORRENT_URL)).await;
        assert_eq!(again.len(), 2);
        assert_eq!(h.fetcher.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_hash_cache_shared_across_urls() {
        let h = harness();
        let data = fixtures::multi_file_torrent("iso", &[("a.iso", 10)]);
        h.fetcher.set_bytes(TORRENT_URL, data);

        crawl_once(&h, placeholder(TORRENT_URL)).await;
        let mirror = crawl_once(&h, placeholder("https://mirror.test/same.torrent")).await;

        assert_eq!(mirror.len(), 1);
        assert_eq!(h.fetcher.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_url_hit_reseeds_evicted_hash_entry() {
        let h = harness();
        let data = fixtures::multi_file_torrent("iso", &[("a.iso", 10)]);
        h.fetcher.set_bytes(TORRENT_URL, data);

        crawl_once(&h, placeholder(TORRENT_URL)).await;
        h.context.cache_remove(fixtures::INFO_HASH);
        assert!(h.context.cache_get(fixtures::INFO_HASH).is_none());

        // served from the url key, which puts the hash key back
        crawl_once(&h, placeholder(TORRENT_URL)).await;
        assert!(h.context.cache_get(fixtures::INFO_HASH).is_some());

        let mirror = crawl_once(&h, placeholder("https://mirror.test/same.torrent")).await;
        assert_eq!(mirror.len(), 1);
        assert_eq!(h.fetcher.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_fetch_is_memoized_for_ttl() {
        let h = harness();
        h.fetcher.fail(TORRENT_URL, HttpError::Status { status: 404 });

        assert!(crawl_once(&h, placeholder(TORRENT_URL)).await.is_empty());
        assert_eq!(h.fetcher.requests().len(), 1);

        h.clock.advance(Duration::from_secs(9 * 60 + 59));
        assert!(crawl_once(&h, placeholder(TORRENT_URL)).await.is_empty());
        assert_eq!(h.fetcher.requests().len(), 1);

        h.clock.advance(Duration::from_secs(2));
        h.fetcher.set_bytes(TORRENT_URL, fixtures::single_file_torrent("x.iso", 1));
        let children = crawl_once(&h, placeholder(TORRENT_URL)).await;
        assert_eq!(h.fetcher.requests().len(), 2);
        assert_eq!(children.len(), 1);
    }

    #[tokio::test]
    async fn test_corrupt_data_evicts_cache() {
        let h = harness();
        h.fetcher.set_bytes(TORRENT_URL, b"not bencode".to_vec());

        assert!(crawl_once(&h, placeholder(TORRENT_URL)).await.is_empty());
        assert_eq!(h.context.cache_size().0, 0);

        // not memoized as failed: next crawl refetches
        crawl_once(&h, placeholder(TORRENT_URL)).await;
        assert_eq!(h.fetcher.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_budget_exhaustion() {
        let h = harness_with(1, None);
        h.fetcher.set_bytes(TORRENT_URL, fixtures::single_file_torrent("x.iso", 1));

        assert_eq!(crawl_once(&h, placeholder(TORRENT_URL)).await.len(), 1);
        assert_eq!(h.performer.remaining_crawls(), 0);
        assert!(crawl_once(&h, placeholder(TORRENT_URL)).await.is_empty());
    }

    #[tokio::test]
    async fn test_magnet_goes_through_downloader() {
        let magnet = Arc::new(MockMagnetDownloader::new());
        let uri = format!("magnet:?xt=urn:btih:{}", fixtures::INFO_HASH);
        magnet.set_torrent(&uri, fixtures::single_file_torrent("m.iso", 3));
        let h = harness_with(10, Some(magnet.clone()));

        let children = crawl_once(&h, placeholder(&uri)).await;

        assert_eq!(children.len(), 1);
        assert!(h.fetcher.requests().is_empty());
        assert_eq!(magnet.requests(), vec![(uri, Duration::from_secs(20))]);
    }

    #[tokio::test]
    async fn test_magnet_without_downloader_is_failure() {
        let h = harness();
        let uri = format!("magnet:?xt=urn:btih:{}", fixtures::INFO_HASH);
        assert!(crawl_once(&h, placeholder(&uri)).await.is_empty());
        assert!(h.context.recently_failed(&uri));
    }

    #[tokio::test]
    async fn test_stale_failure_entry_is_evicted() {
        let h = harness();
        h.context.mark_failed("https://x.test/a");
        assert!(h.context.recently_failed("https://x.test/a"));
        h.clock.advance(Duration::from_secs(601));
        assert!(!h.context.recently_failed("https://x.test/a"));
        assert_eq!(h.context.cache_size().0, 0);
    }

    #[tokio::test]
    async fn test_clear_cache() {
        let h = harness();
        h.context.mark_failed("https://x.test/a");
        h.context.clear_cache();
        assert_eq!(h.context.cache_size(), (0, 0));
    }
}
