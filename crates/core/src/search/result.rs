//! Search result value type.
//!
//! Every kind of result (plain file, torrent, streamable media, crawlable
//! placeholder, crawled child) is a single [`SearchResult`] carrying optional
//! capability bundles instead of a type hierarchy.

use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// License attached to a result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum License {
    #[default]
    Unknown,
    Named(String),
}

impl License {
    pub fn named(name: impl Into<String>) -> Self {
        License::Named(name.into())
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, License::Unknown)
    }

    pub fn name(&self) -> &str {
        match self {
            License::Unknown => "unknown",
            License::Named(name) => name,
        }
    }
}

/// Torrent-specific metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TorrentMetadata {
    /// `.torrent` download URL or magnet URI.
    pub url: String,
    /// Info hash (lowercase hex). Empty string if unknown.
    pub hash: String,
    pub seeds: u32,
    /// Page to send as referrer when fetching `url`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referrer_url: Option<String>,
}

/// A result that can be streamed directly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamingCapability {
    pub url: String,
}

/// Marks a result produced by expanding a crawlable parent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawledFrom {
    pub parent_display_name: String,
    /// Path of this entry inside the parent (e.g. file path in a torrent).
    pub path: String,
}

#[derive(Debug, Default)]
struct CrawlState {
    children: Vec<SearchResult>,
    complete: bool,
}

/// Crawl state shared by every clone of the same result.
///
/// The only mutation a published result ever sees: children get attached
/// once the crawl finishes and the state flips to complete for good.
#[derive(Debug, Clone, Default)]
pub struct CrawlableCapability {
    state: Arc<RwLock<CrawlState>>,
}

impl CrawlableCapability {
    pub fn new() -> Self {
        Self::default()
    }

    fn is_complete(&self) -> bool {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .complete
    }

    fn children(&self) -> Vec<SearchResult> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .children
            .clone()
    }

    fn set_children(&self, children: Vec<SearchResult>) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.children = children;
        state.complete = true;
    }
}

/// A found item.
///
/// Immutable once built, except for [`SearchResult::set_crawlable_children`].
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    size: Option<u64>,
    details_url: String,
    source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    creation_time: Option<DateTime<Utc>>,
    license: License,
    #[serde(skip_serializing_if = "Option::is_none")]
    thumbnail_url: Option<String>,
    preliminary: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    view_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    torrent: Option<TorrentMetadata>,
    #[serde(skip_serializing_if = "Option::is_none")]
    streaming: Option<StreamingCapability>,
    #[serde(skip)]
    crawlable: Option<CrawlableCapability>,
    #[serde(skip_serializing_if = "Option::is_none")]
    crawled_from: Option<CrawledFrom>,
}

impl SearchResult {
    pub fn builder(display_name: impl Into<String>) -> SearchResultBuilder {
        SearchResultBuilder::new(display_name)
    }

    /// Build a child of `parent` representing one entry at `path`.
    ///
    /// The child inherits source, license, creation time, details URL and
    /// torrent metadata from the parent. It is never preliminary.
    pub fn crawled_child(parent: &SearchResult, path: &str, size: u64) -> SearchResult {
        let filename = path.rsplit('/').next().unwrap_or(path).to_string();
        SearchResult {
            display_name: filename.clone(),
            filename: Some(filename),
            size: Some(size),
            details_url: parent.details_url.clone(),
            source: parent.source.clone(),
            creation_time: parent.creation_time,
            license: parent.license.clone(),
            thumbnail_url: parent.thumbnail_url.clone(),
            preliminary: false,
            view_count: None,
            torrent: parent.torrent.clone(),
            streaming: None,
            crawlable: None,
            crawled_from: Some(CrawledFrom {
                parent_display_name: parent.display_name.clone(),
                path: path.to_string(),
            }),
        }
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn details_url(&self) -> &str {
        &self.details_url
    }

    pub fn creation_time(&self) -> Option<DateTime<Utc>> {
        self.creation_time
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn license(&self) -> &License {
        &self.license
    }

    pub fn thumbnail_url(&self) -> Option<&str> {
        self.thumbnail_url.as_deref()
    }

    /// Whether a second step (format selection, file listing) is required
    /// before a download can start.
    pub fn is_preliminary(&self) -> bool {
        self.preliminary
    }

    pub fn filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    pub fn size(&self) -> Option<u64> {
        self.size
    }

    /// A file result names a directly downloadable or streamable unit.
    pub fn is_file(&self) -> bool {
        self.filename.is_some()
    }

    pub fn view_count(&self) -> Option<u64> {
        self.view_count
    }

    pub fn torrent(&self) -> Option<&TorrentMetadata> {
        self.torrent.as_ref()
    }

    pub fn torrent_url(&self) -> Option<&str> {
        self.torrent.as_ref().map(|t| t.url.as_str())
    }

    /// Info hash, if known.
    pub fn torrent_hash(&self) -> Option<&str> {
        self.torrent
            .as_ref()
            .map(|t| t.hash.as_str())
            .filter(|h| !h.is_empty())
    }

    pub fn seeds(&self) -> Option<u32> {
        self.torrent.as_ref().map(|t| t.seeds)
    }

    pub fn referrer_url(&self) -> Option<&str> {
        self.torrent.as_ref().and_then(|t| t.referrer_url.as_deref())
    }

    pub fn is_torrent(&self) -> bool {
        self.torrent.is_some()
    }

    pub fn stream_url(&self) -> Option<&str> {
        self.streaming.as_ref().map(|s| s.url.as_str())
    }

    pub fn is_streamable(&self) -> bool {
        self.streaming.is_some()
    }

    pub fn crawled_from(&self) -> Option<&CrawledFrom> {
        self.crawled_from.as_ref()
    }

    /// Whether this result has a crawl phase at all.
    pub fn has_crawlable(&self) -> bool {
        self.crawlable.is_some()
    }

    /// Crawlable and not yet expanded.
    pub fn is_crawlable(&self) -> bool {
        self.crawlable.as_ref().is_some_and(|c| !c.is_complete())
    }

    pub fn is_crawl_complete(&self) -> bool {
        self.crawlable.as_ref().is_some_and(|c| c.is_complete())
    }

    /// Whether the result is usable as-is.
    ///
    /// A crawlable result is complete when it was not preliminary to begin
    /// with (e.g. a torrent that can be downloaded whole) or once its crawl
    /// has finished.
    pub fn is_complete(&self) -> bool {
        !self.preliminary || self.is_crawl_complete()
    }

    pub fn crawled_children(&self) -> Option<Vec<SearchResult>> {
        self.crawlable.as_ref().map(|c| c.children())
    }

    /// Attach crawled children. Flips the result to complete permanently;
    /// calling it again replaces the children list. No-op on results without
    /// a crawl phase.
    pub fn set_crawlable_children(&self, children: Vec<SearchResult>) {
        if let Some(crawlable) = &self.crawlable {
            crawlable.set_children(children);
        }
    }
}

impl std::fmt::Display for SearchResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.details_url)
    }
}

/// Builder for [`SearchResult`].
#[derive(Debug, Clone)]
pub struct SearchResultBuilder {
    display_name: String,
    filename: Option<String>,
    size: Option<u64>,
    details_url: String,
    source: String,
    creation_time: Option<DateTime<Utc>>,
    license: License,
    thumbnail_url: Option<String>,
    preliminary: bool,
    view_count: Option<u64>,
    torrent: Option<TorrentMetadata>,
    streaming: Option<StreamingCapability>,
    crawlable: Option<CrawlableCapability>,
}

impl SearchResultBuilder {
    fn new(display_name: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            filename: None,
            size: None,
            details_url: String::new(),
            source: String::new(),
            creation_time: None,
            license: License::Unknown,
            thumbnail_url: None,
            preliminary: false,
            view_count: None,
            torrent: None,
            streaming: None,
            crawlable: None,
        }
    }

    pub fn filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    pub fn size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn details_url(mut self, url: impl Into<String>) -> Self {
        self.details_url = url.into();
        self
    }

    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn creation_time(mut self, time: DateTime<Utc>) -> Self {
        self.creation_time = Some(time);
        self
    }

    pub fn license(mut self, license: License) -> Self {
        self.license = license;
        self
    }

    pub fn thumbnail_url(mut self, url: impl Into<String>) -> Self {
        self.thumbnail_url = Some(url.into());
        self
    }

    pub fn preliminary(mut self, preliminary: bool) -> Self {
        self.preliminary = preliminary;
        self
    }

    pub fn view_count(mut self, count: u64) -> Self {
        self.view_count = Some(count);
        self
    }

    pub fn torrent(
        mut self,
        url: impl Into<String>,
        hash: impl Into<String>,
        seeds: u32,
        referrer_url: Option<String>,
    ) -> Self {
        self.torrent = Some(TorrentMetadata {
            url: url.into(),
            hash: hash.into().to_lowercase(),
            seeds,
            referrer_url,
        });
        self
    }

    pub fn streaming(mut self, url: impl Into<String>) -> Self {
        self.streaming = Some(StreamingCapability { url: url.into() });
        self
    }

    pub fn crawlable(mut self) -> Self {
        self.crawlable = Some(CrawlableCapability::new());
        self
    }

    pub fn build(self) -> SearchResult {
        SearchResult {
            display_name: self.display_name,
            filename: self.filename,
            size: self.size,
            details_url: self.details_url,
            source: self.source,
            creation_time: self.creation_time,
            license: self.license,
            thumbnail_url: self.thumbnail_url,
            preliminary: self.preliminary,
            view_count: self.view_count,
            torrent: self.torrent,
            streaming: self.streaming,
            crawlable: self.crawlable,
            crawled_from: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn torrent_placeholder() -> SearchResult {
        SearchResult::builder("Ubuntu 24.04 Desktop")
            .details_url("https://example.org/t/1")
            .source("Example")
            .license(License::named("GPL"))
            .torrent(
                "https://example.org/t/1.torrent",
                "ABCDEF0123456789ABCDEF0123456789ABCDEF01",
                42,
                None,
            )
            .preliminary(true)
            .crawlable()
            .build()
    }

    #[test]
    fn test_crawlable_becomes_complete_once() {
        let sr = torrent_placeholder();
        assert!(sr.is_crawlable());
        assert!(!sr.is_crawl_complete());
        assert!(!sr.is_complete());

        let child = SearchResult::crawled_child(&sr, "ubuntu/ubuntu.iso", 100);
        sr.set_crawlable_children(vec![child]);

        assert!(!sr.is_crawlable());
        assert!(sr.is_crawl_complete());
        assert!(sr.is_complete());
        assert_eq!(sr.crawled_children().unwrap().len(), 1);
    }

    #[test]
    fn test_set_children_twice_overwrites() {
        let sr = torrent_placeholder();
        let a = SearchResult::crawled_child(&sr, "a.txt", 1);
        let b = SearchResult::crawled_child(&sr, "b.txt", 2);
        let c = SearchResult::crawled_child(&sr, "c.txt", 3);

        sr.set_crawlable_children(vec![a, b]);
        sr.set_crawlable_children(vec![c]);

        let children = sr.crawled_children().unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].filename(), Some("c.txt"));
        assert!(!sr.is_crawlable());
        assert!(sr.is_crawl_complete());
    }

    #[test]
    fn test_clones_share_crawl_state() {
        let sr = torrent_placeholder();
        let published = sr.clone();
        sr.set_crawlable_children(vec![]);
        assert!(published.is_crawl_complete());
    }

    #[test]
    fn test_set_children_without_capability_is_noop() {
        let sr = SearchResult::builder("plain").filename("plain.txt").build();
        sr.set_crawlable_children(vec![]);
        assert!(!sr.has_crawlable());
        assert!(!sr.is_crawlable());
        assert!(sr.crawled_children().is_none());
    }

    #[test]
    fn test_crawled_child_inherits_parent_attributes() {
        let sr = torrent_placeholder();
        let child = SearchResult::crawled_child(&sr, "folder/track 01.flac", 4096);

        assert_eq!(child.display_name(), "track 01.flac");
        assert_eq!(child.filename(), Some("track 01.flac"));
        assert_eq!(child.size(), Some(4096));
        assert_eq!(child.source(), "Example");
        assert_eq!(child.details_url(), "https://example.org/t/1");
        assert_eq!(child.license(), &License::named("GPL"));
        assert_eq!(
            child.torrent_hash(),
            Some("abcdef0123456789abcdef0123456789abcdef01")
        );
        assert!(!child.is_preliminary());
        assert!(!child.has_crawlable());

        let from = child.crawled_from().unwrap();
        assert_eq!(from.parent_display_name, "Ubuntu 24.04 Desktop");
        assert_eq!(from.path, "folder/track 01.flac");
    }

    #[test]
    fn test_non_preliminary_crawlable_is_complete() {
        let sr = SearchResult::builder("whole torrent")
            .torrent("magnet:?xt=urn:btih:00", "", 1, None)
            .crawlable()
            .build();
        assert!(sr.is_complete());
        assert!(sr.is_crawlable());
        assert!(sr.torrent_hash().is_none());
    }

    #[test]
    fn test_serialization_skips_crawl_state() {
        let sr = torrent_placeholder();
        let json = serde_json::to_string(&sr).unwrap();
        assert!(json.contains("\"display_name\":\"Ubuntu 24.04 Desktop\""));
        assert!(!json.contains("crawlable"));
        assert!(!json.contains("streaming"));
    }
}
