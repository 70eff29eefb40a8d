//! Testing utilities and mock implementations.
//!
//! This module provides mock implementations of the network-facing traits
//! and a recording listener, so performers, crawls and the manager can be
//! exercised end to end without real backends.
//!
//! # Example
//!
//! ```rust,ignore
//! use fanout_core::testing::{fixtures, MockFetcher, RecordingListener, TorrentPageSource};
//!
//! let fetcher = Arc::new(MockFetcher::new());
//! fetcher.set_page("https://torrents.test/linux/1", "Ubuntu|https://t.test/u.torrent|<hash>");
//! fetcher.set_bytes("https://t.test/u.torrent", fixtures::single_file_torrent("u.iso", 10));
//!
//! let listener = Arc::new(RecordingListener::new());
//! // ... build a manager around `listener`, perform, then:
//! listener.wait_stopped(1, Duration::from_secs(2)).await;
//! ```

mod mock_fetcher;
mod mock_magnet;
mod mock_performer;
mod recording_listener;
mod sources;

pub use mock_fetcher::{MockFetcher, RecordedRequest};
pub use mock_magnet::{ManualClock, MockMagnetDownloader};
pub use mock_performer::MockPerformer;
pub use recording_listener::{ListenerEvent, RecordingListener};
pub use sources::{LinePageSource, TorrentPageSource};

/// Test fixtures and helper functions.
pub mod fixtures {
    use crate::cache::LruCrawlCache;
    use crate::config::CrawlConfig;
    use crate::search::{CrawlContext, SearchResult};

    /// A valid lowercase info hash.
    pub const INFO_HASH: &str = "0123456789abcdef0123456789abcdef01234567";

    const PIECE_LENGTH: u64 = 16 * 1024;

    /// Create a plain downloadable file result.
    pub fn file_result(display_name: &str, filename: &str) -> SearchResult {
        SearchResult::builder(display_name)
            .filename(filename)
            .size(1024 * 1024)
            .details_url(format!("https://mock.test/files/{filename}"))
            .source("mock")
            .build()
    }

    /// Create a complete torrent result that can still be crawled for its
    /// file list.
    pub fn torrent_result(display_name: &str, info_hash: &str) -> SearchResult {
        SearchResult::builder(display_name)
            .size(100 * 1024 * 1024)
            .details_url(format!("https://mock.test/details/{info_hash}"))
            .source("mock")
            .torrent(
                format!("https://mock.test/{info_hash}.torrent"),
                info_hash,
                10,
                None,
            )
            .crawlable()
            .build()
    }

    /// Create a placeholder that is useless until crawled.
    pub fn preliminary_crawlable(display_name: &str) -> SearchResult {
        SearchResult::builder(display_name)
            .details_url(format!("https://mock.test/folders/{display_name}"))
            .source("mock")
            .preliminary(true)
            .crawlable()
            .build()
    }

    /// Crawl context over a small in-memory cache.
    pub fn memory_crawl_context() -> CrawlContext {
        CrawlContext::new(
            Box::new(LruCrawlCache::new(100, 1024 * 1024)),
            &CrawlConfig::default(),
        )
    }

    /// Bencoded multi-file torrent named `name`. File paths use `/`.
    pub fn multi_file_torrent(name: &str, files: &[(&str, u64)]) -> Vec<u8> {
        let total: u64 = files.iter().map(|(_, len)| len).sum();

        let mut list = b"l".to_vec();
        for (path, length) in files {
            list.extend_from_slice(format!("d6:lengthi{length}e4:pathl").as_bytes());
            for part in path.split('/') {
                list.extend(bstring(part.as_bytes()));
            }
            list.extend_from_slice(b"ee");
        }
        list.push(b'e');

        let mut info = b"d5:files".to_vec();
        info.extend(list);
        info.extend(info_tail(name, total));
        wrap(info)
    }

    /// Bencoded single-file torrent.
    pub fn single_file_torrent(name: &str, length: u64) -> Vec<u8> {
        let mut info = format!("d6:lengthi{length}e").into_bytes();
        info.extend(info_tail(name, length));
        wrap(info)
    }

    fn bstring(bytes: &[u8]) -> Vec<u8> {
        let mut out = format!("{}:", bytes.len()).into_bytes();
        out.extend_from_slice(bytes);
        out
    }

    /// `name`, `piece length` and `pieces` entries, closing the info dict.
    fn info_tail(name: &str, total: u64) -> Vec<u8> {
        let pieces = total.div_ceil(PIECE_LENGTH).max(1) as usize;
        let mut out = b"4:name".to_vec();
        out.extend(bstring(name.as_bytes()));
        out.extend_from_slice(format!("12:piece lengthi{PIECE_LENGTH}e6:pieces").as_bytes());
        out.extend(bstring(&vec![0u8; 20 * pieces]));
        out.push(b'e');
        out
    }

    fn wrap(info: Vec<u8>) -> Vec<u8> {
        let mut out = b"d8:announce".to_vec();
        out.extend(bstring(b"udp://tracker.test:1337/announce"));
        out.extend_from_slice(b"4:info");
        out.extend(info);
        out.push(b'e');
        out
    }
}
