//! Byte cache used by the crawl phase.
//!
//! Keys are crawl URLs, 40-hex info hashes, or `failed:<url>` negative
//! entries. Implementations are not internally synchronized; the crawl
//! context owns a single instance behind a lock.

mod memory;
mod sqlite;

pub use memory::LruCrawlCache;
pub use sqlite::SqliteCrawlCache;

use thiserror::Error;

use crate::config::{CacheBackend, CrawlConfig};

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Database error: {0}")]
    Database(String),
}

/// Key-value byte store with bounded size.
///
/// `get` may return `None` for any key at any time (never cached or
/// evicted).
pub trait CrawlCache: Send {
    fn get(&mut self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    fn put(&mut self, key: &str, data: &[u8]) -> Result<(), CacheError>;

    fn remove(&mut self, key: &str) -> Result<(), CacheError>;

    fn clear(&mut self) -> Result<(), CacheError>;

    fn num_entries(&self) -> Result<usize, CacheError>;

    fn size_in_bytes(&self) -> Result<u64, CacheError>;
}

/// Build the cache selected by `config.cache`.
pub fn cache_from_config(config: &CrawlConfig) -> Result<Box<dyn CrawlCache>, CacheError> {
    match config.cache {
        CacheBackend::Memory => Ok(Box::new(LruCrawlCache::new(
            config.cache_max_entries,
            config.cache_max_bytes,
        ))),
        CacheBackend::Sqlite => Ok(Box::new(SqliteCrawlCache::new(
            &config.cache_path,
            config.cache_max_entries,
            config.cache_max_bytes,
        )?)),
    }
}
