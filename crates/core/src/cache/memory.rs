//! In-memory LRU crawl cache.

use std::num::NonZeroUsize;

use lru::LruCache;
use tracing::debug;

use super::{CacheError, CrawlCache};

/// LRU bounded by entry count and total bytes (keys plus values).
pub struct LruCrawlCache {
    entries: LruCache<String, Vec<u8>>,
    max_bytes: u64,
    bytes: u64,
}

impl LruCrawlCache {
    pub fn new(max_entries: usize, max_bytes: u64) -> Self {
        let capacity = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(capacity),
            max_bytes,
            bytes: 0,
        }
    }

    fn entry_size(key: &str, data: &[u8]) -> u64 {
        (key.len() + data.len()) as u64
    }
}

impl CrawlCache for LruCrawlCache {
    fn get(&mut self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        Ok(self.entries.get(key).cloned())
    }

    fn put(&mut self, key: &str, data: &[u8]) -> Result<(), CacheError> {
        let size = Self::entry_size(key, data);
        if size > self.max_bytes {
            debug!(key, size, "Entry larger than the whole cache, not storing");
            self.remove(key)?;
            return Ok(());
        }

        if let Some((old_key, old_data)) = self.entries.push(key.to_string(), data.to_vec()) {
            self.bytes -= Self::entry_size(&old_key, &old_data);
        }
        self.bytes += size;

        while self.bytes > self.max_bytes {
            match self.entries.pop_lru() {
                Some((k, v)) => self.bytes -= Self::entry_size(&k, &v),
                None => break,
            }
        }
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), CacheError> {
        if let Some(data) = self.entries.pop(key) {
            self.bytes -= Self::entry_size(key, &data);
        }
        Ok(())
    }

    fn clear(&mut self) -> Result<(), CacheError> {
        self.entries.clear();
        self.bytes = 0;
        Ok(())
    }

    fn num_entries(&self) -> Result<usize, CacheError> {
        Ok(self.entries.len())
    }

    fn size_in_bytes(&self) -> Result<u64, CacheError> {
        Ok(self.bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get_remove() {
        let mut cache = LruCrawlCache::new(10, 1024);
        assert_eq!(cache.get("a").unwrap(), None);

        cache.put("a", b"1234").unwrap();
        assert_eq!(cache.get("a").unwrap(), Some(b"1234".to_vec()));
        assert_eq!(cache.num_entries().unwrap(), 1);
        assert_eq!(cache.size_in_bytes().unwrap(), 5);

        cache.put("a", b"12").unwrap();
        assert_eq!(cache.size_in_bytes().unwrap(), 3);

        cache.remove("a").unwrap();
        assert_eq!(cache.num_entries().unwrap(), 0);
        assert_eq!(cache.size_in_bytes().unwrap(), 0);
    }

    #[test]
    fn test_entry_bound_evicts_lru() {
        let mut cache = LruCrawlCache::new(2, 1024);
        cache.put("a", b"1").unwrap();
        cache.put("b", b"2").unwrap();
        cache.get("a").unwrap();
        cache.put("c", b"3").unwrap();

        assert!(cache.get("b").unwrap().is_none());
        assert!(cache.get("a").unwrap().is_some());
        assert!(cache.get("c").unwrap().is_some());
        assert_eq!(cache.size_in_bytes().unwrap(), 4);
    }

    #[test]
    fn test_byte_bound_evicts_until_fits() {
        let mut cache = LruCrawlCache::new(100, 10);
        cache.put("a", b"1234").unwrap();
        cache.put("b", b"1234").unwrap();
        cache.put("c", b"1234").unwrap();

        assert_eq!(cache.num_entries().unwrap(), 2);
        assert!(cache.get("a").unwrap().is_none());
        assert!(cache.size_in_bytes().unwrap() <= 10);
    }

    #[test]
    fn test_oversized_entry_not_stored() {
        let mut cache = LruCrawlCache::new(100, 4);
        cache.put("big", b"123456").unwrap();
        assert_eq!(cache.num_entries().unwrap(), 0);
    }

    #[test]
    fn test_clear() {
        let mut cache = LruCrawlCache::new(100, 100);
        cache.put("a", b"1").unwrap();
        cache.clear().unwrap();
        assert_eq!(cache.num_entries().unwrap(), 0);
        assert_eq!(cache.size_in_bytes().unwrap(), 0);
    }
}
