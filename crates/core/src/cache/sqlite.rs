//! SQLite-backed crawl cache that survives restarts.

use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension};

use super::{CacheError, CrawlCache};

/// Crawl cache stored in a single SQLite table, evicting least recently
/// used rows once either bound is exceeded.
pub struct SqliteCrawlCache {
    conn: Connection,
    max_entries: usize,
    max_bytes: u64,
    /// Monotonic access stamp; higher is more recent.
    clock: i64,
}

impl SqliteCrawlCache {
    /// Open (or create) the cache database at `path`.
    pub fn new(path: &Path, max_entries: usize, max_bytes: u64) -> Result<Self, CacheError> {
        let conn = Connection::open(path).map_err(db)?;
        Self::with_connection(conn, max_entries, max_bytes)
    }

    /// Create an in-memory cache (useful for testing).
    pub fn in_memory(max_entries: usize, max_bytes: u64) -> Result<Self, CacheError> {
        let conn = Connection::open_in_memory().map_err(db)?;
        Self::with_connection(conn, max_entries, max_bytes)
    }

    fn with_connection(conn: Connection, max_entries: usize, max_bytes: u64) -> Result<Self, CacheError> {
        Self::initialize_schema(&conn)?;
        let clock: i64 = conn
            .query_row("SELECT COALESCE(MAX(accessed_at), 0) FROM crawl_cache", [], |row| row.get(0))
            .map_err(db)?;
        Ok(Self {
            conn,
            max_entries,
            max_bytes,
            clock,
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), CacheError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS crawl_cache (
                key TEXT PRIMARY KEY,
                data BLOB NOT NULL,
                size INTEGER NOT NULL,
                accessed_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_crawl_cache_accessed ON crawl_cache(accessed_at);
            "#,
        )
        .map_err(db)?;
        Ok(())
    }

    fn tick(&mut self) -> i64 {
        self.clock += 1;
        self.clock
    }

    fn evict(&mut self) -> Result<(), CacheError> {
        loop {
            let (count, bytes): (i64, i64) = self
                .conn
                .query_row(
                    "SELECT COUNT(*), COALESCE(SUM(size), 0) FROM crawl_cache",
                    [],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .map_err(db)?;
            if count as usize <= self.max_entries && bytes as u64 <= self.max_bytes {
                return Ok(());
            }
            let removed = self
                .conn
                .execute(
                    "DELETE FROM crawl_cache WHERE key = (
                        SELECT key FROM crawl_cache ORDER BY accessed_at ASC LIMIT 1
                    )",
                    [],
                )
                .map_err(db)?;
            if removed == 0 {
                return Ok(());
            }
        }
    }
}

impl CrawlCache for SqliteCrawlCache {
    fn get(&mut self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let data: Option<Vec<u8>> = self
            .conn
            .query_row(
                "SELECT data FROM crawl_cache WHERE key = ?",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .map_err(db)?;
        if data.is_some() {
            let stamp = self.tick();
            self.conn
                .execute(
                    "UPDATE crawl_cache SET accessed_at = ? WHERE key = ?",
                    params![stamp, key],
                )
                .map_err(db)?;
        }
        Ok(data)
    }

    fn put(&mut self, key: &str, data: &[u8]) -> Result<(), CacheError> {
        let size = (key.len() + data.len()) as i64;
        let stamp = self.tick();
        self.conn
            .execute(
                "INSERT INTO crawl_cache (key, data, size, accessed_at) VALUES (?, ?, ?, ?)
                 ON CONFLICT(key) DO UPDATE SET
                    data = excluded.data,
                    size = excluded.size,
                    accessed_at = excluded.accessed_at",
                params![key, data, size, stamp],
            )
            .map_err(db)?;
        self.evict()
    }

    fn remove(&mut self, key: &str) -> Result<(), CacheError> {
        self.conn
            .execute("DELETE FROM crawl_cache WHERE key = ?", params![key])
            .map_err(db)?;
        Ok(())
    }

    fn clear(&mut self) -> Result<(), CacheError> {
        self.conn.execute("DELETE FROM crawl_cache", []).map_err(db)?;
        Ok(())
    }

    fn num_entries(&self) -> Result<usize, CacheError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM crawl_cache", [], |row| row.get(0))
            .map_err(db)?;
        Ok(count as usize)
    }

    fn size_in_bytes(&self) -> Result<u64, CacheError> {
        let bytes: i64 = self
            .conn
            .query_row("SELECT COALESCE(SUM(size), 0) FROM crawl_cache", [], |row| row.get(0))
            .map_err(db)?;
        Ok(bytes as u64)
    }
}

fn db(e: rusqlite::Error) -> CacheError {
    CacheError::Database(e.to_string())
}
