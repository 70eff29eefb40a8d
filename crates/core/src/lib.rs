pub mod cache;
pub mod config;
pub mod keyword_detector;
pub mod manager;
pub mod metrics;
pub mod search;
pub mod testing;

pub use cache::{CacheError, CrawlCache, LruCrawlCache, SqliteCrawlCache};
pub use config::{
    load_config, load_config_from_str, validate_config, BackendConfig, CacheBackend, Config,
    ConfigError, CrawlConfig, CrawlMode, DetectorConfig, HttpConfig, ManagerConfig,
};
pub use keyword_detector::{Feature, KeywordDetector, KeywordDetectorListener};
pub use manager::{SearchListener, SearchManager, ALL_TOKENS};
pub use search::{
    build_performer, clean_query, parse_keyword_filters, passes_filter_pipeline, CrawlContext,
    KeywordFilter, SearchError, SearchPerformer, SearchResult, SearchToken,
};
