//! Search performers and the result model.
//!
//! A performer is one backend's strategy for a query: it fetches pages,
//! extracts [`SearchResult`]s and, for crawlable results, runs a second
//! phase that expands them into children. Performers report through a
//! [`ResultSink`] to the [`SearchManager`](crate::SearchManager).

pub mod backend;
pub mod crawl;
mod error;
pub mod helper;
pub mod http;
pub mod keyword_filter;
pub mod magnet;
mod matcher;
pub mod paged;
mod performer;
pub mod regex_search;
mod result;
pub mod torrent_parser;
pub mod web;

pub use backend::{build_performer, PatternBackend};
pub use crawl::{
    Clock, CrawlContext, CrawlError, CrawlPagedWebSearchPerformer, CrawlSource, Crawler,
    SystemClock,
};
pub use error::{FetchError, SearchError};
pub use http::{FetchRequest, HttpError, HttpFetcher, ReqwestFetcher};
pub use keyword_filter::{clean_query, parse_keyword_filters, passes_filter_pipeline, KeywordFilter};
pub use magnet::{LibrqbitMagnetDownloader, MagnetDownloader, MagnetError};
pub use matcher::SearchMatcher;
pub use paged::{PageSource, PagedWebSearchPerformer};
pub use performer::{PerformerEvent, ResultSink, SearchPerformer, SearchToken, StopHandle};
pub use regex_search::RegexSource;
pub use result::{
    CrawlableCapability, CrawledFrom, License, SearchResult, SearchResultBuilder,
    StreamingCapability, TorrentMetadata,
};
pub use web::WebSearchPerformer;
