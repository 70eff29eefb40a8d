//! Regex backend described entirely by configuration.
//!
//! Named groups understood in `pattern`/`alt_pattern`:
//! `display_name` (required), `filename`, `details_url`, `size`, `seeds`,
//! `magnet`, `torrent_url`, `infohash`, `thumbnail_url`, `creation_time`.
//!
//! In `details_page` crawl mode the listing only names the results; each
//! details page is fetched and `details_pattern` supplies `magnet` or
//! `torrent_url`, plus optional `infohash`, `size`, `seeds` and
//! `creation_time`.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use regex_lite::Regex;

use super::crawl::{CrawlContext, CrawlError, CrawlPagedWebSearchPerformer, CrawlSource};
use super::helper::{crawl_torrent_info, decode_html_entities, parse_info_hash, parse_size};
use super::http::HttpFetcher;
use super::matcher::SearchMatcher;
use super::paged::{PageSource, PagedWebSearchPerformer};
use super::performer::{SearchPerformer, SearchToken};
use super::regex_search::{marker_window, RegexSource};
use super::web::WebSearchPerformer;
use super::SearchResult;
use crate::config::{BackendConfig, ConfigError, CrawlMode, HttpConfig};

pub struct PatternBackend {
    web: WebSearchPerformer,
    config: BackendConfig,
    pattern: Regex,
    alt_pattern: Option<Regex>,
    details_pattern: Option<Regex>,
}

impl PatternBackend {
    pub fn new(
        config: &BackendConfig,
        token: SearchToken,
        keywords: &str,
        http: &HttpConfig,
        fetcher: Arc<dyn HttpFetcher>,
    ) -> Result<Self, ConfigError> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|e| {
                ConfigError::ValidationError(format!(
                    "backends.{}: invalid pattern: {}",
                    config.name, e
                ))
            })
        };
        let pattern = compile(&config.pattern)?;
        let alt_pattern = config.alt_pattern.as_deref().map(compile).transpose()?;
        let details_pattern = config.details_pattern.as_deref().map(compile).transpose()?;
        if config.crawl == CrawlMode::DetailsPage && details_pattern.is_none() {
            return Err(ConfigError::ValidationError(format!(
                "backends.{}: details_page crawl needs a details_pattern",
                config.name
            )));
        }
        let web = WebSearchPerformer::new(
            config.name.clone(),
            config.domain.clone(),
            token,
            keywords,
            http,
            fetcher,
        );
        Ok(Self {
            web,
            config: config.clone(),
            pattern,
            alt_pattern,
            details_pattern,
        })
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    /// Torrent URL, info hash and seeds named by a match. The hash falls back
    /// to the one embedded in the magnet or the URL.
    fn torrent_link(&self, matcher: &SearchMatcher) -> Option<(String, String, u32)> {
        let magnet = matcher.named("magnet").map(decode_html_entities);
        let url = matcher
            .named("torrent_url")
            .map(|u| self.absolute_url(u))
            .or_else(|| magnet.clone())?;
        let hash = matcher
            .named("infohash")
            .map(str::to_lowercase)
            .or_else(|| magnet.as_deref().and_then(parse_info_hash))
            .or_else(|| parse_info_hash(&url))
            .unwrap_or_default();
        let seeds = matcher.named("seeds").map(parse_seeds).unwrap_or(0);
        Some((url, hash, seeds))
    }

    /// Build the complete torrent result for a listing entry from its
    /// fetched details page.
    fn details_result(&self, sr: &SearchResult, page: &str) -> Result<SearchResult, CrawlError> {
        let Some(regex) = &self.details_pattern else {
            return Err(CrawlError::InvalidData("no details pattern".to_string()));
        };
        let caps = regex
            .captures(page)
            .ok_or_else(|| CrawlError::InvalidData("details pattern did not match".to_string()))?;
        let matcher = SearchMatcher::from_captures(regex, &caps);
        let (url, hash, seeds) = self
            .torrent_link(&matcher)
            .ok_or_else(|| CrawlError::InvalidData("details page has no torrent link".to_string()))?;

        let mut builder = SearchResult::builder(sr.display_name())
            .details_url(sr.details_url())
            .source(sr.source())
            .torrent(url, hash, seeds, referrer(sr.details_url()));
        if let Some(filename) = sr.filename() {
            builder = builder.filename(filename);
        }
        if let Some(size) = matcher.named("size").and_then(parse_size).or(sr.size()) {
            builder = builder.size(size);
        }
        if let Some(thumbnail) = sr.thumbnail_url() {
            builder = builder.thumbnail_url(thumbnail);
        }
        let created = matcher
            .named("creation_time")
            .and_then(parse_creation_time)
            .or(sr.creation_time());
        if let Some(time) = created {
            builder = builder.creation_time(time);
        }
        Ok(builder.build())
    }

    /// Absolute URL for a link scraped from one of this backend's pages.
    fn absolute_url(&self, link: &str) -> String {
        let link = decode_html_entities(link);
        if link.starts_with("http://") || link.starts_with("https://") || link.starts_with("magnet:") {
            link
        } else if let Some(rest) = link.strip_prefix("//") {
            format!("https://{rest}")
        } else if link.starts_with('/') {
            format!("https://{}{}", self.config.domain, link)
        } else {
            format!("https://{}/{}", self.config.domain, link)
        }
    }
}

fn referrer(details_url: &str) -> Option<String> {
    (!details_url.is_empty()).then(|| details_url.to_string())
}

fn parse_creation_time(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(secs) = text.parse::<i64>() {
        return DateTime::from_timestamp(secs, 0);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

fn parse_seeds(text: &str) -> u32 {
    text.chars()
        .filter(char::is_ascii_digit)
        .collect::<String>()
        .parse()
        .unwrap_or(0)
}

impl PageSource for PatternBackend {
    fn web(&self) -> &WebSearchPerformer {
        &self.web
    }

    fn pages(&self) -> u32 {
        self.config.pages
    }

    fn page_url(&self, page: u32, encoded_keywords: &str) -> String {
        self.config
            .search_url
            .replace("{domain}", &self.config.domain)
            .replace("{keywords}", encoded_keywords)
            .replace("{page}", &page.to_string())
    }

    fn search_page(&self, page: &str) -> Vec<SearchResult> {
        self.regex_search_page(page)
    }

    fn detects_ddos_protection(&self, page: &str) -> bool {
        page.contains("cf-browser-verification") || page.contains("challenge-platform")
    }
}

impl RegexSource for PatternBackend {
    fn pattern(&self) -> &Regex {
        &self.pattern
    }

    fn alt_pattern(&self) -> Option<&Regex> {
        self.alt_pattern.as_ref()
    }

    fn max_results(&self) -> usize {
        self.config.max_results
    }

    fn page_window(&self, page: &str) -> Option<(usize, usize)> {
        marker_window(
            page,
            self.config.page_prefix.as_deref(),
            self.config.page_suffix.as_deref(),
        )
    }

    fn from_matcher(&self, matcher: &SearchMatcher) -> Option<SearchResult> {
        let display_name = decode_html_entities(matcher.named("display_name")?);
        let details_url = matcher
            .named("details_url")
            .map(|u| self.absolute_url(u))
            .unwrap_or_default();

        let mut builder = SearchResult::builder(display_name)
            .details_url(details_url.clone())
            .source(self.config.name.clone());

        if let Some(filename) = matcher.named("filename") {
            builder = builder.filename(decode_html_entities(filename));
        }
        if let Some(size) = matcher.named("size").and_then(parse_size) {
            builder = builder.size(size);
        }
        if let Some(thumbnail) = matcher.named("thumbnail_url") {
            builder = builder.thumbnail_url(self.absolute_url(thumbnail));
        }
        if let Some(time) = matcher.named("creation_time").and_then(parse_creation_time) {
            builder = builder.creation_time(time);
        }

        match self.config.crawl {
            CrawlMode::DetailsPage => {
                if details_url.is_empty() {
                    return None;
                }
                builder = builder.preliminary(true).crawlable();
            }
            mode => {
                if let Some((url, hash, seeds)) = self.torrent_link(matcher) {
                    builder = builder.torrent(url, hash, seeds, referrer(&details_url));
                    if mode == CrawlMode::TorrentFile {
                        builder = builder.crawlable();
                    }
                }
            }
        }

        Some(builder.build())
    }

    fn keyword_filtered(&self) -> bool {
        self.config.keyword_filter
    }
}

impl CrawlSource for PatternBackend {
    fn crawl_url(&self, sr: &SearchResult) -> Option<String> {
        match self.config.crawl {
            CrawlMode::DetailsPage => Some(sr.details_url().to_string()).filter(|u| !u.is_empty()),
            _ => sr.torrent_url().map(str::to_string),
        }
    }

    fn crawl_result(
        &self,
        sr: &SearchResult,
        data: Option<&[u8]>,
    ) -> Result<Vec<SearchResult>, CrawlError> {
        let Some(data) = data else {
            return Ok(Vec::new());
        };
        match self.config.crawl {
            CrawlMode::DetailsPage => {
                let page = String::from_utf8_lossy(data);
                Ok(vec![self.details_result(sr, &page)?])
            }
            _ => Ok(crawl_torrent_info(sr, data, self.web.stop_handle())?),
        }
    }

    fn num_crawls(&self) -> u32 {
        self.config.num_crawls
    }
}

/// Build the performer for one configured backend.
///
/// Backends in `torrent_file` crawl mode fall back to plain paging without a
/// crawl context. `details_page` backends cannot, since their listing results
/// are only placeholders.
pub fn build_performer(
    config: &BackendConfig,
    token: SearchToken,
    keywords: &str,
    http: &HttpConfig,
    fetcher: Arc<dyn HttpFetcher>,
    crawl: Option<Arc<CrawlContext>>,
) -> Result<Arc<dyn SearchPerformer>, ConfigError> {
    let backend = PatternBackend::new(config, token, keywords, http, fetcher)?;
    let performer: Arc<dyn SearchPerformer> = match (config.crawl, crawl) {
        (CrawlMode::TorrentFile | CrawlMode::DetailsPage, Some(context)) => {
            Arc::new(CrawlPagedWebSearchPerformer::new(backend, context))
        }
        (CrawlMode::DetailsPage, None) => {
            return Err(ConfigError::ValidationError(format!(
                "backends.{}: details_page crawl needs a crawl context",
                config.name
            )))
        }
        _ => Arc::new(PagedWebSearchPerformer::new(backend)),
    };
    Ok(performer)
}
