//! Minimal page sources over a scripted fetcher.

use std::sync::Arc;

use crate::config::HttpConfig;
use crate::search::helper::crawl_torrent_info;
use crate::search::{
    CrawlError, CrawlSource, HttpFetcher, PageSource, SearchResult, SearchToken,
    WebSearchPerformer,
};

/// Pages at `https://lines.test/<keywords>/<page>`; one file result per
/// non-empty line. A page containing `cf-challenge` is a DDOS wall.
pub struct LinePageSource {
    web: WebSearchPerformer,
    pages: u32,
}

impl LinePageSource {
    pub fn new(
        fetcher: Arc<dyn HttpFetcher>,
        token: SearchToken,
        keywords: &str,
        pages: u32,
        http: &HttpConfig,
    ) -> Self {
        Self {
            web: WebSearchPerformer::new("lines", "lines.test", token, keywords, http, fetcher),
            pages,
        }
    }
}

impl PageSource for LinePageSource {
    fn web(&self) -> &WebSearchPerformer {
        &self.web
    }

    fn pages(&self) -> u32 {
        self.pages
    }

    fn page_url(&self, page: u32, encoded_keywords: &str) -> String {
        format!("https://lines.test/{encoded_keywords}/{page}")
    }

    fn search_page(&self, page: &str) -> Vec<SearchResult> {
        page.lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| {
                SearchResult::builder(line)
                    .filename(format!("{line}.txt"))
                    .size(1)
                    .details_url(format!("https://lines.test/d/{line}"))
                    .source("lines")
                    .build()
            })
            .collect()
    }

    fn detects_ddos_protection(&self, page: &str) -> bool {
        page.contains("cf-challenge")
    }
}

/// Pages at `https://torrents.test/<keywords>/<page>`; each line is
/// `name|torrent url|info hash` and becomes a crawlable torrent result
/// whose crawl expands the `.torrent` file table.
pub struct TorrentPageSource {
    web: WebSearchPerformer,
    num_crawls: u32,
}

impl TorrentPageSource {
    pub fn new(
        fetcher: Arc<dyn HttpFetcher>,
        token: SearchToken,
        keywords: &str,
        num_crawls: u32,
        http: &HttpConfig,
    ) -> Self {
        Self {
            web: WebSearchPerformer::new(
                "torrents",
                "torrents.test",
                token,
                keywords,
                http,
                fetcher,
            ),
            num_crawls,
        }
    }
}

impl PageSource for TorrentPageSource {
    fn web(&self) -> &WebSearchPerformer {
        &self.web
    }

    fn pages(&self) -> u32 {
        1
    }

    fn page_url(&self, page: u32, encoded_keywords: &str) -> String {
        format!("https://torrents.test/{encoded_keywords}/{page}")
    }

    fn search_page(&self, page: &str) -> Vec<SearchResult> {
        page.lines()
            .filter_map(|line| {
                let mut parts = line.split('|').map(str::trim);
                let (name, url, hash) = (parts.next()?, parts.next()?, parts.next()?);
                Some(
                    SearchResult::builder(name)
                        .details_url(format!("https://torrents.test/d/{hash}"))
                        .source("torrents")
                        .torrent(url, hash, 1, None)
                        .preliminary(true)
                        .crawlable()
                        .build(),
                )
            })
            .collect()
    }
}

impl CrawlSource for TorrentPageSource {
    fn crawl_url(&self, sr: &SearchResult) -> Option<String> {
        sr.torrent_url().map(str::to_string)
    }

    fn crawl_result(
        &self,
        sr: &SearchResult,
        data: Option<&[u8]>,
    ) -> Result<Vec<SearchResult>, CrawlError> {
        match data {
            Some(data) => Ok(crawl_torrent_info(sr, data, self.web.stop_handle())?),
            None => Ok(Vec::new()),
        }
    }

    fn num_crawls(&self) -> u32 {
        self.num_crawls
    }
}
