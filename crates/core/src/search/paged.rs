//! Page-by-page web search.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tracing::{debug, warn};

use super::performer::{ResultSink, SearchPerformer, SearchToken, StopHandle};
use super::web::WebSearchPerformer;
use super::{SearchError, SearchResult};
use crate::metrics;

/// A backend whose results are spread over numbered pages.
pub trait PageSource: Send + Sync + 'static {
    fn web(&self) -> &WebSearchPerformer;

    fn pages(&self) -> u32;

    /// URL of page `page` (1-based).
    fn page_url(&self, page: u32, encoded_keywords: &str) -> String;

    /// Extract results from one page's text.
    fn search_page(&self, page: &str) -> Vec<SearchResult>;

    /// Whether a fetched page is a DDOS-protection challenge rather than
    /// results.
    fn detects_ddos_protection(&self, _page: &str) -> bool {
        false
    }
}

/// Walk the pages in order, emitting each page's batch as soon as it is
/// parsed. A failed page is logged and skipped.
pub(crate) async fn run_pages<S: PageSource>(source: &S, ddos: &AtomicBool, sink: &ResultSink) {
    let web = source.web();

    for page in 1..=source.pages() {
        if web.is_stopped() {
            debug!(performer = web.name(), page, "Stopped, skipping remaining pages");
            break;
        }

        let url = source.page_url(page, web.encoded_keywords());
        let text = match web.fetch(&url).await {
            Ok(text) => text,
            Err(e) => {
                warn!(performer = web.name(), page, error = %e, "Page fetch failed, skipping");
                continue;
            }
        };

        if source.detects_ddos_protection(&text) {
            ddos.store(true, Ordering::SeqCst);
            warn!(performer = web.name(), domain = web.domain(), "DDOS protection detected");
            sink.error(SearchError::DdosProtection {
                performer: web.name().to_string(),
                domain: web.domain().to_string(),
            });
            break;
        }

        if web.is_stopped() {
            break;
        }

        let results = source.search_page(&text);
        debug!(performer = web.name(), page, count = results.len(), "Page parsed");
        metrics::PAGE_RESULTS
            .with_label_values(&[web.name()])
            .observe(results.len() as f64);
        sink.emit(results);
    }
}

/// Performer over a [`PageSource`] without a crawl phase.
pub struct PagedWebSearchPerformer<S> {
    source: S,
    ddos: AtomicBool,
}

impl<S: PageSource> PagedWebSearchPerformer<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            ddos: AtomicBool::new(false),
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }
}

#[async_trait]
impl<S: PageSource> SearchPerformer for PagedWebSearchPerformer<S> {
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
}
