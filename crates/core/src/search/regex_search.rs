//! Regex-driven page scanning.

use regex_lite::Regex;

use super::helper::{reduce_html, search_page_helper, tokenize_search_keywords};
use super::matcher::SearchMatcher;
use super::paged::PageSource;
use super::SearchResult;

/// A [`PageSource`] whose pages are scanned with compiled patterns.
///
/// Implementors usually write `search_page` as a call to
/// [`regex_search_page`](RegexSource::regex_search_page).
pub trait RegexSource: PageSource {
    fn pattern(&self) -> &Regex;

    /// Tried when `pattern` finds nothing on a page.
    fn alt_pattern(&self) -> Option<&Regex> {
        None
    }

    fn max_results(&self) -> usize;

    /// Byte window of the page worth scanning. `None` means a marker was
    /// missing and the page is skipped.
    fn page_window(&self, page: &str) -> Option<(usize, usize)> {
        Some((0, page.len()))
    }

    fn from_matcher(&self, matcher: &SearchMatcher) -> Option<SearchResult>;

    /// Drop matches unrelated to the query.
    fn keyword_filtered(&self) -> bool {
        true
    }

    fn regex_search_page(&self, page: &str) -> Vec<SearchResult> {
        let web = self.web();
        let (start, end) = match self.page_window(page) {
            Some(window) => window,
            None => {
                tracing::warn!(performer = web.name(), "Page window markers not found");
                return Vec::new();
            }
        };
        let Some(reduced) = reduce_html(page, Some(start), Some(end)) else {
            return Vec::new();
        };
        let keywords = tokenize_search_keywords(web.keywords());
        search_page_helper(self, reduced, &keywords, web.stop_handle())
    }
}

/// Window between the first `prefix` and the first `suffix` after it.
pub fn marker_window(page: &str, prefix: Option<&str>, suffix: Option<&str>) -> Option<(usize, usize)> {
    let start = match prefix {
        Some(prefix) => page.find(prefix)?,
        None => 0,
    };
    let end = match suffix {
        Some(suffix) => start + page[start..].find(suffix)?,
        None => page.len(),
    };
    Some((start, end))
}
