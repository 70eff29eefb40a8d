//! Inline `[+|-]:keyword:<token>` directives in a query string.

use std::fmt;

use once_cell::sync::Lazy;
use regex_lite::Regex;

use super::SearchResult;

static KEYWORD_FILTER_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)(?P<inclusive>\+|-)?:keyword:(?P<keyword>[^\s-]*)")
        .expect("keyword filter pattern is valid")
});

/// A single include/exclude directive.
///
/// Equality ignores the string form so a filter built by hand compares equal
/// to the same filter parsed back from a query.
#[derive(Debug, Clone, Eq)]
pub struct KeywordFilter {
    inclusive: bool,
    keyword: String,
    string_form: String,
}

impl KeywordFilter {
    pub fn new(inclusive: bool, keyword: &str) -> Self {
        let keyword = keyword.to_lowercase();
        let string_form = format!("{}:keyword:{}", if inclusive { '+' } else { '-' }, keyword);
        Self {
            inclusive,
            keyword,
            string_form,
        }
    }

    pub fn is_inclusive(&self) -> bool {
        self.inclusive
    }

    pub fn keyword(&self) -> &str {
        &self.keyword
    }

    /// Text this filter occupies in the query it came from.
    pub fn string_form(&self) -> &str {
        &self.string_form
    }

    /// `haystack` must already be lowercase.
    pub fn accept(&self, haystack: &str) -> bool {
        self.inclusive == haystack.contains(&self.keyword)
    }
}

impl PartialEq for KeywordFilter {
    fn eq(&self, other: &Self) -> bool {
        self.inclusive == other.inclusive && self.keyword == other.keyword
    }
}

impl fmt::Display for KeywordFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.string_form)
    }
}

/// Extract every filter directive from `query`, in order of appearance.
///
/// A directive without a sign is inclusive. Directives with an empty keyword
/// are ignored.
pub fn parse_keyword_filters(query: &str) -> Vec<KeywordFilter> {
    KEYWORD_FILTER_PATTERN
        .captures_iter(query)
        .filter_map(|caps| {
            let keyword = caps.name("keyword")?.as_str();
            if keyword.is_empty() {
                return None;
            }
            let inclusive = caps
                .name("inclusive")
                .map_or(true, |sign| sign.as_str() == "+");
            let whole = caps.get(0)?.as_str();
            Some(KeywordFilter {
                inclusive,
                keyword: keyword.to_lowercase(),
                string_form: whole.to_string(),
            })
        })
        .collect()
}

/// Remove the given filters' text from `query`, leaving the plain keywords.
pub fn clean_query(query: &str, filters: &[KeywordFilter]) -> String {
    let mut cleaned = String::with_capacity(query.len());
    let mut last = 0;
    for m in KEYWORD_FILTER_PATTERN.find_iter(query) {
        if filters.iter().any(|f| f.string_form == m.as_str()) {
            cleaned.push_str(&query[last..m.start()]);
            cleaned.push(' ');
            last = m.end();
        }
    }
    cleaned.push_str(&query[last..]);
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Lowercase text a filter is evaluated against.
pub fn result_haystack(sr: &SearchResult) -> String {
    let mut parts: Vec<&str> = vec![sr.source(), sr.display_name()];
    if let Some(filename) = sr.filename() {
        parts.push(filename);
    }
    parts.push(sr.details_url());
    if let Some(thumbnail) = sr.thumbnail_url() {
        parts.push(thumbnail);
    }
    parts.push(sr.license().name());
    parts.join(" ").to_lowercase()
}

/// Whether `sr` passes every filter. Stops at the first rejection.
pub fn passes_filter_pipeline(sr: &SearchResult, filters: &[KeywordFilter]) -> bool {
    if filters.is_empty() {
        return true;
    }
    let haystack = result_haystack(sr);
    filters.iter().all(|f| f.accept(&haystack))
}
