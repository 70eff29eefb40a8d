//! Algorithms shared by the performers: page scanning, torrent expansion,
//! keyword normalization and fuzzy matching.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex_lite::Regex;
use tracing::{debug, warn};
use unicode_normalization::{char::is_combining_mark, UnicodeNormalization};

use super::matcher::SearchMatcher;
use super::performer::StopHandle;
use super::regex_search::RegexSource;
use super::torrent_parser::{parse_torrent_files, TorrentParseError};
use super::SearchResult;

static MAGNET_HASH_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"magnet:\?xt=urn:btih:([a-fA-F0-9]{40})").expect("magnet pattern is valid")
});

static SIZE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*([0-9]+(?:[.,][0-9]+)?)\s*([kmgt]i?b|b|bytes)?\s*$")
        .expect("size pattern is valid")
});

/// Words ignored when tokenizing search keywords (English, Spanish, German).
static STOPWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        // English
        "and", "the", "a", "on", "in", "of", "for", "to", "is", "it", "at", "by", "an", "or", "as",
        "be", "with", "this", "that", "these", "those", "from", "but", "about", "which", "some",
        "so", "out", "then", "than", "too",
        // Spanish
        "y", "el", "la", "los", "las", "un", "una", "unos", "unas", "en", "de", "para", "por",
        "con", "como", "sobre", "al", "lo", "es", "del", "más", "ya", "o", "sin", "sus", "le",
        "se", "me", "te", "tu", "mi", "esto", "eso", "estos", "esos", "aquel", "aquella",
        "aquellos", "aquellas",
        // German
        "und", "der", "die", "ein", "eine", "einer", "einem", "einen", "im", "auf", "am", "zu",
        "mit", "von", "über", "für", "ist", "war", "sein", "sie", "er", "wir", "ihr", "denn",
        "doch", "nicht", "weil", "als", "aber", "wenn", "dann", "dies", "diese", "dieser",
        "dieses", "das", "jenes", "solche",
    ]
    .into_iter()
    .collect()
});

pub fn is_stopword(token: &str) -> bool {
    STOPWORDS.contains(token)
}

/// Run the source's primary pattern over `page`, falling back to the
/// alternate pattern when the primary one yields nothing.
pub fn search_page_helper<R: RegexSource + ?Sized>(
    source: &R,
    page: &str,
    keywords: &[String],
    stop: &StopHandle,
) -> Vec<SearchResult> {
    let mut results = perform_search(source, source.pattern(), page, keywords, stop);
    if results.is_empty() {
        if let Some(alt) = source.alt_pattern() {
            debug!("Primary pattern found nothing, trying alternate pattern");
            results = perform_search(source, alt, page, keywords, stop);
        }
    }
    results
}

fn perform_search<R: RegexSource + ?Sized>(
    source: &R,
    pattern: &Regex,
    page: &str,
    keywords: &[String],
    stop: &StopHandle,
) -> Vec<SearchResult> {
    let max_results = source.max_results();
    let mut results = Vec::new();

    for caps in pattern.captures_iter(page) {
        if results.len() >= max_results || stop.is_stopped() {
            break;
        }
        let matcher = SearchMatcher::from_captures(pattern, &caps);
        let Some(sr) = source.from_matcher(&matcher) else {
            continue;
        };
        if source.keyword_filtered() && !one_keyword_matched_or_fuzzy_matched(keywords, &sr) {
            debug!(name = %sr.display_name(), "Dropping match unrelated to keywords");
            continue;
        }
        results.push(sr);
    }

    results
}

/// Slice `html` to `[prefix_offset, suffix_offset)`.
///
/// Returns `None` when either marker was not found or the window is inverted.
pub fn reduce_html(
    html: &str,
    prefix_offset: Option<usize>,
    suffix_offset: Option<usize>,
) -> Option<&str> {
    let (start, end) = (prefix_offset?, suffix_offset?);
    if start > end {
        warn!(start, end, "Page window is inverted");
        return None;
    }
    html.get(start..end.min(html.len()))
}

/// Expand a `.torrent` blob into one child result per file.
///
/// Padding files are skipped. Stops early when `stop` is raised.
pub fn crawl_torrent_info(
    sr: &SearchResult,
    data: &[u8],
    stop: &StopHandle,
) -> Result<Vec<SearchResult>, TorrentParseError> {
    let files = parse_torrent_files(data)?;
    let mut children = Vec::with_capacity(files.len());
    for file in files {
        if stop.is_stopped() {
            break;
        }
        if file.is_padding() {
            continue;
        }
        children.push(SearchResult::crawled_child(sr, &file.path, file.size_bytes));
    }
    Ok(children)
}

/// Lowercase 40-hex info hash of a magnet URI.
pub fn parse_info_hash(url: &str) -> Option<String> {
    MAGNET_HASH_PATTERN
        .captures(url)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_lowercase())
}

/// Parse a human size such as `"1.5 GB"`, `"700 MiB"` or `"1,2 KB"` into bytes.
pub fn parse_size(text: &str) -> Option<u64> {
    let caps = SIZE_PATTERN.captures(text)?;
    let amount: f64 = caps.get(1)?.as_str().replace(',', ".").parse().ok()?;
    let unit = caps
        .get(2)
        .map(|m| m.as_str().to_ascii_lowercase())
        .unwrap_or_default();
    let multiplier: u64 = match unit.chars().next() {
        Some('k') => 1 << 10,
        Some('m') => 1 << 20,
        Some('g') => 1 << 30,
        Some('t') => 1 << 40,
        _ => 1,
    };
    Some((amount * multiplier as f64) as u64)
}

/// Decode the HTML entities that show up in scraped titles.
pub fn decode_html_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }

    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        rest = &rest[amp..];
        let decoded = rest
            .find(';')
            .filter(|&end| end <= 10)
            .and_then(|end| decode_entity(&rest[1..end]).map(|c| (c, end)));
        match decoded {
            Some((c, end)) => {
                out.push(c);
                rest = &rest[end + 1..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn decode_entity(entity: &str) -> Option<char> {
    match entity {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "nbsp" => Some(' '),
        _ => {
            let code = entity.strip_prefix('#')?;
            let value = match code.strip_prefix(['x', 'X']) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => code.parse().ok()?,
            };
            char::from_u32(value)
        }
    }
}

/// Strip markup noise and punctuation, collapsing whitespace.
pub fn sanitize(text: &str) -> String {
    let text = decode_html_entities(text)
        .replace(".torrent", " ")
        .replace("www.", " ")
        .replace(".com", " ")
        .replace(".net", " ");

    let replaced: String = text
        .chars()
        .map(|c| match c {
            '\\' | '/' | '%' | '_' | ';' | '-' | '.' | '(' | ')' | '[' | ']' | '\n' | '\r'
            | '&' | '~' | '{' | '}' | '*' | '@' | '^' | '\'' | '=' | '!' | ',' | '|' | '#'
            | '\u{00D0}' | '\u{00A1}' | '\u{00C0}' | '\u{00C1}' => ' ',
            c => c,
        })
        .collect();

    replaced.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// NFKD, drop combining marks, lowercase.
pub fn normalize(text: &str) -> String {
    text.nfkd()
        .filter(|c| !is_combining_mark(*c))
        .collect::<String>()
        .to_lowercase()
}

/// Split a query into distinct normalized tokens, dropping stopwords.
pub fn tokenize_search_keywords(keywords: &str) -> Vec<String> {
    let sanitized = sanitize(keywords);
    let mut seen = HashSet::new();
    sanitized
        .split(' ')
        .map(normalize)
        .filter(|t| !t.is_empty() && !is_stopword(t))
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

/// Normalized text a result is matched against: its display name, the
/// parent's display name for crawled children, and the filename.
pub fn search_result_as_normalized_string(sr: &SearchResult) -> String {
    let mut text = String::from(sr.display_name());
    if let Some(from) = sr.crawled_from() {
        text.push(' ');
        text.push_str(&from.parent_display_name);
    }
    if let Some(filename) = sr.filename() {
        text.push(' ');
        text.push_str(filename);
    }
    normalize(&sanitize(&text))
}

/// Edit distance over chars, two rolling rows.
pub fn levenshtein_distance(a: &str, b: &str) -> usize {
    let (mut short, mut long): (Vec<char>, Vec<char>) = (a.chars().collect(), b.chars().collect());
    if short.len() > long.len() {
        std::mem::swap(&mut short, &mut long);
    }
    if short.is_empty() {
        return long.len();
    }

    let mut prev: Vec<usize> = (0..=short.len()).collect();
    let mut curr = vec![0usize; short.len() + 1];
    for (j, lc) in long.iter().enumerate() {
        curr[0] = j + 1;
        for (i, sc) in short.iter().enumerate() {
            let cost = usize::from(sc != lc);
            curr[i + 1] = (prev[i + 1] + 1).min(curr[i] + 1).min(prev[i] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[short.len()]
}

/// Distance no larger than half the longer string.
pub fn is_fuzzy_match(text: &str, keyword: &str) -> bool {
    let threshold = text.chars().count().max(keyword.chars().count()) / 2;
    levenshtein_distance(text, keyword) <= threshold
}

/// Whether any keyword occurs in the result's normalized text, or is a fuzzy
/// match for the whole text or one of its words.
///
/// Matching single words lets a misspelt keyword hit inside a long title,
/// at the price of loose matches for short keywords: the threshold of a
/// five letter keyword is two edits, so "linux" accepts the word "minus".
pub fn one_keyword_matched_or_fuzzy_matched(keywords: &[String], sr: &SearchResult) -> bool {
    let text = search_result_as_normalized_string(sr);
    keywords.iter().any(|keyword| {
        let keyword = keyword.to_lowercase();
        text.contains(&keyword)
            || is_fuzzy_match(&text, &keyword)
            || text.split(' ').any(|word| is_fuzzy_match(word, &keyword))
    })
}

/// Number of `tokens` found in `normalized`.
pub fn count_matched_tokens(normalized: &str, tokens: &[String]) -> usize {
    if normalized.is_empty() {
        return 0;
    }
    tokens.iter().filter(|t| normalized.contains(t.as_str())).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixtures;

    fn keywords(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    #[test]
    fn test_parse_info_hash() {
        let hash = "ABCDEF0123456789ABCDEF0123456789ABCDEF01";
        let url = format!("magnet:?xt=urn:btih:{hash}&dn=thing");
        assert_eq!(parse_info_hash(&url), Some(hash.to_lowercase()));
        assert_eq!(parse_info_hash("magnet:?xt=urn:btih:tooshort"), None);
        assert_eq!(parse_info_hash("https://example.org"), None);
    }

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("512 B"), Some(512));
        assert_eq!(parse_size("2 KB"), Some(2048));
        assert_eq!(parse_size("1.5 GB"), Some(1_610_612_736));
        assert_eq!(parse_size("700 MiB"), Some(700 * 1024 * 1024));
        assert_eq!(parse_size("1,5 kb"), Some(1536));
        assert_eq!(parse_size("42"), Some(42));
        assert_eq!(parse_size("huge"), None);
    }

    #[test]
    fn test_reduce_html() {
        let html = "<head>junk</head><body>results</body>";
        let start = html.find("<body>");
        let end = html.find("</body>");
        assert_eq!(reduce_html(html, start, end), Some("<body>results"));
        assert_eq!(reduce_html(html, None, Some(10)), None);
        assert_eq!(reduce_html(html, Some(10), Some(5)), None);
        assert_eq!(reduce_html(html, Some(0), Some(html.len())), Some(html));
    }

    #[test]
    fn test_decode_html_entities() {
        assert_eq!(decode_html_entities("Tom &amp; Jerry"), "Tom & Jerry");
        assert_eq!(decode_html_entities("&#39;quoted&#x27;"), "'quoted'");
        assert_eq!(decode_html_entities("a & b"), "a & b");
        assert_eq!(decode_html_entities("&bogus;"), "&bogus;");
    }

    #[test]
    fn test_sanitize_and_normalize() {
        assert_eq!(sanitize("www.site.com_Some-Movie.(2020).torrent"), "site Some Movie 2020");
        assert_eq!(normalize("Café Ñandú"), "cafe nandu");
    }

    #[test]
    fn test_tokenize_drops_stopwords_and_duplicates() {
        let tokens = tokenize_search_keywords("The Matrix and the MATRIX reloaded");
        assert_eq!(tokens, keywords(&["matrix", "reloaded"]));
        assert!(tokenize_search_keywords("   ").is_empty());
    }

    #[test]
    fn test_levenshtein() {
        assert_eq!(levenshtein_distance("", "abc"), 3);
        assert_eq!(levenshtein_distance("kitten", "sitting"), 3);
        assert_eq!(levenshtein_distance("ubuntu", "unbuntu"), 1);
        assert_eq!(levenshtein_distance("same", "same"), 0);
    }

    #[test]
    fn test_fuzzy_match_accepts_misspelling() {
        let sr = fixtures::file_result("Unbuntu 24.04 Desktop", "unbuntu-24.04-desktop-amd64.iso");
        assert!(one_keyword_matched_or_fuzzy_matched(&keywords(&["ubuntu"]), &sr));
    }

    #[test]
    fn test_fuzzy_match_short_keyword_accepts_near_word() {
        let sr = fixtures::file_result("Minus One Soundtrack", "minus-one-soundtrack.flac");
        let text = search_result_as_normalized_string(&sr);

        assert!(!text.contains("linux"));
        assert!(!is_fuzzy_match(&text, "linux"));
        assert_eq!(levenshtein_distance("linux", "minus"), 2);
        assert!(one_keyword_matched_or_fuzzy_matched(&keywords(&["linux"]), &sr));
    }

    #[test]
    fn test_fuzzy_match_rejects_unrelated() {
        let sr = fixtures::file_result("Microsoft Windows Professional", "windows-professional.iso");
        assert!(!one_keyword_matched_or_fuzzy_matched(&keywords(&["ubuntu"]), &sr));
    }

    #[test]
    fn test_normalized_string_includes_parent_name() {
        let parent = fixtures::torrent_result("Great Album", fixtures::INFO_HASH);
        let child = SearchResult::crawled_child(&parent, "cd1/Track_01.flac", 10);
        let text = search_result_as_normalized_string(&child);
        assert!(text.contains("great album"));
        assert!(text.contains("track 01 flac"));
    }

    #[test]
    fn test_count_matched_tokens() {
        let tokens = keywords(&["foo", "bar", "baz"]);
        assert_eq!(count_matched_tokens("foo bar", &tokens), 2);
        assert_eq!(count_matched_tokens("", &tokens), 0);
    }

    #[test]
    fn test_crawl_torrent_info_skips_padding() {
        let parent = fixtures::torrent_result("Linux ISOs", fixtures::INFO_HASH);
        let data = fixtures::multi_file_torrent(
            "linux",
            &[
                ("disc.iso", 1000),
                (".pad/24", 24),
                ("README.txt", 10),
            ],
        );
        let children = crawl_torrent_info(&parent, &data, &StopHandle::new()).unwrap();
        let paths: Vec<_> = children
            .iter()
            .map(|c| c.crawled_from().unwrap().path.clone())
            .collect();
        assert_eq!(paths, vec!["linux/disc.iso", "linux/README.txt"]);
        assert_eq!(children[0].size(), Some(1000));
        assert_eq!(children[0].source(), parent.source());
    }

    #[test]
    fn test_crawl_torrent_info_propagates_parse_error() {
        let parent = fixtures::torrent_result("Broken", fixtures::INFO_HASH);
        assert!(crawl_torrent_info(&parent, b"garbage", &StopHandle::new()).is_err());
    }

    #[test]
    fn test_crawl_torrent_info_stops_early() {
        let parent = fixtures::torrent_result("Stopped", fixtures::INFO_HASH);
        let data = fixtures::multi_file_torrent("x", &[("a", 1), ("b", 2)]);
        let stop = StopHandle::new();
        stop.stop();
        assert!(crawl_torrent_info(&parent, &data, &stop).unwrap().is_empty());
    }
}
