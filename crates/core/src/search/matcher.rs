//! Detached view over one regex match.

use std::collections::HashMap;

use regex_lite::{Captures, Regex};

/// Owned copies of the groups captured by a single match.
///
/// Holding a `SearchMatcher` does not keep the scanned page alive.
#[derive(Debug, Clone, Default)]
pub struct SearchMatcher {
    groups: Vec<Option<String>>,
    named: HashMap<String, String>,
}

impl SearchMatcher {
    pub fn from_captures(regex: &Regex, caps: &Captures<'_>) -> Self {
        let groups = caps
            .iter()
            .map(|m| m.map(|m| m.as_str().to_string()))
            .collect();
        let named = regex
            .capture_names()
            .flatten()
            .filter_map(|name| {
                caps.name(name)
                    .map(|m| (name.to_string(), m.as_str().to_string()))
            })
            .collect();
        Self { groups, named }
    }

    /// Group by index. `0` is the whole match.
    pub fn group(&self, index: usize) -> Option<&str> {
        self.groups.get(index).and_then(|g| g.as_deref())
    }

    /// Named group, trimmed. `None` when the group did not participate or is
    /// blank.
    pub fn named(&self, name: &str) -> Option<&str> {
        self.named
            .get(name)
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
    }

    pub fn has(&self, name: &str) -> bool {
        self.named(name).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_groups_outlive_page() {
        let re = Regex::new(r#"<a href="(?P<url>[^"]+)">(?P<title>[^<]*)</a>(?P<extra>x)?"#).unwrap();
        let matcher = {
            let page = String::from(r#"<p><a href="/t/1"> Title </a></p>"#);
            let caps = re.captures(&page).unwrap();
            SearchMatcher::from_captures(&re, &caps)
        };
        assert_eq!(matcher.named("url"), Some("/t/1"));
        assert_eq!(matcher.named("title"), Some("Title"));
        assert_eq!(matcher.group(1), Some("/t/1"));
        assert!(matcher.named("extra").is_none());
        assert!(!matcher.has("missing"));
    }
}
