use regex_lite::Regex;

use super::{
    types::{Config, CrawlMode},
    ConfigError,
};

/// Validate configuration
/// Currently validates:
/// - Worker pool is not empty
/// - Cache bounds are not zero
/// - Detector queue can hold at least one request
/// - Backends have unique names, a parsable search URL template and
///   compilable patterns
/// - `details_page` backends carry a details pattern
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.manager.worker_threads == 0 {
        return Err(ConfigError::ValidationError(
            "manager.worker_threads cannot be 0".to_string(),
        ));
    }

    if config.crawl.cache_max_entries == 0 || config.crawl.cache_max_bytes == 0 {
        return Err(ConfigError::ValidationError(
            "crawl cache bounds cannot be 0".to_string(),
        ));
    }

    if config.detector.max_pending_requests == 0 {
        return Err(ConfigError::ValidationError(
            "detector.max_pending_requests cannot be 0".to_string(),
        ));
    }

    let mut names = std::collections::HashSet::new();
    for backend in &config.backends {
        if !names.insert(backend.name.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "duplicate backend name: {}",
                backend.name
            )));
        }
        if !backend.search_url.contains("{keywords}") {
            return Err(ConfigError::ValidationError(format!(
                "backends.{}.search_url must contain {{keywords}}",
                backend.name
            )));
        }
        if backend.pages == 0 {
            return Err(ConfigError::ValidationError(format!(
                "backends.{}.pages cannot be 0",
                backend.name
            )));
        }
        if backend.crawl == CrawlMode::DetailsPage && backend.details_pattern.is_none() {
            return Err(ConfigError::ValidationError(format!(
                "backends.{}.details_pattern is required for details_page crawl",
                backend.name
            )));
        }
        for pattern in std::iter::once(&backend.pattern)
            .chain(backend.alt_pattern.iter())
            .chain(backend.details_pattern.iter())
        {
            Regex::new(pattern).map_err(|e| {
                ConfigError::ValidationError(format!(
                    "backends.{}: invalid pattern: {}",
                    backend.name, e
                ))
            })?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendConfig;

    fn backend(name: &str) -> BackendConfig {
        BackendConfig {
            name: name.to_string(),
            domain: "example.org".to_string(),
            search_url: "https://{domain}/s/{keywords}/{page}".to_string(),
            pattern: "(?P<display_name>x)".to_string(),
            alt_pattern: None,
            page_prefix: None,
            page_suffix: None,
            pages: 1,
            max_results: 10,
            num_crawls: 1,
            crawl: CrawlMode::None,
            details_pattern: None,
            keyword_filter: true,
            enabled: true,
        }
    }

    #[test]
    fn test_validate_default_config() {
        assert!(validate_config(&Config::default()).is_ok());
    }

    #[test]
    fn test_validate_zero_workers_fails() {
        let mut config = Config::default();
        config.manager.worker_threads = 0;
        let err = validate_config(&config).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn test_validate_duplicate_backend_fails() {
        let config = Config {
            backends: vec![backend("a"), backend("a")],
            ..Default::default()
        };
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_validate_bad_pattern_fails() {
        let mut b = backend("a");
        b.alt_pattern = Some("(unclosed".to_string());
        let config = Config {
            backends: vec![b],
            ..Default::default()
        };
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("invalid pattern"));
    }

    #[test]
    fn test_validate_url_without_keywords_fails() {
        let mut b = backend("a");
        b.search_url = "https://example.org/".to_string();
        let config = Config {
            backends: vec![b],
            ..Default::default()
        };
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_details_page_needs_pattern() {
        let mut b = backend("a");
        b.crawl = CrawlMode::DetailsPage;
        let config = Config {
            backends: vec![b.clone()],
            ..Default::default()
        };
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("details_pattern"));

        b.details_pattern = Some("(?P<magnet>magnet:[^\"]+".to_string());
        let config = Config {
            backends: vec![b.clone()],
            ..Default::default()
        };
        assert!(validate_config(&config).is_err());

        b.details_pattern = Some("(?P<magnet>magnet:[^\"]+)".to_string());
        let config = Config {
            backends: vec![b],
            ..Default::default()
        };
        assert!(validate_config(&config).is_ok());
    }
}
