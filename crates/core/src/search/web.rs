//! Shared state and fetch helpers for performers that talk to a website.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use super::http::{FetchRequest, HttpError, HttpFetcher};
use super::performer::{SearchToken, StopHandle};
use super::FetchError;
use crate::config::HttpConfig;
use crate::metrics;

const MAX_URL_IN_ERRORS: usize = 100;

/// Identity, keywords and fetch capability of a web backend.
///
/// Concrete performers embed one of these and delegate their
/// `token`/`name`/`stop_handle` to it.
pub struct WebSearchPerformer {
    name: String,
    domain: String,
    token: SearchToken,
    keywords: String,
    encoded_keywords: String,
    timeout: Duration,
    user_agent: String,
    cookie: Option<String>,
    headers: Vec<(String, String)>,
    fetcher: Arc<dyn HttpFetcher>,
    stop: StopHandle,
}

impl WebSearchPerformer {
    pub fn new(
        name: impl Into<String>,
        domain: impl Into<String>,
        token: SearchToken,
        keywords: impl Into<String>,
        http: &HttpConfig,
        fetcher: Arc<dyn HttpFetcher>,
    ) -> Self {
        let keywords = keywords.into();
        let encoded_keywords = encode_keywords(&keywords);
        Self {
            name: name.into(),
            domain: domain.into(),
            token,
            keywords,
            encoded_keywords,
            timeout: http.timeout(),
            user_agent: http.user_agent.clone(),
            cookie: None,
            headers: Vec::new(),
            fetcher,
            stop: StopHandle::new(),
        }
    }

    /// Cookie sent with every page fetch.
    pub fn with_cookie(mut self, cookie: impl Into<String>) -> Self {
        self.cookie = Some(cookie.into());
        self
    }

    /// Extra header sent with every page fetch.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn token(&self) -> SearchToken {
        self.token
    }

    pub fn keywords(&self) -> &str {
        &self.keywords
    }

    pub fn encoded_keywords(&self) -> &str {
        &self.encoded_keywords
    }

    pub fn stop_handle(&self) -> &StopHandle {
        &self.stop
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_stopped()
    }

    fn request(&self, url: &str, timeout: Duration) -> FetchRequest {
        let mut request = FetchRequest::new(url, timeout, &self.user_agent);
        request.cookie = self.cookie.clone();
        request.headers = self.headers.clone();
        request
    }

    /// Fetch a page as text with the default timeout.
    pub async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let request = self.request(url, self.timeout);
        debug!(performer = %self.name, url = %url, "Fetching page");
        self.fetcher
            .get(&request)
            .await
            .map_err(|e| self.wrap(url, self.timeout, e))
    }

    /// Fetch raw bytes, e.g. a `.torrent` file.
    pub async fn fetch_bytes(
        &self,
        url: &str,
        referrer: Option<&str>,
        timeout: Duration,
    ) -> Result<Vec<u8>, FetchError> {
        let mut request = self.request(url, timeout);
        request.referrer = referrer.map(str::to_string);
        debug!(performer = %self.name, url = %url, "Fetching bytes");
        self.fetcher
            .get_bytes(&request)
            .await
            .map_err(|e| self.wrap(url, timeout, e))
    }

    /// POST a form and return the response text.
    pub async fn post(&self, url: &str, form: &[(String, String)]) -> Result<String, FetchError> {
        let request = self.request(url, self.timeout);
        debug!(performer = %self.name, url = %url, "Posting form");
        self.fetcher
            .post(&request, form)
            .await
            .map_err(|e| self.wrap(url, self.timeout, e))
    }

    fn wrap(&self, url: &str, timeout: Duration, error: HttpError) -> FetchError {
        let domain = reqwest::Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_else(|| self.domain.clone());
        let url = truncate_url(url);
        let error = if error.is_timeout() {
            FetchError::Timeout {
                performer: self.name.clone(),
                domain,
                url,
                timeout_ms: timeout.as_millis() as u64,
            }
        } else {
            FetchError::Http {
                performer: self.name.clone(),
                domain,
                url,
                source: error,
            }
        };
        metrics::FETCH_FAILURES
            .with_label_values(&[error.kind()])
            .inc();
        error
    }
}

pub fn encode_keywords(keywords: &str) -> String {
    urlencoding::encode(keywords.trim()).into_owned()
}

fn truncate_url(url: &str) -> String {
    if url.chars().count() <= MAX_URL_IN_ERRORS {
        url.to_string()
    } else {
        let mut truncated: String = url.chars().take(MAX_URL_IN_ERRORS).collect();
        truncated.push_str("...");
        truncated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockFetcher;

    fn performer(fetcher: Arc<MockFetcher>) -> WebSearchPerformer {
        WebSearchPerformer::new(
            "test",
            "example.org",
            7,
            " free software ",
            &HttpConfig::default(),
            fetcher,
        )
        .with_cookie("session=1")
    }

    #[test]
    fn test_encode_keywords() {
        assert_eq!(encode_keywords(" free software "), "free%20software");
        assert_eq!(encode_keywords("a&b"), "a%26b");
    }

    #[tokio::test]
    async fn test_fetch_passes_request_options() {
        let fetcher = Arc::new(MockFetcher::new());
        fetcher.set_page("https://example.org/s", "page");
        let web = performer(fetcher.clone());

        assert_eq!(web.fetch("https://example.org/s").await.unwrap(), "page");
        assert_eq!(web.encoded_keywords(), "free%20software");

        let requests = fetcher.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].cookie.as_deref(), Some("session=1"));
        assert_eq!(requests[0].timeout, Duration::from_millis(5000));
    }

    #[tokio::test]
    async fn test_timeout_is_wrapped_with_context() {
        let fetcher = Arc::new(MockFetcher::new());
        let long_url = format!("https://slow.example.org/{}", "x".repeat(200));
        fetcher.fail(&long_url, HttpError::Timeout);
        let web = performer(fetcher);

        let err = web
            .fetch_bytes(&long_url, None, Duration::from_secs(10))
            .await
            .unwrap_err();
        match err {
            FetchError::Timeout {
                performer,
                domain,
                url,
                timeout_ms,
            } => {
                assert_eq!(performer, "test");
                assert_eq!(domain, "slow.example.org");
                assert!(url.ends_with("..."));
                assert_eq!(timeout_ms, 10_000);
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_post_and_status_error() {
        let fetcher = Arc::new(MockFetcher::new());
        fetcher.set_page("https://example.org/api", "{\"ok\":true}");
        fetcher.fail("https://example.org/down", HttpError::Status { status: 503 });
        let web = performer(fetcher.clone());

        let form = vec![("q".to_string(), "x".to_string())];
        assert_eq!(
            web.post("https://example.org/api", &form).await.unwrap(),
            "{\"ok\":true}"
        );
        assert_eq!(fetcher.requests()[0].form, Some(form));

        let err = web.fetch("https://example.org/down").await.unwrap_err();
        assert!(!err.is_timeout());
        assert_eq!(err.kind(), "status");
    }
}
