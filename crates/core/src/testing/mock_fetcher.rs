//! Mock HTTP fetcher for testing.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use crate::search::{FetchRequest, HttpError, HttpFetcher};

/// A recorded request for test assertions.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    pub url: String,
    pub timeout: Duration,
    pub user_agent: String,
    pub referrer: Option<String>,
    pub cookie: Option<String>,
    pub headers: Vec<(String, String)>,
    /// Form data for POST requests.
    pub form: Option<Vec<(String, String)>>,
}

#[derive(Debug, Clone)]
enum Response {
    Text(String),
    Bytes(Vec<u8>),
    Fail(HttpError),
}

/// Mock implementation of the HttpFetcher trait.
///
/// Responses are scripted per URL; the latest setting for a URL wins.
/// Unknown URLs answer with HTTP 404.
///
/// # Example
///
/// ```rust,ignore
/// use fanout_core::testing::MockFetcher;
///
/// let fetcher = MockFetcher::new();
/// fetcher.set_page("https://example.org/search?q=x", "<html>...</html>");
/// fetcher.fail("https://example.org/slow", HttpError::Timeout);
///
/// // ... run a performer ...
///
/// assert_eq!(fetcher.requests().len(), 2);
/// ```
#[derive(Default)]
pub struct MockFetcher {
    responses: Mutex<HashMap<String, Response>>,
    requests: Mutex<Vec<RecordedRequest>>,
    delay: Mutex<Option<Duration>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_page(&self, url: &str, text: &str) {
        self.respond(url, Response::Text(text.to_string()));
    }

    pub fn set_bytes(&self, url: &str, bytes: Vec<u8>) {
        self.respond(url, Response::Bytes(bytes));
    }

    pub fn fail(&self, url: &str, error: HttpError) {
        self.respond(url, Response::Fail(error));
    }

    /// Delay every response by `delay`.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    /// All requests made so far, in order.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn clear_requests(&self) {
        self.requests.lock().unwrap().clear();
    }

    fn respond(&self, url: &str, response: Response) {
        self.responses
            .lock()
            .unwrap()
            .insert(url.to_string(), response);
    }

    async fn answer(
        &self,
        request: &FetchRequest,
        form: Option<&[(String, String)]>,
    ) -> Result<Vec<u8>, HttpError> {
        self.requests.lock().unwrap().push(RecordedRequest {
            url: request.url.clone(),
            timeout: request.timeout,
            user_agent: request.user_agent.clone(),
            referrer: request.referrer.clone(),
            cookie: request.cookie.clone(),
            headers: request.headers.clone(),
            form: form.map(<[_]>::to_vec),
        });

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let response = self.responses.lock().unwrap().get(&request.url).cloned();
        match response {
            Some(Response::Text(text)) => Ok(text.into_bytes()),
            Some(Response::Bytes(bytes)) => Ok(bytes),
            Some(Response::Fail(error)) => Err(error),
            None => Err(HttpError::Status { status: 404 }),
        }
    }
}

#[async_trait]
impl HttpFetcher for MockFetcher {
    async fn get(&self, request: &FetchRequest) -> Result<String, HttpError> {
        let bytes = self.answer(request, None).await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    async fn get_bytes(&self, request: &FetchRequest) -> Result<Vec<u8>, HttpError> {
        self.answer(request, None).await
    }

    async fn post(
        &self,
        request: &FetchRequest,
        form: &[(String, String)],
    ) -> Result<String, HttpError> {
        let bytes = self.answer(request, Some(form)).await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}
