//! HTTP fetch capability consumed by web performers.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{COOKIE, REFERER, USER_AGENT};
use reqwest::Client;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum HttpError {
    #[error("Request timed out")]
    Timeout,

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("HTTP {status}")]
    Status { status: u16 },

    #[error("Failed to read body: {0}")]
    Body(String),

    #[error("Request failed: {0}")]
    Request(String),
}

impl HttpError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, HttpError::Timeout)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            HttpError::Timeout => "timeout",
            HttpError::ConnectionFailed(_) => "connection",
            HttpError::Status { .. } => "status",
            HttpError::Body(_) => "body",
            HttpError::Request(_) => "request",
        }
    }
}

impl From<reqwest::Error> for HttpError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            HttpError::Timeout
        } else if e.is_connect() {
            HttpError::ConnectionFailed(e.to_string())
        } else if let Some(status) = e.status() {
            HttpError::Status {
                status: status.as_u16(),
            }
        } else if e.is_body() || e.is_decode() {
            HttpError::Body(e.to_string())
        } else {
            HttpError::Request(e.to_string())
        }
    }
}

/// One outgoing request.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: String,
    pub timeout: Duration,
    pub user_agent: String,
    pub referrer: Option<String>,
    pub cookie: Option<String>,
    pub headers: Vec<(String, String)>,
}

impl FetchRequest {
    pub fn new(url: impl Into<String>, timeout: Duration, user_agent: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            timeout,
            user_agent: user_agent.into(),
            referrer: None,
            cookie: None,
            headers: Vec::new(),
        }
    }

    pub fn referrer(mut self, referrer: impl Into<String>) -> Self {
        self.referrer = Some(referrer.into());
        self
    }

    pub fn cookie(mut self, cookie: impl Into<String>) -> Self {
        self.cookie = Some(cookie.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// Blocking-point abstraction over the network.
///
/// Implementations must honor `FetchRequest::timeout` and report it as
/// [`HttpError::Timeout`].
#[async_trait]
pub trait HttpFetcher: Send + Sync {
    async fn get(&self, request: &FetchRequest) -> Result<String, HttpError>;

    async fn get_bytes(&self, request: &FetchRequest) -> Result<Vec<u8>, HttpError>;

    async fn post(
        &self,
        request: &FetchRequest,
        form: &[(String, String)],
    ) -> Result<String, HttpError>;
}

/// reqwest-backed fetcher.
pub struct ReqwestFetcher {
    client: Client,
}

impl ReqwestFetcher {
    pub fn new() -> Result<Self, HttpError> {
        let client = Client::builder()
            .cookie_store(true)
            .build()
            .map_err(|e| HttpError::Request(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    fn prepare(&self, builder: reqwest::RequestBuilder, request: &FetchRequest) -> reqwest::RequestBuilder {
        let mut builder = builder
            .timeout(request.timeout)
            .header(USER_AGENT, &request.user_agent);
        if let Some(referrer) = &request.referrer {
            builder = builder.header(REFERER, referrer);
        }
        if let Some(cookie) = &request.cookie {
            builder = builder.header(COOKIE, cookie);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::Response, HttpError> {
        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(HttpError::Status {
                status: status.as_u16(),
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl HttpFetcher for ReqwestFetcher {
    async fn get(&self, request: &FetchRequest) -> Result<String, HttpError> {
        let builder = self.prepare(self.client.get(&request.url), request);
        Ok(self.send(builder).await?.text().await?)
    }

    async fn get_bytes(&self, request: &FetchRequest) -> Result<Vec<u8>, HttpError> {
        let builder = self.prepare(self.client.get(&request.url), request);
        Ok(self.send(builder).await?.bytes().await?.to_vec())
    }

    async fn post(
        &self,
        request: &FetchRequest,
        form: &[(String, String)],
    ) -> Result<String, HttpError> {
        let builder = self
            .prepare(self.client.post(&request.url), request)
            .form(form);
        Ok(self.send(builder).await?.text().await?)
    }
}
