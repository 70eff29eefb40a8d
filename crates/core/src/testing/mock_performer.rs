//! Mock search performer for testing.

use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Duration;

use crate::search::{
    ResultSink, SearchError, SearchPerformer, SearchResult, SearchToken, StopHandle,
};

/// Mock implementation of the SearchPerformer trait.
///
/// Provides controllable behavior for testing:
/// - Emit scripted batches from `perform`
/// - Expand crawled results into a fixed number of children
/// - Report an error, panic, or run until stopped
///
/// # Example
///
/// ```rust,ignore
/// use fanout_core::testing::{fixtures, MockPerformer};
///
/// let performer = MockPerformer::new(5)
///     .with_batches(vec![vec![fixtures::torrent_result("album", fixtures::INFO_HASH)]])
///     .with_crawl_children(3);
///
/// manager.perform(Arc::new(performer))?;
/// ```
pub struct MockPerformer {
    token: SearchToken,
    stop: StopHandle,
    batches: Vec<Vec<SearchResult>>,
    crawl_children: usize,
    error: Option<SearchError>,
    delay: Option<Duration>,
    panic: bool,
    until_stopped: bool,
    crawled: Mutex<Vec<String>>,
}

impl MockPerformer {
    pub fn new(token: SearchToken) -> Self {
        Self {
            token,
            stop: StopHandle::new(),
            batches: Vec::new(),
            crawl_children: 0,
            error: None,
            delay: None,
            panic: false,
            until_stopped: false,
            crawled: Mutex::new(Vec::new()),
        }
    }

    /// Batches emitted in order by `perform`.
    pub fn with_batches(mut self, batches: Vec<Vec<SearchResult>>) -> Self {
        self.batches = batches;
        self
    }

    /// Children produced per crawled result, named `<parent>-child-<i>`.
    pub fn with_crawl_children(mut self, n: usize) -> Self {
        self.crawl_children = n;
        self
    }

    /// Error reported through the sink at the start of `perform`.
    pub fn with_error(mut self, error: SearchError) -> Self {
        self.error = Some(error);
        self
    }

    /// Sleep before each batch and each crawl.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn panicking(mut self) -> Self {
        self.panic = true;
        self
    }

    /// `perform` polls the stop flag until it is raised.
    pub fn blocking_until_stopped(mut self) -> Self {
        self.until_stopped = true;
        self
    }

    /// Display names of the results crawled so far.
    pub fn crawled(&self) -> Vec<String> {
        self.crawled.lock().unwrap().clone()
    }

    async fn pause(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl SearchPerformer for MockPerformer {
    fn token(&self) -> SearchToken {
        self.token
    }

    fn name(&self) -> &str {
        "mock"
    }

    fn stop_handle(&self) -> &StopHandle {
        &self.stop
    }

    async fn perform(&self, sink: &ResultSink) {
        if self.panic {
            panic!("mock performer panicked");
        }
        if let Some(error) = &self.error {
            sink.error(error.clone());
        }
        for batch in &self.batches {
            if self.is_stopped() {
                return;
            }
            self.pause().await;
            sink.emit(batch.clone());
        }
        while self.until_stopped && !self.is_stopped() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    async fn crawl(&self, sink: &ResultSink, sr: SearchResult) {
        self.crawled
            .lock()
            .unwrap()
            .push(sr.display_name().to_string());
        self.pause().await;

        let name = sr.display_name().to_string();
        let children: Vec<SearchResult> = (0..self.crawl_children)
            .map(|i| SearchResult::crawled_child(&sr, &format!("{name}/{name}-child-{i}"), 1))
            .collect();
        sr.set_crawlable_children(children.clone());
        sink.emit(children);
    }
}
