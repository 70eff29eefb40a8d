//! Search scheduling.
//!
//! The [`SearchManager`] runs performers and their crawl follow-ups on a
//! shared worker pool, funnels everything they report through one
//! aggregator loop, and tells a [`SearchListener`] about results, errors and
//! the end of each search.
//!
//! Task completion travels through the same channel as results. A crawl
//! scheduled from a batch is therefore counted before the completion of the
//! task that produced the batch is processed, and a token's count can only
//! reach zero once every task it spawned is done.

mod pool;
mod registry;

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::ManagerConfig;
use crate::metrics;
use crate::search::{
    PerformerEvent, ResultSink, SearchError, SearchPerformer, SearchResult, SearchToken,
};
use pool::WorkerPool;
use registry::Registry;

/// Token value meaning "every search" for [`SearchManager::stop`].
pub const ALL_TOKENS: SearchToken = -1;

/// Callbacks a UI or CLI implements to receive search output.
///
/// Called from the manager's aggregator task, one call at a time. A
/// panicking callback is logged and does not affect the search.
pub trait SearchListener: Send + Sync {
    fn on_results(&self, token: SearchToken, results: Vec<SearchResult>);

    fn on_error(&self, token: SearchToken, error: SearchError);

    /// Fired once per token when its last task has finished.
    fn on_stopped(&self, token: SearchToken);
}

struct Inner {
    pool: WorkerPool,
    registry: Registry,
    events: mpsc::UnboundedSender<PerformerEvent>,
}

impl Inner {
    fn submit(&self, performer: Arc<dyn SearchPerformer>, crawl: Option<SearchResult>) {
        let token = performer.token();
        let ordinal = self.registry.begin_task(&performer);
        let kind = if crawl.is_some() { "crawl" } else { "perform" };
        let sink = ResultSink::new(Arc::clone(&performer), self.events.clone());

        let future = async move {
            metrics::TASKS_RUN.with_label_values(&[kind]).inc();
            let body = async {
                match crawl {
                    Some(sr) => performer.crawl(&sink, sr).await,
                    None => performer.perform(&sink).await,
                }
            };
            if AssertUnwindSafe(body).catch_unwind().await.is_err() {
                error!(performer = performer.name(), token, kind, "Task panicked");
            }
            sink.finished();
        }
        .boxed();

        debug!(token, ordinal, kind, "Submitting task");
        if !self.pool.submit(ordinal, future) {
            warn!(token, kind, "Worker pool is gone, dropping task");
            self.registry.finish_task(token);
        }
    }

    fn on_results(
        &self,
        listener: &dyn SearchListener,
        performer: Arc<dyn SearchPerformer>,
        results: Vec<SearchResult>,
    ) {
        let token = performer.token();
        let mut publish = Vec::with_capacity(results.len());

        for sr in results {
            if !sr.has_crawlable() {
                publish.push(sr);
                continue;
            }
            let needs_crawl = sr.is_crawlable();
            if sr.is_complete() {
                publish.push(sr.clone());
            }
            if needs_crawl {
                if performer.is_stopped() {
                    debug!(token, result = %sr, "Search stopped, not crawling");
                    continue;
                }
                self.submit(Arc::clone(&performer), Some(sr));
            }
        }

        if !publish.is_empty() {
            metrics::RESULTS_PUBLISHED.inc_by(publish.len() as u64);
            notify(token, "on_results", || listener.on_results(token, publish));
        }
    }
}

fn notify(token: SearchToken, callback: &str, f: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        warn!(token, callback, "Search listener panicked");
    }
}

async fn aggregate(
    inner: Arc<Inner>,
    listener: Arc<dyn SearchListener>,
    mut events: mpsc::UnboundedReceiver<PerformerEvent>,
) {
    while let Some(event) = events.recv().await {
        match event {
            PerformerEvent::Results { performer, results } => {
                inner.on_results(listener.as_ref(), performer, results);
            }
            PerformerEvent::Error { token, error } => {
                warn!(token, error = %error, "Search error");
                notify(token, "on_error", || listener.on_error(token, error));
            }
            PerformerEvent::TaskFinished { token } => {
                if inner.registry.finish_task(token) {
                    debug!(token, "Search finished");
                    notify(token, "on_stopped", || listener.on_stopped(token));
                }
            }
        }
    }
}

/// Schedules performers and crawls, aggregates their output.
///
/// Must be created inside a tokio runtime.
pub struct SearchManager {
    inner: Arc<Inner>,
    aggregator: JoinHandle<()>,
}

impl SearchManager {
    pub fn new(config: &ManagerConfig, listener: Arc<dyn SearchListener>) -> Self {
        let (events, rx) = mpsc::unbounded_channel();
        let inner = Arc::new(Inner {
            pool: WorkerPool::new(config.worker_threads),
            registry: Registry::default(),
            events,
        });
        let aggregator = tokio::spawn(aggregate(Arc::clone(&inner), listener, rx));
        info!(workers = config.worker_threads, "Search manager started");
        Self { inner, aggregator }
    }

    /// Run `performer` on the pool. Rejects negative tokens.
    pub fn perform(&self, performer: Arc<dyn SearchPerformer>) -> Result<(), SearchError> {
        let token = performer.token();
        if token < 0 {
            warn!(token, performer = performer.name(), "Rejecting performer with negative token");
            return Err(SearchError::InvalidToken(token));
        }
        self.inner.submit(performer, None);
        Ok(())
    }

    /// Ask every performer of `token` to stop; [`ALL_TOKENS`] stops all.
    ///
    /// Cooperative: running fetches finish, and `on_stopped` fires once the
    /// token's tasks have drained.
    pub fn stop(&self, token: SearchToken) {
        if token == ALL_TOKENS {
            info!("Stopping all searches");
            self.inner.registry.stop(None);
        } else {
            info!(token, "Stopping search");
            self.inner.registry.stop(Some(token));
        }
    }

    pub fn stop_all(&self) {
        self.stop(ALL_TOKENS);
    }

    /// Whether `token` still has queued or running tasks.
    pub fn is_active(&self, token: SearchToken) -> bool {
        self.inner.registry.outstanding(token) > 0
    }

    pub fn outstanding_tasks(&self, token: SearchToken) -> usize {
        self.inner.registry.outstanding(token)
    }

    pub fn active_tokens(&self) -> Vec<SearchToken> {
        self.inner.registry.active_tokens()
    }
}

impl Drop for SearchManager {
    fn drop(&mut self) {
        self.inner.registry.stop(None);
        self.aggregator.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fixtures, MockPerformer, RecordingListener};
    use std::time::Duration;

    fn manager(listener: &Arc<RecordingListener>) -> SearchManager {
        SearchManager::new(&ManagerConfig { worker_threads: 4 }, listener.clone())
    }

    #[tokio::test]
    async fn test_rejects_negative_token() {
        let listener = Arc::new(RecordingListener::new());
        let manager = manager(&listener);
        let err = manager
            .perform(Arc::new(MockPerformer::new(-3)))
            .unwrap_err();
        assert_eq!(err, SearchError::InvalidToken(-3));
        assert!(manager.active_tokens().is_empty());
    }

    #[tokio::test]
    async fn test_plain_results_published_then_stopped() {
        let listener = Arc::new(RecordingListener::new());
        let manager = manager(&listener);
        let performer = MockPerformer::new(1).with_batches(vec![
            vec![fixtures::file_result("a", "a.txt")],
            vec![fixtures::file_result("b", "b.txt")],
        ]);

        manager.perform(Arc::new(performer)).unwrap();
        listener.wait_stopped(1, Duration::from_secs(2)).await;

        assert_eq!(listener.result_names(1), vec!["a", "b"]);
        assert_eq!(listener.stopped_count(1), 1);
        assert!(!manager.is_active(1));
    }

    #[tokio::test]
    async fn test_incomplete_crawlable_only_crawled() {
        let listener = Arc::new(RecordingListener::new());
        let manager = manager(&listener);
        let placeholder = fixtures::preliminary_crawlable("folder");
        let performer = Arc::new(
            MockPerformer::new(2)
                .with_batches(vec![vec![placeholder]])
                .with_crawl_children(2),
        );

        manager.perform(performer.clone()).unwrap();
        listener.wait_stopped(2, Duration::from_secs(2)).await;

        assert_eq!(listener.result_names(2), vec!["folder-child-0", "folder-child-1"]);
        assert_eq!(performer.crawled(), vec!["folder"]);
    }

    #[tokio::test]
    async fn test_complete_crawlable_published_and_crawled() {
        let listener = Arc::new(RecordingListener::new());
        let manager = manager(&listener);
        let torrent = fixtures::torrent_result("album", fixtures::INFO_HASH);
        let performer = Arc::new(
            MockPerformer::new(3)
                .with_batches(vec![vec![torrent]])
                .with_crawl_children(1),
        );

        manager.perform(performer.clone()).unwrap();
        listener.wait_stopped(3, Duration::from_secs(2)).await;

        assert_eq!(listener.result_names(3), vec!["album", "album-child-0"]);
    }

    #[tokio::test]
    async fn test_errors_forwarded() {
        let listener = Arc::new(RecordingListener::new());
        let manager = manager(&listener);
        let performer = MockPerformer::new(4).with_error(SearchError::Backend {
            performer: "mock".to_string(),
            message: "boom".to_string(),
        });

        manager.perform(Arc::new(performer)).unwrap();
        listener.wait_stopped(4, Duration::from_secs(2)).await;

        assert_eq!(listener.errors(4).len(), 1);
    }

    #[tokio::test]
    async fn test_panicking_performer_still_finishes() {
        let listener = Arc::new(RecordingListener::new());
        let manager = manager(&listener);

        manager
            .perform(Arc::new(MockPerformer::new(6).panicking()))
            .unwrap();
        listener.wait_stopped(6, Duration::from_secs(2)).await;

        assert_eq!(listener.stopped_count(6), 1);
    }

    #[tokio::test]
    async fn test_panicking_listener_does_not_break_search() {
        let listener = Arc::new(RecordingListener::new().panic_on_results());
        let manager = manager(&listener);
        let performer = MockPerformer::new(8).with_batches(vec![
            vec![fixtures::file_result("a", "a.txt")],
            vec![fixtures::file_result("b", "b.txt")],
        ]);

        manager.perform(Arc::new(performer)).unwrap();
        listener.wait_stopped(8, Duration::from_secs(2)).await;
        assert_eq!(listener.stopped_count(8), 1);
    }

    #[tokio::test]
    async fn test_stop_cancels_cooperatively() {
        let listener = Arc::new(RecordingListener::new());
        let manager = manager(&listener);
        let performer = Arc::new(MockPerformer::new(7).blocking_until_stopped());

        manager.perform(performer.clone()).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(manager.is_active(7));

        manager.stop(7);
        listener.wait_stopped(7, Duration::from_secs(2)).await;
        assert!(performer.is_stopped());
        assert!(listener.result_names(7).is_empty());
    }

    #[tokio::test]
    async fn test_stop_all() {
        let listener = Arc::new(RecordingListener::new());
        let manager = manager(&listener);
        let a = Arc::new(MockPerformer::new(10).blocking_until_stopped());
        let b = Arc::new(MockPerformer::new(11).blocking_until_stopped());

        manager.perform(a.clone()).unwrap();
        manager.perform(b.clone()).unwrap();
        manager.stop(ALL_TOKENS);

        listener.wait_stopped(10, Duration::from_secs(2)).await;
        listener.wait_stopped(11, Duration::from_secs(2)).await;
        assert!(a.is_stopped() && b.is_stopped());
    }
}
