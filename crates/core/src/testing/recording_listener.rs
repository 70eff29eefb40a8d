//! Search listener that records every callback.

use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::Notify;

use crate::manager::SearchListener;
use crate::search::{SearchError, SearchResult, SearchToken};

/// One listener callback, in arrival order.
#[derive(Debug, Clone)]
pub enum ListenerEvent {
    Results(SearchToken, Vec<SearchResult>),
    Error(SearchToken, SearchError),
    Stopped(SearchToken),
}

/// Records callbacks and lets async tests wait for them.
#[derive(Default)]
pub struct RecordingListener {
    events: Mutex<Vec<ListenerEvent>>,
    changed: Notify,
    panic_on_results: bool,
}

impl RecordingListener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record, then panic, on every `on_results`.
    pub fn panic_on_results(mut self) -> Self {
        self.panic_on_results = true;
        self
    }

    pub fn events(&self) -> Vec<ListenerEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Published results of `token`, flattened in arrival order.
    pub fn results(&self, token: SearchToken) -> Vec<SearchResult> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                ListenerEvent::Results(t, results) if t == token => Some(results),
                _ => None,
            })
            .flatten()
            .collect()
    }

    pub fn result_names(&self, token: SearchToken) -> Vec<String> {
        self.results(token)
            .iter()
            .map(|r| r.display_name().to_string())
            .collect()
    }

    pub fn errors(&self, token: SearchToken) -> Vec<SearchError> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                ListenerEvent::Error(t, error) if t == token => Some(error),
                _ => None,
            })
            .collect()
    }

    pub fn stopped_count(&self, token: SearchToken) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, ListenerEvent::Stopped(t) if *t == token))
            .count()
    }

    /// Wait until `on_stopped(token)` has fired. Panics after `timeout`.
    pub async fn wait_stopped(&self, token: SearchToken, timeout: Duration) {
        self.wait_until(timeout, || self.stopped_count(token) > 0)
            .await;
    }

    /// Wait until at least `n` results of `token` were published.
    pub async fn wait_results(&self, token: SearchToken, n: usize, timeout: Duration) {
        self.wait_until(timeout, || self.results(token).len() >= n)
            .await;
    }

    async fn wait_until(&self, timeout: Duration, condition: impl Fn() -> bool) {
        let wait = async {
            loop {
                let changed = self.changed.notified();
                if condition() {
                    return;
                }
                changed.await;
            }
        };
        if tokio::time::timeout(timeout, wait).await.is_err() {
            panic!("condition not met within {timeout:?}; events: {:?}", self.events());
        }
    }

    fn record(&self, event: ListenerEvent) {
        self.events.lock().unwrap().push(event);
        self.changed.notify_waiters();
    }
}

impl SearchListener for RecordingListener {
    fn on_results(&self, token: SearchToken, results: Vec<SearchResult>) {
        self.record(ListenerEvent::Results(token, results));
        if self.panic_on_results {
            panic!("recording listener panicked");
        }
    }

    fn on_error(&self, token: SearchToken, error: SearchError) {
        self.record(ListenerEvent::Error(token, error));
    }

    fn on_stopped(&self, token: SearchToken) {
        self.record(ListenerEvent::Stopped(token));
    }
}
