//! Search listener that prints accepted results as JSON lines.

use std::collections::HashSet;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, warn};

use fanout_core::{
    passes_filter_pipeline, search::SearchError, KeywordDetector, KeywordFilter, SearchListener,
    SearchResult, SearchToken,
};

/// One output line.
#[derive(Serialize)]
struct ResultLine<'a> {
    backend: &'a str,
    #[serde(flatten)]
    result: &'a SearchResult,
}

pub struct OutputListener<W> {
    out: Mutex<W>,
    filters: Vec<KeywordFilter>,
    backends: Vec<String>,
    detector: Option<Arc<KeywordDetector>>,
    pending: Mutex<HashSet<SearchToken>>,
    printed: AtomicUsize,
    rejected: AtomicUsize,
    done: watch::Sender<bool>,
}

impl<W: Write + Send> OutputListener<W> {
    /// `backends[token]` names the backend searched under `token`.
    pub fn new(out: W, filters: Vec<KeywordFilter>, backends: Vec<String>) -> Self {
        let pending = (0..backends.len() as SearchToken).collect();
        let (done, _) = watch::channel(backends.is_empty());
        Self {
            out: Mutex::new(out),
            filters,
            backends,
            detector: None,
            pending: Mutex::new(pending),
            printed: AtomicUsize::new(0),
            rejected: AtomicUsize::new(0),
            done,
        }
    }

    pub fn with_detector(mut self, detector: Arc<KeywordDetector>) -> Self {
        self.detector = Some(detector);
        self
    }

    /// Resolves once every backend has stopped.
    pub async fn finished(&self) {
        let mut rx = self.done.subscribe();
        let _ = rx.wait_for(|done| *done).await;
    }

    pub fn printed(&self) -> usize {
        self.printed.load(Ordering::SeqCst)
    }

    pub fn rejected(&self) -> usize {
        self.rejected.load(Ordering::SeqCst)
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner().unwrap_or_else(|e| e.into_inner())
    }

    fn backend(&self, token: SearchToken) -> &str {
        usize::try_from(token)
            .ok()
            .and_then(|i| self.backends.get(i))
            .map_or("unknown", String::as_str)
    }
}

impl<W: Write + Send> SearchListener for OutputListener<W> {
    fn on_results(&self, token: SearchToken, results: Vec<SearchResult>) {
        let (accepted, dropped): (Vec<_>, Vec<_>) = results
            .into_iter()
            .partition(|sr| passes_filter_pipeline(sr, &self.filters));
        if !dropped.is_empty() {
            debug!(token, count = dropped.len(), "Results rejected by keyword filters");
            self.rejected.fetch_add(dropped.len(), Ordering::SeqCst);
        }
        if accepted.is_empty() {
            return;
        }

        if let Some(detector) = &self.detector {
            detector.feed_search_results(&accepted);
        }

        let backend = self.backend(token);
        let mut out = self.out.lock().unwrap_or_else(|e| e.into_inner());
        for result in &accepted {
            let line = ResultLine { backend, result };
            let written = serde_json::to_writer(&mut *out, &line)
                .map_err(std::io::Error::from)
                .and_then(|_| out.write_all(b"\n"));
            match written {
                Ok(()) => {
                    self.printed.fetch_add(1, Ordering::SeqCst);
                }
                Err(e) => warn!(token, error = %e, "Failed to write result"),
            }
        }
        let _ = out.flush();
    }

    fn on_error(&self, token: SearchToken, error: SearchError) {
        warn!(backend = self.backend(token), error = %error, "Search error");
    }

    fn on_stopped(&self, token: SearchToken) {
        debug!(backend = self.backend(token), "Backend finished");
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending.remove(&token);
        if pending.is_empty() {
            self.done.send_replace(true);
        }
    }
}
