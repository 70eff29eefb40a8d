//! The unit of work for one backend.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use super::{SearchError, SearchResult};

/// Caller-assigned id grouping every task of one logical search.
pub type SearchToken = i64;

/// Cooperative cancellation flag shared between a performer and its owner.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent.
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// One backend's search strategy.
///
/// `perform` runs on a pool worker and must return early once
/// [`is_stopped`](SearchPerformer::is_stopped) flips. Stopping only raises
/// the flag; the manager reports end-of-search when the last task for the
/// token leaves the pool.
#[async_trait]
pub trait SearchPerformer: Send + Sync + 'static {
    fn token(&self) -> SearchToken;

    /// Name used in logs and error messages.
    fn name(&self) -> &str;

    fn stop_handle(&self) -> &StopHandle;

    fn is_stopped(&self) -> bool {
        self.stop_handle().is_stopped()
    }

    fn stop(&self) {
        self.stop_handle().stop();
    }

    fn is_ddos_protection_active(&self) -> bool {
        false
    }

    async fn perform(&self, sink: &ResultSink);

    /// Second phase for crawlable results. No-op unless overridden.
    async fn crawl(&self, _sink: &ResultSink, sr: SearchResult) {
        debug!(
            performer = self.name(),
            result = %sr,
            "Performer has no crawl phase, ignoring"
        );
    }
}

/// What a running task reports back to the manager.
pub enum PerformerEvent {
    Results {
        performer: Arc<dyn SearchPerformer>,
        results: Vec<SearchResult>,
    },
    Error {
        token: SearchToken,
        error: SearchError,
    },
    TaskFinished {
        token: SearchToken,
    },
}

impl std::fmt::Debug for PerformerEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PerformerEvent::Results { performer, results } => f
                .debug_struct("Results")
                .field("performer", &performer.name())
                .field("results", &results.len())
                .finish(),
            PerformerEvent::Error { token, error } => f
                .debug_struct("Error")
                .field("token", token)
                .field("error", error)
                .finish(),
            PerformerEvent::TaskFinished { token } => {
                f.debug_struct("TaskFinished").field("token", token).finish()
            }
        }
    }
}

/// Where a performer delivers its batches.
///
/// Batches never reach the external listener directly; they go to the
/// manager's aggregator which decides what to publish and what to crawl.
#[derive(Clone)]
pub struct ResultSink {
    performer: Arc<dyn SearchPerformer>,
    events: mpsc::UnboundedSender<PerformerEvent>,
}

impl ResultSink {
    pub(crate) fn new(
        performer: Arc<dyn SearchPerformer>,
        events: mpsc::UnboundedSender<PerformerEvent>,
    ) -> Self {
        Self { performer, events }
    }

    /// A sink not attached to any manager, for driving a performer by hand.
    pub fn detached(
        performer: Arc<dyn SearchPerformer>,
    ) -> (Self, mpsc::UnboundedReceiver<PerformerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(performer, tx), rx)
    }

    pub fn token(&self) -> SearchToken {
        self.performer.token()
    }

    /// Forward a batch. Empty batches and batches from a stopped performer
    /// are dropped.
    pub fn emit(&self, results: Vec<SearchResult>) {
        if results.is_empty() {
            return;
        }
        if self.performer.is_stopped() {
            debug!(
                performer = self.performer.name(),
                count = results.len(),
                "Dropping results from stopped performer"
            );
            return;
        }
        let _ = self.events.send(PerformerEvent::Results {
            performer: Arc::clone(&self.performer),
            results,
        });
    }

    pub fn error(&self, error: SearchError) {
        let _ = self.events.send(PerformerEvent::Error {
            token: self.performer.token(),
            error,
        });
    }

    pub(crate) fn finished(&self) {
        let _ = self.events.send(PerformerEvent::TaskFinished {
            token: self.performer.token(),
        });
    }
}
