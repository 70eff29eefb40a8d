//! Rate-limited background rebuilds of keyword histograms.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{Feature, Shared};
use crate::config::DetectorConfig;

#[derive(Default)]
struct DispatchState {
    queue: VecDeque<Feature>,
    last_finished: Option<Instant>,
}

enum Step {
    Wait,
    SleepUntil(Instant),
    Rebuild(Feature),
}

/// Single background task draining a small queue of rebuild requests, at
/// most one rebuild per `interval`.
///
/// The queue holds at most one request per feature and at most
/// `max_pending` requests; the oldest is dropped on overflow. The task is
/// started on first use and aborted on shutdown, so at most one is alive.
pub(crate) struct Dispatcher {
    shared: Arc<Shared>,
    state: Arc<Mutex<DispatchState>>,
    wake: Arc<Notify>,
    running: Arc<AtomicBool>,
    task: Mutex<Option<JoinHandle<()>>>,
    interval: Duration,
    max_pending: usize,
}

fn lock(state: &Mutex<DispatchState>) -> MutexGuard<'_, DispatchState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Dispatcher {
    pub fn new(shared: Arc<Shared>, config: &DetectorConfig) -> Self {
        Self {
            shared,
            state: Arc::new(Mutex::new(DispatchState::default())),
            wake: Arc::new(Notify::new()),
            running: Arc::new(AtomicBool::new(false)),
            task: Mutex::new(None),
            interval: config.dispatch_interval(),
            max_pending: config.max_pending_requests.max(1),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn ensure_started(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!("No tokio runtime, histogram dispatcher not started");
            self.running.store(false, Ordering::SeqCst);
            return;
        };
        let task = handle.spawn(run(
            Arc::clone(&self.shared),
            Arc::clone(&self.state),
            Arc::clone(&self.wake),
            Arc::clone(&self.running),
            self.interval,
        ));
        let previous = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(task);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    fn abort_task(&self) {
        let task = self.task.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(task) = task {
            task.abort();
        }
    }

    #[cfg(test)]
    pub(super) fn task(&self) -> Option<tokio::task::AbortHandle> {
        self.task
            .lock()
            .unwrap()
            .as_ref()
            .map(JoinHandle::abort_handle)
    }

    /// Queue a rebuild of `feature`, replacing any pending one for it.
    pub fn enqueue(&self, feature: Feature) {
        self.ensure_started();
        {
            let mut state = lock(&self.state);
            state.queue.retain(|f| *f != feature);
            state.queue.push_back(feature);
            while state.queue.len() > self.max_pending {
                if let Some(dropped) = state.queue.pop_front() {
                    debug!(feature = dropped.as_str(), "Histogram queue full, dropping oldest request");
                }
            }
        }
        self.wake.notify_one();
    }

    /// Rebuild `feature` right away, bypassing queue and spacing.
    pub fn rebuild_now(&self, feature: Feature) {
        self.shared.rebuild(feature, true);
        lock(&self.state).last_finished = Some(Instant::now());
        self.wake.notify_one();
    }

    pub fn pending(&self) -> Vec<Feature> {
        lock(&self.state).queue.iter().copied().collect()
    }

    /// Drop pending requests and forget the last rebuild time.
    pub fn clear(&self) {
        {
            let mut state = lock(&self.state);
            state.queue.clear();
            state.last_finished = None;
        }
        self.wake.notify_one();
    }

    pub fn shutdown(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("Shutting down histogram dispatcher");
        self.abort_task();
        self.clear();
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.abort_task();
    }
}

async fn run(
    shared: Arc<Shared>,
    state: Arc<Mutex<DispatchState>>,
    wake: Arc<Notify>,
    running: Arc<AtomicBool>,
    interval: Duration,
) {
    info!("Histogram dispatcher started");

    while running.load(Ordering::SeqCst) {
        let step = {
            let mut s = lock(&state);
            let too_early = s
                .last_finished
                .map(|t| t + interval)
                .filter(|at| *at > Instant::now());
            if s.queue.is_empty() {
                Step::Wait
            } else if let Some(at) = too_early {
                Step::SleepUntil(at)
            } else {
                s.queue.pop_front().map_or(Step::Wait, Step::Rebuild)
            }
        };

        match step {
            Step::Wait => wake.notified().await,
            Step::SleepUntil(at) => {
                tokio::select! {
                    _ = tokio::time::sleep_until(at) => {}
                    _ = wake.notified() => {}
                }
            }
            Step::Rebuild(feature) => {
                shared.rebuild(feature, false);
                let drained = {
                    let mut s = lock(&state);
                    s.last_finished = Some(Instant::now());
                    s.queue.is_empty()
                };
                if drained && running.load(Ordering::SeqCst) {
                    shared.queue_drained();
                }
            }
        }
    }

    info!("Histogram dispatcher stopped");
}
