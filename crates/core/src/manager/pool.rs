//! Fixed-size worker pool with submission-order priority.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tracing::debug;

struct QueuedTask {
    ordinal: usize,
    seq: u64,
    future: BoxFuture<'static, ()>,
}

impl PartialEq for QueuedTask {
    fn eq(&self, other: &Self) -> bool {
        (self.ordinal, self.seq) == (other.ordinal, other.seq)
    }
}

impl Eq for QueuedTask {}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedTask {
    // BinaryHeap is a max-heap; lowest (ordinal, seq) must pop first.
    fn cmp(&self, other: &Self) -> Ordering {
        (other.ordinal, other.seq).cmp(&(self.ordinal, self.seq))
    }
}

/// Runs at most `workers` tasks at once. Waiting tasks start in
/// `(ordinal, submission)` order regardless of which search they belong to.
pub(crate) struct WorkerPool {
    tx: mpsc::UnboundedSender<QueuedTask>,
    seq: AtomicU64,
    dispatcher: JoinHandle<()>,
}

impl WorkerPool {
    pub fn new(workers: usize) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let semaphore = Arc::new(Semaphore::new(workers.max(1)));
        let dispatcher = tokio::spawn(dispatch(rx, semaphore));
        Self {
            tx,
            seq: AtomicU64::new(0),
            dispatcher,
        }
    }

    /// Queue a task. Returns false once the pool has shut down.
    pub fn submit(&self, ordinal: usize, future: BoxFuture<'static, ()>) -> bool {
        let seq = self.seq.fetch_add(1, AtomicOrdering::SeqCst);
        self.tx
            .send(QueuedTask {
                ordinal,
                seq,
                future,
            })
            .is_ok()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.dispatcher.abort();
    }
}

async fn dispatch(mut rx: mpsc::UnboundedReceiver<QueuedTask>, semaphore: Arc<Semaphore>) {
    let mut queue: BinaryHeap<QueuedTask> = BinaryHeap::new();
    let mut closed = false;

    loop {
        if queue.is_empty() {
            if closed {
                break;
            }
            match rx.recv().await {
                Some(task) => queue.push(task),
                None => closed = true,
            }
            continue;
        }

        // Keep accepting submissions while waiting so the next task to start
        // is always the best one queued at the moment a worker frees up.
        let permit = if closed {
            semaphore.clone().acquire_owned().await
        } else {
            tokio::select! {
                biased;
                task = rx.recv() => {
                    match task {
                        Some(task) => queue.push(task),
                        None => closed = true,
                    }
                    continue;
                }
                permit = semaphore.clone().acquire_owned() => permit,
            }
        };
        let Ok(permit) = permit else {
            break;
        };
        let Some(task) = queue.pop() else {
            continue;
        };

        debug!(ordinal = task.ordinal, queued = queue.len(), "Starting pool task");
        tokio::spawn(async move {
            task.future.await;
            drop(permit);
        });
    }

    debug!("Worker pool dispatcher exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_runs_tasks() {
        let pool = WorkerPool::new(2);
        let (tx, rx) = oneshot::channel();
        assert!(pool.submit(0, async move { tx.send(42).unwrap() }.boxed()));
        assert_eq!(rx.await.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_lower_ordinal_starts_first() {
        let pool = WorkerPool::new(1);
        let order = Arc::new(Mutex::new(Vec::new()));

        // occupy the only worker until every other task is queued
        let (release_tx, release_rx) = oneshot::channel::<()>();
        pool.submit(
            0,
            async move {
                let _ = release_rx.await;
            }
            .boxed(),
        );
        tokio::time::sleep(Duration::from_millis(20)).await;

        let (done_tx, mut done_rx) = mpsc::unbounded_channel();
        for ordinal in [5usize, 1, 3, 1] {
            let order = order.clone();
            let done_tx = done_tx.clone();
            pool.submit(
                ordinal,
                async move {
                    order.lock().unwrap().push(ordinal);
                    done_tx.send(()).unwrap();
                }
                .boxed(),
            );
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        release_tx.send(()).unwrap();

        for _ in 0..4 {
            done_rx.recv().await.unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![1, 1, 3, 5]);
    }

    #[tokio::test]
    async fn test_concurrency_bounded() {
        let pool = WorkerPool::new(2);
        let running = Arc::new(AtomicU64::new(0));
        let peak = Arc::new(AtomicU64::new(0));
        let (done_tx, mut done_rx) = mpsc::unbounded_channel();

        for i in 0..8 {
            let running = running.clone();
            let peak = peak.clone();
            let done_tx = done_tx.clone();
            pool.submit(
                i,
                async move {
                    let now = running.fetch_add(1, AtomicOrdering::SeqCst) + 1;
                    peak.fetch_max(now, AtomicOrdering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    running.fetch_sub(1, AtomicOrdering::SeqCst);
                    done_tx.send(()).unwrap();
                }
                .boxed(),
            );
        }
        for _ in 0..8 {
            done_rx.recv().await.unwrap();
        }
        assert!(peak.load(AtomicOrdering::SeqCst) <= 2);
    }
}
