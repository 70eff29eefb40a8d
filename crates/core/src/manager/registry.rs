//! Per-token bookkeeping of in-flight tasks.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::search::{SearchPerformer, SearchToken};

struct TokenTasks {
    outstanding: usize,
    performers: Vec<Arc<dyn SearchPerformer>>,
}

/// Outstanding-task counters, one per live token, under a single lock.
///
/// A token's entry exists exactly while it has tasks queued or running;
/// the finish that takes the count to zero removes it and is the only one
/// to observe quiescence.
#[derive(Default)]
pub(crate) struct Registry {
    tokens: Mutex<HashMap<SearchToken, TokenTasks>>,
}

impl Registry {
    fn lock(&self) -> MutexGuard<'_, HashMap<SearchToken, TokenTasks>> {
        self.tokens.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Count a new task for `performer`'s token and return its ordinal
    /// (the number of tasks already in flight for that token).
    pub fn begin_task(&self, performer: &Arc<dyn SearchPerformer>) -> usize {
        let mut tokens = self.lock();
        let entry = tokens.entry(performer.token()).or_insert_with(|| TokenTasks {
            outstanding: 0,
            performers: Vec::new(),
        });
        let ordinal = entry.outstanding;
        entry.outstanding += 1;
        if !entry.performers.iter().any(|p| Arc::ptr_eq(p, performer)) {
            entry.performers.push(Arc::clone(performer));
        }
        ordinal
    }

    /// Record a finished task. Returns true when it was the token's last.
    pub fn finish_task(&self, token: SearchToken) -> bool {
        let mut tokens = self.lock();
        let Some(entry) = tokens.get_mut(&token) else {
            return false;
        };
        entry.outstanding = entry.outstanding.saturating_sub(1);
        if entry.outstanding == 0 {
            tokens.remove(&token);
            true
        } else {
            false
        }
    }

    pub fn outstanding(&self, token: SearchToken) -> usize {
        self.lock().get(&token).map_or(0, |e| e.outstanding)
    }

    pub fn active_tokens(&self) -> Vec<SearchToken> {
        self.lock().keys().copied().collect()
    }

    /// Raise the stop flag of every performer of `token`, or of all tokens
    /// when `token` is `None`.
    pub fn stop(&self, token: Option<SearchToken>) {
        let performers: Vec<Arc<dyn SearchPerformer>> = {
            let tokens = self.lock();
            tokens
                .iter()
                .filter(|(t, _)| token.map_or(true, |wanted| **t == wanted))
                .flat_map(|(_, e)| e.performers.iter().cloned())
                .collect()
        };
        for performer in performers {
            performer.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockPerformer;

    fn performer(token: SearchToken) -> Arc<dyn SearchPerformer> {
        Arc::new(MockPerformer::new(token))
    }

    #[test]
    fn test_ordinals_and_quiescence() {
        let registry = Registry::default();
        let p = performer(5);

        assert_eq!(registry.begin_task(&p), 0);
        assert_eq!(registry.begin_task(&p), 1);
        assert_eq!(registry.begin_task(&p), 2);
        assert_eq!(registry.outstanding(5), 3);

        assert!(!registry.finish_task(5));
        assert!(!registry.finish_task(5));
        assert!(registry.finish_task(5));
        assert_eq!(registry.outstanding(5), 0);
        assert!(registry.active_tokens().is_empty());

        // unknown token never reports quiescence
        assert!(!registry.finish_task(5));
    }

    #[test]
    fn test_stop_by_token() {
        let registry = Registry::default();
        let a = performer(1);
        let b = performer(2);
        registry.begin_task(&a);
        registry.begin_task(&b);

        registry.stop(Some(1));
        assert!(a.is_stopped());
        assert!(!b.is_stopped());

        registry.stop(None);
        assert!(b.is_stopped());
    }

    #[test]
    fn test_concurrent_finishes_report_once() {
        let registry = Arc::new(Registry::default());
        let p = performer(9);
        for _ in 0..1000 {
            registry.begin_task(&p);
        }

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || (0..125).filter(|_| registry.finish_task(9)).count())
            })
            .collect();
        let quiesced: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();

        assert_eq!(quiesced, 1);
        assert_eq!(registry.outstanding(9), 0);
    }
}
