//! Keyword suggestions from accumulating results.
//!
//! The detector counts terms per [`Feature`] as results stream in and, on
//! request, rebuilds a high-pass filtered histogram that a UI can offer as
//! refinement keywords. Rebuilds run on a background task, spaced at least
//! `dispatch_interval` apart, so bursts of small batches do not trigger a
//! rebuild each.

mod dispatcher;
mod histogram;

use std::collections::{HashMap, HashSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use once_cell::sync::Lazy;
use tracing::{debug, warn};

use crate::config::DetectorConfig;
use crate::metrics;
use crate::search::SearchResult;
use dispatcher::Dispatcher;
pub use histogram::Histogram;

/// What a histogram counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feature {
    SearchSource,
    FileExtension,
    FileName,
}

impl Feature {
    pub const ALL: [Feature; 3] = [
        Feature::SearchSource,
        Feature::FileExtension,
        Feature::FileName,
    ];

    pub fn filter_threshold(self) -> f32 {
        match self {
            Feature::SearchSource => 0.015,
            Feature::FileExtension => 0.0,
            Feature::FileName => 0.01,
        }
    }

    pub fn min_token_len(self) -> usize {
        match self {
            Feature::SearchSource => 4,
            Feature::FileExtension | Feature::FileName => 3,
        }
    }

    pub fn max_token_len(self) -> usize {
        match self {
            Feature::SearchSource | Feature::FileName => 20,
            Feature::FileExtension => 8,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Feature::SearchSource => "search_source",
            Feature::FileExtension => "file_extension",
            Feature::FileName => "file_name",
        }
    }
}

/// Receives rebuilt histograms. Called from the dispatcher task, or from
/// the caller's thread for forced rebuilds.
pub trait KeywordDetectorListener: Send + Sync {
    fn on_histogram_update(&self, feature: Feature, histogram: Vec<(String, usize)>, forced: bool);

    /// The last queued rebuild has been delivered.
    fn on_queue_drained(&self) {}
}

static STOPWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        // English
        "-", "an", "and", "are", "as", "at", "be", "by", "for", "with", "when", "where", "from",
        "has", "he", "in", "is", "it", "its", "of", "on", "we", "why", "your", "that", "the", "to",
        "this", "ft", "ft.", "feat", "feat.", "no", "me", "can", "cant", "not", "get", "into",
        "have", "had", "put", "you", "dont", "youre",
        // Spanish
        "son", "como", "en", "ser", "por", "dónde", "donde", "cuando", "el", "de", "tiene", "él",
        "es", "su", "nosotros", "qué", "que", "eso", "esa", "esto", "yo", "usted", "tu", "los",
        "para",
        // Portuguese
        "filho", "em", "quando", "nos", "tem", "ele", "seu", "nós", "quem", "isto", "voce",
        "você",
        // French
        "fils", "sous", "par", "où", "ou", "quand", "leur", "dans", "nous", "ce", "qui", "il",
        "le", "vous", "votre",
    ]
    .into_iter()
    .collect()
});

/// Keep letters, digits, dots and spaces; lowercase; split on spaces.
fn tokenize(terms: &str) -> Vec<String> {
    terms
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '.' || *c == ' ')
        .collect::<String>()
        .to_lowercase()
        .split(' ')
        .map(str::to_string)
        .collect()
}

pub(crate) struct Shared {
    histograms: Mutex<HashMap<Feature, Histogram>>,
    listener: Arc<dyn KeywordDetectorListener>,
}

impl Shared {
    fn histograms(&self) -> MutexGuard<'_, HashMap<Feature, Histogram>> {
        self.histograms.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn snapshot(&self, feature: Feature) -> Vec<(String, usize)> {
        self.histograms()
            .get(&feature)
            .map(|h| h.high_pass(feature.filter_threshold()))
            .unwrap_or_default()
    }

    pub(crate) fn rebuild(&self, feature: Feature, forced: bool) {
        let histogram = self.snapshot(feature);
        debug!(feature = feature.as_str(), entries = histogram.len(), forced, "Histogram rebuilt");
        metrics::HISTOGRAM_REBUILDS
            .with_label_values(&[feature.as_str()])
            .inc();
        let listener = &self.listener;
        if catch_unwind(AssertUnwindSafe(|| {
            listener.on_histogram_update(feature, histogram, forced)
        }))
        .is_err()
        {
            warn!(feature = feature.as_str(), "Keyword detector listener panicked");
        }
    }

    pub(crate) fn queue_drained(&self) {
        if catch_unwind(AssertUnwindSafe(|| self.listener.on_queue_drained())).is_err() {
            warn!("Keyword detector listener panicked");
        }
    }
}

/// Per-feature term counters plus the rebuild dispatcher.
pub struct KeywordDetector {
    shared: Arc<Shared>,
    dispatcher: Dispatcher,
}

impl KeywordDetector {
    pub fn new(config: &DetectorConfig, listener: Arc<dyn KeywordDetectorListener>) -> Self {
        let histograms = Feature::ALL
            .into_iter()
            .map(|f| (f, Histogram::new()))
            .collect();
        let shared = Arc::new(Shared {
            histograms: Mutex::new(histograms),
            listener,
        });
        let dispatcher = Dispatcher::new(Arc::clone(&shared), config);
        Self { shared, dispatcher }
    }

    /// Count the consequential tokens of `terms` under `feature`.
    pub fn add_search_terms(&self, feature: Feature, terms: &str) {
        let (min, max) = (feature.min_token_len(), feature.max_token_len());
        let mut histograms = self.shared.histograms();
        let Some(histogram) = histograms.get_mut(&feature) else {
            return;
        };
        for token in tokenize(terms) {
            let len = token.chars().count();
            if (min..=max).contains(&len) && !STOPWORDS.contains(token.as_str()) {
                histogram.update(&token);
            }
        }
    }

    /// Count source, file extension and file name terms of each result.
    pub fn feed_search_results(&self, results: &[SearchResult]) {
        for sr in results {
            self.add_search_terms(Feature::SearchSource, sr.source());
            match sr.filename() {
                Some(filename) => {
                    let (stem, extension) = match filename.rsplit_once('.') {
                        Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
                        _ => (filename, None),
                    };
                    if let Some(extension) = extension {
                        self.add_search_terms(Feature::FileExtension, extension);
                    }
                    self.add_search_terms(Feature::FileName, &stem.replace(['-', '_'], " "));
                }
                None => self.add_search_terms(Feature::FileName, sr.display_name()),
            }
        }
    }

    /// Ask for a rebuild of `feature`. Queued and rate limited unless
    /// `force`, in which case it is delivered before this returns.
    pub fn request_histogram_update(&self, feature: Feature, force: bool) {
        if force {
            self.dispatcher.rebuild_now(feature);
        } else {
            self.dispatcher.enqueue(feature);
        }
    }

    /// Current filtered histogram of `feature`, without notifying anyone.
    pub fn histogram(&self, feature: Feature) -> Vec<(String, usize)> {
        self.shared.snapshot(feature)
    }

    pub fn total_histogram_keys(&self) -> usize {
        self.shared.histograms().values().map(Histogram::key_count).sum()
    }

    pub fn pending_requests(&self) -> Vec<Feature> {
        self.dispatcher.pending()
    }

    /// Forget all counts and pending rebuilds.
    pub fn reset(&self) {
        self.dispatcher.clear();
        for histogram in self.shared.histograms().values_mut() {
            histogram.reset();
        }
    }

    /// Stop the background task. A later request starts it again.
    pub fn shutdown(&self) {
        self.dispatcher.shutdown();
    }

    pub fn is_dispatcher_running(&self) -> bool {
        self.dispatcher.is_running()
    }
}
