//! Term-frequency table for one feature.

use std::collections::HashMap;

#[derive(Debug, Default, Clone)]
pub struct Histogram {
    counts: HashMap<String, usize>,
}

impl Histogram {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, token: &str) {
        *self.counts.entry(token.to_string()).or_insert(0) += 1;
    }

    pub fn count(&self, token: &str) -> usize {
        self.counts.get(token).copied().unwrap_or(0)
    }

    pub fn key_count(&self) -> usize {
        self.counts.len()
    }

    pub fn reset(&mut self) {
        self.counts.clear();
    }

    /// Entries sorted by descending count (ties by token), keeping only
    /// those seen more than once whose share `count / (peak + total)`
    /// reaches `threshold`.
    pub fn high_pass(&self, threshold: f32) -> Vec<(String, usize)> {
        let total: usize = self.counts.values().sum();
        let peak = self.counts.values().copied().max().unwrap_or(0);
        let denominator = (peak + total) as f32;

        let mut entries: Vec<(String, usize)> = self
            .counts
            .iter()
            .filter(|(_, &count)| count > 1 && count as f32 / denominator >= threshold)
            .map(|(token, &count)| (token.clone(), count))
            .collect();
        entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        entries
    }
}
