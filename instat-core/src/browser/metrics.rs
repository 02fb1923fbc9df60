use serde::{Deserialize, Serialize};

/// Counters accumulated by one collection run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionMetrics {
    pub surfaces_opened: u64,
    pub rounds: u64,
    pub stale_rounds: u64,
    pub refreshes: u64,
    pub handles_collected: u64,
    pub stale_elements_skipped: u64,
}

impl CollectionMetrics {
    pub fn record_surface_open(&mut self) {
        self.surfaces_opened = self.surfaces_opened.saturating_add(1);
    }

    pub fn record_round(&mut self, new_found: bool) {
        self.rounds = self.rounds.saturating_add(1);
        if !new_found {
            self.stale_rounds = self.stale_rounds.saturating_add(1);
        }
    }

    pub fn record_refresh(&mut self) {
        self.refreshes = self.refreshes.saturating_add(1);
    }

    pub fn record_handles(&mut self, total: usize) {
        self.handles_collected = self.handles_collected.max(total as u64);
    }

    pub fn record_stale_elements(&mut self, count: usize) {
        self.stale_elements_skipped = self.stale_elements_skipped.saturating_add(count as u64);
    }

    /// Percentage of rounds that surfaced at least one new handle.
    pub fn productive_round_rate(&self) -> f64 {
        if self.rounds == 0 {
            0.0
        } else {
            ((self.rounds - self.stale_rounds) as f64 / self.rounds as f64) * 100.0
        }
    }
}
