//! Shared health state for the /health endpoint.
//! Updated by the scanner after every run, read by the API.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};

#[derive(Default)]
pub struct HealthState {
    /// True while a run is in progress.
    pub scanning: AtomicBool,
    pub runs_completed: AtomicU64,
    pub runs_failed: AtomicU64,
    /// Unix seconds of the last completed run (0 = none).
    pub last_run_at: AtomicI64,
    pub last_ranked: AtomicU64,
    pub last_excluded: AtomicU64,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_scanning(&self, v: bool) {
        self.scanning.store(v, Ordering::Relaxed);
    }

    pub fn record_success(&self, finished_at: i64, ranked: usize, excluded: usize) {
        self.runs_completed.fetch_add(1, Ordering::Relaxed);
        self.last_run_at.store(finished_at, Ordering::Relaxed);
        self.last_ranked.store(ranked as u64, Ordering::Relaxed);
        self.last_excluded.store(excluded as u64, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.runs_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn scanning(&self) -> bool {
        self.scanning.load(Ordering::Relaxed)
    }

    pub fn runs_completed(&self) -> u64 {
        self.runs_completed.load(Ordering::Relaxed)
    }

    pub fn runs_failed(&self) -> u64 {
        self.runs_failed.load(Ordering::Relaxed)
    }

    pub fn last_run_at(&self) -> i64 {
        self.last_run_at.load(Ordering::Relaxed)
    }

    pub fn last_ranked(&self) -> u64 {
        self.last_ranked.load(Ordering::Relaxed)
    }

    pub fn last_excluded(&self) -> u64 {
        self.last_excluded.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_and_failure_are_tracked_separately() {
        let health = HealthState::new();
        health.record_failure();
        health.record_success(1_700_000_000, 42, 3);

        assert_eq!(health.runs_completed(), 1);
        assert_eq!(health.runs_failed(), 1);
        assert_eq!(health.last_run_at(), 1_700_000_000);
        assert_eq!(health.last_ranked(), 42);
        assert_eq!(health.last_excluded(), 3);
        assert!(!health.scanning());
    }
}
