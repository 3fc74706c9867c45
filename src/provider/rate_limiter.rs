//! Shared request pacing for the CLOB REST endpoints.
//!
//! Every caller reserves the next free slot while holding the lock, then
//! sleeps outside it, so concurrent workers are spaced out instead of
//! bursting at the same instant.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug)]
pub struct RateLimiter {
    /// Earliest instant the next request may start.
    next_slot: Mutex<Instant>,
    min_interval: Duration,
    name: String,
    total_requests: AtomicU64,
    waited_requests: AtomicU64,
}

impl RateLimiter {
    pub fn new(min_interval: Duration, name: &str) -> Self {
        Self {
            next_slot: Mutex::new(Instant::now()),
            min_interval,
            name: name.to_string(),
            total_requests: AtomicU64::new(0),
            waited_requests: AtomicU64::new(0),
        }
    }

    /// Wait until this caller's reserved slot comes up.
    pub async fn acquire(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);

        let slot = {
            let mut next = self.next_slot.lock().await;
            let slot = (*next).max(Instant::now());
            *next = slot + self.min_interval;
            slot
        };

        if slot > Instant::now() {
            let waited = self.waited_requests.fetch_add(1, Ordering::Relaxed) + 1;
            if waited % 500 == 0 {
                debug!(
                    limiter = %self.name,
                    waited,
                    total = self.total_requests(),
                    "[RATE_LIMITER:{}] {waited} requests delayed so far",
                    self.name,
                );
            }
            tokio::time::sleep_until(slot).await;
        }
    }

    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    pub fn waited_requests(&self) -> u64 {
        self.waited_requests.load(Ordering::Relaxed)
    }
}
