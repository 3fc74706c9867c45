//! In-memory latency histograms for snapshot provider calls.
//! Records the wall time of each outbound request, per endpoint.

use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;

/// Shared latency stats. Provider records, API reads.
/// Values stored in microseconds.
pub struct LatencyStats {
    inner: Mutex<hdrhistogram::Histogram<u64>>,
}

impl LatencyStats {
    /// Create a new histogram. Tracks 1us to 100s, 3 significant figures.
    pub fn new() -> Self {
        let histogram = hdrhistogram::Histogram::new_with_bounds(1, 100_000_000, 3)
            .expect("valid histogram bounds");
        Self {
            inner: Mutex::new(histogram),
        }
    }

    pub fn record_us(&self, us: u64) {
        if let Ok(mut h) = self.inner.lock() {
            h.saturating_record(us.max(1));
        }
    }

    pub fn record(&self, d: Duration) {
        let us = d.as_micros().min(u128::from(u64::MAX)) as u64;
        self.record_us(us);
    }

    /// Return (p50_us, p95_us, p99_us). None if no samples.
    pub fn percentiles(&self) -> (Option<u64>, Option<u64>, Option<u64>) {
        let Ok(h) = self.inner.lock() else {
            return (None, None, None);
        };
        if h.len() == 0 {
            return (None, None, None);
        }
        let p50 = h.value_at_quantile(0.5);
        let p95 = h.value_at_quantile(0.95);
        let p99 = h.value_at_quantile(0.99);
        (Some(p50), Some(p95), Some(p99))
    }

    pub fn len(&self) -> u64 {
        self.inner.lock().map(|h| h.len()).unwrap_or(0)
    }

    pub fn summary(&self) -> LatencySummary {
        let (p50, p95, p99) = self.percentiles();
        let ms = |us: Option<u64>| us.map(|v| v as f64 / 1000.0);
        LatencySummary {
            samples: self.len(),
            p50_ms: ms(p50),
            p95_ms: ms(p95),
            p99_ms: ms(p99),
        }
    }
}

impl Default for LatencyStats {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Listing,
    Book,
    History,
}

/// One histogram per provider endpoint.
#[derive(Default)]
pub struct ProviderLatency {
    pub listing: LatencyStats,
    pub book: LatencyStats,
    pub history: LatencyStats,
}

impl ProviderLatency {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, endpoint: Endpoint, d: Duration) {
        match endpoint {
            Endpoint::Listing => self.listing.record(d),
            Endpoint::Book => self.book.record(d),
            Endpoint::History => self.history.record(d),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LatencySummary {
    pub samples: u64,
    pub p50_ms: Option<f64>,
    pub p95_ms: Option<f64>,
    pub p99_ms: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_histogram_has_no_percentiles() {
        let stats = LatencyStats::new();
        assert_eq!(stats.percentiles(), (None, None, None));
        assert_eq!(stats.summary().samples, 0);
    }

    #[test]
    fn records_are_routed_per_endpoint() {
        let latency = ProviderLatency::new();
        latency.record(Endpoint::Book, Duration::from_millis(12));
        latency.record(Endpoint::Book, Duration::from_millis(14));
        latency.record(Endpoint::History, Duration::from_millis(80));

        assert_eq!(latency.book.len(), 2);
        assert_eq!(latency.history.len(), 1);
        assert_eq!(latency.listing.len(), 0);

        let p50 = latency.history.summary().p50_ms.unwrap();
        assert!((p50 - 80.0).abs() < 1.0, "p50={p50}");
    }
}
