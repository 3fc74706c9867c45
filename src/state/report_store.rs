use std::sync::{Arc, RwLock};

use crate::types::ScanReport;

/// Latest completed scan, shared between the scanner and the API.
///
/// Readers get an `Arc` snapshot; a new run swaps the whole report in one
/// step, so a reader never sees rows from two different runs.
#[derive(Default)]
pub struct ReportStore {
    latest: RwLock<Option<Arc<ScanReport>>>,
}

impl ReportStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn latest(&self) -> Option<Arc<ScanReport>> {
        self.latest.read().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// Install `report` as the latest. Returns the report it replaced.
    pub fn replace(&self, report: Arc<ScanReport>) -> Option<Arc<ScanReport>> {
        match self.latest.write() {
            Ok(mut guard) => guard.replace(report),
            Err(poisoned) => poisoned.into_inner().replace(report),
        }
    }

    pub fn has_report(&self) -> bool {
        self.latest().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn report(run_id: u64) -> ScanReport {
        ScanReport {
            run_id,
            started_at: 1_700_000_000,
            finished_at: 1_700_000_030,
            duration_ms: 30_000.0,
            markets_listed: 0,
            ranked: Vec::new(),
            calm: Vec::new(),
            exclusions: Vec::new(),
            exclusion_counts: BTreeMap::new(),
            timed_out: false,
        }
    }

    #[test]
    fn empty_until_first_report() {
        let store = ReportStore::new();
        assert!(store.latest().is_none());
        assert!(!store.has_report());
    }

    #[test]
    fn replace_swaps_whole_report() {
        let store = ReportStore::new();
        assert!(store.replace(Arc::new(report(1))).is_none());

        let held = store.latest().unwrap();
        let previous = store.replace(Arc::new(report(2))).unwrap();

        assert_eq!(previous.run_id, 1);
        // Snapshots taken before the swap stay intact.
        assert_eq!(held.run_id, 1);
        assert_eq!(store.latest().unwrap().run_id, 2);
    }

    #[test]
    fn poisoned_lock_still_serves_latest() {
        let store = ReportStore::new();
        store.replace(Arc::new(report(3)));

        let writer = Arc::clone(&store);
        let _ = std::thread::spawn(move || {
            let _guard = writer.latest.write().unwrap();
            panic!("writer died holding the lock");
        })
        .join();

        assert!(store.latest.is_poisoned());
        assert_eq!(store.latest().unwrap().run_id, 3);
        store.replace(Arc::new(report(4)));
        assert_eq!(store.latest().unwrap().run_id, 4);
    }
}
