use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::api::health::HealthState;
use crate::config::Config;
use crate::coordinator::Coordinator;
use crate::error::Result;
use crate::provider::SnapshotProvider;
use crate::scorer::Ranker;
use crate::state::ReportStore;
use crate::types::{exclusion_counts, ScanReport};

/// One full pass: list, fetch and compute, rank, publish.
pub struct Scanner {
    provider: Arc<dyn SnapshotProvider>,
    coordinator: Coordinator,
    ranker: Ranker,
    store: Arc<ReportStore>,
    health: Arc<HealthState>,
    log_top_n: usize,
}

impl Scanner {
    pub fn new(
        provider: Arc<dyn SnapshotProvider>,
        coordinator: Coordinator,
        ranker: Ranker,
        store: Arc<ReportStore>,
        health: Arc<HealthState>,
        log_top_n: usize,
    ) -> Self {
        Self { provider, coordinator, ranker, store, health, log_top_n }
    }

    pub fn from_config(
        cfg: &Config,
        provider: Arc<dyn SnapshotProvider>,
        store: Arc<ReportStore>,
        health: Arc<HealthState>,
    ) -> Self {
        let coordinator = Coordinator::from_config(Arc::clone(&provider), cfg);
        Self::new(
            provider,
            coordinator,
            Ranker::new(cfg.volatility_sum_max),
            store,
            health,
            cfg.log_top_n,
        )
    }

    /// Runs forever, one scan per `every`. The previous report keeps being
    /// served while a scan is in progress or after one fails.
    pub async fn run(self, every: Duration) {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut run_id = 0u64;

        loop {
            ticker.tick().await;
            run_id += 1;
            if let Err(e) = self.run_once(run_id).await {
                error!(run_id, "[SCAN] run failed: {e}");
            }
        }
    }

    /// Scan once and publish the report.
    pub async fn run_once(&self, run_id: u64) -> Result<Arc<ScanReport>> {
        self.health.set_scanning(true);
        let result = self.scan(run_id).await;
        self.health.set_scanning(false);

        let report = match result {
            Ok(report) => report,
            Err(e) => {
                self.health.record_failure();
                return Err(e);
            }
        };

        log_report(&report, self.log_top_n);
        self.health
            .record_success(report.finished_at, report.ranked.len(), report.excluded());
        let report = Arc::new(report);
        self.store.replace(Arc::clone(&report));
        Ok(report)
    }

    async fn scan(&self, run_id: u64) -> Result<ScanReport> {
        let started_at = now_secs();
        let started = Instant::now();
        info!(run_id, provider = self.provider.name(), "[SCAN] run {run_id} starting");

        let markets = self.provider.list_reward_eligible_markets().await?;
        let markets_listed = markets.len();

        let batch = self.coordinator.process_all(markets).await;
        let ranking = self.ranker.rank(batch.computed);

        let mut exclusions = batch.exclusions;
        exclusions.extend(ranking.exclusions);
        let counts = exclusion_counts(&exclusions);

        Ok(ScanReport {
            run_id,
            started_at,
            finished_at: now_secs(),
            duration_ms: started.elapsed().as_secs_f64() * 1000.0,
            markets_listed,
            ranked: ranking.ranked,
            calm: ranking.calm,
            exclusions,
            exclusion_counts: counts,
            timed_out: batch.timed_out,
        })
    }
}

fn log_report(report: &ScanReport, top_n: usize) {
    info!(
        run_id = report.run_id,
        listed = report.markets_listed,
        ranked = report.ranked.len(),
        calm = report.calm.len(),
        excluded = report.excluded(),
        duration_ms = report.duration_ms,
        "[SCAN] run {} complete in {:.1}s: {} listed, {} ranked, {} calm, {} excluded",
        report.run_id,
        report.duration_ms / 1000.0,
        report.markets_listed,
        report.ranked.len(),
        report.calm.len(),
        report.excluded(),
    );
    if report.timed_out {
        warn!(run_id = report.run_id, "[SCAN] run hit its deadline; results are partial");
    }
    for (reason, count) in &report.exclusion_counts {
        info!("[SCAN]   excluded {reason}: {count}");
    }

    for m in report.ranked.iter().take(top_n) {
        let row = m.to_row();
        let q_short: String = row.question.chars().take(60).collect();
        let mid = row
            .midpoint
            .map(|v| format!("{v:.3}"))
            .unwrap_or_else(|| "n/a".to_string());
        info!(
            "[TOP] #{:<3} score={:.4} gm=${:.4} mean=${:.4} vol_sum={:.2} mid={} rate=${:.0}/d | {}",
            row.rank,
            row.score,
            row.gm_reward_per_100,
            row.mean_reward_per_100,
            row.volatility_sum,
            mid,
            row.daily_rate,
            q_short,
        );
    }
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::error::AppError;
    use crate::types::{
        BookLevel, ExclusionReason, Market, PriceHistoryPoint, RewardParams, TokenBook,
    };

    /// Four markets with identical rewards. `m2` has a choppy history and
    /// the YES book of `m3` is unavailable.
    struct StaticProvider {
        fail_listing: bool,
    }

    fn market(i: usize) -> Market {
        Market {
            id: format!("m{i}"),
            question: format!("Question {i}?"),
            slug: None,
            end_date_iso: None,
            yes_token_id: format!("m{i}-yes"),
            no_token_id: format!("m{i}-no"),
            rewards_eligible: true,
            rewards: RewardParams { max_spread: 0.03, min_size: 0.0, daily_rate: 20.0 },
        }
    }

    #[async_trait]
    impl SnapshotProvider for StaticProvider {
        async fn list_reward_eligible_markets(&self) -> Result<Vec<Market>> {
            if self.fail_listing {
                return Err(AppError::Bootstrap("listing down".into()));
            }
            Ok((0..4).map(market).collect())
        }

        async fn get_order_book(&self, token_id: &str) -> Result<TokenBook> {
            if token_id == "m3-yes" {
                return Err(AppError::Api { status: 503, url: "/book".into() });
            }
            Ok(TokenBook::new(
                token_id,
                vec![BookLevel::new(0.49, 100.0)],
                vec![BookLevel::new(0.51, 100.0)],
            ))
        }

        async fn get_price_history(
            &self,
            token_id: &str,
            _lookback: Duration,
        ) -> Result<Vec<PriceHistoryPoint>> {
            let swing = if token_id == "m2-yes" { 0.10 } else { 0.001 };
            Ok((0..60)
                .map(|i| {
                    let p = if i % 2 == 0 { 0.5 } else { 0.5 + swing };
                    PriceHistoryPoint::new(1_700_000_000 + i * 60, p)
                })
                .collect())
        }

        fn name(&self) -> &'static str {
            "static"
        }
    }

    /// Five calm, identical markets; the YES book of `m3` times out.
    struct TimeoutProvider;

    #[async_trait]
    impl SnapshotProvider for TimeoutProvider {
        async fn list_reward_eligible_markets(&self) -> Result<Vec<Market>> {
            Ok((0..5).map(market).collect())
        }

        async fn get_order_book(&self, token_id: &str) -> Result<TokenBook> {
            if token_id == "m3-yes" {
                return Err(AppError::Timeout(format!("book {token_id}")));
            }
            StaticProvider { fail_listing: false }.get_order_book(token_id).await
        }

        async fn get_price_history(
            &self,
            _token_id: &str,
            _lookback: Duration,
        ) -> Result<Vec<PriceHistoryPoint>> {
            Ok((0..60)
                .map(|i| {
                    let p = if i % 2 == 0 { 0.5 } else { 0.501 };
                    PriceHistoryPoint::new(1_700_000_000 + i * 60, p)
                })
                .collect())
        }

        fn name(&self) -> &'static str {
            "timeout"
        }
    }

    fn scanner(fail_listing: bool) -> (Scanner, Arc<ReportStore>, Arc<HealthState>) {
        scanner_over(Arc::new(StaticProvider { fail_listing }))
    }

    fn scanner_over(
        provider: Arc<dyn SnapshotProvider>,
    ) -> (Scanner, Arc<ReportStore>, Arc<HealthState>) {
        let store = ReportStore::new();
        let health = Arc::new(HealthState::new());
        let coordinator = Coordinator::new(
            Arc::clone(&provider),
            2,
            2,
            Duration::from_secs(5),
            Duration::from_secs(10),
        );
        let scanner = Scanner::new(
            provider,
            coordinator,
            Ranker::new(20.0),
            Arc::clone(&store),
            Arc::clone(&health),
            5,
        );
        (scanner, store, health)
    }

    #[tokio::test]
    async fn run_once_publishes_ranked_report() {
        let (scanner, store, health) = scanner(false);

        let report = scanner.run_once(7).await.unwrap();

        assert_eq!(report.run_id, 7);
        assert_eq!(report.markets_listed, 4);
        assert_eq!(report.ranked.len(), 3);
        assert_eq!(report.exclusions.len(), 1);
        assert_eq!(report.exclusions[0].reason, ExclusionReason::BookFetch);
        assert_eq!(report.exclusion_counts.get(&ExclusionReason::BookFetch), Some(&1));

        // Choppy m2 sinks to the bottom; m0 and m1 tie and keep listing order.
        let ids: Vec<&str> = report.ranked.iter().map(|m| m.market.id.as_str()).collect();
        assert_eq!(ids, ["m0", "m1", "m2"]);
        assert!(report.calm.iter().all(|m| m.volatility_sum < 20.0));

        assert_eq!(store.latest().unwrap().run_id, 7);
        assert_eq!(health.runs_completed(), 1);
        assert_eq!(health.last_ranked(), 3);
        assert_eq!(health.last_excluded(), 1);
    }

    #[tokio::test]
    async fn timed_out_market_is_excluded_and_rest_ranked() {
        let (scanner, _, _) = scanner_over(Arc::new(TimeoutProvider));

        let report = scanner.run_once(1).await.unwrap();

        assert!(!report.timed_out);
        assert_eq!(report.markets_listed, 5);
        assert_eq!(report.ranked.len(), 4);
        assert_eq!(report.exclusion_counts.get(&ExclusionReason::Timeout), Some(&1));
        assert_eq!(report.exclusions.len(), 1);
        assert_eq!(report.exclusions[0].market_id, "m3");

        let ids: Vec<&str> = report.ranked.iter().map(|m| m.market.id.as_str()).collect();
        assert_eq!(ids, ["m0", "m1", "m2", "m4"]);
        let ranks: Vec<usize> = report.ranked.iter().map(|m| m.rank).collect();
        assert_eq!(ranks, [1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn listing_failure_keeps_previous_report() {
        let (ok_scanner, store, _) = scanner(false);
        ok_scanner.run_once(1).await.unwrap();

        let (failing, _, health) = scanner(true);
        let failing = Scanner { store: Arc::clone(&store), ..failing };
        let err = failing.run_once(2).await.unwrap_err();

        assert!(matches!(err, AppError::Bootstrap(_)));
        assert_eq!(health.runs_failed(), 1);
        assert!(!health.scanning());
        assert_eq!(store.latest().unwrap().run_id, 1);
    }
}
