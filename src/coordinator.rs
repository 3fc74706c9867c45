//! Fans per-market work out over two bounded worker pools and fans the
//! results back in, in listing order.
//!
//! Order books and price histories come from different endpoints with
//! different costs, so each has its own pool. One task per market runs both
//! halves concurrently; a slow history fetch never holds a book permit and
//! vice versa. A single run deadline bounds the whole batch: whatever has not
//! finished by then is aborted and reported as cancelled.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::try_join;
use futures_util::FutureExt;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, info, warn};

use crate::config::{Config, CHANNEL_CAPACITY};
use crate::error::{AppError, Result};
use crate::provider::SnapshotProvider;
use crate::scorer::{compute_volatility, estimate_reward};
use crate::types::{
    Exclusion, ExclusionReason, Market, MarketComputation, OrderBookSnapshot, RewardEstimate,
    VolatilityMap, VolatilityWindow,
};

/// Everything `process_all` produced for one batch.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    /// Successful markets, in listing order.
    pub computed: Vec<MarketComputation>,
    pub exclusions: Vec<Exclusion>,
    /// True when the run deadline cut the batch short.
    pub timed_out: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Book,
    History,
}

type MarketOutcome = std::result::Result<MarketComputation, Exclusion>;

struct Shared {
    provider: Arc<dyn SnapshotProvider>,
    book_pool: Semaphore,
    history_pool: Semaphore,
    call_timeout: Duration,
    windows: Vec<VolatilityWindow>,
}

pub struct Coordinator {
    shared: Arc<Shared>,
    run_timeout: Duration,
}

impl Coordinator {
    pub fn new(
        provider: Arc<dyn SnapshotProvider>,
        book_workers: usize,
        history_workers: usize,
        call_timeout: Duration,
        run_timeout: Duration,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                provider,
                book_pool: Semaphore::new(book_workers.max(1)),
                history_pool: Semaphore::new(history_workers.max(1)),
                call_timeout,
                windows: VolatilityWindow::ALL.to_vec(),
            }),
            run_timeout,
        }
    }

    pub fn from_config(provider: Arc<dyn SnapshotProvider>, cfg: &Config) -> Self {
        Self::new(
            provider,
            cfg.book_workers,
            cfg.history_workers,
            cfg.request_timeout,
            cfg.run_timeout,
        )
    }

    /// Fetch, estimate and measure every market. Never fails as a whole:
    /// per-market problems become exclusions.
    pub async fn process_all(&self, markets: Vec<Market>) -> BatchOutcome {
        if markets.is_empty() {
            return BatchOutcome::default();
        }

        let total = markets.len();
        let deadline = Instant::now() + self.run_timeout;
        let (tx, mut rx) = mpsc::channel::<(usize, MarketOutcome)>(CHANNEL_CAPACITY);
        let mut tasks = JoinSet::new();

        info!(
            provider = self.shared.provider.name(),
            markets = total,
            book_workers = self.shared.book_pool.available_permits(),
            history_workers = self.shared.history_pool.available_permits(),
            "[COORD] processing {total} markets",
        );

        for (idx, market) in markets.iter().cloned().enumerate() {
            let shared = Arc::clone(&self.shared);
            let tx = tx.clone();
            tasks.spawn(async move {
                let outcome = AssertUnwindSafe(process_market(&shared, idx, &market))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|panic| {
                        let detail = format!("task panicked: {}", panic_message(panic.as_ref()));
                        warn!(market_id = %market.id, "[COORD] {detail}");
                        Err(Exclusion::new(&market, ExclusionReason::TaskFailed, detail))
                    });
                // Receiver gone means the run was abandoned.
                let _ = tx.send((idx, outcome)).await;
            });
        }
        drop(tx);

        let mut slots: Vec<Option<MarketOutcome>> = (0..total).map(|_| None).collect();
        let mut received = 0usize;
        let mut timed_out = false;

        loop {
            match timeout_at(deadline, rx.recv()).await {
                Ok(Some((idx, outcome))) => {
                    slots[idx] = Some(outcome);
                    received += 1;
                    if received % 50 == 0 {
                        debug!(received, total, "[COORD] progress {received}/{total}");
                    }
                }
                Ok(None) => break,
                Err(_) => {
                    timed_out = true;
                    tasks.abort_all();
                    warn!(
                        received,
                        total,
                        "[COORD] run deadline of {:?} reached, cancelling {} in-flight markets",
                        self.run_timeout,
                        total - received,
                    );
                    break;
                }
            }
        }
        // Reap aborted or finished tasks so nothing outlives the batch.
        while tasks.join_next().await.is_some() {}

        let mut outcome = BatchOutcome { timed_out, ..Default::default() };
        for (market, slot) in markets.iter().zip(slots) {
            match slot {
                Some(Ok(computation)) => outcome.computed.push(computation),
                Some(Err(exclusion)) => outcome.exclusions.push(exclusion),
                None if timed_out => outcome.exclusions.push(Exclusion::new(
                    market,
                    ExclusionReason::Cancelled,
                    "run deadline reached before completion",
                )),
                None => outcome.exclusions.push(Exclusion::new(
                    market,
                    ExclusionReason::TaskFailed,
                    "task ended without reporting a result",
                )),
            }
        }

        info!(
            computed = outcome.computed.len(),
            excluded = outcome.exclusions.len(),
            timed_out,
            "[COORD] batch complete: {} computed, {} excluded",
            outcome.computed.len(),
            outcome.exclusions.len(),
        );
        outcome
    }
}

async fn process_market(shared: &Shared, idx: usize, market: &Market) -> MarketOutcome {
    let (reward, volatility) = tokio::join!(book_half(shared, market), history_half(shared, market));

    let failure = match (reward, volatility) {
        (Ok(reward), Ok(volatility)) => {
            return Ok(MarketComputation {
                fetch_index: idx,
                market: market.clone(),
                reward,
                volatility,
            });
        }
        // A book failure is reported ahead of a history failure.
        (Err(e), _) => (Stage::Book, e),
        (_, Err(e)) => (Stage::History, e),
    };

    let (stage, error) = failure;
    let reason = exclusion_reason(stage, &error);
    warn!(market_id = %market.id, %reason, "[COORD] excluding market: {error}");
    Err(Exclusion::new(market, reason, error.to_string()))
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Both token books under one book permit, then the reward estimate.
async fn book_half(shared: &Shared, market: &Market) -> Result<RewardEstimate> {
    let _permit = shared.book_pool.acquire().await?;

    let fetch = try_join(
        shared.provider.get_order_book(&market.yes_token_id),
        shared.provider.get_order_book(&market.no_token_id),
    );
    let (yes, no) = timeout(shared.call_timeout, fetch)
        .await
        .map_err(|_| AppError::Timeout(format!("order books for {}", market.id)))??;

    Ok(estimate_reward(&OrderBookSnapshot::new(yes, no), &market.rewards))
}

/// YES-token history over the longest window, then per-window volatility.
async fn history_half(shared: &Shared, market: &Market) -> Result<VolatilityMap> {
    let _permit = shared.history_pool.acquire().await?;

    let lookback = VolatilityWindow::longest().duration();
    let history = timeout(
        shared.call_timeout,
        shared.provider.get_price_history(&market.yes_token_id, lookback),
    )
    .await
    .map_err(|_| AppError::Timeout(format!("price history for {}", market.id)))??;

    if history.is_empty() {
        return Err(AppError::InsufficientHistory(format!(
            "no price samples for {}",
            market.id
        )));
    }

    Ok(compute_volatility(&history, &shared.windows))
}

fn exclusion_reason(stage: Stage, error: &AppError) -> ExclusionReason {
    match error {
        e if e.is_timeout() => ExclusionReason::Timeout,
        AppError::MalformedBook(_) => ExclusionReason::MalformedBook,
        AppError::InsufficientHistory(_) => ExclusionReason::InsufficientHistory,
        _ => match stage {
            Stage::Book => ExclusionReason::BookFetch,
            Stage::History => ExclusionReason::HistoryFetch,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use crate::types::{BookLevel, PriceHistoryPoint, RewardParams, TokenBook};

    #[derive(Default)]
    struct Gauge {
        current: AtomicUsize,
        peak: AtomicUsize,
    }

    impl Gauge {
        fn enter(&self) {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
        }

        fn exit(&self) {
            self.current.fetch_sub(1, Ordering::SeqCst);
        }

        fn peak(&self) -> usize {
            self.peak.load(Ordering::SeqCst)
        }
    }

    /// In-memory provider. Behaviour is keyed on token ids.
    #[derive(Default)]
    struct FakeProvider {
        book_timeout: HashSet<String>,
        book_malformed: HashSet<String>,
        history_error: HashSet<String>,
        history_empty: HashSet<String>,
        /// YES tokens whose book fetch never returns in practice.
        stalled: HashSet<String>,
        /// Tokens whose book fetch panics.
        panics: HashSet<String>,
        book_delay: Duration,
        history_delay: Duration,
        yes_books: Gauge,
        histories: Gauge,
    }

    #[async_trait]
    impl SnapshotProvider for FakeProvider {
        async fn list_reward_eligible_markets(&self) -> Result<Vec<Market>> {
            Ok(Vec::new())
        }

        async fn get_order_book(&self, token_id: &str) -> Result<TokenBook> {
            let is_yes = token_id.ends_with("-yes");
            if is_yes {
                self.yes_books.enter();
            }
            if self.stalled.contains(token_id) {
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
            if self.panics.contains(token_id) {
                panic!("book decoder blew up on {token_id}");
            }
            tokio::time::sleep(self.book_delay).await;
            if is_yes {
                self.yes_books.exit();
            }

            if self.book_timeout.contains(token_id) {
                return Err(AppError::Timeout(token_id.to_string()));
            }
            if self.book_malformed.contains(token_id) {
                return Err(AppError::MalformedBook(token_id.to_string()));
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
            self.histories.enter();
            tokio::time::sleep(self.history_delay).await;
            self.histories.exit();

            if self.history_error.contains(token_id) {
                return Err(AppError::Api { status: 500, url: "/prices-history".into() });
            }
            if self.history_empty.contains(token_id) {
                return Ok(Vec::new());
            }
            Ok((0..120)
                .map(|i| PriceHistoryPoint::new(1_700_000_000 + i * 60, if i % 2 == 0 { 0.50 } else { 0.52 }))
                .collect())
        }

        fn name(&self) -> &'static str {
            "fake"
        }
    }

    fn markets(n: usize) -> Vec<Market> {
        (0..n)
            .map(|i| Market {
                id: format!("m{i}"),
                question: format!("Question {i}?"),
                slug: None,
                end_date_iso: None,
                yes_token_id: format!("m{i}-yes"),
                no_token_id: format!("m{i}-no"),
                rewards_eligible: true,
                rewards: RewardParams { max_spread: 0.03, min_size: 0.0, daily_rate: 10.0 },
            })
            .collect()
    }

    fn coordinator(provider: FakeProvider, books: usize, histories: usize) -> (Coordinator, Arc<FakeProvider>) {
        let provider = Arc::new(provider);
        let coord = Coordinator::new(
            Arc::clone(&provider) as Arc<dyn SnapshotProvider>,
            books,
            histories,
            Duration::from_secs(5),
            Duration::from_secs(10),
        );
        (coord, provider)
    }

    fn set(items: &[&str]) -> HashSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn one_failing_market_does_not_sink_the_batch() {
        let fake = FakeProvider { book_timeout: set(&["m3-yes"]), ..Default::default() };
        let (coord, _) = coordinator(fake, 4, 2);

        let out = coord.process_all(markets(5)).await;

        assert!(!out.timed_out);
        let idx: Vec<usize> = out.computed.iter().map(|c| c.fetch_index).collect();
        assert_eq!(idx, [0, 1, 2, 4]);
        assert_eq!(out.exclusions.len(), 1);
        assert_eq!(out.exclusions[0].market_id, "m3");
        assert_eq!(out.exclusions[0].reason, ExclusionReason::Timeout);

        let c = &out.computed[0];
        assert!(c.reward.gm_reward_per_100 > 0.0);
        assert_eq!(c.volatility.len(), VolatilityWindow::ALL.len());
    }

    #[tokio::test]
    async fn failures_map_to_exclusion_reasons() {
        let fake = FakeProvider {
            book_malformed: set(&["m0-no"]),
            history_error: set(&["m1-yes"]),
            history_empty: set(&["m2-yes"]),
            ..Default::default()
        };
        let (coord, _) = coordinator(fake, 2, 2);

        let out = coord.process_all(markets(4)).await;

        let reasons: Vec<(String, ExclusionReason)> =
            out.exclusions.iter().map(|e| (e.market_id.clone(), e.reason)).collect();
        assert_eq!(
            reasons,
            [
                ("m0".to_string(), ExclusionReason::MalformedBook),
                ("m1".to_string(), ExclusionReason::HistoryFetch),
                ("m2".to_string(), ExclusionReason::InsufficientHistory),
            ]
        );
        assert_eq!(out.computed.len(), 1);
        assert_eq!(out.computed[0].market.id, "m3");
    }

    #[tokio::test]
    async fn per_call_timeout_excludes_slow_books() {
        let fake = FakeProvider { book_delay: Duration::from_millis(300), ..Default::default() };
        let provider = Arc::new(fake);
        let coord = Coordinator::new(
            provider as Arc<dyn SnapshotProvider>,
            4,
            4,
            Duration::from_millis(50),
            Duration::from_secs(10),
        );

        let out = coord.process_all(markets(3)).await;

        assert!(out.computed.is_empty());
        assert!(!out.timed_out);
        assert!(out.exclusions.iter().all(|e| e.reason == ExclusionReason::Timeout));
    }

    #[tokio::test]
    async fn run_deadline_cancels_stragglers() {
        let fake = FakeProvider { stalled: set(&["m1-yes"]), ..Default::default() };
        let provider = Arc::new(fake);
        let coord = Coordinator::new(
            provider as Arc<dyn SnapshotProvider>,
            4,
            4,
            Duration::from_secs(60),
            Duration::from_millis(300),
        );

        let started = std::time::Instant::now();
        let out = coord.process_all(markets(3)).await;

        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(out.timed_out);
        let idx: Vec<usize> = out.computed.iter().map(|c| c.fetch_index).collect();
        assert_eq!(idx, [0, 2]);
        assert_eq!(out.exclusions.len(), 1);
        assert_eq!(out.exclusions[0].market_id, "m1");
        assert_eq!(out.exclusions[0].reason, ExclusionReason::Cancelled);
    }

    #[tokio::test]
    async fn panicking_market_is_task_failure_not_cancellation() {
        let fake = FakeProvider { panics: set(&["m1-yes"]), ..Default::default() };
        let (coord, _) = coordinator(fake, 2, 2);

        let out = coord.process_all(markets(3)).await;

        assert!(!out.timed_out);
        let idx: Vec<usize> = out.computed.iter().map(|c| c.fetch_index).collect();
        assert_eq!(idx, [0, 2]);
        assert_eq!(out.exclusions.len(), 1);
        assert_eq!(out.exclusions[0].market_id, "m1");
        assert_eq!(out.exclusions[0].reason, ExclusionReason::TaskFailed);
        assert!(out.exclusions[0].detail.contains("book decoder blew up"), "{}", out.exclusions[0].detail);
    }

    #[test]
    fn panic_message_reads_str_and_string_payloads() {
        let s: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(s.as_ref()), "static");
        let owned: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(owned.as_ref()), "owned");
        let other: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(other.as_ref()), "unknown panic payload");
    }

    #[tokio::test]
    async fn pools_bound_concurrency_independently() {
        let fake = FakeProvider {
            book_delay: Duration::from_millis(20),
            history_delay: Duration::from_millis(20),
            ..Default::default()
        };
        let (coord, provider) = coordinator(fake, 2, 1);

        let out = coord.process_all(markets(12)).await;

        assert_eq!(out.computed.len(), 12);
        assert!(provider.yes_books.peak() <= 2, "book peak {}", provider.yes_books.peak());
        assert!(provider.histories.peak() <= 1, "history peak {}", provider.histories.peak());
        assert!(provider.yes_books.peak() >= 1);
    }

    #[tokio::test]
    async fn empty_batch_is_a_no_op() {
        let (coord, _) = coordinator(FakeProvider::default(), 1, 1);
        let out = coord.process_all(Vec::new()).await;
        assert!(out.computed.is_empty());
        assert!(out.exclusions.is_empty());
        assert!(!out.timed_out);
    }
}
