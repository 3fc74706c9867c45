use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::windows::*;

// ---------------------------------------------------------------------------
// Market
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Market {
    /// CLOB condition id.
    pub id: String,
    pub question: String,
    pub slug: Option<String>,
    pub end_date_iso: Option<String>,
    pub yes_token_id: String,
    pub no_token_id: String,
    pub rewards_eligible: bool,
    pub rewards: RewardParams,
}

/// Liquidity reward program terms published for one market.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RewardParams {
    /// Band half-width around the midpoint, as a price fraction (3 cents = 0.03).
    pub max_spread: f64,
    /// Minimum resting size, in shares, for a level to earn rewards.
    pub min_size: f64,
    /// Daily USD reward budget for the whole market.
    pub daily_rate: f64,
}

// ---------------------------------------------------------------------------
// Order books
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BookLevel {
    pub price: f64,
    pub size: f64,
}

impl BookLevel {
    pub fn new(price: f64, size: f64) -> Self {
        Self { price, size }
    }

    pub fn notional(&self) -> f64 {
        self.price * self.size
    }
}

/// One token's ladder. Both sides are ordered best-first:
/// bids descending, asks ascending.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenBook {
    pub token_id: String,
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
}

impl TokenBook {
    pub fn new(token_id: impl Into<String>, bids: Vec<BookLevel>, asks: Vec<BookLevel>) -> Self {
        Self { token_id: token_id.into(), bids, asks }
    }

    pub fn best_bid(&self) -> Option<f64> {
        self.bids.first().map(|l| l.price)
    }

    pub fn best_ask(&self) -> Option<f64> {
        self.asks.first().map(|l| l.price)
    }

    /// (best bid + best ask) / 2. None unless both sides are quoted.
    pub fn midpoint(&self) -> Option<f64> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some((bid + ask) / 2.0),
            _ => None,
        }
    }

    /// Price the reward band is centred on: the midpoint, or the only quoted
    /// best price when the book is one-sided.
    pub fn reference_price(&self) -> Option<f64> {
        self.midpoint().or_else(|| self.best_bid()).or_else(|| self.best_ask())
    }

    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }
}

/// Point-in-time books for both outcome tokens of a market.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderBookSnapshot {
    pub yes: TokenBook,
    pub no: TokenBook,
}

impl OrderBookSnapshot {
    pub fn new(yes: TokenBook, no: TokenBook) -> Self {
        Self { yes, no }
    }

    pub fn tokens(&self) -> [&TokenBook; 2] {
        [&self.yes, &self.no]
    }
}

// ---------------------------------------------------------------------------
// Price history & volatility windows
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceHistoryPoint {
    /// Unix seconds.
    pub timestamp: i64,
    pub price: f64,
}

impl PriceHistoryPoint {
    pub fn new(timestamp: i64, price: f64) -> Self {
        Self { timestamp, price }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum VolatilityWindow {
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "6h")]
    SixHours,
    #[serde(rename = "1d")]
    OneDay,
    #[serde(rename = "7d")]
    SevenDays,
    #[serde(rename = "30d")]
    ThirtyDays,
}

impl VolatilityWindow {
    pub const ALL: [VolatilityWindow; 5] = [
        VolatilityWindow::OneHour,
        VolatilityWindow::SixHours,
        VolatilityWindow::OneDay,
        VolatilityWindow::SevenDays,
        VolatilityWindow::ThirtyDays,
    ];

    pub fn minutes(self) -> u32 {
        match self {
            VolatilityWindow::OneHour => ONE_HOUR_MINUTES,
            VolatilityWindow::SixHours => SIX_HOURS_MINUTES,
            VolatilityWindow::OneDay => ONE_DAY_MINUTES,
            VolatilityWindow::SevenDays => SEVEN_DAYS_MINUTES,
            VolatilityWindow::ThirtyDays => THIRTY_DAYS_MINUTES,
        }
    }

    pub fn duration(self) -> Duration {
        Duration::from_secs(u64::from(self.minutes()) * 60)
    }

    /// Longest window in the fixed set; the history lookback fetched per market.
    pub fn longest() -> VolatilityWindow {
        VolatilityWindow::ThirtyDays
    }
}

impl std::fmt::Display for VolatilityWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            VolatilityWindow::OneHour => "1h",
            VolatilityWindow::SixHours => "6h",
            VolatilityWindow::OneDay => "1d",
            VolatilityWindow::SevenDays => "7d",
            VolatilityWindow::ThirtyDays => "30d",
        };
        write!(f, "{s}")
    }
}

/// Annualised volatility per window.
pub type VolatilityMap = BTreeMap<VolatilityWindow, f64>;

// ---------------------------------------------------------------------------
// Reward estimate
// ---------------------------------------------------------------------------

/// Estimated daily reward per $100 of liquidity provided.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RewardEstimate {
    pub gm_reward_per_100: f64,
    pub mean_reward_per_100: f64,
    pub bid_reward_per_100: f64,
    pub ask_reward_per_100: f64,
    /// YES-token midpoint at snapshot time.
    pub midpoint: Option<f64>,
}

// ---------------------------------------------------------------------------
// Pipeline records
// ---------------------------------------------------------------------------

/// Everything computed for one market, handed from the coordinator to the ranker.
#[derive(Debug, Clone)]
pub struct MarketComputation {
    /// Position of the market in the listing; breaks score ties.
    pub fetch_index: usize,
    pub market: Market,
    pub reward: RewardEstimate,
    pub volatility: VolatilityMap,
}

#[derive(Debug, Clone, Serialize)]
pub struct RankedMarket {
    /// 1-based position in the full ranking.
    pub rank: usize,
    pub market: Market,
    pub reward: RewardEstimate,
    pub volatility: VolatilityMap,
    pub volatility_sum: f64,
    pub balance_factor: f64,
    pub score: f64,
}

impl RankedMarket {
    pub fn to_row(&self) -> ResultRow {
        let vol = |w: VolatilityWindow| self.volatility.get(&w).copied().unwrap_or(0.0);
        ResultRow {
            rank: self.rank,
            market_id: self.market.id.clone(),
            question: self.market.question.clone(),
            yes_token_id: self.market.yes_token_id.clone(),
            no_token_id: self.market.no_token_id.clone(),
            daily_rate: self.market.rewards.daily_rate,
            max_spread: self.market.rewards.max_spread,
            midpoint: self.reward.midpoint,
            gm_reward_per_100: self.reward.gm_reward_per_100,
            mean_reward_per_100: self.reward.mean_reward_per_100,
            volatility_1h: vol(VolatilityWindow::OneHour),
            volatility_6h: vol(VolatilityWindow::SixHours),
            volatility_1d: vol(VolatilityWindow::OneDay),
            volatility_7d: vol(VolatilityWindow::SevenDays),
            volatility_30d: vol(VolatilityWindow::ThirtyDays),
            volatility_sum: self.volatility_sum,
            score: self.score,
        }
    }
}

/// Flat tabular shape handed to whatever serialises the results.
#[derive(Debug, Clone, Serialize)]
pub struct ResultRow {
    pub rank: usize,
    pub market_id: String,
    pub question: String,
    pub yes_token_id: String,
    pub no_token_id: String,
    pub daily_rate: f64,
    pub max_spread: f64,
    pub midpoint: Option<f64>,
    pub gm_reward_per_100: f64,
    pub mean_reward_per_100: f64,
    pub volatility_1h: f64,
    pub volatility_6h: f64,
    pub volatility_1d: f64,
    pub volatility_7d: f64,
    pub volatility_30d: f64,
    pub volatility_sum: f64,
    pub score: f64,
}

// ---------------------------------------------------------------------------
// Exclusions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExclusionReason {
    BookFetch,
    HistoryFetch,
    Timeout,
    MalformedBook,
    InsufficientHistory,
    NonFinite,
    /// Run deadline hit before the market finished.
    Cancelled,
    /// The market's task panicked or ended without reporting.
    TaskFailed,
}

impl std::fmt::Display for ExclusionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExclusionReason::BookFetch => "book_fetch",
            ExclusionReason::HistoryFetch => "history_fetch",
            ExclusionReason::Timeout => "timeout",
            ExclusionReason::MalformedBook => "malformed_book",
            ExclusionReason::InsufficientHistory => "insufficient_history",
            ExclusionReason::NonFinite => "non_finite",
            ExclusionReason::Cancelled => "cancelled",
            ExclusionReason::TaskFailed => "task_failed",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Exclusion {
    pub market_id: String,
    pub question: String,
    pub reason: ExclusionReason,
    pub detail: String,
}

impl Exclusion {
    pub fn new(market: &Market, reason: ExclusionReason, detail: impl Into<String>) -> Self {
        Self {
            market_id: market.id.clone(),
            question: market.question.clone(),
            reason,
            detail: detail.into(),
        }
    }
}

/// Tally exclusions by reason, in reason order.
pub fn exclusion_counts(exclusions: &[Exclusion]) -> BTreeMap<ExclusionReason, usize> {
    let mut counts = BTreeMap::new();
    for e in exclusions {
        *counts.entry(e.reason).or_insert(0) += 1;
    }
    counts
}

// ---------------------------------------------------------------------------
// Run report
// ---------------------------------------------------------------------------

/// Outcome of one full scan. Replaced wholesale by the next run.
#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    pub run_id: u64,
    /// Unix seconds.
    pub started_at: i64,
    pub finished_at: i64,
    pub duration_ms: f64,
    pub markets_listed: usize,
    pub ranked: Vec<RankedMarket>,
    /// `ranked` restricted to volatility_sum below the calm cutoff, same order.
    pub calm: Vec<RankedMarket>,
    pub exclusions: Vec<Exclusion>,
    pub exclusion_counts: BTreeMap<ExclusionReason, usize>,
    /// True when the run deadline cancelled in-flight markets.
    pub timed_out: bool,
}

impl ScanReport {
    pub fn excluded(&self) -> usize {
        self.exclusions.len()
    }
}
