use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use tracing::{debug, info, warn};

use crate::api::latency::{Endpoint, ProviderLatency};
use crate::config::{Config, LISTING_END_CURSOR, SAMPLE_INTERVAL_MINUTES};
use crate::error::{AppError, Result};
use crate::provider::{RateLimiter, SnapshotProvider};
use crate::types::{BookLevel, Market, PriceHistoryPoint, RewardParams, TokenBook};

// ---------------------------------------------------------------------------
// Raw CLOB payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SamplingMarketsPage {
    #[serde(default)]
    data: Vec<RawMarket>,
    next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawMarket {
    condition_id: Option<String>,
    #[serde(default)]
    question: String,
    market_slug: Option<String>,
    end_date_iso: Option<String>,
    #[serde(default)]
    active: bool,
    #[serde(default)]
    closed: bool,
    #[serde(default)]
    tokens: Vec<RawToken>,
    rewards: Option<RawRewards>,
}

#[derive(Debug, Deserialize)]
struct RawToken {
    #[serde(default)]
    token_id: String,
    #[serde(default)]
    outcome: String,
}

#[derive(Debug, Deserialize)]
struct RawRewards {
    #[serde(default)]
    rates: Option<Vec<RawRate>>,
    #[serde(default, deserialize_with = "lenient_f64")]
    min_size: f64,
    /// Cents.
    #[serde(default, deserialize_with = "lenient_f64")]
    max_spread: f64,
}

#[derive(Debug, Deserialize)]
struct RawRate {
    #[serde(default, deserialize_with = "lenient_f64")]
    rewards_daily_rate: f64,
}

/// A single price level as the CLOB serves it: decimal strings.
#[derive(Debug, Deserialize, Clone)]
pub struct RawLevel {
    pub price: String,
    pub size: String,
}

#[derive(Debug, Deserialize)]
struct RawBook {
    #[serde(default)]
    bids: Vec<RawLevel>,
    #[serde(default)]
    asks: Vec<RawLevel>,
}

#[derive(Debug, Deserialize)]
struct RawHistory {
    #[serde(default)]
    history: Vec<RawHistoryPoint>,
}

#[derive(Debug, Deserialize)]
struct RawHistoryPoint {
    t: i64,
    #[serde(deserialize_with = "lenient_f64")]
    p: f64,
}

/// Accepts a JSON number, a numeric string, or null (→ 0.0).
fn lenient_f64<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<f64, D::Error> {
    let v = Option::<serde_json::Value>::deserialize(d)?;
    Ok(v
        .and_then(|v| v.as_f64().or_else(|| v.as_str().and_then(|s| s.trim().parse().ok())))
        .unwrap_or(0.0))
}

// ---------------------------------------------------------------------------
// Listing filter
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct FetchStats {
    pub api_total: usize,
    pub pages: usize,
    pub rejected_inactive: usize,
    pub rejected_no_tokens: usize,
    pub rejected_no_rewards: usize,
    pub qualified: usize,
}

#[derive(Debug, PartialEq)]
enum Rejection {
    Inactive,
    NoTokens,
    NoRewards,
}

fn parse_sampling_market(
    raw: RawMarket,
    default_max_spread: f64,
) -> std::result::Result<Market, Rejection> {
    if !raw.active || raw.closed {
        return Err(Rejection::Inactive);
    }

    let id = match raw.condition_id {
        Some(id) if !id.is_empty() => id,
        _ => return Err(Rejection::NoTokens),
    };

    let tokens: Vec<&RawToken> = raw.tokens.iter().filter(|t| !t.token_id.is_empty()).collect();
    if tokens.len() < 2 {
        return Err(Rejection::NoTokens);
    }

    let yes_idx = tokens.iter().position(|t| {
        t.outcome.eq_ignore_ascii_case("Yes") || t.outcome.eq_ignore_ascii_case("Up")
    });
    let no_idx = tokens.iter().position(|t| {
        t.outcome.eq_ignore_ascii_case("No") || t.outcome.eq_ignore_ascii_case("Down")
    });
    let (yes_idx, no_idx) = match (yes_idx, no_idx, tokens.len()) {
        (Some(y), Some(n), _) if y != n => (y, n),
        // One recognised label in a two-token market: the other token is its complement.
        (Some(y), None, 2) => (y, 1 - y),
        (None, Some(n), 2) => (1 - n, n),
        (None, None, 2) => (0, 1),
        _ => return Err(Rejection::NoTokens),
    };

    let Some(rewards) = raw.rewards else {
        return Err(Rejection::NoRewards);
    };
    let daily_rate: f64 = rewards
        .rates
        .unwrap_or_default()
        .iter()
        .map(|r| r.rewards_daily_rate)
        .filter(|r| r.is_finite() && *r > 0.0)
        .sum();
    if daily_rate <= 0.0 {
        return Err(Rejection::NoRewards);
    }

    let max_spread = if rewards.max_spread > 0.0 {
        rewards.max_spread / 100.0
    } else {
        default_max_spread
    };

    Ok(Market {
        id,
        question: raw.question,
        slug: raw.market_slug,
        end_date_iso: raw.end_date_iso,
        yes_token_id: tokens[yes_idx].token_id.clone(),
        no_token_id: tokens[no_idx].token_id.clone(),
        rewards_eligible: true,
        rewards: RewardParams {
            max_spread,
            min_size: rewards.min_size.max(0.0),
            daily_rate,
        },
    })
}

// ---------------------------------------------------------------------------
// Listing pagination
// ---------------------------------------------------------------------------

/// Cursor for the next page, or None when the listing is exhausted: the
/// server sent no cursor, the end marker, or the cursor it just served.
fn next_cursor(current: &str, page_next: Option<String>) -> Option<String> {
    match page_next {
        Some(next) if !next.is_empty() && next != LISTING_END_CURSOR && next != current => Some(next),
        _ => None,
    }
}

/// Filter one page into `markets`, stopping at `max_markets`.
/// Returns true once the cap is reached.
fn absorb_page(
    page: Vec<RawMarket>,
    markets: &mut Vec<Market>,
    stats: &mut FetchStats,
    max_markets: usize,
    default_max_spread: f64,
) -> bool {
    stats.pages += 1;
    stats.api_total += page.len();

    for raw in page {
        if markets.len() >= max_markets {
            return true;
        }
        match parse_sampling_market(raw, default_max_spread) {
            Ok(market) => markets.push(market),
            Err(Rejection::Inactive) => stats.rejected_inactive += 1,
            Err(Rejection::NoTokens) => stats.rejected_no_tokens += 1,
            Err(Rejection::NoRewards) => stats.rejected_no_rewards += 1,
        }
    }
    markets.len() >= max_markets
}

// ---------------------------------------------------------------------------
// Book normalisation
// ---------------------------------------------------------------------------

fn parse_levels(token_id: &str, raw: &[RawLevel]) -> Result<Vec<BookLevel>> {
    let mut levels = Vec::with_capacity(raw.len());
    for level in raw {
        let price = level.price.trim().parse::<f64>();
        let size = level.size.trim().parse::<f64>();
        let (Ok(price), Ok(size)) = (price, size) else {
            return Err(AppError::MalformedBook(format!(
                "{token_id}: unparseable level {}@{}",
                level.size, level.price
            )));
        };
        if !price.is_finite() || !size.is_finite() || !(0.0..=1.0).contains(&price) || size < 0.0 {
            return Err(AppError::MalformedBook(format!(
                "{token_id}: out-of-range level {size}@{price}"
            )));
        }
        if size > 0.0 {
            levels.push(BookLevel::new(price, size));
        }
    }
    Ok(levels)
}

/// Sort best-first and merge levels that land on the same price.
fn consolidate(mut levels: Vec<BookLevel>, descending: bool) -> Vec<BookLevel> {
    levels.sort_by(|a, b| {
        if descending {
            b.price.total_cmp(&a.price)
        } else {
            a.price.total_cmp(&b.price)
        }
    });
    let mut out: Vec<BookLevel> = Vec::with_capacity(levels.len());
    for level in levels {
        match out.last_mut() {
            Some(last) if (last.price - level.price).abs() < 1e-9 => last.size += level.size,
            _ => out.push(level),
        }
    }
    out
}

/// The CLOB serves bids ascending and asks descending (best level last).
/// Re-order both sides best-first and reject crossed books.
pub fn normalize_book(token_id: &str, bids: &[RawLevel], asks: &[RawLevel]) -> Result<TokenBook> {
    let bids = consolidate(parse_levels(token_id, bids)?, true);
    let asks = consolidate(parse_levels(token_id, asks)?, false);

    let book = TokenBook::new(token_id, bids, asks);
    if let (Some(bid), Some(ask)) = (book.best_bid(), book.best_ask()) {
        if bid >= ask {
            return Err(AppError::MalformedBook(format!(
                "{token_id}: crossed book bid={bid:.4} ask={ask:.4}"
            )));
        }
    }
    Ok(book)
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

pub struct PolymarketProvider {
    client: reqwest::Client,
    base_url: String,
    limiter: Arc<RateLimiter>,
    latency: Arc<ProviderLatency>,
    max_markets: usize,
    default_max_spread: f64,
}

impl PolymarketProvider {
    pub fn new(cfg: &Config, latency: Arc<ProviderLatency>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(cfg.request_timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: cfg.clob_api_url.trim_end_matches('/').to_string(),
            limiter: Arc::new(RateLimiter::new(
                Duration::from_millis(cfg.min_request_interval_ms),
                "clob",
            )),
            latency,
            max_markets: cfg.max_markets,
            default_max_spread: cfg.default_max_spread_cents / 100.0,
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
        endpoint: Endpoint,
    ) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);

        self.limiter.acquire().await;
        let started = Instant::now();
        let resp = self.client.get(&url).query(query).send().await;
        self.latency.record(endpoint, started.elapsed());

        let resp = resp?;
        let status = resp.status();
        if !status.is_success() {
            return Err(AppError::Api { status: status.as_u16(), url });
        }
        Ok(resp.json::<T>().await?)
    }

    /// Page through `/sampling-markets`, keeping markets with a live reward program.
    pub async fn fetch_reward_markets(&self) -> Result<(Vec<Market>, FetchStats)> {
        let mut markets = Vec::new();
        let mut stats = FetchStats::default();
        let mut cursor = String::new();

        loop {
            let mut query = Vec::new();
            if !cursor.is_empty() {
                query.push(("next_cursor", cursor.clone()));
            }
            let page: SamplingMarketsPage =
                self.get_json("/sampling-markets", &query, Endpoint::Listing).await?;

            let full = absorb_page(
                page.data,
                &mut markets,
                &mut stats,
                self.max_markets,
                self.default_max_spread,
            );
            if full {
                break;
            }

            match next_cursor(&cursor, page.next_cursor) {
                Some(next) => cursor = next,
                None => break,
            }
        }

        stats.qualified = markets.len();
        Ok((markets, stats))
    }
}

#[async_trait]
impl SnapshotProvider for PolymarketProvider {
    async fn list_reward_eligible_markets(&self) -> Result<Vec<Market>> {
        let (markets, stats) = self
            .fetch_reward_markets()
            .await
            .map_err(|e| AppError::Bootstrap(format!("market listing failed: {e}")))?;

        info!(
            qualified = stats.qualified,
            api_total = stats.api_total,
            pages = stats.pages,
            "[PROVIDER] {} reward-eligible markets from {} listed ({} pages)",
            stats.qualified,
            stats.api_total,
            stats.pages,
        );
        info!(
            "[FILTER] rejected: inactive={} no_tokens={} no_rewards={}",
            stats.rejected_inactive, stats.rejected_no_tokens, stats.rejected_no_rewards,
        );
        if markets.is_empty() {
            warn!("[PROVIDER] listing returned no reward-eligible markets");
        }
        Ok(markets)
    }

    async fn get_order_book(&self, token_id: &str) -> Result<TokenBook> {
        let raw: RawBook = self
            .get_json("/book", &[("token_id", token_id.to_string())], Endpoint::Book)
            .await?;
        normalize_book(token_id, &raw.bids, &raw.asks)
    }

    async fn get_price_history(
        &self,
        token_id: &str,
        lookback: Duration,
    ) -> Result<Vec<PriceHistoryPoint>> {
        let end_ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let start_ts = end_ts.saturating_sub(lookback.as_secs());

        let raw: RawHistory = self
            .get_json(
                "/prices-history",
                &[
                    ("market", token_id.to_string()),
                    ("startTs", start_ts.to_string()),
                    ("endTs", end_ts.to_string()),
                    ("fidelity", SAMPLE_INTERVAL_MINUTES.to_string()),
                ],
                Endpoint::History,
            )
            .await?;

        let mut points: Vec<PriceHistoryPoint> = raw
            .history
            .into_iter()
            .map(|p| PriceHistoryPoint::new(p.t, p.p))
            .collect();
        points.sort_by_key(|p| p.timestamp);

        let short = &token_id[..12.min(token_id.len())];
        debug!(token = %short, points = points.len(), "[PROVIDER] price history fetched");
        Ok(points)
    }

    fn name(&self) -> &'static str {
        "polymarket"
    }
}
