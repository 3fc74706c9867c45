//! Snapshot provider capability.
//!
//! The coordinator only ever sees `Arc<dyn SnapshotProvider>`; the Polymarket
//! implementation is wired in by `main`, tests plug in in-memory fakes.

pub mod polymarket;
pub mod rate_limiter;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{Market, PriceHistoryPoint, TokenBook};

pub use polymarket::PolymarketProvider;
pub use rate_limiter::RateLimiter;

#[async_trait]
pub trait SnapshotProvider: Send + Sync {
    /// Every market currently paying liquidity rewards.
    ///
    /// # Errors
    ///
    /// Any failure here is fatal to the run: there is nothing to scan.
    async fn list_reward_eligible_markets(&self) -> Result<Vec<Market>>;

    /// Current book for one outcome token, both sides ordered best-first.
    async fn get_order_book(&self, token_id: &str) -> Result<TokenBook>;

    /// 1-minute price samples covering the trailing `lookback`, oldest first.
    async fn get_price_history(
        &self,
        token_id: &str,
        lookback: Duration,
    ) -> Result<Vec<PriceHistoryPoint>>;

    /// Name for logging.
    fn name(&self) -> &'static str;
}
