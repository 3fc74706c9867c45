use std::time::Duration;

use crate::error::{AppError, Result};

pub const CLOB_API_URL: &str = "https://clob.polymarket.com";

/// Minutes in a 365-day year. Annualisation base for 1-minute log returns.
pub const MINUTES_PER_YEAR: f64 = 525_600.0;

/// Sampling granularity of price history, in minutes. Requested as `fidelity` from the CLOB.
pub const SAMPLE_INTERVAL_MINUTES: u32 = 1;

/// Probability at which a binary market is perfectly balanced.
pub const BALANCED_PRICE: f64 = 0.5;

/// Default cap for the calm-market view (sum of annualised window volatilities).
pub const VOLATILITY_SUM_MAX: f64 = 20.0;

/// Channel capacity for per-market results flowing back to the coordinator.
pub const CHANNEL_CAPACITY: usize = 1024;

/// Cursor value the CLOB returns once the last page has been served.
pub const LISTING_END_CURSOR: &str = "LTE=";

/// Lookback windows tracked per market, shortest first.
pub mod windows {
    pub const ONE_HOUR_MINUTES: u32 = 60;
    pub const SIX_HOURS_MINUTES: u32 = 6 * 60;
    pub const ONE_DAY_MINUTES: u32 = 24 * 60;
    pub const SEVEN_DAYS_MINUTES: u32 = 7 * 24 * 60;
    pub const THIRTY_DAYS_MINUTES: u32 = 30 * 24 * 60;
}

#[derive(Debug, Clone)]
pub struct Config {
    pub clob_api_url: String,
    pub log_level: String,
    pub api_port: u16,
    /// Max reward-eligible markets to scan per run (SCANNER_MAX_MARKETS)
    pub max_markets: usize,
    /// Concurrent order-book fetches (BOOK_WORKERS)
    pub book_workers: usize,
    /// Concurrent price-history fetches (HISTORY_WORKERS)
    pub history_workers: usize,
    /// Minimum spacing between any two outbound requests (MIN_REQUEST_INTERVAL_MS)
    pub min_request_interval_ms: u64,
    /// Per-request HTTP timeout (REQUEST_TIMEOUT_SECS)
    pub request_timeout: Duration,
    /// Whole-run deadline; unfinished markets are cancelled (RUN_TIMEOUT_SECS)
    pub run_timeout: Duration,
    /// Delay between runs; zero means run once and keep serving (SCAN_INTERVAL_SECS)
    pub scan_interval: Duration,
    /// Calm-market cutoff on volatility_sum (VOLATILITY_SUM_MAX)
    pub volatility_sum_max: f64,
    /// Band half-width in cents used when a market publishes none (DEFAULT_MAX_SPREAD_CENTS)
    pub default_max_spread_cents: f64,
    /// Ranked rows echoed to the log after each run (LOG_TOP_N)
    pub log_top_n: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            clob_api_url: std::env::var("CLOB_API_URL")
                .unwrap_or_else(|_| CLOB_API_URL.to_string()),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            api_port: std::env::var("API_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse::<u16>()
                .map_err(|_| AppError::Config("API_PORT must be a valid port number".to_string()))?,
            max_markets: env_parse("SCANNER_MAX_MARKETS", 500),
            book_workers: positive("BOOK_WORKERS", env_parse("BOOK_WORKERS", 8))?,
            history_workers: positive("HISTORY_WORKERS", env_parse("HISTORY_WORKERS", 4))?,
            min_request_interval_ms: env_parse("MIN_REQUEST_INTERVAL_MS", 50),
            request_timeout: Duration::from_secs(env_parse("REQUEST_TIMEOUT_SECS", 15)),
            run_timeout: Duration::from_secs(env_parse("RUN_TIMEOUT_SECS", 300)),
            scan_interval: Duration::from_secs(env_parse("SCAN_INTERVAL_SECS", 900)),
            volatility_sum_max: env_parse("VOLATILITY_SUM_MAX", VOLATILITY_SUM_MAX),
            default_max_spread_cents: env_parse("DEFAULT_MAX_SPREAD_CENTS", 3.0),
            log_top_n: env_parse("LOG_TOP_N", 15),
        })
    }
}

/// Read and parse an env var, falling back to `default` when unset or unparseable.
fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

fn positive(key: &str, value: usize) -> Result<usize> {
    if value == 0 {
        return Err(AppError::Config(format!("{key} must be at least 1")));
    }
    Ok(value)
}
