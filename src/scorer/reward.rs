//! Liquidity reward simulator.
//!
//! Scores resting depth inside the reward band with the quadratic liquidity
//! score `((v - s) / v)^2`, where `v` is the band half-width and `s` the
//! level's distance from its token's midpoint. The market's daily budget is
//! spread over the total weighted depth of the book, which gives a reward per
//! weighted dollar; a $100 order placed at a side's average weight earns
//! `100 * k * weighted / notional` per day.

use crate::types::{BookLevel, OrderBookSnapshot, RewardEstimate, RewardParams, TokenBook};

/// Weighted and raw dollar depth eligible for rewards on one side of the book.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
struct SideDepth {
    weighted: f64,
    notional: f64,
}

impl SideDepth {
    fn add(self, other: SideDepth) -> SideDepth {
        SideDepth {
            weighted: self.weighted + other.weighted,
            notional: self.notional + other.notional,
        }
    }
}

/// Quadratic liquidity score for a level `distance` away from the midpoint.
/// Zero at and beyond the band edge.
pub fn level_weight(distance: f64, max_spread: f64) -> f64 {
    if max_spread <= 0.0 || !distance.is_finite() || distance >= max_spread {
        return 0.0;
    }
    let w = (max_spread - distance) / max_spread;
    w * w
}

/// Sum the in-band depth of a best-first ladder around `reference`.
/// Levels are ordered away from the midpoint, so the scan stops at the first
/// level outside the band.
fn side_depth(levels: &[BookLevel], reference: f64, params: &RewardParams) -> SideDepth {
    levels
        .iter()
        .take_while(|l| (l.price - reference).abs() < params.max_spread)
        .filter(|l| l.price > 0.0 && l.size > 0.0 && l.size >= params.min_size)
        .fold(SideDepth::default(), |acc, l| {
            let weight = level_weight((l.price - reference).abs(), params.max_spread);
            acc.add(SideDepth {
                weighted: weight * l.notional(),
                notional: l.notional(),
            })
        })
}

/// (bid depth, ask depth) for one token, measured from that token's own midpoint.
fn token_depth(book: &TokenBook, params: &RewardParams) -> (SideDepth, SideDepth) {
    match book.reference_price() {
        Some(reference) => (
            side_depth(&book.bids, reference, params),
            side_depth(&book.asks, reference, params),
        ),
        None => (SideDepth::default(), SideDepth::default()),
    }
}

/// Market-level price used for the balance signal: the YES midpoint, or the
/// complement of the NO reference when the YES book is empty.
fn market_midpoint(snapshot: &OrderBookSnapshot) -> Option<f64> {
    snapshot
        .yes
        .reference_price()
        .or_else(|| snapshot.no.reference_price().map(|p| 1.0 - p))
}

fn per_100(side: SideDepth, reward_per_weighted_dollar: f64) -> f64 {
    if side.notional <= 0.0 {
        return 0.0;
    }
    100.0 * reward_per_weighted_dollar * side.weighted / side.notional
}

/// Geometric mean that collapses to zero when any input is non-positive.
pub fn guarded_geometric_mean(values: &[f64]) -> f64 {
    if values.is_empty() || values.iter().any(|v| v.is_nan() || *v <= 0.0) {
        return 0.0;
    }
    let log_sum: f64 = values.iter().map(|v| v.ln()).sum();
    (log_sum / values.len() as f64).exp()
}

/// Estimate the daily reward per $100 of liquidity for one market snapshot.
///
/// Empty books and books with no depth inside the band yield zeros. A book
/// quoted on one side only keeps a positive arithmetic mean while the
/// geometric mean drops to zero.
pub fn estimate_reward(snapshot: &OrderBookSnapshot, params: &RewardParams) -> RewardEstimate {
    let midpoint = market_midpoint(snapshot);

    let (bid, ask) = snapshot
        .tokens()
        .into_iter()
        .map(|book| token_depth(book, params))
        .fold(
            (SideDepth::default(), SideDepth::default()),
            |(bid_acc, ask_acc), (bid, ask)| (bid_acc.add(bid), ask_acc.add(ask)),
        );

    let total_weighted = bid.weighted + ask.weighted;
    if total_weighted <= 0.0 || params.daily_rate <= 0.0 {
        return RewardEstimate { midpoint, ..RewardEstimate::default() };
    }

    let k = params.daily_rate / total_weighted;
    let bid_reward = per_100(bid, k);
    let ask_reward = per_100(ask, k);

    RewardEstimate {
        gm_reward_per_100: guarded_geometric_mean(&[bid_reward, ask_reward]),
        mean_reward_per_100: (bid_reward + ask_reward) / 2.0,
        bid_reward_per_100: bid_reward,
        ask_reward_per_100: ask_reward,
        midpoint,
    }
}
