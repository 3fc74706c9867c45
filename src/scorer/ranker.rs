use tracing::{debug, info};

use crate::config::BALANCED_PRICE;
use crate::types::{Exclusion, ExclusionReason, MarketComputation, RankedMarket, VolatilityMap};

/// Result of ranking one batch of computed markets.
#[derive(Debug, Default)]
pub struct Ranking {
    pub ranked: Vec<RankedMarket>,
    /// `ranked` restricted to volatility_sum below the calm cutoff, same order.
    pub calm: Vec<RankedMarket>,
    /// Markets dropped here because their figures were unusable.
    pub exclusions: Vec<Exclusion>,
}

/// Orders markets by risk-adjusted reward.
///
/// `score = gm_reward_per_100 / (1 + volatility_sum) * balance_factor`
pub struct Ranker {
    calm_threshold: f64,
}

impl Ranker {
    pub fn new(calm_threshold: f64) -> Self {
        Self { calm_threshold }
    }

    pub fn rank(&self, computations: Vec<MarketComputation>) -> Ranking {
        let mut exclusions = Vec::new();
        let mut scored: Vec<(usize, RankedMarket)> = Vec::with_capacity(computations.len());

        for c in computations {
            let volatility_sum = volatility_sum(&c.volatility);
            let balance_factor = balance_factor(c.reward.midpoint);
            let score = composite_score(c.reward.gm_reward_per_100, volatility_sum, balance_factor);

            let finite = [c.reward.gm_reward_per_100, c.reward.mean_reward_per_100, volatility_sum, score]
                .iter()
                .all(|v| v.is_finite());
            if !finite {
                debug!(market_id = %c.market.id, "[RANK] non-finite figures, excluding");
                exclusions.push(Exclusion::new(
                    &c.market,
                    ExclusionReason::NonFinite,
                    format!("gm={} vol_sum={volatility_sum} score={score}", c.reward.gm_reward_per_100),
                ));
                continue;
            }

            scored.push((
                c.fetch_index,
                RankedMarket {
                    rank: 0,
                    market: c.market,
                    reward: c.reward,
                    volatility: c.volatility,
                    volatility_sum,
                    balance_factor,
                    score,
                },
            ));
        }

        // Score descending; equal scores keep listing order.
        scored.sort_by(|(ia, a), (ib, b)| b.score.total_cmp(&a.score).then(ia.cmp(ib)));

        let ranked: Vec<RankedMarket> = scored
            .into_iter()
            .enumerate()
            .map(|(i, (_, mut m))| {
                m.rank = i + 1;
                m
            })
            .collect();
        let calm = calm_view(&ranked, self.calm_threshold);

        info!(
            ranked = ranked.len(),
            calm = calm.len(),
            excluded = exclusions.len(),
            "[RANK] ranked {} markets ({} below volatility_sum {:.1})",
            ranked.len(),
            calm.len(),
            self.calm_threshold,
        );

        Ranking { ranked, calm, exclusions }
    }
}

/// Unweighted sum across every tracked window.
pub fn volatility_sum(volatility: &VolatilityMap) -> f64 {
    volatility.values().sum()
}

/// 1.0 at a 50/50 price, falling linearly to 0.5 at either extreme.
/// An unknown midpoint is treated as fully unbalanced.
pub fn balance_factor(midpoint: Option<f64>) -> f64 {
    match midpoint {
        Some(m) if m.is_finite() => 1.0 - (m - BALANCED_PRICE).abs().min(0.5),
        _ => 0.5,
    }
}

pub fn composite_score(gm_reward_per_100: f64, volatility_sum: f64, balance_factor: f64) -> f64 {
    gm_reward_per_100 / (1.0 + volatility_sum) * balance_factor
}

/// Order-preserving subsequence of `ranked` with volatility_sum strictly below `threshold`.
pub fn calm_view(ranked: &[RankedMarket], threshold: f64) -> Vec<RankedMarket> {
    ranked
        .iter()
        .filter(|m| m.volatility_sum < threshold)
        .cloned()
        .collect()
}
