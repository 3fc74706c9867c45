pub mod ranker;
pub mod reward;
pub mod volatility;

pub use ranker::Ranker;
pub use reward::estimate_reward;
pub use volatility::compute_volatility;
