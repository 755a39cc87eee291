//! Asset-level scoring: valuation fused with sector favorability.

pub mod scorer;
pub mod universe;

pub use scorer::{rank_assets, Asset, AssetScore, AssetScorer, ScoredUniverse, ScoringWeights, SkippedAsset};
pub use universe::{resolve_sector, sector_distribution};
