//! Sector breakdown of an asset universe.

use std::collections::BTreeMap;

use super::scorer::Asset;
use crate::macro_model::{SectorConfig, UNKNOWN_SECTOR};

/// Sector of `asset`: its own sector first, then the configured ticker map.
pub fn resolve_sector<'a>(asset: &'a Asset, config: &'a SectorConfig) -> Option<&'a str> {
    asset
        .sector
        .as_deref()
        .or_else(|| config.sector_of(&asset.ticker))
}

/// Number of assets per sector; unresolved assets count under `Unknown`.
pub fn sector_distribution(assets: &[Asset], config: &SectorConfig) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for asset in assets {
        let sector = resolve_sector(asset, config).unwrap_or(UNKNOWN_SECTOR);
        *counts.entry(sector.to_string()).or_insert(0) += 1;
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distribution_counts_unknown() {
        let config = SectorConfig::default();
        let assets: Vec<Asset> = ["ITUB4.SA", "BBDC4.SA", "VALE3.SA", "NOPE3.SA"]
            .iter()
            .map(|t| Asset::new(*t, 10.0))
            .collect();
        let counts = sector_distribution(&assets, &config);
        assert_eq!(counts["Banks"], 2);
        assert_eq!(counts["Mining and Steel"], 1);
        assert_eq!(counts[UNKNOWN_SECTOR], 1);
        assert_eq!(counts.values().sum::<usize>(), 4);
    }

    #[test]
    fn test_explicit_sector_wins() {
        let config = SectorConfig::default();
        let asset = Asset::new("ITUB4.SA", 30.0).with_sector("Insurance");
        assert_eq!(resolve_sector(&asset, &config), Some("Insurance"));
        let counts = sector_distribution(&[asset], &config);
        assert_eq!(counts.get("Banks"), None);
        assert_eq!(counts["Insurance"], 1);
    }

    #[test]
    fn test_empty_universe() {
        assert!(sector_distribution(&[], &SectorConfig::default()).is_empty());
    }
}
