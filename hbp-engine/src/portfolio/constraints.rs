//! Portfolio constraints and the feasible set the solver projects onto.
//!
//! The feasible set is the intersection of per-asset boxes, the budget
//! hyperplane `sum w = 1`, optional sector caps (one sector per asset) and,
//! for target-return problems, `mu^T w = target`. Projection onto
//! box ∩ budget ∩ target is exact; sector caps are added with Dykstra's
//! alternating projections.

use std::collections::BTreeMap;

use hbp_common::validation::{ensure_finite, ensure_in_range, Validate, ValidationError, ValidationResult};
use nalgebra::DVector;
use serde::{Deserialize, Serialize};

use crate::error::{MacroError, Result};

/// Slack allowed when comparing a target with the achievable range.
pub const RANGE_TOLERANCE: f64 = 1e-9;

const BISECTION_ITERATIONS: usize = 200;
const DYKSTRA_MAX_ITERATIONS: usize = 2_000;
const DYKSTRA_TOLERANCE: f64 = 1e-14;
const BRACKET_DOUBLINGS: usize = 200;

// ============================================================================
// Configuration
// ============================================================================

/// Weight bounds for a single asset.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeightBounds {
    pub min: f64,
    pub max: f64,
}

impl WeightBounds {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }
}

/// Constraints of one optimization request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationConstraints {
    #[serde(default = "default_max_weight")]
    pub max_weight_per_asset: f64,
    #[serde(default)]
    pub min_weight: f64,
    /// Required for the target-return objective
    #[serde(default)]
    pub target_return: Option<f64>,
    /// Sector → maximum total weight
    #[serde(default)]
    pub sector_caps: BTreeMap<String, f64>,
    /// Ticker → sector, used by `sector_caps`
    #[serde(default)]
    pub asset_sectors: BTreeMap<String, String>,
    /// Per-ticker bounds, replacing the global ones
    #[serde(default)]
    pub asset_bounds: BTreeMap<String, WeightBounds>,
    #[serde(default)]
    pub allow_short: bool,
}

fn default_max_weight() -> f64 {
    0.3
}

impl Default for OptimizationConstraints {
    fn default() -> Self {
        Self {
            max_weight_per_asset: default_max_weight(),
            min_weight: 0.0,
            target_return: None,
            sector_caps: BTreeMap::new(),
            asset_sectors: BTreeMap::new(),
            asset_bounds: BTreeMap::new(),
            allow_short: false,
        }
    }
}

impl OptimizationConstraints {
    /// Long-only, fully invested, at most `max_weight` per asset.
    pub fn long_only(max_weight: f64) -> Self {
        Self {
            max_weight_per_asset: max_weight,
            ..Default::default()
        }
    }

    pub fn with_target_return(mut self, target: f64) -> Self {
        self.target_return = Some(target);
        self
    }

    pub fn with_sector_cap(mut self, sector: impl Into<String>, cap: f64) -> Self {
        self.sector_caps.insert(sector.into(), cap);
        self
    }

    pub fn with_asset_sector(mut self, ticker: impl Into<String>, sector: impl Into<String>) -> Self {
        self.asset_sectors.insert(ticker.into(), sector.into());
        self
    }

    /// Bounds for `ticker`, per-asset bounds first.
    pub fn bounds_for(&self, ticker: &str) -> WeightBounds {
        self.asset_bounds
            .get(ticker)
            .copied()
            .unwrap_or(WeightBounds::new(self.min_weight, self.max_weight_per_asset))
    }
}

impl Validate for OptimizationConstraints {
    fn validate(&self) -> ValidationResult<()> {
        let floor = if self.allow_short { -1.0 } else { 0.0 };
        ensure_in_range("constraints.max_weight_per_asset", self.max_weight_per_asset, 0.0, 1.0)?;
        if self.max_weight_per_asset == 0.0 {
            return Err(ValidationError::invalid(
                "constraints.max_weight_per_asset",
                "must be positive",
            ));
        }
        ensure_finite("constraints.min_weight", self.min_weight)?;
        if self.min_weight < floor {
            return Err(ValidationError::invalid(
                "constraints.min_weight",
                if self.allow_short {
                    format!("must be at least -1, got {}", self.min_weight)
                } else {
                    format!(
                        "negative weights need allow_short, got {}",
                        self.min_weight
                    )
                },
            ));
        }
        if self.min_weight > self.max_weight_per_asset {
            return Err(ValidationError::Conflict {
                reason: format!(
                    "min_weight {} exceeds max_weight_per_asset {}",
                    self.min_weight, self.max_weight_per_asset
                ),
            });
        }
        if let Some(target) = self.target_return {
            ensure_finite("constraints.target_return", target)?;
        }

        let mut errors = Vec::new();
        for (sector, cap) in &self.sector_caps {
            if let Err(e) = ensure_in_range(&format!("constraints.sector_caps.{sector}"), *cap, 0.0, 1.0) {
                errors.push(e);
            }
        }
        for (ticker, bounds) in &self.asset_bounds {
            let field = format!("constraints.asset_bounds.{ticker}");
            if !(bounds.min.is_finite() && bounds.max.is_finite()) || bounds.min > bounds.max {
                errors.push(ValidationError::invalid(
                    &field,
                    format!("invalid range [{}, {}]", bounds.min, bounds.max),
                ));
            } else if bounds.min < floor || bounds.max > 1.0 {
                errors.push(ValidationError::invalid(
                    &field,
                    format!("range [{}, {}] outside [{floor}, 1]", bounds.min, bounds.max),
                ));
            }
        }
        ValidationError::collect(errors)
    }
}

/// Per-asset upper bounds driven by asset scores.
///
/// `upper = min(max_limit, base_limit + bonus * (score + 1) / 2)`, so a
/// score of -1 keeps the base limit and +1 adds the full bonus.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MacroBoundPolicy {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_base_limit")]
    pub base_limit: f64,
    #[serde(default = "default_bonus")]
    pub bonus: f64,
    #[serde(default = "default_max_limit")]
    pub max_limit: f64,
}

fn default_true() -> bool {
    true
}

fn default_base_limit() -> f64 {
    0.20
}

fn default_bonus() -> f64 {
    0.20
}

fn default_max_limit() -> f64 {
    0.35
}

impl Default for MacroBoundPolicy {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            base_limit: default_base_limit(),
            bonus: default_bonus(),
            max_limit: default_max_limit(),
        }
    }
}

impl MacroBoundPolicy {
    pub fn upper_bound(&self, score: f64) -> f64 {
        let unit = (score.clamp(-1.0, 1.0) + 1.0) / 2.0;
        (self.base_limit + self.bonus * unit).min(self.max_limit)
    }

    /// Bounds for every scored ticker.
    pub fn bounds(&self, scores: &BTreeMap<String, f64>, min_weight: f64) -> BTreeMap<String, WeightBounds> {
        scores
            .iter()
            .map(|(ticker, &score)| {
                let max = self.upper_bound(score).max(min_weight);
                (ticker.clone(), WeightBounds::new(min_weight, max))
            })
            .collect()
    }
}

impl Validate for MacroBoundPolicy {
    fn validate(&self) -> ValidationResult<()> {
        ensure_in_range("optimizer.macro_bounds.base_limit", self.base_limit, 0.0, 1.0)?;
        ensure_in_range("optimizer.macro_bounds.bonus", self.bonus, 0.0, 1.0)?;
        ensure_in_range("optimizer.macro_bounds.max_limit", self.max_limit, 0.0, 1.0)?;
        if self.max_limit < self.base_limit {
            return Err(ValidationError::Conflict {
                reason: format!(
                    "macro_bounds.max_limit {} below base_limit {}",
                    self.max_limit, self.base_limit
                ),
            });
        }
        Ok(())
    }
}

// ============================================================================
// Feasible set
// ============================================================================

#[derive(Debug, Clone)]
struct SectorGroup {
    name: String,
    members: Vec<usize>,
    cap: f64,
}

/// Linear constraint set over an ordered asset universe.
#[derive(Debug, Clone)]
pub struct FeasibleSet {
    lower: DVector<f64>,
    upper: DVector<f64>,
    groups: Vec<SectorGroup>,
    target: Option<(DVector<f64>, f64)>,
}

impl FeasibleSet {
    /// Build the set for `tickers` and check that a fully invested
    /// portfolio exists.
    pub fn new(tickers: &[String], constraints: &OptimizationConstraints) -> Result<Self> {
        constraints
            .validate()
            .map_err(|e| MacroError::InvalidConstraints(e.to_string()))?;

        let n = tickers.len();
        let mut lower = DVector::zeros(n);
        let mut upper = DVector::zeros(n);
        for (i, ticker) in tickers.iter().enumerate() {
            let bounds = constraints.bounds_for(ticker);
            lower[i] = bounds.min;
            upper[i] = bounds.max;
        }

        let groups = constraints
            .sector_caps
            .iter()
            .filter_map(|(sector, &cap)| {
                let members: Vec<usize> = tickers
                    .iter()
                    .enumerate()
                    .filter(|(_, t)| constraints.asset_sectors.get(*t) == Some(sector))
                    .map(|(i, _)| i)
                    .collect();
                (!members.is_empty()).then(|| SectorGroup {
                    name: sector.clone(),
                    members,
                    cap,
                })
            })
            .collect();

        let set = Self {
            lower,
            upper,
            groups,
            target: None,
        };
        set.check_budget()?;
        Ok(set)
    }

    /// Add the equality `mu^T w = target`.
    pub fn with_target_return(mut self, mu: &DVector<f64>, target: f64) -> Self {
        self.target = Some((mu.clone(), target));
        self
    }

    pub fn dim(&self) -> usize {
        self.lower.len()
    }

    pub fn lower(&self) -> &DVector<f64> {
        &self.lower
    }

    pub fn upper(&self) -> &DVector<f64> {
        &self.upper
    }

    fn check_budget(&self) -> Result<()> {
        let floor = self.lower.sum();
        if floor > 1.0 + RANGE_TOLERANCE {
            return Err(MacroError::InvalidConstraints(format!(
                "minimum weights sum to {floor:.4} > 1"
            )));
        }
        for group in &self.groups {
            let group_floor: f64 = group.members.iter().map(|&i| self.lower[i]).sum();
            if group_floor > group.cap + RANGE_TOLERANCE {
                return Err(MacroError::InvalidConstraints(format!(
                    "minimum weights in {} sum to {group_floor:.4}, above its cap {}",
                    group.name, group.cap
                )));
            }
        }
        let capacity = self.capacity();
        if capacity < 1.0 - RANGE_TOLERANCE {
            return Err(MacroError::InvalidConstraints(format!(
                "maximum attainable total weight is {capacity:.4} < 1"
            )));
        }
        Ok(())
    }

    /// Largest total weight the bounds and sector caps allow.
    pub fn capacity(&self) -> f64 {
        let mut grouped = vec![false; self.dim()];
        let mut capacity = 0.0;
        for group in &self.groups {
            let sum: f64 = group.members.iter().map(|&i| self.upper[i]).sum();
            capacity += sum.min(group.cap);
            for &i in &group.members {
                grouped[i] = true;
            }
        }
        capacity
            + (0..self.dim())
                .filter(|&i| !grouped[i])
                .map(|i| self.upper[i])
                .sum::<f64>()
    }

    /// Lowest and highest `mu^T w` over the set, ignoring any target.
    ///
    /// Greedy fill from the lower bounds: each asset belongs to at most one
    /// capped sector, so filling the best (or worst) returns first is optimal.
    pub fn return_range(&self, mu: &DVector<f64>) -> (f64, f64) {
        let mut order: Vec<usize> = (0..self.dim()).collect();
        order.sort_by(|&a, &b| mu[a].total_cmp(&mu[b]));
        let min = mu.dot(&self.greedy_fill(order.iter().copied()));
        let max = mu.dot(&self.greedy_fill(order.iter().rev().copied()));
        (min, max)
    }

    fn greedy_fill(&self, order: impl Iterator<Item = usize>) -> DVector<f64> {
        let mut w = self.lower.clone();
        let mut remaining = 1.0 - w.sum();
        let mut room: Vec<f64> = self
            .groups
            .iter()
            .map(|g| g.cap - g.members.iter().map(|&i| w[i]).sum::<f64>())
            .collect();
        let group_of = self.group_index();

        for i in order {
            if remaining <= 0.0 {
                break;
            }
            let mut add = (self.upper[i] - w[i]).min(remaining);
            if let Some(g) = group_of[i] {
                add = add.min(room[g].max(0.0));
                room[g] -= add;
            }
            w[i] += add;
            remaining -= add;
        }
        w
    }

    fn group_index(&self) -> Vec<Option<usize>> {
        let mut index = vec![None; self.dim()];
        for (g, group) in self.groups.iter().enumerate() {
            for &i in &group.members {
                index[i] = Some(g);
            }
        }
        index
    }

    /// Exact Euclidean projection onto `{lower <= w <= upper, sum w = 1}`.
    ///
    /// Solves `sum clamp(v - tau, lower, upper) = 1` for `tau` by bisection.
    pub fn project_box_simplex(&self, v: &DVector<f64>) -> DVector<f64> {
        let shifted = |tau: f64| {
            DVector::from_fn(v.len(), |i, _| (v[i] - tau).clamp(self.lower[i], self.upper[i]))
        };

        let mut lo = (v - &self.upper).min() - 1.0;
        let mut hi = (v - &self.lower).max() + 1.0;
        for _ in 0..BISECTION_ITERATIONS {
            let mid = 0.5 * (lo + hi);
            if shifted(mid).sum() > 1.0 {
                lo = mid;
            } else {
                hi = mid;
            }
            if hi - lo < f64::EPSILON * (1.0 + lo.abs().max(hi.abs())) {
                break;
            }
        }
        shifted(0.5 * (lo + hi))
    }

    /// Exact projection onto box ∩ budget ∩ `{mu^T w = target}`.
    ///
    /// The solution is `P(v - lambda * mu)` with `P` the box-simplex
    /// projection; `mu^T P(v - lambda * mu)` is non-increasing in `lambda`,
    /// so `lambda` is found by bisection after bracketing.
    fn project_on_target(&self, v: &DVector<f64>, mu: &DVector<f64>, target: f64) -> DVector<f64> {
        let at = |lambda: f64| self.project_box_simplex(&(v - mu * lambda));
        let achieved = |lambda: f64| mu.dot(&at(lambda));

        let mut lo = -1.0;
        let mut hi = 1.0;
        for _ in 0..BRACKET_DOUBLINGS {
            if achieved(lo) >= target {
                break;
            }
            lo *= 2.0;
        }
        for _ in 0..BRACKET_DOUBLINGS {
            if achieved(hi) <= target {
                break;
            }
            hi *= 2.0;
        }

        for _ in 0..BISECTION_ITERATIONS {
            let mid = 0.5 * (lo + hi);
            if achieved(mid) > target {
                lo = mid;
            } else {
                hi = mid;
            }
            if hi - lo < f64::EPSILON * (1.0 + lo.abs().max(hi.abs())) {
                break;
            }
        }
        at(0.5 * (lo + hi))
    }

    /// Projection onto bounds, budget and target return, all exact.
    fn project_linear(&self, v: &DVector<f64>) -> DVector<f64> {
        match &self.target {
            Some((mu, target)) => self.project_on_target(v, mu, *target),
            None => self.project_box_simplex(v),
        }
    }

    /// Projection onto the whole set.
    ///
    /// Without sector caps this is exact. With caps it runs Dykstra's method
    /// with the exact bounds/budget/target projection applied last, so those
    /// always hold exactly and the caps hold to the Dykstra tolerance.
    pub fn project(&self, v: &DVector<f64>) -> DVector<f64> {
        if self.groups.is_empty() {
            return self.project_linear(v);
        }

        let mut increments = vec![DVector::zeros(v.len()); self.groups.len() + 1];
        let mut x = v.clone();

        for _ in 0..DYKSTRA_MAX_ITERATIONS {
            let previous = x.clone();

            for (k, group) in self.groups.iter().enumerate() {
                let y = &x + &increments[k];
                let projected = project_sector_cap(&y, group);
                increments[k] = y - &projected;
                x = projected;
            }
            let last = self.groups.len();
            let y = &x + &increments[last];
            let projected = self.project_linear(&y);
            increments[last] = y - &projected;
            x = projected;

            if (&x - &previous).amax() < DYKSTRA_TOLERANCE {
                break;
            }
        }
        x
    }

    /// Largest violation of any constraint at `w`.
    pub fn violation(&self, w: &DVector<f64>) -> f64 {
        let mut worst = (w.sum() - 1.0).abs();
        for i in 0..self.dim() {
            worst = worst
                .max(self.lower[i] - w[i])
                .max(w[i] - self.upper[i]);
        }
        for group in &self.groups {
            let sum: f64 = group.members.iter().map(|&i| w[i]).sum();
            worst = worst.max(sum - group.cap);
        }
        if let Some((mu, target)) = &self.target {
            worst = worst.max((mu.dot(w) - target).abs());
        }
        worst.max(0.0)
    }
}

fn project_sector_cap(v: &DVector<f64>, group: &SectorGroup) -> DVector<f64> {
    let sum: f64 = group.members.iter().map(|&i| v[i]).sum();
    let mut out = v.clone();
    if sum > group.cap {
        let shift = (sum - group.cap) / group.members.len() as f64;
        for &i in &group.members {
            out[i] -= shift;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn tickers(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("T{i}")).collect()
    }

    #[test]
    fn test_box_simplex_projection_of_feasible_point_is_identity() {
        let set = FeasibleSet::new(&tickers(3), &OptimizationConstraints::long_only(1.0)).unwrap();
        let v = DVector::from_vec(vec![0.2, 0.3, 0.5]);
        let p = set.project_box_simplex(&v);
        assert!((p - v).amax() < 1e-12);
    }

    #[test]
    fn test_box_simplex_projection_respects_caps() {
        let set = FeasibleSet::new(&tickers(4), &OptimizationConstraints::long_only(0.3)).unwrap();
        let p = set.project_box_simplex(&DVector::from_vec(vec![5.0, -1.0, 0.0, 0.1]));
        assert!((p.sum() - 1.0).abs() < 1e-12);
        assert!(p.iter().all(|&w| (-1e-15..=0.3 + 1e-15).contains(&w)));
        assert!((p[0] - 0.3).abs() < 1e-12);
    }

    #[test]
    fn test_infeasible_budget() {
        let too_tight = FeasibleSet::new(&tickers(3), &OptimizationConstraints::long_only(0.3));
        assert!(matches!(too_tight, Err(MacroError::InvalidConstraints(_))));

        let floor = OptimizationConstraints {
            min_weight: 0.4,
            max_weight_per_asset: 0.5,
            ..Default::default()
        };
        assert!(matches!(
            FeasibleSet::new(&tickers(3), &floor),
            Err(MacroError::InvalidConstraints(_))
        ));
    }

    #[test]
    fn test_negative_min_weight_needs_short() {
        let constraints = OptimizationConstraints {
            min_weight: -0.1,
            ..OptimizationConstraints::long_only(1.0)
        };
        assert!(constraints.validate().is_err());
        let shorting = OptimizationConstraints {
            allow_short: true,
            ..constraints
        };
        assert!(shorting.validate().is_ok());
    }

    #[test]
    fn test_return_range_with_sector_cap() {
        let names = tickers(3);
        let constraints = OptimizationConstraints::long_only(1.0)
            .with_sector_cap("Tech", 0.4)
            .with_asset_sector("T0", "Tech")
            .with_asset_sector("T1", "Tech");
        let set = FeasibleSet::new(&names, &constraints).unwrap();
        let mu = DVector::from_vec(vec![0.30, 0.20, 0.05]);
        let (min, max) = set.return_range(&mu);
        assert!((max - (0.4 * 0.30 + 0.6 * 0.05)).abs() < 1e-12);
        assert!((min - 0.05).abs() < 1e-12);
    }

    #[test]
    fn test_sector_cap_infeasible_capacity() {
        let constraints = OptimizationConstraints::long_only(0.5)
            .with_sector_cap("Tech", 0.2)
            .with_asset_sector("T0", "Tech");
        // T0 limited to 0.2, T1 to 0.5
        assert!(matches!(
            FeasibleSet::new(&tickers(2), &constraints),
            Err(MacroError::InvalidConstraints(_))
        ));
    }

    #[test]
    fn test_dykstra_satisfies_all_sets() {
        let names = tickers(4);
        let constraints = OptimizationConstraints::long_only(0.6)
            .with_sector_cap("Banks", 0.3)
            .with_asset_sector("T0", "Banks")
            .with_asset_sector("T1", "Banks");
        let mu = DVector::from_vec(vec![0.10, 0.12, 0.08, 0.15]);
        let set = FeasibleSet::new(&names, &constraints)
            .unwrap()
            .with_target_return(&mu, 0.11);
        let p = set.project(&DVector::from_vec(vec![0.9, 0.9, 0.0, 0.0]));
        assert!(set.violation(&p) < 1e-8, "violation {}", set.violation(&p));
    }

    #[test]
    fn test_macro_bound_policy() {
        let policy = MacroBoundPolicy::default();
        assert!((policy.upper_bound(-1.0) - 0.20).abs() < 1e-12);
        assert!((policy.upper_bound(0.0) - 0.30).abs() < 1e-12);
        assert!((policy.upper_bound(1.0) - 0.35).abs() < 1e-12);

        let scores = BTreeMap::from([("A".to_string(), 1.0), ("B".to_string(), -1.0)]);
        let bounds = policy.bounds(&scores, 0.0);
        assert_eq!(bounds["A"], WeightBounds::new(0.0, 0.35));
        assert_eq!(bounds["B"], WeightBounds::new(0.0, 0.20));
    }

    #[test]
    fn test_asset_bounds_override_global() {
        let mut constraints = OptimizationConstraints::long_only(0.5);
        constraints
            .asset_bounds
            .insert("T0".into(), WeightBounds::new(0.1, 0.2));
        let set = FeasibleSet::new(&tickers(3), &constraints).unwrap();
        assert_eq!(set.lower()[0], 0.1);
        assert_eq!(set.upper()[0], 0.2);
        assert_eq!(set.upper()[1], 0.5);
    }

    proptest! {
        #[test]
        fn prop_projection_lands_in_box_simplex(
            values in proptest::collection::vec(-3.0f64..3.0, 2..10),
            cap in 0.5f64..1.0,
        ) {
            let names = tickers(values.len());
            let set = FeasibleSet::new(&names, &OptimizationConstraints::long_only(cap)).unwrap();
            let p = set.project(&DVector::from_vec(values));
            prop_assert!((p.sum() - 1.0).abs() < 1e-9);
            prop_assert!(p.iter().all(|&w| w >= -1e-12 && w <= cap + 1e-12));
        }
    }
}
