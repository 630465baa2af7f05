//! Target portfolio: the in-memory allocation the planner consumes, and the
//! target.json file format it is loaded from.
//!
//! A target file lists either share counts or portfolio weights per symbol.
//! Weights are turned into share counts against a fund size and reference
//! prices by [`greedy_allocation`].

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use chrono::{DateTime, Utc};
use log::debug;
use serde::Deserialize;
use spotsync::{Price, Symbol};

use crate::config::ExecutionConfig;
use crate::error::{Error, Result};

/// Desired signed share count per symbol. Symbols not listed are targeted at zero.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetAllocation {
    shares: BTreeMap<Symbol, i64>,
}

impl TargetAllocation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, symbol: Symbol, shares: i64) -> Self {
        self.shares.insert(symbol, shares);
        self
    }

    pub fn set(&mut self, symbol: Symbol, shares: i64) {
        self.shares.insert(symbol, shares);
    }

    /// Desired shares, zero if the symbol is not targeted.
    pub fn get(&self, symbol: &Symbol) -> i64 {
        self.shares.get(symbol).copied().unwrap_or(0)
    }

    pub fn contains(&self, symbol: &Symbol) -> bool {
        self.shares.contains_key(symbol)
    }

    pub fn symbols(&self) -> impl Iterator<Item = Symbol> + '_ {
        self.shares.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Symbol, i64)> + '_ {
        self.shares.iter().map(|(s, q)| (*s, *q))
    }

    pub fn len(&self) -> usize {
        self.shares.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shares.is_empty()
    }
}

impl FromIterator<(Symbol, i64)> for TargetAllocation {
    fn from_iter<I: IntoIterator<Item = (Symbol, i64)>>(iter: I) -> Self {
        Self {
            shares: iter.into_iter().collect(),
        }
    }
}

/// A target portfolio specification (target.json).
#[derive(Debug, Clone, Deserialize)]
pub struct TargetSpec {
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    /// Capital to allocate across weighted entries, in currency units.
    #[serde(default)]
    pub fund: Option<f64>,
    pub targets: Vec<TargetEntry>,
}

/// A single target: symbol plus exactly one of `shares` or `weight`.
#[derive(Debug, Clone, Deserialize)]
pub struct TargetEntry {
    pub symbol: Symbol,
    #[serde(default)]
    pub shares: Option<i64>,
    #[serde(default)]
    pub weight: Option<f64>,
}

impl TargetSpec {
    /// Load and validate a target.json file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| Error::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_json(&contents)
    }

    /// Parse from a JSON string (useful for testing).
    pub fn from_json(json: &str) -> Result<Self> {
        let spec: TargetSpec = serde_json::from_str(json)?;
        spec.validate()?;
        Ok(spec)
    }

    fn validate(&self) -> Result<()> {
        if self.targets.is_empty() {
            return Err(Error::Target("targets list is empty".into()));
        }

        let mut seen = BTreeSet::new();
        for t in &self.targets {
            if !seen.insert(t.symbol) {
                return Err(Error::Target(format!("duplicate symbol: {}", t.symbol)));
            }
            match (t.shares, t.weight) {
                (Some(_), Some(_)) => {
                    return Err(Error::Target(format!(
                        "{}: give either shares or weight, not both",
                        t.symbol
                    )));
                }
                (None, None) => {
                    return Err(Error::Target(format!(
                        "{}: missing shares or weight",
                        t.symbol
                    )));
                }
                (None, Some(w)) if !w.is_finite() || w.abs() > 1.0 => {
                    return Err(Error::Target(format!(
                        "weight for {} ({w}) has magnitude > 1.0",
                        t.symbol
                    )));
                }
                _ => {}
            }
        }

        let long_sum: f64 = self.weights().filter(|(_, w)| *w > 0.0).map(|(_, w)| w).sum();
        if long_sum > 1.0 + 1e-9 {
            return Err(Error::Target(format!(
                "long weights sum to {long_sum:.4} (> 1.0)"
            )));
        }

        if self.has_weights() && !matches!(self.fund, Some(f) if f.is_finite() && f > 0.0) {
            return Err(Error::Target(
                "weighted targets need a positive fund".into(),
            ));
        }
        Ok(())
    }

    pub fn symbols(&self) -> Vec<Symbol> {
        self.targets.iter().map(|t| t.symbol).collect()
    }

    pub fn has_weights(&self) -> bool {
        self.targets.iter().any(|t| t.weight.is_some())
    }

    fn weights(&self) -> impl Iterator<Item = (Symbol, f64)> + '_ {
        self.targets
            .iter()
            .filter_map(|t| t.weight.map(|w| (t.symbol, w)))
    }

    /// Resolve to share counts.
    ///
    /// Share entries are taken as-is. Weighted entries are allocated in whole
    /// lots (single shares when odd lots are allowed) using `prices`, which
    /// must cover every weighted symbol.
    pub fn resolve(
        &self,
        prices: &BTreeMap<Symbol, Price>,
        config: &ExecutionConfig,
    ) -> Result<TargetAllocation> {
        let mut allocation: TargetAllocation = self
            .targets
            .iter()
            .filter_map(|t| t.shares.map(|q| (t.symbol, q)))
            .collect();

        if !self.has_weights() {
            return Ok(allocation);
        }

        let fund_cents = (self.fund.unwrap_or(0.0) * 100.0).round() as i64;
        let mut unit_cost = BTreeMap::new();
        for (symbol, _) in self.weights() {
            let price = prices
                .get(&symbol)
                .ok_or_else(|| Error::Target(format!("no reference price for {symbol}")))?;
            let unit = unit_shares(&symbol, config);
            unit_cost.insert(symbol, price.0 * unit as i64);
        }

        let weights: Vec<(Symbol, f64)> = self.weights().collect();
        for (symbol, units) in allocate_long_short(&weights, &unit_cost, fund_cents) {
            let shares = units * unit_shares(&symbol, config) as i64;
            debug!("{symbol}: {units} units -> {shares} shares");
            allocation.set(symbol, shares);
        }
        Ok(allocation)
    }
}

/// Shares per allocation unit: one share with odd lots, else one board lot.
fn unit_shares(symbol: &Symbol, config: &ExecutionConfig) -> u64 {
    if config.allow_odd_lot {
        1
    } else {
        config.lot_for(symbol).shares()
    }
}

/// Allocate longs against the full fund and shorts against `fund * sum(|short weights|)`,
/// each side normalized to sum to one. Returns signed unit counts.
fn allocate_long_short(
    weights: &[(Symbol, f64)],
    unit_cost: &BTreeMap<Symbol, i64>,
    fund_cents: i64,
) -> BTreeMap<Symbol, i64> {
    let shorts: Vec<(Symbol, f64)> = weights
        .iter()
        .filter(|(_, w)| *w < 0.0)
        .map(|(s, w)| (*s, -w))
        .collect();

    if shorts.is_empty() {
        let (alloc, _) = greedy_allocation(weights, unit_cost, fund_cents);
        return alloc.into_iter().map(|(s, u)| (s, u as i64)).collect();
    }

    let longs: Vec<(Symbol, f64)> = weights.iter().filter(|(_, w)| *w >= 0.0).copied().collect();
    let short_ratio: f64 = shorts.iter().map(|(_, w)| w).sum();
    let short_fund = (fund_cents as f64 * short_ratio) as i64;

    let mut out: BTreeMap<Symbol, i64> = BTreeMap::new();
    let (long_alloc, _) = greedy_allocation(&normalized(&longs), unit_cost, fund_cents);
    out.extend(long_alloc.into_iter().map(|(s, u)| (s, u as i64)));
    let (short_alloc, _) = greedy_allocation(&normalized(&shorts), unit_cost, short_fund);
    out.extend(short_alloc.into_iter().map(|(s, u)| (s, -(u as i64))));
    out
}

fn normalized(weights: &[(Symbol, f64)]) -> Vec<(Symbol, f64)> {
    let total: f64 = weights.iter().map(|(_, w)| w).sum();
    if total <= 0.0 {
        return weights.to_vec();
    }
    weights.iter().map(|(s, w)| (*s, w / total)).collect()
}

/// Greedy discrete allocation of non-negative `weights` into whole units.
///
/// First buys `floor(weight * budget / cost)` units of each name, then
/// spends what is left one unit at a time on the affordable name furthest
/// below its weight. Returns units per symbol and the unspent budget.
pub fn greedy_allocation(
    weights: &[(Symbol, f64)],
    unit_cost: &BTreeMap<Symbol, i64>,
    budget_cents: i64,
) -> (BTreeMap<Symbol, u64>, i64) {
    let mut names: Vec<(Symbol, f64, i64)> = weights
        .iter()
        .filter_map(|(s, w)| unit_cost.get(s).map(|c| (*s, *w, *c)))
        .filter(|(_, _, c)| *c > 0)
        .collect();
    // Heaviest first; ties by symbol for determinism.
    names.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));

    let mut units = vec![0u64; names.len()];
    let mut available = budget_cents;

    for (i, (_, weight, cost)) in names.iter().enumerate() {
        let n = (weight.max(0.0) * budget_cents as f64 / *cost as f64).floor() as i64;
        let n = n.clamp(0, available / cost);
        units[i] = n as u64;
        available -= n * cost;
    }

    loop {
        let held: f64 = names
            .iter()
            .zip(&units)
            .map(|((_, _, c), u)| (*c as f64) * (*u as f64))
            .sum();
        let pick = names
            .iter()
            .enumerate()
            .filter(|(_, (_, _, c))| *c <= available)
            .map(|(i, (_, w, c))| {
                let current = if held > 0.0 {
                    (*c as f64) * (units[i] as f64) / held
                } else {
                    0.0
                };
                (i, w - current)
            })
            .filter(|(_, deficit)| *deficit > 0.0)
            .max_by(|a, b| a.1.total_cmp(&b.1).then(b.0.cmp(&a.0)));
        let Some((i, _)) = pick else {
            break;
        };
        units[i] += 1;
        available -= names[i].2;
    }

    let allocation = names
        .iter()
        .zip(units)
        .map(|((s, _, _), u)| (*s, u))
        .collect();
    (allocation, available)
}
