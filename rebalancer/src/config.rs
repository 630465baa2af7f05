//! TOML configuration loading and validation.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use spotsync::{LotSize, LotSizes, Side, Symbol};

use crate::error::{Error, Result};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub account: AccountConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountConfig {
    #[serde(default = "default_account_id")]
    pub id: String,
}

fn default_account_id() -> String {
    "default".into()
}

impl Default for AccountConfig {
    fn default() -> Self {
        Self {
            id: default_account_id(),
        }
    }
}

/// Where limit prices come from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PricingMode {
    /// No limit price
    Market,
    /// Best bid
    LimitBid,
    /// Best ask
    LimitAsk,
    /// Last trade, else the near side (bid for buys, ask for sells)
    #[default]
    LimitLast,
    /// Passive edge of the daily band: buys at limit-down, sells at limit-up
    PriceLimit,
}

/// Execution style for planning and submitting orders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionConfig {
    #[serde(default)]
    pub pricing_mode: PricingMode,
    /// Route sub-lot remainders as separate odd-lot orders.
    #[serde(default)]
    pub allow_odd_lot: bool,
    #[serde(default)]
    pub day_trade_enabled: bool,
    /// Max distance, in currency units, between a working order's price and
    /// the target price before the order is repriced. Inclusive.
    #[serde(default = "default_tolerance")]
    pub price_update_tolerance: f64,
    #[serde(default = "default_lot_size")]
    pub lot_size: LotSize,
    #[serde(default)]
    pub lot_overrides: BTreeMap<Symbol, LotSize>,
    /// Chase the price by this fraction (buys up, sells down), snapped to the tick ladder.
    #[serde(default)]
    pub extra_bid_pct: f64,
    #[serde(default)]
    pub margin_trading: bool,
    /// Only act on symbols that need buying.
    #[serde(default)]
    pub buy_only: bool,
    /// Only act on symbols that need selling.
    #[serde(default)]
    pub sell_only: bool,
    /// Fraction of each symbol's gap to trade this run, in `[0, 1]`.
    /// Below 1 the step is rounded to whole lots (whole shares with odd lots).
    #[serde(default = "default_progress")]
    pub progress: f64,
}

fn default_tolerance() -> f64 {
    0.0
}
fn default_lot_size() -> LotSize {
    LotSize::BOARD
}
fn default_progress() -> f64 {
    1.0
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            pricing_mode: PricingMode::default(),
            allow_odd_lot: false,
            day_trade_enabled: false,
            price_update_tolerance: default_tolerance(),
            lot_size: default_lot_size(),
            lot_overrides: BTreeMap::new(),
            extra_bid_pct: 0.0,
            margin_trading: false,
            buy_only: false,
            sell_only: false,
            progress: default_progress(),
        }
    }
}

impl ExecutionConfig {
    pub fn lot_for(&self, symbol: &Symbol) -> LotSize {
        self.lot_overrides
            .get(symbol)
            .copied()
            .unwrap_or(self.lot_size)
    }

    pub fn lot_sizes(&self) -> LotSizes {
        LotSizes {
            default: self.lot_size,
            overrides: self.lot_overrides.clone(),
        }
    }

    /// Whether orders on `side` may be planned at all.
    pub fn allows(&self, side: Side) -> bool {
        match side {
            Side::Buy => !self.sell_only,
            Side::Sell => !self.buy_only,
        }
    }

    /// Tolerance in cents. Half a cent and below rounds to zero.
    pub fn tolerance_cents(&self) -> i64 {
        (self.price_update_tolerance * 100.0).round() as i64
    }

    pub fn validate(&self) -> Result<()> {
        if !self.price_update_tolerance.is_finite() || self.price_update_tolerance < 0.0 {
            return Err(Error::Config(
                "price_update_tolerance must be a finite number >= 0".into(),
            ));
        }
        if !(-0.1..=0.1).contains(&self.extra_bid_pct) {
            return Err(Error::Config(
                "extra_bid_pct must be in [-0.1, 0.1]".into(),
            ));
        }
        if self.extra_bid_pct != 0.0 && self.pricing_mode == PricingMode::Market {
            return Err(Error::Config(
                "extra_bid_pct has no effect with market pricing".into(),
            ));
        }
        if self.extra_bid_pct != 0.0 && self.pricing_mode == PricingMode::PriceLimit {
            return Err(Error::Config(
                "extra_bid_pct cannot be combined with price_limit pricing".into(),
            ));
        }
        if self.buy_only && self.sell_only {
            return Err(Error::Config(
                "buy_only and sell_only cannot both be set".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.progress) {
            return Err(Error::Config("progress must be in [0, 1]".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Attempts after the first, for connection errors only.
    #[serde(default = "default_retry_bound")]
    pub retry_bound: u32,
    #[serde(default = "default_backoff_base")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_max")]
    pub backoff_max_ms: u64,
}

fn default_retry_bound() -> u32 {
    3
}
fn default_backoff_base() -> u64 {
    200
}
fn default_backoff_max() -> u64 {
    5000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            retry_bound: default_retry_bound(),
            backoff_base_ms: default_backoff_base(),
            backoff_max_ms: default_backoff_max(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_dir")]
    pub dir: String,
    #[serde(default = "default_audit_file")]
    pub audit_file: String,
}

fn default_log_dir() -> String {
    "./logs".into()
}
fn default_audit_file() -> String {
    "audit.jsonl".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: default_log_dir(),
            audit_file: default_audit_file(),
        }
    }
}

impl Config {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| Error::ConfigRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate config invariants.
    fn validate(&self) -> Result<()> {
        if self.account.id.is_empty() {
            return Err(Error::Config("account id must not be empty".into()));
        }
        self.execution.validate()?;
        if self.retry.backoff_base_ms > self.retry.backoff_max_ms {
            return Err(Error::Config(
                "backoff_base_ms must be <= backoff_max_ms".into(),
            ));
        }
        Ok(())
    }

    /// Full path to the audit log file.
    pub fn audit_path(&self) -> PathBuf {
        Path::new(&self.logging.dir).join(&self.logging.audit_file)
    }
}
