//! Reconciliation view: where each symbol stands against its target.

use std::collections::BTreeMap;

use serde::Serialize;
use spotsync::{Price, Stock, Symbol};
use spotsync_broker::AccountState;

use crate::config::ExecutionConfig;
use crate::plan;
use crate::target::TargetAllocation;

/// Reconciliation report, largest outstanding order value first.
#[derive(Debug, Clone, Serialize)]
pub struct ReconcileReport {
    pub entries: Vec<ReconcileEntry>,
}

/// One symbol's reconciliation entry. Quantities are signed shares.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileEntry {
    pub symbol: Symbol,
    pub target: i64,
    pub current: i64,
    /// Net remaining quantity on live orders.
    pub open: i64,
    /// `target - current - open`: what no order covers yet.
    pub required: i64,
    /// Whole lots in `required`, sign preserved.
    pub required_lots: i64,
    pub lot_size: u64,
    pub price: Option<Price>,
    /// `|required| * price`, in cents. Zero when unpriced.
    pub order_value_cents: i64,
}

impl ReconcileEntry {
    pub fn is_settled(&self) -> bool {
        self.required == 0
    }
}

impl ReconcileReport {
    /// Symbols with an uncovered gap.
    pub fn unsettled(&self) -> impl Iterator<Item = &ReconcileEntry> {
        self.entries.iter().filter(|e| !e.is_settled())
    }

    pub fn is_settled(&self) -> bool {
        self.entries.iter().all(ReconcileEntry::is_settled)
    }
}

/// Compare current holdings and live orders against `target`.
///
/// Every symbol in the target, the positions or the open orders gets an
/// entry. Prices come from each quote's reference price.
pub fn reconcile(
    state: &AccountState,
    target: &TargetAllocation,
    quotes: &BTreeMap<Symbol, Stock>,
    config: &ExecutionConfig,
) -> ReconcileReport {
    let mut entries: Vec<ReconcileEntry> = plan::universe(state, target)
        .into_iter()
        .map(|symbol| {
            let desired = target.get(&symbol);
            let current = state.position(&symbol);
            let open = state.net_open(&symbol);
            let required = desired - current - open;
            let lot = config.lot_for(&symbol);
            let lots = lot.floor_lots(required.unsigned_abs()) as i64;
            let price = quotes.get(&symbol).and_then(Stock::reference_price);
            ReconcileEntry {
                symbol,
                target: desired,
                current,
                open,
                required,
                required_lots: required.signum() * lots,
                lot_size: lot.shares(),
                price,
                order_value_cents: price
                    .map(|p| p.0.saturating_mul(required.abs()))
                    .unwrap_or(0),
            }
        })
        .collect();

    entries.sort_by(|a, b| {
        b.order_value_cents
            .cmp(&a.order_value_cents)
            .then_with(|| a.symbol.cmp(&b.symbol))
    });

    ReconcileReport { entries }
}

impl std::fmt::Display for ReconcileReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "RECONCILIATION:")?;
        writeln!(
            f,
            "  {:8} {:>10} {:>10} {:>10} {:>10} {:>6} {:>14}",
            "Symbol", "Target", "Current", "Open", "Required", "Lots", "Value"
        )?;
        for e in &self.entries {
            let value = match e.price {
                Some(_) => format!("{}", Price(e.order_value_cents)),
                None => "-".to_string(),
            };
            writeln!(
                f,
                "  {:8} {:>10} {:>10} {:>+10} {:>+10} {:>+6} {:>14}",
                e.symbol, e.target, e.current, e.open, e.required, e.required_lots, value,
            )?;
        }
        let unsettled = self.unsettled().count();
        if unsettled == 0 {
            writeln!(f, "\n  All symbols at target.")?;
        } else {
            writeln!(f, "\n  {unsettled} symbol(s) away from target.")?;
        }
        Ok(())
    }
}
