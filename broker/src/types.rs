//! Shared broker types: account snapshots and native order reports.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use spotsync::{Order, OrderCondition, OrderId, Position, Price, Quantity, Side, Symbol};

/// Positions and working orders captured in one broker query.
///
/// Replaced wholesale on every refresh; never patched in place.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountState {
    #[serde(default)]
    pub positions: Vec<Position>,
    #[serde(default)]
    pub open_orders: Vec<Order>,
}

impl AccountState {
    /// Signed holding in `symbol`, zero if absent.
    pub fn position(&self, symbol: &Symbol) -> i64 {
        self.positions
            .iter()
            .filter(|p| p.symbol == *symbol)
            .map(|p| p.quantity)
            .sum()
    }

    /// Live orders for `symbol`, in broker order.
    pub fn orders_for<'a>(&'a self, symbol: &'a Symbol) -> impl Iterator<Item = &'a Order> + 'a {
        self.open_orders
            .iter()
            .filter(move |o| o.symbol == *symbol && o.is_live())
    }

    /// Net signed remaining quantity of live orders for `symbol`.
    pub fn net_open(&self, symbol: &Symbol) -> i64 {
        self.orders_for(symbol).map(Order::signed_remaining).sum()
    }

    /// Every symbol with a non-flat position or a live order, sorted and unique.
    pub fn symbols(&self) -> Vec<Symbol> {
        let mut symbols: Vec<Symbol> = self
            .positions
            .iter()
            .filter(|p| !p.is_flat())
            .map(|p| p.symbol)
            .chain(self.open_orders.iter().filter(|o| o.is_live()).map(|o| o.symbol))
            .collect();
        symbols.sort();
        symbols.dedup();
        symbols
    }
}

/// Unit a broker reports quantities in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuantityUnit {
    #[default]
    Shares,
    /// Whole board lots
    Lots,
}

/// A broker order report with fields already extracted from the vendor
/// payload but status and units still in the broker's vocabulary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NativeOrder {
    pub id: Option<OrderId>,
    pub symbol: Symbol,
    pub side: Side,
    #[serde(default)]
    pub condition: OrderCondition,
    pub price: Option<Price>,
    /// Status string exactly as the broker sent it
    pub status: String,
    pub quantity: Quantity,
    pub filled: Quantity,
    #[serde(default)]
    pub unit: QuantityUnit,
    #[serde(default)]
    pub odd_lot: bool,
    /// Placement time, when the broker reports one
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    pub reported_at: DateTime<Utc>,
}
