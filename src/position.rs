//! Broker-reported holdings.

use crate::{Price, Symbol};

/// Holding in one symbol. Positive quantity is long, negative is short.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Position {
    pub symbol: Symbol,
    pub quantity: i64,
    #[cfg_attr(feature = "serde", serde(default))]
    pub avg_cost: Price,
}

impl Position {
    pub fn new(symbol: Symbol, quantity: i64, avg_cost: Price) -> Self {
        Self {
            symbol,
            quantity,
            avg_cost,
        }
    }

    #[inline]
    pub fn is_long(&self) -> bool {
        self.quantity > 0
    }

    #[inline]
    pub fn is_short(&self) -> bool {
        self.quantity < 0
    }

    #[inline]
    pub fn is_flat(&self) -> bool {
        self.quantity == 0
    }

    /// Position value at average cost, in cents.
    pub fn cost_basis_cents(&self) -> i64 {
        self.quantity * self.avg_cost.0
    }
}
