//! Board-lot arithmetic.
//!
//! Brokers quote some quantities in lots (e.g. 1 lot = 1000 shares) and
//! others in shares. Conversions here are exact: `to_lots` refuses share
//! counts that are not a whole number of lots, and `split` separates the
//! board-lot part from the odd-lot remainder so nothing is dropped.

use std::collections::BTreeMap;
use std::fmt;

use crate::{LotError, Quantity, Symbol};

/// Number of shares in one board lot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "u64", into = "u64"))]
pub struct LotSize(Quantity);

impl LotSize {
    /// One share per lot; every quantity is a whole number of lots.
    pub const SINGLE: LotSize = LotSize(1);

    /// The 1000-share board lot of the Taiwan exchanges.
    pub const BOARD: LotSize = LotSize(1000);

    pub fn new(shares: Quantity) -> Result<Self, LotError> {
        if shares == 0 {
            return Err(LotError::ZeroLotSize);
        }
        Ok(LotSize(shares))
    }

    #[inline]
    pub fn shares(self) -> Quantity {
        self.0
    }

    /// `lots * lot_size`, checked.
    pub fn to_shares(self, lots: Quantity) -> Result<Quantity, LotError> {
        lots.checked_mul(self.0).ok_or(LotError::Overflow {
            lots,
            lot_size: self.0,
        })
    }

    /// Exact conversion; fails if `shares` leaves an odd-lot remainder.
    pub fn to_lots(self, shares: Quantity) -> Result<Quantity, LotError> {
        let remainder = shares % self.0;
        if remainder != 0 {
            return Err(LotError::Fractional {
                shares,
                lot_size: self.0,
                remainder,
            });
        }
        Ok(shares / self.0)
    }

    /// Whole lots contained in `shares`, rounding down. For display.
    #[inline]
    pub fn floor_lots(self, shares: Quantity) -> Quantity {
        shares / self.0
    }

    /// Split into `(board_shares, odd_shares)` with `board_shares` a multiple
    /// of the lot size and `odd_shares < lot_size`. The parts always sum to `shares`.
    #[inline]
    pub fn split(self, shares: Quantity) -> (Quantity, Quantity) {
        let odd = shares % self.0;
        (shares - odd, odd)
    }

    /// Round `shares` down to a whole number of lots.
    #[inline]
    pub fn truncate(self, shares: Quantity) -> Quantity {
        self.split(shares).0
    }

    #[inline]
    pub fn is_whole(self, shares: Quantity) -> bool {
        shares % self.0 == 0
    }
}

impl Default for LotSize {
    fn default() -> Self {
        LotSize::SINGLE
    }
}

impl TryFrom<u64> for LotSize {
    type Error = LotError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        LotSize::new(value)
    }
}

impl From<LotSize> for u64 {
    fn from(value: LotSize) -> Self {
        value.0
    }
}

impl fmt::Display for LotSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} shares/lot", self.0)
    }
}

/// Lot size per symbol: one market-wide default plus per-symbol exceptions.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LotSizes {
    pub default: LotSize,
    #[cfg_attr(feature = "serde", serde(default))]
    pub overrides: BTreeMap<Symbol, LotSize>,
}

impl LotSizes {
    pub fn uniform(lot: LotSize) -> Self {
        Self {
            default: lot,
            overrides: BTreeMap::new(),
        }
    }

    pub fn with_override(mut self, symbol: Symbol, lot: LotSize) -> Self {
        self.overrides.insert(symbol, lot);
        self
    }

    pub fn for_symbol(&self, symbol: &Symbol) -> LotSize {
        self.overrides.get(symbol).copied().unwrap_or(self.default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn board() -> LotSize {
        LotSize::BOARD
    }

    #[test]
    fn zero_lot_size_rejected() {
        assert_eq!(LotSize::new(0), Err(LotError::ZeroLotSize));
    }

    #[test]
    fn exact_conversion() {
        assert_eq!(board().to_shares(3).unwrap(), 3000);
        assert_eq!(board().to_lots(3000).unwrap(), 3);
    }

    #[test]
    fn fractional_rejected() {
        assert_eq!(
            board().to_lots(1500),
            Err(LotError::Fractional {
                shares: 1500,
                lot_size: 1000,
                remainder: 500
            })
        );
    }

    #[test]
    fn split_keeps_remainder() {
        assert_eq!(board().split(2345), (2000, 345));
        assert_eq!(board().split(999), (0, 999));
        assert_eq!(LotSize::SINGLE.split(2345), (2345, 0));
    }

    #[test]
    fn overflow_detected() {
        assert!(board().to_shares(u64::MAX).is_err());
    }

    #[test]
    fn floor_lots_for_display() {
        assert_eq!(board().floor_lots(2999), 2);
    }

    #[test]
    fn per_symbol_override() {
        let lots = LotSizes::uniform(board()).with_override(Symbol::new("00878"), LotSize::SINGLE);
        assert_eq!(lots.for_symbol(&Symbol::new("2330")), board());
        assert_eq!(lots.for_symbol(&Symbol::new("00878")), LotSize::SINGLE);
    }
}
