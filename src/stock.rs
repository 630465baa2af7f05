//! Top-of-book quote snapshots.

use crate::{Price, Quantity, Side, Symbol};

/// One side of the top of book.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Level {
    pub price: Price,
    pub volume: Quantity,
}

/// Immutable quote snapshot for a symbol, refreshed on demand.
///
/// Missing sides are `None` (e.g. limit-locked markets with no bids).
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Stock {
    pub symbol: Symbol,
    #[cfg_attr(feature = "serde", serde(default))]
    pub last: Option<Price>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub bid: Option<Level>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub ask: Option<Level>,
    /// Daily price band: highest allowed price
    #[cfg_attr(feature = "serde", serde(default))]
    pub limit_up: Option<Price>,
    /// Daily price band: lowest allowed price
    #[cfg_attr(feature = "serde", serde(default))]
    pub limit_down: Option<Price>,
}

impl Stock {
    pub fn new(symbol: Symbol) -> Self {
        Self {
            symbol,
            last: None,
            bid: None,
            ask: None,
            limit_up: None,
            limit_down: None,
        }
    }

    pub fn with_last(mut self, price: Price) -> Self {
        self.last = Some(price);
        self
    }

    pub fn with_bid(mut self, price: Price, volume: Quantity) -> Self {
        self.bid = Some(Level { price, volume });
        self
    }

    pub fn with_ask(mut self, price: Price, volume: Quantity) -> Self {
        self.ask = Some(Level { price, volume });
        self
    }

    pub fn with_limits(mut self, limit_up: Price, limit_down: Price) -> Self {
        self.limit_up = Some(limit_up);
        self.limit_down = Some(limit_down);
        self
    }

    /// Clamp `price` into the daily band. Missing bounds do not constrain.
    pub fn clamp_to_band(&self, price: Price) -> Price {
        let price = match self.limit_down {
            Some(down) => price.max(down),
            None => price,
        };
        match self.limit_up {
            Some(up) => price.min(up),
            None => price,
        }
    }

    pub fn bid_price(&self) -> Option<Price> {
        self.bid.map(|l| l.price)
    }

    pub fn ask_price(&self) -> Option<Price> {
        self.ask.map(|l| l.price)
    }

    /// The price a passive order on `side` would rest at: bid for buys, ask for sells.
    pub fn near_price(&self, side: Side) -> Option<Price> {
        match side {
            Side::Buy => self.bid_price(),
            Side::Sell => self.ask_price(),
        }
    }

    /// Bid/ask midpoint when both sides are quoted.
    pub fn mid(&self) -> Option<Price> {
        match (self.bid_price(), self.ask_price()) {
            (Some(b), Some(a)) => Some(Price((b.0 + a.0) / 2)),
            _ => None,
        }
    }

    /// Best available reference: last trade, else midpoint, else whichever side exists.
    pub fn reference_price(&self) -> Option<Price> {
        self.last
            .or_else(|| self.mid())
            .or_else(|| self.bid_price())
            .or_else(|| self.ask_price())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quote() -> Stock {
        Stock::new(Symbol::new("2330"))
            .with_bid(Price(599_00), 120)
            .with_ask(Price(600_00), 80)
    }

    #[test]
    fn near_price_by_side() {
        let q = quote();
        assert_eq!(q.near_price(Side::Buy), Some(Price(599_00)));
        assert_eq!(q.near_price(Side::Sell), Some(Price(600_00)));
    }

    #[test]
    fn reference_prefers_last() {
        let q = quote().with_last(Price(599_50));
        assert_eq!(q.reference_price(), Some(Price(599_50)));
        assert_eq!(quote().reference_price(), Some(Price(599_50)));
    }

    #[test]
    fn band_clamps_both_ways() {
        let q = quote().with_limits(Price(650_00), Price(540_00));
        assert_eq!(q.clamp_to_band(Price(700_00)), Price(650_00));
        assert_eq!(q.clamp_to_band(Price(500_00)), Price(540_00));
        assert_eq!(q.clamp_to_band(Price(600_00)), Price(600_00));
        assert_eq!(quote().clamp_to_band(Price(700_00)), Price(700_00));
    }

    #[test]
    fn empty_quote_has_no_reference() {
        assert_eq!(Stock::new(Symbol::new("2330")).reference_price(), None);
    }
}
