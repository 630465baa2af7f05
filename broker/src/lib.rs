//! Broker adapter trait, error taxonomy and order-state tracking for spotsync.
//!
//! Every brokerage integration implements [`Broker`] and translates its
//! native payloads into the canonical `spotsync` model before returning.
//! Nothing vendor-specific crosses this boundary.
//!
//! - [`mock`]: in-memory broker with scripted fills and failures
//! - [`tracker`]: native status/unit normalization and monotonic order state

pub mod error;
pub mod mock;
pub mod tracker;
pub mod types;

pub use error::{BrokerError, TrackerError};
pub use tracker::{Ingested, OrderTracker, StatusTable, normalize};
pub use types::*;

use spotsync::{Order, OrderId, OrderRequest, Price, Quantity, Stock, Symbol};

/// A broker session that can report account state, quote symbols and manage orders.
///
/// Methods take `&self`; adapters hold their session behind interior
/// mutability. Implementations retry nothing themselves: transient failures
/// surface as [`BrokerError::Connection`] and the caller decides.
pub trait Broker {
    /// Current positions and open orders, fetched in one go.
    fn account_state(&self) -> Result<AccountState, BrokerError>;

    /// Top-of-book snapshot for a symbol.
    fn quote(&self, symbol: &Symbol) -> Result<Stock, BrokerError>;

    /// Submit a new order. Returns the order as the broker accepted it.
    fn place_order(&self, order: &OrderRequest) -> Result<Order, BrokerError>;

    /// Amend a working order's price and/or quantity.
    ///
    /// `quantity` is the new *remaining* quantity, excluding shares already filled.
    fn update_order(
        &self,
        id: &OrderId,
        price: Option<Price>,
        quantity: Option<Quantity>,
    ) -> Result<Order, BrokerError>;

    /// Cancel a working order.
    fn cancel_order(&self, id: &OrderId) -> Result<(), BrokerError>;
}

impl<B: Broker + ?Sized> Broker for &B {
    fn account_state(&self) -> Result<AccountState, BrokerError> {
        (**self).account_state()
    }

    fn quote(&self, symbol: &Symbol) -> Result<Stock, BrokerError> {
        (**self).quote(symbol)
    }

    fn place_order(&self, order: &OrderRequest) -> Result<Order, BrokerError> {
        (**self).place_order(order)
    }

    fn update_order(
        &self,
        id: &OrderId,
        price: Option<Price>,
        quantity: Option<Quantity>,
    ) -> Result<Order, BrokerError> {
        (**self).update_order(id, price, quantity)
    }

    fn cancel_order(&self, id: &OrderId) -> Result<(), BrokerError> {
        (**self).cancel_order(id)
    }
}
