// Allow our units.cents digit grouping convention (e.g., 100_00 = 100.00)
#![allow(clippy::inconsistent_digit_grouping)]

//! # spotsync
//!
//! Canonical, broker-independent model for spot equity execution.
//!
//! Every broker adapter translates its native payloads into these types, and
//! the rebalancing engine only ever sees these types:
//!
//! - [`Stock`]: top-of-book quote snapshot (last, bid, ask)
//! - [`Position`]: signed holding per symbol
//! - [`Order`] / [`OrderRequest`]: broker orders and order specs
//! - [`OrderStatus`]: monotonic lifecycle (`NEW → PENDING → PARTIALLY_FILLED → terminal`)
//! - [`LotSize`]: exact board-lot / odd-lot conversions
//!
//! ## Price Representation
//!
//! Prices are stored as [`i64`] cents:
//!
//! ```
//! use spotsync::Price;
//!
//! let price = Price(10_05);
//! assert_eq!(format!("{}", price), "10.05");
//! ```
//!
//! ## Lots
//!
//! ```
//! use spotsync::LotSize;
//!
//! let lot = LotSize::new(1000).unwrap();
//! assert_eq!(lot.to_shares(3).unwrap(), 3000);
//! assert_eq!(lot.split(2345), (2000, 345));
//! assert!(lot.to_lots(2345).is_err());
//! ```
//!
//! ## Order lifecycle
//!
//! ```
//! use spotsync::OrderStatus;
//!
//! assert!(OrderStatus::Pending.can_transition_to(OrderStatus::PartiallyFilled));
//! assert!(!OrderStatus::Filled.can_transition_to(OrderStatus::Pending));
//! ```

mod error;
pub mod lot;
mod order;
mod position;
mod side;
mod stock;
pub mod tick;
mod types;

pub use error::{LotError, ValidationError};
pub use lot::{LotSize, LotSizes};
pub use order::{Order, OrderCondition, OrderRequest, OrderStatus};
pub use position::Position;
pub use side::Side;
pub use stock::{Level, Stock};
pub use types::{OrderId, Price, Quantity, SYMBOL_MAX_LEN, Symbol};
