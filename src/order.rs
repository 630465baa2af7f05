//! Canonical order representation and lifecycle

use std::fmt;

use chrono::{DateTime, Utc};

use crate::{OrderId, Price, Quantity, Side, Symbol, ValidationError};

/// Status of an order in its lifecycle.
///
/// Statuses are ranked; a tracked order only ever moves to the same or a
/// higher rank, and terminal statuses absorb.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "SCREAMING_SNAKE_CASE"))]
pub enum OrderStatus {
    /// Built locally, not yet acknowledged by the broker
    #[default]
    New,
    /// Acknowledged and working, no fills yet
    Pending,
    /// Some quantity filled, remainder still working
    PartiallyFilled,
    /// Fully executed
    Filled,
    /// Removed before completion
    Cancelled,
    /// Rejected or errored at the broker
    Failed,
}

impl OrderStatus {
    /// Position in the lifecycle. Terminal statuses share the top rank.
    #[inline]
    pub fn rank(self) -> u8 {
        match self {
            OrderStatus::New => 0,
            OrderStatus::Pending => 1,
            OrderStatus::PartiallyFilled => 2,
            OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Failed => 3,
        }
    }

    /// Returns true if the order can still be filled, amended or cancelled.
    #[inline]
    pub fn is_live(self) -> bool {
        matches!(
            self,
            OrderStatus::New | OrderStatus::Pending | OrderStatus::PartiallyFilled
        )
    }

    /// Returns true if the order will never change again.
    #[inline]
    pub fn is_terminal(self) -> bool {
        !self.is_live()
    }

    /// Whether moving from `self` to `next` keeps the lifecycle monotonic.
    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        if self.is_terminal() {
            return self == next;
        }
        next.rank() >= self.rank()
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrderStatus::New => "NEW",
            OrderStatus::Pending => "PENDING",
            OrderStatus::PartiallyFilled => "PARTIALLY_FILLED",
            OrderStatus::Filled => "FILLED",
            OrderStatus::Cancelled => "CANCELLED",
            OrderStatus::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// Funding / settlement condition attached to an order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "SCREAMING_SNAKE_CASE"))]
pub enum OrderCondition {
    #[default]
    Cash,
    Margin,
    Short,
    /// Same-day buy/sell netting
    DayTrade,
}

impl fmt::Display for OrderCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrderCondition::Cash => "CASH",
            OrderCondition::Margin => "MARGIN",
            OrderCondition::Short => "SHORT",
            OrderCondition::DayTrade => "DAY_TRADE",
        };
        f.write_str(s)
    }
}

/// An order specification to submit. Carries no id and no fills.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct OrderRequest {
    pub symbol: Symbol,
    pub side: Side,
    pub condition: OrderCondition,
    /// Limit price; `None` is a market order.
    pub price: Option<Price>,
    pub quantity: Quantity,
    /// Routed to the odd-lot session instead of the board-lot book.
    #[cfg_attr(feature = "serde", serde(default))]
    pub odd_lot: bool,
}

impl OrderRequest {
    /// Check the request before it goes to a broker.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.quantity == 0 {
            return Err(ValidationError::ZeroQuantity);
        }
        if i64::try_from(self.quantity).is_err() {
            return Err(ValidationError::QuantityOverflow(self.quantity));
        }
        if matches!(self.price, Some(p) if p.0 <= 0) {
            return Err(ValidationError::ZeroPrice);
        }
        Ok(())
    }

    /// Effect on the signed position if fully filled. Saturates at `i64::MAX` shares.
    pub fn signed_quantity(&self) -> i64 {
        self.side.sign() * saturating_signed(self.quantity)
    }
}

impl fmt::Display for OrderRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} x {}", self.side, self.symbol, self.quantity)?;
        match self.price {
            Some(p) => write!(f, " @ {p}")?,
            None => write!(f, " @ MKT")?,
        }
        if self.odd_lot {
            write!(f, " (odd lot)")?;
        }
        write!(f, " {}", self.condition)
    }
}

/// A broker order in canonical form.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Order {
    /// Broker-assigned id; `None` until the broker accepts the order
    pub id: Option<OrderId>,
    pub symbol: Symbol,
    pub side: Side,
    pub condition: OrderCondition,
    /// Limit price; `None` for market orders
    pub price: Option<Price>,
    /// Total ordered quantity in shares
    pub quantity: Quantity,
    /// Shares executed so far
    pub filled_quantity: Quantity,
    pub status: OrderStatus,
    #[cfg_attr(feature = "serde", serde(default))]
    pub odd_lot: bool,
    /// When the order was first placed. Amendments leave it alone, so it
    /// orders queue priority. `None` when the broker does not report it.
    #[cfg_attr(feature = "serde", serde(default))]
    pub created_at: Option<DateTime<Utc>>,
    /// When the broker last reported on this order
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// A fresh, unacknowledged order built from a request.
    pub fn from_request(request: &OrderRequest, at: DateTime<Utc>) -> Self {
        Self {
            id: None,
            symbol: request.symbol,
            side: request.side,
            condition: request.condition,
            price: request.price,
            quantity: request.quantity,
            filled_quantity: 0,
            status: OrderStatus::New,
            odd_lot: request.odd_lot,
            created_at: Some(at),
            updated_at: at,
        }
    }

    /// Shares still working.
    #[inline]
    pub fn remaining(&self) -> Quantity {
        self.quantity.saturating_sub(self.filled_quantity)
    }

    /// Remaining quantity signed by side: what this order still adds to the position.
    #[inline]
    pub fn signed_remaining(&self) -> i64 {
        self.side.sign() * saturating_signed(self.remaining())
    }

    /// Placement time if known, else the last report time.
    #[inline]
    pub fn placed_at(&self) -> DateTime<Utc> {
        self.created_at.unwrap_or(self.updated_at)
    }

    #[inline]
    pub fn is_live(&self) -> bool {
        self.status.is_live()
    }

    /// Check `filled <= quantity` and `Filled <=> filled == quantity`.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.quantity == 0 {
            return Err(ValidationError::ZeroQuantity);
        }
        if self.filled_quantity > self.quantity {
            return Err(ValidationError::Overfilled {
                filled: self.filled_quantity,
                quantity: self.quantity,
            });
        }
        let complete = self.filled_quantity == self.quantity;
        if complete != (self.status == OrderStatus::Filled) {
            return Err(ValidationError::StatusMismatch {
                status: self.status,
                filled: self.filled_quantity,
                quantity: self.quantity,
            });
        }
        Ok(())
    }

    /// Replace this order's state with a later report, enforcing monotonicity.
    ///
    /// Fails without modifying `self` if the status would regress or the
    /// filled quantity would shrink.
    pub fn advance(&mut self, next: &Order) -> Result<(), ValidationError> {
        if !self.status.can_transition_to(next.status)
            || next.filled_quantity < self.filled_quantity
        {
            return Err(ValidationError::IllegalTransition {
                from: self.status,
                to: next.status,
            });
        }
        next.validate()?;
        let created_at = next.created_at.or(self.created_at);
        *self = next.clone();
        self.created_at = created_at;
        Ok(())
    }
}

fn saturating_signed(shares: Quantity) -> i64 {
    i64::try_from(shares).unwrap_or(i64::MAX)
}

impl fmt::Display for Order {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let id = self.id.as_ref().map(OrderId::as_str).unwrap_or("-");
        write!(
            f,
            "[{id}] {} {} {}/{}",
            self.side, self.symbol, self.filled_quantity, self.quantity
        )?;
        match self.price {
            Some(p) => write!(f, " @ {p}")?,
            None => write!(f, " @ MKT")?,
        }
        write!(f, " {}", self.status)
    }
}
