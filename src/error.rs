//! Validation errors for the canonical model.

use crate::{OrderStatus, Quantity};

/// An order violates one of the model invariants.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ValidationError {
    /// Quantity must be greater than zero.
    #[error("quantity must be greater than zero")]
    ZeroQuantity,
    /// Price must be greater than zero for limit orders.
    #[error("price must be greater than zero")]
    ZeroPrice,
    /// More shares filled than ordered.
    #[error("filled quantity {filled} exceeds order quantity {quantity}")]
    Overfilled { filled: Quantity, quantity: Quantity },
    /// Status disagrees with the fill counts.
    #[error("status {status} inconsistent with {filled}/{quantity} filled")]
    StatusMismatch {
        status: OrderStatus,
        filled: Quantity,
        quantity: Quantity,
    },
    /// Share count does not fit a signed position.
    #[error("quantity {0} exceeds the largest representable position")]
    QuantityOverflow(Quantity),
    /// Status transition would move the order backwards.
    #[error("illegal status transition {from} -> {to}")]
    IllegalTransition { from: OrderStatus, to: OrderStatus },
}

/// Board-lot conversion failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum LotError {
    #[error("lot size must be greater than zero")]
    ZeroLotSize,
    /// Share count is not a whole number of lots.
    #[error("{shares} shares is not a whole number of {lot_size}-share lots ({remainder} left over)")]
    Fractional {
        shares: Quantity,
        lot_size: Quantity,
        remainder: Quantity,
    },
    #[error("{lots} lots of {lot_size} shares overflows")]
    Overflow { lots: Quantity, lot_size: Quantity },
}
