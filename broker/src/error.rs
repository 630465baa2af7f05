//! Broker error taxonomy.
//!
//! Adapters translate every vendor failure into one of these variants before
//! it crosses the [`Broker`](crate::Broker) boundary.

use serde::Serialize;
use spotsync::{LotError, OrderId, Symbol, ValidationError};

/// Errors that can occur during broker operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum BrokerError {
    /// Network or session failure. Transient; retryable up to a bound.
    #[error("connection error: {0}")]
    Connection(String),

    /// Invalid credentials. Fatal; never retried.
    #[error("authentication error: {0}")]
    Auth(String),

    /// Business rejection (capacity, margin, lot-size violation).
    #[error("order rejected: {0}")]
    RejectedOrder(String),

    #[error("order not found: {0}")]
    OrderNotFound(OrderId),

    /// Already filled or cancelled.
    #[error("order {0} is not cancelable")]
    OrderNotCancelable(OrderId),

    #[error("symbol not found: {0}")]
    SymbolNotFound(Symbol),

    /// Symbol is known but has no usable market data.
    #[error("quote unavailable for {0}")]
    QuoteUnavailable(Symbol),

    /// Native status with no entry in the status table.
    #[error("unknown order status {0:?}")]
    UnknownOrderStatus(String),
}

impl BrokerError {
    /// Only connection failures are worth retrying.
    #[inline]
    pub fn is_retryable(&self) -> bool {
        matches!(self, BrokerError::Connection(_))
    }

    /// When the intent was to cancel, these mean the order is already gone.
    #[inline]
    pub fn is_benign_cancel(&self) -> bool {
        matches!(
            self,
            BrokerError::OrderNotFound(_) | BrokerError::OrderNotCancelable(_)
        )
    }

    /// Failures that invalidate the whole session rather than one action.
    #[inline]
    pub fn is_fatal(&self) -> bool {
        matches!(self, BrokerError::Auth(_))
    }

    /// Short stable name, for audit records.
    pub fn kind(&self) -> &'static str {
        match self {
            BrokerError::Connection(_) => "connection",
            BrokerError::Auth(_) => "auth",
            BrokerError::RejectedOrder(_) => "rejected_order",
            BrokerError::OrderNotFound(_) => "order_not_found",
            BrokerError::OrderNotCancelable(_) => "order_not_cancelable",
            BrokerError::SymbolNotFound(_) => "symbol_not_found",
            BrokerError::QuoteUnavailable(_) => "quote_unavailable",
            BrokerError::UnknownOrderStatus(_) => "unknown_order_status",
        }
    }
}

/// Failures while normalizing broker-native order reports.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TrackerError {
    #[error("unknown order status {0:?}")]
    UnknownOrderStatus(String),

    #[error("status table maps {0:?} twice")]
    DuplicateStatus(String),

    #[error("order report has no broker id")]
    MissingOrderId,

    #[error("order {id}: native status {status:?} with {filled}/{quantity} filled")]
    InconsistentFill {
        id: OrderId,
        status: String,
        filled: u64,
        quantity: u64,
    },

    #[error(transparent)]
    Lot(#[from] LotError),

    #[error(transparent)]
    Invalid(#[from] ValidationError),
}

impl From<TrackerError> for BrokerError {
    fn from(e: TrackerError) -> Self {
        match e {
            TrackerError::UnknownOrderStatus(s) => BrokerError::UnknownOrderStatus(s),
            // A report we cannot normalize is as untrackable as an unmapped status.
            other => BrokerError::UnknownOrderStatus(other.to_string()),
        }
    }
}
