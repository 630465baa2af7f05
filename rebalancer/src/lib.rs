//! spotsync-rebalancer: move a broker account toward a target allocation.
//!
//! Captures positions and open orders through a [`Broker`](spotsync_broker::Broker)
//! adapter, diffs them against the target into create/update/cancel actions,
//! and drives those actions back through the adapter with bounded retries
//! and a JSONL audit trail.

pub mod account;
pub mod audit;
pub mod config;
pub mod error;
pub mod execution;
pub mod plan;
pub mod reconcile;
pub mod retry;
pub mod target;

pub use account::Account;
pub use execution::{
    CancelToken, ExecutionReport, rebalance, rebalance_with, reprice_open_orders,
    reprice_open_orders_with,
};
pub use plan::{Action, Plan};
pub use target::TargetAllocation;
