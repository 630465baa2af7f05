//! Account session: one broker adapter, its identity, and the latest
//! captured state.

use log::{debug, error, warn};
use spotsync::{LotSizes, Order, OrderId};
use spotsync_broker::{AccountState, Broker, Ingested, OrderTracker, StatusTable};

use crate::error::{Error, Result};
use crate::retry::RetryPolicy;

/// A broker session plus everything the core knows about it.
///
/// The state snapshot is replaced wholesale by [`refresh`](Account::refresh);
/// the core never patches it in place. Driving one account from two
/// rebalances at once is ruled out by [`rebalance`](crate::execution::rebalance)
/// taking `&mut Account`.
pub struct Account<B> {
    id: String,
    broker: B,
    state: Option<AccountState>,
    tracker: OrderTracker,
}

impl<B: Broker> Account<B> {
    /// Adapter results are already canonical, so the tracker uses the
    /// canonical status names.
    pub fn new(id: impl Into<String>, broker: B) -> Self {
        Self::with_tracker(
            id,
            broker,
            OrderTracker::new(StatusTable::canonical(), LotSizes::default()),
        )
    }

    pub fn with_tracker(id: impl Into<String>, broker: B, tracker: OrderTracker) -> Self {
        Self {
            id: id.into(),
            broker,
            state: None,
            tracker,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn broker(&self) -> &B {
        &self.broker
    }

    /// Last captured snapshot, if any. Stale once orders have been sent.
    pub fn state(&self) -> Option<&AccountState> {
        self.state.as_ref()
    }

    pub fn tracker(&self) -> &OrderTracker {
        &self.tracker
    }

    pub(crate) fn tracker_mut(&mut self) -> &mut OrderTracker {
        &mut self.tracker
    }

    /// Query the broker without touching any local state.
    pub fn snapshot(&self, retry: &RetryPolicy) -> Result<AccountState> {
        retry
            .run("account_state", || self.broker.account_state())
            .map_err(|source| Error::Broker {
                account: self.id.clone(),
                source,
            })
    }

    /// Capture a fresh snapshot, reconciled against the order tracker.
    ///
    /// A broker report older than what the tracker has already seen (a
    /// late notification) is replaced by the tracker's state; orders that
    /// turn out to be terminal drop out of the open set. Tracked orders the
    /// broker no longer lists are retired.
    pub fn refresh(&mut self, retry: &RetryPolicy) -> Result<&AccountState> {
        let raw = self.snapshot(retry)?;
        let listed: Vec<OrderId> = raw.open_orders.iter().filter_map(|o| o.id.clone()).collect();
        let mut open_orders: Vec<Order> = Vec::with_capacity(raw.open_orders.len());
        for order in raw.open_orders {
            let Some(id) = order.id.clone() else {
                warn!("{}: open order without id: {order}", self.id);
                open_orders.push(order);
                continue;
            };
            match self.tracker.record(order.clone()) {
                Ok(Ingested::Stale) => {
                    if let Some(known) = self.tracker.get(&id).filter(|o| o.is_live()) {
                        open_orders.push(known.clone());
                    }
                }
                Ok(_) => open_orders.push(order),
                Err(e) => {
                    error!("{}: cannot track order {id}: {e}", self.id);
                    open_orders.push(order);
                }
            }
        }
        let retired = self.tracker.retire_missing(&listed);
        debug!(
            "{}: {} positions, {} open orders, {} retired",
            self.id,
            raw.positions.len(),
            open_orders.len(),
            retired
        );
        Ok(self.state.insert(AccountState {
            positions: raw.positions,
            open_orders,
        }))
    }
}

/// Read-only account snapshot with the default retry policy.
pub fn snapshot<B: Broker>(account: &Account<B>) -> Result<AccountState> {
    account.snapshot(&RetryPolicy::default())
}
