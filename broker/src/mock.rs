//! Mock broker for testing: implements the `Broker` trait with configurable behavior.
//!
//! Use this in integration tests and dry runs to simulate broker responses
//! without network calls.
//!
//! ```
//! use spotsync::{Price, Stock, Symbol};
//! use spotsync_broker::mock::{FillMode, MockBroker};
//! use spotsync_broker::Broker;
//!
//! let tsmc = Symbol::new("2330");
//! let broker = MockBroker::builder()
//!     .fill_mode(FillMode::ImmediateFull)
//!     .with_position(tsmc, 1000, Price(500_00))
//!     .with_quote(Stock::new(tsmc).with_last(Price(600_00)))
//!     .build();
//! assert_eq!(broker.account_state().unwrap().position(&tsmc), 1000);
//! ```

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use spotsync::{Order, OrderId, OrderRequest, OrderStatus, Position, Price, Quantity, Stock, Symbol};

use crate::Broker;
use crate::error::BrokerError;
use crate::types::AccountState;

/// How the mock broker handles placed orders.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub enum FillMode {
    /// Orders rest on the book as `PENDING` until filled by hand.
    #[default]
    Resting,
    /// Orders fill completely on placement.
    ImmediateFull,
    /// Orders fill the given fraction (e.g. 0.5 = 50%) on placement.
    ImmediatePartial(f64),
    /// Every placement is rejected.
    Reject,
}

/// Which adapter operation a call was.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CallKind {
    AccountState,
    Quote,
    Place,
    Update,
    Cancel,
}

/// A recorded adapter call, for assertions in tests.
#[derive(Clone, Debug, PartialEq)]
pub enum Call {
    AccountState,
    Quote(Symbol),
    Place(OrderRequest),
    Update {
        id: OrderId,
        price: Option<Price>,
        quantity: Option<Quantity>,
    },
    Cancel(OrderId),
}

impl Call {
    pub fn kind(&self) -> CallKind {
        match self {
            Call::AccountState => CallKind::AccountState,
            Call::Quote(_) => CallKind::Quote,
            Call::Place(_) => CallKind::Place,
            Call::Update { .. } => CallKind::Update,
            Call::Cancel(_) => CallKind::Cancel,
        }
    }

    /// True for calls that change broker state.
    pub fn is_mutation(&self) -> bool {
        matches!(self.kind(), CallKind::Place | CallKind::Update | CallKind::Cancel)
    }
}

/// Serializable broker state, for loading a mock from a JSON file.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MockState {
    #[serde(default)]
    pub positions: Vec<Position>,
    #[serde(default)]
    pub open_orders: Vec<Order>,
    #[serde(default)]
    pub quotes: Vec<Stock>,
}

struct ScriptedError {
    kind: CallKind,
    symbol: Option<Symbol>,
    error: BrokerError,
}

/// Builder for `MockBroker`.
#[derive(Default)]
pub struct MockBrokerBuilder {
    fill_mode: FillMode,
    positions: Vec<Position>,
    orders: Vec<Order>,
    quotes: Vec<Stock>,
    rejected_symbols: Vec<Symbol>,
    auth_failure: Option<String>,
    connection_failures: u32,
    scripted: Vec<ScriptedError>,
}

impl MockBrokerBuilder {
    pub fn fill_mode(mut self, mode: FillMode) -> Self {
        self.fill_mode = mode;
        self
    }

    pub fn with_position(mut self, symbol: Symbol, quantity: i64, avg_cost: Price) -> Self {
        self.positions.push(Position::new(symbol, quantity, avg_cost));
        self
    }

    /// Seed a working order. Orders without an id get one assigned on build.
    pub fn with_order(mut self, order: Order) -> Self {
        self.orders.push(order);
        self
    }

    pub fn with_quote(mut self, quote: Stock) -> Self {
        self.quotes.push(quote);
        self
    }

    /// Reject every placement for `symbol`.
    pub fn reject_symbol(mut self, symbol: Symbol) -> Self {
        self.rejected_symbols.push(symbol);
        self
    }

    /// Fail every call with an authentication error.
    pub fn auth_failure(mut self, message: impl Into<String>) -> Self {
        self.auth_failure = Some(message.into());
        self
    }

    /// Fail the next `n` calls, of any kind, with a connection error.
    pub fn connection_failures(mut self, n: u32) -> Self {
        self.connection_failures = n;
        self
    }

    /// Fail the next call of `kind` (for `symbol`, if given) with `error`. One-shot.
    pub fn fail_next(mut self, kind: CallKind, symbol: Option<Symbol>, error: BrokerError) -> Self {
        self.scripted.push(ScriptedError {
            kind,
            symbol,
            error,
        });
        self
    }

    pub fn build(self) -> MockBroker {
        let mut inner = Inner {
            positions: BTreeMap::new(),
            orders: Vec::new(),
            next_order_id: 1,
            calls: Vec::new(),
            connection_failures: self.connection_failures,
            scripted: self.scripted,
        };
        for p in self.positions {
            inner.positions.insert(p.symbol, p);
        }
        for mut order in self.orders {
            if order.id.is_none() {
                order.id = Some(inner.fresh_id());
            }
            inner.orders.push(order);
        }
        MockBroker {
            fill_mode: self.fill_mode,
            quotes: self.quotes.into_iter().map(|q| (q.symbol, q)).collect(),
            rejected_symbols: self.rejected_symbols,
            auth_failure: self.auth_failure,
            inner: Mutex::new(inner),
        }
    }
}

struct Inner {
    positions: BTreeMap<Symbol, Position>,
    orders: Vec<Order>,
    next_order_id: u64,
    calls: Vec<Call>,
    connection_failures: u32,
    scripted: Vec<ScriptedError>,
}

impl Inner {
    fn fresh_id(&mut self) -> OrderId {
        loop {
            let id = OrderId::new(format!("M{}", self.next_order_id));
            self.next_order_id += 1;
            if !self.orders.iter().any(|o| o.id.as_ref() == Some(&id)) {
                return id;
            }
        }
    }

    fn order_index(&self, id: &OrderId) -> Result<usize, BrokerError> {
        self.orders
            .iter()
            .position(|o| o.id.as_ref() == Some(id))
            .ok_or_else(|| BrokerError::OrderNotFound(id.clone()))
    }

    fn take_scripted(&mut self, kind: CallKind, symbol: Option<Symbol>) -> Option<BrokerError> {
        let idx = self.scripted.iter().position(|s| {
            s.kind == kind && (s.symbol.is_none() || s.symbol == symbol)
        })?;
        Some(self.scripted.remove(idx).error)
    }

    fn apply_fill(&mut self, order: &Order, shares: Quantity, price: Price) {
        if shares == 0 {
            return;
        }
        let pos = self
            .positions
            .entry(order.symbol)
            .or_insert_with(|| Position::new(order.symbol, 0, price));
        if pos.is_flat() {
            pos.avg_cost = price;
        }
        pos.quantity += order.side.sign() * shares as i64;
    }
}

/// A mock broker that records every call and returns configurable responses.
///
/// State sits behind a mutex so the mock satisfies the `&self` adapter
/// contract and can be shared across threads.
pub struct MockBroker {
    fill_mode: FillMode,
    quotes: FxHashMap<Symbol, Stock>,
    rejected_symbols: Vec<Symbol>,
    auth_failure: Option<String>,
    inner: Mutex<Inner>,
}

impl MockBroker {
    pub fn builder() -> MockBrokerBuilder {
        MockBrokerBuilder::default()
    }

    /// A resting-mode mock seeded from serialized state.
    pub fn from_state(state: MockState) -> Self {
        let mut builder = Self::builder();
        builder.positions = state.positions;
        builder.orders = state.open_orders;
        builder.quotes = state.quotes;
        builder.build()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record `call` and return any failure injected for it.
    fn enter(&self, inner: &mut Inner, call: Call, symbol: Option<Symbol>) -> Result<(), BrokerError> {
        let kind = call.kind();
        inner.calls.push(call);
        if let Some(msg) = &self.auth_failure {
            return Err(BrokerError::Auth(msg.clone()));
        }
        if inner.connection_failures > 0 {
            inner.connection_failures -= 1;
            return Err(BrokerError::Connection("mock: connection dropped".into()));
        }
        match inner.take_scripted(kind, symbol) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Every call received so far, in order.
    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    /// Calls that changed broker state.
    pub fn mutations(&self) -> Vec<Call> {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.is_mutation())
            .cloned()
            .collect()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Every order ever placed or seeded, including terminal ones.
    pub fn orders(&self) -> Vec<Order> {
        self.lock().orders.clone()
    }

    pub fn order(&self, id: &OrderId) -> Option<Order> {
        self.lock()
            .orders
            .iter()
            .find(|o| o.id.as_ref() == Some(id))
            .cloned()
    }

    pub fn position(&self, symbol: &Symbol) -> i64 {
        self.lock()
            .positions
            .get(symbol)
            .map(|p| p.quantity)
            .unwrap_or(0)
    }

    /// Replace or add a quote.
    pub fn set_quote(&mut self, quote: Stock) {
        self.quotes.insert(quote.symbol, quote);
    }

    /// Simulate an execution of `shares` against a working order.
    pub fn fill(&self, id: &OrderId, shares: Quantity) -> Result<Order, BrokerError> {
        let mut inner = self.lock();
        let idx = inner.order_index(id)?;
        let mut order = inner.orders[idx].clone();
        if !order.is_live() {
            return Err(BrokerError::OrderNotCancelable(id.clone()));
        }
        let shares = shares.min(order.remaining());
        order.filled_quantity += shares;
        order.status = if order.filled_quantity == order.quantity {
            OrderStatus::Filled
        } else {
            OrderStatus::PartiallyFilled
        };
        order.updated_at = Utc::now();
        let price = order.price.or_else(|| self.fill_price(&order.symbol)).unwrap_or(Price::ZERO);
        inner.apply_fill(&order, shares, price);
        inner.orders[idx] = order.clone();
        Ok(order)
    }

    fn fill_price(&self, symbol: &Symbol) -> Option<Price> {
        self.quotes.get(symbol).and_then(Stock::reference_price)
    }
}

impl Broker for MockBroker {
    fn account_state(&self) -> Result<AccountState, BrokerError> {
        let mut inner = self.lock();
        self.enter(&mut inner, Call::AccountState, None)?;
        Ok(AccountState {
            positions: inner
                .positions
                .values()
                .filter(|p| !p.is_flat())
                .cloned()
                .collect(),
            open_orders: inner.orders.iter().filter(|o| o.is_live()).cloned().collect(),
        })
    }

    fn quote(&self, symbol: &Symbol) -> Result<Stock, BrokerError> {
        let mut inner = self.lock();
        self.enter(&mut inner, Call::Quote(*symbol), Some(*symbol))?;
        let quote = self
            .quotes
            .get(symbol)
            .ok_or(BrokerError::SymbolNotFound(*symbol))?;
        if quote.reference_price().is_none() {
            return Err(BrokerError::QuoteUnavailable(*symbol));
        }
        Ok(quote.clone())
    }

    fn place_order(&self, request: &OrderRequest) -> Result<Order, BrokerError> {
        let mut inner = self.lock();
        self.enter(&mut inner, Call::Place(request.clone()), Some(request.symbol))?;

        request
            .validate()
            .map_err(|e| BrokerError::RejectedOrder(e.to_string()))?;
        if self.fill_mode == FillMode::Reject || self.rejected_symbols.contains(&request.symbol) {
            return Err(BrokerError::RejectedOrder(format!(
                "mock: {} rejected",
                request.symbol
            )));
        }

        let mut order = Order::from_request(request, Utc::now());
        order.id = Some(inner.fresh_id());
        let filled = match self.fill_mode {
            FillMode::ImmediateFull => order.quantity,
            FillMode::ImmediatePartial(frac) => {
                ((order.quantity as f64 * frac.clamp(0.0, 1.0)) as Quantity).min(order.quantity)
            }
            FillMode::Resting | FillMode::Reject => 0,
        };
        order.filled_quantity = filled;
        order.status = match filled {
            0 => OrderStatus::Pending,
            f if f == order.quantity => OrderStatus::Filled,
            _ => OrderStatus::PartiallyFilled,
        };

        let price = request
            .price
            .or_else(|| self.fill_price(&request.symbol))
            .unwrap_or(Price::ZERO);
        inner.apply_fill(&order, filled, price);
        inner.orders.push(order.clone());
        Ok(order)
    }

    fn update_order(
        &self,
        id: &OrderId,
        price: Option<Price>,
        quantity: Option<Quantity>,
    ) -> Result<Order, BrokerError> {
        let mut inner = self.lock();
        let symbol = inner
            .orders
            .iter()
            .find(|o| o.id.as_ref() == Some(id))
            .map(|o| o.symbol);
        self.enter(
            &mut inner,
            Call::Update {
                id: id.clone(),
                price,
                quantity,
            },
            symbol,
        )?;

        let idx = inner.order_index(id)?;
        let mut order = inner.orders[idx].clone();
        if !order.is_live() {
            return Err(BrokerError::OrderNotCancelable(id.clone()));
        }
        if let Some(p) = price {
            if p.0 <= 0 {
                return Err(BrokerError::RejectedOrder("mock: non-positive price".into()));
            }
            order.price = Some(p);
        }
        if let Some(remaining) = quantity {
            if remaining == 0 {
                return Err(BrokerError::RejectedOrder(
                    "mock: zero quantity, cancel instead".into(),
                ));
            }
            order.quantity = order.filled_quantity + remaining;
        }
        order.updated_at = Utc::now();
        inner.orders[idx] = order.clone();
        Ok(order)
    }

    fn cancel_order(&self, id: &OrderId) -> Result<(), BrokerError> {
        let mut inner = self.lock();
        let symbol = inner
            .orders
            .iter()
            .find(|o| o.id.as_ref() == Some(id))
            .map(|o| o.symbol);
        self.enter(&mut inner, Call::Cancel(id.clone()), symbol)?;

        let idx = inner.order_index(id)?;
        let order = &mut inner.orders[idx];
        if !order.is_live() {
            return Err(BrokerError::OrderNotCancelable(id.clone()));
        }
        order.status = OrderStatus::Cancelled;
        order.updated_at = Utc::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tsmc() -> Symbol {
        Symbol::new("2330")
    }

    fn buy(qty: Quantity) -> OrderRequest {
        OrderRequest {
            symbol: tsmc(),
            side: spotsync::Side::Buy,
            condition: spotsync::OrderCondition::Cash,
            price: Some(Price(600_00)),
            quantity: qty,
            odd_lot: false,
        }
    }

    #[test]
    fn resting_orders_stay_open() {
        let broker = MockBroker::builder().build();
        let order = broker.place_order(&buy(1000)).unwrap();
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.id, Some(OrderId::new("M1")));
        assert_eq!(broker.account_state().unwrap().open_orders.len(), 1);
    }

    #[test]
    fn immediate_fill_moves_position() {
        let broker = MockBroker::builder()
            .fill_mode(FillMode::ImmediateFull)
            .build();
        let order = broker.place_order(&buy(2000)).unwrap();
        assert_eq!(order.status, OrderStatus::Filled);
        assert_eq!(broker.position(&tsmc()), 2000);
        assert!(broker.account_state().unwrap().open_orders.is_empty());
    }

    #[test]
    fn partial_fill_fraction() {
        let broker = MockBroker::builder()
            .fill_mode(FillMode::ImmediatePartial(0.5))
            .build();
        let order = broker.place_order(&buy(3000)).unwrap();
        assert_eq!(order.status, OrderStatus::PartiallyFilled);
        assert_eq!(order.filled_quantity, 1500);
        assert_eq!(order.remaining(), 1500);
    }

    #[test]
    fn update_sets_remaining() {
        let broker = MockBroker::builder().build();
        let id = broker.place_order(&buy(3000)).unwrap().id.unwrap();
        broker.fill(&id, 1000).unwrap();
        let updated = broker.update_order(&id, None, Some(500)).unwrap();
        assert_eq!(updated.quantity, 1500);
        assert_eq!(updated.remaining(), 500);
        assert_eq!(updated.status, OrderStatus::PartiallyFilled);
    }

    #[test]
    fn cancel_terminal_order_is_not_cancelable() {
        let broker = MockBroker::builder().build();
        let id = broker.place_order(&buy(1000)).unwrap().id.unwrap();
        broker.cancel_order(&id).unwrap();
        assert_eq!(
            broker.cancel_order(&id),
            Err(BrokerError::OrderNotCancelable(id.clone()))
        );
        assert_eq!(
            broker.cancel_order(&OrderId::new("nope")),
            Err(BrokerError::OrderNotFound(OrderId::new("nope")))
        );
    }

    #[test]
    fn quote_errors() {
        let empty = Symbol::new("1101");
        let broker = MockBroker::builder()
            .with_quote(Stock::new(empty))
            .build();
        assert_eq!(
            broker.quote(&empty),
            Err(BrokerError::QuoteUnavailable(empty))
        );
        assert_eq!(broker.quote(&tsmc()), Err(BrokerError::SymbolNotFound(tsmc())));
    }

    #[test]
    fn injected_failures_are_consumed() {
        let broker = MockBroker::builder()
            .connection_failures(1)
            .fail_next(CallKind::Place, Some(tsmc()), BrokerError::RejectedOrder("halt".into()))
            .build();
        assert!(matches!(
            broker.account_state(),
            Err(BrokerError::Connection(_))
        ));
        assert!(broker.account_state().is_ok());
        assert!(matches!(
            broker.place_order(&buy(1000)),
            Err(BrokerError::RejectedOrder(_))
        ));
        assert!(broker.place_order(&buy(1000)).is_ok());
        assert_eq!(broker.mutations().len(), 2);
    }

    #[test]
    fn auth_failure_on_every_call() {
        let broker = MockBroker::builder().auth_failure("expired token").build();
        assert_eq!(
            broker.account_state(),
            Err(BrokerError::Auth("expired token".into()))
        );
    }

    #[test]
    fn from_state_avoids_id_collisions() {
        let seeded = Order {
            id: Some(OrderId::new("M1")),
            ..Order::from_request(&buy(1000), Utc::now())
        };
        let broker = MockBroker::from_state(MockState {
            open_orders: vec![Order {
                status: OrderStatus::Pending,
                ..seeded
            }],
            ..MockState::default()
        });
        let placed = broker.place_order(&buy(1000)).unwrap();
        assert_eq!(placed.id, Some(OrderId::new("M2")));
    }
}
