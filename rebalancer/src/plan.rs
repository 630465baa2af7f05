//! CURRENT → TARGET planning engine.
//!
//! Given the account snapshot (positions plus live orders), a target
//! allocation and top-of-book quotes, computes the minimal ordered list of
//! create / update / cancel actions that moves committed exposure
//! (position + remaining open quantity) to the target.
//!
//! The planner is a pure function: it never talks to a broker, and the same
//! inputs always give the same plan.
//!
//! Per symbol:
//! 1. `required = desired - position`.
//! 2. Live orders on the wrong side of `required` (all of them when
//!    `required == 0`) are cancelled.
//! 3. `|required|` (or the configured fraction of it) splits into legs by
//!    order condition: the part that unwinds the current position, then the
//!    part that opens the other way. A day-trading account uses one leg.
//! 4. Each leg splits into a board-lot lane and an odd-lot lane. Without
//!    odd-lot trading the remainder is reported as a [`Residual`].
//! 5. Each lane's working orders are grown or shrunk to the lane target,
//!    newest order first, so queue priority of older orders is kept.
//! 6. Orders that stay get repriced only when they are further than the
//!    tolerance from the target price.
//!
//! A symbol with a live order the broker never identified, or whose gap
//! does not fit a signed share count, is skipped whole.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use log::debug;
use serde::Serialize;
use spotsync::{
    LotSize, Order, OrderCondition, OrderId, OrderRequest, Price, Quantity, Side, Stock, Symbol,
    tick,
};
use spotsync_broker::{AccountState, BrokerError};

use crate::config::{ExecutionConfig, PricingMode};
use crate::target::TargetAllocation;

/// A proposed operation. Purely descriptive; carries no broker session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    Create(OrderRequest),
    UpdatePrice {
        order_id: OrderId,
        symbol: Symbol,
        side: Side,
        from: Option<Price>,
        to: Price,
    },
    /// Quantities are remaining (unfilled) shares.
    UpdateQuantity {
        order_id: OrderId,
        symbol: Symbol,
        side: Side,
        from: Quantity,
        to: Quantity,
    },
    Cancel {
        order_id: OrderId,
        symbol: Symbol,
        side: Side,
        remaining: Quantity,
    },
}

/// Action discriminant, ordered by execution phase within a symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionKind {
    Cancel,
    UpdateQuantity,
    UpdatePrice,
    Create,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ActionKind::Cancel => "CANCEL",
            ActionKind::UpdateQuantity => "UPDATE_QUANTITY",
            ActionKind::UpdatePrice => "UPDATE_PRICE",
            ActionKind::Create => "CREATE",
        };
        f.write_str(s)
    }
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::Create(_) => ActionKind::Create,
            Action::UpdatePrice { .. } => ActionKind::UpdatePrice,
            Action::UpdateQuantity { .. } => ActionKind::UpdateQuantity,
            Action::Cancel { .. } => ActionKind::Cancel,
        }
    }

    pub fn symbol(&self) -> Symbol {
        match self {
            Action::Create(req) => req.symbol,
            Action::UpdatePrice { symbol, .. }
            | Action::UpdateQuantity { symbol, .. }
            | Action::Cancel { symbol, .. } => *symbol,
        }
    }

    pub fn side(&self) -> Side {
        match self {
            Action::Create(req) => req.side,
            Action::UpdatePrice { side, .. }
            | Action::UpdateQuantity { side, .. }
            | Action::Cancel { side, .. } => *side,
        }
    }

    /// Existing order this action targets; `None` for creates.
    pub fn order_id(&self) -> Option<&OrderId> {
        match self {
            Action::Create(_) => None,
            Action::UpdatePrice { order_id, .. }
            | Action::UpdateQuantity { order_id, .. }
            | Action::Cancel { order_id, .. } => Some(order_id),
        }
    }

    /// Change in committed signed exposure if the action succeeds.
    pub fn signed_delta(&self) -> i64 {
        match self {
            Action::Create(req) => req.signed_quantity(),
            Action::UpdatePrice { .. } => 0,
            Action::UpdateQuantity { side, from, to, .. } => {
                side.sign() * (*to as i64 - *from as i64)
            }
            Action::Cancel {
                side, remaining, ..
            } => -side.sign() * *remaining as i64,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Create(req) => write!(f, "CREATE {req}"),
            Action::UpdatePrice {
                order_id,
                symbol,
                side,
                from,
                to,
            } => {
                let from = from.map_or_else(|| "MKT".to_string(), |p| p.to_string());
                write!(f, "UPDATE_PRICE [{order_id}] {side} {symbol} {from} -> {to}")
            }
            Action::UpdateQuantity {
                order_id,
                symbol,
                side,
                from,
                to,
            } => write!(
                f,
                "UPDATE_QUANTITY [{order_id}] {side} {symbol} {from} -> {to}"
            ),
            Action::Cancel {
                order_id,
                symbol,
                side,
                remaining,
            } => write!(f, "CANCEL [{order_id}] {side} {symbol} x {remaining}"),
        }
    }
}

/// Sub-lot quantity that could not be routed because odd-lot trading is off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Residual {
    pub symbol: Symbol,
    pub side: Side,
    pub condition: OrderCondition,
    pub shares: Quantity,
    pub lot_size: Quantity,
}

/// Why a symbol or action was not acted on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum SkipReason {
    /// No usable quote for a priced order
    Quote(BrokerError),
    /// The run was cancelled before this action was issued
    Cancelled,
    /// An earlier cancel for the same symbol failed, so later actions could overshoot
    CancelNotAcknowledged(OrderId),
    /// A live order has no broker id, so it can be neither amended nor cancelled
    UnidentifiedOrder,
    /// `target - position` does not fit a signed share count
    QuantityOverflow,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Quote(e) => write!(f, "{e}"),
            SkipReason::Cancelled => f.write_str("run cancelled"),
            SkipReason::CancelNotAcknowledged(id) => {
                write!(f, "cancel of {id} not acknowledged")
            }
            SkipReason::UnidentifiedOrder => f.write_str("live order without broker id"),
            SkipReason::QuantityOverflow => f.write_str("quantity overflow"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedSymbol {
    pub symbol: Symbol,
    pub reason: SkipReason,
}

/// The ordered action list plus what was left out of it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Plan {
    /// Grouped by symbol in symbol order; within a symbol, cancels first,
    /// then quantity updates, price updates, creates.
    pub actions: Vec<Action>,
    pub residuals: Vec<Residual>,
    pub skipped: Vec<SkippedSymbol>,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Actions split into per-symbol groups, preserving order.
    pub fn by_symbol(&self) -> Vec<(Symbol, Vec<Action>)> {
        let mut groups: Vec<(Symbol, Vec<Action>)> = Vec::new();
        for action in &self.actions {
            match groups.last_mut() {
                Some((sym, group)) if *sym == action.symbol() => group.push(action.clone()),
                _ => groups.push((action.symbol(), vec![action.clone()])),
            }
        }
        groups
    }

    /// Net signed change in committed exposure for `symbol`.
    pub fn net_delta(&self, symbol: &Symbol) -> i64 {
        self.actions
            .iter()
            .filter(|a| a.symbol() == *symbol)
            .map(Action::signed_delta)
            .sum()
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.actions.is_empty() {
            writeln!(f, "No actions needed.")?;
        } else {
            writeln!(f, "PLAN ({} actions):", self.actions.len())?;
            for (i, action) in self.actions.iter().enumerate() {
                writeln!(f, "  {:>3}  {action}", i + 1)?;
            }
        }
        for r in &self.residuals {
            writeln!(
                f,
                "  residual: {} {} x {} {} below lot size {} (odd lots disabled)",
                r.side, r.symbol, r.shares, r.condition, r.lot_size
            )?;
        }
        for s in &self.skipped {
            writeln!(f, "  skipped: {} ({})", s.symbol, s.reason)?;
        }
        Ok(())
    }
}

/// Every symbol the plan must visit: target ∪ positions ∪ live orders.
pub fn universe(state: &AccountState, target: &TargetAllocation) -> Vec<Symbol> {
    let set: BTreeSet<Symbol> = target.symbols().chain(state.symbols()).collect();
    set.into_iter().collect()
}

/// Symbols with at least one live order, sorted.
pub fn working_symbols(state: &AccountState) -> Vec<Symbol> {
    let set: BTreeSet<Symbol> = state
        .open_orders
        .iter()
        .filter(|o| o.is_live())
        .map(|o| o.symbol)
        .collect();
    set.into_iter().collect()
}

/// Compute the plan. Deterministic and side-effect free.
pub fn plan(
    state: &AccountState,
    target: &TargetAllocation,
    quotes: &BTreeMap<Symbol, Stock>,
    config: &ExecutionConfig,
) -> Plan {
    let mut out = Plan::default();
    for symbol in universe(state, target) {
        let desired = target.get(&symbol);
        let current = state.position(&symbol);
        let orders: Vec<&Order> = state.orders_for(&symbol).collect();
        let ctx = SymbolContext {
            symbol,
            desired,
            current,
            lot: config.lot_for(&symbol),
            quote: quotes.get(&symbol),
            config,
        };
        match ctx.plan(&orders) {
            Ok((mut actions, residuals)) => {
                // Stable: keeps newest-first order among cancels of one lane.
                actions.sort_by_key(Action::kind);
                if !actions.is_empty() {
                    debug!("{symbol}: {} actions", actions.len());
                }
                out.actions.extend(actions);
                out.residuals.extend(residuals);
            }
            Err(reason) => out.skipped.push(SkippedSymbol { symbol, reason }),
        }
    }
    out
}

/// Move every identified live limit order to the current target price.
///
/// Quantities are left alone. Orders within the tolerance stay put, as do
/// market orders. Under market pricing there is nothing to chase.
pub fn reprice(
    state: &AccountState,
    quotes: &BTreeMap<Symbol, Stock>,
    config: &ExecutionConfig,
) -> Plan {
    let mut out = Plan::default();
    if config.pricing_mode == PricingMode::Market {
        return out;
    }
    let tolerance = config.tolerance_cents();
    for symbol in working_symbols(state) {
        let orders: Vec<&Order> = state.orders_for(&symbol).collect();
        let unavailable = || SkipReason::Quote(BrokerError::QuoteUnavailable(symbol));
        let result = identified(&orders).and_then(|working| {
            let quote = quotes.get(&symbol).ok_or_else(unavailable)?;
            let mut actions = Vec::new();
            for w in recency_sorted(working) {
                let Some(from) = w.order.price else {
                    continue;
                };
                let to = limit_price(quote, w.order.side, config).ok_or_else(unavailable)?;
                if from.distance(to) > tolerance {
                    actions.push(Action::UpdatePrice {
                        order_id: w.id.clone(),
                        symbol,
                        side: w.order.side,
                        from: Some(from),
                        to,
                    });
                }
            }
            Ok(actions)
        });
        match result {
            Ok(actions) => out.actions.extend(actions),
            Err(reason) => out.skipped.push(SkippedSymbol { symbol, reason }),
        }
    }
    out
}

/// A live order with its broker id, the only kind the planner can act on.
#[derive(Clone, Copy)]
struct Working<'a> {
    id: &'a OrderId,
    order: &'a Order,
}

impl Working<'_> {
    fn remaining(&self) -> Quantity {
        self.order.remaining()
    }
}

/// The part of a symbol's step traded under one order condition.
struct Leg {
    condition: OrderCondition,
    shares: Quantity,
}

impl Leg {
    /// Whether a working order counts toward this leg.
    fn holds(&self, order: &Order) -> bool {
        self.condition == OrderCondition::DayTrade
            || (order.condition == OrderCondition::Short) == (self.condition == OrderCondition::Short)
    }
}

struct SymbolContext<'a> {
    symbol: Symbol,
    desired: i64,
    current: i64,
    lot: LotSize,
    quote: Option<&'a Stock>,
    config: &'a ExecutionConfig,
}

impl SymbolContext<'_> {
    fn plan(&self, orders: &[&Order]) -> Result<(Vec<Action>, Vec<Residual>), SkipReason> {
        let working = identified(orders)?;
        let required = self
            .desired
            .checked_sub(self.current)
            .filter(|r| *r != i64::MIN)
            .ok_or(SkipReason::QuantityOverflow)?;
        let side = Side::for_delta(required);
        if let Some(side) = side.filter(|s| !self.config.allows(*s)) {
            debug!("{}: {side} orders disabled, leaving symbol alone", self.symbol);
            return Ok((Vec::new(), Vec::new()));
        }

        let mut actions = Vec::new();
        let mut same_side: Vec<Working> = Vec::new();
        for w in recency_sorted(working) {
            if Some(w.order.side) == side {
                same_side.push(w);
            } else {
                actions.push(cancel(w));
            }
        }

        let Some(side) = side else {
            return Ok((actions, Vec::new()));
        };

        let price = self.target_price(side);
        let mut residuals = Vec::new();
        for leg in self.legs(side, self.step(required.unsigned_abs())) {
            let (board, odd): (Vec<Working>, Vec<Working>) = same_side
                .iter()
                .copied()
                .filter(|w| leg.holds(w.order))
                .partition(|w| !w.order.odd_lot);

            let (board_target, odd_shares) = self.lot.split(leg.shares);
            let odd_target = if self.config.allow_odd_lot || odd_shares == 0 {
                odd_shares
            } else {
                residuals.push(Residual {
                    symbol: self.symbol,
                    side,
                    condition: leg.condition,
                    shares: odd_shares,
                    lot_size: self.lot.shares(),
                });
                0
            };

            for (lane, target, odd_lot) in [(board, board_target, false), (odd, odd_target, true)] {
                let kept = fit_lane(&lane, target, &mut actions);
                let needs_price = !kept.is_empty() || lane_needs_create(&lane, target);
                if !needs_price {
                    continue;
                }
                let price = price.clone()?;
                if let Some(to) = price {
                    let tolerance = self.config.tolerance_cents();
                    for w in kept {
                        // Market orders and prices within tolerance stay put.
                        if let Some(p) = w.order.price.filter(|p| p.distance(to) > tolerance) {
                            actions.push(Action::UpdatePrice {
                                order_id: w.id.clone(),
                                symbol: self.symbol,
                                side,
                                from: Some(p),
                                to,
                            });
                        }
                    }
                }
                if lane_needs_create(&lane, target) {
                    actions.push(Action::Create(OrderRequest {
                        symbol: self.symbol,
                        side,
                        condition: leg.condition,
                        price,
                        quantity: target,
                        odd_lot,
                    }));
                }
            }
        }

        Ok((actions, residuals))
    }

    /// Shares to trade this run: the whole gap, or the configured fraction of
    /// it rounded to whole trading units.
    fn step(&self, gap: Quantity) -> Quantity {
        let progress = self.config.progress;
        if progress >= 1.0 {
            return gap;
        }
        let unit = if self.config.allow_odd_lot {
            LotSize::SINGLE
        } else {
            self.lot
        };
        let units = (gap as f64 / unit.shares() as f64 * progress).round() as Quantity;
        unit.truncate(units.saturating_mul(unit.shares()).min(gap))
    }

    /// Closing leg first: the shares that unwind the current position keep
    /// the position's condition, the rest opens under the other one.
    fn legs(&self, side: Side, step: Quantity) -> Vec<Leg> {
        if self.config.day_trade_enabled {
            return vec![Leg {
                condition: OrderCondition::DayTrade,
                shares: step,
            }];
        }
        let long = if self.config.margin_trading {
            OrderCondition::Margin
        } else {
            OrderCondition::Cash
        };
        let (closable, closing, opening) = match side {
            Side::Sell => (self.current.max(0).unsigned_abs(), long, OrderCondition::Short),
            Side::Buy => (self.current.min(0).unsigned_abs(), OrderCondition::Short, long),
        };
        let close = step.min(closable);
        vec![
            Leg {
                condition: closing,
                shares: close,
            },
            Leg {
                condition: opening,
                shares: step - close,
            },
        ]
    }

    /// Limit price for new and repriced orders; `Ok(None)` is a market order.
    fn target_price(&self, side: Side) -> Result<Option<Price>, SkipReason> {
        if self.config.pricing_mode == PricingMode::Market {
            return Ok(None);
        }
        let unavailable = || SkipReason::Quote(BrokerError::QuoteUnavailable(self.symbol));
        let quote = self.quote.ok_or_else(unavailable)?;
        limit_price(quote, side, self.config)
            .map(Some)
            .ok_or_else(unavailable)
    }
}

/// Limit price for `side` under the configured pricing mode, chased by
/// `extra_bid_pct` and clamped into the daily band. `None` when the quote
/// lacks the price the mode needs.
fn limit_price(quote: &Stock, side: Side, config: &ExecutionConfig) -> Option<Price> {
    let base = match config.pricing_mode {
        PricingMode::Market => None,
        PricingMode::LimitBid => quote.bid_price(),
        PricingMode::LimitAsk => quote.ask_price(),
        PricingMode::LimitLast => quote.last.or_else(|| quote.near_price(side)),
        PricingMode::PriceLimit => match side {
            Side::Buy => quote.limit_down,
            Side::Sell => quote.limit_up,
        },
    }
    .filter(|p| p.0 > 0)?;

    let pct = match side {
        Side::Buy => config.extra_bid_pct,
        Side::Sell => -config.extra_bid_pct,
    };
    Some(quote.clamp_to_band(tick::apply_extra_bid(base, pct)))
}

/// Pair each order with its id. Any order without one fails the symbol.
fn identified<'a>(orders: &[&'a Order]) -> Result<Vec<Working<'a>>, SkipReason> {
    orders
        .iter()
        .map(|&order| {
            order
                .id
                .as_ref()
                .map(|id| Working { id, order })
                .ok_or(SkipReason::UnidentifiedOrder)
        })
        .collect()
}

/// Oldest placement first. Orders without a placement time fall back to
/// their last report time; broker order breaks ties.
fn recency_sorted(mut working: Vec<Working<'_>>) -> Vec<Working<'_>> {
    working.sort_by_key(|w| w.order.placed_at());
    working
}

fn cancel(w: Working<'_>) -> Action {
    Action::Cancel {
        order_id: w.id.clone(),
        symbol: w.order.symbol,
        side: w.order.side,
        remaining: w.remaining(),
    }
}

fn lane_needs_create(lane: &[Working<'_>], target: Quantity) -> bool {
    lane.is_empty() && target > 0
}

/// Bring the remaining quantity of `lane` (oldest first) to `target`.
///
/// Grows the newest order, or shrinks from the newest backwards, cancelling
/// orders that would reach zero. Creation for an empty lane is left to the
/// caller. Returns the orders still working afterwards.
fn fit_lane<'a>(
    lane: &[Working<'a>],
    target: Quantity,
    actions: &mut Vec<Action>,
) -> Vec<Working<'a>> {
    let open: Quantity = lane.iter().map(Working::remaining).sum();
    let Some(newest) = lane.last() else {
        return Vec::new();
    };

    if target > open {
        actions.push(update_quantity(*newest, newest.remaining() + (target - open)));
        return lane.to_vec();
    }

    let mut excess = open - target;
    let mut kept = lane.to_vec();
    while excess > 0 {
        let Some(w) = kept.pop() else {
            break;
        };
        let remaining = w.remaining();
        if remaining <= excess {
            actions.push(cancel(w));
            excess -= remaining;
        } else {
            actions.push(update_quantity(w, remaining - excess));
            kept.push(w);
            excess = 0;
        }
    }
    kept
}

fn update_quantity(w: Working<'_>, to: Quantity) -> Action {
    Action::UpdateQuantity {
        order_id: w.id.clone(),
        symbol: w.order.symbol,
        side: w.order.side,
        from: w.remaining(),
        to,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, Utc};
    use spotsync::{OrderStatus, Position};

    fn tsmc() -> Symbol {
        Symbol::new("2330")
    }

    fn quotes(last: Price) -> BTreeMap<Symbol, Stock> {
        BTreeMap::from([(
            tsmc(),
            Stock::new(tsmc())
                .with_last(last)
                .with_bid(Price(last.0 - 50), 10)
                .with_ask(Price(last.0 + 50), 10),
        )])
    }

    fn resting(id: &str, side: Side, qty: Quantity, price: Price, age: i64) -> Order {
        Order {
            id: Some(OrderId::new(id)),
            symbol: tsmc(),
            side,
            condition: OrderCondition::Cash,
            price: Some(price),
            quantity: qty,
            filled_quantity: 0,
            status: OrderStatus::Pending,
            odd_lot: false,
            created_at: Some(DateTime::<Utc>::UNIX_EPOCH + Duration::seconds(age)),
            updated_at: DateTime::<Utc>::UNIX_EPOCH + Duration::seconds(age),
        }
    }

    fn creates(plan: &Plan) -> Vec<(Side, OrderCondition, Quantity)> {
        plan.actions
            .iter()
            .filter_map(|a| match a {
                Action::Create(r) => Some((r.side, r.condition, r.quantity)),
                _ => None,
            })
            .collect()
    }

    fn banded(last: Price, up: Price, down: Price) -> BTreeMap<Symbol, Stock> {
        let mut q = quotes(last);
        if let Some(stock) = q.get_mut(&tsmc()) {
            stock.limit_up = Some(up);
            stock.limit_down = Some(down);
        }
        q
    }

    fn state(position: i64, orders: Vec<Order>) -> AccountState {
        AccountState {
            positions: vec![Position::new(tsmc(), position, Price(500_00))],
            open_orders: orders,
        }
    }

    fn target(shares: i64) -> TargetAllocation {
        TargetAllocation::new().with(tsmc(), shares)
    }

    #[test]
    fn create_board_lots() {
        let plan = plan(
            &state(0, vec![]),
            &target(3000),
            &quotes(Price(600_00)),
            &ExecutionConfig::default(),
        );
        assert_eq!(plan.actions.len(), 1);
        let Action::Create(req) = &plan.actions[0] else {
            panic!("expected create, got {:?}", plan.actions[0]);
        };
        assert_eq!(req.side, Side::Buy);
        assert_eq!(req.quantity, 3000);
        assert_eq!(req.price, Some(Price(600_00)));
        assert_eq!(req.condition, OrderCondition::Cash);
        assert!(!req.odd_lot);
    }

    #[test]
    fn odd_remainder_without_odd_lots_is_residual() {
        let plan = plan(
            &state(0, vec![]),
            &target(2345),
            &quotes(Price(600_00)),
            &ExecutionConfig::default(),
        );
        assert_eq!(plan.net_delta(&tsmc()), 2000);
        assert_eq!(
            plan.residuals,
            vec![Residual {
                symbol: tsmc(),
                side: Side::Buy,
                condition: OrderCondition::Cash,
                shares: 345,
                lot_size: 1000
            }]
        );
    }

    #[test]
    fn odd_remainder_routed_separately() {
        let config = ExecutionConfig {
            allow_odd_lot: true,
            ..ExecutionConfig::default()
        };
        let plan = plan(&state(0, vec![]), &target(2345), &quotes(Price(600_00)), &config);
        let creates: Vec<(Quantity, bool)> = plan
            .actions
            .iter()
            .filter_map(|a| match a {
                Action::Create(r) => Some((r.quantity, r.odd_lot)),
                _ => None,
            })
            .collect();
        assert_eq!(creates, vec![(2000, false), (345, true)]);
        assert!(plan.residuals.is_empty());
    }

    #[test]
    fn matching_order_grows_instead_of_new_order() {
        let open = resting("A", Side::Buy, 1000, Price(600_00), 0);
        let plan = plan(
            &state(0, vec![open]),
            &target(3000),
            &quotes(Price(600_00)),
            &ExecutionConfig::default(),
        );
        assert_eq!(
            plan.actions,
            vec![Action::UpdateQuantity {
                order_id: OrderId::new("A"),
                symbol: tsmc(),
                side: Side::Buy,
                from: 1000,
                to: 3000,
            }]
        );
    }

    #[test]
    fn shrink_cancels_newest_first() {
        let orders = vec![
            resting("OLD", Side::Buy, 2000, Price(600_00), 0),
            resting("NEW", Side::Buy, 1000, Price(600_00), 10),
        ];
        let plan = plan(
            &state(0, orders),
            &target(1000),
            &quotes(Price(600_00)),
            &ExecutionConfig::default(),
        );
        assert_eq!(plan.actions.len(), 2);
        assert_eq!(plan.actions[0].kind(), ActionKind::Cancel);
        assert_eq!(plan.actions[0].order_id(), Some(&OrderId::new("NEW")));
        assert_eq!(plan.actions[1].kind(), ActionKind::UpdateQuantity);
        assert_eq!(plan.net_delta(&tsmc()), -2000);
    }

    #[test]
    fn opposite_order_cancelled_before_create() {
        let open = resting("S", Side::Sell, 1000, Price(600_00), 0);
        let plan = plan(
            &state(0, vec![open]),
            &target(2000),
            &quotes(Price(600_00)),
            &ExecutionConfig::default(),
        );
        let kinds: Vec<ActionKind> = plan.actions.iter().map(Action::kind).collect();
        assert_eq!(kinds, vec![ActionKind::Cancel, ActionKind::Create]);
        assert_eq!(plan.net_delta(&tsmc()), 3000);
    }

    #[test]
    fn at_target_cancels_stray_orders() {
        let open = resting("B", Side::Buy, 1000, Price(600_00), 0);
        let plan = plan(
            &state(2000, vec![open]),
            &target(2000),
            &quotes(Price(600_00)),
            &ExecutionConfig::default(),
        );
        assert_eq!(plan.actions.len(), 1);
        assert_eq!(plan.actions[0].kind(), ActionKind::Cancel);
    }

    #[test]
    fn price_within_tolerance_no_action() {
        let config = ExecutionConfig {
            price_update_tolerance: 0.1,
            pricing_mode: PricingMode::LimitLast,
            ..ExecutionConfig::default()
        };
        let open = resting("B", Side::Buy, 1000, Price(10_00), 0);
        let plan = plan(&state(0, vec![open]), &target(1000), &quotes(Price(10_05)), &config);
        assert!(plan.is_empty());
    }

    #[test]
    fn price_at_tolerance_boundary_no_action() {
        let config = ExecutionConfig {
            price_update_tolerance: 0.1,
            ..ExecutionConfig::default()
        };
        let open = resting("B", Side::Buy, 1000, Price(10_00), 0);
        let plan = plan(&state(0, vec![open]), &target(1000), &quotes(Price(10_10)), &config);
        assert!(plan.is_empty());
    }

    #[test]
    fn price_beyond_tolerance_single_update() {
        let config = ExecutionConfig {
            price_update_tolerance: 0.1,
            ..ExecutionConfig::default()
        };
        let open = resting("B", Side::Buy, 1000, Price(10_00), 0);
        let plan = plan(&state(0, vec![open]), &target(1000), &quotes(Price(10_50)), &config);
        assert_eq!(
            plan.actions,
            vec![Action::UpdatePrice {
                order_id: OrderId::new("B"),
                symbol: tsmc(),
                side: Side::Buy,
                from: Some(Price(10_00)),
                to: Price(10_50),
            }]
        );
    }

    #[test]
    fn missing_quote_skips_symbol() {
        let plan = plan(
            &state(0, vec![]),
            &target(1000),
            &BTreeMap::new(),
            &ExecutionConfig::default(),
        );
        assert!(plan.is_empty());
        assert_eq!(
            plan.skipped,
            vec![SkippedSymbol {
                symbol: tsmc(),
                reason: SkipReason::Quote(BrokerError::QuoteUnavailable(tsmc())),
            }]
        );
    }

    #[test]
    fn market_orders_need_no_quote() {
        let config = ExecutionConfig {
            pricing_mode: PricingMode::Market,
            ..ExecutionConfig::default()
        };
        let plan = plan(&state(0, vec![]), &target(1000), &BTreeMap::new(), &config);
        assert_eq!(plan.actions.len(), 1);
        let Action::Create(req) = &plan.actions[0] else {
            panic!("expected create");
        };
        assert_eq!(req.price, None);
    }

    #[test]
    fn untargeted_positions_are_closed() {
        let plan = plan(
            &state(3000, vec![]),
            &TargetAllocation::new(),
            &quotes(Price(600_00)),
            &ExecutionConfig::default(),
        );
        assert_eq!(plan.net_delta(&tsmc()), -3000);
        let Action::Create(req) = &plan.actions[0] else {
            panic!("expected create");
        };
        assert_eq!(req.side, Side::Sell);
        assert_eq!(req.condition, OrderCondition::Cash);
    }

    #[test]
    fn order_conditions() {
        let q = quotes(Price(600_00));
        let short_sell = plan(&state(0, vec![]), &target(-1000), &q, &ExecutionConfig::default());
        let Action::Create(req) = &short_sell.actions[0] else {
            panic!("expected create");
        };
        assert_eq!(req.condition, OrderCondition::Short);

        let margin = ExecutionConfig {
            margin_trading: true,
            ..ExecutionConfig::default()
        };
        let long = plan(&state(0, vec![]), &target(1000), &q, &margin);
        let Action::Create(req) = &long.actions[0] else {
            panic!("expected create");
        };
        assert_eq!(req.condition, OrderCondition::Margin);

        let day = ExecutionConfig {
            day_trade_enabled: true,
            ..ExecutionConfig::default()
        };
        let dt = plan(&state(0, vec![]), &target(1000), &q, &day);
        let Action::Create(req) = &dt.actions[0] else {
            panic!("expected create");
        };
        assert_eq!(req.condition, OrderCondition::DayTrade);
    }

    #[test]
    fn extra_bid_moves_price_along_ladder() {
        let config = ExecutionConfig {
            extra_bid_pct: 0.05,
            ..ExecutionConfig::default()
        };
        let buy = plan(&state(0, vec![]), &target(1000), &quotes(Price(600_00)), &config);
        let Action::Create(req) = &buy.actions[0] else {
            panic!("expected create");
        };
        assert_eq!(req.price, Some(Price(630_00)));

        let sell = plan(&state(1000, vec![]), &target(0), &quotes(Price(600_00)), &config);
        let Action::Create(req) = &sell.actions[0] else {
            panic!("expected create");
        };
        assert_eq!(req.price, Some(Price(570_00)));
    }

    #[test]
    fn plan_display_lists_actions() {
        let plan = plan(
            &state(0, vec![]),
            &target(1000),
            &quotes(Price(600_00)),
            &ExecutionConfig::default(),
        );
        let text = plan.to_string();
        assert!(text.contains("CREATE BUY 2330 x 1000 @ 600.00"));
    }

    // ========================================================================
    // Crossing zero
    // ========================================================================

    #[test]
    fn long_to_short_splits_by_condition() {
        let plan = plan(
            &state(1000, vec![]),
            &target(-1000),
            &quotes(Price(600_00)),
            &ExecutionConfig::default(),
        );
        assert_eq!(
            creates(&plan),
            vec![
                (Side::Sell, OrderCondition::Cash, 1000),
                (Side::Sell, OrderCondition::Short, 1000),
            ]
        );
        assert_eq!(plan.net_delta(&tsmc()), -2000);
    }

    #[test]
    fn short_to_long_splits_by_condition() {
        let margin = ExecutionConfig {
            margin_trading: true,
            ..ExecutionConfig::default()
        };
        let plan = plan(&state(-1000, vec![]), &target(2000), &quotes(Price(600_00)), &margin);
        assert_eq!(
            creates(&plan),
            vec![
                (Side::Buy, OrderCondition::Short, 1000),
                (Side::Buy, OrderCondition::Margin, 2000),
            ]
        );
    }

    #[test]
    fn crossing_with_day_trading_is_one_order() {
        let day = ExecutionConfig {
            day_trade_enabled: true,
            ..ExecutionConfig::default()
        };
        let plan = plan(&state(1000, vec![]), &target(-1000), &quotes(Price(600_00)), &day);
        assert_eq!(creates(&plan), vec![(Side::Sell, OrderCondition::DayTrade, 2000)]);
    }

    #[test]
    fn working_short_order_counts_toward_its_leg() {
        let mut short = resting("S", Side::Sell, 1000, Price(600_00), 0);
        short.condition = OrderCondition::Short;
        let plan = plan(
            &state(1000, vec![short]),
            &target(-1000),
            &quotes(Price(600_00)),
            &ExecutionConfig::default(),
        );
        assert_eq!(creates(&plan), vec![(Side::Sell, OrderCondition::Cash, 1000)]);
        assert_eq!(plan.actions.len(), 1);
    }

    #[test]
    fn crossing_odd_legs_reported_separately() {
        let plan = plan(
            &state(500, vec![]),
            &target(-1500),
            &quotes(Price(600_00)),
            &ExecutionConfig::default(),
        );
        assert_eq!(creates(&plan), vec![(Side::Sell, OrderCondition::Short, 1000)]);
        let conditions: Vec<(OrderCondition, Quantity)> =
            plan.residuals.iter().map(|r| (r.condition, r.shares)).collect();
        assert_eq!(
            conditions,
            vec![(OrderCondition::Cash, 500), (OrderCondition::Short, 500)]
        );
    }

    // ========================================================================
    // Unplannable symbols
    // ========================================================================

    #[test]
    fn order_without_id_skips_symbol() {
        let mut unknown = resting("X", Side::Sell, 1000, Price(600_00), 0);
        unknown.id = None;
        let plan = plan(
            &state(0, vec![unknown]),
            &target(2000),
            &quotes(Price(600_00)),
            &ExecutionConfig::default(),
        );
        assert!(plan.is_empty());
        assert_eq!(
            plan.skipped,
            vec![SkippedSymbol {
                symbol: tsmc(),
                reason: SkipReason::UnidentifiedOrder,
            }]
        );
    }

    #[test]
    fn overflowing_gap_skips_symbol() {
        let plan = plan(
            &state(1, vec![]),
            &TargetAllocation::new().with(tsmc(), i64::MIN),
            &quotes(Price(600_00)),
            &ExecutionConfig::default(),
        );
        assert!(plan.is_empty());
        assert_eq!(plan.skipped[0].reason, SkipReason::QuantityOverflow);

        let edge = super::plan(
            &state(0, vec![]),
            &TargetAllocation::new().with(tsmc(), i64::MIN),
            &quotes(Price(600_00)),
            &ExecutionConfig::default(),
        );
        assert_eq!(edge.skipped[0].reason, SkipReason::QuantityOverflow);
    }

    // ========================================================================
    // Queue priority
    // ========================================================================

    #[test]
    fn recency_follows_placement_not_last_report() {
        // Older order filled recently, so its last report is the newest.
        let mut old = resting("OLD", Side::Buy, 3000, Price(600_00), 0);
        old.filled_quantity = 1000;
        old.status = OrderStatus::PartiallyFilled;
        old.updated_at = DateTime::<Utc>::UNIX_EPOCH + Duration::seconds(100);
        let new = resting("NEW", Side::Buy, 1000, Price(600_00), 10);

        let plan = plan(
            &state(0, vec![old, new]),
            &target(2000),
            &quotes(Price(600_00)),
            &ExecutionConfig::default(),
        );
        assert_eq!(
            plan.actions,
            vec![Action::Cancel {
                order_id: OrderId::new("NEW"),
                symbol: tsmc(),
                side: Side::Buy,
                remaining: 1000,
            }]
        );
    }

    // ========================================================================
    // Side filters and progress
    // ========================================================================

    #[test]
    fn buy_only_leaves_selling_symbols_alone() {
        let config = ExecutionConfig {
            buy_only: true,
            ..ExecutionConfig::default()
        };
        let stray = resting("B", Side::Buy, 1000, Price(600_00), 0);
        let sell = plan(&state(2000, vec![stray]), &target(0), &quotes(Price(600_00)), &config);
        assert!(sell.is_empty());
        assert!(sell.skipped.is_empty());

        let buy = plan(&state(0, vec![]), &target(1000), &quotes(Price(600_00)), &config);
        assert_eq!(creates(&buy), vec![(Side::Buy, OrderCondition::Cash, 1000)]);
    }

    #[test]
    fn sell_only_leaves_buying_symbols_alone() {
        let config = ExecutionConfig {
            sell_only: true,
            ..ExecutionConfig::default()
        };
        let buy = plan(&state(0, vec![]), &target(1000), &quotes(Price(600_00)), &config);
        assert!(buy.is_empty());
    }

    #[test]
    fn progress_trades_a_fraction_in_whole_lots() {
        let half = ExecutionConfig {
            progress: 0.5,
            ..ExecutionConfig::default()
        };
        let plan_half = plan(&state(0, vec![]), &target(4000), &quotes(Price(600_00)), &half);
        assert_eq!(creates(&plan_half), vec![(Side::Buy, OrderCondition::Cash, 2000)]);

        let odd = plan(&state(0, vec![]), &target(2345), &quotes(Price(600_00)), &half);
        assert_eq!(creates(&odd), vec![(Side::Buy, OrderCondition::Cash, 1000)]);
        assert!(odd.residuals.is_empty());

        let none = ExecutionConfig {
            progress: 0.0,
            ..ExecutionConfig::default()
        };
        let idle = plan(&state(0, vec![]), &target(4000), &quotes(Price(600_00)), &none);
        assert!(idle.is_empty());
    }

    #[test]
    fn progress_with_odd_lots_rounds_to_shares() {
        let config = ExecutionConfig {
            progress: 0.5,
            allow_odd_lot: true,
            ..ExecutionConfig::default()
        };
        let plan = plan(&state(0, vec![]), &target(2345), &quotes(Price(600_00)), &config);
        assert_eq!(plan.net_delta(&tsmc()), 1173);
    }

    // ========================================================================
    // Price band
    // ========================================================================

    #[test]
    fn price_limit_posts_at_band_edges() {
        let config = ExecutionConfig {
            pricing_mode: PricingMode::PriceLimit,
            ..ExecutionConfig::default()
        };
        let q = banded(Price(600_00), Price(660_00), Price(540_00));
        let buy = plan(&state(0, vec![]), &target(1000), &q, &config);
        let Action::Create(req) = &buy.actions[0] else {
            panic!("expected create");
        };
        assert_eq!(req.price, Some(Price(540_00)));

        let sell = plan(&state(1000, vec![]), &target(0), &q, &config);
        let Action::Create(req) = &sell.actions[0] else {
            panic!("expected create");
        };
        assert_eq!(req.price, Some(Price(660_00)));

        let unbanded = plan(&state(0, vec![]), &target(1000), &quotes(Price(600_00)), &config);
        assert!(unbanded.is_empty());
        assert_eq!(
            unbanded.skipped[0].reason,
            SkipReason::Quote(BrokerError::QuoteUnavailable(tsmc()))
        );
    }

    #[test]
    fn extra_bid_clamped_to_band() {
        let config = ExecutionConfig {
            extra_bid_pct: 0.1,
            ..ExecutionConfig::default()
        };
        let q = banded(Price(600_00), Price(650_00), Price(540_00));
        let buy = plan(&state(0, vec![]), &target(1000), &q, &config);
        let Action::Create(req) = &buy.actions[0] else {
            panic!("expected create");
        };
        assert_eq!(req.price, Some(Price(650_00)));

        let sell = plan(&state(1000, vec![]), &target(0), &q, &config);
        let Action::Create(req) = &sell.actions[0] else {
            panic!("expected create");
        };
        assert_eq!(req.price, Some(Price(540_00)));
    }

    // ========================================================================
    // Repricing
    // ========================================================================

    #[test]
    fn reprice_chases_stale_limit_orders() {
        let config = ExecutionConfig {
            extra_bid_pct: 0.01,
            ..ExecutionConfig::default()
        };
        let mut market = resting("M", Side::Buy, 1000, Price(600_00), 2);
        market.price = None;
        let orders = vec![
            resting("B", Side::Buy, 1000, Price(590_00), 0),
            resting("S", Side::Sell, 1000, Price(594_00), 1),
            market,
        ];
        let plan = reprice(&state(0, orders), &quotes(Price(600_00)), &config);
        assert_eq!(
            plan.actions,
            vec![Action::UpdatePrice {
                order_id: OrderId::new("B"),
                symbol: tsmc(),
                side: Side::Buy,
                from: Some(Price(590_00)),
                to: Price(606_00),
            }]
        );
        assert_eq!(plan.net_delta(&tsmc()), 0);
    }

    #[test]
    fn reprice_skips_symbols_it_cannot_price() {
        let order = resting("B", Side::Buy, 1000, Price(590_00), 0);
        let plan = reprice(&state(0, vec![order]), &BTreeMap::new(), &ExecutionConfig::default());
        assert!(plan.is_empty());
        assert_eq!(
            plan.skipped[0].reason,
            SkipReason::Quote(BrokerError::QuoteUnavailable(tsmc()))
        );

        let market = ExecutionConfig {
            pricing_mode: PricingMode::Market,
            ..ExecutionConfig::default()
        };
        let order = resting("B", Side::Buy, 1000, Price(590_00), 0);
        assert_eq!(
            reprice(&state(0, vec![order]), &BTreeMap::new(), &market),
            Plan::default()
        );
    }
}
