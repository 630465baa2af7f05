//! Execution orchestrator: snapshot → quotes → plan → execute.
//!
//! This is the unified entry point that ties the planner to a broker
//! adapter. One failed action never aborts the batch: every outcome is
//! recorded in the [`ExecutionReport`] and the caller decides what to do.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use log::{error, info, warn};
use rustc_hash::FxHashMap;
use serde::Serialize;
use spotsync::{Order, OrderId, Stock, Symbol};
use spotsync_broker::{AccountState, Broker, BrokerError};

use crate::account::Account;
use crate::config::{Config, ExecutionConfig, PricingMode};
use crate::error::{Error, Result};
use crate::plan::{self, Action, Plan, Residual, SkipReason, SkippedSymbol};
use crate::retry::RetryPolicy;
use crate::target::TargetAllocation;

/// Cooperative cancellation for a rebalance run.
///
/// Once cancelled, no new action is issued. Orders already acknowledged by
/// the broker are left alone.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// What happened to one planned action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum ActionOutcome {
    /// Create or update accepted; the order as the broker now reports it
    Succeeded(Order),
    /// Cancel acknowledged
    Cancelled,
    /// Nothing to do, e.g. cancelling an order that already filled
    NoOp(String),
    Failed(BrokerError),
    Skipped(SkipReason),
}

impl ActionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            ActionOutcome::Succeeded(_) | ActionOutcome::Cancelled | ActionOutcome::NoOp(_)
        )
    }
}

impl fmt::Display for ActionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionOutcome::Succeeded(order) => write!(f, "OK {order}"),
            ActionOutcome::Cancelled => f.write_str("CANCELLED"),
            ActionOutcome::NoOp(reason) => write!(f, "NO-OP ({reason})"),
            ActionOutcome::Failed(e) => write!(f, "FAILED: {e}"),
            ActionOutcome::Skipped(reason) => write!(f, "SKIPPED: {reason}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionRecord {
    pub action: Action,
    pub outcome: ActionOutcome,
}

/// Everything one rebalance did, in plan order.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionReport {
    pub account: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub plan: Plan,
    pub outcomes: Vec<ActionRecord>,
    /// Fatal broker error that stopped the run part-way, if any.
    pub aborted: Option<BrokerError>,
}

impl ExecutionReport {
    pub fn succeeded(&self) -> impl Iterator<Item = &ActionRecord> {
        self.outcomes.iter().filter(|r| r.outcome.is_success())
    }

    pub fn failed(&self) -> impl Iterator<Item = &ActionRecord> {
        self.outcomes
            .iter()
            .filter(|r| matches!(r.outcome, ActionOutcome::Failed(_)))
    }

    pub fn skipped_actions(&self) -> impl Iterator<Item = &ActionRecord> {
        self.outcomes
            .iter()
            .filter(|r| matches!(r.outcome, ActionOutcome::Skipped(_)))
    }

    /// Symbols left out of the plan entirely.
    pub fn skipped(&self) -> &[SkippedSymbol] {
        &self.plan.skipped
    }

    pub fn residuals(&self) -> &[Residual] {
        &self.plan.residuals
    }

    /// Outcomes for one symbol, in execution order.
    pub fn for_symbol(&self, symbol: &Symbol) -> Vec<&ActionRecord> {
        self.outcomes
            .iter()
            .filter(|r| r.action.symbol() == *symbol)
            .collect()
    }

    /// Every action succeeded and no symbol was skipped.
    pub fn is_clean(&self) -> bool {
        self.aborted.is_none()
            && self.plan.skipped.is_empty()
            && self.outcomes.iter().all(|r| r.outcome.is_success())
    }
}

impl fmt::Display for ExecutionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "EXECUTION REPORT ({}):", self.account)?;
        if self.outcomes.is_empty() {
            writeln!(f, "  No actions needed.")?;
        }
        for (i, r) in self.outcomes.iter().enumerate() {
            writeln!(f, "  {:>3}  {}", i + 1, r.action)?;
            writeln!(f, "       -> {}", r.outcome)?;
        }
        for r in &self.plan.residuals {
            writeln!(
                f,
                "  residual: {} {} x {} {} below lot size {}",
                r.side, r.symbol, r.shares, r.condition, r.lot_size
            )?;
        }
        for s in &self.plan.skipped {
            writeln!(f, "  skipped: {} ({})", s.symbol, s.reason)?;
        }
        if let Some(e) = &self.aborted {
            writeln!(f, "  ABORTED: {e}")?;
        }
        writeln!(
            f,
            "\n{} succeeded, {} failed, {} skipped",
            self.succeeded().count(),
            self.failed().count(),
            self.skipped_actions().count() + self.plan.skipped.len(),
        )
    }
}

/// Rebalance with the retry policy from `config` and no cancellation.
pub fn rebalance<B: Broker + Sync>(
    account: &mut Account<B>,
    target: &TargetAllocation,
    config: &Config,
) -> Result<ExecutionReport> {
    rebalance_with(
        account,
        target,
        &config.execution,
        &RetryPolicy::from(&config.retry),
        &CancelToken::new(),
    )
}

/// Move `account` toward `target`.
///
/// Captures one snapshot up front and plans against it; nothing is
/// re-queried mid-run. Returns `Err` only when that snapshot cannot be
/// taken (auth failure, or connection retries exhausted) or quoting hits an
/// auth failure. Everything else lands in the report.
///
/// Actions for one symbol run strictly in plan order. Independent symbols
/// run on the rayon pool when the `parallel` feature is enabled.
pub fn rebalance_with<B: Broker + Sync>(
    account: &mut Account<B>,
    target: &TargetAllocation,
    config: &ExecutionConfig,
    retry: &RetryPolicy,
    cancel: &CancelToken,
) -> Result<ExecutionReport> {
    run(
        account,
        config,
        retry,
        cancel,
        |state| plan::universe(state, target),
        |state, quotes| plan::plan(state, target, quotes, config),
    )
}

/// Chase every live limit order to the current target price, with the
/// retry policy from `config`.
pub fn reprice_open_orders<B: Broker + Sync>(
    account: &mut Account<B>,
    config: &Config,
) -> Result<ExecutionReport> {
    reprice_open_orders_with(
        account,
        &config.execution,
        &RetryPolicy::from(&config.retry),
        &CancelToken::new(),
    )
}

/// Reprice working orders only; quantities and positions are left alone.
pub fn reprice_open_orders_with<B: Broker + Sync>(
    account: &mut Account<B>,
    config: &ExecutionConfig,
    retry: &RetryPolicy,
    cancel: &CancelToken,
) -> Result<ExecutionReport> {
    run(
        account,
        config,
        retry,
        cancel,
        plan::working_symbols,
        |state, quotes| plan::reprice(state, quotes, config),
    )
}

/// Snapshot, quote `symbols(state)`, plan, then execute per symbol.
fn run<B, S, P>(
    account: &mut Account<B>,
    config: &ExecutionConfig,
    retry: &RetryPolicy,
    cancel: &CancelToken,
    symbols: S,
    planner: P,
) -> Result<ExecutionReport>
where
    B: Broker + Sync,
    S: FnOnce(&AccountState) -> Vec<Symbol>,
    P: FnOnce(&AccountState, &BTreeMap<Symbol, Stock>) -> Plan,
{
    let started_at = Utc::now();
    let state = account.refresh(retry)?.clone();
    let account_id = account.id().to_string();
    let fatal = |source: BrokerError| Error::Broker {
        account: account_id.clone(),
        source,
    };

    let symbols = symbols(&state);
    let mut quotes = BTreeMap::new();
    let mut quote_errors: FxHashMap<Symbol, BrokerError> = FxHashMap::default();
    if config.pricing_mode != PricingMode::Market {
        for symbol in &symbols {
            match retry.run("quote", || account.broker().quote(symbol)) {
                Ok(quote) => {
                    quotes.insert(*symbol, quote);
                }
                Err(e) if e.is_fatal() => return Err(fatal(e)),
                Err(e) => {
                    warn!("{symbol}: no quote: {e}");
                    quote_errors.insert(*symbol, e);
                }
            }
        }
    }

    let mut plan = planner(&state, &quotes);
    for skipped in &mut plan.skipped {
        let quote_error = match skipped.reason {
            SkipReason::Quote(_) => quote_errors.remove(&skipped.symbol),
            _ => None,
        };
        if let Some(e) = quote_error {
            skipped.reason = SkipReason::Quote(e);
        }
        warn!("{}: skipped: {}", skipped.symbol, skipped.reason);
    }
    for r in &plan.residuals {
        warn!(
            "{}: {} shares {} below lot size {} not routed (odd lots disabled)",
            r.symbol, r.shares, r.condition, r.lot_size
        );
    }
    info!(
        "{}: {} actions across {} symbols",
        account_id,
        plan.len(),
        symbols.len()
    );

    let abort = Abort::default();
    let outcomes = execute_plan(account.broker(), &plan, retry, cancel, &abort);

    for record in &outcomes {
        if let ActionOutcome::Succeeded(order) = &record.outcome {
            if let Err(e) = account.tracker_mut().record(order.clone()) {
                error!("{account_id}: cannot track {order}: {e}");
            }
        }
    }

    Ok(ExecutionReport {
        account: account_id,
        started_at,
        finished_at: Utc::now(),
        plan,
        outcomes,
        aborted: abort.take(),
    })
}

/// First fatal error seen by any group; stops every group.
#[derive(Default)]
struct Abort {
    tripped: AtomicBool,
    error: std::sync::Mutex<Option<BrokerError>>,
}

impl Abort {
    fn trip(&self, e: &BrokerError) {
        if !self.tripped.swap(true, Ordering::SeqCst) {
            let mut slot = self
                .error
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            *slot = Some(e.clone());
        }
    }

    fn is_tripped(&self) -> bool {
        self.tripped.load(Ordering::SeqCst)
    }

    fn take(self) -> Option<BrokerError> {
        self.error
            .into_inner()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[cfg(not(feature = "parallel"))]
fn execute_plan<B: Broker + Sync>(
    broker: &B,
    plan: &Plan,
    retry: &RetryPolicy,
    cancel: &CancelToken,
    abort: &Abort,
) -> Vec<ActionRecord> {
    plan.by_symbol()
        .iter()
        .flat_map(|(_, group)| execute_group(broker, group, retry, cancel, abort))
        .collect()
}

#[cfg(feature = "parallel")]
fn execute_plan<B: Broker + Sync>(
    broker: &B,
    plan: &Plan,
    retry: &RetryPolicy,
    cancel: &CancelToken,
    abort: &Abort,
) -> Vec<ActionRecord> {
    use rayon::prelude::*;

    let groups = plan.by_symbol();
    let per_symbol: Vec<Vec<ActionRecord>> = groups
        .par_iter()
        .map(|(_, group)| execute_group(broker, group, retry, cancel, abort))
        .collect();
    per_symbol.into_iter().flatten().collect()
}

/// Run one symbol's actions in order.
///
/// A cancel that the broker does not acknowledge blocks the rest of the
/// group: creating the replacement could double the exposure.
fn execute_group<B: Broker>(
    broker: &B,
    group: &[Action],
    retry: &RetryPolicy,
    cancel: &CancelToken,
    abort: &Abort,
) -> Vec<ActionRecord> {
    let mut records = Vec::with_capacity(group.len());
    let mut blocked_by: Option<OrderId> = None;

    for action in group {
        let outcome = if cancel.is_cancelled() || abort.is_tripped() {
            ActionOutcome::Skipped(SkipReason::Cancelled)
        } else if let Some(id) = &blocked_by {
            ActionOutcome::Skipped(SkipReason::CancelNotAcknowledged(id.clone()))
        } else {
            execute_action(broker, action, retry)
        };

        match &outcome {
            ActionOutcome::Failed(e) => {
                error!("{action}: {e}");
                if e.is_fatal() {
                    abort.trip(e);
                }
                if let Action::Cancel { order_id, .. } = action {
                    blocked_by = Some(order_id.clone());
                }
            }
            ActionOutcome::Skipped(reason) => warn!("{action}: skipped: {reason}"),
            ok => info!("{action}: {ok}"),
        }

        records.push(ActionRecord {
            action: action.clone(),
            outcome,
        });
    }
    records
}

fn execute_action<B: Broker>(broker: &B, action: &Action, retry: &RetryPolicy) -> ActionOutcome {
    let result = match action {
        Action::Create(request) => retry
            .run("place_order", || broker.place_order(request))
            .map(ActionOutcome::Succeeded),
        Action::UpdatePrice { order_id, to, .. } => retry
            .run("update_order", || broker.update_order(order_id, Some(*to), None))
            .map(ActionOutcome::Succeeded),
        Action::UpdateQuantity { order_id, to, .. } => retry
            .run("update_order", || broker.update_order(order_id, None, Some(*to)))
            .map(ActionOutcome::Succeeded),
        Action::Cancel { order_id, .. } => {
            match retry.run("cancel_order", || broker.cancel_order(order_id)) {
                Ok(()) => Ok(ActionOutcome::Cancelled),
                // Already filled, cancelled or gone: the intent holds.
                Err(e) if e.is_benign_cancel() => Ok(ActionOutcome::NoOp(e.to_string())),
                Err(e) => Err(e),
            }
        }
    };
    result.unwrap_or_else(ActionOutcome::Failed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use spotsync::{OrderStatus, Price};
    use spotsync_broker::mock::{CallKind, MockBroker};

    fn tsmc() -> Symbol {
        Symbol::new("2330")
    }

    fn quote() -> Stock {
        Stock::new(tsmc())
            .with_last(Price(600_00))
            .with_bid(Price(599_00), 10)
            .with_ask(Price(601_00), 10)
    }

    #[test]
    fn cancel_token_is_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!token.is_cancelled());
        clone.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn benign_cancel_failure_is_noop() {
        let broker = MockBroker::builder()
            .with_quote(quote())
            .fail_next(
                CallKind::Cancel,
                None,
                BrokerError::OrderNotCancelable(OrderId::new("X")),
            )
            .build();
        let action = Action::Cancel {
            order_id: OrderId::new("X"),
            symbol: tsmc(),
            side: spotsync::Side::Buy,
            remaining: 1000,
        };
        let outcome = execute_action(&broker, &action, &RetryPolicy::none());
        assert!(matches!(outcome, ActionOutcome::NoOp(_)));
        assert!(outcome.is_success());
    }

    #[test]
    fn failed_cancel_blocks_rest_of_symbol() {
        let broker = MockBroker::builder()
            .fail_next(
                CallKind::Cancel,
                None,
                BrokerError::RejectedOrder("locked".into()),
            )
            .build();
        let group = vec![
            Action::Cancel {
                order_id: OrderId::new("S1"),
                symbol: tsmc(),
                side: spotsync::Side::Sell,
                remaining: 1000,
            },
            Action::Create(spotsync::OrderRequest {
                symbol: tsmc(),
                side: spotsync::Side::Buy,
                condition: spotsync::OrderCondition::Cash,
                price: Some(Price(600_00)),
                quantity: 1000,
                odd_lot: false,
            }),
        ];
        let records = execute_group(
            &broker,
            &group,
            &RetryPolicy::none(),
            &CancelToken::new(),
            &Abort::default(),
        );
        assert!(matches!(records[0].outcome, ActionOutcome::Failed(_)));
        assert_eq!(
            records[1].outcome,
            ActionOutcome::Skipped(SkipReason::CancelNotAcknowledged(OrderId::new("S1")))
        );
        assert!(broker.orders().is_empty());
    }

    #[test]
    fn report_counts() {
        let broker = MockBroker::builder().with_quote(quote()).build();
        let mut account = Account::new("acct", broker);
        let target = TargetAllocation::new().with(tsmc(), 2000);
        let report = rebalance_with(
            &mut account,
            &target,
            &ExecutionConfig::default(),
            &RetryPolicy::none(),
            &CancelToken::new(),
        )
        .unwrap();
        assert!(report.is_clean());
        assert_eq!(report.succeeded().count(), 1);
        let ActionOutcome::Succeeded(order) = &report.outcomes[0].outcome else {
            panic!("expected success");
        };
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(account.tracker().len(), 1);
        assert!(report.to_string().contains("1 succeeded, 0 failed, 0 skipped"));
    }

    #[test]
    fn rebalance_uses_configured_retry_bound() {
        let broker = MockBroker::builder()
            .with_quote(quote())
            .connection_failures(5)
            .build();
        let mut account = Account::new("acct", &broker);
        let mut config = Config::default();
        config.retry.retry_bound = 1;
        config.retry.backoff_base_ms = 0;
        config.retry.backoff_max_ms = 0;
        let target = TargetAllocation::new().with(tsmc(), 1000);

        let err = rebalance(&mut account, &target, &config).unwrap_err();
        assert!(matches!(
            err,
            Error::Broker {
                source: BrokerError::Connection(_),
                ..
            }
        ));
        assert_eq!(broker.calls().len(), 2);
    }

    #[test]
    fn reprice_moves_only_prices() {
        let broker = MockBroker::builder().with_quote(quote()).build();
        let placed = broker
            .place_order(&spotsync::OrderRequest {
                symbol: tsmc(),
                side: spotsync::Side::Buy,
                condition: spotsync::OrderCondition::Cash,
                price: Some(Price(590_00)),
                quantity: 2000,
                odd_lot: false,
            })
            .unwrap();
        let id = placed.id.unwrap();
        let mut account = Account::new("acct", &broker);

        let report = reprice_open_orders(&mut account, &Config::default()).unwrap();
        assert!(report.is_clean());
        assert_eq!(report.outcomes.len(), 1);
        let moved = broker.order(&id).unwrap();
        assert_eq!(moved.price, Some(Price(600_00)));
        assert_eq!(moved.quantity, 2000);
        assert_eq!(broker.position(&tsmc()), 0);
    }
}
