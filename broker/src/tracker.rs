//! Order state tracking.
//!
//! Turns broker-native order reports into canonical [`Order`]s and keeps the
//! latest known state per order id. Ingestion is idempotent: replaying a
//! report changes nothing, and reports that would move an order backwards
//! (stale, out-of-order notifications) are ignored.

use log::{debug, warn};
use rustc_hash::{FxHashMap, FxHashSet};
use spotsync::{LotSize, LotSizes, Order, OrderId, OrderStatus, Quantity};

use crate::error::TrackerError;
use crate::types::{NativeOrder, QuantityUnit};

/// Explicit, total mapping from a broker's status vocabulary to [`OrderStatus`].
///
/// Lookups of anything not in the table fail; there is no fallback status.
#[derive(Debug, Clone, Default)]
pub struct StatusTable {
    entries: FxHashMap<String, OrderStatus>,
}

impl StatusTable {
    /// Build a table from `(native, canonical)` pairs. Each native status may appear once.
    pub fn from_pairs<'a, I>(pairs: I) -> Result<Self, TrackerError>
    where
        I: IntoIterator<Item = (&'a str, OrderStatus)>,
    {
        let mut entries = FxHashMap::default();
        for (native, status) in pairs {
            if entries.insert(native.to_string(), status).is_some() {
                return Err(TrackerError::DuplicateStatus(native.to_string()));
            }
        }
        Ok(Self { entries })
    }

    /// Canonical statuses under their own names (`"PENDING"`, `"FILLED"`, ...).
    pub fn canonical() -> Self {
        let statuses = [
            OrderStatus::New,
            OrderStatus::Pending,
            OrderStatus::PartiallyFilled,
            OrderStatus::Filled,
            OrderStatus::Cancelled,
            OrderStatus::Failed,
        ];
        Self {
            entries: statuses.iter().map(|s| (s.to_string(), *s)).collect(),
        }
    }

    pub fn lookup(&self, native: &str) -> Result<OrderStatus, TrackerError> {
        self.entries
            .get(native)
            .copied()
            .ok_or_else(|| TrackerError::UnknownOrderStatus(native.to_string()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn to_shares(qty: Quantity, unit: QuantityUnit, lot: LotSize) -> Result<Quantity, TrackerError> {
    match unit {
        QuantityUnit::Shares => Ok(qty),
        QuantityUnit::Lots => Ok(lot.to_shares(qty)?),
    }
}

/// Normalize one native report. Pure: same input, same output.
///
/// Live statuses are reconciled with the fill counts (a fully filled order
/// is `Filled`, a partly filled one `PartiallyFilled`). A report that claims
/// `Filled` without the fills to back it is rejected.
pub fn normalize(
    native: &NativeOrder,
    table: &StatusTable,
    lot: LotSize,
) -> Result<Order, TrackerError> {
    let mapped = table.lookup(&native.status)?;
    let quantity = to_shares(native.quantity, native.unit, lot)?;
    let filled = to_shares(native.filled, native.unit, lot)?;

    let inconsistent = || TrackerError::InconsistentFill {
        id: native.id.clone().unwrap_or_else(|| OrderId::new("?")),
        status: native.status.clone(),
        filled,
        quantity,
    };

    if filled > quantity {
        return Err(inconsistent());
    }
    let complete = quantity > 0 && filled == quantity;

    let status = match mapped {
        OrderStatus::Filled if !complete => return Err(inconsistent()),
        s if s.is_live() && complete => OrderStatus::Filled,
        s if s.is_live() && filled > 0 => OrderStatus::PartiallyFilled,
        // Fill landed before the cancel/reject did.
        OrderStatus::Cancelled | OrderStatus::Failed if complete => OrderStatus::Filled,
        s => s,
    };

    let order = Order {
        id: native.id.clone(),
        symbol: native.symbol,
        side: native.side,
        condition: native.condition,
        price: native.price,
        quantity,
        filled_quantity: filled,
        status,
        odd_lot: native.odd_lot,
        created_at: native.created_at,
        updated_at: native.reported_at,
    };
    order.validate()?;
    Ok(order)
}

/// What happened to a report on ingestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ingested {
    /// First report for this id
    New,
    /// State moved forward
    Updated,
    /// Identical to the stored state
    Duplicate,
    /// Would regress status or fills; ignored
    Stale,
}

/// Latest-known state of every order seen for one account.
#[derive(Debug, Clone)]
pub struct OrderTracker {
    table: StatusTable,
    lots: LotSizes,
    orders: FxHashMap<OrderId, Order>,
}

impl OrderTracker {
    pub fn new(table: StatusTable, lots: LotSizes) -> Self {
        Self {
            table,
            lots,
            orders: FxHashMap::default(),
        }
    }

    /// Normalize and store a broker-native report.
    pub fn ingest(&mut self, native: &NativeOrder) -> Result<Ingested, TrackerError> {
        let lot = self.lots.for_symbol(&native.symbol);
        let order = normalize(native, &self.table, lot)?;
        self.record(order)
    }

    /// Store an order that is already canonical (e.g. an adapter response).
    pub fn record(&mut self, order: Order) -> Result<Ingested, TrackerError> {
        let id = order.id.clone().ok_or(TrackerError::MissingOrderId)?;
        order.validate()?;

        let Some(current) = self.orders.get_mut(&id) else {
            debug!("tracking order {id}: {}", order.status);
            self.orders.insert(id, order);
            return Ok(Ingested::New);
        };

        if same_state(current, &order) {
            return Ok(Ingested::Duplicate);
        }

        match current.advance(&order) {
            Ok(()) => Ok(Ingested::Updated),
            Err(_) => {
                warn!(
                    "ignoring stale report for {id}: {} {}/{} after {} {}/{}",
                    order.status,
                    order.filled_quantity,
                    order.quantity,
                    current.status,
                    current.filled_quantity,
                    current.quantity,
                );
                Ok(Ingested::Stale)
            }
        }
    }

    pub fn get(&self, id: &OrderId) -> Option<&Order> {
        self.orders.get(id)
    }

    /// Drop live orders the broker no longer lists as open.
    ///
    /// `open` is the id set of a fresh snapshot. A tracked order missing from
    /// it filled or was cancelled out of band, so it stops counting as
    /// working. Terminal orders stay for stale-report detection. Returns the
    /// number of orders dropped.
    pub fn retire_missing<'a, I>(&mut self, open: I) -> usize
    where
        I: IntoIterator<Item = &'a OrderId>,
    {
        let open: FxHashSet<&OrderId> = open.into_iter().collect();
        let before = self.orders.len();
        self.orders.retain(|id, order| {
            let keep = !order.is_live() || open.contains(id);
            if !keep {
                debug!("retiring order {id}: no longer open at the broker");
            }
            keep
        });
        before - self.orders.len()
    }

    /// Live orders, sorted by id for stable output.
    pub fn open_orders(&self) -> Vec<Order> {
        let mut open: Vec<Order> = self
            .orders
            .values()
            .filter(|o| o.is_live())
            .cloned()
            .collect();
        open.sort_by(|a, b| a.id.cmp(&b.id));
        open
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }
}

/// Equal in everything but the report timestamp.
fn same_state(a: &Order, b: &Order) -> bool {
    a.status == b.status
        && a.filled_quantity == b.filled_quantity
        && a.quantity == b.quantity
        && a.price == b.price
        && a.side == b.side
        && a.condition == b.condition
        && a.odd_lot == b.odd_lot
}
