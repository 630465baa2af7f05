//! Tick ladder and price chasing.
//!
//! Valid limit prices step by a tick that widens with the price level
//! (Taiwan equity ladder):
//!
//! | Price      | Tick |
//! |------------|------|
//! | <= 10      | 0.01 |
//! | <= 50      | 0.05 |
//! | <= 100     | 0.10 |
//! | <= 500     | 0.50 |
//! | <= 1000    | 1.00 |
//! | > 1000     | 5.00 |

use crate::Price;

/// Tick size in cents at a price level.
pub fn tick_size(price: Price) -> i64 {
    tick_for_cents(price.0 as f64)
}

fn tick_for_cents(cents: f64) -> i64 {
    if cents <= 10_00.0 {
        1
    } else if cents <= 50_00.0 {
        5
    } else if cents <= 100_00.0 {
        10
    } else if cents <= 500_00.0 {
        50
    } else if cents <= 1000_00.0 {
        100
    } else {
        500
    }
}

/// Round down onto the ladder.
pub fn floor_to_tick(price: Price) -> Price {
    let tick = tick_size(price);
    Price(price.0.div_euclid(tick) * tick)
}

/// Round up onto the ladder.
pub fn ceil_to_tick(price: Price) -> Price {
    let tick = tick_size(price);
    let floored = price.0.div_euclid(tick) * tick;
    if floored == price.0 {
        price
    } else {
        Price(floored + tick)
    }
}

/// Move `price` by `pct` (e.g. `0.05` = +5%) and snap it onto the ladder.
///
/// Upward moves round down and downward moves round up, so the result never
/// overshoots the requested adjustment.
pub fn apply_extra_bid(price: Price, pct: f64) -> Price {
    if pct == 0.0 {
        return price;
    }
    // Three decimals of a cent absorbs float noise such as 10.499999.
    let raw = (price.0 as f64 * (1.0 + pct) * 1000.0).round() / 1000.0;
    let tick = tick_for_cents(raw) as f64;
    let snapped = if pct > 0.0 {
        (raw / tick).floor() * tick
    } else {
        (raw / tick).ceil() * tick
    };
    Price(snapped as i64)
}
