//! Core types: Price, Quantity, OrderId, Symbol

use std::fmt;

/// Price in smallest units (cents).
///
/// `Price(10050)` represents 100.50. Using fixed-point keeps tolerance
/// comparisons and tick rounding exact.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Price(pub i64);

impl Price {
    pub const ZERO: Price = Price(0);

    /// Convert a decimal amount (e.g. `10.05`) to cents, rounding to nearest.
    pub fn from_f64(value: f64) -> Price {
        Price((value * 100.0).round() as i64)
    }

    /// The price as a decimal amount.
    pub fn as_f64(self) -> f64 {
        self.0 as f64 / 100.0
    }

    /// Absolute distance between two prices.
    #[inline]
    pub fn distance(self, other: Price) -> i64 {
        (self.0 - other.0).abs()
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let units = self.0 / 100;
        let cents = (self.0 % 100).abs();
        if self.0 < 0 {
            write!(f, "-{}.{:02}", units.abs(), cents)
        } else {
            write!(f, "{}.{:02}", units, cents)
        }
    }
}

/// Quantity of shares. Always positive; direction lives in [`Side`](crate::Side).
pub type Quantity = u64;

/// Opaque order identifier assigned by the broker.
///
/// Brokers hand out strings, numbers or composite keys; the core only
/// compares and hashes them.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct OrderId(pub String);

impl OrderId {
    pub fn new(id: impl Into<String>) -> Self {
        OrderId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Maximum symbol length in bytes.
pub const SYMBOL_MAX_LEN: usize = 8;

/// Ticker symbol stored inline (no heap allocation), up to 8 ASCII bytes.
///
/// Ordering is byte-wise, which keeps per-symbol iteration deterministic.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Symbol {
    bytes: [u8; SYMBOL_MAX_LEN],
    len: u8,
}

impl Symbol {
    /// Create a symbol from a string literal.
    ///
    /// # Panics
    ///
    /// Panics if `s` is empty, longer than 8 bytes, or not ASCII.
    #[track_caller]
    pub fn new(s: &str) -> Self {
        match Self::try_new(s) {
            Some(sym) => sym,
            None => panic!("invalid symbol {s:?}: must be 1..=8 ASCII bytes"),
        }
    }

    /// Create a symbol, returning `None` if `s` is empty, too long, or not ASCII.
    pub fn try_new(s: &str) -> Option<Self> {
        if s.is_empty() || s.len() > SYMBOL_MAX_LEN || !s.is_ascii() {
            return None;
        }
        let mut bytes = [0u8; SYMBOL_MAX_LEN];
        bytes[..s.len()].copy_from_slice(s.as_bytes());
        Some(Symbol {
            bytes,
            len: s.len() as u8,
        })
    }

    pub fn as_str(&self) -> &str {
        // Only ASCII bytes are ever stored.
        std::str::from_utf8(&self.bytes[..self.len as usize]).unwrap_or_default()
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Symbol({:?})", self.as_str())
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for Symbol {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for Symbol {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Symbol::try_new(&s).ok_or_else(|| {
            serde::de::Error::custom(format!("invalid symbol {s:?}: must be 1..=8 ASCII bytes"))
        })
    }
}
