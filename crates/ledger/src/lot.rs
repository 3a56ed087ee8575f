//! Purchase lots: the unit of FIFO consumption.

use crash_core::TimestampMs;
use serde::{Deserialize, Serialize};

/// A discrete, timestamped quantity of tokens acquired at a known unit cost.
///
/// Created on every buy, exclusively owned by one position, consumed
/// (partially or fully) by later sells in creation order, and removed when
/// fully consumed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lot {
    /// Remaining token quantity in this lot.
    pub quantity: f64,
    /// Cost per token at acquisition (fee included).
    pub unit_cost: f64,
    /// Remaining cost basis (`quantity * unit_cost`).
    pub total_cost: f64,
    /// When this lot was acquired (ms).
    pub entry_ts: TimestampMs,
}

impl Lot {
    /// Create a lot from a buy of `quantity` tokens for `total_cost`.
    pub fn new(quantity: f64, total_cost: f64, entry_ts: TimestampMs) -> Self {
        Self {
            quantity,
            unit_cost: total_cost / quantity,
            total_cost,
            entry_ts,
        }
    }

    /// Shrink the lot in place after a partial consumption.
    pub fn consume(&mut self, taken: f64) {
        self.quantity -= taken;
        self.total_cost = self.quantity * self.unit_cost;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_lot_unit_cost() {
        let lot = Lot::new(0.495, 1.0, 1000);
        assert_relative_eq!(lot.unit_cost, 1.0 / 0.495, epsilon = 1e-12);
        assert_relative_eq!(lot.total_cost, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_lot_consume() {
        let mut lot = Lot::new(1.0, 2.0, 1000);
        lot.consume(0.25);
        assert_relative_eq!(lot.quantity, 0.75, epsilon = 1e-12);
        assert_relative_eq!(lot.total_cost, 1.5, epsilon = 1e-12);
    }
}
