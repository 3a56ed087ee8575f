//! Position ledger: lot-based (FIFO) cost-basis accounting.
//!
//! One [`CurrencyPosition`] exists per (owner, currency). Buys append lots,
//! sells consume them oldest-first, and realized P&L is settled trade by
//! trade. The [`PositionLedger`] routes settlement events and observed
//! trades to positions and owns terminal liquidation.

pub mod book;
pub mod lot;
pub mod position;

pub use book::PositionLedger;
pub use lot::Lot;
pub use position::{CurrencyPosition, SellOutcome, TradeLogEntry, TradeLogKind};
