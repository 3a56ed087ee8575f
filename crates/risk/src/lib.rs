//! Risk gatekeeper: layered per-strategy and global trade limits.
//!
//! Every proposed trade is checked against the limits in a fixed order
//! before it may execute; live exposure counters are updated after each
//! settlement, strictly after the ledger (ordering enforced by the fan-out
//! dispatcher). Counters survive restarts through explicit snapshots.

pub mod exposure;
pub mod gatekeeper;

pub use exposure::{ExposureBook, ExposureSnapshot, ExposureState, SellRelease};
pub use gatekeeper::{GateDecision, RejectReason, RiskGatekeeper};
