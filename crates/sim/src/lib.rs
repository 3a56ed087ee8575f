//! Trade simulation and the settlement dispatch pipeline.
//!
//! The simulator converts buy/sell intents and the current price into
//! fee-adjusted token quantities and currency amounts; the trading context
//! wires the simulator, ledger, gatekeeper, and event bus into the single
//! pipeline both live trading and replay run through.

pub mod context;
pub mod simulator;

pub use context::{ExecutionOutcome, TradingContext};
pub use simulator::{SimRejection, TradeSimulator};
