//! Core types and configuration for the crash-trader system.
//!
//! This crate provides shared types used across all other crates:
//! - Game feed types (state snapshots, observed trades, phases)
//! - Trade intents, settlement events, and the typed event bus
//! - Configuration structures (risk limits, simulation parameters)
//! - Common error types

pub mod bus;
pub mod config;
pub mod error;
pub mod events;
pub mod types;

pub use bus::{EventBus, EventCategory, SubscribeOptions, SubscriberId};
pub use config::{GlobalLimits, PresaleOverride, RiskLimits, SimConfig, StrategyLimits};
pub use error::{Error, Result};
pub use events::{BusMessage, ExposureView, IntentSize, LimitBreach, SettlementEvent, TradeIntent};
pub use types::*;
