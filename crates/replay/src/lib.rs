//! Replay orchestration: deterministic re-execution of historical sessions.
//!
//! Loads one session's recorded event streams, merges them into
//! chronological order, and drives them through the identical
//! simulator/ledger/gatekeeper pipeline used live. Each run owns isolated
//! instances, so batches can run sessions concurrently or sequentially
//! without sharing mutable state.

pub mod batch;
pub mod orchestrator;
pub mod store;
pub mod summary;

pub use batch::{run_batch, BatchReport};
pub use orchestrator::{ReplayRun, RunState, Strategy, StrategyView};
pub use store::{
    DiscreteEventKind, DiscreteEventRow, MemorySessionStore, PriceTickRow, SessionDetails,
    SessionStore, SessionSummaryRow, SqliteSessionStore,
};
pub use summary::PerformanceSummary;
