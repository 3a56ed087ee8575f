//! The trading context: one pipeline instance shared by a run.
//!
//! Re-architecture of the original's process-wide singletons: the ledger,
//! gatekeeper, simulator, and bus are explicit instances owned by a context
//! and passed by handle. The live process holds exactly one long-lived
//! context; each backtest run constructs its own, so concurrent runs never
//! share mutable state.

use std::path::Path;

use crash_core::{
    BusMessage, Error, EventBus, GameSnapshot, IntentSize, ObservedTradeEvent, Result, RiskLimits,
    SettlementEvent, SimConfig, TradeIntent, TradeKind,
};
use crash_ledger::PositionLedger;
use crash_risk::{ExposureSnapshot, GateDecision, RejectReason, RiskGatekeeper, SellRelease};
use tracing::{debug, warn};

use crate::simulator::{SimRejection, TradeSimulator};

/// What happened to one trade intent.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    /// The trade executed; the settlement has been applied and published.
    Executed(SettlementEvent),
    /// The gatekeeper rejected the trade; a breach was published.
    RejectedByGate(RejectReason),
    /// The simulator rejected the trade (bad price, phase, sizing).
    RejectedBySim(SimRejection),
}

impl ExecutionOutcome {
    pub fn is_executed(&self) -> bool {
        matches!(self, ExecutionOutcome::Executed(_))
    }
}

/// Owns the simulator, ledger, gatekeeper, and bus for one run (or for the
/// whole live process), and drives settlements through them in order.
pub struct TradingContext {
    bus: EventBus,
    ledger: PositionLedger,
    gatekeeper: RiskGatekeeper,
    simulator: TradeSimulator,
}

impl TradingContext {
    /// Fresh context with zero exposure.
    pub fn new(limits: RiskLimits, sim_config: SimConfig) -> Self {
        Self {
            bus: EventBus::new(),
            ledger: PositionLedger::new(),
            gatekeeper: RiskGatekeeper::new(limits),
            simulator: TradeSimulator::new(sim_config),
        }
    }

    /// Live-process context resuming exposure counters from a snapshot file,
    /// when one exists.
    pub fn with_restored_exposure(
        limits: RiskLimits,
        sim_config: SimConfig,
        snapshot_path: impl AsRef<Path>,
    ) -> Self {
        let path = snapshot_path.as_ref();
        let gatekeeper = match ExposureSnapshot::load(path) {
            Ok(snapshot) => {
                debug!(path = %path.display(), "restored exposure counters");
                RiskGatekeeper::with_snapshot(limits, &snapshot)
            }
            Err(Error::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {
                RiskGatekeeper::new(limits)
            }
            Err(err) => {
                warn!(path = %path.display(), %err, "exposure snapshot unreadable; starting from zero");
                RiskGatekeeper::new(limits)
            }
        };
        Self {
            bus: EventBus::new(),
            ledger: PositionLedger::new(),
            gatekeeper,
            simulator: TradeSimulator::new(sim_config),
        }
    }

    pub fn bus_mut(&mut self) -> &mut EventBus {
        &mut self.bus
    }

    pub fn ledger(&self) -> &PositionLedger {
        &self.ledger
    }

    pub fn gatekeeper(&self) -> &RiskGatekeeper {
        &self.gatekeeper
    }

    pub fn simulator(&self) -> &TradeSimulator {
        &self.simulator
    }

    /// Feed an observed live-player trade into the ledger and publish it.
    pub fn ingest_observed_trade(&mut self, trade: &ObservedTradeEvent) -> Result<()> {
        trade
            .validate()
            .map_err(|detail| Error::data(format!("observed trade rejected: {detail}")))?;
        self.ledger.apply_observed_trade(trade);
        self.bus
            .publish(&BusMessage::ObservedTrade(trade.clone()));
        Ok(())
    }

    /// Run one intent through the full pipeline: gate → simulate → settle.
    pub fn execute_intent(
        &mut self,
        intent: &TradeIntent,
        snapshot: &GameSnapshot,
    ) -> ExecutionOutcome {
        match self.gatekeeper.check_trade(intent, snapshot.tick) {
            GateDecision::Rejected(reason) => {
                warn!(
                    strategy = %intent.strategy_id,
                    limit = reason.limit_name(),
                    "trade rejected by gatekeeper"
                );
                let breach = self.gatekeeper.breach(intent, &reason, snapshot.timestamp);
                self.bus.publish(&BusMessage::LimitBreach(breach));
                return ExecutionOutcome::RejectedByGate(reason);
            }
            GateDecision::Approved => {}
        }

        let simulated = match (intent.kind, intent.size) {
            (TradeKind::Buy, IntentSize::Amount(amount)) => self.simulator.simulate_buy(
                &intent.strategy_id,
                intent.currency,
                amount,
                snapshot,
            ),
            (TradeKind::Sell, IntentSize::Quantity(quantity)) => {
                let balance = self.strategy_balance(intent);
                self.simulator.simulate_sell_by_quantity(
                    &intent.strategy_id,
                    intent.currency,
                    quantity,
                    balance,
                    snapshot,
                )
            }
            (TradeKind::Sell, IntentSize::Percentage(percent)) => {
                let balance = self.strategy_balance(intent);
                self.simulator.simulate_sell_by_percentage(
                    &intent.strategy_id,
                    intent.currency,
                    percent,
                    balance,
                    snapshot,
                )
            }
            _ => Err(SimRejection::UnsupportedSizing),
        };

        match simulated {
            Ok(settlement) => {
                self.dispatch_settlement(&settlement);
                ExecutionOutcome::Executed(settlement)
            }
            Err(rejection) => {
                debug!(
                    strategy = %intent.strategy_id,
                    reason = rejection.reason_name(),
                    "trade rejected by simulator"
                );
                ExecutionOutcome::RejectedBySim(rejection)
            }
        }
    }

    /// Fan a settlement out to its consumers, in order: ledger first, then
    /// gatekeeper (which needs the ledger's FIFO outcome), then the bus for
    /// external subscribers. This ordering is the dispatcher's contract, not
    /// the gatekeeper's.
    pub fn dispatch_settlement(&mut self, settlement: &SettlementEvent) {
        let outcome = self.ledger.apply_settlement(settlement);
        let release = outcome.map(|o| SellRelease {
            cost_basis: o.cost_basis,
            lots_closed: o.lots_closed,
        });
        self.gatekeeper.on_settlement(settlement, release);
        self.bus
            .publish(&BusMessage::Settlement(settlement.clone()));
    }

    /// Terminal settlement for the session: value every open position at
    /// the final price.
    pub fn liquidate_all(&mut self, final_price: f64, timestamp: crash_core::TimestampMs) {
        self.ledger.liquidate_all(final_price, timestamp);
    }

    /// Persist the gatekeeper's exposure counters (live path, across
    /// restarts).
    pub fn save_exposures(&self, path: impl AsRef<Path>) -> Result<()> {
        self.gatekeeper.snapshot().save(path)
    }

    fn strategy_balance(&self, intent: &TradeIntent) -> f64 {
        self.ledger.balance(
            &crash_core::OwnerId::Strategy(intent.strategy_id.clone()),
            intent.currency,
        )
    }
}
