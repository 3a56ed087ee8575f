//! Trade gating against layered risk limits.
//!
//! Checks run in a fixed order and short-circuit on the first failure, so a
//! trade violating several limits is always rejected citing the same one:
//! cheapest and most specific first, for fast, explainable rejection.

use crash_core::{
    LimitBreach, RiskLimits, SettlementEvent, StrategyLimits, Tick, TimestampMs, TradeIntent,
    TradeKind,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::exposure::{ExposureBook, ExposureSnapshot, SellRelease};

/// Why the gatekeeper rejected a trade. Carries the violated limit and the
/// attempted values so rejections are explainable without replaying state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RejectReason {
    PresaleBuyCap { cap: f64, attempted: f64 },
    MaxBuyAmount { limit: f64, attempted: f64 },
    MaxOpenTrades { limit: u32, open: u32 },
    MaxStrategyExposure { limit: f64, current: f64, attempted: f64 },
    MinSafeTick { min: Tick, current: Tick },
    GlobalMaxBuyAmount { limit: f64, attempted: f64 },
    MaxTotalExposure { limit: f64, current: f64, attempted: f64 },
    MaxConcurrentTrades { limit: u32, open: u32 },
}

impl RejectReason {
    /// Stable name of the violated limit, for notifications and logs.
    pub fn limit_name(&self) -> &'static str {
        match self {
            RejectReason::PresaleBuyCap { .. } => "presale_buy_cap",
            RejectReason::MaxBuyAmount { .. } => "max_buy_amount",
            RejectReason::MaxOpenTrades { .. } => "max_open_trades",
            RejectReason::MaxStrategyExposure { .. } => "max_strategy_exposure",
            RejectReason::MinSafeTick { .. } => "min_safe_tick",
            RejectReason::GlobalMaxBuyAmount { .. } => "global_max_buy_amount",
            RejectReason::MaxTotalExposure { .. } => "max_total_exposure",
            RejectReason::MaxConcurrentTrades { .. } => "max_concurrent_trades",
        }
    }
}

/// Outcome of a gate check. Rejection is a normal, expected result, not an
/// error.
#[derive(Debug, Clone, PartialEq)]
pub enum GateDecision {
    Approved,
    Rejected(RejectReason),
}

impl GateDecision {
    pub fn is_approved(&self) -> bool {
        matches!(self, GateDecision::Approved)
    }
}

/// Per-strategy and global limit configuration plus live exposure counters.
pub struct RiskGatekeeper {
    limits: RiskLimits,
    exposures: ExposureBook,
}

impl RiskGatekeeper {
    /// Gatekeeper with fresh (zero) exposure counters.
    pub fn new(limits: RiskLimits) -> Self {
        Self {
            limits,
            exposures: ExposureBook::new(),
        }
    }

    /// Gatekeeper resuming from persisted exposure counters.
    pub fn with_snapshot(limits: RiskLimits, snapshot: &ExposureSnapshot) -> Self {
        Self {
            limits,
            exposures: ExposureBook::restore(snapshot),
        }
    }

    /// The immutable limits this gatekeeper enforces.
    pub fn limits(&self) -> &RiskLimits {
        &self.limits
    }

    /// Live exposure counters.
    pub fn exposures(&self) -> &ExposureBook {
        &self.exposures
    }

    /// Decide whether a proposed trade may execute at `current_tick`.
    ///
    /// Sells are approved unconditionally: they only reduce exposure, and
    /// blocking de-risking during a crash would be strictly worse than any
    /// sell-frequency abuse a single participant could produce.
    pub fn check_trade(&self, intent: &TradeIntent, current_tick: Tick) -> GateDecision {
        if intent.kind == TradeKind::Sell {
            return GateDecision::Approved;
        }

        let amount = intent.size.value();
        let strategy = self.limits.for_strategy(&intent.strategy_id);
        let state = self.exposures.state(&intent.strategy_id);

        // 1. Presale window. When configured and active, its cap replaces
        //    the normal buy cap and the min-safe-tick floor: the override
        //    exists to permit early-window entries at a reduced size.
        let in_presale = match strategy.presale {
            Some(presale) if current_tick <= presale.window_end_tick => {
                if amount > presale.max_buy_amount {
                    return GateDecision::Rejected(RejectReason::PresaleBuyCap {
                        cap: presale.max_buy_amount,
                        attempted: amount,
                    });
                }
                true
            }
            _ => false,
        };

        // 2. Per-strategy limits.
        if let Some(reason) = self.check_strategy(strategy, state, amount, current_tick, in_presale)
        {
            return GateDecision::Rejected(reason);
        }

        // 3. Global limits.
        if amount > self.limits.global.max_buy_amount {
            return GateDecision::Rejected(RejectReason::GlobalMaxBuyAmount {
                limit: self.limits.global.max_buy_amount,
                attempted: amount,
            });
        }
        let total_at_risk = self.exposures.total_capital_at_risk();
        if total_at_risk + amount > self.limits.global.max_total_exposure {
            return GateDecision::Rejected(RejectReason::MaxTotalExposure {
                limit: self.limits.global.max_total_exposure,
                current: total_at_risk,
                attempted: amount,
            });
        }
        let total_open = self.exposures.total_open_trades();
        if total_open >= self.limits.global.max_concurrent_trades {
            return GateDecision::Rejected(RejectReason::MaxConcurrentTrades {
                limit: self.limits.global.max_concurrent_trades,
                open: total_open,
            });
        }

        GateDecision::Approved
    }

    fn check_strategy(
        &self,
        strategy: &StrategyLimits,
        state: crate::exposure::ExposureState,
        amount: f64,
        current_tick: Tick,
        in_presale: bool,
    ) -> Option<RejectReason> {
        if !in_presale && amount > strategy.max_buy_amount {
            return Some(RejectReason::MaxBuyAmount {
                limit: strategy.max_buy_amount,
                attempted: amount,
            });
        }
        if state.open_trades_count >= strategy.max_open_trades {
            return Some(RejectReason::MaxOpenTrades {
                limit: strategy.max_open_trades,
                open: state.open_trades_count,
            });
        }
        if state.capital_at_risk + amount > strategy.max_strategy_exposure {
            return Some(RejectReason::MaxStrategyExposure {
                limit: strategy.max_strategy_exposure,
                current: state.capital_at_risk,
                attempted: amount,
            });
        }
        if !in_presale && current_tick < strategy.min_safe_tick {
            return Some(RejectReason::MinSafeTick {
                min: strategy.min_safe_tick,
                current: current_tick,
            });
        }
        None
    }

    /// Build the notification published when a trade is rejected.
    pub fn breach(
        &self,
        intent: &TradeIntent,
        reason: &RejectReason,
        timestamp: TimestampMs,
    ) -> LimitBreach {
        LimitBreach {
            limit: reason.limit_name().to_string(),
            intent: intent.clone(),
            exposure: self.exposures.view(&intent.strategy_id),
            timestamp,
        }
    }

    /// Update exposure counters after a settlement.
    ///
    /// Must run strictly after the ledger applied the same settlement: for
    /// sells the released cost basis and closed-lot count come from the
    /// ledger's FIFO walk, passed here by the dispatcher.
    pub fn on_settlement(&mut self, settlement: &SettlementEvent, release: Option<SellRelease>) {
        match settlement.kind {
            TradeKind::Buy => {
                self.exposures
                    .charge(&settlement.strategy_id, settlement.currency_amount);
                debug!(
                    strategy = %settlement.strategy_id,
                    amount = settlement.currency_amount,
                    "exposure charged"
                );
            }
            TradeKind::Sell => {
                if let Some(release) = release {
                    self.exposures.release(&settlement.strategy_id, release);
                    debug!(
                        strategy = %settlement.strategy_id,
                        cost_basis = release.cost_basis,
                        lots_closed = release.lots_closed,
                        "exposure released"
                    );
                }
            }
        }
    }

    /// Persistable snapshot of the exposure counters.
    pub fn snapshot(&self) -> ExposureSnapshot {
        self.exposures.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use crash_core::{
        Currency, GameId, GlobalLimits, PresaleOverride, StrategyId, StrategyLimits,
    };
    use std::collections::HashMap;

    fn limits() -> RiskLimits {
        RiskLimits {
            default_strategy: StrategyLimits {
                max_buy_amount: 1.0,
                max_open_trades: 2,
                max_strategy_exposure: 1.5,
                min_safe_tick: 5,
                presale: None,
            },
            overrides: HashMap::new(),
            global: GlobalLimits {
                max_buy_amount: 2.0,
                max_total_exposure: 3.0,
                max_concurrent_trades: 3,
            },
        }
    }

    fn buy(amount: f64) -> TradeIntent {
        TradeIntent::buy(
            StrategyId::new("s1"),
            Currency::Primary,
            amount,
            GameId::new("g1"),
            10,
        )
    }

    fn buy_settlement(strategy: &str, amount: f64) -> SettlementEvent {
        SettlementEvent {
            strategy_id: StrategyId::new(strategy),
            game_id: GameId::new("g1"),
            kind: TradeKind::Buy,
            currency: Currency::Primary,
            quantity: amount / 2.0,
            currency_amount: amount,
            price: 2.0,
            fee_rate: 0.01,
            timestamp: 1000,
            tick: 10,
        }
    }

    #[test]
    fn test_approves_within_limits() {
        let gate = RiskGatekeeper::new(limits());
        assert!(gate.check_trade(&buy(0.5), 10).is_approved());
    }

    #[test]
    fn test_rejects_cite_max_buy_amount() {
        let gate = RiskGatekeeper::new(limits());
        // 5.0 violates both the strategy cap (1.0) and the global cap (2.0);
        // the strategy check runs first and must be cited every time.
        for _ in 0..3 {
            match gate.check_trade(&buy(5.0), 10) {
                GateDecision::Rejected(reason) => {
                    assert_eq!(reason.limit_name(), "max_buy_amount")
                }
                GateDecision::Approved => panic!("expected rejection"),
            }
        }
    }

    #[test]
    fn test_min_safe_tick() {
        let gate = RiskGatekeeper::new(limits());
        match gate.check_trade(&buy(0.5), 2) {
            GateDecision::Rejected(RejectReason::MinSafeTick { min, current }) => {
                assert_eq!(min, 5);
                assert_eq!(current, 2);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_open_trades_limit() {
        let mut gate = RiskGatekeeper::new(limits());
        gate.on_settlement(&buy_settlement("s1", 0.25), None);
        gate.on_settlement(&buy_settlement("s1", 0.25), None);

        match gate.check_trade(&buy(0.25), 10) {
            GateDecision::Rejected(reason) => assert_eq!(reason.limit_name(), "max_open_trades"),
            GateDecision::Approved => panic!("expected rejection"),
        }
    }

    #[test]
    fn test_strategy_exposure_limit() {
        let mut gate = RiskGatekeeper::new(limits());
        gate.on_settlement(&buy_settlement("s1", 1.0), None);

        // 1.0 at risk + 0.8 attempted > 1.5 cap.
        match gate.check_trade(&buy(0.8), 10) {
            GateDecision::Rejected(reason) => {
                assert_eq!(reason.limit_name(), "max_strategy_exposure")
            }
            GateDecision::Approved => panic!("expected rejection"),
        }
    }

    #[test]
    fn test_global_exposure_spans_strategies() {
        let mut gate = RiskGatekeeper::new(limits());
        gate.on_settlement(&buy_settlement("a", 1.4), None);
        gate.on_settlement(&buy_settlement("b", 1.4), None);

        // s1 itself is clean, but 2.8 + 0.5 > 3.0 global.
        match gate.check_trade(&buy(0.5), 10) {
            GateDecision::Rejected(reason) => {
                assert_eq!(reason.limit_name(), "max_total_exposure")
            }
            GateDecision::Approved => panic!("expected rejection"),
        }
    }

    #[test]
    fn test_sell_always_approved() {
        let gate = RiskGatekeeper::new(limits());
        let sell = TradeIntent::sell_quantity(
            StrategyId::new("s1"),
            Currency::Primary,
            1_000_000.0,
            GameId::new("g1"),
            0, // before min_safe_tick, still fine
        );
        assert!(gate.check_trade(&sell, 0).is_approved());
    }

    #[test]
    fn test_presale_override_caps_and_permits() {
        let mut limits = limits();
        limits.default_strategy.presale = Some(PresaleOverride {
            window_end_tick: 3,
            max_buy_amount: 0.2,
        });
        let gate = RiskGatekeeper::new(limits);

        // Inside the window, under the cap: allowed even though tick < 5.
        assert!(gate.check_trade(&buy(0.1), 2).is_approved());

        // Inside the window, over the cap: the presale cap is cited.
        match gate.check_trade(&buy(0.5), 2) {
            GateDecision::Rejected(reason) => assert_eq!(reason.limit_name(), "presale_buy_cap"),
            GateDecision::Approved => panic!("expected rejection"),
        }

        // Outside the window the normal floor applies again.
        match gate.check_trade(&buy(0.1), 4) {
            GateDecision::Rejected(reason) => assert_eq!(reason.limit_name(), "min_safe_tick"),
            GateDecision::Approved => panic!("expected rejection"),
        }
    }

    #[test]
    fn test_rejection_leaves_counters_unchanged() {
        let gate = RiskGatekeeper::new(limits());
        let before = gate.exposures().state(&StrategyId::new("s1"));

        let decision = gate.check_trade(&buy(5.0), 10);
        assert!(!decision.is_approved());

        let after = gate.exposures().state(&StrategyId::new("s1"));
        assert_eq!(before, after);
        assert_relative_eq!(gate.exposures().total_capital_at_risk(), 0.0);
    }

    #[test]
    fn test_exposure_returns_after_round_trip() {
        let mut gate = RiskGatekeeper::new(limits());
        let before = gate.exposures().state(&StrategyId::new("s1")).capital_at_risk;

        gate.on_settlement(&buy_settlement("s1", 1.0), None);
        assert!(gate.exposures().state(&StrategyId::new("s1")).capital_at_risk > before);

        let sell = SettlementEvent {
            kind: TradeKind::Sell,
            currency_amount: 1.05,
            ..buy_settlement("s1", 1.0)
        };
        gate.on_settlement(
            &sell,
            Some(SellRelease {
                cost_basis: 1.0,
                lots_closed: 1,
            }),
        );

        assert_relative_eq!(
            gate.exposures().state(&StrategyId::new("s1")).capital_at_risk,
            before,
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_breach_notification_names_limit() {
        let gate = RiskGatekeeper::new(limits());
        let intent = buy(5.0);
        let reason = match gate.check_trade(&intent, 10) {
            GateDecision::Rejected(reason) => reason,
            GateDecision::Approved => panic!("expected rejection"),
        };

        let breach = gate.breach(&intent, &reason, 1234);
        assert_eq!(breach.limit, "max_buy_amount");
        assert_eq!(breach.timestamp, 1234);
        assert_relative_eq!(breach.exposure.capital_at_risk, 0.0);
    }
}
