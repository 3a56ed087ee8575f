//! Converting trade intents into fee-adjusted settlement events.

use crash_core::{
    Currency, GameSnapshot, SettlementEvent, SimConfig, StrategyId, TradeKind, QTY_EPS,
};
use serde::{Deserialize, Serialize};

/// Why a simulation request could not produce a settlement. A normal,
/// expected outcome, not an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SimRejection {
    /// Price is zero or negative; nothing can be priced against it.
    NonPositivePrice { price: f64 },
    /// The game phase does not allow new entries.
    EntryDisallowed,
    /// The spend amount was non-finite or non-positive.
    InvalidAmount { amount: f64 },
    /// The fee-adjusted token quantity came out non-positive.
    NonPositiveQuantity { quantity: f64 },
    /// A sell asked for more tokens than the position holds.
    InsufficientBalance { requested: f64, available: f64 },
    /// A sell percentage outside (0, 100].
    InvalidPercentage { percent: f64 },
    /// The intent's sizing does not match its direction (e.g. a buy sized
    /// in tokens).
    UnsupportedSizing,
}

impl SimRejection {
    /// Stable name for logs and notifications.
    pub fn reason_name(&self) -> &'static str {
        match self {
            SimRejection::NonPositivePrice { .. } => "non_positive_price",
            SimRejection::EntryDisallowed => "entry_disallowed",
            SimRejection::InvalidAmount { .. } => "invalid_amount",
            SimRejection::NonPositiveQuantity { .. } => "non_positive_quantity",
            SimRejection::InsufficientBalance { .. } => "insufficient_balance",
            SimRejection::InvalidPercentage { .. } => "invalid_percentage",
            SimRejection::UnsupportedSizing => "unsupported_sizing",
        }
    }
}

/// Converts a strategy's intent and the current game state into token
/// quantities and currency amounts, fee-adjusted. Every success produces
/// exactly one [`SettlementEvent`]; live and backtest paths consume that
/// contract identically, which is why their P&L stays comparable.
#[derive(Debug, Clone)]
pub struct TradeSimulator {
    config: SimConfig,
}

impl TradeSimulator {
    pub fn new(config: SimConfig) -> Self {
        Self {
            config: config.validated(),
        }
    }

    /// The configured fee rate.
    pub fn fee_rate(&self) -> f64 {
        self.config.fee_rate
    }

    /// Simulate spending `amount_to_spend` at the snapshot's price.
    ///
    /// `quantity = amount * (1 - fee) / price`. The settlement's
    /// `currency_amount` is the full spend, fee included; that is also the
    /// cost basis the ledger books for the new lot.
    pub fn simulate_buy(
        &self,
        strategy_id: &StrategyId,
        currency: Currency,
        amount_to_spend: f64,
        snapshot: &GameSnapshot,
    ) -> Result<SettlementEvent, SimRejection> {
        if !amount_to_spend.is_finite() || amount_to_spend <= 0.0 {
            return Err(SimRejection::InvalidAmount {
                amount: amount_to_spend,
            });
        }
        if snapshot.price <= 0.0 {
            return Err(SimRejection::NonPositivePrice {
                price: snapshot.price,
            });
        }
        if !snapshot.phase.allows_entry() {
            return Err(SimRejection::EntryDisallowed);
        }

        let quantity = amount_to_spend * (1.0 - self.config.fee_rate) / snapshot.price;
        if quantity <= 0.0 {
            return Err(SimRejection::NonPositiveQuantity { quantity });
        }

        Ok(SettlementEvent {
            strategy_id: strategy_id.clone(),
            game_id: snapshot.game_id.clone(),
            kind: TradeKind::Buy,
            currency,
            quantity,
            currency_amount: amount_to_spend,
            price: snapshot.price,
            fee_rate: self.config.fee_rate,
            timestamp: snapshot.timestamp,
            tick: snapshot.tick,
        })
    }

    /// Simulate selling `quantity` tokens at the snapshot's price.
    ///
    /// Requires `quantity <= balance` (epsilon-tolerant); the shortfall is
    /// reported in the rejection otherwise. `proceeds = quantity * price *
    /// (1 - fee)` becomes the settlement's `currency_amount`.
    pub fn simulate_sell_by_quantity(
        &self,
        strategy_id: &StrategyId,
        currency: Currency,
        quantity: f64,
        balance: f64,
        snapshot: &GameSnapshot,
    ) -> Result<SettlementEvent, SimRejection> {
        if !quantity.is_finite() || quantity <= 0.0 {
            return Err(SimRejection::NonPositiveQuantity { quantity });
        }
        if snapshot.price <= 0.0 {
            return Err(SimRejection::NonPositivePrice {
                price: snapshot.price,
            });
        }
        if quantity > balance + QTY_EPS {
            return Err(SimRejection::InsufficientBalance {
                requested: quantity,
                available: balance,
            });
        }

        let proceeds = quantity * snapshot.price * (1.0 - self.config.fee_rate);

        Ok(SettlementEvent {
            strategy_id: strategy_id.clone(),
            game_id: snapshot.game_id.clone(),
            kind: TradeKind::Sell,
            currency,
            quantity,
            currency_amount: proceeds,
            price: snapshot.price,
            fee_rate: self.config.fee_rate,
            timestamp: snapshot.timestamp,
            tick: snapshot.tick,
        })
    }

    /// Simulate selling a percentage (0, 100] of the open balance.
    pub fn simulate_sell_by_percentage(
        &self,
        strategy_id: &StrategyId,
        currency: Currency,
        percent: f64,
        balance: f64,
        snapshot: &GameSnapshot,
    ) -> Result<SettlementEvent, SimRejection> {
        if !percent.is_finite() || percent <= 0.0 || percent > 100.0 {
            return Err(SimRejection::InvalidPercentage { percent });
        }
        let quantity = balance * percent / 100.0;
        self.simulate_sell_by_quantity(strategy_id, currency, quantity, balance, snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use crash_core::{GameId, GamePhase};

    fn snapshot(price: f64, phase: GamePhase) -> GameSnapshot {
        GameSnapshot {
            game_id: GameId::new("g1"),
            tick: 12,
            price,
            phase,
            timestamp: 1000,
        }
    }

    fn sim() -> TradeSimulator {
        TradeSimulator::new(SimConfig { fee_rate: 0.01 })
    }

    #[test]
    fn test_buy_quantity_fee_adjusted() {
        // 1.0 spent at price 2.0 with 1% fee -> 0.495 tokens.
        let settlement = sim()
            .simulate_buy(
                &StrategyId::new("s1"),
                Currency::Primary,
                1.0,
                &snapshot(2.0, GamePhase::Active),
            )
            .unwrap();

        assert_relative_eq!(settlement.quantity, 0.495, epsilon = 1e-12);
        assert_relative_eq!(settlement.currency_amount, 1.0);
        assert_eq!(settlement.kind, TradeKind::Buy);
        assert_eq!(settlement.tick, 12);
    }

    #[test]
    fn test_buy_rejected_on_bad_price() {
        let result = sim().simulate_buy(
            &StrategyId::new("s1"),
            Currency::Primary,
            1.0,
            &snapshot(0.0, GamePhase::Active),
        );
        assert_eq!(
            result.unwrap_err().reason_name(),
            "non_positive_price"
        );
    }

    #[test]
    fn test_buy_rejected_after_rug() {
        let result = sim().simulate_buy(
            &StrategyId::new("s1"),
            Currency::Primary,
            1.0,
            &snapshot(2.0, GamePhase::Rugged),
        );
        assert_eq!(result.unwrap_err(), SimRejection::EntryDisallowed);
    }

    #[test]
    fn test_sell_proceeds_fee_adjusted() {
        // Selling 0.2 tokens at 3.0 with 1% fee nets 0.594.
        let settlement = sim()
            .simulate_sell_by_quantity(
                &StrategyId::new("s1"),
                Currency::Primary,
                0.2,
                0.495,
                &snapshot(3.0, GamePhase::Active),
            )
            .unwrap();

        assert_relative_eq!(settlement.currency_amount, 0.594, epsilon = 1e-12);
        assert_relative_eq!(settlement.quantity, 0.2);
    }

    #[test]
    fn test_sell_rejected_beyond_balance() {
        let result = sim().simulate_sell_by_quantity(
            &StrategyId::new("s1"),
            Currency::Primary,
            1.0,
            0.495,
            &snapshot(3.0, GamePhase::Active),
        );
        match result.unwrap_err() {
            SimRejection::InsufficientBalance {
                requested,
                available,
            } => {
                assert_relative_eq!(requested, 1.0);
                assert_relative_eq!(available, 0.495);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_sell_by_percentage_resolves_quantity() {
        let settlement = sim()
            .simulate_sell_by_percentage(
                &StrategyId::new("s1"),
                Currency::Primary,
                50.0,
                0.4,
                &snapshot(3.0, GamePhase::Active),
            )
            .unwrap();
        assert_relative_eq!(settlement.quantity, 0.2, epsilon = 1e-12);

        let result = sim().simulate_sell_by_percentage(
            &StrategyId::new("s1"),
            Currency::Primary,
            150.0,
            0.4,
            &snapshot(3.0, GamePhase::Active),
        );
        assert_eq!(
            result.unwrap_err(),
            SimRejection::InvalidPercentage { percent: 150.0 }
        );
    }

    #[test]
    fn test_presale_entry_allowed() {
        let result = sim().simulate_buy(
            &StrategyId::new("s1"),
            Currency::Primary,
            0.5,
            &snapshot(1.0, GamePhase::Presale),
        );
        assert!(result.is_ok());
    }
}
