//! The position ledger: every (owner, currency) position in one place.

use std::collections::{HashMap, VecDeque};

use crash_core::{
    Currency, ObservedTradeEvent, OwnerId, SettlementEvent, StrategyId, TimestampMs, TradeKind,
    QTY_EPS,
};
use tracing::warn;

use crate::position::{CurrencyPosition, SellOutcome};

/// Maximum observed trades held in the unrecognized-currency quarantine.
const QUARANTINE_CAP: usize = 256;

/// Lot-based record of token holdings and realized P&L for every owner the
/// process tracks: its own strategies and observed live players.
#[derive(Debug, Default)]
pub struct PositionLedger {
    positions: HashMap<(OwnerId, Currency), CurrencyPosition>,
    /// Observed trades whose currency tag failed to parse, kept for review
    /// instead of being silently dropped.
    quarantine: VecDeque<ObservedTradeEvent>,
}

impl PositionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a position, if it exists.
    pub fn position(&self, owner: &OwnerId, currency: Currency) -> Option<&CurrencyPosition> {
        self.positions.get(&(owner.clone(), currency))
    }

    /// Look up or create a position.
    pub fn position_mut(&mut self, owner: OwnerId, currency: Currency) -> &mut CurrencyPosition {
        self.positions
            .entry((owner.clone(), currency))
            .or_insert_with(|| CurrencyPosition::new(owner, currency))
    }

    /// Current token balance for an owner/currency (zero if no position).
    pub fn balance(&self, owner: &OwnerId, currency: Currency) -> f64 {
        self.position(owner, currency)
            .map(|p| p.balance)
            .unwrap_or(0.0)
    }

    /// All positions owned by one strategy.
    pub fn strategy_positions(&self, strategy_id: &StrategyId) -> Vec<&CurrencyPosition> {
        self.positions
            .iter()
            .filter_map(|((owner, _), pos)| match owner {
                OwnerId::Strategy(s) if s == strategy_id => Some(pos),
                _ => None,
            })
            .collect()
    }

    /// Every position in the ledger.
    pub fn positions(&self) -> impl Iterator<Item = &CurrencyPosition> {
        self.positions.values()
    }

    /// Apply one settlement event.
    ///
    /// Buys append a lot; sells consume lots FIFO and settle proceeds.
    /// Returns the [`SellOutcome`] for sells so the dispatcher can hand the
    /// consumed cost basis to the risk gatekeeper.
    pub fn apply_settlement(&mut self, settlement: &SettlementEvent) -> Option<SellOutcome> {
        let owner = OwnerId::Strategy(settlement.strategy_id.clone());
        let position = self.position_mut(owner, settlement.currency);

        match settlement.kind {
            TradeKind::Buy => {
                position.apply_buy(
                    settlement.quantity,
                    settlement.currency_amount,
                    settlement.timestamp,
                );
                None
            }
            TradeKind::Sell => {
                let outcome = position.apply_sell(settlement.quantity, settlement.timestamp);
                let proceeds = scale_proceeds(settlement.currency_amount, settlement.quantity, &outcome);
                position.settle_sell_proceeds(&outcome, proceeds, settlement.timestamp);
                Some(outcome)
            }
        }
    }

    /// Ingest a trade observed on the live feed (any participant).
    ///
    /// The currency tag comes from an upstream inference heuristic; trades
    /// with an unrecognized tag are quarantined for review, never applied.
    pub fn apply_observed_trade(&mut self, trade: &ObservedTradeEvent) {
        let Some(currency) = Currency::parse(&trade.currency) else {
            warn!(
                player = %trade.player_id,
                tag = %trade.currency,
                "unrecognized currency; quarantining trade"
            );
            if self.quarantine.len() == QUARANTINE_CAP {
                self.quarantine.pop_front();
            }
            self.quarantine.push_back(trade.clone());
            return;
        };

        let owner = OwnerId::player(trade.player_id.clone());
        let position = self.position_mut(owner, currency);
        match trade.kind {
            TradeKind::Buy => {
                position.apply_buy(trade.quantity, trade.currency_amount, trade.timestamp);
            }
            TradeKind::Sell => {
                let outcome = position.apply_sell(trade.quantity, trade.timestamp);
                let proceeds = scale_proceeds(trade.currency_amount, trade.quantity, &outcome);
                position.settle_sell_proceeds(&outcome, proceeds, trade.timestamp);
            }
        }
    }

    /// Terminal settlement: liquidate every open position at the session's
    /// final price. Called exactly once per session; positions already
    /// liquidated are untouched.
    pub fn liquidate_all(&mut self, final_price: f64, timestamp: TimestampMs) {
        for position in self.positions.values_mut() {
            position.liquidate_at_session_end(final_price, timestamp);
        }
    }

    /// Quarantined observed trades, oldest first.
    pub fn quarantined(&self) -> impl Iterator<Item = &ObservedTradeEvent> {
        self.quarantine.iter()
    }

    /// Number of tracked positions.
    pub fn position_count(&self) -> usize {
        self.positions.len()
    }
}

/// Proceeds attributable to the matched quantity. When a sell partially
/// matches (insufficient lot history), crediting the full reported proceeds
/// would book profit with no basis; scale to the matched fraction instead.
fn scale_proceeds(reported: f64, requested: f64, outcome: &SellOutcome) -> f64 {
    if outcome.shortfall > QTY_EPS && requested > QTY_EPS {
        reported * (outcome.quantity_matched / requested)
    } else {
        reported
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use crash_core::{GameId, StrategyId};

    fn settlement(kind: TradeKind, quantity: f64, amount: f64, ts: TimestampMs) -> SettlementEvent {
        SettlementEvent {
            strategy_id: StrategyId::new("s1"),
            game_id: GameId::new("g1"),
            kind,
            currency: Currency::Primary,
            quantity,
            currency_amount: amount,
            price: 2.0,
            fee_rate: 0.01,
            timestamp: ts,
            tick: 1,
        }
    }

    fn observed(kind: TradeKind, currency: &str, quantity: f64, amount: f64) -> ObservedTradeEvent {
        ObservedTradeEvent {
            game_id: GameId::new("g1"),
            player_id: "p1".to_string(),
            kind,
            currency: currency.to_string(),
            quantity,
            price: 2.0,
            currency_amount: amount,
            tick: 1,
            timestamp: 1000,
        }
    }

    #[test]
    fn test_buy_then_sell_roundtrip() {
        let mut ledger = PositionLedger::new();
        ledger.apply_settlement(&settlement(TradeKind::Buy, 0.495, 1.0, 1000));

        let owner = OwnerId::strategy("s1");
        assert_relative_eq!(ledger.balance(&owner, Currency::Primary), 0.495);

        let outcome = ledger
            .apply_settlement(&settlement(TradeKind::Sell, 0.2, 0.594, 2000))
            .expect("sell returns outcome");
        assert_relative_eq!(outcome.cost_basis, 0.2 * (1.0 / 0.495), epsilon = 1e-9);
        assert_relative_eq!(ledger.balance(&owner, Currency::Primary), 0.295, epsilon = 1e-9);
    }

    #[test]
    fn test_final_balance_is_bought_minus_sold() {
        let mut ledger = PositionLedger::new();
        ledger.apply_settlement(&settlement(TradeKind::Buy, 1.0, 2.0, 0));
        ledger.apply_settlement(&settlement(TradeKind::Buy, 0.5, 1.5, 1));
        ledger.apply_settlement(&settlement(TradeKind::Sell, 0.25, 0.6, 2));
        ledger.apply_settlement(&settlement(TradeKind::Sell, 0.5, 1.2, 3));

        let owner = OwnerId::strategy("s1");
        assert_relative_eq!(
            ledger.balance(&owner, Currency::Primary),
            1.5 - 0.75,
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_unrecognized_currency_quarantined() {
        let mut ledger = PositionLedger::new();
        ledger.apply_observed_trade(&observed(TradeKind::Buy, "mystery", 1.0, 2.0));

        assert_eq!(ledger.quarantined().count(), 1);
        assert_eq!(ledger.position_count(), 0);
    }

    #[test]
    fn test_observed_trade_tracks_player() {
        let mut ledger = PositionLedger::new();
        ledger.apply_observed_trade(&observed(TradeKind::Buy, "primary", 1.0, 2.0));

        let owner = OwnerId::player("p1");
        assert_relative_eq!(ledger.balance(&owner, Currency::Primary), 1.0);
    }

    #[test]
    fn test_observed_sell_without_history_scales_proceeds() {
        let mut ledger = PositionLedger::new();
        ledger.apply_observed_trade(&observed(TradeKind::Buy, "primary", 0.5, 1.0));
        // Feed reports a 1.0-token sell but we only have 0.5 of history.
        ledger.apply_observed_trade(&observed(TradeKind::Sell, "primary", 1.0, 3.0));

        let owner = OwnerId::player("p1");
        let pos = ledger.position(&owner, Currency::Primary).unwrap();
        // Proceeds credited for the matched half only.
        assert_relative_eq!(pos.total_returned, 1.5, epsilon = 1e-9);
        assert_relative_eq!(pos.balance, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_liquidate_all_touches_every_open_position() {
        let mut ledger = PositionLedger::new();
        ledger.apply_settlement(&settlement(TradeKind::Buy, 1.0, 2.0, 0));
        ledger.apply_observed_trade(&observed(TradeKind::Buy, "primary", 2.0, 4.0));

        ledger.liquidate_all(0.1, 100);

        for pos in ledger.positions() {
            assert!(!pos.is_open());
            assert!(pos.liquidated);
        }
    }
}
