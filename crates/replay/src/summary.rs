//! Backtest performance summary.
//!
//! Derived solely from a run's ledger, never recomputed ad hoc: the same
//! counters that drive live accounting drive the reported numbers.

use crash_core::{GameId, StrategyId};
use crash_ledger::{PositionLedger, TradeLogKind};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

/// Performance of one strategy over one replayed session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSummary {
    /// Strategy the summary describes.
    pub strategy_id: StrategyId,
    /// Session that was replayed.
    pub game_id: GameId,
    /// Executed trades (buys + sells).
    pub trades_executed: u32,
    /// Sells settled at a profit.
    pub winning_trades: u32,
    /// Sells settled at a loss.
    pub losing_trades: u32,
    /// Sells settled at breakeven.
    pub breakeven_trades: u32,
    /// Winning fraction of settled sells (0-1).
    pub win_rate: f64,
    /// Total realized P&L.
    pub realized_pnl: f64,
    /// Realized P&L per settled sell.
    pub avg_pnl_per_trade: f64,
    /// Total currency spent on buys.
    pub total_invested: f64,
    /// Total currency returned by sells and liquidation.
    pub total_returned: f64,
    /// Quantity-weighted average holding time of sold tokens, seconds.
    pub average_holding_time_seconds: f64,
    /// Largest single-sell P&L.
    pub best_trade_pnl: f64,
    /// Smallest (most negative) single-sell P&L.
    pub worst_trade_pnl: f64,
    /// Population standard deviation of per-sell P&L.
    pub pnl_std_dev: f64,
}

impl PerformanceSummary {
    /// Aggregate one strategy's positions (all currencies) into a summary.
    pub fn from_ledger(
        strategy_id: &StrategyId,
        game_id: &GameId,
        ledger: &PositionLedger,
    ) -> Self {
        let positions = ledger.strategy_positions(strategy_id);

        let mut summary = PerformanceSummary {
            strategy_id: strategy_id.clone(),
            game_id: game_id.clone(),
            trades_executed: 0,
            winning_trades: 0,
            losing_trades: 0,
            breakeven_trades: 0,
            win_rate: 0.0,
            realized_pnl: 0.0,
            avg_pnl_per_trade: 0.0,
            total_invested: 0.0,
            total_returned: 0.0,
            average_holding_time_seconds: 0.0,
            best_trade_pnl: 0.0,
            worst_trade_pnl: 0.0,
            pnl_std_dev: 0.0,
        };

        let mut holding_qty_ms = 0.0;
        let mut matched_qty = 0.0;
        let mut sell_pnls: Vec<f64> = Vec::new();

        for position in &positions {
            summary.trades_executed += position.executed_count;
            summary.winning_trades += position.winning_count;
            summary.losing_trades += position.losing_count;
            summary.breakeven_trades += position.breakeven_count;
            summary.realized_pnl += position.realized_pnl;
            summary.total_invested += position.total_invested;
            summary.total_returned += position.total_returned;
            holding_qty_ms += position.cum_holding_qty_ms;
            matched_qty += position.cum_matched_qty;
            sell_pnls.extend(
                position
                    .trades
                    .iter()
                    .filter(|t| t.kind == TradeLogKind::Sell)
                    .map(|t| t.pnl),
            );
        }

        let settled = summary.winning_trades + summary.losing_trades + summary.breakeven_trades;
        if settled > 0 {
            summary.win_rate = summary.winning_trades as f64 / settled as f64;
            summary.avg_pnl_per_trade = summary.realized_pnl / settled as f64;
        }
        if matched_qty > 0.0 {
            summary.average_holding_time_seconds = holding_qty_ms / matched_qty / 1000.0;
        }

        if let Some(best) = sell_pnls.iter().copied().max_by_key(|&p| OrderedFloat(p)) {
            summary.best_trade_pnl = best;
        }
        if let Some(worst) = sell_pnls.iter().copied().min_by_key(|&p| OrderedFloat(p)) {
            summary.worst_trade_pnl = worst;
        }
        if sell_pnls.len() >= 2 {
            let n = sell_pnls.len() as f64;
            let mean = sell_pnls.iter().sum::<f64>() / n;
            let variance = sell_pnls.iter().map(|p| (p - mean).powi(2)).sum::<f64>() / n;
            summary.pnl_std_dev = variance.sqrt();
        }

        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use crash_core::{Currency, SettlementEvent, TradeKind};

    fn settlement(kind: TradeKind, quantity: f64, amount: f64, ts: i64) -> SettlementEvent {
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

    #[test]
    fn test_summary_from_ledger() {
        let mut ledger = PositionLedger::new();
        ledger.apply_settlement(&settlement(TradeKind::Buy, 1.0, 2.0, 0));
        // Two sells: one winner (+0.5), one loser (-0.2).
        ledger.apply_settlement(&settlement(TradeKind::Sell, 0.5, 1.5, 10_000));
        ledger.apply_settlement(&settlement(TradeKind::Sell, 0.5, 0.8, 20_000));

        let summary = PerformanceSummary::from_ledger(
            &StrategyId::new("s1"),
            &GameId::new("g1"),
            &ledger,
        );

        assert_eq!(summary.trades_executed, 3);
        assert_eq!(summary.winning_trades, 1);
        assert_eq!(summary.losing_trades, 1);
        assert_relative_eq!(summary.win_rate, 0.5);
        assert_relative_eq!(summary.realized_pnl, 0.3, epsilon = 1e-9);
        assert_relative_eq!(summary.avg_pnl_per_trade, 0.15, epsilon = 1e-9);
        assert_relative_eq!(summary.total_invested, 2.0);
        assert_relative_eq!(summary.total_returned, 2.3, epsilon = 1e-9);
        assert_relative_eq!(summary.best_trade_pnl, 0.5, epsilon = 1e-9);
        assert_relative_eq!(summary.worst_trade_pnl, -0.2, epsilon = 1e-9);
        // Holding: 0.5 qty held 10s, 0.5 qty held 20s -> 15s average.
        assert_relative_eq!(summary.average_holding_time_seconds, 15.0, epsilon = 1e-9);
        // Population std dev of {0.5, -0.2} is 0.35.
        assert_relative_eq!(summary.pnl_std_dev, 0.35, epsilon = 1e-9);
    }

    #[test]
    fn test_empty_ledger_summary() {
        let ledger = PositionLedger::new();
        let summary = PerformanceSummary::from_ledger(
            &StrategyId::new("s1"),
            &GameId::new("g1"),
            &ledger,
        );

        assert_eq!(summary.trades_executed, 0);
        assert_relative_eq!(summary.win_rate, 0.0);
        assert_relative_eq!(summary.realized_pnl, 0.0);
    }
}
