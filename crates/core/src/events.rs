//! Trade intents, settlement events, and risk notifications.
//!
//! A [`SettlementEvent`] is the immutable record produced once a trade has
//! been priced and fee-adjusted. Both the live path and replay produce the
//! same event shape, which is what keeps live and backtest P&L comparable.

use serde::{Deserialize, Serialize};

use crate::types::{Currency, GameId, StrategyId, Tick, TimestampMs, TradeKind};

/// Sizing of a trade intent: buys are denominated in currency to spend,
/// sells in token quantity or percentage of the open balance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentSize {
    /// Currency amount to spend (buy).
    Amount(f64),
    /// Token quantity to sell.
    Quantity(f64),
    /// Percentage of the open balance to sell (0-100).
    Percentage(f64),
}

impl IntentSize {
    /// The raw numeric value, whatever the denomination.
    #[inline]
    pub fn value(self) -> f64 {
        match self {
            IntentSize::Amount(v) | IntentSize::Quantity(v) | IntentSize::Percentage(v) => v,
        }
    }
}

/// A strategy's proposed trade. Transient: produced by a strategy decision,
/// consumed by the simulator after passing the gatekeeper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeIntent {
    /// Strategy proposing the trade.
    pub strategy_id: StrategyId,
    /// Buy or sell.
    pub kind: TradeKind,
    /// Currency the trade is denominated in.
    pub currency: Currency,
    /// How large the trade is.
    pub size: IntentSize,
    /// Session the trade targets.
    pub game_id: GameId,
    /// Tick at which the intent was formed.
    pub tick: Tick,
}

impl TradeIntent {
    /// Convenience constructor for a buy intent.
    pub fn buy(
        strategy_id: StrategyId,
        currency: Currency,
        amount: f64,
        game_id: GameId,
        tick: Tick,
    ) -> Self {
        Self {
            strategy_id,
            kind: TradeKind::Buy,
            currency,
            size: IntentSize::Amount(amount),
            game_id,
            tick,
        }
    }

    /// Convenience constructor for a sell-by-quantity intent.
    pub fn sell_quantity(
        strategy_id: StrategyId,
        currency: Currency,
        quantity: f64,
        game_id: GameId,
        tick: Tick,
    ) -> Self {
        Self {
            strategy_id,
            kind: TradeKind::Sell,
            currency,
            size: IntentSize::Quantity(quantity),
            game_id,
            tick,
        }
    }

    /// Convenience constructor for a sell-by-percentage intent.
    pub fn sell_percentage(
        strategy_id: StrategyId,
        currency: Currency,
        percent: f64,
        game_id: GameId,
        tick: Tick,
    ) -> Self {
        Self {
            strategy_id,
            kind: TradeKind::Sell,
            currency,
            size: IntentSize::Percentage(percent),
            game_id,
            tick,
        }
    }
}

/// Immutable settlement fact for one executed (simulated) trade.
///
/// For buys, `currency_amount` is the full amount spent (fee included);
/// for sells it is the net proceeds (fee already deducted).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementEvent {
    /// Strategy the settlement belongs to.
    pub strategy_id: StrategyId,
    /// Session the trade executed in.
    pub game_id: GameId,
    /// Buy or sell.
    pub kind: TradeKind,
    /// Currency the trade settled in.
    pub currency: Currency,
    /// Token quantity bought or sold.
    pub quantity: f64,
    /// Currency amount: spend for buys, net proceeds for sells.
    pub currency_amount: f64,
    /// Execution price (multiplier).
    pub price: f64,
    /// Fee rate applied (e.g. 0.01 for 1%).
    pub fee_rate: f64,
    /// Settlement timestamp in milliseconds.
    pub timestamp: TimestampMs,
    /// Game tick at execution.
    pub tick: Tick,
}

/// Snapshot of a strategy's exposure at the moment a limit was breached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExposureView {
    /// Cost basis of the strategy's currently open lots.
    pub capital_at_risk: f64,
    /// Number of distinct open lots.
    pub open_trades_count: u32,
    /// Cost basis across all strategies.
    pub total_capital_at_risk: f64,
    /// Open lots across all strategies.
    pub total_open_trades: u32,
}

/// Risk-limit-breach notification published when the gatekeeper rejects a
/// trade: which limit, the attempted trade, and the exposure at that moment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitBreach {
    /// Name of the violated limit (e.g. `"max_buy_amount"`).
    pub limit: String,
    /// The trade that was rejected.
    pub intent: TradeIntent,
    /// Exposure counters at rejection time.
    pub exposure: ExposureView,
    /// When the rejection happened.
    pub timestamp: TimestampMs,
}

/// Tagged union of every message that flows over the event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BusMessage {
    /// Game-state tick from the feed (live) or history (replay).
    GameState(crate::types::GameStateEvent),
    /// Trade by any participant observed on the feed.
    ObservedTrade(crate::types::ObservedTradeEvent),
    /// A simulated trade settled.
    Settlement(SettlementEvent),
    /// The gatekeeper rejected a trade.
    LimitBreach(LimitBreach),
}
