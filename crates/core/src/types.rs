//! Core data types for the crash-trader system.

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

/// Timestamp in milliseconds since Unix epoch (UTC).
pub type TimestampMs = i64;

/// Game tick counter (monotonically increasing within one session).
pub type Tick = u32;

/// Price type with ordering support.
pub type Price = OrderedFloat<f64>;

/// Epsilon for price-scale comparisons (P&L classification).
pub const PRICE_EPS: f64 = 1e-8;

/// Epsilon for token-quantity comparisons (FIFO consumption).
pub const QTY_EPS: f64 = 1e-9;

/// Check whether a quantity is zero within token-scale tolerance.
#[inline]
pub fn qty_is_zero(qty: f64) -> bool {
    qty.abs() < QTY_EPS
}

/// Check whether two price-scale values are equal within tolerance.
#[inline]
pub fn price_approx_eq(a: f64, b: f64) -> bool {
    (a - b).abs() < PRICE_EPS
}

/// Identifier of one game session (one play-through, start to rug).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GameId(pub String);

impl GameId {
    pub fn new(id: impl Into<String>) -> Self {
        GameId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for GameId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a strategy owned by this process.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StrategyId(pub String);

impl StrategyId {
    pub fn new(id: impl Into<String>) -> Self {
        StrategyId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for StrategyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of a position owner: one of our strategies, or a live player
/// observed on the feed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OwnerId {
    /// A strategy run by this process.
    Strategy(StrategyId),
    /// An external player observed on the game feed.
    Player(String),
}

impl OwnerId {
    pub fn strategy(id: impl Into<String>) -> Self {
        OwnerId::Strategy(StrategyId::new(id))
    }

    pub fn player(id: impl Into<String>) -> Self {
        OwnerId::Player(id.into())
    }
}

impl std::fmt::Display for OwnerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OwnerId::Strategy(s) => write!(f, "strategy:{}", s),
            OwnerId::Player(p) => write!(f, "player:{}", p),
        }
    }
}

/// Currency a trade is denominated in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Currency {
    /// The game's primary currency.
    Primary,
    /// Bonus/free-play currency.
    Bonus,
}

impl Currency {
    /// Parse a feed-provided currency tag. Returns `None` for anything the
    /// upstream inference heuristic produced that we do not recognize.
    pub fn parse(tag: &str) -> Option<Currency> {
        match tag {
            "primary" | "sol" => Some(Currency::Primary),
            "bonus" | "freeplay" => Some(Currency::Bonus),
            _ => None,
        }
    }
}

impl std::fmt::Display for Currency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Currency::Primary => write!(f, "primary"),
            Currency::Bonus => write!(f, "bonus"),
        }
    }
}

/// Direction of a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeKind {
    Buy,
    Sell,
}

/// Phase of one game session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GamePhase {
    /// Pre-round buy-in window, before the multiplier starts moving.
    Presale,
    /// Multiplier live and moving.
    Active,
    /// Terminal settlement; the round has rugged.
    Rugged,
}

impl GamePhase {
    /// Whether new buys are allowed in this phase.
    #[inline]
    pub fn allows_entry(self) -> bool {
        matches!(self, GamePhase::Presale | GamePhase::Active)
    }

    /// Whether this is the terminal phase of a session.
    #[inline]
    pub fn is_terminal(self) -> bool {
        matches!(self, GamePhase::Rugged)
    }
}

/// Structured game-state event from the ingestion layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameStateEvent {
    /// Session identifier.
    pub game_id: GameId,
    /// Game tick counter.
    pub tick: Tick,
    /// Current multiplier.
    pub price: f64,
    /// Current phase.
    pub phase: GamePhase,
    /// Event timestamp in milliseconds.
    pub timestamp: TimestampMs,
}

impl GameStateEvent {
    /// Validate numeric fields at the collaborator boundary.
    ///
    /// Rejects non-finite or negative prices; the core never sees them.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if !self.price.is_finite() {
            return Err(format!("non-finite price: {}", self.price));
        }
        if self.price < 0.0 {
            return Err(format!("negative price: {}", self.price));
        }
        Ok(())
    }
}

/// Observed trade by any participant, from the ingestion layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservedTradeEvent {
    /// Session identifier.
    pub game_id: GameId,
    /// Player who traded.
    pub player_id: String,
    /// Buy or sell.
    pub kind: TradeKind,
    /// Currency tag as inferred upstream. Parsed (and possibly quarantined)
    /// at the ledger boundary.
    pub currency: String,
    /// Token quantity.
    pub quantity: f64,
    /// Execution price (multiplier).
    pub price: f64,
    /// Currency amount (spend for buys, proceeds for sells).
    pub currency_amount: f64,
    /// Game tick at execution.
    pub tick: Tick,
    /// Event timestamp in milliseconds.
    pub timestamp: TimestampMs,
}

impl ObservedTradeEvent {
    /// Validate numeric fields at the collaborator boundary.
    pub fn validate(&self) -> std::result::Result<(), String> {
        for (name, v) in [
            ("quantity", self.quantity),
            ("price", self.price),
            ("currency_amount", self.currency_amount),
        ] {
            if !v.is_finite() {
                return Err(format!("non-finite {name}: {v}"));
            }
            if v < 0.0 {
                return Err(format!("negative {name}: {v}"));
            }
        }
        Ok(())
    }
}

/// Synthetic current-state snapshot maintained while replaying (and mirrored
/// from the live feed): the last known price, tick, and phase of a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameSnapshot {
    /// Session identifier.
    pub game_id: GameId,
    /// Last seen tick.
    pub tick: Tick,
    /// Last seen price.
    pub price: f64,
    /// Last seen phase.
    pub phase: GamePhase,
    /// Timestamp of the last applied event.
    pub timestamp: TimestampMs,
}

impl GameSnapshot {
    /// Snapshot for a session that has produced no events yet.
    pub fn initial(game_id: GameId) -> Self {
        Self {
            game_id,
            tick: 0,
            price: 0.0,
            phase: GamePhase::Presale,
            timestamp: 0,
        }
    }

    /// Fold a game-state event into the snapshot.
    pub fn apply(&mut self, event: &GameStateEvent) {
        self.tick = event.tick;
        self.price = event.price;
        self.phase = event.phase;
        self.timestamp = event.timestamp;
    }
}
