//! Per-(owner, currency) position state and the FIFO consumption algorithm.

use std::collections::VecDeque;

use crash_core::{qty_is_zero, Currency, OwnerId, TimestampMs, PRICE_EPS, QTY_EPS};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::lot::Lot;

/// What a trade-log entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeLogKind {
    Buy,
    Sell,
    /// Terminal valuation of the remaining balance at session end.
    Liquidation,
}

/// One entry in a position's trade log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeLogEntry {
    /// What happened.
    pub kind: TradeLogKind,
    /// Token quantity involved.
    pub quantity: f64,
    /// Currency amount: spend for buys, proceeds for sells/liquidation.
    pub currency_amount: f64,
    /// FIFO cost basis consumed (sells only; zero otherwise).
    pub cost_basis: f64,
    /// Realized P&L contribution (sells only; zero for buys).
    pub pnl: f64,
    /// Quantity-weighted holding time of the sold tokens, in ms.
    pub holding_ms: f64,
    /// When it happened.
    pub timestamp: TimestampMs,
}

/// Result of walking the FIFO lots for one sell.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SellOutcome {
    /// Cost basis of the matched quantity.
    pub cost_basis: f64,
    /// Quantity actually matched against open lots.
    pub quantity_matched: f64,
    /// Number of lots fully consumed and removed.
    pub lots_closed: u32,
    /// Quantity-weighted holding time of the matched tokens, in ms.
    pub weighted_holding_ms: f64,
    /// Unmatched remainder when history was insufficient (zero otherwise).
    pub shortfall: f64,
}

/// Lot-based record of one owner's holdings in one currency.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrencyPosition {
    /// Who owns the position.
    pub owner: OwnerId,
    /// Currency of the position.
    pub currency: Currency,
    /// Current token balance. Invariant: equals the sum of remaining lot
    /// quantities, and never goes negative.
    pub balance: f64,
    /// Total currency ever spent on buys. Monotone within a session.
    pub total_invested: f64,
    /// Total currency ever returned by sells/liquidation. Monotone.
    pub total_returned: f64,
    /// Realized profit/loss.
    pub realized_pnl: f64,
    /// Open lots, oldest first.
    pub lots: VecDeque<Lot>,
    /// Every trade applied to this position.
    pub trades: Vec<TradeLogEntry>,
    /// Executed trade count (buys + sells).
    pub executed_count: u32,
    /// Sells settled at a profit.
    pub winning_count: u32,
    /// Sells settled at a loss.
    pub losing_count: u32,
    /// Sells settled within epsilon of breakeven.
    pub breakeven_count: u32,
    /// Cumulative Σ taken * (sell_ts - entry_ts) over all sells, in ms.
    pub cum_holding_qty_ms: f64,
    /// Cumulative quantity matched by sells.
    pub cum_matched_qty: f64,
    /// Whether terminal liquidation has run.
    pub liquidated: bool,
}

impl CurrencyPosition {
    /// Create an empty position.
    pub fn new(owner: OwnerId, currency: Currency) -> Self {
        Self {
            owner,
            currency,
            balance: 0.0,
            total_invested: 0.0,
            total_returned: 0.0,
            realized_pnl: 0.0,
            lots: VecDeque::new(),
            trades: Vec::new(),
            executed_count: 0,
            winning_count: 0,
            losing_count: 0,
            breakeven_count: 0,
            cum_holding_qty_ms: 0.0,
            cum_matched_qty: 0.0,
            liquidated: false,
        }
    }

    /// Whether the position holds any tokens.
    pub fn is_open(&self) -> bool {
        self.balance > QTY_EPS
    }

    /// Number of open lots.
    pub fn open_lot_count(&self) -> usize {
        self.lots.len()
    }

    /// Sum of remaining lot quantities (invariant check helper).
    pub fn lot_quantity_sum(&self) -> f64 {
        self.lots.iter().map(|l| l.quantity).sum()
    }

    /// Average holding time of sold tokens, in seconds.
    pub fn average_holding_secs(&self) -> f64 {
        if self.cum_matched_qty > QTY_EPS {
            self.cum_holding_qty_ms / self.cum_matched_qty / 1000.0
        } else {
            0.0
        }
    }

    /// Record a buy: append a lot and grow balance/invested.
    pub fn apply_buy(&mut self, quantity: f64, total_cost: f64, timestamp: TimestampMs) {
        debug_assert!(quantity > 0.0, "buy quantity must be positive");
        debug_assert!(total_cost >= 0.0, "buy cost must be non-negative");

        self.lots.push_back(Lot::new(quantity, total_cost, timestamp));
        self.balance += quantity;
        self.total_invested += total_cost;
        self.executed_count += 1;
        // A buy after terminal settlement belongs to a new session; the
        // position is live again and eligible for the next liquidation.
        self.liquidated = false;
        self.trades.push(TradeLogEntry {
            kind: TradeLogKind::Buy,
            quantity,
            currency_amount: total_cost,
            cost_basis: 0.0,
            pnl: 0.0,
            holding_ms: 0.0,
            timestamp,
        });

        debug_assert!(
            (self.balance - self.lot_quantity_sum()).abs() < 1e-6,
            "balance diverged from lot sum"
        );
    }

    /// Consume open lots oldest-first to cover `quantity_to_sell`.
    ///
    /// Fully consumed lots are removed; a partially consumed lot shrinks in
    /// place. Stops when the remainder is zero within epsilon or lots are
    /// exhausted. An unmatched remainder is reported as `shortfall`, not an
    /// error. The balance decreases by the matched quantity only.
    pub fn apply_sell(&mut self, quantity_to_sell: f64, timestamp: TimestampMs) -> SellOutcome {
        let mut remaining = quantity_to_sell;
        let mut cost_basis = 0.0;
        let mut matched = 0.0;
        let mut lots_closed = 0u32;
        let mut holding_qty_ms = 0.0;

        while remaining > QTY_EPS {
            let Some(lot) = self.lots.front_mut() else {
                break;
            };
            let taken = lot.quantity.min(remaining);
            cost_basis += taken * lot.unit_cost;
            holding_qty_ms += taken * (timestamp - lot.entry_ts) as f64;
            matched += taken;
            remaining -= taken;
            lot.consume(taken);
            if qty_is_zero(lot.quantity) {
                self.lots.pop_front();
                lots_closed += 1;
            }
        }

        let shortfall = if remaining > QTY_EPS { remaining } else { 0.0 };
        if shortfall > 0.0 {
            warn!(
                owner = %self.owner,
                currency = %self.currency,
                requested = quantity_to_sell,
                matched,
                shortfall,
                "sell exceeded lot history; reporting partial match"
            );
        }

        self.balance -= matched;
        if self.balance < 0.0 {
            // Floating-point drift only; economic negatives are undefined.
            warn!(owner = %self.owner, balance = self.balance, "balance clamped to zero");
            self.balance = 0.0;
        }
        self.cum_holding_qty_ms += holding_qty_ms;
        self.cum_matched_qty += matched;

        debug_assert!(
            (self.balance - self.lot_quantity_sum()).abs() < 1e-6,
            "balance diverged from lot sum"
        );

        SellOutcome {
            cost_basis,
            quantity_matched: matched,
            lots_closed,
            weighted_holding_ms: if matched > QTY_EPS {
                holding_qty_ms / matched
            } else {
                0.0
            },
            shortfall,
        }
    }

    /// Settle the proceeds of a sell whose lots were already consumed by
    /// [`apply_sell`]: update returned/realized totals and classify the
    /// trade as win, loss, or breakeven.
    pub fn settle_sell_proceeds(
        &mut self,
        outcome: &SellOutcome,
        proceeds: f64,
        timestamp: TimestampMs,
    ) {
        self.total_returned += proceeds;
        let pnl = proceeds - outcome.cost_basis;
        self.realized_pnl += pnl;
        self.executed_count += 1;

        if pnl > PRICE_EPS {
            self.winning_count += 1;
        } else if pnl < -PRICE_EPS {
            self.losing_count += 1;
        } else {
            self.breakeven_count += 1;
        }

        self.trades.push(TradeLogEntry {
            kind: TradeLogKind::Sell,
            quantity: outcome.quantity_matched,
            currency_amount: proceeds,
            cost_basis: outcome.cost_basis,
            pnl,
            holding_ms: outcome.weighted_holding_ms,
            timestamp,
        });
    }

    /// Value any remaining balance at the session's final price, exactly
    /// once. Later calls are no-ops.
    ///
    /// Returns the liquidation value credited (zero when nothing was open).
    pub fn liquidate_at_session_end(&mut self, final_price: f64, timestamp: TimestampMs) -> f64 {
        if self.liquidated || !self.is_open() {
            self.liquidated = true;
            return 0.0;
        }

        let quantity = self.balance;
        let value = quantity * final_price;
        self.total_returned += value;
        self.realized_pnl = self.total_returned - self.total_invested;
        self.balance = 0.0;
        self.lots.clear();
        self.liquidated = true;

        self.trades.push(TradeLogEntry {
            kind: TradeLogKind::Liquidation,
            quantity,
            currency_amount: value,
            cost_basis: 0.0,
            pnl: 0.0,
            holding_ms: 0.0,
            timestamp,
        });

        value
    }
}
