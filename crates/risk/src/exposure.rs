//! Live exposure counters, per strategy and process-wide.

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use crash_core::{ExposureView, Result, StrategyId};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// What a sell settlement releases from exposure: the FIFO cost basis the
/// ledger consumed, and the number of lots it fully closed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SellRelease {
    pub cost_basis: f64,
    pub lots_closed: u32,
}

/// One strategy's live exposure.
///
/// `capital_at_risk` is the cost basis of currently open lots, tracked
/// independently of the ledger for O(1) limit checks; `open_trades_count`
/// is the number of distinct open lots. Both clamp at zero: negative
/// economic quantities are undefined in this domain, so floating-point
/// drift is corrected and logged instead of propagated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ExposureState {
    /// Cost basis of currently open lots.
    pub capital_at_risk: f64,
    /// Number of distinct open lots.
    pub open_trades_count: u32,
}

impl ExposureState {
    fn charge(&mut self, amount: f64) {
        self.capital_at_risk += amount;
        self.open_trades_count += 1;
    }

    fn release(&mut self, release: SellRelease, strategy: &StrategyId) {
        self.capital_at_risk -= release.cost_basis;
        if self.capital_at_risk < 0.0 {
            warn!(
                strategy = %strategy,
                drift = self.capital_at_risk,
                "capital at risk clamped to zero"
            );
            self.capital_at_risk = 0.0;
        }
        if release.lots_closed > self.open_trades_count {
            warn!(
                strategy = %strategy,
                open = self.open_trades_count,
                closed = release.lots_closed,
                "open-trade count clamped to zero"
            );
            self.open_trades_count = 0;
        } else {
            self.open_trades_count -= release.lots_closed;
        }
    }
}

/// Exposure counters for every strategy plus process-wide totals.
#[derive(Debug, Clone, Default)]
pub struct ExposureBook {
    strategies: HashMap<StrategyId, ExposureState>,
    total_capital_at_risk: f64,
    total_open_trades: u32,
}

impl ExposureBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// One strategy's counters (zeroes if it never traded).
    pub fn state(&self, strategy: &StrategyId) -> ExposureState {
        self.strategies.get(strategy).copied().unwrap_or_default()
    }

    /// Cost basis open across all strategies.
    pub fn total_capital_at_risk(&self) -> f64 {
        self.total_capital_at_risk
    }

    /// Open lots across all strategies.
    pub fn total_open_trades(&self) -> u32 {
        self.total_open_trades
    }

    /// Record a buy settlement: the full spend goes at-risk as one new lot.
    pub fn charge(&mut self, strategy: &StrategyId, amount: f64) {
        self.strategies
            .entry(strategy.clone())
            .or_default()
            .charge(amount);
        self.total_capital_at_risk += amount;
        self.total_open_trades += 1;
    }

    /// Record a sell settlement: release the consumed cost basis and closed
    /// lots, clamping both the strategy's counters and the totals at zero.
    pub fn release(&mut self, strategy: &StrategyId, release: SellRelease) {
        self.strategies
            .entry(strategy.clone())
            .or_default()
            .release(release, strategy);

        self.total_capital_at_risk -= release.cost_basis;
        if self.total_capital_at_risk < 0.0 {
            warn!(
                drift = self.total_capital_at_risk,
                "total capital at risk clamped to zero"
            );
            self.total_capital_at_risk = 0.0;
        }
        if release.lots_closed > self.total_open_trades {
            warn!(
                open = self.total_open_trades,
                closed = release.lots_closed,
                "total open-trade count clamped to zero"
            );
            self.total_open_trades = 0;
        } else {
            self.total_open_trades -= release.lots_closed;
        }
    }

    /// The exposure view published with limit-breach notifications.
    pub fn view(&self, strategy: &StrategyId) -> ExposureView {
        let state = self.state(strategy);
        ExposureView {
            capital_at_risk: state.capital_at_risk,
            open_trades_count: state.open_trades_count,
            total_capital_at_risk: self.total_capital_at_risk,
            total_open_trades: self.total_open_trades,
        }
    }

    /// Capture the counters for persistence across restarts.
    pub fn snapshot(&self) -> ExposureSnapshot {
        ExposureSnapshot {
            saved_at: Utc::now(),
            strategies: self
                .strategies
                .iter()
                .map(|(id, state)| (id.as_str().to_string(), *state))
                .collect(),
        }
    }

    /// Rebuild the book (including totals) from a snapshot.
    pub fn restore(snapshot: &ExposureSnapshot) -> Self {
        let mut book = Self::new();
        for (id, state) in &snapshot.strategies {
            book.strategies.insert(StrategyId::new(id.clone()), *state);
            book.total_capital_at_risk += state.capital_at_risk;
            book.total_open_trades += state.open_trades_count;
        }
        book
    }
}

/// Persisted form of the exposure counters, so a crash between settlements
/// does not lose risk state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExposureSnapshot {
    /// When the snapshot was taken.
    pub saved_at: DateTime<Utc>,
    /// Counters keyed by strategy id.
    pub strategies: HashMap<String, ExposureState>,
}

impl ExposureSnapshot {
    /// Write the snapshot as JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Read a snapshot previously written by [`save`](Self::save).
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn sid(s: &str) -> StrategyId {
        StrategyId::new(s)
    }

    #[test]
    fn test_charge_and_release_roundtrip() {
        let mut book = ExposureBook::new();
        book.charge(&sid("s1"), 1.0);

        let state = book.state(&sid("s1"));
        assert_relative_eq!(state.capital_at_risk, 1.0);
        assert_eq!(state.open_trades_count, 1);
        assert_relative_eq!(book.total_capital_at_risk(), 1.0);

        book.release(
            &sid("s1"),
            SellRelease {
                cost_basis: 1.0,
                lots_closed: 1,
            },
        );
        let state = book.state(&sid("s1"));
        assert_relative_eq!(state.capital_at_risk, 0.0);
        assert_eq!(state.open_trades_count, 0);
        assert_eq!(book.total_open_trades(), 0);
    }

    #[test]
    fn test_drift_clamps_to_zero() {
        let mut book = ExposureBook::new();
        book.charge(&sid("s1"), 0.5);

        // Release more basis than was ever charged (drift).
        book.release(
            &sid("s1"),
            SellRelease {
                cost_basis: 0.5000001,
                lots_closed: 2,
            },
        );

        let state = book.state(&sid("s1"));
        assert_relative_eq!(state.capital_at_risk, 0.0);
        assert_eq!(state.open_trades_count, 0);
        assert_relative_eq!(book.total_capital_at_risk(), 0.0);
        assert_eq!(book.total_open_trades(), 0);
    }

    #[test]
    fn test_totals_span_strategies() {
        let mut book = ExposureBook::new();
        book.charge(&sid("a"), 1.0);
        book.charge(&sid("b"), 2.0);

        assert_relative_eq!(book.total_capital_at_risk(), 3.0);
        assert_eq!(book.total_open_trades(), 2);

        let view = book.view(&sid("a"));
        assert_relative_eq!(view.capital_at_risk, 1.0);
        assert_relative_eq!(view.total_capital_at_risk, 3.0);
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let mut book = ExposureBook::new();
        book.charge(&sid("a"), 1.25);
        book.charge(&sid("b"), 0.75);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("exposure.json");
        book.snapshot().save(&path).unwrap();

        let restored = ExposureBook::restore(&ExposureSnapshot::load(&path).unwrap());
        assert_relative_eq!(restored.total_capital_at_risk(), 2.0);
        assert_eq!(restored.total_open_trades(), 2);
        assert_relative_eq!(restored.state(&sid("a")).capital_at_risk, 1.25);
    }
}
