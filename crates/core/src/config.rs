//! Configuration structures for the crash-trader system.
//!
//! Risk limits are loaded once per session and never mutated afterwards.
//! Missing or invalid fields resolve to permissive (unbounded) values with a
//! loud warning instead of refusing to start: a running-but-loosely-bounded
//! bot is preferred to a nonfunctional one. This is a stated design choice,
//! not a hidden default.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::types::{StrategyId, Tick};

/// Presale-window override: a separate buy cap that applies while
/// `current_tick <= window_end_tick`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PresaleOverride {
    /// Last tick (inclusive) at which the override applies.
    pub window_end_tick: Tick,
    /// Maximum buy amount during the window.
    pub max_buy_amount: f64,
}

/// Per-strategy risk limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyLimits {
    /// Maximum currency amount per buy.
    pub max_buy_amount: f64,
    /// Maximum number of simultaneously open lots.
    pub max_open_trades: u32,
    /// Maximum cost basis held open at once.
    pub max_strategy_exposure: f64,
    /// Earliest tick at which buys are allowed.
    pub min_safe_tick: Tick,
    /// Optional early-window buy cap.
    pub presale: Option<PresaleOverride>,
}

impl StrategyLimits {
    /// Unbounded limits: every check passes.
    pub fn permissive() -> Self {
        Self {
            max_buy_amount: f64::INFINITY,
            max_open_trades: u32::MAX,
            max_strategy_exposure: f64::INFINITY,
            min_safe_tick: 0,
            presale: None,
        }
    }
}

/// Process-wide risk limits, shared across strategies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalLimits {
    /// Maximum currency amount per buy, regardless of strategy.
    pub max_buy_amount: f64,
    /// Maximum total cost basis held open across strategies.
    pub max_total_exposure: f64,
    /// Maximum open lots across strategies.
    pub max_concurrent_trades: u32,
}

impl GlobalLimits {
    /// Unbounded limits: every check passes.
    pub fn permissive() -> Self {
        Self {
            max_buy_amount: f64::INFINITY,
            max_total_exposure: f64::INFINITY,
            max_concurrent_trades: u32::MAX,
        }
    }
}

/// Immutable per-session risk configuration: a default strategy profile,
/// optional named overrides, and global bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskLimits {
    /// Limits applied to any strategy without an override.
    pub default_strategy: StrategyLimits,
    /// Per-strategy overrides, keyed by strategy id.
    pub overrides: HashMap<String, StrategyLimits>,
    /// Global limits.
    pub global: GlobalLimits,
}

impl RiskLimits {
    /// Everything unbounded.
    pub fn permissive() -> Self {
        Self {
            default_strategy: StrategyLimits::permissive(),
            overrides: HashMap::new(),
            global: GlobalLimits::permissive(),
        }
    }

    /// Limits for one strategy (override, or the default profile).
    pub fn for_strategy(&self, id: &StrategyId) -> &StrategyLimits {
        self.overrides
            .get(id.as_str())
            .unwrap_or(&self.default_strategy)
    }

    /// Load limits from a JSON file, resolving missing or invalid fields to
    /// permissive values with a warning. An unreadable or unparsable file
    /// yields fully permissive limits, also with a warning.
    pub fn load_or_permissive(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) => {
                warn!(path = %path.display(), %err, "risk limits file unreadable; running with PERMISSIVE limits");
                return Self::permissive();
            }
        };
        match serde_json::from_str::<RawRiskLimits>(&text) {
            Ok(raw) => raw.resolve(),
            Err(err) => {
                warn!(path = %path.display(), %err, "risk limits file invalid; running with PERMISSIVE limits");
                Self::permissive()
            }
        }
    }
}

/// Simulation parameters shared by the live path and replay.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimConfig {
    /// Fee rate applied to both sides of a trade (e.g. 0.01 for 1%).
    pub fee_rate: f64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self { fee_rate: 0.01 }
    }
}

impl SimConfig {
    /// Validate the fee rate, falling back to the default with a warning if
    /// it is outside [0, 1).
    pub fn validated(self) -> Self {
        if self.fee_rate.is_finite() && (0.0..1.0).contains(&self.fee_rate) {
            self
        } else {
            warn!(fee_rate = self.fee_rate, "invalid fee rate; using default");
            Self::default()
        }
    }
}

/// Raw (all-optional) mirror of [`StrategyLimits`] as read from disk.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawStrategyLimits {
    pub max_buy_amount: Option<f64>,
    pub max_open_trades: Option<u32>,
    pub max_strategy_exposure: Option<f64>,
    pub min_safe_tick: Option<Tick>,
    pub presale_window_end_tick: Option<Tick>,
    pub presale_max_buy_amount: Option<f64>,
}

impl RawStrategyLimits {
    fn resolve(&self, scope: &str) -> StrategyLimits {
        let max_buy_amount = resolve_amount(self.max_buy_amount, scope, "max_buy_amount");
        let max_strategy_exposure =
            resolve_amount(self.max_strategy_exposure, scope, "max_strategy_exposure");
        let max_open_trades = self.max_open_trades.unwrap_or_else(|| {
            warn!(scope, "max_open_trades missing; unbounded");
            u32::MAX
        });
        let min_safe_tick = self.min_safe_tick.unwrap_or(0);

        // The presale override only exists when both halves are present.
        let presale = match (self.presale_window_end_tick, self.presale_max_buy_amount) {
            (Some(window_end_tick), Some(cap)) if cap.is_finite() && cap >= 0.0 => {
                Some(PresaleOverride {
                    window_end_tick,
                    max_buy_amount: cap,
                })
            }
            (None, None) => None,
            _ => {
                warn!(scope, "incomplete or invalid presale override; ignored");
                None
            }
        };

        StrategyLimits {
            max_buy_amount,
            max_open_trades,
            max_strategy_exposure,
            min_safe_tick,
            presale,
        }
    }
}

/// Raw (all-optional) mirror of [`GlobalLimits`] as read from disk.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawGlobalLimits {
    pub max_buy_amount: Option<f64>,
    pub max_total_exposure: Option<f64>,
    pub max_concurrent_trades: Option<u32>,
}

impl RawGlobalLimits {
    fn resolve(&self) -> GlobalLimits {
        GlobalLimits {
            max_buy_amount: resolve_amount(self.max_buy_amount, "global", "max_buy_amount"),
            max_total_exposure: resolve_amount(
                self.max_total_exposure,
                "global",
                "max_total_exposure",
            ),
            max_concurrent_trades: self.max_concurrent_trades.unwrap_or_else(|| {
                warn!(scope = "global", "max_concurrent_trades missing; unbounded");
                u32::MAX
            }),
        }
    }
}

/// Raw risk-limits document.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawRiskLimits {
    #[serde(default)]
    pub strategy: RawStrategyLimits,
    #[serde(default)]
    pub overrides: HashMap<String, RawStrategyLimits>,
    #[serde(default)]
    pub global: RawGlobalLimits,
}

impl RawRiskLimits {
    /// Resolve to concrete limits, warning once per defaulted field.
    pub fn resolve(&self) -> RiskLimits {
        RiskLimits {
            default_strategy: self.strategy.resolve("strategy"),
            overrides: self
                .overrides
                .iter()
                .map(|(name, raw)| (name.clone(), raw.resolve(name)))
                .collect(),
            global: self.global.resolve(),
        }
    }
}

fn resolve_amount(value: Option<f64>, scope: &str, field: &str) -> f64 {
    match value {
        Some(v) if v.is_finite() && v >= 0.0 => v,
        Some(v) => {
            warn!(scope, field, value = v, "invalid limit; unbounded");
            f64::INFINITY
        }
        None => {
            warn!(scope, field, "limit missing; unbounded");
            f64::INFINITY
        }
    }
}
