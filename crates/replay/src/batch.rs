//! Batch driver: many sessions through the replay orchestrator.
//!
//! A session that fails to load aborts only its own run; the batch logs the
//! failure and continues with the remaining sessions.

use crash_core::{GameId, RiskLimits, SimConfig};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::orchestrator::{ReplayRun, Strategy};
use crate::store::SessionStore;
use crate::summary::PerformanceSummary;

/// One failed session in a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchFailure {
    pub game_id: GameId,
    pub error: String,
}

/// Outcome of a batch of replay runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchReport {
    /// Summaries of completed runs, in input order.
    pub summaries: Vec<PerformanceSummary>,
    /// Sessions that were skipped after a failure.
    pub failed: Vec<BatchFailure>,
}

impl BatchReport {
    /// Total realized P&L across completed runs.
    pub fn total_pnl(&self) -> f64 {
        self.summaries.iter().map(|s| s.realized_pnl).sum()
    }

    /// Mean realized P&L per completed run.
    pub fn average_pnl(&self) -> f64 {
        if self.summaries.is_empty() {
            0.0
        } else {
            self.total_pnl() / self.summaries.len() as f64
        }
    }
}

/// Replay `game_ids` sequentially, one isolated run per session.
///
/// `make_strategy` builds a fresh strategy per run so no decision state
/// leaks between sessions.
pub async fn run_batch(
    store: &dyn SessionStore,
    game_ids: &[GameId],
    make_strategy: impl Fn() -> Box<dyn Strategy>,
    limits: &RiskLimits,
    sim_config: SimConfig,
) -> BatchReport {
    let mut report = BatchReport::default();

    for game_id in game_ids {
        let mut run = ReplayRun::new(
            game_id.clone(),
            make_strategy(),
            limits.clone(),
            sim_config,
        );
        match run.run(store).await {
            Ok(summary) => report.summaries.push(summary),
            Err(err) => {
                warn!(game = %game_id, %err, "session skipped");
                report.failed.push(BatchFailure {
                    game_id: game_id.clone(),
                    error: err.to_string(),
                });
            }
        }
    }

    info!(
        completed = report.summaries.len(),
        failed = report.failed.len(),
        total_pnl = report.total_pnl(),
        "batch finished"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::StrategyView;
    use crate::store::{
        DiscreteEventKind, DiscreteEventRow, MemorySessionStore, PriceTickRow, SessionDetails,
    };
    use approx::assert_relative_eq;
    use crash_core::{
        Currency, GamePhase, GameSnapshot, Result, StrategyId, TradeIntent,
    };

    struct BuyAndHold;

    impl Strategy for BuyAndHold {
        fn id(&self) -> StrategyId {
            StrategyId::new("hold")
        }

        fn on_game_state(
            &mut self,
            snapshot: &GameSnapshot,
            view: &StrategyView,
        ) -> Result<Vec<TradeIntent>> {
            if view.open_trades_count == 0 && snapshot.phase == GamePhase::Active {
                Ok(vec![TradeIntent::buy(
                    self.id(),
                    Currency::Primary,
                    0.5,
                    snapshot.game_id.clone(),
                    snapshot.tick,
                )])
            } else {
                Ok(Vec::new())
            }
        }
    }

    fn session(game: &str, final_price: f64) -> (SessionDetails, Vec<PriceTickRow>, Vec<DiscreteEventRow>) {
        (
            SessionDetails {
                game_id: GameId::new(game),
                started_at: 0,
                ended_at: 1000,
                peak_price: 2.0,
                final_price,
                rug_tick: 5,
            },
            (1..=4)
                .map(|i| PriceTickRow {
                    tick: i,
                    price: 1.0 + i as f64 * 0.25,
                    timestamp: i as i64 * 200,
                })
                .collect(),
            vec![
                DiscreteEventRow {
                    kind: DiscreteEventKind::PhaseChange(GamePhase::Active),
                    tick: 1,
                    timestamp: 150,
                    price: None,
                },
                DiscreteEventRow {
                    kind: DiscreteEventKind::Rug,
                    tick: 5,
                    timestamp: 1000,
                    price: Some(final_price),
                },
            ],
        )
    }

    #[tokio::test]
    async fn test_batch_skips_failures_and_continues() {
        let mut store = MemorySessionStore::new();
        let (d, t, e) = session("good1", 0.1);
        store.insert_session(d, t, e);
        // A session with no price history: load failure, skipped.
        store.insert_session(
            SessionDetails {
                game_id: GameId::new("empty"),
                started_at: 0,
                ended_at: 10,
                peak_price: 0.0,
                final_price: 0.0,
                rug_tick: 0,
            },
            vec![],
            vec![],
        );
        let (d, t, e) = session("good2", 0.2);
        store.insert_session(d, t, e);

        let game_ids = [
            GameId::new("good1"),
            GameId::new("empty"),
            GameId::new("missing"),
            GameId::new("good2"),
        ];

        let report = run_batch(
            &store,
            &game_ids,
            || Box::new(BuyAndHold),
            &RiskLimits::permissive(),
            SimConfig { fee_rate: 0.01 },
        )
        .await;

        assert_eq!(report.summaries.len(), 2);
        assert_eq!(report.failed.len(), 2);
        assert_eq!(report.summaries[0].game_id.as_str(), "good1");
        assert_eq!(report.summaries[1].game_id.as_str(), "good2");
        assert_relative_eq!(
            report.total_pnl(),
            report.summaries[0].realized_pnl + report.summaries[1].realized_pnl,
            epsilon = 1e-12
        );
    }
}
