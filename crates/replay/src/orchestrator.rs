//! The replay orchestrator: one historical session, event for event,
//! through the live pipeline.
//!
//! State machine per run: `Loading -> Initializing -> Replaying -> Settling
//! -> Complete | Failed`. Each run owns isolated ledger/gatekeeper/simulator
//! instances inside its own [`TradingContext`]; nothing is shared across
//! runs. Control yields once per historical event so a run never
//! monopolizes the process, and an abort flag is checked at every yield.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crash_core::{
    BusMessage, Currency, Error, GameId, GamePhase, GameSnapshot, GameStateEvent, OwnerId, Result,
    RiskLimits, SimConfig, StrategyId, TradeIntent,
};
use crash_sim::TradingContext;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::store::{DiscreteEventKind, DiscreteEventRow, PriceTickRow, SessionStore};
use crate::summary::PerformanceSummary;

/// Lifecycle of one replay run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Loading,
    Initializing,
    Replaying,
    Settling,
    Complete,
    Failed,
}

/// What a strategy may read about itself when deciding.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StrategyView {
    /// Token balance in the primary currency.
    pub primary_balance: f64,
    /// Token balance in the bonus currency.
    pub bonus_balance: f64,
    /// Cost basis currently open.
    pub capital_at_risk: f64,
    /// Distinct open lots.
    pub open_trades_count: u32,
}

/// A trading strategy driven by the replay orchestrator (and, with the same
/// contract, by the live feed driver).
///
/// Handlers return the intents they want executed; errors are caught per
/// event and logged without corrupting the run's ledger state.
pub trait Strategy: Send {
    /// Identity used for position ownership and limits.
    fn id(&self) -> StrategyId;

    /// Called after every price tick.
    fn on_game_state(
        &mut self,
        snapshot: &GameSnapshot,
        view: &StrategyView,
    ) -> Result<Vec<TradeIntent>>;

    /// Called after every non-terminal discrete event.
    fn on_discrete_event(
        &mut self,
        _event: &DiscreteEventRow,
        _snapshot: &GameSnapshot,
        _view: &StrategyView,
    ) -> Result<Vec<TradeIntent>> {
        Ok(Vec::new())
    }
}

/// One element of the merged chronological stream.
#[derive(Debug, Clone)]
enum ReplayEntry {
    Tick(PriceTickRow),
    Event(DiscreteEventRow),
}

impl ReplayEntry {
    fn timestamp(&self) -> i64 {
        match self {
            ReplayEntry::Tick(t) => t.timestamp,
            ReplayEntry::Event(e) => e.timestamp,
        }
    }
}

/// Merge the tick and event streams into one timestamp-ordered sequence.
/// At equal timestamps price ticks come first, so a phase change observed
/// "at" a tick acts on the already-updated price.
fn merge_streams(ticks: Vec<PriceTickRow>, events: Vec<DiscreteEventRow>) -> Vec<ReplayEntry> {
    let mut merged = Vec::with_capacity(ticks.len() + events.len());
    let mut ticks = ticks.into_iter().peekable();
    let mut events = events.into_iter().peekable();

    loop {
        match (ticks.peek(), events.peek()) {
            (Some(t), Some(e)) => {
                if t.timestamp <= e.timestamp {
                    merged.push(ReplayEntry::Tick(ticks.next().unwrap()));
                } else {
                    merged.push(ReplayEntry::Event(events.next().unwrap()));
                }
            }
            (Some(_), None) => merged.push(ReplayEntry::Tick(ticks.next().unwrap())),
            (None, Some(_)) => merged.push(ReplayEntry::Event(events.next().unwrap())),
            (None, None) => break,
        }
    }

    debug_assert!(merged.windows(2).all(|w| w[0].timestamp() <= w[1].timestamp()));
    merged
}

/// One backtest run over one recorded session.
pub struct ReplayRun {
    game_id: GameId,
    strategy: Box<dyn Strategy>,
    limits: RiskLimits,
    sim_config: SimConfig,
    state: RunState,
    abort: Arc<AtomicBool>,
}

impl ReplayRun {
    /// Build a run. Construction is cheap; all loading happens in
    /// [`run`](Self::run).
    pub fn new(
        game_id: GameId,
        strategy: Box<dyn Strategy>,
        limits: RiskLimits,
        sim_config: SimConfig,
    ) -> Self {
        Self {
            game_id,
            strategy,
            limits,
            sim_config,
            state: RunState::Loading,
            abort: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> RunState {
        self.state
    }

    /// Flag that aborts the run at its next yield point. Partial results of
    /// an aborted run are discarded, not reported.
    pub fn abort_handle(&self) -> Arc<AtomicBool> {
        self.abort.clone()
    }

    /// Execute the run to completion against a session store.
    pub async fn run(&mut self, store: &dyn SessionStore) -> Result<PerformanceSummary> {
        let strategy_id = self.strategy.id();

        // Loading: fetch history; a session with no price ticks is a
        // failed run, not a panic.
        self.state = RunState::Loading;
        let details = match store.session_details(&self.game_id) {
            Ok(details) => details,
            Err(err) => {
                self.state = RunState::Failed;
                return Err(err);
            }
        };
        let ticks = match store.price_history(&self.game_id) {
            Ok(ticks) => ticks,
            Err(err) => {
                self.state = RunState::Failed;
                return Err(err);
            }
        };
        if ticks.is_empty() {
            self.state = RunState::Failed;
            return Err(Error::session(format!(
                "no price history for {}",
                self.game_id
            )));
        }
        let events = match store.discrete_events(&self.game_id) {
            Ok(events) => events,
            Err(err) => {
                self.state = RunState::Failed;
                return Err(err);
            }
        };

        // Initializing: isolated pipeline instances, scoped to this run.
        self.state = RunState::Initializing;
        info!(game = %self.game_id, strategy = %strategy_id, "replay initialized");
        let mut ctx = TradingContext::new(self.limits.clone(), self.sim_config);
        let mut snapshot = GameSnapshot::initial(self.game_id.clone());

        // Replaying: one merged chronological pass.
        self.state = RunState::Replaying;
        let mut final_price: Option<f64> = None;
        for entry in merge_streams(ticks, events) {
            if self.abort.load(Ordering::Relaxed) {
                self.state = RunState::Failed;
                return Err(Error::aborted(format!("run for {} aborted", self.game_id)));
            }
            // Cooperative scheduling point between historical events.
            tokio::task::yield_now().await;

            match entry {
                ReplayEntry::Tick(tick) => {
                    let event = GameStateEvent {
                        game_id: self.game_id.clone(),
                        tick: tick.tick,
                        price: tick.price,
                        phase: snapshot.phase,
                        timestamp: tick.timestamp,
                    };
                    snapshot.apply(&event);
                    ctx.bus_mut().publish(&BusMessage::GameState(event));

                    let view = strategy_view(&ctx, &strategy_id);
                    match self.strategy.on_game_state(&snapshot, &view) {
                        Ok(intents) => execute_all(&mut ctx, &intents, &snapshot),
                        Err(err) => warn!(
                            game = %self.game_id,
                            strategy = %strategy_id,
                            %err,
                            "strategy tick handler failed; continuing"
                        ),
                    }
                }
                ReplayEntry::Event(event) => match event.kind {
                    DiscreteEventKind::Rug => {
                        snapshot.phase = GamePhase::Rugged;
                        snapshot.tick = event.tick;
                        snapshot.timestamp = event.timestamp;
                        final_price = Some(event.price.unwrap_or(snapshot.price));
                        break;
                    }
                    DiscreteEventKind::PhaseChange(phase) => {
                        snapshot.phase = phase;
                        snapshot.tick = event.tick;
                        snapshot.timestamp = event.timestamp;
                        self.invoke_event_handler(&mut ctx, &event, &snapshot, &strategy_id);
                    }
                    DiscreteEventKind::CandleClose => {
                        self.invoke_event_handler(&mut ctx, &event, &snapshot, &strategy_id);
                    }
                },
            }
        }

        // Settling: terminal liquidation of every open position.
        self.state = RunState::Settling;
        let final_price = final_price.unwrap_or_else(|| {
            warn!(
                game = %self.game_id,
                "no terminal rug event in history; settling at recorded final price"
            );
            details.final_price
        });
        ctx.liquidate_all(final_price, snapshot.timestamp);

        self.state = RunState::Complete;
        let summary = PerformanceSummary::from_ledger(&strategy_id, &self.game_id, ctx.ledger());
        info!(
            game = %self.game_id,
            strategy = %strategy_id,
            pnl = summary.realized_pnl,
            trades = summary.trades_executed,
            "replay complete"
        );
        Ok(summary)
    }

    fn invoke_event_handler(
        &mut self,
        ctx: &mut TradingContext,
        event: &DiscreteEventRow,
        snapshot: &GameSnapshot,
        strategy_id: &StrategyId,
    ) {
        let view = strategy_view(ctx, strategy_id);
        match self.strategy.on_discrete_event(event, snapshot, &view) {
            Ok(intents) => execute_all(ctx, &intents, snapshot),
            Err(err) => warn!(
                game = %self.game_id,
                strategy = %strategy_id,
                %err,
                "strategy event handler failed; continuing"
            ),
        }
    }
}

fn execute_all(ctx: &mut TradingContext, intents: &[TradeIntent], snapshot: &GameSnapshot) {
    for intent in intents {
        ctx.execute_intent(intent, snapshot);
    }
}

fn strategy_view(ctx: &TradingContext, strategy_id: &StrategyId) -> StrategyView {
    let owner = OwnerId::Strategy(strategy_id.clone());
    let exposure = ctx.gatekeeper().exposures().state(strategy_id);
    StrategyView {
        primary_balance: ctx.ledger().balance(&owner, Currency::Primary),
        bonus_balance: ctx.ledger().balance(&owner, Currency::Bonus),
        capital_at_risk: exposure.capital_at_risk,
        open_trades_count: exposure.open_trades_count,
    }
}
