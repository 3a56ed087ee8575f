//! Backtest runner CLI.
//!
//! Replays recorded sessions from a SQLite dataset through the live
//! accounting/risk pipeline with a built-in take-profit strategy.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin backtest -- \
//!   --db recordings/sessions.sqlite \
//!   --sessions 50 \
//!   --limits limits.json \
//!   --buy-amount 0.5 \
//!   --take-profit 3.0 \
//!   --output results.json
//! ```

use std::env;
use std::fs::File;
use std::io::{BufWriter, Write};

use anyhow::{bail, Context};
use crash_core::{
    Currency, GameId, GamePhase, GameSnapshot, Result, RiskLimits, SimConfig, StrategyId,
    TradeIntent,
};
use crash_replay::{run_batch, SessionStore, SqliteSessionStore, Strategy, StrategyView};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone)]
struct CliArgs {
    db_path: String,
    sessions: usize,
    limits_path: Option<String>,
    buy_amount: f64,
    take_profit: f64,
    fee_rate: f64,
    output_path: Option<String>,
}

impl CliArgs {
    fn parse() -> anyhow::Result<Self> {
        let mut args = env::args().skip(1);
        let mut db_path = None;
        let mut sessions = 20usize;
        let mut limits_path = None;
        let mut buy_amount = 0.5;
        let mut take_profit = 3.0;
        let mut fee_rate = 0.01;
        let mut output_path = None;

        while let Some(arg) = args.next() {
            let mut value = |name: &str| -> anyhow::Result<String> {
                args.next().with_context(|| format!("{name} needs a value"))
            };
            match arg.as_str() {
                "--db" => db_path = Some(value("--db")?),
                "--sessions" => sessions = value("--sessions")?.parse()?,
                "--limits" => limits_path = Some(value("--limits")?),
                "--buy-amount" => buy_amount = value("--buy-amount")?.parse()?,
                "--take-profit" => take_profit = value("--take-profit")?.parse()?,
                "--fee-rate" => fee_rate = value("--fee-rate")?.parse()?,
                "--output" => output_path = Some(value("--output")?),
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                other => bail!("unknown argument: {other}"),
            }
        }

        Ok(Self {
            db_path: db_path.context("--db is required")?,
            sessions,
            limits_path,
            buy_amount,
            take_profit,
            fee_rate,
            output_path,
        })
    }
}

fn print_usage() {
    eprintln!(
        "backtest --db <dataset.sqlite> [--sessions N] [--limits limits.json]\n\
         \x20        [--buy-amount X] [--take-profit M] [--fee-rate F] [--output results.json]"
    );
}

/// Built-in baseline: buy once when the round goes active, sell everything
/// at a target multiple, otherwise ride to the rug.
struct TakeProfitStrategy {
    id: StrategyId,
    buy_amount: f64,
    take_profit: f64,
    entered: bool,
}

impl TakeProfitStrategy {
    fn new(buy_amount: f64, take_profit: f64) -> Self {
        Self {
            id: StrategyId::new("take-profit"),
            buy_amount,
            take_profit,
            entered: false,
        }
    }
}

impl Strategy for TakeProfitStrategy {
    fn id(&self) -> StrategyId {
        self.id.clone()
    }

    fn on_game_state(
        &mut self,
        snapshot: &GameSnapshot,
        view: &StrategyView,
    ) -> Result<Vec<TradeIntent>> {
        if !self.entered && snapshot.phase == GamePhase::Active {
            self.entered = true;
            return Ok(vec![TradeIntent::buy(
                self.id.clone(),
                Currency::Primary,
                self.buy_amount,
                snapshot.game_id.clone(),
                snapshot.tick,
            )]);
        }
        if view.primary_balance > 0.0 && snapshot.price >= self.take_profit {
            return Ok(vec![TradeIntent::sell_percentage(
                self.id.clone(),
                Currency::Primary,
                100.0,
                snapshot.game_id.clone(),
                snapshot.tick,
            )]);
        }
        Ok(Vec::new())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = CliArgs::parse().inspect_err(|_| print_usage())?;

    let limits = match &args.limits_path {
        Some(path) => RiskLimits::load_or_permissive(path),
        None => RiskLimits::permissive(),
    };
    let sim_config = SimConfig {
        fee_rate: args.fee_rate,
    }
    .validated();

    let store = SqliteSessionStore::open(&args.db_path)
        .with_context(|| format!("opening dataset {}", args.db_path))?;

    let game_ids: Vec<GameId> = store
        .session_summaries(args.sessions, 0)?
        .into_iter()
        .map(|row| row.game_id)
        .collect();
    if game_ids.is_empty() {
        bail!("dataset has no sessions");
    }
    info!(sessions = game_ids.len(), "starting batch");

    let report = run_batch(
        &store,
        &game_ids,
        || Box::new(TakeProfitStrategy::new(args.buy_amount, args.take_profit)),
        &limits,
        sim_config,
    )
    .await;

    let json = serde_json::to_string_pretty(&report)?;
    match &args.output_path {
        Some(path) => {
            let mut writer = BufWriter::new(File::create(path)?);
            writer.write_all(json.as_bytes())?;
            writer.flush()?;
            info!(path, "results written");
        }
        None => println!("{json}"),
    }

    info!(
        completed = report.summaries.len(),
        failed = report.failed.len(),
        total_pnl = report.total_pnl(),
        average_pnl = report.average_pnl(),
        "done"
    );
    Ok(())
}
