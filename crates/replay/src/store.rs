//! Session-history query surface and its storage adapters.
//!
//! The orchestrator consumes only the [`SessionStore`] trait; where the
//! rows actually live is a collaborator concern. Two adapters are provided:
//! an in-memory store for tests and fixtures, and a read-only SQLite store
//! for recorded datasets.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crash_core::{Error, GameId, GamePhase, Result, Tick, TimestampMs};
use rusqlite::{Connection, OpenFlags};
use serde::{Deserialize, Serialize};

/// One row of a session listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummaryRow {
    /// Session identifier.
    pub game_id: GameId,
    /// When the session started (ms).
    pub started_at: TimestampMs,
    /// When the session rugged (ms).
    pub ended_at: TimestampMs,
    /// Highest multiplier reached.
    pub peak_price: f64,
    /// Multiplier at the rug.
    pub final_price: f64,
}

/// Full details of one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDetails {
    /// Session identifier.
    pub game_id: GameId,
    /// When the session started (ms).
    pub started_at: TimestampMs,
    /// When the session rugged (ms).
    pub ended_at: TimestampMs,
    /// Highest multiplier reached.
    pub peak_price: f64,
    /// Multiplier at the rug.
    pub final_price: f64,
    /// Tick at which the session rugged.
    pub rug_tick: Tick,
}

/// One recorded price tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceTickRow {
    /// Game tick.
    pub tick: Tick,
    /// Multiplier at this tick.
    pub price: f64,
    /// Recorded timestamp (ms).
    pub timestamp: TimestampMs,
}

/// Kind of a recorded discrete event.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscreteEventKind {
    /// The session entered a new phase.
    PhaseChange(GamePhase),
    /// Terminal settlement: the session rugged.
    Rug,
    /// A price candle closed (analytics marker, no state effect).
    CandleClose,
}

/// One recorded discrete event (phase change, candle close, rug).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscreteEventRow {
    /// What happened.
    pub kind: DiscreteEventKind,
    /// Game tick of the event.
    pub tick: Tick,
    /// Recorded timestamp (ms).
    pub timestamp: TimestampMs,
    /// Price attached to the event, when the recorder captured one
    /// (notably the final price on rug events).
    pub price: Option<f64>,
}

/// Read-only query surface over recorded sessions, used only by the replay
/// orchestrator.
pub trait SessionStore: Send + Sync {
    /// Page through recorded sessions, newest first.
    fn session_summaries(&self, limit: usize, offset: usize) -> Result<Vec<SessionSummaryRow>>;

    /// Details of one session.
    fn session_details(&self, game_id: &GameId) -> Result<SessionDetails>;

    /// The session's price ticks in chronological order.
    fn price_history(&self, game_id: &GameId) -> Result<Vec<PriceTickRow>>;

    /// The session's discrete events in chronological order.
    fn discrete_events(&self, game_id: &GameId) -> Result<Vec<DiscreteEventRow>>;
}

/// In-memory session store for tests and fixtures.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: Vec<(SessionDetails, Vec<PriceTickRow>, Vec<DiscreteEventRow>)>,
    index: HashMap<GameId, usize>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one session's recorded rows.
    pub fn insert_session(
        &mut self,
        details: SessionDetails,
        ticks: Vec<PriceTickRow>,
        events: Vec<DiscreteEventRow>,
    ) {
        self.index
            .insert(details.game_id.clone(), self.sessions.len());
        self.sessions.push((details, ticks, events));
    }

    fn get(&self, game_id: &GameId) -> Result<&(SessionDetails, Vec<PriceTickRow>, Vec<DiscreteEventRow>)> {
        self.index
            .get(game_id)
            .map(|&i| &self.sessions[i])
            .ok_or_else(|| Error::session(format!("unknown game id: {game_id}")))
    }
}

impl SessionStore for MemorySessionStore {
    fn session_summaries(&self, limit: usize, offset: usize) -> Result<Vec<SessionSummaryRow>> {
        Ok(self
            .sessions
            .iter()
            .rev()
            .skip(offset)
            .take(limit)
            .map(|(d, _, _)| SessionSummaryRow {
                game_id: d.game_id.clone(),
                started_at: d.started_at,
                ended_at: d.ended_at,
                peak_price: d.peak_price,
                final_price: d.final_price,
            })
            .collect())
    }

    fn session_details(&self, game_id: &GameId) -> Result<SessionDetails> {
        Ok(self.get(game_id)?.0.clone())
    }

    fn price_history(&self, game_id: &GameId) -> Result<Vec<PriceTickRow>> {
        Ok(self.get(game_id)?.1.clone())
    }

    fn discrete_events(&self, game_id: &GameId) -> Result<Vec<DiscreteEventRow>> {
        Ok(self.get(game_id)?.2.clone())
    }
}

/// SQLite-backed session store over a recorded dataset.
///
/// Expected schema (written by the recorder, read-only here):
///
/// ```sql
/// CREATE TABLE sessions (
///     game_id     TEXT PRIMARY KEY,
///     started_at  INTEGER NOT NULL,
///     ended_at    INTEGER NOT NULL,
///     peak_price  REAL NOT NULL,
///     final_price REAL NOT NULL,
///     rug_tick    INTEGER NOT NULL
/// );
/// CREATE TABLE price_ticks (
///     game_id   TEXT NOT NULL,
///     tick      INTEGER NOT NULL,
///     price     REAL NOT NULL,
///     timestamp INTEGER NOT NULL
/// );
/// CREATE TABLE discrete_events (
///     game_id   TEXT NOT NULL,
///     kind      TEXT NOT NULL,   -- 'presale' | 'active' | 'rugged' | 'rug' | 'candle_close'
///     tick      INTEGER NOT NULL,
///     timestamp INTEGER NOT NULL,
///     price     REAL
/// );
/// ```
pub struct SqliteSessionStore {
    // Connection is Send but not Sync; the mutex makes the store shareable
    // across concurrently executing runs.
    conn: Mutex<Connection>,
}

impl SqliteSessionStore {
    /// Open a dataset file read-only.
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| Error::storage(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (used by tests to build fixtures through
    /// the same SQL path the recorder uses).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| Error::storage(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Access to the underlying connection (fixture setup in tests).
    pub fn connection(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("sqlite connection mutex poisoned")
    }

    fn parse_event_kind(kind: &str) -> Result<DiscreteEventKind> {
        match kind {
            "presale" => Ok(DiscreteEventKind::PhaseChange(GamePhase::Presale)),
            "active" => Ok(DiscreteEventKind::PhaseChange(GamePhase::Active)),
            "rugged" | "rug" => Ok(DiscreteEventKind::Rug),
            "candle_close" => Ok(DiscreteEventKind::CandleClose),
            other => Err(Error::data(format!("unknown event kind: {other}"))),
        }
    }
}

impl SessionStore for SqliteSessionStore {
    fn session_summaries(&self, limit: usize, offset: usize) -> Result<Vec<SessionSummaryRow>> {
        let conn = self.connection();
        let mut stmt = conn
            .prepare(
                "SELECT game_id, started_at, ended_at, peak_price, final_price
                 FROM sessions ORDER BY started_at DESC LIMIT ?1 OFFSET ?2",
            )
            .map_err(|e| Error::storage(e.to_string()))?;

        let rows = stmt
            .query_map([limit as i64, offset as i64], |row| {
                Ok(SessionSummaryRow {
                    game_id: GameId::new(row.get::<_, String>(0)?),
                    started_at: row.get(1)?,
                    ended_at: row.get(2)?,
                    peak_price: row.get(3)?,
                    final_price: row.get(4)?,
                })
            })
            .map_err(|e| Error::storage(e.to_string()))?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::storage(e.to_string()))
    }

    fn session_details(&self, game_id: &GameId) -> Result<SessionDetails> {
        self.connection()
            .query_row(
                "SELECT game_id, started_at, ended_at, peak_price, final_price, rug_tick
                 FROM sessions WHERE game_id = ?1",
                [game_id.as_str()],
                |row| {
                    Ok(SessionDetails {
                        game_id: GameId::new(row.get::<_, String>(0)?),
                        started_at: row.get(1)?,
                        ended_at: row.get(2)?,
                        peak_price: row.get(3)?,
                        final_price: row.get(4)?,
                        rug_tick: row.get(5)?,
                    })
                },
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => {
                    Error::session(format!("unknown game id: {game_id}"))
                }
                other => Error::storage(other.to_string()),
            })
    }

    fn price_history(&self, game_id: &GameId) -> Result<Vec<PriceTickRow>> {
        let conn = self.connection();
        let mut stmt = conn
            .prepare(
                "SELECT tick, price, timestamp FROM price_ticks
                 WHERE game_id = ?1 ORDER BY timestamp, tick",
            )
            .map_err(|e| Error::storage(e.to_string()))?;

        let rows = stmt
            .query_map([game_id.as_str()], |row| {
                Ok(PriceTickRow {
                    tick: row.get(0)?,
                    price: row.get(1)?,
                    timestamp: row.get(2)?,
                })
            })
            .map_err(|e| Error::storage(e.to_string()))?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::storage(e.to_string()))
    }

    fn discrete_events(&self, game_id: &GameId) -> Result<Vec<DiscreteEventRow>> {
        let conn = self.connection();
        let mut stmt = conn
            .prepare(
                "SELECT kind, tick, timestamp, price FROM discrete_events
                 WHERE game_id = ?1 ORDER BY timestamp, tick",
            )
            .map_err(|e| Error::storage(e.to_string()))?;

        let rows = stmt
            .query_map([game_id.as_str()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Tick>(1)?,
                    row.get::<_, TimestampMs>(2)?,
                    row.get::<_, Option<f64>>(3)?,
                ))
            })
            .map_err(|e| Error::storage(e.to_string()))?;

        let mut events = Vec::new();
        for row in rows {
            let (kind, tick, timestamp, price) = row.map_err(|e| Error::storage(e.to_string()))?;
            events.push(DiscreteEventRow {
                kind: Self::parse_event_kind(&kind)?,
                tick,
                timestamp,
                price,
            });
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed(conn: &Connection) {
        conn.execute_batch(
            "CREATE TABLE sessions (
                game_id TEXT PRIMARY KEY, started_at INTEGER NOT NULL,
                ended_at INTEGER NOT NULL, peak_price REAL NOT NULL,
                final_price REAL NOT NULL, rug_tick INTEGER NOT NULL
            );
            CREATE TABLE price_ticks (
                game_id TEXT NOT NULL, tick INTEGER NOT NULL,
                price REAL NOT NULL, timestamp INTEGER NOT NULL
            );
            CREATE TABLE discrete_events (
                game_id TEXT NOT NULL, kind TEXT NOT NULL, tick INTEGER NOT NULL,
                timestamp INTEGER NOT NULL, price REAL
            );
            INSERT INTO sessions VALUES ('g1', 0, 3000, 3.5, 0.2, 12);
            INSERT INTO price_ticks VALUES ('g1', 1, 1.0, 250);
            INSERT INTO price_ticks VALUES ('g1', 2, 1.5, 500);
            INSERT INTO discrete_events VALUES ('g1', 'active', 1, 250, NULL);
            INSERT INTO discrete_events VALUES ('g1', 'rug', 12, 3000, 0.2);",
        )
        .unwrap();
    }

    #[test]
    fn test_sqlite_roundtrip() {
        let store = SqliteSessionStore::open_in_memory().unwrap();
        seed(&store.connection());

        let summaries = store.session_summaries(10, 0).unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].game_id.as_str(), "g1");

        let details = store.session_details(&GameId::new("g1")).unwrap();
        assert_eq!(details.rug_tick, 12);

        let ticks = store.price_history(&GameId::new("g1")).unwrap();
        assert_eq!(ticks.len(), 2);
        assert_eq!(ticks[1].tick, 2);

        let events = store.discrete_events(&GameId::new("g1")).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].kind, DiscreteEventKind::Rug);
        assert_eq!(events[1].price, Some(0.2));
    }

    #[test]
    fn test_unknown_session_is_session_error() {
        let store = SqliteSessionStore::open_in_memory().unwrap();
        seed(&store.connection());

        let err = store.session_details(&GameId::new("nope")).unwrap_err();
        assert!(matches!(err, Error::Session(_)));
    }

    #[test]
    fn test_memory_store_paging() {
        let mut store = MemorySessionStore::new();
        for i in 0..5 {
            store.insert_session(
                SessionDetails {
                    game_id: GameId::new(format!("g{i}")),
                    started_at: i * 1000,
                    ended_at: i * 1000 + 900,
                    peak_price: 2.0,
                    final_price: 0.1,
                    rug_tick: 40,
                },
                vec![],
                vec![],
            );
        }

        let page = store.session_summaries(2, 1).unwrap();
        assert_eq!(page.len(), 2);
        // Newest first, offset by one.
        assert_eq!(page[0].game_id.as_str(), "g3");
        assert_eq!(page[1].game_id.as_str(), "g2");
    }
}
