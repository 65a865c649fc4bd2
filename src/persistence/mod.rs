//! SQLite persistence for live pair state.
//!
//! Persists live trading state to survive restarts:
//! - Per-pair leg states and tuned parameters
//! - Webhook dispatch history

use crate::execution::DealAction;
use crate::strategy::{Leg, LegState, PairState};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info, warn};

/// Persisted state of one tracked pair.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistedPair {
    pub pair_id: String,
    pub state: PairState,
    pub window: usize,
    pub threshold: f64,
    pub last_zscore: Option<f64>,
    pub updated_at: DateTime<Utc>,
}

/// One webhook dispatch attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchRecord {
    pub timestamp: DateTime<Utc>,
    pub pair_id: String,
    pub leg: Leg,
    pub action: DealAction,
    pub symbol: String,
    pub success: bool,
    pub error: Option<String>,
}

/// SQLite-based store for pair states and the dispatch log.
pub struct PairStateStore {
    conn: Connection,
}

impl PairStateStore {
    /// Open the store, initializing the database if needed.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path.as_ref())
            .with_context(|| format!("Failed to open database at {:?}", db_path.as_ref()))?;

        let store = Self { conn };
        store.init_schema()?;

        info!("Pair state store initialized at {:?}", db_path.as_ref());
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS pair_states (
                pair_id TEXT PRIMARY KEY,
                s1_state TEXT NOT NULL,
                s2_state TEXT NOT NULL,
                window_size INTEGER NOT NULL,
                threshold REAL NOT NULL,
                last_zscore REAL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS dispatch_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                pair_id TEXT NOT NULL,
                leg TEXT NOT NULL,
                action TEXT NOT NULL,
                symbol TEXT NOT NULL,
                success INTEGER NOT NULL,
                error TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_dispatch_timestamp ON dispatch_log(timestamp);
            CREATE INDEX IF NOT EXISTS idx_dispatch_pair ON dispatch_log(pair_id);
            "#,
        )?;

        debug!("Database schema initialized");
        Ok(())
    }

    /// Insert or replace the state of one pair.
    pub fn save_pair(&self, pair: &PersistedPair) -> Result<()> {
        let (s1, s2) = pair.state.legs();
        self.conn.execute(
            r#"
            INSERT INTO pair_states (pair_id, s1_state, s2_state, window_size, threshold,
                                     last_zscore, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(pair_id) DO UPDATE SET
                s1_state = ?2,
                s2_state = ?3,
                window_size = ?4,
                threshold = ?5,
                last_zscore = ?6,
                updated_at = ?7
            "#,
            params![
                pair.pair_id,
                s1.as_str(),
                s2.as_str(),
                pair.window as i64,
                pair.threshold,
                pair.last_zscore,
                pair.updated_at.to_rfc3339(),
            ],
        )?;

        debug!(pair = %pair.pair_id, state = %pair.state, "Pair state saved");
        Ok(())
    }

    /// Load every persisted pair keyed by pair id.
    ///
    /// Rows whose leg states cannot form a valid pair state are skipped.
    pub fn load_pairs(&self) -> Result<HashMap<String, PersistedPair>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT pair_id, s1_state, s2_state, window_size, threshold, last_zscore, updated_at
            FROM pair_states
            "#,
        )?;

        let rows: Vec<(String, String, String, i64, f64, Option<f64>, String)> = stmt
            .query_map([], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                ))
            })?
            .filter_map(|r| r.ok())
            .collect();

        let mut pairs = HashMap::with_capacity(rows.len());
        for (pair_id, s1, s2, window, threshold, last_zscore, updated_at) in rows {
            let state = match (s1.parse::<LegState>(), s2.parse::<LegState>()) {
                (Ok(a), Ok(b)) => PairState::from_legs(a, b),
                _ => None,
            };
            let Some(state) = state else {
                warn!("Ignoring invalid persisted state for {}: {} / {}", pair_id, s1, s2);
                continue;
            };

            let updated_at = DateTime::parse_from_rfc3339(&updated_at)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now());

            pairs.insert(
                pair_id.clone(),
                PersistedPair {
                    pair_id,
                    state,
                    window: window.max(0) as usize,
                    threshold,
                    last_zscore,
                    updated_at,
                },
            );
        }

        info!(pairs = pairs.len(), "Loaded pair states from database");
        Ok(pairs)
    }

    /// Load one pair by id.
    pub fn load_pair(&self, pair_id: &str) -> Result<Option<PersistedPair>> {
        Ok(self.load_pairs()?.remove(pair_id))
    }

    /// Append a dispatch attempt to the log.
    pub fn record_dispatch(&self, record: &DispatchRecord) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO dispatch_log (timestamp, pair_id, leg, action, symbol, success, error)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                record.timestamp.to_rfc3339(),
                record.pair_id,
                record.leg.to_string(),
                record.action.as_str(),
                record.symbol,
                record.success,
                record.error,
            ],
        )?;
        Ok(())
    }

    /// Most recent dispatch attempts, newest first.
    pub fn recent_dispatches(&self, limit: usize) -> Result<Vec<DispatchRecord>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT timestamp, pair_id, leg, action, symbol, success, error
            FROM dispatch_log
            ORDER BY id DESC
            LIMIT ?1
            "#,
        )?;

        let records = stmt
            .query_map([limit as i64], |row| {
                let timestamp: String = row.get(0)?;
                let leg: String = row.get(2)?;
                let action: String = row.get(3)?;
                Ok(DispatchRecord {
                    timestamp: DateTime::parse_from_rfc3339(&timestamp)
                        .map(|dt| dt.with_timezone(&Utc))
                        .unwrap_or_else(|_| Utc::now()),
                    pair_id: row.get(1)?,
                    leg: if leg == "S2" { Leg::S2 } else { Leg::S1 },
                    action: if action == DealAction::CloseDeal.as_str() {
                        DealAction::CloseDeal
                    } else {
                        DealAction::StartDeal
                    },
                    symbol: row.get(4)?,
                    success: row.get(5)?,
                    error: row.get(6)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();

        Ok(records)
    }

    /// Clear all data (for testing or reset).
    pub fn clear_all(&self) -> Result<()> {
        warn!("Clearing all persisted pair state");
        self.conn.execute_batch(
            r#"
            DELETE FROM pair_states;
            DELETE FROM dispatch_log;
            "#,
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::SpreadSide;

    fn pair(id: &str, state: PairState) -> PersistedPair {
        PersistedPair {
            pair_id: id.to_string(),
            state,
            window: 36,
            threshold: 1.61,
            last_zscore: Some(-0.42),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_save_and_load_pairs() {
        let store = PairStateStore::new(":memory:").unwrap();

        store
            .save_pair(&pair("DOGE-ADA", PairState::Open(SpreadSide::Short)))
            .unwrap();
        store
            .save_pair(&pair(
                "BTC-SOL",
                PairState::Partial {
                    side: SpreadSide::Long,
                    open_leg: Leg::S2,
                },
            ))
            .unwrap();

        let loaded = store.load_pairs().unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded["DOGE-ADA"].state, PairState::Open(SpreadSide::Short));
        assert_eq!(
            loaded["BTC-SOL"].state,
            PairState::Partial {
                side: SpreadSide::Long,
                open_leg: Leg::S2
            }
        );
        assert_eq!(loaded["BTC-SOL"].window, 36);
        assert_eq!(loaded["BTC-SOL"].last_zscore, Some(-0.42));
    }

    #[test]
    fn test_save_overwrites() {
        let store = PairStateStore::new(":memory:").unwrap();
        store
            .save_pair(&pair("DOGE-ADA", PairState::Open(SpreadSide::Long)))
            .unwrap();
        store.save_pair(&pair("DOGE-ADA", PairState::Flat)).unwrap();

        let loaded = store.load_pair("DOGE-ADA").unwrap().unwrap();
        assert_eq!(loaded.state, PairState::Flat);
        assert!(store.load_pair("missing").unwrap().is_none());
    }

    #[test]
    fn test_invalid_leg_combination_is_skipped() {
        let store = PairStateStore::new(":memory:").unwrap();
        store
            .conn
            .execute(
                "INSERT INTO pair_states VALUES ('BAD', 'LONG', 'LONG', 10, 2.0, NULL, ?1)",
                params![Utc::now().to_rfc3339()],
            )
            .unwrap();

        assert!(store.load_pairs().unwrap().is_empty());
    }

    #[test]
    fn test_dispatch_log() {
        let store = PairStateStore::new(":memory:").unwrap();

        for (i, success) in [true, false].into_iter().enumerate() {
            store
                .record_dispatch(&DispatchRecord {
                    timestamp: Utc::now(),
                    pair_id: "DOGE-ADA".to_string(),
                    leg: if i == 0 { Leg::S1 } else { Leg::S2 },
                    action: DealAction::CloseDeal,
                    symbol: "ADA_USDT".to_string(),
                    success,
                    error: (!success).then(|| "timeout".to_string()),
                })
                .unwrap();
        }

        let records = store.recent_dispatches(10).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].leg, Leg::S2);
        assert!(!records[0].success);
        assert_eq!(records[0].error.as_deref(), Some("timeout"));
        assert_eq!(records[1].action, DealAction::CloseDeal);

        store.clear_all().unwrap();
        assert!(store.recent_dispatches(10).unwrap().is_empty());
    }
}
