//! Backtest simulation over a pair signal.
//!
//! Positions come from the batch position engine. Returns realized on row
//! `t` are earned by the position decided on row `t - 1`, so a signal never
//! trades on the bar that produced it.

use crate::error::PairsResult;
use crate::strategy::{PairSignal, PositionEngine};
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

const CSV_HEADER: &str =
    "timestamp,s1,s2,spread,zscore,position_s1,position_s2,ret_s1,ret_s2,strategy_ret,equity";

/// One simulated bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestRow {
    pub timestamp: DateTime<Utc>,
    pub s1: f64,
    pub s2: f64,
    pub spread: f64,
    pub zscore: f64,
    /// Signed position in S1 (-1, 0 or 1)
    pub position_s1: f64,
    /// Signed position in S2 (-1, 0 or 1)
    pub position_s2: f64,
    /// Simple return of S1 since the previous row (undefined on the first row)
    pub ret_s1: Option<f64>,
    pub ret_s2: Option<f64>,
    /// Return of the previous row's positions over this row
    pub strategy_ret: Option<f64>,
    /// Cumulative equity, starting at 1.0
    pub equity: f64,
}

/// Complete per-bar record of one (window, threshold) run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BacktestRecord {
    rows: Vec<BacktestRow>,
}

impl BacktestRecord {
    pub fn from_rows(rows: Vec<BacktestRow>) -> Self {
        Self { rows }
    }

    pub fn rows(&self) -> &[BacktestRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Number of position changes on either leg.
    pub fn trade_count(&self) -> usize {
        let mut previous = (0.0, 0.0);
        let mut trades = 0;
        for row in &self.rows {
            if (row.position_s1, row.position_s2) != previous {
                trades += 1;
                previous = (row.position_s1, row.position_s2);
            }
        }
        trades
    }

    /// Export to CSV; undefined values are written as empty cells.
    pub fn to_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        use std::io::Write;
        let path = path.as_ref();
        let mut file = std::fs::File::create(path)
            .with_context(|| format!("Failed to create {}", path.display()))?;

        writeln!(file, "{}", CSV_HEADER)?;
        for row in &self.rows {
            writeln!(
                file,
                "{},{},{},{},{},{},{},{},{},{},{}",
                row.timestamp.to_rfc3339(),
                row.s1,
                row.s2,
                row.spread,
                row.zscore,
                row.position_s1,
                row.position_s2,
                optional(row.ret_s1),
                optional(row.ret_s2),
                optional(row.strategy_ret),
                row.equity,
            )?;
        }

        Ok(())
    }

    /// Import a record previously written by `to_csv`.
    pub fn from_csv<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_csv_content(&content)
    }

    pub fn from_csv_content(content: &str) -> Result<Self> {
        let mut lines = content.lines();
        match lines.next() {
            Some(header) if header.trim() == CSV_HEADER => {}
            Some(header) => bail!("Unexpected backtest header: {}", header),
            None => return Ok(Self::default()),
        }

        let rows = lines
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(i, line)| parse_row(line).with_context(|| format!("Bad row {}", i + 2)))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { rows })
    }
}

fn optional(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn parse_row(line: &str) -> Result<BacktestRow> {
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    if fields.len() != 11 {
        bail!("Expected 11 fields, got {}", fields.len());
    }

    let number = |i: usize| -> Result<f64> {
        fields[i]
            .parse::<f64>()
            .with_context(|| format!("Invalid number '{}'", fields[i]))
    };
    let maybe = |i: usize| -> Result<Option<f64>> {
        if fields[i].is_empty() {
            Ok(None)
        } else {
            number(i).map(Some)
        }
    };

    let timestamp = DateTime::parse_from_rfc3339(fields[0])
        .with_context(|| format!("Invalid timestamp '{}'", fields[0]))?
        .with_timezone(&Utc);

    Ok(BacktestRow {
        timestamp,
        s1: number(1)?,
        s2: number(2)?,
        spread: number(3)?,
        zscore: number(4)?,
        position_s1: number(5)?,
        position_s2: number(6)?,
        ret_s1: maybe(7)?,
        ret_s2: maybe(8)?,
        strategy_ret: maybe(9)?,
        equity: number(10)?,
    })
}

/// Simulate the position engine over `signal` with entry `threshold`.
pub fn run_backtest(signal: &PairSignal, threshold: f64) -> PairsResult<BacktestRecord> {
    let engine = PositionEngine::new(threshold)?;
    let states = engine.run(&signal.zscore);

    let mut rows: Vec<BacktestRow> = Vec::with_capacity(signal.len());
    let mut equity = 1.0;

    for (t, state) in states.iter().enumerate() {
        let (leg1, leg2) = state.legs();
        let position_s1 = leg1.sign();
        let position_s2 = leg2.sign();

        let (ret_s1, ret_s2, strategy_ret) = match rows.last() {
            Some(prev) => {
                let r1 = signal.s1[t] / prev.s1 - 1.0;
                let r2 = signal.s2[t] / prev.s2 - 1.0;
                let strategy = prev.position_s1 * r1 + prev.position_s2 * r2;
                (Some(r1), Some(r2), Some(strategy))
            }
            None => (None, None, None),
        };

        equity *= 1.0 + strategy_ret.unwrap_or(0.0);

        rows.push(BacktestRow {
            timestamp: signal.index[t],
            s1: signal.s1[t],
            s2: signal.s2[t],
            spread: signal.spread[t],
            zscore: signal.zscore[t],
            position_s1,
            position_s2,
            ret_s1,
            ret_s2,
            strategy_ret,
            equity,
        });
    }

    let record = BacktestRecord { rows };
    debug!(
        window = signal.window,
        threshold,
        rows = record.len(),
        trades = record.trade_count(),
        "Backtest complete"
    );

    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn signal(s1: Vec<f64>, s2: Vec<f64>, zscore: Vec<f64>) -> PairSignal {
        let index = (0..s1.len())
            .map(|i| Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap() + chrono::Duration::minutes(15 * i as i64))
            .collect();
        let spread = s1.iter().zip(&s2).map(|(a, b)| a - b).collect();
        PairSignal {
            name1: "S1".into(),
            name2: "S2".into(),
            window: 2,
            index,
            s1,
            s2,
            spread,
            zscore,
        }
    }

    #[test]
    fn test_returns_use_previous_position() {
        let record = run_backtest(
            &signal(
                vec![100.0, 110.0, 99.0],
                vec![50.0, 50.0, 55.0],
                vec![2.0, 0.5, -0.1],
            ),
            1.5,
        )
        .unwrap();
        let rows = record.rows();

        // row 0 decides short S1 / long S2 but earns nothing
        assert_eq!((rows[0].position_s1, rows[0].position_s2), (-1.0, 1.0));
        assert_eq!(rows[0].strategy_ret, None);
        assert_eq!(rows[0].equity, 1.0);

        // S1 +10%, S2 flat, position short S1
        let r1 = rows[1].strategy_ret.unwrap();
        assert!((r1 + 0.1).abs() < 1e-12);
        assert!((rows[1].equity - 0.9).abs() < 1e-12);

        // exit on row 2 does not affect the return realized on row 2
        assert_eq!((rows[2].position_s1, rows[2].position_s2), (0.0, 0.0));
        let r2 = rows[2].strategy_ret.unwrap();
        let expected = -(99.0 / 110.0 - 1.0) + (55.0 / 50.0 - 1.0);
        assert!((r2 - expected).abs() < 1e-12);
    }

    #[test]
    fn test_no_trades_keeps_flat_equity() {
        let record = run_backtest(
            &signal(vec![1.0, 2.0, 3.0], vec![1.0, 1.5, 1.0], vec![0.1, -0.2, 0.3]),
            2.0,
        )
        .unwrap();

        assert_eq!(record.trade_count(), 0);
        assert!(record.rows().iter().all(|r| r.equity == 1.0));
    }

    #[test]
    fn test_invalid_threshold() {
        let result = run_backtest(&signal(vec![1.0], vec![1.0], vec![0.0]), 0.0);
        assert!(result.is_err());
    }

    #[test]
    fn test_csv_round_trip() {
        let record = run_backtest(
            &signal(
                vec![100.0, 101.3, 99.7, 102.2, 100.1],
                vec![50.0, 50.4, 49.1, 51.9, 50.0],
                vec![-1.7, -0.4, 0.2, 1.9, -0.01],
            ),
            1.5,
        )
        .unwrap();

        let path = std::env::temp_dir().join(format!("pairs_record_{}.csv", std::process::id()));
        record.to_csv(&path).unwrap();
        let loaded = BacktestRecord::from_csv(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(loaded, record);
    }

    #[test]
    fn test_csv_rejects_bad_header() {
        assert!(BacktestRecord::from_csv_content("time,a,b\n").is_err());
        assert!(BacktestRecord::from_csv_content("").unwrap().is_empty());
    }
}
