//! Performance metrics for a backtest record.
//!
//! Provides total and annualized return, annualized volatility, Sharpe ratio
//! and maximum drawdown.

use super::engine::BacktestRecord;
use crate::error::{PairsError, PairsResult};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use std::path::Path;

const TOTAL_RETURN: &str = "Total Return (%)";
const ANNUALIZED_RETURN: &str = "Annualized Return (%)";
const ANNUALIZED_VOLATILITY: &str = "Annualized Volatility (%)";
const SHARPE_RATIO: &str = "Sharpe Ratio";
const MAX_DRAWDOWN: &str = "Max Drawdown (%)";

/// Summary metrics of one backtest. Returns and drawdown are fractions
/// (0.05 = 5%); the CSV export writes them as percentages.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSummary {
    /// Final equity minus 1
    pub total_return: f64,
    /// Compound annual growth rate
    pub annualized_return: f64,
    /// Sample standard deviation of per-bar returns, annualized
    pub annualized_volatility: f64,
    /// Annualized return over annualized volatility (zero risk-free rate)
    pub sharpe_ratio: f64,
    /// Worst peak-to-trough equity decline, always <= 0
    pub max_drawdown: f64,
}

impl PerformanceSummary {
    /// Calculate metrics from a backtest record.
    ///
    /// `periods_per_year` is the number of bars in a year at the record's
    /// sampling frequency.
    pub fn calculate(record: &BacktestRecord, periods_per_year: f64) -> PairsResult<Self> {
        let rows = record.rows();
        let Some(last) = rows.last() else {
            return Err(PairsError::EmptyRecord);
        };

        let total_return = last.equity - 1.0;

        let years = rows.len() as f64 / periods_per_year;
        let annualized_return = if years > 0.0 && years.is_finite() {
            let growth = 1.0 + total_return;
            if growth > 0.0 {
                growth.powf(1.0 / years) - 1.0
            } else {
                -1.0
            }
        } else {
            0.0
        };

        // missing returns count as flat bars
        let returns: Vec<f64> = rows.iter().map(|r| r.strategy_ret.unwrap_or(0.0)).collect();
        let std = if returns.len() > 1 {
            returns.iter().std_dev()
        } else {
            0.0
        };
        let annualized_volatility = if std.is_finite() {
            std * periods_per_year.sqrt()
        } else {
            0.0
        };

        let sharpe_ratio = if annualized_volatility == 0.0 {
            0.0
        } else {
            annualized_return / annualized_volatility
        };

        Ok(Self {
            total_return,
            annualized_return,
            annualized_volatility,
            sharpe_ratio,
            max_drawdown: max_drawdown(record),
        })
    }

    /// Fixed-key `(metric, value)` pairs, percentages where the key says so.
    pub fn to_rows(&self) -> [(&'static str, f64); 5] {
        [
            (TOTAL_RETURN, self.total_return * 100.0),
            (ANNUALIZED_RETURN, self.annualized_return * 100.0),
            (ANNUALIZED_VOLATILITY, self.annualized_volatility * 100.0),
            (SHARPE_RATIO, self.sharpe_ratio),
            (MAX_DRAWDOWN, self.max_drawdown * 100.0),
        ]
    }

    /// Export as `metric,value` rows.
    pub fn to_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        use std::io::Write;
        let path = path.as_ref();
        let mut file = std::fs::File::create(path)
            .with_context(|| format!("Failed to create {}", path.display()))?;

        writeln!(file, "metric,value")?;
        for (key, value) in self.to_rows() {
            writeln!(file, "{},{}", key, value)?;
        }

        Ok(())
    }

    pub fn from_csv<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_csv_content(&content)
    }

    pub fn from_csv_content(content: &str) -> Result<Self> {
        let mut values: [Option<f64>; 5] = [None; 5];

        for line in content.lines().skip(1) {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let Some((key, value)) = line.rsplit_once(',') else {
                bail!("Malformed metrics row: {}", line);
            };
            let value: f64 = value
                .trim()
                .parse()
                .with_context(|| format!("Invalid value for {}", key))?;

            let slot = match key.trim() {
                TOTAL_RETURN => 0,
                ANNUALIZED_RETURN => 1,
                ANNUALIZED_VOLATILITY => 2,
                SHARPE_RATIO => 3,
                MAX_DRAWDOWN => 4,
                other => bail!("Unknown metric: {}", other),
            };
            values[slot] = Some(value);
        }

        let [Some(total), Some(annualized), Some(volatility), Some(sharpe), Some(drawdown)] =
            values
        else {
            bail!("Metrics file is missing one or more keys");
        };

        Ok(Self {
            total_return: total / 100.0,
            annualized_return: annualized / 100.0,
            annualized_volatility: volatility / 100.0,
            sharpe_ratio: sharpe,
            max_drawdown: drawdown / 100.0,
        })
    }

    /// Format metrics as a summary string.
    pub fn summary(&self) -> String {
        format!(
            r#"═══════════════════════════════════════════════
BACKTEST RESULTS
═══════════════════════════════════════════════
RETURNS
  Total Return:      {:.2}%
  Annualized:        {:.2}%

RISK
  Volatility:        {:.2}%
  Max Drawdown:      {:.2}%

RISK-ADJUSTED
  Sharpe Ratio:      {:.3}
═══════════════════════════════════════════════"#,
            self.total_return * 100.0,
            self.annualized_return * 100.0,
            self.annualized_volatility * 100.0,
            self.max_drawdown * 100.0,
            self.sharpe_ratio,
        )
    }
}

/// Minimum of `(equity - running_peak) / running_peak`.
fn max_drawdown(record: &BacktestRecord) -> f64 {
    let mut peak = f64::NEG_INFINITY;
    let mut worst: f64 = 0.0;

    for row in record.rows() {
        peak = peak.max(row.equity);
        if peak > 0.0 {
            worst = worst.min((row.equity - peak) / peak);
        }
    }

    worst
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backtest::BacktestRow;
    use chrono::{Duration, TimeZone, Utc};

    const MINUTES_PER_YEAR: f64 = 525_600.0;

    fn record(returns: &[Option<f64>]) -> BacktestRecord {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut equity = 1.0;
        let rows = returns
            .iter()
            .enumerate()
            .map(|(i, r)| {
                equity *= 1.0 + r.unwrap_or(0.0);
                BacktestRow {
                    timestamp: start + Duration::minutes(i as i64),
                    s1: 1.0,
                    s2: 1.0,
                    spread: 0.0,
                    zscore: 0.0,
                    position_s1: 0.0,
                    position_s2: 0.0,
                    ret_s1: *r,
                    ret_s2: *r,
                    strategy_ret: *r,
                    equity,
                }
            })
            .collect();
        BacktestRecord::from_rows(rows)
    }

    #[test]
    fn test_all_zero_returns() {
        let summary =
            PerformanceSummary::calculate(&record(&[None, Some(0.0), Some(0.0), Some(0.0)]), MINUTES_PER_YEAR)
                .unwrap();

        assert_eq!(summary.total_return, 0.0);
        assert_eq!(summary.annualized_return, 0.0);
        assert_eq!(summary.annualized_volatility, 0.0);
        assert_eq!(summary.sharpe_ratio, 0.0);
        assert_eq!(summary.max_drawdown, 0.0);
    }

    #[test]
    fn test_empty_record_is_an_error() {
        assert_eq!(
            PerformanceSummary::calculate(&BacktestRecord::default(), MINUTES_PER_YEAR),
            Err(PairsError::EmptyRecord)
        );
    }

    #[test]
    fn test_known_values() {
        let periods = 4.0;
        let summary =
            PerformanceSummary::calculate(&record(&[None, Some(0.1), Some(-0.05)]), periods)
                .unwrap();

        // equity 1.0 -> 1.1 -> 1.045
        assert!((summary.total_return - 0.045).abs() < 1e-12);
        assert!((summary.max_drawdown - (1.045 / 1.1 - 1.0)).abs() < 1e-12);

        // three bars at four per year: 0.75 years
        let annualized = 1.045f64.powf(1.0 / 0.75) - 1.0;
        assert!((summary.annualized_return - annualized).abs() < 1e-12);

        // sample std of [0, 0.1, -0.05]
        let mean: f64 = 0.05 / 3.0;
        let var = ((0.0 - mean).powi(2) + (0.1 - mean).powi(2) + (-0.05 - mean).powi(2)) / 2.0;
        let vol = var.sqrt() * periods.sqrt();
        assert!((summary.annualized_volatility - vol).abs() < 1e-12);
        assert!((summary.sharpe_ratio - annualized / vol).abs() < 1e-9);
    }

    #[test]
    fn test_drawdown_never_positive() {
        let summary = PerformanceSummary::calculate(
            &record(&[None, Some(0.02), Some(0.03), Some(0.01)]),
            MINUTES_PER_YEAR,
        )
        .unwrap();
        assert_eq!(summary.max_drawdown, 0.0);
        assert!(summary.sharpe_ratio > 0.0);
    }

    #[test]
    fn test_periods_per_year_scales_volatility() {
        let r = record(&[None, Some(0.01), Some(-0.01), Some(0.02)]);
        let daily = PerformanceSummary::calculate(&r, 365.0).unwrap();
        let minutely = PerformanceSummary::calculate(&r, MINUTES_PER_YEAR).unwrap();

        let ratio = minutely.annualized_volatility / daily.annualized_volatility;
        assert!((ratio - (MINUTES_PER_YEAR / 365.0).sqrt()).abs() < 1e-9);
    }

    #[test]
    fn test_record_round_trip_preserves_metrics() {
        let original = record(&[None, Some(0.013), Some(-0.0071), Some(0.0042), Some(-0.021)]);
        let path = std::env::temp_dir().join(format!("pairs_metrics_rt_{}.csv", std::process::id()));
        original.to_csv(&path).unwrap();
        let loaded = BacktestRecord::from_csv(&path).unwrap();
        std::fs::remove_file(&path).ok();

        let before = PerformanceSummary::calculate(&original, MINUTES_PER_YEAR).unwrap();
        let after = PerformanceSummary::calculate(&loaded, MINUTES_PER_YEAR).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn test_summary_csv_keys() {
        let summary = PerformanceSummary {
            total_return: 0.125,
            annualized_return: 0.5,
            annualized_volatility: 0.25,
            sharpe_ratio: 2.0,
            max_drawdown: -0.0625,
        };

        let path = std::env::temp_dir().join(format!("pairs_summary_{}.csv", std::process::id()));
        summary.to_csv(&path).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        let loaded = PerformanceSummary::from_csv(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert!(content.contains("Total Return (%),12.5"));
        assert!(content.contains("Max Drawdown (%),-6.25"));
        assert!(content.contains("Sharpe Ratio,2"));
        assert_eq!(loaded, summary);
    }

    #[test]
    fn test_summary_csv_missing_key() {
        let content = "metric,value\nSharpe Ratio,1.2\n";
        assert!(PerformanceSummary::from_csv_content(content).is_err());
    }

    #[test]
    fn test_summary_text() {
        let summary = PerformanceSummary::calculate(&record(&[None, Some(0.1)]), 4.0).unwrap();
        let text = summary.summary();
        assert!(text.contains("Total Return:      10.00%"));
        assert!(text.contains("Sharpe Ratio"));
    }
}
