//! Backtesting and parameter search for a selected pair.
//!
//! This module provides:
//! - Vectorised simulation of the position engine over a z-score series
//! - Performance metrics with an explicit annualization base
//! - Black-box search over the rolling window and entry threshold
//!
//! # Example
//!
//! ```rust,ignore
//! use pairs_trader::backtest::{run_backtest, BacktestConfig, PerformanceSummary};
//!
//! let signal = selected_pair.signal(48)?;
//! let record = run_backtest(&signal, 2.0)?;
//! let metrics = PerformanceSummary::calculate(&record, BacktestConfig::default().periods_per_year)?;
//! println!("Sharpe: {:.3}", metrics.sharpe_ratio);
//! ```

mod engine;
mod metrics;
mod runner;

pub use engine::{run_backtest, BacktestRecord, BacktestRow};
pub use metrics::PerformanceSummary;
pub use runner::{
    evaluate, objective, RandomSearch, Sampler, SearchResults, SearchRunner, SearchSpace, Trial,
    TrialParams, DEGENERATE_OBJECTIVE,
};

use crate::exchange::Timeframe;
use serde::{Deserialize, Serialize};

/// Configuration for a backtest run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BacktestConfig {
    /// Number of bars per year used to annualize returns and volatility
    pub periods_per_year: f64,
}

impl BacktestConfig {
    pub fn for_timeframe(timeframe: Timeframe) -> Self {
        Self {
            periods_per_year: timeframe.periods_per_year(),
        }
    }
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self::for_timeframe(Timeframe::M15)
    }
}
