//! # Pairs Trader
//!
//! Statistical-arbitrage pairs trading on crypto perpetuals: find the most
//! cointegrated pair in a universe, trade its spread z-score, tune the
//! parameters on history and drive an external execution bot live.
//!
//! ## Architecture
//!
//! - `config`: Configuration management and validation
//! - `data`: Aligned price tables and CSV import/export
//! - `stats`: Engle-Granger cointegration test (OLS, ADF, MacKinnon p-values)
//! - `strategy`: Pair selection, spread z-score and the position state machine
//! - `backtest`: Vectorised backtests, performance metrics and parameter search
//! - `exchange`: Bitget candle client and in-memory market data
//! - `execution`: Webhook dispatch to the execution bot
//! - `persistence`: SQLite storage of live pair states and dispatches
//! - `live`: Scheduled live signal loop

pub mod backtest;
pub mod config;
pub mod data;
pub mod error;
pub mod exchange;
pub mod execution;
pub mod live;
pub mod persistence;
pub mod stats;
pub mod strategy;

pub use config::Config;
pub use error::{PairsError, PairsResult};
