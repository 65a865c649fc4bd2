//! Price data for pair analysis.
//!
//! This module provides:
//! - `PriceTable`: instruments aligned on a common, strictly increasing index
//! - Wide CSV import/export (`datetime,<SYM1>,<SYM2>,...`)
//!
//! # Example
//!
//! ```rust,ignore
//! use pairs_trader::data::PriceTable;
//!
//! let table = PriceTable::from_csv("data/closes_15m.csv")?;
//! let pair = table.select(&["BTC/USDT:USDT", "SOL/USDT:USDT"])?;
//! ```

mod csv;
mod table;

pub use table::{PriceSeries, PriceTable};
