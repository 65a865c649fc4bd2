//! Exchange integrations for historical market data.
//!
//! ## Bitget
//! Public REST access to USDT-margined perpetual candles, paged through
//! arbitrary time ranges.
//!
//! ## Static
//! An in-memory provider for dry runs and tests.

mod client;
pub mod mock;
mod traits;
mod types;

pub use client::BitgetClient;
pub use mock::StaticMarketData;
#[cfg(test)]
pub use traits::MockMarketDataProvider;
pub use traits::MarketDataProvider;
pub use types::*;

use crate::data::{PriceSeries, PriceTable};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::warn;

/// Convert candles to a `(timestamp, close)` series, skipping closes that
/// do not fit in an `f64`.
pub fn close_series(instrument: &str, candles: &[Candle]) -> PriceSeries {
    candles
        .iter()
        .filter_map(|c| match c.close_f64() {
            Some(close) => Some((c.timestamp, close)),
            None => {
                warn!("Dropping unrepresentable close for {} at {}", instrument, c.timestamp);
                None
            }
        })
        .collect()
}

/// Fetch closes for every instrument and inner-join them into a table.
///
/// Columns are named by the instrument identifiers as given.
pub async fn fetch_price_table(
    provider: &dyn MarketDataProvider,
    instruments: &[String],
    timeframe: Timeframe,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<PriceTable> {
    let mut series = Vec::with_capacity(instruments.len());
    for instrument in instruments {
        let candles = provider
            .fetch_ohlcv_range(instrument, timeframe, start, end)
            .await
            .with_context(|| format!("Failed to fetch candles for {}", instrument))?;
        series.push((instrument.clone(), close_series(instrument, &candles)));
    }

    Ok(PriceTable::from_series(series))
}
