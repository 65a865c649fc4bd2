//! Venue-agnostic market data interface.
//!
//! The live loop and the `fetch` command only need historical candles, so
//! any venue that can page through OHLCV history can back them.

use super::types::{Candle, Timeframe};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Source of historical OHLCV bars.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Fetch every bar of `instrument` with open time in `[start, end]`.
    ///
    /// Implementations page internally and return bars sorted by timestamp
    /// without duplicates. Gaps are allowed; callers align series by
    /// timestamp.
    async fn fetch_ohlcv_range(
        &self,
        instrument: &str,
        timeframe: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> anyhow::Result<Vec<Candle>>;
}
