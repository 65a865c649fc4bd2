//! In-memory market data for dry runs and tests.

use super::traits::MarketDataProvider;
use super::types::{native_symbol, Candle, Timeframe};
use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Fixed candle history keyed by native symbol.
#[derive(Debug, Default)]
pub struct StaticMarketData {
    candles: HashMap<String, Vec<Candle>>,
    requests: AtomicU64,
}

impl StaticMarketData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register candles for `instrument`, replacing any previous history.
    pub fn with_candles(mut self, instrument: &str, mut candles: Vec<Candle>) -> Self {
        candles.sort_by_key(|c| c.timestamp);
        self.candles.insert(native_symbol(instrument), candles);
        self
    }

    /// Register a close-price series; open, high and low equal the close.
    pub fn with_closes(self, instrument: &str, closes: &[(DateTime<Utc>, f64)]) -> Self {
        let candles = closes
            .iter()
            .filter_map(|(timestamp, close)| {
                let price = Decimal::from_f64(*close)?;
                Some(Candle {
                    timestamp: *timestamp,
                    open: price,
                    high: price,
                    low: price,
                    close: price,
                    volume: Decimal::ZERO,
                })
            })
            .collect();
        self.with_candles(instrument, candles)
    }

    /// Number of range requests served.
    pub fn request_count(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl MarketDataProvider for StaticMarketData {
    async fn fetch_ohlcv_range(
        &self,
        instrument: &str,
        timeframe: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>> {
        self.requests.fetch_add(1, Ordering::Relaxed);

        let Some(history) = self.candles.get(&native_symbol(instrument)) else {
            bail!("No market data for {}", instrument);
        };

        let candles: Vec<Candle> = history
            .iter()
            .filter(|c| c.timestamp >= start && c.timestamp <= end)
            .cloned()
            .collect();

        debug!(
            instrument,
            %timeframe,
            candles = candles.len(),
            "Served static candles"
        );

        Ok(candles)
    }
}
