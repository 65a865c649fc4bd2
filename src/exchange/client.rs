//! Bitget REST API client (public market data only).

use crate::config::ExchangeConfig;
use crate::exchange::traits::MarketDataProvider;
use crate::exchange::types::*;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, instrument};

const CANDLES_PATH: &str = "/api/v2/mix/market/candles";

/// Bitget client for USDT-margined perpetual candles.
pub struct BitgetClient {
    http: Client,
    base_url: String,
    product_type: String,
    page_limit: usize,
    page_delay: Duration,
}

impl BitgetClient {
    /// Create a new Bitget client from configuration.
    pub fn new(config: &ExchangeConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            product_type: config.product_type.clone(),
            page_limit: config.page_limit.max(1),
            page_delay: Duration::from_millis(config.page_delay_ms),
        })
    }

    /// Fetch one page of candles with open time in `[start_ms, end_ms]`.
    #[instrument(skip(self))]
    pub async fn get_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<Candle>> {
        let url = format!(
            "{}{}?symbol={}&productType={}&granularity={}&startTime={}&endTime={}&limit={}",
            self.base_url,
            CANDLES_PATH,
            urlencoding::encode(symbol),
            urlencoding::encode(&self.product_type),
            timeframe.granularity(),
            start_ms,
            end_ms,
            self.page_limit,
        );

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .context("Failed to fetch candles")?
            .error_for_status()
            .context("Candles request rejected")?;

        let body: BitgetResponse<Vec<Vec<String>>> = response
            .json()
            .await
            .context("Failed to parse candles response")?;

        if !body.is_success() {
            bail!("Bitget error {}: {}", body.code, body.msg);
        }

        body.data
            .unwrap_or_default()
            .iter()
            .map(|row| Candle::from_bitget_row(row))
            .collect()
    }
}

#[async_trait]
impl MarketDataProvider for BitgetClient {
    #[instrument(skip(self), fields(symbol = tracing::field::Empty))]
    async fn fetch_ohlcv_range(
        &self,
        instrument: &str,
        timeframe: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>> {
        let symbol = native_symbol(instrument);
        tracing::Span::current().record("symbol", symbol.as_str());

        let bar_ms = timeframe.minutes() * 60_000;
        let chunk_ms = bar_ms * self.page_limit as i64;
        let end_ms = end.timestamp_millis();
        let mut since = start.timestamp_millis();
        let mut candles: Vec<Candle> = Vec::new();
        let mut pages = 0;

        while since < end_ms {
            if pages > 0 && !self.page_delay.is_zero() {
                tokio::time::sleep(self.page_delay).await;
            }

            let chunk_end = (since + chunk_ms - 1).min(end_ms);
            let page = self.get_candles(&symbol, timeframe, since, chunk_end).await?;
            pages += 1;

            let Some(last) = page.last().map(|c| c.timestamp.timestamp_millis()) else {
                debug!(since, chunk_end, "Empty candle page, skipping gap");
                since = chunk_end + 1;
                continue;
            };

            candles.extend(page);
            if last >= end_ms {
                break;
            }
            since = (last + 1).max(since + 1);
        }

        candles.sort_by_key(|c| c.timestamp);
        candles.dedup_by_key(|c| c.timestamp);

        debug!(
            instrument,
            pages,
            candles = candles.len(),
            "Fetched candle range"
        );

        Ok(candles)
    }
}
