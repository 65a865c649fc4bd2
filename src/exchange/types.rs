//! Type definitions for market data and Bitget API responses.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const MINUTES_PER_YEAR: f64 = 365.0 * 24.0 * 60.0;

/// Candle bar size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "30m")]
    M30,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "1d")]
    D1,
}

impl Timeframe {
    pub fn minutes(self) -> i64 {
        match self {
            Timeframe::M1 => 1,
            Timeframe::M5 => 5,
            Timeframe::M15 => 15,
            Timeframe::M30 => 30,
            Timeframe::H1 => 60,
            Timeframe::H4 => 240,
            Timeframe::D1 => 1440,
        }
    }

    pub fn duration(self) -> Duration {
        Duration::minutes(self.minutes())
    }

    /// Bars in a 365-day year.
    pub fn periods_per_year(self) -> f64 {
        MINUTES_PER_YEAR / self.minutes() as f64
    }

    /// Granularity parameter of the Bitget candles endpoint.
    pub fn granularity(self) -> &'static str {
        match self {
            Timeframe::M1 => "1m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::M30 => "30m",
            Timeframe::H1 => "1H",
            Timeframe::H4 => "4H",
            Timeframe::D1 => "1D",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Timeframe::M1 => "1m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::M30 => "30m",
            Timeframe::H1 => "1h",
            Timeframe::H4 => "4h",
            Timeframe::D1 => "1d",
        }
    }
}

impl Default for Timeframe {
    fn default() -> Self {
        Timeframe::M15
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "1m" => Ok(Timeframe::M1),
            "5m" => Ok(Timeframe::M5),
            "15m" => Ok(Timeframe::M15),
            "30m" => Ok(Timeframe::M30),
            "1h" => Ok(Timeframe::H1),
            "4h" => Ok(Timeframe::H4),
            "1d" => Ok(Timeframe::D1),
            other => bail!("Unsupported timeframe: {}", other),
        }
    }
}

/// One OHLCV bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Bar open time
    pub timestamp: DateTime<Utc>,
    #[serde(with = "rust_decimal::serde::str")]
    pub open: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub high: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub low: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub close: Decimal,
    /// Volume in base currency
    #[serde(with = "rust_decimal::serde::str")]
    pub volume: Decimal,
}

impl Candle {
    /// Close price as `f64` for the statistics layer.
    pub fn close_f64(&self) -> Option<f64> {
        self.close.to_f64()
    }

    /// Parse a Bitget candle row:
    /// `[ts_ms, open, high, low, close, base_volume, quote_volume]`.
    pub fn from_bitget_row(row: &[String]) -> Result<Self> {
        if row.len() < 6 {
            bail!("Candle row has {} fields, expected at least 6", row.len());
        }

        let millis: i64 = row[0]
            .parse()
            .with_context(|| format!("Invalid candle timestamp '{}'", row[0]))?;
        let timestamp = Utc
            .timestamp_millis_opt(millis)
            .single()
            .with_context(|| format!("Candle timestamp out of range: {}", millis))?;

        let price = |i: usize| -> Result<Decimal> {
            Decimal::from_str(&row[i]).with_context(|| format!("Invalid decimal '{}'", row[i]))
        };

        Ok(Self {
            timestamp,
            open: price(1)?,
            high: price(2)?,
            low: price(3)?,
            close: price(4)?,
            volume: price(5)?,
        })
    }
}

/// Envelope of every Bitget v2 REST response.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BitgetResponse<T> {
    pub code: String,
    pub msg: String,
    #[serde(default)]
    pub request_time: Option<i64>,
    pub data: Option<T>,
}

impl<T> BitgetResponse<T> {
    pub const SUCCESS: &'static str = "00000";

    pub fn is_success(&self) -> bool {
        self.code == Self::SUCCESS
    }
}

/// Convert a unified instrument id (`DOGE/USDT:USDT`) to the venue's
/// native symbol (`DOGEUSDT`). Native symbols pass through unchanged.
pub fn native_symbol(instrument: &str) -> String {
    let market = instrument.split(':').next().unwrap_or(instrument);
    market.replace(['/', '-', '_'], "").to_uppercase()
}
