//! Configuration management for the pairs trader.
//!
//! Loads settings from an optional `config.toml` overlaid by environment
//! variables (`PAIRS__SECTION__KEY`).

use crate::backtest::SearchSpace;
use crate::exchange::{native_symbol, Timeframe};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Main application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Market data venue
    #[serde(default)]
    pub exchange: ExchangeConfig,
    /// Cointegration pair selection
    #[serde(default)]
    pub selection: SelectionConfig,
    /// Hyperparameter search
    #[serde(default)]
    pub search: SearchConfig,
    /// Execution bot webhook
    #[serde(default)]
    pub webhook: WebhookConfig,
    /// Live signal loop and tracked pairs
    #[serde(default)]
    pub live: LiveConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeConfig {
    /// REST base URL
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Bitget product type for perpetual candles
    #[serde(default = "default_product_type")]
    pub product_type: String,
    /// Candles requested per page
    #[serde(default = "default_page_limit")]
    pub page_limit: usize,
    /// Pause between consecutive pages (rate limiting)
    #[serde(default = "default_page_delay_ms")]
    pub page_delay_ms: u64,
    /// HTTP request timeout
    #[serde(default = "default_exchange_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionConfig {
    /// p-value below which a pair is a candidate
    #[serde(default = "default_significance")]
    pub significance: f64,
    /// Upper bound for the ADF lag search (None = automatic)
    #[serde(default)]
    pub max_lag: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Number of objective evaluations
    #[serde(default = "default_n_trials")]
    pub n_trials: usize,
    #[serde(default = "default_window_min")]
    pub window_min: usize,
    #[serde(default = "default_window_max")]
    pub window_max: usize,
    #[serde(default = "default_threshold_min")]
    pub threshold_min: f64,
    #[serde(default = "default_threshold_max")]
    pub threshold_max: f64,
    /// Trials evaluated concurrently
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,
    /// Uniform trials before local refinement starts
    #[serde(default = "default_startup_trials")]
    pub startup_trials: usize,
    /// Sampler seed for reproducible searches
    #[serde(default)]
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Endpoint receiving trade signals
    #[serde(default = "default_webhook_url")]
    pub url: String,
    /// Bot id used for long legs
    #[serde(default)]
    pub long_position_id: String,
    /// Bot id used for short legs
    #[serde(default)]
    pub short_position_id: String,
    /// Request timeout
    #[serde(default = "default_webhook_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveConfig {
    /// Bar size of the live evaluation
    #[serde(default)]
    pub timeframe: Timeframe,
    /// Extra bars fetched beyond the window to absorb gaps
    #[serde(default = "default_buffer_bars")]
    pub buffer_bars: usize,
    /// Delay after each bar boundary before evaluating
    #[serde(default = "default_tick_offset")]
    pub tick_offset_secs: u64,
    /// SQLite file holding pair states
    #[serde(default = "default_state_db")]
    pub state_db: String,
    /// Pairs traded by the live loop
    #[serde(default)]
    pub pairs: Vec<TrackedPairConfig>,
}

/// A pair traded live with its tuned parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedPairConfig {
    /// Market data instrument of the first leg (e.g. `DOGE/USDT:USDT`)
    pub s1: String,
    pub s2: String,
    /// Symbol the execution bot trades for the first leg (e.g. `DOGE_USDT`)
    pub s1_exec_symbol: String,
    pub s2_exec_symbol: String,
    pub window: usize,
    pub threshold: f64,
}

impl TrackedPairConfig {
    /// Stable identifier used as the persistence key.
    pub fn id(&self) -> String {
        format!("{}-{}", native_symbol(&self.s1), native_symbol(&self.s2))
    }
}

fn default_base_url() -> String {
    "https://api.bitget.com".to_string()
}

fn default_product_type() -> String {
    "usdt-futures".to_string()
}

fn default_page_limit() -> usize {
    100
}

fn default_page_delay_ms() -> u64 {
    1000
}

fn default_exchange_timeout() -> u64 {
    30
}

fn default_significance() -> f64 {
    0.05
}

fn default_n_trials() -> usize {
    200
}

fn default_window_min() -> usize {
    10
}

fn default_window_max() -> usize {
    100
}

fn default_threshold_min() -> f64 {
    1.0
}

fn default_threshold_max() -> f64 {
    3.5
}

fn default_parallelism() -> usize {
    4
}

fn default_startup_trials() -> usize {
    10
}

fn default_webhook_url() -> String {
    "http://127.0.0.1:7503/trade_signal".to_string()
}

fn default_webhook_timeout() -> u64 {
    5
}

fn default_buffer_bars() -> usize {
    2
}

fn default_tick_offset() -> u64 {
    1
}

fn default_state_db() -> String {
    "data/pairs_state.db".to_string()
}

impl Config {
    /// Load configuration from environment variables and config files.
    pub fn load() -> Result<Self> {
        Self::load_from("config")
    }

    /// Load configuration using `name` as the config file stem.
    pub fn load_from(name: &str) -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name(name).required(false))
            .add_source(config::Environment::default().separator("__").prefix("PAIRS"))
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.selection.significance > 0.0 && self.selection.significance < 1.0,
            "significance must be between 0 and 1"
        );

        self.search.space().validate()?;
        anyhow::ensure!(self.search.n_trials > 0, "n_trials must be at least 1");

        anyhow::ensure!(self.exchange.page_limit > 0, "page_limit must be at least 1");

        for pair in &self.live.pairs {
            anyhow::ensure!(
                pair.window >= 2,
                "pair {} window must be at least 2",
                pair.id()
            );
            anyhow::ensure!(
                pair.threshold > 0.0 && pair.threshold.is_finite(),
                "pair {} threshold must be positive",
                pair.id()
            );
        }

        Ok(())
    }

    /// Additional checks before live trading.
    pub fn validate_live(&self) -> Result<()> {
        self.validate()?;
        anyhow::ensure!(!self.live.pairs.is_empty(), "no pairs configured under [[live.pairs]]");
        anyhow::ensure!(!self.webhook.url.is_empty(), "webhook url is required");
        anyhow::ensure!(
            !self.webhook.long_position_id.is_empty() && !self.webhook.short_position_id.is_empty(),
            "webhook long_position_id and short_position_id are required"
        );
        Ok(())
    }
}

impl SearchConfig {
    pub fn space(&self) -> SearchSpace {
        SearchSpace {
            window_min: self.window_min,
            window_max: self.window_max,
            threshold_min: self.threshold_min,
            threshold_max: self.threshold_max,
        }
    }
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            product_type: default_product_type(),
            page_limit: default_page_limit(),
            page_delay_ms: default_page_delay_ms(),
            timeout_secs: default_exchange_timeout(),
        }
    }
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            significance: default_significance(),
            max_lag: None,
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            n_trials: default_n_trials(),
            window_min: default_window_min(),
            window_max: default_window_max(),
            threshold_min: default_threshold_min(),
            threshold_max: default_threshold_max(),
            parallelism: default_parallelism(),
            startup_trials: default_startup_trials(),
            seed: None,
        }
    }
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            url: default_webhook_url(),
            long_position_id: String::new(),
            short_position_id: String::new(),
            timeout_secs: default_webhook_timeout(),
        }
    }
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            timeframe: Timeframe::default(),
            buffer_bars: default_buffer_bars(),
            tick_offset_secs: default_tick_offset(),
            state_db: default_state_db(),
            pairs: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml: &str) -> Config {
        config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    fn tracked(window: usize, threshold: f64) -> TrackedPairConfig {
        TrackedPairConfig {
            s1: "DOGE/USDT:USDT".to_string(),
            s2: "ADA/USDT:USDT".to_string(),
            s1_exec_symbol: "DOGE_USDT".to_string(),
            s2_exec_symbol: "ADA_USDT".to_string(),
            window,
            threshold,
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.search.space(), SearchSpace::default());
        assert_eq!(config.live.timeframe, Timeframe::M15);
    }

    #[test]
    fn test_parse_toml_with_pairs() {
        let config = parse(
            r#"
            [selection]
            significance = 0.01

            [webhook]
            url = "http://bot.local/trade_signal"
            long_position_id = "long-id"
            short_position_id = "short-id"

            [live]
            timeframe = "5m"

            [[live.pairs]]
            s1 = "DOGE/USDT:USDT"
            s2 = "ADA/USDT:USDT"
            s1_exec_symbol = "DOGE_USDT"
            s2_exec_symbol = "ADA_USDT"
            window = 36
            threshold = 1.61
            "#,
        );

        assert_eq!(config.selection.significance, 0.01);
        assert_eq!(config.live.timeframe, Timeframe::M5);
        assert_eq!(config.live.buffer_bars, 2);
        assert_eq!(config.live.pairs, vec![tracked(36, 1.61)]);
        assert_eq!(config.exchange.page_limit, 100);
        assert!(config.validate_live().is_ok());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = Config::default();
        config.selection.significance = 1.5;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.live.pairs.push(tracked(1, 2.0));
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.live.pairs.push(tracked(20, 0.0));
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.search.threshold_min = 4.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_live_requires_pairs_and_ids() {
        let mut config = Config::default();
        assert!(config.validate_live().is_err());

        config.live.pairs.push(tracked(36, 1.61));
        assert!(config.validate_live().is_err());

        config.webhook.long_position_id = "a".to_string();
        config.webhook.short_position_id = "b".to_string();
        assert!(config.validate_live().is_ok());
    }

    #[test]
    fn test_pair_id() {
        assert_eq!(tracked(36, 1.61).id(), "DOGEUSDT-ADAUSDT");
    }
}
