//! Application configuration
//!
//! Loaded from a TOML file (`config/default.toml` by default, overridable
//! via the `QUANTPULSE_CONFIG` environment variable). Every section has
//! working defaults so the demo runs without a config file.

use std::collections::HashMap;
use std::path::Path;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::Timeframe;

/// Top-level application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Instruments to stream and supervise
    #[serde(default = "default_instruments")]
    pub instruments: Vec<String>,

    #[serde(default)]
    pub account: AccountConfig,

    #[serde(default)]
    pub risk: RiskConfig,

    #[serde(default)]
    pub supervisor: SupervisorConfig,

    #[serde(default)]
    pub mtf: MtfConfig,

    #[serde(default)]
    pub sr: SrConfig,

    #[serde(default)]
    pub feed: FeedConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub reporter: ReporterConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            instruments: default_instruments(),
            account: AccountConfig::default(),
            risk: RiskConfig::default(),
            supervisor: SupervisorConfig::default(),
            mtf: MtfConfig::default(),
            sr: SrConfig::default(),
            feed: FeedConfig::default(),
            logging: LoggingConfig::default(),
            reporter: ReporterConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }
}

fn default_instruments() -> Vec<String> {
    vec![
        "EURUSD".to_string(),
        "USDJPY".to_string(),
        "XAUUSD".to_string(),
    ]
}

/// Account parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountConfig {
    /// Account balance in base currency
    #[serde(default = "default_balance")]
    pub balance: Decimal,
}

impl Default for AccountConfig {
    fn default() -> Self {
        Self {
            balance: default_balance(),
        }
    }
}

fn default_balance() -> Decimal {
    dec!(100_000)
}

/// Risk ceilings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Maximum loss per trade in base currency
    #[serde(default = "default_max_risk_per_trade")]
    pub max_risk_per_trade: Decimal,

    /// Maximum cumulative loss per day; 2x the per-trade ceiling when unset
    #[serde(default)]
    pub max_daily_risk: Option<Decimal>,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_risk_per_trade: default_max_risk_per_trade(),
            max_daily_risk: Some(dec!(2_000)),
        }
    }
}

fn default_max_risk_per_trade() -> Decimal {
    dec!(500)
}

/// Regime classification parameters for one symbol
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SupervisorParams {
    /// Rolling mid-price window capacity
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// R-squared above which a market is trending
    #[serde(default = "default_r2_trend_threshold")]
    pub r2_trend_threshold: f64,

    /// R-squared floor below which a trend reading is indecisive
    #[serde(default = "default_r2_ranging_floor")]
    pub r2_ranging_floor: f64,

    /// Z-score magnitude that marks a mean-reversion stretch
    #[serde(default = "default_z_score_threshold")]
    pub z_score_threshold: f64,
}

impl Default for SupervisorParams {
    fn default() -> Self {
        Self {
            buffer_size: default_buffer_size(),
            r2_trend_threshold: default_r2_trend_threshold(),
            r2_ranging_floor: default_r2_ranging_floor(),
            z_score_threshold: default_z_score_threshold(),
        }
    }
}

fn default_buffer_size() -> usize {
    50
}

fn default_r2_trend_threshold() -> f64 {
    0.7
}

fn default_r2_ranging_floor() -> f64 {
    0.2
}

fn default_z_score_threshold() -> f64 {
    2.0
}

/// Partial per-symbol override of [`SupervisorParams`]
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SupervisorOverride {
    pub buffer_size: Option<usize>,
    pub r2_trend_threshold: Option<f64>,
    pub r2_ranging_floor: Option<f64>,
    pub z_score_threshold: Option<f64>,
}

/// Supervisor configuration: global defaults plus per-symbol overrides
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SupervisorConfig {
    #[serde(flatten)]
    pub defaults: SupervisorParams,

    /// Per-symbol parameter overrides, keyed by instrument
    #[serde(default)]
    pub overrides: HashMap<String, SupervisorOverride>,
}

impl SupervisorConfig {
    /// Resolve effective parameters for a symbol
    pub fn params_for(&self, symbol: &str) -> SupervisorParams {
        let mut params = self.defaults;
        if let Some(o) = self.overrides.get(symbol) {
            if let Some(v) = o.buffer_size {
                params.buffer_size = v;
            }
            if let Some(v) = o.r2_trend_threshold {
                params.r2_trend_threshold = v;
            }
            if let Some(v) = o.r2_ranging_floor {
                params.r2_ranging_floor = v;
            }
            if let Some(v) = o.z_score_threshold {
                params.z_score_threshold = v;
            }
        }
        params
    }
}

/// Multi-timeframe alignment filter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MtfConfig {
    /// Gate signals on higher-timeframe trend agreement
    #[serde(default)]
    pub enabled: bool,

    /// Timeframe the entry signal is generated on
    #[serde(default = "default_entry_timeframe")]
    pub entry_timeframe: Timeframe,

    /// Higher timeframe whose trend must agree
    #[serde(default = "default_filter_timeframe")]
    pub filter_timeframe: Timeframe,

    /// Bars fetched per trend computation
    #[serde(default = "default_bar_count")]
    pub bar_count: usize,
}

impl Default for MtfConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            entry_timeframe: default_entry_timeframe(),
            filter_timeframe: default_filter_timeframe(),
            bar_count: default_bar_count(),
        }
    }
}

fn default_entry_timeframe() -> Timeframe {
    Timeframe::M5
}

fn default_filter_timeframe() -> Timeframe {
    Timeframe::H1
}

fn default_bar_count() -> usize {
    100
}

/// Support/resistance filter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SrConfig {
    /// Gate mean-reversion entries on proximity to an S/R level
    #[serde(default)]
    pub enabled: bool,

    /// Minimum distance between distinct levels
    #[serde(default = "default_pip_threshold")]
    pub pip_threshold: f64,

    /// Extremum dominance window in bars
    #[serde(default = "default_sr_window")]
    pub window: usize,

    /// Minimum strength score for a level to be kept
    #[serde(default = "default_min_strength")]
    pub min_strength: f64,

    /// How close to a level counts as "near"
    #[serde(default = "default_sr_distance")]
    pub distance: f64,

    /// Close-price history retained per symbol for detection
    #[serde(default = "default_sr_history")]
    pub history: usize,
}

impl Default for SrConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            pip_threshold: default_pip_threshold(),
            window: default_sr_window(),
            min_strength: default_min_strength(),
            distance: default_sr_distance(),
            history: default_sr_history(),
        }
    }
}

fn default_pip_threshold() -> f64 {
    0.0010
}

fn default_sr_window() -> usize {
    10
}

fn default_min_strength() -> f64 {
    0.3
}

fn default_sr_distance() -> f64 {
    0.0015
}

fn default_sr_history() -> usize {
    200
}

/// Synthetic feed configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Milliseconds between generated ticks per symbol
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Demo session length; the feed stops itself after this long.
    /// 0 streams until stopped.
    #[serde(default = "default_duration_secs")]
    pub duration_secs: u64,

    /// Starting price per symbol; symbols without an entry use `base_price`
    #[serde(default)]
    pub base_prices: HashMap<String, Decimal>,

    /// Fallback starting price
    #[serde(default = "default_base_price")]
    pub base_price: Decimal,

    /// Delay before retrying after a failed poll
    #[serde(default = "default_error_backoff_secs")]
    pub error_backoff_secs: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            duration_secs: default_duration_secs(),
            base_prices: HashMap::new(),
            base_price: default_base_price(),
            error_backoff_secs: default_error_backoff_secs(),
        }
    }
}

fn default_tick_interval_ms() -> u64 {
    150
}

fn default_duration_secs() -> u64 {
    30
}

fn default_base_price() -> Decimal {
    dec!(100)
}

fn default_error_backoff_secs() -> u64 {
    1
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// "pretty", "json", or "compact"
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Default level filter, overridable via RUST_LOG
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: default_log_format(),
            level: default_log_level(),
        }
    }
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Periodic metrics reporter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReporterConfig {
    /// Seconds between monitoring snapshots
    #[serde(default = "default_report_interval_secs")]
    pub interval_secs: u64,
}

impl Default for ReporterConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_report_interval_secs(),
        }
    }
}

fn default_report_interval_secs() -> u64 {
    10
}
