use thiserror::Error;

/// Event construction errors
#[derive(Error, Debug)]
pub enum EventError {
    #[error("confidence must be within 0.0..=1.0, got {0}")]
    ConfidenceOutOfRange(f64),
}

/// Statistical routine errors
#[derive(Error, Debug)]
pub enum MathError {
    #[error("need at least {needed} samples, got {got}")]
    InsufficientSamples { needed: usize, got: usize },

    #[error("window of {window} exceeds {available} available samples")]
    WindowExceedsSamples { window: usize, available: usize },

    #[error("{field} must be positive, got {value}")]
    NonPositive { field: &'static str, value: f64 },

    #[error("risk fraction must be within (0, 1), got {0}")]
    RiskFractionOutOfRange(f64),
}

/// Strategy errors
#[derive(Error, Debug)]
pub enum StrategyError {
    #[error("strategy processing error: {0}")]
    ProcessingError(String),

    #[error(transparent)]
    Math(#[from] MathError),

    #[error(transparent)]
    Event(#[from] EventError),
}

/// Data source errors
#[derive(Error, Debug)]
pub enum DataSourceError {
    #[error("connection failed: {0}")]
    ConnectionError(String),

    #[error("poll failed: {0}")]
    PollError(String),

    #[error("disconnected")]
    Disconnected,
}

/// Risk management errors
#[derive(Error, Debug)]
pub enum RiskError {
    #[error("validation error: {0}")]
    ValidationError(String),
}

/// Analytics ledger errors
#[derive(Error, Debug)]
pub enum AnalyticsError {
    #[error("unknown trade id {0}")]
    UnknownTrade(usize),

    #[error("trade {0} is already closed")]
    TradeAlreadyClosed(usize),
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}
