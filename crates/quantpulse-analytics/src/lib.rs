//! Quantpulse Analytics
//!
//! Per-symbol daily statistics, the trade ledger, and derived portfolio
//! performance metrics.

pub mod market;
pub mod metrics;

pub use market::{DailyStats, MarketAnalytics, TradeId, TradeRecord, TradeStatus};
pub use metrics::PortfolioMetrics;
