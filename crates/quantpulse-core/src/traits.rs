//! Component traits at the system boundaries

use async_trait::async_trait;

use crate::error::{DataSourceError, StrategyError};
use crate::events::SystemEvent;
use crate::types::{Bar, Timeframe};

/// Historical bar provider for multi-timeframe analysis.
///
/// In a live deployment this is backed by the market-data gateway; the demo
/// feed synthesizes bars around its own price path.
#[async_trait]
pub trait BarSource: Send + Sync {
    /// Fetch up to `count` most recent bars, oldest first.
    ///
    /// An empty result means the source has no data for the slot; fetch
    /// failures are connectivity errors, not empty markets.
    async fn fetch_bars(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        count: usize,
    ) -> Result<Vec<Bar>, DataSourceError>;
}

/// Strategy trait for downstream signal generation.
///
/// Strategies consume bus events and return follow-up events (typically
/// signals) instead of publishing directly; the dispatcher drains them
/// after the current handler chain completes.
#[async_trait]
pub trait Strategy: Send + Sync {
    /// Unique identifier for this strategy
    fn id(&self) -> &str;

    /// Check if this strategy is interested in a particular event
    fn accepts_event(&self, event: &SystemEvent) -> bool;

    /// Process an incoming event and potentially generate follow-up events
    async fn process_event(&self, event: &SystemEvent)
        -> Result<Vec<SystemEvent>, StrategyError>;
}
