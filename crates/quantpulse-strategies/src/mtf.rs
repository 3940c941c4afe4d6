//! Multi-timeframe trend alignment.
//!
//! Compares the trend of a higher timeframe against a proposed entry
//! direction: a buy entry needs the filter timeframe pointing up, a sell
//! entry needs it pointing down. A pure filter; the only state is a
//! last-fetched-bars cache kept for inspection.

use std::collections::HashMap;
use std::sync::Arc;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{info, warn};

use quantpulse_core::{Bar, BarSource, Direction, Timeframe};

use crate::math;

/// Slope magnitudes below this count as flat
const SLOPE_EPSILON: f64 = 1e-5;

/// Trend direction of a timeframe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TrendDirection {
    Up,
    Down,
    Flat,
    /// No data available for the slot
    Unknown,
}

impl TrendDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrendDirection::Up => "UP",
            TrendDirection::Down => "DOWN",
            TrendDirection::Flat => "FLAT",
            TrendDirection::Unknown => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for TrendDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trend analysis of one (symbol, timeframe) slot
#[derive(Debug, Clone, Serialize)]
pub struct TrendReport {
    pub slope: f64,
    pub direction: TrendDirection,
    /// Latest close, zero when no data
    pub close: Decimal,
}

/// Multi-timeframe analyzer over an external bar source
pub struct MtfAnalyzer {
    source: Arc<dyn BarSource>,
    bar_count: usize,
    /// Last fetched bars per slot, for inspection only
    last_bars: RwLock<HashMap<(String, Timeframe), Vec<Bar>>>,
}

impl MtfAnalyzer {
    pub fn new(source: Arc<dyn BarSource>, bar_count: usize) -> Self {
        Self {
            source,
            bar_count,
            last_bars: RwLock::new(HashMap::new()),
        }
    }

    /// Linear-regression slope of close prices; fewer than 2 bars reads
    /// as no slope.
    fn close_slope(bars: &[Bar]) -> f64 {
        if bars.len() < 2 {
            return 0.0;
        }
        let closes: Vec<f64> = bars
            .iter()
            .filter_map(|bar| bar.close.to_f64())
            .collect();
        if closes.len() < 2 {
            return 0.0;
        }
        match math::slope_and_r_squared(&closes) {
            Ok((slope, _)) => slope,
            Err(_) => 0.0,
        }
    }

    /// Get trend analysis for a symbol/timeframe
    pub async fn trend(&self, symbol: &str, timeframe: Timeframe) -> TrendReport {
        let bars = match self.source.fetch_bars(symbol, timeframe, self.bar_count).await {
            Ok(bars) => bars,
            Err(e) => {
                warn!(symbol = %symbol, timeframe = %timeframe, error = %e, "bar fetch failed");
                Vec::new()
            }
        };

        if bars.is_empty() {
            return TrendReport {
                slope: 0.0,
                direction: TrendDirection::Unknown,
                close: Decimal::ZERO,
            };
        }

        let slope = Self::close_slope(&bars);
        let direction = if slope > SLOPE_EPSILON {
            TrendDirection::Up
        } else if slope < -SLOPE_EPSILON {
            TrendDirection::Down
        } else {
            TrendDirection::Flat
        };
        let close = bars.last().map(|bar| bar.close).unwrap_or(Decimal::ZERO);

        self.last_bars
            .write()
            .await
            .insert((symbol.to_string(), timeframe), bars);

        TrendReport {
            slope,
            direction,
            close,
        }
    }

    /// Check if a proposed entry agrees with the filter timeframe's trend.
    ///
    /// Buy needs the filter pointing up, sell needs it pointing down; an
    /// indeterminate filter trend blocks the entry.
    pub async fn is_aligned(
        &self,
        symbol: &str,
        entry_direction: Direction,
        entry_timeframe: Timeframe,
        filter_timeframe: Timeframe,
    ) -> bool {
        let filter_trend = self.trend(symbol, filter_timeframe).await;

        if filter_trend.direction == TrendDirection::Unknown {
            warn!(
                symbol = %symbol,
                timeframe = %filter_timeframe,
                "cannot determine filter trend"
            );
            return false;
        }

        let aligned = match entry_direction {
            Direction::Buy => filter_trend.direction == TrendDirection::Up,
            Direction::Sell => filter_trend.direction == TrendDirection::Down,
            Direction::Neutral => false,
        };

        info!(
            symbol = %symbol,
            entry_timeframe = %entry_timeframe,
            entry_direction = %entry_direction,
            filter_timeframe = %filter_timeframe,
            filter_trend = %filter_trend.direction,
            aligned,
            "mtf check"
        );

        aligned
    }

    /// Last fetched bars for a slot, if any
    pub async fn cached_bars(&self, symbol: &str, timeframe: Timeframe) -> Option<Vec<Bar>> {
        self.last_bars
            .read()
            .await
            .get(&(symbol.to_string(), timeframe))
            .cloned()
    }
}
