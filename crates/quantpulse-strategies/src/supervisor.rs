//! Per-symbol market regime detection.
//!
//! Maintains a rolling window of mid-prices and classifies the market as
//! trending, mean-reverting, or ranging from the window's OLS fit and the
//! latest price's z-score. Classification is edge-triggered: a
//! [`RegimeEvent`] is emitted only when the label changes.

use std::collections::VecDeque;

use rust_decimal::prelude::ToPrimitive;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info};

use quantpulse_core::{
    RegimeEvent, RegimeType, StrategyError, SupervisorParams, SystemEvent, TickEvent,
};

use crate::math;

/// Samples required before classification starts
const MIN_SAMPLES: usize = 3;

/// Slope magnitudes below this do not count as a trend
const SLOPE_EPSILON: f64 = 1e-6;

/// Z-score window cap
const Z_WINDOW: usize = 20;

/// Monitoring snapshot of one supervisor
#[derive(Debug, Clone, Serialize)]
pub struct SupervisorSnapshot {
    pub symbol: String,
    pub regime: Option<RegimeType>,
    pub r_squared: f64,
    pub z_score: f64,
    pub tick_count: u64,
    pub buffer_len: usize,
}

struct SupervisorState {
    buffer: VecDeque<f64>,
    current_regime: Option<RegimeType>,
    last_r_squared: f64,
    last_z_score: f64,
    tick_count: u64,
}

/// Rolling-statistics regime classifier for a single symbol
pub struct RegimeSupervisor {
    symbol: String,
    params: SupervisorParams,
    state: Mutex<SupervisorState>,
}

impl RegimeSupervisor {
    /// Create a supervisor for one symbol
    pub fn new(symbol: impl Into<String>, params: SupervisorParams) -> Self {
        Self {
            symbol: symbol.into(),
            params,
            state: Mutex::new(SupervisorState {
                buffer: VecDeque::with_capacity(params.buffer_size),
                current_regime: None,
                last_r_squared: 0.0,
                last_z_score: 0.0,
                tick_count: 0,
            }),
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Ingest one tick; returns a regime event when the classification
    /// changes, nothing otherwise.
    pub async fn on_tick(&self, tick: &TickEvent) -> Result<Vec<SystemEvent>, StrategyError> {
        if tick.symbol != self.symbol {
            return Ok(Vec::new());
        }

        let mid = tick.mid().to_f64().ok_or_else(|| {
            StrategyError::ProcessingError(format!("unrepresentable mid price for {}", self.symbol))
        })?;

        let mut state = self.state.lock().await;
        if state.buffer.len() == self.params.buffer_size {
            state.buffer.pop_front();
        }
        state.buffer.push_back(mid);
        state.tick_count += 1;

        if state.buffer.len() < MIN_SAMPLES {
            debug!(
                symbol = %self.symbol,
                buffered = state.buffer.len(),
                "buffering prices"
            );
            return Ok(Vec::new());
        }

        let prices: Vec<f64> = state.buffer.iter().copied().collect();
        let (slope, r_squared) = math::slope_and_r_squared(&prices)?;
        let window = Z_WINDOW.min(prices.len() - 1);
        let z_score = math::z_score(&prices, window)?;

        state.last_r_squared = r_squared;
        state.last_z_score = z_score;

        let regime = self.classify(r_squared, z_score, slope);
        if state.current_regime == Some(regime) {
            return Ok(Vec::new());
        }
        state.current_regime = Some(regime);

        info!(
            symbol = %self.symbol,
            regime = %regime,
            r_squared,
            z_score,
            slope,
            "regime change"
        );

        Ok(vec![SystemEvent::Regime(RegimeEvent::new(
            self.symbol.clone(),
            tick.timestamp,
            regime,
            r_squared,
            z_score,
        ))])
    }

    /// Classify from trend fit, deviation, and slope.
    ///
    /// Trending wins when the fit is strong and the slope is non-flat; an
    /// extreme deviation reads as mean reversion; everything else ranges.
    fn classify(&self, r_squared: f64, z_score: f64, slope: f64) -> RegimeType {
        if r_squared > self.params.r2_trend_threshold && slope.abs() > SLOPE_EPSILON {
            return RegimeType::Trending;
        }
        if z_score.abs() > self.params.z_score_threshold {
            return RegimeType::MeanReversion;
        }
        RegimeType::Ranging
    }

    /// Current regime, metrics, and counters for monitoring
    pub async fn snapshot(&self) -> SupervisorSnapshot {
        let state = self.state.lock().await;
        SupervisorSnapshot {
            symbol: self.symbol.clone(),
            regime: state.current_regime,
            r_squared: state.last_r_squared,
            z_score: state.last_z_score,
            tick_count: state.tick_count,
            buffer_len: state.buffer.len(),
        }
    }
}
