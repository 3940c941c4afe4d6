//! Regime-following signal generation.
//!
//! Consumes regime changes and turns them into directional signals: follow
//! the drift in a trending market, fade the stretch in a mean-reverting
//! one, stay out of ranging markets. Entries can additionally be gated on
//! higher-timeframe alignment and proximity to a support/resistance level.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use tracing::{debug, info};

use quantpulse_core::{
    Direction, MtfConfig, RegimeEvent, RegimeType, SignalEvent, SrConfig, Strategy,
    StrategyError, SystemEvent, Timeframe,
};

use crate::mtf::MtfAnalyzer;
use crate::sr::{LevelType, SrDetector};

/// Close history kept per symbol when no S/R filter sets its own depth
const DEFAULT_HISTORY: usize = 200;

struct MtfFilter {
    analyzer: Arc<MtfAnalyzer>,
    entry_timeframe: Timeframe,
    filter_timeframe: Timeframe,
}

struct SrFilter {
    detector: Arc<SrDetector>,
    window: usize,
    min_strength: f64,
    distance: f64,
}

#[derive(Default)]
struct StrategyState {
    /// Latest observed mid per symbol, the signal reference price
    last_price: HashMap<String, Decimal>,
    /// Bounded mid history per symbol for S/R detection
    closes: HashMap<String, VecDeque<f64>>,
}

/// Signal generator driven by regime classification
pub struct RegimeStrategy {
    id: String,
    mtf: Option<MtfFilter>,
    sr: Option<SrFilter>,
    history: usize,
    state: Mutex<StrategyState>,
}

impl RegimeStrategy {
    pub fn new() -> Self {
        Self {
            id: "regime_following".to_string(),
            mtf: None,
            sr: None,
            history: DEFAULT_HISTORY,
            state: Mutex::new(StrategyState::default()),
        }
    }

    /// Gate entries on higher-timeframe trend agreement
    pub fn with_mtf_filter(mut self, analyzer: Arc<MtfAnalyzer>, config: &MtfConfig) -> Self {
        self.mtf = Some(MtfFilter {
            analyzer,
            entry_timeframe: config.entry_timeframe,
            filter_timeframe: config.filter_timeframe,
        });
        self
    }

    /// Gate mean-reversion entries on proximity to a support/resistance
    /// level
    pub fn with_sr_filter(mut self, detector: Arc<SrDetector>, config: &SrConfig) -> Self {
        self.history = config.history.max(config.window * 2);
        self.sr = Some(SrFilter {
            detector,
            window: config.window,
            min_strength: config.min_strength,
            distance: config.distance,
        });
        self
    }

    async fn on_tick(&self, symbol: &str, mid: Decimal) {
        let mut state = self.state.lock().await;
        state.last_price.insert(symbol.to_string(), mid);
        if let Some(close) = mid.to_f64() {
            let closes = state.closes.entry(symbol.to_string()).or_default();
            if closes.len() == self.history {
                closes.pop_front();
            }
            closes.push_back(close);
        }
    }

    async fn on_regime(&self, event: &RegimeEvent) -> Result<Vec<SystemEvent>, StrategyError> {
        let (direction, confidence) = match event.regime {
            RegimeType::Trending => {
                // Follow the drift; the z-score sign says which side of the
                // local mean the move sits on
                let direction = if event.z_score >= 0.0 {
                    Direction::Buy
                } else {
                    Direction::Sell
                };
                (direction, event.r_squared.min(1.0))
            }
            RegimeType::MeanReversion => {
                // Fade the stretch
                let direction = if event.z_score > 0.0 {
                    Direction::Sell
                } else {
                    Direction::Buy
                };
                (direction, (event.z_score.abs() / 3.0).min(1.0))
            }
            RegimeType::Ranging => {
                debug!(symbol = %event.symbol, "ranging market, no signal");
                return Ok(Vec::new());
            }
        };

        let price = {
            let state = self.state.lock().await;
            match state.last_price.get(&event.symbol) {
                Some(&price) => price,
                None => {
                    debug!(symbol = %event.symbol, "no reference price yet, dropping signal");
                    return Ok(Vec::new());
                }
            }
        };

        if let Some(filter) = &self.mtf {
            let aligned = filter
                .analyzer
                .is_aligned(
                    &event.symbol,
                    direction,
                    filter.entry_timeframe,
                    filter.filter_timeframe,
                )
                .await;
            if !aligned {
                info!(
                    symbol = %event.symbol,
                    direction = %direction,
                    "entry blocked by mtf filter"
                );
                return Ok(Vec::new());
            }
        }

        if event.regime == RegimeType::MeanReversion {
            if let Some(filter) = &self.sr {
                if !self.near_sr_level(filter, &event.symbol, direction, price).await {
                    info!(
                        symbol = %event.symbol,
                        direction = %direction,
                        "entry blocked by s/r filter"
                    );
                    return Ok(Vec::new());
                }
            }
        }

        let signal = SignalEvent::new(
            event.symbol.clone(),
            event.timestamp,
            direction,
            confidence,
            event.regime,
            price,
        )?;

        info!(
            symbol = %event.symbol,
            direction = %direction,
            confidence,
            regime = %event.regime,
            "signal"
        );

        Ok(vec![SystemEvent::Signal(signal)])
    }

    /// Mean-reversion entries must fade into a level that has held before:
    /// buys near support, sells near resistance.
    async fn near_sr_level(
        &self,
        filter: &SrFilter,
        symbol: &str,
        direction: Direction,
        price: Decimal,
    ) -> bool {
        let closes: Vec<f64> = {
            let state = self.state.lock().await;
            state
                .closes
                .get(symbol)
                .map(|closes| closes.iter().copied().collect())
                .unwrap_or_default()
        };

        filter
            .detector
            .detect_levels(symbol, &closes, filter.window, filter.min_strength)
            .await;

        let level_type = match direction {
            Direction::Buy => LevelType::Support,
            _ => LevelType::Resistance,
        };
        let Some(price) = price.to_f64() else {
            return false;
        };
        filter
            .detector
            .is_near_level(symbol, price, level_type, filter.distance)
            .await
    }
}

impl Default for RegimeStrategy {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Strategy for RegimeStrategy {
    fn id(&self) -> &str {
        &self.id
    }

    fn accepts_event(&self, event: &SystemEvent) -> bool {
        matches!(event, SystemEvent::Tick(_) | SystemEvent::Regime(_))
    }

    async fn process_event(
        &self,
        event: &SystemEvent,
    ) -> Result<Vec<SystemEvent>, StrategyError> {
        match event {
            SystemEvent::Tick(tick) => {
                self.on_tick(&tick.symbol, tick.mid()).await;
                Ok(Vec::new())
            }
            SystemEvent::Regime(regime) => self.on_regime(regime).await,
            _ => Ok(Vec::new()),
        }
    }
}
