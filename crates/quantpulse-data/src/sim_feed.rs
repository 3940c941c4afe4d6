//! Synthetic market data feed.
//!
//! Stands in for the live gateway: generates a regime-switching random walk
//! per symbol and publishes [`TickEvent`]s to the bus, and synthesizes OHLC
//! bars around the same price path for multi-timeframe queries.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use rand_distr::{Distribution, Normal};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tokio::time::sleep;
use tracing::{debug, error, info};

use quantpulse_core::{
    Bar, BarSource, DataSourceError, FeedConfig, SystemEvent, TickEvent, Timeframe,
};

use crate::event_bus::EventBus;

/// Quoted spread as a fraction of the symbol's base price (~2 pips on a
/// 1.08 major)
const SPREAD_RATIO: f64 = 0.00002;

/// Ticks between synthetic regime flips
const REGIME_SWITCH_TICKS: u32 = 100;

/// Asynchronous tick source boundary.
///
/// A live implementation owns connection setup/teardown and must surface a
/// fatal error from `start` when the venue is unreachable; transient
/// per-poll failures are logged and retried after a backoff, never aborting
/// the stream.
#[async_trait]
pub trait DataFeed: Send + Sync {
    /// Get the name of this feed
    fn name(&self) -> &str;

    /// Stream ticks into the bus until stopped or the session ends
    async fn start(&self, bus: Arc<EventBus>) -> Result<(), DataSourceError>;

    /// Request a cooperative stop, observed within one poll interval
    fn stop(&self);

    /// Check if the feed is currently streaming
    fn is_running(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PathRegime {
    Trending,
    MeanReverting,
}

struct SymbolState {
    base_price: f64,
    current_price: f64,
    regime: PathRegime,
    ticks_since_switch: u32,
}

impl SymbolState {
    fn new(base_price: f64) -> Self {
        Self {
            base_price,
            current_price: base_price,
            regime: PathRegime::Trending,
            ticks_since_switch: 0,
        }
    }

    /// Advance the price path by one tick
    fn step(&mut self) -> Result<f64, DataSourceError> {
        self.ticks_since_switch += 1;
        if self.ticks_since_switch > REGIME_SWITCH_TICKS {
            self.regime = match self.regime {
                PathRegime::Trending => PathRegime::MeanReverting,
                PathRegime::MeanReverting => PathRegime::Trending,
            };
            self.ticks_since_switch = 0;
        }

        let mut rng = rand::thread_rng();
        let change = match self.regime {
            PathRegime::Trending => gaussian(&mut rng, self.base_price * 1e-7, self.base_price * 5e-6)?,
            PathRegime::MeanReverting => {
                let deviation = self.current_price - self.base_price;
                -deviation * 0.1 + gaussian(&mut rng, 0.0, self.base_price * 3e-6)?
            }
        };

        self.current_price += change;
        // Floor the walk well above zero
        self.current_price = self.current_price.max(self.base_price * 0.95);
        Ok(self.current_price)
    }
}

fn gaussian<R: Rng>(rng: &mut R, mean: f64, std_dev: f64) -> Result<f64, DataSourceError> {
    let dist = Normal::new(mean, std_dev)
        .map_err(|e| DataSourceError::PollError(format!("bad distribution: {e}")))?;
    Ok(dist.sample(rng))
}

fn to_decimal(value: f64, what: &str) -> Result<Decimal, DataSourceError> {
    Decimal::from_f64_retain(value)
        .ok_or_else(|| DataSourceError::PollError(format!("non-finite {what}: {value}")))
}

/// Synthetic regime-switching tick generator
pub struct SimulatedFeed {
    symbols: Vec<String>,
    config: FeedConfig,
    running: AtomicBool,
    states: tokio::sync::Mutex<HashMap<String, SymbolState>>,
}

impl SimulatedFeed {
    /// Create a feed for the given symbols
    pub fn new(symbols: Vec<String>, config: FeedConfig) -> Self {
        let states = symbols
            .iter()
            .map(|symbol| {
                let base = config
                    .base_prices
                    .get(symbol)
                    .copied()
                    .unwrap_or(config.base_price)
                    .to_f64()
                    .unwrap_or(100.0);
                (symbol.clone(), SymbolState::new(base))
            })
            .collect();
        Self {
            symbols,
            config,
            running: AtomicBool::new(false),
            states: tokio::sync::Mutex::new(states),
        }
    }

    /// Generate the next tick for one symbol
    async fn next_tick(&self, symbol: &str) -> Result<TickEvent, DataSourceError> {
        let mut states = self.states.lock().await;
        let state = states
            .get_mut(symbol)
            .ok_or_else(|| DataSourceError::PollError(format!("unknown symbol {symbol}")))?;

        let price = state.step()?;
        let half_spread = state.base_price * SPREAD_RATIO / 2.0;
        let bid = to_decimal(price - half_spread, "bid")?;
        let ask = to_decimal(price + half_spread, "ask")?;
        let volume = to_decimal(rand::thread_rng().gen_range(0.1..10.0), "volume")?;

        Ok(TickEvent::new(symbol, Utc::now(), bid, ask, volume))
    }
}

#[async_trait]
impl DataFeed for SimulatedFeed {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn start(&self, bus: Arc<EventBus>) -> Result<(), DataSourceError> {
        if self.symbols.is_empty() {
            return Err(DataSourceError::ConnectionError(
                "no instruments configured".to_string(),
            ));
        }

        self.running.store(true, Ordering::SeqCst);
        info!(symbols = ?self.symbols, "starting data feed");

        let started = Instant::now();
        let interval = Duration::from_millis(self.config.tick_interval_ms);
        let backoff = Duration::from_secs(self.config.error_backoff_secs);
        let session = Duration::from_secs(self.config.duration_secs);

        while self.running.load(Ordering::SeqCst) {
            if self.config.duration_secs > 0 && started.elapsed() >= session {
                break;
            }

            for symbol in &self.symbols {
                match self.next_tick(symbol).await {
                    Ok(tick) => bus.publish(SystemEvent::Tick(tick)).await,
                    Err(e) => {
                        error!(symbol = %symbol, error = %e, "feed poll failed");
                        sleep(backoff).await;
                    }
                }
            }

            sleep(interval).await;
        }

        self.running.store(false, Ordering::SeqCst);
        info!("data feed stopped");
        Ok(())
    }

    fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BarSource for SimulatedFeed {
    /// Synthesize bars along the path from the session open to the current
    /// price, oldest first.
    async fn fetch_bars(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        count: usize,
    ) -> Result<Vec<Bar>, DataSourceError> {
        let states = self.states.lock().await;
        let state = match states.get(symbol) {
            Some(state) => state,
            None => {
                debug!(symbol = %symbol, timeframe = %timeframe, "no bars for symbol");
                return Ok(Vec::new());
            }
        };
        if count == 0 {
            return Ok(Vec::new());
        }

        let mut rng = rand::thread_rng();
        let drift = state.current_price - state.base_price;
        let jitter = state.base_price * 2e-6;
        let now = Utc::now();

        let mut closes = Vec::with_capacity(count);
        for i in 0..count {
            let progress = if count > 1 {
                i as f64 / (count - 1) as f64
            } else {
                1.0
            };
            let noise = gaussian(&mut rng, 0.0, jitter)?;
            closes.push(state.base_price + drift * progress + noise);
        }

        let mut bars = Vec::with_capacity(count);
        for (i, &close) in closes.iter().enumerate() {
            let open = if i == 0 { state.base_price } else { closes[i - 1] };
            let wick = jitter * rng.gen_range(0.5..2.0);
            let high = open.max(close) + wick;
            let low = open.min(close) - wick;
            let age = (count - i) as i64 * timeframe.seconds();
            bars.push(Bar {
                symbol: symbol.to_string(),
                timeframe,
                timestamp: now - chrono::Duration::seconds(age),
                open: to_decimal(open, "open")?,
                high: to_decimal(high, "high")?,
                low: to_decimal(low, "low")?,
                close: to_decimal(close, "close")?,
                volume: to_decimal(rng.gen_range(10.0..1000.0), "volume")?,
            });
        }
        Ok(bars)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    use quantpulse_core::EventKind;

    fn test_config(duration_secs: u64) -> FeedConfig {
        FeedConfig {
            tick_interval_ms: 10,
            duration_secs,
            base_prices: HashMap::from([("EURUSD".to_string(), dec!(1.0850))]),
            base_price: dec!(100),
            error_backoff_secs: 1,
        }
    }

    #[tokio::test]
    async fn streams_ticks_for_all_symbols() {
        let bus = Arc::new(EventBus::new());
        let seen = Arc::new(tokio::sync::Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        bus.subscribe(EventKind::Tick, "collector", move |event| {
            let sink = Arc::clone(&sink);
            async move {
                if let SystemEvent::Tick(tick) = event {
                    sink.lock().await.push(tick);
                }
                Ok(Vec::new())
            }
        });

        let feed = SimulatedFeed::new(
            vec!["EURUSD".to_string(), "USDJPY".to_string()],
            test_config(1),
        );
        feed.start(Arc::clone(&bus)).await.unwrap();

        let seen = seen.lock().await;
        assert!(seen.len() >= 4, "expected a stream of ticks, got {}", seen.len());
        assert!(seen.iter().any(|t| t.symbol == "EURUSD"));
        assert!(seen.iter().any(|t| t.symbol == "USDJPY"));
        for tick in seen.iter() {
            assert!(tick.bid < tick.ask);
            assert!(tick.volume > dec!(0));
        }
    }

    #[tokio::test]
    async fn stop_is_observed_within_a_poll_interval() {
        let bus = Arc::new(EventBus::new());
        let feed = Arc::new(SimulatedFeed::new(
            vec!["EURUSD".to_string()],
            // duration 0 = run until stopped
            test_config(0),
        ));

        let runner = Arc::clone(&feed);
        let handle = tokio::spawn(async move { runner.start(bus).await });

        sleep(Duration::from_millis(50)).await;
        assert!(feed.is_running());
        feed.stop();

        let result = tokio::time::timeout(Duration::from_secs(1), handle).await;
        assert!(result.is_ok(), "feed did not stop in time");
        assert!(!feed.is_running());
    }

    #[tokio::test]
    async fn start_fails_without_instruments() {
        let bus = Arc::new(EventBus::new());
        let feed = SimulatedFeed::new(Vec::new(), test_config(1));
        let result = feed.start(bus).await;
        assert!(matches!(result, Err(DataSourceError::ConnectionError(_))));
    }

    #[tokio::test]
    async fn synthesized_bars_are_coherent() {
        let feed = SimulatedFeed::new(vec!["EURUSD".to_string()], test_config(1));
        let bars = feed.fetch_bars("EURUSD", Timeframe::H1, 50).await.unwrap();

        assert_eq!(bars.len(), 50);
        for pair in bars.windows(2) {
            assert!(pair[0].timestamp < pair[1].timestamp);
        }
        for bar in &bars {
            assert!(bar.high >= bar.open.max(bar.close));
            assert!(bar.low <= bar.open.min(bar.close));
            assert_eq!(bar.timeframe, Timeframe::H1);
        }
    }

    #[tokio::test]
    async fn unknown_symbol_yields_no_bars() {
        let feed = SimulatedFeed::new(vec!["EURUSD".to_string()], test_config(1));
        let bars = feed.fetch_bars("GBPUSD", Timeframe::H1, 50).await.unwrap();
        assert!(bars.is_empty());
    }

    #[test]
    fn price_path_respects_floor() {
        let mut state = SymbolState::new(100.0);
        state.regime = PathRegime::MeanReverting;
        state.current_price = 90.0;
        for _ in 0..10 {
            state.step().unwrap();
        }
        assert!(state.current_price >= 95.0);
    }
}
