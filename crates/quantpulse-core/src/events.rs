//! System events
//!
//! Typed events flowing over the bus: market ticks in, regime changes,
//! trade signals, and risk-approved order requests out. Events are value
//! objects: once constructed they are only cloned, never mutated.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::error::EventError;

/// System-wide event types
#[derive(Debug, Clone, Serialize)]
pub enum SystemEvent {
    /// Price update from a market data feed
    Tick(TickEvent),

    /// Regime classification change for a symbol
    Regime(RegimeEvent),

    /// Candidate trade signal from a strategy
    Signal(SignalEvent),

    /// Risk-approved order request
    OrderRequest(OrderRequestEvent),
}

impl SystemEvent {
    /// Dispatch kind of this event
    pub fn kind(&self) -> EventKind {
        match self {
            SystemEvent::Tick(_) => EventKind::Tick,
            SystemEvent::Regime(_) => EventKind::Regime,
            SystemEvent::Signal(_) => EventKind::Signal,
            SystemEvent::OrderRequest(_) => EventKind::OrderRequest,
        }
    }

    /// Get the event type as a string
    pub fn event_type(&self) -> &'static str {
        self.kind().as_str()
    }

    /// Get the timestamp of the event
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            SystemEvent::Tick(e) => e.timestamp,
            SystemEvent::Regime(e) => e.timestamp,
            SystemEvent::Signal(e) => e.timestamp(),
            SystemEvent::OrderRequest(e) => e.timestamp,
        }
    }

    /// Get the symbol the event refers to
    pub fn symbol(&self) -> &str {
        match self {
            SystemEvent::Tick(e) => &e.symbol,
            SystemEvent::Regime(e) => &e.symbol,
            SystemEvent::Signal(e) => e.symbol(),
            SystemEvent::OrderRequest(e) => &e.symbol,
        }
    }
}

/// Dispatch key for bus subscriptions, one per concrete event type.
///
/// Dispatch is an exact match on this tag; a handler registered for one
/// kind never sees another kind's events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    Tick,
    Regime,
    Signal,
    OrderRequest,
}

impl EventKind {
    /// String form used in logs
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Tick => "tick",
            EventKind::Regime => "regime_change",
            EventKind::Signal => "signal",
            EventKind::OrderRequest => "order_request",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Market regime classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RegimeType {
    /// Persistent directional drift
    Trending,
    /// Extreme deviation likely to revert
    MeanReversion,
    /// Neither trending nor stretched
    Ranging,
}

impl RegimeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegimeType::Trending => "TRENDING",
            RegimeType::MeanReversion => "MEAN_REVERSION",
            RegimeType::Ranging => "RANGING",
        }
    }
}

impl std::fmt::Display for RegimeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trade direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Buy,
    Sell,
    /// No actionable direction; dropped by the risk gate
    Neutral,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Buy => "BUY",
            Direction::Sell => "SELL",
            Direction::Neutral => "NEUTRAL",
        }
    }

    /// True for Buy and Sell
    pub fn is_actionable(&self) -> bool {
        !matches!(self, Direction::Neutral)
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Price update for a single symbol
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickEvent {
    /// Instrument identifier (e.g. "EURUSD")
    pub symbol: String,
    /// Venue timestamp of the observation
    pub timestamp: DateTime<Utc>,
    /// Best bid
    pub bid: Decimal,
    /// Best ask
    pub ask: Decimal,
    /// Traded volume carried by the observation
    pub volume: Decimal,
}

impl TickEvent {
    /// Create a new tick event
    pub fn new(
        symbol: impl Into<String>,
        timestamp: DateTime<Utc>,
        bid: Decimal,
        ask: Decimal,
        volume: Decimal,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            timestamp,
            bid,
            ask,
            volume,
        }
    }

    /// Mid price, (bid + ask) / 2
    pub fn mid(&self) -> Decimal {
        (self.bid + self.ask) / dec!(2)
    }

    /// Quoted spread, ask - bid
    pub fn spread(&self) -> Decimal {
        self.ask - self.bid
    }
}

/// Regime classification change for a symbol
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeEvent {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    /// Newly classified regime
    pub regime: RegimeType,
    /// Trend fit of the rolling window, within [0, 1]
    pub r_squared: f64,
    /// Deviation of the latest price from the rolling mean
    pub z_score: f64,
}

impl RegimeEvent {
    pub fn new(
        symbol: impl Into<String>,
        timestamp: DateTime<Utc>,
        regime: RegimeType,
        r_squared: f64,
        z_score: f64,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            timestamp,
            regime,
            r_squared,
            z_score,
        }
    }
}

/// Candidate trade signal.
///
/// Fields are private: the confidence invariant is enforced at construction
/// and the event cannot be edited into an invalid state afterwards.
#[derive(Debug, Clone, Serialize)]
pub struct SignalEvent {
    symbol: String,
    timestamp: DateTime<Utc>,
    direction: Direction,
    confidence: f64,
    regime: RegimeType,
    price: Decimal,
}

impl SignalEvent {
    /// Create a new signal.
    ///
    /// Fails with [`EventError::ConfidenceOutOfRange`] when confidence is
    /// outside [0, 1].
    pub fn new(
        symbol: impl Into<String>,
        timestamp: DateTime<Utc>,
        direction: Direction,
        confidence: f64,
        regime: RegimeType,
        price: Decimal,
    ) -> Result<Self, EventError> {
        if !(0.0..=1.0).contains(&confidence) {
            return Err(EventError::ConfidenceOutOfRange(confidence));
        }
        Ok(Self {
            symbol: symbol.into(),
            timestamp,
            direction,
            confidence,
            regime,
            price,
        })
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Signal confidence within [0, 1]
    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    /// Regime the signal was generated under
    pub fn regime(&self) -> RegimeType {
        self.regime
    }

    /// Reference price at signal time (latest observed mid)
    pub fn price(&self) -> Decimal {
        self.price
    }
}

/// Risk-approved order request, the execution boundary of the pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequestEvent {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub direction: Direction,
    /// Position size, always positive
    pub quantity: Decimal,
    /// Reference price the order was sized against
    pub price: Decimal,
    /// Risk budget consumed by the order, never negative
    pub risk_amount: Decimal,
    /// Content-derived idempotency key of the originating signal
    pub signal_id: String,
}
