//! Real-time market analytics.
//!
//! Consumes ticks and order requests off the bus: ticks roll per-symbol
//! daily statistics, orders open entries in the trade ledger. Signals are
//! cached per symbol so an order can be annotated with the confidence and
//! regime that produced it.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info};

use quantpulse_core::{
    AnalyticsError, Direction, OrderRequestEvent, RegimeType, SignalEvent, TickEvent,
};

use crate::metrics::PortfolioMetrics;

/// Daily market statistics for a single symbol
#[derive(Debug, Clone, Serialize)]
pub struct DailyStats {
    pub symbol: String,
    pub date: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    /// When the running high was last set; ties re-stamp
    pub high_timestamp: DateTime<Utc>,
    /// When the running low was last set; ties re-stamp
    pub low_timestamp: DateTime<Utc>,
}

impl DailyStats {
    fn new(symbol: impl Into<String>, date: DateTime<Utc>) -> Self {
        Self {
            symbol: symbol.into(),
            date,
            open: Decimal::ZERO,
            high: Decimal::ZERO,
            low: Decimal::ZERO,
            close: Decimal::ZERO,
            volume: Decimal::ZERO,
            high_timestamp: date,
            low_timestamp: date,
        }
    }

    /// Daily price range
    pub fn range(&self) -> Decimal {
        self.high - self.low
    }

    /// Daily range as a percentage of the open
    pub fn range_pct(&self) -> f64 {
        if self.open.is_zero() {
            return 0.0;
        }
        (self.range() / self.open).to_f64().unwrap_or(0.0) * 100.0
    }
}

/// Trade lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TradeStatus {
    Open,
    Closed,
}

impl TradeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeStatus::Open => "OPEN",
            TradeStatus::Closed => "CLOSED",
        }
    }
}

/// Record of an executed trade for P&L tracking
#[derive(Debug, Clone, Serialize)]
pub struct TradeRecord {
    pub symbol: String,
    pub direction: Direction,
    pub entry_price: Decimal,
    pub entry_timestamp: DateTime<Utc>,
    pub quantity: Decimal,
    pub risk_amount: Decimal,
    pub confidence: f64,
    pub regime: RegimeType,
    pub exit_price: Option<Decimal>,
    pub exit_timestamp: Option<DateTime<Utc>>,
}

impl TradeRecord {
    /// Realized P&L; None while the position is open
    pub fn pnl(&self) -> Option<Decimal> {
        let exit = self.exit_price?;
        let signed = match self.direction {
            Direction::Sell => self.entry_price - exit,
            _ => exit - self.entry_price,
        };
        Some(signed * self.quantity)
    }

    /// Realized return as a percentage of the entry price
    pub fn pnl_pct(&self) -> Option<f64> {
        let exit = self.exit_price?;
        if self.entry_price.is_zero() {
            return Some(0.0);
        }
        let signed = match self.direction {
            Direction::Sell => self.entry_price - exit,
            _ => exit - self.entry_price,
        };
        Some((signed / self.entry_price).to_f64().unwrap_or(0.0) * 100.0)
    }

    pub fn status(&self) -> TradeStatus {
        if self.exit_price.is_some() {
            TradeStatus::Closed
        } else {
            TradeStatus::Open
        }
    }

    /// Time held; None while open
    pub fn duration(&self) -> Option<chrono::Duration> {
        Some(self.exit_timestamp? - self.entry_timestamp)
    }
}

/// Opaque handle to a ledger entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TradeId(usize);

#[derive(Clone, Copy)]
struct SignalNote {
    confidence: f64,
    regime: RegimeType,
}

struct AnalyticsState {
    daily: HashMap<String, DailyStats>,
    trades: Vec<TradeRecord>,
    last_signals: HashMap<String, SignalNote>,
}

/// Market statistics and trade ledger owner
pub struct MarketAnalytics {
    session_start: DateTime<Utc>,
    state: Mutex<AnalyticsState>,
}

impl MarketAnalytics {
    /// Create analytics for the configured symbols
    pub fn new(symbols: &[String], session_start: DateTime<Utc>) -> Self {
        let daily = symbols
            .iter()
            .map(|symbol| (symbol.clone(), DailyStats::new(symbol.clone(), session_start)))
            .collect();
        Self {
            session_start,
            state: Mutex::new(AnalyticsState {
                daily,
                trades: Vec::new(),
                last_signals: HashMap::new(),
            }),
        }
    }

    pub fn session_start(&self) -> DateTime<Utc> {
        self.session_start
    }

    /// Roll daily statistics with a new tick
    pub async fn on_tick(&self, tick: &TickEvent) {
        let mid = tick.mid();
        let mut state = self.state.lock().await;
        let session_start = self.session_start;
        let stats = state
            .daily
            .entry(tick.symbol.clone())
            .or_insert_with(|| DailyStats::new(tick.symbol.clone(), session_start));

        if stats.open.is_zero() {
            stats.open = mid;
        }
        stats.high = stats.high.max(mid);
        // Low initializes lazily on the first non-zero price
        stats.low = if stats.low > Decimal::ZERO {
            stats.low.min(mid)
        } else {
            mid
        };
        stats.close = mid;
        stats.volume += tick.volume;

        // Ties re-stamp: a repeat of the extremum moves its timestamp
        if mid == stats.high {
            stats.high_timestamp = tick.timestamp;
        }
        if mid == stats.low {
            stats.low_timestamp = tick.timestamp;
        }
    }

    /// Remember the latest signal per symbol for order annotation
    pub async fn on_signal(&self, signal: &SignalEvent) {
        self.state.lock().await.last_signals.insert(
            signal.symbol().to_string(),
            SignalNote {
                confidence: signal.confidence(),
                regime: signal.regime(),
            },
        );
    }

    /// Open a ledger entry for an approved order
    pub async fn on_order(&self, order: &OrderRequestEvent) -> TradeId {
        let note = {
            let state = self.state.lock().await;
            state.last_signals.get(&order.symbol).copied()
        };
        if note.is_none() {
            debug!(symbol = %order.symbol, "order without a cached signal");
        }
        let note = note.unwrap_or(SignalNote {
            confidence: 0.0,
            regime: RegimeType::Ranging,
        });

        self.record_trade(
            &order.symbol,
            order.direction,
            order.price,
            order.quantity,
            order.risk_amount,
            note.confidence,
            note.regime,
        )
        .await
    }

    /// Append an open trade to the ledger
    #[allow(clippy::too_many_arguments)]
    pub async fn record_trade(
        &self,
        symbol: &str,
        direction: Direction,
        entry_price: Decimal,
        quantity: Decimal,
        risk_amount: Decimal,
        confidence: f64,
        regime: RegimeType,
    ) -> TradeId {
        let mut state = self.state.lock().await;
        state.trades.push(TradeRecord {
            symbol: symbol.to_string(),
            direction,
            entry_price,
            entry_timestamp: Utc::now(),
            quantity,
            risk_amount,
            confidence,
            regime,
            exit_price: None,
            exit_timestamp: None,
        });
        TradeId(state.trades.len() - 1)
    }

    /// Close a trade at the given exit price
    pub async fn close_trade(
        &self,
        id: TradeId,
        exit_price: Decimal,
    ) -> Result<(), AnalyticsError> {
        let mut state = self.state.lock().await;
        let trade = state
            .trades
            .get_mut(id.0)
            .ok_or(AnalyticsError::UnknownTrade(id.0))?;
        if trade.exit_price.is_some() {
            return Err(AnalyticsError::TradeAlreadyClosed(id.0));
        }
        trade.exit_price = Some(exit_price);
        trade.exit_timestamp = Some(Utc::now());
        Ok(())
    }

    /// Mark every open trade closed at its symbol's latest daily close.
    ///
    /// End-of-session bookkeeping for the demo report; symbols that never
    /// ticked are left open.
    pub async fn close_open_at_market(&self) -> usize {
        let mut state = self.state.lock().await;
        let closes: HashMap<String, Decimal> = state
            .daily
            .iter()
            .filter(|(_, stats)| !stats.close.is_zero())
            .map(|(symbol, stats)| (symbol.clone(), stats.close))
            .collect();

        let now = Utc::now();
        let mut closed = 0;
        for trade in &mut state.trades {
            if trade.exit_price.is_none() {
                if let Some(&close) = closes.get(&trade.symbol) {
                    trade.exit_price = Some(close);
                    trade.exit_timestamp = Some(now);
                    closed += 1;
                }
            }
        }
        if closed > 0 {
            info!(closed, "marked open trades to market");
        }
        closed
    }

    /// Daily statistics for one symbol
    pub async fn daily_stats(&self, symbol: &str) -> Option<DailyStats> {
        self.state.lock().await.daily.get(symbol).cloned()
    }

    /// Daily statistics for every tracked symbol
    pub async fn all_daily_stats(&self) -> Vec<DailyStats> {
        let state = self.state.lock().await;
        let mut all: Vec<DailyStats> = state.daily.values().cloned().collect();
        all.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        all
    }

    /// Ledger entries, optionally filtered by symbol and status
    pub async fn trades(
        &self,
        symbol: Option<&str>,
        status: Option<TradeStatus>,
    ) -> Vec<TradeRecord> {
        let state = self.state.lock().await;
        state
            .trades
            .iter()
            .filter(|trade| symbol.map_or(true, |s| trade.symbol == s))
            .filter(|trade| status.map_or(true, |s| trade.status() == s))
            .cloned()
            .collect()
    }

    /// Sum of realized P&L over closed trades
    pub async fn realized_pnl(&self) -> Decimal {
        let state = self.state.lock().await;
        state
            .trades
            .iter()
            .filter_map(TradeRecord::pnl)
            .sum()
    }

    /// Derive portfolio metrics from the ledger and a balance pair
    pub async fn portfolio_metrics(
        &self,
        initial_balance: Decimal,
        current_balance: Decimal,
    ) -> PortfolioMetrics {
        let state = self.state.lock().await;

        let mut winning_trades = 0;
        let mut losing_trades = 0;
        let mut gross_profit = Decimal::ZERO;
        let mut gross_loss = Decimal::ZERO;
        let mut largest_win = Decimal::ZERO;
        let mut largest_loss = Decimal::ZERO;
        let mut returns = Vec::new();

        // Equity walks the full ledger in insertion order, realized trades
        // only
        let mut equity_curve = vec![initial_balance];
        let mut running_equity = initial_balance;

        for trade in &state.trades {
            let Some(pnl) = trade.pnl() else {
                continue;
            };
            if pnl > Decimal::ZERO {
                winning_trades += 1;
                gross_profit += pnl;
                largest_win = largest_win.max(pnl);
            } else if pnl < Decimal::ZERO {
                losing_trades += 1;
                gross_loss += pnl;
                largest_loss = largest_loss.min(pnl);
            }
            returns.push(trade.pnl_pct().unwrap_or(0.0));
            running_equity += pnl;
            equity_curve.push(running_equity);
        }

        PortfolioMetrics {
            initial_balance,
            current_balance,
            total_trades: state.trades.len(),
            winning_trades,
            losing_trades,
            largest_win,
            largest_loss,
            gross_profit,
            gross_loss,
            returns,
            equity_curve,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn symbols() -> Vec<String> {
        vec!["EURUSD".to_string(), "USDJPY".to_string()]
    }

    fn tick_at(symbol: &str, mid: Decimal, timestamp: DateTime<Utc>) -> TickEvent {
        let half = dec!(0.0001);
        TickEvent::new(symbol, timestamp, mid - half, mid + half, dec!(2))
    }

    fn ts(second: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 14, 9, 30, second).unwrap()
    }

    #[tokio::test]
    async fn daily_stats_track_extrema_and_volume() {
        let analytics = MarketAnalytics::new(&symbols(), ts(0));

        analytics.on_tick(&tick_at("EURUSD", dec!(1.0850), ts(1))).await;
        analytics.on_tick(&tick_at("EURUSD", dec!(1.0870), ts(2))).await;
        analytics.on_tick(&tick_at("EURUSD", dec!(1.0840), ts(3))).await;
        analytics.on_tick(&tick_at("EURUSD", dec!(1.0860), ts(4))).await;

        let stats = analytics.daily_stats("EURUSD").await.unwrap();
        assert_eq!(stats.open, dec!(1.0850));
        assert_eq!(stats.high, dec!(1.0870));
        assert_eq!(stats.low, dec!(1.0840));
        assert_eq!(stats.close, dec!(1.0860));
        assert_eq!(stats.volume, dec!(8));
        assert_eq!(stats.high_timestamp, ts(2));
        assert_eq!(stats.low_timestamp, ts(3));
        assert_eq!(stats.range(), dec!(0.0030));
        assert!((stats.range_pct() - 0.2765).abs() < 1e-3);
    }

    #[tokio::test]
    async fn extremum_ties_restamp_the_timestamp() {
        let analytics = MarketAnalytics::new(&symbols(), ts(0));

        analytics.on_tick(&tick_at("EURUSD", dec!(1.0870), ts(1))).await;
        analytics.on_tick(&tick_at("EURUSD", dec!(1.0850), ts(2))).await;
        // same high again, later
        analytics.on_tick(&tick_at("EURUSD", dec!(1.0870), ts(3))).await;

        let stats = analytics.daily_stats("EURUSD").await.unwrap();
        assert_eq!(stats.high, dec!(1.0870));
        assert_eq!(stats.high_timestamp, ts(3));
    }

    #[tokio::test]
    async fn low_initializes_lazily_on_first_nonzero() {
        let analytics = MarketAnalytics::new(&symbols(), ts(0));

        // A zero quote leaves the low untouched rather than pinning it at 0
        analytics
            .on_tick(&TickEvent::new("EURUSD", ts(1), dec!(0), dec!(0), dec!(1)))
            .await;
        let stats = analytics.daily_stats("EURUSD").await.unwrap();
        assert_eq!(stats.low, dec!(0));

        analytics.on_tick(&tick_at("EURUSD", dec!(1.0850), ts(2))).await;
        let stats = analytics.daily_stats("EURUSD").await.unwrap();
        assert_eq!(stats.low, dec!(1.0850));
    }

    #[tokio::test]
    async fn trade_lifecycle_and_pnl() {
        let analytics = MarketAnalytics::new(&symbols(), ts(0));

        let id = analytics
            .record_trade("EURUSD", Direction::Buy, dec!(100), dec!(10), dec!(50), 0.8, RegimeType::Trending)
            .await;

        let open = &analytics.trades(None, Some(TradeStatus::Open)).await[0];
        assert_eq!(open.status(), TradeStatus::Open);
        assert_eq!(open.pnl(), None);
        assert_eq!(open.duration(), None);

        analytics.close_trade(id, dec!(110)).await.unwrap();
        let closed = &analytics.trades(None, Some(TradeStatus::Closed)).await[0];
        assert_eq!(closed.pnl(), Some(dec!(100)));
        assert!((closed.pnl_pct().unwrap() - 10.0).abs() < 1e-9);
        assert!(closed.duration().is_some());

        // double close and unknown ids are rejected
        assert!(matches!(
            analytics.close_trade(id, dec!(120)).await,
            Err(AnalyticsError::TradeAlreadyClosed(_))
        ));
        assert!(matches!(
            analytics.close_trade(TradeId(99), dec!(120)).await,
            Err(AnalyticsError::UnknownTrade(99))
        ));
    }

    #[tokio::test]
    async fn sell_pnl_is_inverted() {
        let analytics = MarketAnalytics::new(&symbols(), ts(0));
        let id = analytics
            .record_trade("EURUSD", Direction::Sell, dec!(100), dec!(10), dec!(50), 0.8, RegimeType::MeanReversion)
            .await;
        analytics.close_trade(id, dec!(105)).await.unwrap();

        let trade = &analytics.trades(None, None).await[0];
        assert_eq!(trade.pnl(), Some(dec!(-50)));
        assert!((trade.pnl_pct().unwrap() + 5.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn orders_join_the_cached_signal() {
        let analytics = MarketAnalytics::new(&symbols(), ts(0));

        let signal = SignalEvent::new(
            "EURUSD",
            ts(1),
            Direction::Buy,
            0.85,
            RegimeType::Trending,
            dec!(1.0850),
        )
        .unwrap();
        analytics.on_signal(&signal).await;

        let order = OrderRequestEvent {
            symbol: "EURUSD".to_string(),
            timestamp: ts(2),
            direction: Direction::Buy,
            quantity: dec!(1000),
            price: dec!(1.0850),
            risk_amount: dec!(85),
            signal_id: "abc123".to_string(),
        };
        analytics.on_order(&order).await;

        let trade = &analytics.trades(Some("EURUSD"), None).await[0];
        assert_eq!(trade.confidence, 0.85);
        assert_eq!(trade.regime, RegimeType::Trending);
        assert_eq!(trade.entry_price, dec!(1.0850));
        assert_eq!(trade.quantity, dec!(1000));
    }

    #[tokio::test]
    async fn close_open_at_market_uses_daily_close() {
        let analytics = MarketAnalytics::new(&symbols(), ts(0));

        analytics.on_tick(&tick_at("EURUSD", dec!(1.0900), ts(1))).await;
        analytics
            .record_trade("EURUSD", Direction::Buy, dec!(1.0850), dec!(1000), dec!(50), 0.9, RegimeType::Trending)
            .await;
        // no ticks for USDJPY: its trade stays open
        analytics
            .record_trade("USDJPY", Direction::Buy, dec!(145.00), dec!(10), dec!(50), 0.9, RegimeType::Trending)
            .await;

        let closed = analytics.close_open_at_market().await;
        assert_eq!(closed, 1);

        let closed_trades = analytics.trades(None, Some(TradeStatus::Closed)).await;
        assert_eq!(closed_trades.len(), 1);
        assert_eq!(closed_trades[0].exit_price, Some(dec!(1.0900)));
        assert_eq!(analytics.trades(None, Some(TradeStatus::Open)).await.len(), 1);
    }

    #[tokio::test]
    async fn portfolio_metrics_round_trip() {
        let analytics = MarketAnalytics::new(&symbols(), ts(0));

        // pnl +100
        let a = analytics
            .record_trade("EURUSD", Direction::Buy, dec!(100), dec!(10), dec!(50), 0.9, RegimeType::Trending)
            .await;
        // pnl -50
        let b = analytics
            .record_trade("EURUSD", Direction::Sell, dec!(100), dec!(10), dec!(50), 0.7, RegimeType::MeanReversion)
            .await;
        // pnl +200
        let c = analytics
            .record_trade("USDJPY", Direction::Buy, dec!(50), dec!(10), dec!(50), 0.8, RegimeType::Trending)
            .await;

        analytics.close_trade(a, dec!(110)).await.unwrap();
        analytics.close_trade(b, dec!(105)).await.unwrap();
        analytics.close_trade(c, dec!(70)).await.unwrap();

        assert_eq!(analytics.realized_pnl().await, dec!(250));

        let metrics = analytics
            .portfolio_metrics(dec!(10_000), dec!(10_250))
            .await;

        assert_eq!(metrics.total_trades, 3);
        assert_eq!(metrics.winning_trades, 2);
        assert_eq!(metrics.losing_trades, 1);
        assert_eq!(metrics.gross_profit, dec!(300));
        assert_eq!(metrics.gross_loss, dec!(-50));
        assert_eq!(metrics.largest_win, dec!(200));
        assert_eq!(metrics.largest_loss, dec!(-50));
        assert!((metrics.profit_factor() - 6.0).abs() < 1e-9);
        assert!((metrics.win_rate() - 66.7).abs() < 0.1);
        assert!((metrics.expectancy() - dec!(83.33)).abs() < dec!(0.01));
        assert_eq!(
            metrics.equity_curve,
            vec![dec!(10_000), dec!(10_100), dec!(10_050), dec!(10_250)]
        );
        let expected_returns = [10.0, -5.0, 40.0];
        assert_eq!(metrics.returns.len(), expected_returns.len());
        for (actual, expected) in metrics.returns.iter().zip(expected_returns) {
            assert!((actual - expected).abs() < 1e-9);
        }
    }

    #[tokio::test]
    async fn open_trades_count_but_do_not_move_equity() {
        let analytics = MarketAnalytics::new(&symbols(), ts(0));

        let a = analytics
            .record_trade("EURUSD", Direction::Buy, dec!(100), dec!(10), dec!(50), 0.9, RegimeType::Trending)
            .await;
        analytics
            .record_trade("EURUSD", Direction::Buy, dec!(100), dec!(10), dec!(50), 0.9, RegimeType::Trending)
            .await;
        analytics.close_trade(a, dec!(110)).await.unwrap();

        let metrics = analytics
            .portfolio_metrics(dec!(10_000), dec!(10_100))
            .await;
        assert_eq!(metrics.total_trades, 2);
        assert_eq!(metrics.winning_trades, 1);
        assert_eq!(metrics.equity_curve, vec![dec!(10_000), dec!(10_100)]);
        assert_eq!(metrics.returns.len(), 1);
    }
}
