//! End-to-end pipeline test: ticks in, orders and ledger entries out.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::Mutex;

use quantpulse_analytics::{MarketAnalytics, TradeStatus};
use quantpulse_core::{
    Direction, EventKind, RegimeType, RiskConfig, SupervisorParams, SystemEvent, TickEvent,
};
use quantpulse_data::EventBus;
use quantpulse_risk::RiskManager;
use quantpulse_strategies::{RegimeStrategy, RegimeSupervisor};
use quantpulse_core::Strategy;

fn tick(symbol: &str, mid: Decimal) -> SystemEvent {
    let half = dec!(0.0001);
    SystemEvent::Tick(TickEvent::new(symbol, Utc::now(), mid - half, mid + half, dec!(1)))
}

struct Pipeline {
    bus: Arc<EventBus>,
    risk_manager: Arc<RiskManager>,
    analytics: Arc<MarketAnalytics>,
    orders: Arc<Mutex<Vec<SystemEvent>>>,
}

/// Wire the full chain the way the binary does: supervisor on ticks,
/// strategy on ticks and regimes, risk gate on signals, analytics on
/// everything it consumes.
fn wire(symbol: &str) -> Pipeline {
    let bus = Arc::new(EventBus::new());
    let supervisor = Arc::new(RegimeSupervisor::new(symbol, SupervisorParams::default()));
    let strategy = Arc::new(RegimeStrategy::new());
    let risk_manager = Arc::new(RiskManager::new(
        dec!(100_000),
        &RiskConfig {
            max_risk_per_trade: dec!(500),
            max_daily_risk: Some(dec!(2_000)),
        },
    ));
    let analytics = Arc::new(MarketAnalytics::new(&[symbol.to_string()], Utc::now()));

    {
        let supervisor = Arc::clone(&supervisor);
        bus.subscribe(EventKind::Tick, "regime_supervisor", move |event| {
            let supervisor = Arc::clone(&supervisor);
            async move {
                match event {
                    SystemEvent::Tick(tick) => supervisor.on_tick(&tick).await.map_err(Into::into),
                    _ => Ok(Vec::new()),
                }
            }
        });
    }

    for kind in [EventKind::Tick, EventKind::Regime] {
        let strategy = Arc::clone(&strategy);
        bus.subscribe(kind, "regime_strategy", move |event| {
            let strategy = Arc::clone(&strategy);
            async move {
                if !strategy.accepts_event(&event) {
                    return Ok(Vec::new());
                }
                strategy.process_event(&event).await.map_err(Into::into)
            }
        });
    }

    {
        let risk_manager = Arc::clone(&risk_manager);
        bus.subscribe(EventKind::Signal, "risk_manager", move |event| {
            let risk_manager = Arc::clone(&risk_manager);
            async move {
                match event {
                    SystemEvent::Signal(signal) => {
                        risk_manager.on_signal(&signal).await.map_err(Into::into)
                    }
                    _ => Ok(Vec::new()),
                }
            }
        });
    }

    for kind in [EventKind::Tick, EventKind::Signal, EventKind::OrderRequest] {
        let analytics = Arc::clone(&analytics);
        bus.subscribe(kind, "market_analytics", move |event| {
            let analytics = Arc::clone(&analytics);
            async move {
                match event {
                    SystemEvent::Tick(tick) => analytics.on_tick(&tick).await,
                    SystemEvent::Signal(signal) => analytics.on_signal(&signal).await,
                    SystemEvent::OrderRequest(order) => {
                        analytics.on_order(&order).await;
                    }
                    _ => {}
                }
                Ok(Vec::new())
            }
        });
    }

    let orders = Arc::new(Mutex::new(Vec::new()));
    {
        let orders = Arc::clone(&orders);
        bus.subscribe(EventKind::OrderRequest, "order_collector", move |event| {
            let orders = Arc::clone(&orders);
            async move {
                orders.lock().await.push(event);
                Ok(Vec::new())
            }
        });
    }

    Pipeline {
        bus,
        risk_manager,
        analytics,
        orders,
    }
}

#[tokio::test]
async fn uptrend_ticks_produce_one_risk_gated_order() {
    let pipeline = wire("EURUSD");

    for i in 0..40 {
        let mid = dec!(1.0850) + Decimal::from(i) * dec!(0.0001);
        pipeline.bus.publish(tick("EURUSD", mid)).await;
    }

    // One regime change -> one signal -> one approved order
    let orders = pipeline.orders.lock().await;
    assert_eq!(orders.len(), 1);
    let order = match &orders[0] {
        SystemEvent::OrderRequest(order) => order,
        other => panic!("expected order, got {other:?}"),
    };
    assert_eq!(order.symbol, "EURUSD");
    assert_eq!(order.direction, Direction::Buy);
    assert!(order.quantity > Decimal::ZERO);
    assert!(order.risk_amount > dec!(499) && order.risk_amount <= dec!(500));

    let report = pipeline.risk_manager.report().await;
    assert_eq!(report.total_orders, 1);
    assert_eq!(report.open_trades, 1);
    assert_eq!(report.daily_loss, order.risk_amount);

    // Analytics recorded the trade, annotated with the signal that caused it
    let trades = pipeline.analytics.trades(None, Some(TradeStatus::Open)).await;
    assert_eq!(trades.len(), 1);
    assert_eq!(trades[0].regime, RegimeType::Trending);
    assert!(trades[0].confidence > 0.7);

    // Daily stats rolled with the tick stream
    let stats = pipeline.analytics.daily_stats("EURUSD").await.unwrap();
    assert_eq!(stats.open, dec!(1.0850));
    assert_eq!(stats.close, dec!(1.0850) + Decimal::from(39) * dec!(0.0001));
    assert_eq!(stats.high, stats.close);
}

#[tokio::test]
async fn ticks_for_other_symbols_stay_isolated() {
    let pipeline = wire("EURUSD");

    for i in 0..40 {
        let mid = dec!(145.00) + Decimal::from(i) * dec!(0.01);
        pipeline.bus.publish(tick("USDJPY", mid)).await;
    }

    assert!(pipeline.orders.lock().await.is_empty());
    assert_eq!(pipeline.risk_manager.report().await.total_orders, 0);
    // Analytics still tracks the unsupervised symbol's statistics
    let stats = pipeline.analytics.daily_stats("USDJPY").await.unwrap();
    assert_eq!(stats.open, dec!(145.00));
}
