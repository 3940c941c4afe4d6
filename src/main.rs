//! Quantpulse - Regime Detection and Risk-Gated Signal Pipeline
//!
//! Wires the event bus, per-symbol regime supervisors, the regime-following
//! strategy, the risk gate, and market analytics, then drives them from the
//! synthetic feed for a demo session.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::{debug, info, warn};

use quantpulse_analytics::MarketAnalytics;
use quantpulse_core::{AppConfig, BarSource, EventKind, Strategy, SystemEvent};
use quantpulse_data::{DataFeed, EventBus, SimulatedFeed, Subscription};
use quantpulse_observability::{init_logging, LogFormat};
use quantpulse_risk::RiskManager;
use quantpulse_strategies::{MtfAnalyzer, RegimeStrategy, RegimeSupervisor, SrDetector};

/// Configuration file path, overridable via QUANTPULSE_CONFIG
const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Annual risk-free rate used in the final Sharpe readout
const RISK_FREE_RATE: f64 = 0.02;

/// Main application state
struct App {
    config: AppConfig,
    bus: Arc<EventBus>,
    feed: Arc<SimulatedFeed>,
    supervisors: Vec<Arc<RegimeSupervisor>>,
    strategy: Arc<RegimeStrategy>,
    risk_manager: Arc<RiskManager>,
    analytics: Arc<MarketAnalytics>,
}

impl App {
    /// Build every component from configuration
    fn new(config: AppConfig) -> Self {
        let bus = Arc::new(EventBus::new());
        let feed = Arc::new(SimulatedFeed::new(
            config.instruments.clone(),
            config.feed.clone(),
        ));

        let supervisors = config
            .instruments
            .iter()
            .map(|symbol| {
                Arc::new(RegimeSupervisor::new(
                    symbol.clone(),
                    config.supervisor.params_for(symbol),
                ))
            })
            .collect();

        let mut strategy = RegimeStrategy::new();
        if config.mtf.enabled {
            let bar_source: Arc<dyn BarSource> = Arc::clone(&feed);
            let analyzer = Arc::new(MtfAnalyzer::new(bar_source, config.mtf.bar_count));
            strategy = strategy.with_mtf_filter(analyzer, &config.mtf);
            info!(
                entry = %config.mtf.entry_timeframe,
                filter = %config.mtf.filter_timeframe,
                "mtf alignment filter enabled"
            );
        }
        if config.sr.enabled {
            let detector = Arc::new(SrDetector::new(config.sr.pip_threshold));
            strategy = strategy.with_sr_filter(detector, &config.sr);
            info!("s/r proximity filter enabled");
        }

        let risk_manager = Arc::new(RiskManager::new(config.account.balance, &config.risk));
        let analytics = Arc::new(MarketAnalytics::new(&config.instruments, Utc::now()));

        Self {
            config,
            bus,
            feed,
            supervisors,
            strategy: Arc::new(strategy),
            risk_manager,
            analytics,
        }
    }

    /// Subscribe every component to the bus.
    ///
    /// Handlers return follow-up events instead of publishing, so the whole
    /// tick -> regime -> signal -> order chain runs through the dispatcher's
    /// queue.
    fn wire(&self) -> Vec<Subscription> {
        let mut subscriptions = Vec::new();

        subscriptions.push(self.bus.subscribe(EventKind::Tick, "tick_logger", |event| async move {
            if let SystemEvent::Tick(tick) = &event {
                debug!(symbol = %tick.symbol, mid = %tick.mid(), spread = %tick.spread(), "tick");
            }
            Ok(Vec::new())
        }));

        for supervisor in &self.supervisors {
            let name = format!("regime_supervisor:{}", supervisor.symbol());
            let supervisor = Arc::clone(supervisor);
            subscriptions.push(self.bus.subscribe(EventKind::Tick, name, move |event| {
                let supervisor = Arc::clone(&supervisor);
                async move {
                    match event {
                        SystemEvent::Tick(tick) => {
                            supervisor.on_tick(&tick).await.map_err(Into::into)
                        }
                        _ => Ok(Vec::new()),
                    }
                }
            }));
        }

        for kind in [EventKind::Tick, EventKind::Regime] {
            let strategy = Arc::clone(&self.strategy);
            subscriptions.push(self.bus.subscribe(kind, self.strategy.id(), move |event| {
                let strategy = Arc::clone(&strategy);
                async move {
                    if !strategy.accepts_event(&event) {
                        return Ok(Vec::new());
                    }
                    strategy.process_event(&event).await.map_err(Into::into)
                }
            }));
        }

        let risk_manager = Arc::clone(&self.risk_manager);
        subscriptions.push(self.bus.subscribe(
            EventKind::Signal,
            "risk_manager",
            move |event| {
                let risk_manager = Arc::clone(&risk_manager);
                async move {
                    match event {
                        SystemEvent::Signal(signal) => {
                            risk_manager.on_signal(&signal).await.map_err(Into::into)
                        }
                        _ => Ok(Vec::new()),
                    }
                }
            },
        ));

        for kind in [EventKind::Tick, EventKind::Signal, EventKind::OrderRequest] {
            let analytics = Arc::clone(&self.analytics);
            subscriptions.push(self.bus.subscribe(kind, "market_analytics", move |event| {
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
            }));
        }

        subscriptions
    }

    /// Drive the feed to completion, reporting periodically
    async fn run(&self) -> Result<()> {
        let (shutdown_tx, _) = broadcast::channel::<()>(1);

        // Periodic metrics reporter; a shutdown signal is a clean exit
        let reporter = {
            let mut shutdown_rx = shutdown_tx.subscribe();
            let risk_manager = Arc::clone(&self.risk_manager);
            let analytics = Arc::clone(&self.analytics);
            let period = Duration::from_secs(self.config.reporter.interval_secs.max(1));
            tokio::spawn(async move {
                let mut ticker = interval(period);
                ticker.tick().await;
                loop {
                    tokio::select! {
                        _ = shutdown_rx.recv() => {
                            debug!("reporter stopped");
                            break;
                        }
                        _ = ticker.tick() => {
                            report_snapshot(&risk_manager, &analytics).await;
                        }
                    }
                }
            })
        };

        let mut feed_task = {
            let feed = Arc::clone(&self.feed);
            let bus = Arc::clone(&self.bus);
            tokio::spawn(async move { feed.start(bus).await })
        };

        tokio::select! {
            result = &mut feed_task => {
                result.context("feed task panicked")?.context("feed failed")?;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
                self.feed.stop();
                feed_task.await.context("feed task panicked")?.context("feed failed")?;
            }
        }

        let _ = shutdown_tx.send(());
        if let Err(e) = reporter.await {
            if !e.is_cancelled() {
                warn!(error = %e, "reporter task failed");
            }
        }

        self.final_report().await;
        Ok(())
    }

    /// End-of-session summary: supervisor state, risk ledger, portfolio
    /// metrics over the mark-to-market-closed ledger.
    async fn final_report(&self) {
        info!("session complete");

        for supervisor in &self.supervisors {
            let snapshot = supervisor.snapshot().await;
            info!(
                symbol = %snapshot.symbol,
                regime = snapshot.regime.map(|r| r.as_str()).unwrap_or("NONE"),
                r_squared = snapshot.r_squared,
                z_score = snapshot.z_score,
                ticks = snapshot.tick_count,
                "supervisor state"
            );
        }

        let risk = self.risk_manager.report().await;
        info!(
            balance = %risk.account_balance.round_dp(2),
            daily_loss = %risk.daily_loss.round_dp(2),
            remaining = %risk.remaining_daily_risk.round_dp(2),
            open_trades = risk.open_trades,
            total_orders = risk.total_orders,
            "final risk report"
        );

        self.analytics.close_open_at_market().await;
        let initial = self.config.account.balance;
        let current = initial + self.analytics.realized_pnl().await;
        let metrics = self.analytics.portfolio_metrics(initial, current).await;
        info!(
            trades = metrics.total_trades,
            wins = metrics.winning_trades,
            losses = metrics.losing_trades,
            win_rate = metrics.win_rate(),
            profit_factor = metrics.profit_factor(),
            expectancy = %metrics.expectancy().round_dp(2),
            total_pnl = %metrics.total_pnl().round_dp(2),
            sharpe = metrics.sharpe_ratio(RISK_FREE_RATE),
            max_drawdown = metrics.max_drawdown(),
            recovery_factor = metrics.recovery_factor(),
            "portfolio metrics"
        );

        report_snapshot(&self.risk_manager, &self.analytics).await;
    }
}

/// Monitoring snapshot: risk ledger plus per-symbol daily statistics
async fn report_snapshot(risk_manager: &RiskManager, analytics: &MarketAnalytics) {
    let risk = risk_manager.report().await;
    info!(
        daily_loss = %risk.daily_loss.round_dp(2),
        remaining = %risk.remaining_daily_risk.round_dp(2),
        open_trades = risk.open_trades,
        total_orders = risk.total_orders,
        "risk ledger"
    );
    for stats in analytics.all_daily_stats().await {
        if stats.close.is_zero() {
            continue;
        }
        info!(
            symbol = %stats.symbol,
            open = %stats.open,
            high = %stats.high,
            low = %stats.low,
            close = %stats.close,
            range_pct = stats.range_pct(),
            "daily stats"
        );
    }
}

/// Load configuration, falling back to defaults when the file is absent
fn load_config() -> Result<(AppConfig, bool)> {
    let path =
        std::env::var("QUANTPULSE_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    if std::path::Path::new(&path).exists() {
        let config = AppConfig::load(&path)
            .with_context(|| format!("failed to load config from {path}"))?;
        Ok((config, true))
    } else {
        Ok((AppConfig::default(), false))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let (config, from_file) = load_config()?;

    let level = config
        .logging
        .level
        .parse()
        .unwrap_or(tracing::Level::INFO);
    init_logging(LogFormat::from_config(&config.logging.format), level);

    if !from_file {
        info!("config file not found, using defaults");
    }
    info!(
        instruments = ?config.instruments,
        balance = %config.account.balance,
        max_risk_per_trade = %config.risk.max_risk_per_trade,
        "starting quantpulse"
    );

    let app = App::new(config);
    let _subscriptions = app.wire();
    info!(
        tick_handlers = app.bus.subscriber_count(EventKind::Tick),
        signal_handlers = app.bus.subscriber_count(EventKind::Signal),
        "event bus wired"
    );

    app.run().await
}
