//! Risk validation and order approval gate.
//!
//! Sizes each signal's risk exposure, enforces the per-trade and cumulative
//! daily ceilings, and turns approved signals into order requests. Ceiling
//! rejections are policy drops, not errors: they log a warning and emit
//! nothing.

use std::collections::HashMap;

use chrono::Utc;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use quantpulse_core::{OrderRequestEvent, RiskConfig, RiskError, SignalEvent, SystemEvent};

/// Unit risk per position, as a fraction of the reference price
const UNIT_RISK_FRACTION: Decimal = dec!(0.01);

/// Monitoring snapshot of the risk ledger
#[derive(Debug, Clone, Serialize)]
pub struct RiskReport {
    pub account_balance: Decimal,
    pub max_risk_per_trade: Decimal,
    pub max_daily_risk: Decimal,
    pub daily_loss: Decimal,
    /// Remaining daily headroom, clamped at zero
    pub remaining_daily_risk: Decimal,
    pub open_trades: usize,
    pub total_orders: u64,
}

struct RiskLedger {
    daily_loss: Decimal,
    open_orders: HashMap<String, OrderRequestEvent>,
    order_count: u64,
}

/// Signal gate enforcing per-trade and daily risk ceilings
pub struct RiskManager {
    account_balance: Decimal,
    max_risk_per_trade: Decimal,
    max_daily_risk: Decimal,
    ledger: Mutex<RiskLedger>,
}

impl RiskManager {
    /// Create a risk manager.
    ///
    /// An unset daily ceiling defaults to twice the per-trade ceiling.
    pub fn new(account_balance: Decimal, config: &RiskConfig) -> Self {
        let max_daily_risk = config
            .max_daily_risk
            .unwrap_or(config.max_risk_per_trade * dec!(2));
        Self {
            account_balance,
            max_risk_per_trade: config.max_risk_per_trade,
            max_daily_risk,
            ledger: Mutex::new(RiskLedger {
                daily_loss: Decimal::ZERO,
                open_orders: HashMap::new(),
                order_count: 0,
            }),
        }
    }

    /// Validate a signal; an approved signal becomes an order request.
    pub async fn on_signal(&self, signal: &SignalEvent) -> Result<Vec<SystemEvent>, RiskError> {
        if !signal.direction().is_actionable() {
            debug!(symbol = %signal.symbol(), "ignoring neutral signal");
            return Ok(Vec::new());
        }

        let risk_amount = self.estimate_risk(signal)?;

        // Confidence is capped at 1, so this cannot trip with the current
        // sizing formula; kept as the backstop for any future resizing.
        if risk_amount > self.max_risk_per_trade {
            warn!(
                symbol = %signal.symbol(),
                direction = %signal.direction(),
                risk = %risk_amount.round_dp(2),
                ceiling = %self.max_risk_per_trade.round_dp(2),
                "signal rejected: per-trade risk ceiling exceeded"
            );
            return Ok(Vec::new());
        }

        let mut ledger = self.ledger.lock().await;
        let projected = ledger.daily_loss + risk_amount;
        if projected > self.max_daily_risk {
            warn!(
                symbol = %signal.symbol(),
                direction = %signal.direction(),
                projected = %projected.round_dp(2),
                ceiling = %self.max_daily_risk.round_dp(2),
                "signal rejected: daily risk ceiling exceeded"
            );
            return Ok(Vec::new());
        }

        let signal_id = fingerprint(signal);
        let price = signal.price();
        if price <= Decimal::ZERO {
            return Err(RiskError::ValidationError(format!(
                "non-positive reference price {price} for {}",
                signal.symbol()
            )));
        }
        let quantity = risk_amount / (price * UNIT_RISK_FRACTION);

        let order = OrderRequestEvent {
            symbol: signal.symbol().to_string(),
            timestamp: Utc::now(),
            direction: signal.direction(),
            quantity,
            price,
            risk_amount,
            signal_id: signal_id.clone(),
        };

        ledger.daily_loss += risk_amount;
        ledger.order_count += 1;
        ledger.open_orders.insert(signal_id, order.clone());

        info!(
            symbol = %order.symbol,
            direction = %order.direction,
            quantity = %order.quantity.round_dp(4),
            price = %order.price,
            risk = %order.risk_amount.round_dp(2),
            signal_id = %order.signal_id,
            "order approved"
        );

        Ok(vec![SystemEvent::OrderRequest(order)])
    }

    /// Risk exposure of a signal: the per-trade ceiling scaled by
    /// confidence.
    fn estimate_risk(&self, signal: &SignalEvent) -> Result<Decimal, RiskError> {
        let confidence = Decimal::from_f64(signal.confidence()).ok_or_else(|| {
            RiskError::ValidationError(format!(
                "unrepresentable confidence {}",
                signal.confidence()
            ))
        })?;
        Ok(self.max_risk_per_trade * confidence)
    }

    /// Snapshot of the ledger for monitoring
    pub async fn report(&self) -> RiskReport {
        let ledger = self.ledger.lock().await;
        RiskReport {
            account_balance: self.account_balance,
            max_risk_per_trade: self.max_risk_per_trade,
            max_daily_risk: self.max_daily_risk,
            daily_loss: ledger.daily_loss,
            remaining_daily_risk: (self.max_daily_risk - ledger.daily_loss).max(Decimal::ZERO),
            open_trades: ledger.open_orders.len(),
            total_orders: ledger.order_count,
        }
    }
}

/// Content-derived signal identity: a short stable hash over the fields
/// that make a signal distinct. Doubles as the order's dedup key.
fn fingerprint(signal: &SignalEvent) -> String {
    let data = format!(
        "{}_{}_{}_{}",
        signal.symbol(),
        signal.direction(),
        signal.timestamp().to_rfc3339(),
        signal.confidence()
    );
    let digest = Sha256::new().chain_update(data.as_bytes()).finalize();
    let hex = format!("{digest:x}");
    hex[..16].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    use quantpulse_core::{Direction, RegimeType};

    fn signal(confidence: f64) -> SignalEvent {
        SignalEvent::new(
            "EURUSD",
            Utc::now(),
            Direction::Buy,
            confidence,
            RegimeType::Trending,
            dec!(1.0850),
        )
        .unwrap()
    }

    fn manager(per_trade: Decimal, daily: Option<Decimal>) -> RiskManager {
        RiskManager::new(
            dec!(100_000),
            &RiskConfig {
                max_risk_per_trade: per_trade,
                max_daily_risk: daily,
            },
        )
    }

    #[tokio::test]
    async fn approves_signal_within_ceilings() {
        let manager = manager(dec!(100), None);

        let events = manager.on_signal(&signal(0.9)).await.unwrap();
        assert_eq!(events.len(), 1);
        let order = match &events[0] {
            SystemEvent::OrderRequest(order) => order,
            other => panic!("expected order, got {other:?}"),
        };

        assert_eq!(order.risk_amount, dec!(90));
        assert_eq!(order.direction, Direction::Buy);
        // quantity = risk / (price * 0.01)
        assert_eq!(order.quantity, dec!(90) / (dec!(1.0850) * dec!(0.01)));
        assert_eq!(order.signal_id.len(), 16);

        let report = manager.report().await;
        assert_eq!(report.daily_loss, dec!(90));
        assert_eq!(report.open_trades, 1);
        assert_eq!(report.total_orders, 1);
    }

    #[tokio::test]
    async fn neutral_signals_are_ignored() {
        let manager = manager(dec!(100), None);
        let neutral = SignalEvent::new(
            "EURUSD",
            Utc::now(),
            Direction::Neutral,
            0.9,
            RegimeType::Ranging,
            dec!(1.0850),
        )
        .unwrap();

        let events = manager.on_signal(&neutral).await.unwrap();
        assert!(events.is_empty());
        assert_eq!(manager.report().await.total_orders, 0);
    }

    #[tokio::test]
    async fn daily_ceiling_rejects_once_exhausted() {
        // daily ceiling defaults to 2x per-trade = 200
        let manager = manager(dec!(100), None);

        assert_eq!(manager.on_signal(&signal(0.9)).await.unwrap().len(), 1);
        assert_eq!(manager.on_signal(&signal(0.9)).await.unwrap().len(), 1);

        // 90 + 90 + 90 = 270 > 200: rejected, nothing emitted
        let events = manager.on_signal(&signal(0.9)).await.unwrap();
        assert!(events.is_empty());

        let report = manager.report().await;
        assert_eq!(report.daily_loss, dec!(180));
        assert_eq!(report.remaining_daily_risk, dec!(20));
        assert_eq!(report.total_orders, 2);
    }

    #[tokio::test]
    async fn small_enough_signal_still_fits_the_tail() {
        let manager = manager(dec!(100), Some(dec!(200)));

        manager.on_signal(&signal(0.9)).await.unwrap();
        manager.on_signal(&signal(0.9)).await.unwrap();

        // 20 of headroom left; a 0.2-confidence signal risks exactly 20
        let events = manager.on_signal(&signal(0.2)).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(manager.report().await.remaining_daily_risk, dec!(0));
    }

    #[tokio::test]
    async fn full_confidence_signal_is_approved_at_the_ceiling() {
        let manager = manager(dec!(500), Some(dec!(2_000)));

        let events = manager.on_signal(&signal(1.0)).await.unwrap();
        assert_eq!(events.len(), 1);
        match &events[0] {
            SystemEvent::OrderRequest(order) => assert_eq!(order.risk_amount, dec!(500)),
            other => panic!("expected order, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn report_reflects_configuration() {
        let manager = manager(dec!(250), None);
        let report = manager.report().await;

        assert_eq!(report.account_balance, dec!(100_000));
        assert_eq!(report.max_risk_per_trade, dec!(250));
        assert_eq!(report.max_daily_risk, dec!(500));
        assert_eq!(report.remaining_daily_risk, dec!(500));
    }

    #[test]
    fn fingerprint_is_stable_and_content_derived() {
        let timestamp = Utc.with_ymd_and_hms(2024, 5, 14, 9, 30, 0).unwrap();
        let a = SignalEvent::new(
            "EURUSD",
            timestamp,
            Direction::Buy,
            0.75,
            RegimeType::Trending,
            dec!(1.0850),
        )
        .unwrap();
        let b = a.clone();
        assert_eq!(fingerprint(&a), fingerprint(&b));

        let different = SignalEvent::new(
            "EURUSD",
            timestamp,
            Direction::Sell,
            0.75,
            RegimeType::Trending,
            dec!(1.0850),
        )
        .unwrap();
        assert_ne!(fingerprint(&a), fingerprint(&different));
    }
}
