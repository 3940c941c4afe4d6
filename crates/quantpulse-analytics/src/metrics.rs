//! Aggregate portfolio performance statistics.
//!
//! Derived on demand from the trade ledger and an externally supplied
//! balance pair; nothing here is persisted. Monetary aggregates stay in
//! `Decimal`, ratios and risk statistics are `f64`.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;

/// Trading days used to annualize the Sharpe ratio
const TRADING_DAYS: f64 = 252.0;

/// Portfolio performance snapshot
#[derive(Debug, Clone, Serialize)]
pub struct PortfolioMetrics {
    pub initial_balance: Decimal,
    pub current_balance: Decimal,
    /// Every ledger entry, open trades included
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub largest_win: Decimal,
    pub largest_loss: Decimal,
    pub gross_profit: Decimal,
    /// Sum of losing PnL, never positive
    pub gross_loss: Decimal,
    /// Percentage return per closed trade, in ledger order
    pub returns: Vec<f64>,
    /// Balance after each closed trade, starting at the initial balance
    pub equity_curve: Vec<Decimal>,
}

impl PortfolioMetrics {
    /// Total profit/loss
    pub fn total_pnl(&self) -> Decimal {
        self.current_balance - self.initial_balance
    }

    /// Total return as a percentage of the initial balance
    pub fn total_return_pct(&self) -> f64 {
        if self.initial_balance.is_zero() {
            return 0.0;
        }
        (self.total_pnl() / self.initial_balance)
            .to_f64()
            .unwrap_or(0.0)
            * 100.0
    }

    /// Win rate as a percentage
    pub fn win_rate(&self) -> f64 {
        if self.total_trades == 0 {
            return 0.0;
        }
        self.winning_trades as f64 / self.total_trades as f64 * 100.0
    }

    /// Gross profit over gross loss; infinite when there is profit and no
    /// loss
    pub fn profit_factor(&self) -> f64 {
        if self.gross_loss.is_zero() {
            if self.gross_profit.is_zero() {
                return 0.0;
            }
            return f64::INFINITY;
        }
        (self.gross_profit / self.gross_loss.abs())
            .to_f64()
            .unwrap_or(0.0)
    }

    /// Average winning trade
    pub fn avg_win(&self) -> Decimal {
        if self.winning_trades == 0 {
            return Decimal::ZERO;
        }
        self.gross_profit / Decimal::from(self.winning_trades)
    }

    /// Average losing trade, never positive
    pub fn avg_loss(&self) -> Decimal {
        if self.losing_trades == 0 {
            return Decimal::ZERO;
        }
        self.gross_loss / Decimal::from(self.losing_trades)
    }

    /// Expected value per trade
    pub fn expectancy(&self) -> Decimal {
        if self.total_trades == 0 {
            return Decimal::ZERO;
        }
        (self.gross_profit + self.gross_loss) / Decimal::from(self.total_trades)
    }

    /// Annualized Sharpe ratio over the per-trade return sample.
    ///
    /// Each closed-trade return is treated as one daily observation, an
    /// approximation that conflates trade frequency with time.
    pub fn sharpe_ratio(&self, risk_free_rate: f64) -> f64 {
        if self.returns.len() < 2 {
            return 0.0;
        }

        let n = self.returns.len() as f64;
        let mean = self.returns.iter().sum::<f64>() / n;
        let variance = self
            .returns
            .iter()
            .map(|r| (r - mean) * (r - mean))
            .sum::<f64>()
            / n;
        let std_dev = variance.sqrt();
        if std_dev == 0.0 {
            return 0.0;
        }

        let daily_excess = mean - risk_free_rate / TRADING_DAYS;
        daily_excess / std_dev * TRADING_DAYS.sqrt()
    }

    /// Maximum drawdown from peak equity as a percentage, always <= 0
    pub fn max_drawdown(&self) -> f64 {
        if self.equity_curve.len() < 2 {
            return 0.0;
        }

        let mut peak = f64::MIN;
        let mut worst = 0.0_f64;
        for point in &self.equity_curve {
            let equity = point.to_f64().unwrap_or(0.0);
            peak = peak.max(equity);
            if peak > 0.0 {
                worst = worst.min((equity - peak) / peak);
            }
        }
        worst * 100.0
    }

    /// Total return per unit of drawdown; zero when there was no drawdown
    pub fn recovery_factor(&self) -> f64 {
        let max_dd = self.max_drawdown();
        if max_dd >= 0.0 {
            return 0.0;
        }
        self.total_return_pct() / max_dd.abs()
    }
}
