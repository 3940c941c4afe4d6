//! Statistical routines for regime detection and sizing.
//!
//! Trend strength via OLS regression against the sample index, rolling
//! z-score for mean-reversion stretch, and inverse-volatility position
//! sizing. All routines work on plain `f64` slices; callers convert from
//! `Decimal` prices at the boundary.

use quantpulse_core::MathError;

/// Standard deviations below this are treated as flat
const STD_EPSILON: f64 = 1e-10;

/// OLS slope and R-squared of a series against its sample index.
///
/// Fits `y[i] ~ alpha + beta * i` and reports `(beta, r_squared)` with
/// R-squared floored at zero. A series with zero total variance reports
/// `(0.0, 0.0)`.
pub fn slope_and_r_squared(values: &[f64]) -> Result<(f64, f64), MathError> {
    let n = values.len();
    if n < 2 {
        return Err(MathError::InsufficientSamples { needed: 2, got: n });
    }

    let x_mean = (n - 1) as f64 / 2.0;
    let y_mean = values.iter().sum::<f64>() / n as f64;

    let mut covariance = 0.0;
    let mut x_variance = 0.0;
    for (i, &y) in values.iter().enumerate() {
        let dx = i as f64 - x_mean;
        covariance += dx * (y - y_mean);
        x_variance += dx * dx;
    }
    covariance /= n as f64;
    x_variance /= n as f64;

    // Degenerate index variance cannot happen for n >= 2, but guard anyway
    if x_variance == 0.0 {
        return Ok((0.0, 0.0));
    }

    let slope = covariance / x_variance;
    let intercept = y_mean - slope * x_mean;

    let mut ss_res = 0.0;
    let mut ss_tot = 0.0;
    for (i, &y) in values.iter().enumerate() {
        let predicted = intercept + slope * i as f64;
        ss_res += (y - predicted) * (y - predicted);
        ss_tot += (y - y_mean) * (y - y_mean);
    }

    let r_squared = if ss_tot == 0.0 {
        0.0
    } else {
        (1.0 - ss_res / ss_tot).max(0.0)
    };

    Ok((slope, r_squared))
}

/// Z-score of the latest value against the trailing window.
///
/// Uses the sample standard deviation (divisor n-1) over the last `window`
/// values. A near-zero deviation reports 0.0 rather than exploding.
pub fn z_score(values: &[f64], window: usize) -> Result<f64, MathError> {
    if values.len() < window {
        return Err(MathError::WindowExceedsSamples {
            window,
            available: values.len(),
        });
    }
    if window < 2 {
        return Err(MathError::InsufficientSamples {
            needed: 2,
            got: window,
        });
    }

    let tail = &values[values.len() - window..];
    let current = tail[tail.len() - 1];

    let mean = tail.iter().sum::<f64>() / window as f64;
    let variance = tail.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>()
        / (window - 1) as f64;
    let std_dev = variance.sqrt();

    if std_dev < STD_EPSILON {
        return Ok(0.0);
    }
    Ok((current - mean) / std_dev)
}

/// Inverse-volatility position size.
///
/// `(balance * risk_fraction) / (atr * contract_size)`: constant currency
/// risk per trade regardless of volatility.
pub fn position_size(
    balance: f64,
    risk_fraction: f64,
    atr: f64,
    contract_size: f64,
) -> Result<f64, MathError> {
    if !(0.0..1.0).contains(&risk_fraction) || risk_fraction == 0.0 {
        return Err(MathError::RiskFractionOutOfRange(risk_fraction));
    }
    if atr <= 0.0 {
        return Err(MathError::NonPositive {
            field: "atr",
            value: atr,
        });
    }
    if contract_size <= 0.0 {
        return Err(MathError::NonPositive {
            field: "contract_size",
            value: contract_size,
        });
    }

    Ok(balance * risk_fraction / (atr * contract_size))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn affine_series_fits_perfectly() {
        let prices: Vec<f64> = (0..20).map(|i| 1.0850 + i as f64 * 0.0001).collect();
        let (slope, r2) = slope_and_r_squared(&prices).unwrap();
        assert!((slope - 0.0001).abs() < 1e-6);
        assert!((r2 - 1.0).abs() < 1e-6);
    }

    #[test]
    fn descending_series_has_negative_slope() {
        let prices: Vec<f64> = (0..20).map(|i| 100.0 - i as f64 * 0.5).collect();
        let (slope, r2) = slope_and_r_squared(&prices).unwrap();
        assert!((slope + 0.5).abs() < 1e-6);
        assert!((r2 - 1.0).abs() < 1e-6);
    }

    #[test]
    fn constant_series_has_no_trend() {
        let prices = [1.2; 30];
        let (slope, r2) = slope_and_r_squared(&prices).unwrap();
        assert_eq!(slope, 0.0);
        assert_eq!(r2, 0.0);
    }

    #[test]
    fn noisy_series_has_weak_fit() {
        let prices = [100.0, 100.5, 99.5, 100.4, 99.6, 100.3, 99.7, 100.2];
        let (_, r2) = slope_and_r_squared(&prices).unwrap();
        assert!(r2 < 0.5, "expected weak fit, got r2={r2}");
    }

    #[test]
    fn trend_fit_requires_two_samples() {
        let result = slope_and_r_squared(&[1.0]);
        assert!(matches!(
            result,
            Err(MathError::InsufficientSamples { needed: 2, got: 1 })
        ));
    }

    #[test]
    fn z_score_sign_follows_deviation() {
        let mut prices = vec![100.0; 10];
        prices.push(101.0);
        let up = z_score(&prices, 10).unwrap();
        assert!(up > 0.0);

        let mut prices = vec![100.0; 10];
        prices.push(99.0);
        let down = z_score(&prices, 10).unwrap();
        assert!(down < 0.0);
        assert!((up + down).abs() < 1e-9);
    }

    #[test]
    fn z_score_grows_with_deviation() {
        let mut previous = 0.0;
        for delta in [0.5, 1.0, 2.0, 4.0] {
            let mut prices = vec![100.0, 100.1, 99.9, 100.05, 99.95, 100.0];
            prices.push(100.0 + delta);
            let z = z_score(&prices, 5).unwrap();
            assert!(z > previous, "z-score must grow with deviation");
            previous = z;
        }
    }

    #[test]
    fn z_score_of_flat_window_is_zero() {
        let prices = [1.1; 25];
        assert_eq!(z_score(&prices, 20).unwrap(), 0.0);
    }

    #[test]
    fn z_score_rejects_oversized_window() {
        let prices = [1.0, 2.0, 3.0];
        assert!(matches!(
            z_score(&prices, 4),
            Err(MathError::WindowExceedsSamples {
                window: 4,
                available: 3
            })
        ));
    }

    #[test]
    fn position_size_scales_inversely_with_volatility() {
        let calm = position_size(10_000.0, 0.02, 25.0, 10.0).unwrap();
        let wild = position_size(10_000.0, 0.02, 50.0, 10.0).unwrap();
        assert!((wild - 0.4).abs() < 1e-9);
        assert!((calm - 2.0 * wild).abs() < 1e-9);
    }

    #[test]
    fn position_size_rejects_bad_inputs() {
        assert!(position_size(10_000.0, 0.0, 50.0, 10.0).is_err());
        assert!(position_size(10_000.0, 1.5, 50.0, 10.0).is_err());
        assert!(position_size(10_000.0, 0.02, 0.0, 10.0).is_err());
        assert!(position_size(10_000.0, 0.02, 50.0, -1.0).is_err());
    }
}
