//! Support and resistance level detection.
//!
//! Finds local extrema in a close-price series, clusters nearby levels,
//! and scores each by touch count and recency. Levels are used to filter
//! mean-reversion entries: fade a move only into a level that has held
//! before.

use std::collections::HashMap;

use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Side of price a level sits on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LevelType {
    Support,
    Resistance,
}

impl LevelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LevelType::Support => "SUPPORT",
            LevelType::Resistance => "RESISTANCE",
        }
    }
}

impl std::fmt::Display for LevelType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A scored support/resistance price level
#[derive(Debug, Clone, Serialize)]
pub struct SrLevel {
    pub price: f64,
    pub level_type: LevelType,
    /// How many closes sat within the pip threshold of this level
    pub touches: usize,
    /// Position of the most recent touch within the series, 0..1
    pub last_touch: f64,
    /// Combined touch/recency score, 0..1
    pub strength: f64,
}

/// Detected levels for one symbol
#[derive(Debug, Clone, Default)]
pub struct SrLevels {
    pub support: Vec<SrLevel>,
    pub resistance: Vec<SrLevel>,
}

/// Local-extrema support/resistance detector
pub struct SrDetector {
    /// Minimum distance between distinct levels
    pip_threshold: f64,
    levels: RwLock<HashMap<String, Vec<SrLevel>>>,
}

impl SrDetector {
    pub fn new(pip_threshold: f64) -> Self {
        Self {
            pip_threshold,
            levels: RwLock::new(HashMap::new()),
        }
    }

    /// Detect levels from close prices (oldest to newest) and cache them
    /// for the symbol.
    ///
    /// `window` is the one-sided dominance span for an extremum;
    /// `min_strength` drops weakly confirmed levels.
    pub async fn detect_levels(
        &self,
        symbol: &str,
        closes: &[f64],
        window: usize,
        min_strength: f64,
    ) -> SrLevels {
        if closes.len() < window * 2 {
            warn!(symbol = %symbol, samples = closes.len(), "not enough data for s/r detection");
            return SrLevels::default();
        }

        let maxima = local_extrema(closes, window, |a, b| a > b);
        let minima = local_extrema(closes, window, |a, b| a < b);

        let resistance_prices = self.cluster(&maxima);
        let support_prices = self.cluster(&minima);

        let resistance =
            self.score(symbol, &resistance_prices, LevelType::Resistance, closes, min_strength);
        let support =
            self.score(symbol, &support_prices, LevelType::Support, closes, min_strength);

        let mut cached = support.clone();
        cached.extend(resistance.iter().cloned());
        self.levels.write().await.insert(symbol.to_string(), cached);

        SrLevels {
            support,
            resistance,
        }
    }

    /// Merge prices closer than the pip threshold into their cluster mean
    fn cluster(&self, prices: &[f64]) -> Vec<f64> {
        if prices.is_empty() {
            return Vec::new();
        }

        let mut sorted = prices.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));

        let mut clusters = Vec::new();
        let mut current = vec![sorted[0]];
        for &price in &sorted[1..] {
            let last = current[current.len() - 1];
            if (price - last).abs() <= self.pip_threshold {
                current.push(price);
            } else {
                clusters.push(mean(&current));
                current = vec![price];
            }
        }
        clusters.push(mean(&current));
        clusters
    }

    /// Score levels: 0.7 weight on touch count, 0.3 on recency
    fn score(
        &self,
        symbol: &str,
        prices: &[f64],
        level_type: LevelType,
        closes: &[f64],
        min_strength: f64,
    ) -> Vec<SrLevel> {
        let touch_counts: Vec<usize> = prices
            .iter()
            .map(|&price| {
                closes
                    .iter()
                    .filter(|&&close| (close - price).abs() < self.pip_threshold)
                    .count()
            })
            .collect();

        let max_touches = touch_counts.iter().copied().max().unwrap_or(0);
        if max_touches == 0 {
            return Vec::new();
        }

        let mut levels = Vec::new();
        for (&price, &touches) in prices.iter().zip(&touch_counts) {
            let last_touch = closes
                .iter()
                .rposition(|&close| (close - price).abs() < self.pip_threshold)
                .map(|i| i as f64 / closes.len() as f64)
                .unwrap_or(0.0);

            let strength = 0.7 * touches as f64 / max_touches as f64 + 0.3 * last_touch;
            if strength >= min_strength {
                levels.push(SrLevel {
                    price,
                    level_type,
                    touches,
                    last_touch,
                    strength,
                });
            }
        }

        levels.sort_by(|a, b| b.strength.total_cmp(&a.strength));
        debug!(
            symbol = %symbol,
            level_type = %level_type,
            count = levels.len(),
            "scored s/r levels"
        );
        levels
    }

    /// Check if a price sits within `distance` of a cached level
    pub async fn is_near_level(
        &self,
        symbol: &str,
        price: f64,
        level_type: LevelType,
        distance: f64,
    ) -> bool {
        let levels = self.levels.read().await;
        let Some(cached) = levels.get(symbol) else {
            return false;
        };
        cached
            .iter()
            .filter(|level| level.level_type == level_type)
            .any(|level| (price - level.price).abs() <= distance)
    }

    /// Nearest cached level of the given type, if any
    pub async fn nearest_level(
        &self,
        symbol: &str,
        price: f64,
        level_type: LevelType,
    ) -> Option<SrLevel> {
        let levels = self.levels.read().await;
        levels
            .get(symbol)?
            .iter()
            .filter(|level| level.level_type == level_type)
            .min_by(|a, b| {
                (price - a.price).abs().total_cmp(&(price - b.price).abs())
            })
            .cloned()
    }
}

/// Indices where a value dominates its neighbors within `window` on both
/// sides, mapped to the values themselves.
fn local_extrema(values: &[f64], window: usize, dominates: fn(f64, f64) -> bool) -> Vec<f64> {
    let mut extrema = Vec::new();
    for i in window..values.len().saturating_sub(window) {
        let candidate = values[i];
        let left = &values[i - window..i];
        let right = &values[i + 1..=i + window];
        let dominated = left
            .iter()
            .chain(right.iter())
            .all(|&neighbor| dominates(candidate, neighbor));
        if dominated {
            extrema.push(candidate);
        }
    }
    extrema
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}
