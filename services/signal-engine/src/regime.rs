//! Market regime classification
//!
//! Trend compares the mean price of the most recent window with the window
//! before it. The volatility regime looks at the mean and the dispersion of
//! the latest combined volatility across every tracked asset.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::stats;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrendRegime {
    Bull,
    Bear,
    Sideways,
}

impl TrendRegime {
    /// +1 bull, -1 bear, 0 sideways
    pub fn sign(&self) -> f64 {
        match self {
            TrendRegime::Bull => 1.0,
            TrendRegime::Bear => -1.0,
            TrendRegime::Sideways => 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VolatilityRegime {
    Low,
    Normal,
    High,
    Divergent,
}

impl VolatilityRegime {
    /// EWMA share of the combined volatility estimate
    pub fn ewma_weight(&self) -> f64 {
        match self {
            VolatilityRegime::High => 0.7,
            VolatilityRegime::Divergent => 0.6,
            VolatilityRegime::Normal => 0.5,
            VolatilityRegime::Low => 0.3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MarketRegime {
    pub trend: TrendRegime,
    pub volatility_regime: VolatilityRegime,
    pub mean_volatility: f64,
    pub dispersion: f64,
    pub timestamp: DateTime<Utc>,
}

impl MarketRegime {
    /// Regime assumed before the first detection
    pub fn neutral(timestamp: DateTime<Utc>) -> Self {
        Self {
            trend: TrendRegime::Sideways,
            volatility_regime: VolatilityRegime::Normal,
            mean_volatility: 0.0,
            dispersion: 0.0,
            timestamp,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RegimeDetector {
    trend_window: usize,
    trend_threshold: f64,
}

impl Default for RegimeDetector {
    fn default() -> Self {
        Self {
            trend_window: 50,
            trend_threshold: 0.10,
        }
    }
}

impl RegimeDetector {
    pub fn new(trend_window: usize, trend_threshold: f64) -> Self {
        Self {
            trend_window,
            trend_threshold,
        }
    }

    /// Relative change of the recent window mean over the prior window mean.
    /// The window shrinks to n/2 on short histories; None below 4 points.
    pub fn relative_change(&self, prices: &[f64]) -> Option<f64> {
        if prices.len() < 4 {
            return None;
        }
        let window = self.trend_window.min(prices.len() / 2);
        let n = prices.len();
        let recent = stats::mean(&prices[n - window..])?;
        let prior = stats::mean(&prices[n - 2 * window..n - window])?;
        if prior <= 0.0 {
            return None;
        }
        Some(recent / prior - 1.0)
    }

    pub fn classify_change(&self, change: f64) -> TrendRegime {
        if change > self.trend_threshold {
            TrendRegime::Bull
        } else if change < -self.trend_threshold {
            TrendRegime::Bear
        } else {
            TrendRegime::Sideways
        }
    }

    pub fn classify_trend(&self, prices: &[f64]) -> TrendRegime {
        self.relative_change(prices)
            .map(|c| self.classify_change(c))
            .unwrap_or(TrendRegime::Sideways)
    }

    /// (regime, mean, population dispersion) of per-asset volatilities
    pub fn classify_volatility(&self, volatilities: &[f64]) -> (VolatilityRegime, f64, f64) {
        let mean = match stats::mean(volatilities) {
            Some(m) => m,
            None => return (VolatilityRegime::Normal, 0.0, 0.0),
        };
        let dispersion = stats::population_std_dev(volatilities).unwrap_or(0.0);

        let regime = if mean > 1.0 && dispersion > 0.3 {
            VolatilityRegime::High
        } else if mean < 0.3 && dispersion < 0.1 {
            VolatilityRegime::Low
        } else if dispersion > 0.5 {
            VolatilityRegime::Divergent
        } else {
            VolatilityRegime::Normal
        };

        (regime, mean, dispersion)
    }

    /// Market-wide regime from every asset's price history and latest volatility
    pub fn detect<'a>(
        &self,
        price_histories: impl IntoIterator<Item = &'a [f64]>,
        latest_volatilities: &[f64],
        timestamp: DateTime<Utc>,
    ) -> MarketRegime {
        let changes: Vec<f64> = price_histories
            .into_iter()
            .filter_map(|prices| self.relative_change(prices))
            .collect();
        let trend = stats::mean(&changes)
            .map(|c| self.classify_change(c))
            .unwrap_or(TrendRegime::Sideways);

        let (volatility_regime, mean_volatility, dispersion) =
            self.classify_volatility(latest_volatilities);

        MarketRegime {
            trend,
            volatility_regime,
            mean_volatility,
            dispersion,
            timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rising_series_is_bull() {
        let prices: Vec<f64> = (0..60).map(|i| 100.0 + 60.0 * i as f64 / 59.0).collect();
        let detector = RegimeDetector::default();
        assert_eq!(detector.classify_trend(&prices), TrendRegime::Bull);

        let falling: Vec<f64> = prices.iter().rev().copied().collect();
        assert_eq!(detector.classify_trend(&falling), TrendRegime::Bear);
    }

    #[test]
    fn test_short_or_flat_is_sideways() {
        let detector = RegimeDetector::default();
        assert_eq!(detector.classify_trend(&[1.0, 2.0, 3.0]), TrendRegime::Sideways);
        assert_eq!(detector.classify_trend(&[100.0; 120]), TrendRegime::Sideways);
    }

    #[test]
    fn test_volatility_regime_order() {
        let d = RegimeDetector::default();
        assert_eq!(d.classify_volatility(&[0.6, 2.0]).0, VolatilityRegime::High);
        assert_eq!(d.classify_volatility(&[0.1, 0.2]).0, VolatilityRegime::Low);
        assert_eq!(d.classify_volatility(&[0.1, 1.5]).0, VolatilityRegime::Divergent);
        assert_eq!(d.classify_volatility(&[0.5, 0.6]).0, VolatilityRegime::Normal);
        assert_eq!(d.classify_volatility(&[]).0, VolatilityRegime::Normal);
    }

    #[test]
    fn test_market_trend_uses_mean_change() {
        let d = RegimeDetector::default();
        let up: Vec<f64> = (0..100).map(|i| 100.0 + i as f64).collect();
        let flat = vec![100.0; 100];
        let regime = d.detect([up.as_slice(), flat.as_slice()], &[0.5, 0.5], Utc::now());
        // up: ~+40%, flat: 0 -> mean ~+20%
        assert_eq!(regime.trend, TrendRegime::Bull);
        assert_eq!(regime.volatility_regime, VolatilityRegime::Normal);
        assert_eq!(regime.dispersion, 0.0);
    }
}
