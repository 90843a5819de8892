//! Rolling and forecast volatility
//!
//! All figures are annualized. The GARCH(1,1) parameters are static
//! configuration values, not fitted to the data.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

use crate::config::VolatilityConfig;
use crate::indicators::IndicatorSet;
use crate::regime::{MarketRegime, VolatilityRegime};
use crate::stats;

/// EWMA variance: varₜ = λ·varₜ₋₁ + (1−λ)·rₜ², seeded with the first squared return
pub fn ewma_variance(returns: &[f64], lambda: f64) -> Option<f64> {
    let (first, rest) = returns.split_first()?;
    let seed = first * first;
    Some(
        rest.iter()
            .fold(seed, |var, r| lambda * var + (1.0 - lambda) * r * r),
    )
}

/// Annualized sample stdev of the last `window` returns (fewer if that is all there is)
pub fn standard_volatility(returns: &[f64], window: usize) -> Option<f64> {
    let start = returns.len().saturating_sub(window);
    stats::sample_std_dev(&returns[start..]).map(stats::annualize)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GarchParams {
    pub omega: f64,
    pub alpha: f64,
    pub beta: f64,
}

impl GarchParams {
    pub fn from_config(config: &VolatilityConfig) -> Self {
        Self {
            omega: config.garch_omega,
            alpha: config.garch_alpha,
            beta: config.garch_beta,
        }
    }

    pub fn persistence(&self) -> f64 {
        self.alpha + self.beta
    }

    /// V_L = ω / (1 − α − β)
    pub fn long_run_variance(&self) -> f64 {
        self.omega / (1.0 - self.persistence())
    }

    /// Filter conditional variance over `returns`, seeded with their sample
    /// variance. Returns the one-step-ahead variance σ²ₜ₊₁ (per period).
    pub fn filter(&self, returns: &[f64]) -> Option<f64> {
        let seed = stats::sample_variance(returns)?;
        Some(returns.iter().fold(seed, |var, r| {
            self.omega + self.alpha * r * r + self.beta * var
        }))
    }

    /// σ²ₜ₊ₕ = V_L + (α+β)^(h−1)(σ²ₜ₊₁ − V_L)
    pub fn project(&self, next_variance: f64, horizon: u32) -> f64 {
        let long_run = self.long_run_variance();
        let steps = horizon.saturating_sub(1) as i32;
        long_run + self.persistence().powi(steps) * (next_variance - long_run)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VolatilityEstimate {
    pub standard: f64,
    pub ewma: f64,
    pub combined: f64,
    pub regime: VolatilityRegime,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VolatilityTrend {
    Rising,
    Falling,
    Stable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForecastComponentKind {
    Garch,
    Technical,
    Regime,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForecastComponent {
    pub kind: ForecastComponentKind,
    pub value: f64,
    pub confidence: f64,
    pub weight: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolatilityForecast {
    pub horizon: u32,
    pub value: f64,
    pub confidence: f64,
    /// True when history was too short and the configured base volatility was used
    pub fallback: bool,
    pub components: Vec<ForecastComponent>,
}

impl VolatilityForecast {
    pub fn fallback(base_volatility: f64, horizon: u32) -> Self {
        Self {
            horizon,
            value: base_volatility,
            confidence: 0.2,
            fallback: true,
            components: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct AssetVolatility {
    estimates: VecDeque<VolatilityEstimate>,
    /// One-step-ahead GARCH conditional variance after the last update
    garch_next_variance: Option<f64>,
    return_count: usize,
    historical_max: f64,
    /// Tick time behind the newest estimate
    last_observed: Option<DateTime<Utc>>,
}

/// Per-asset volatility state
#[derive(Debug, Clone)]
pub struct VolatilityModel {
    config: VolatilityConfig,
    garch: GarchParams,
    assets: HashMap<String, AssetVolatility>,
}

impl VolatilityModel {
    pub fn new<'a>(config: VolatilityConfig, symbols: impl IntoIterator<Item = &'a str>) -> Self {
        let assets = symbols
            .into_iter()
            .map(|s| (s.to_uppercase(), AssetVolatility::default()))
            .collect();
        Self {
            garch: GarchParams::from_config(&config),
            config,
            assets,
        }
    }

    /// Recompute the asset's estimate from its log returns. Needs at least 2 returns.
    ///
    /// `observed_at` is the time of the latest tick behind `log_returns`. When it
    /// has not moved since the previous update the newest estimate is replaced
    /// instead of appended, so idle cycles do not flatten the trend history.
    pub fn update(
        &mut self,
        asset: &str,
        log_returns: &[f64],
        regime: VolatilityRegime,
        observed_at: DateTime<Utc>,
    ) -> Option<VolatilityEstimate> {
        let standard = standard_volatility(log_returns, self.config.window)?;
        let ewma = ewma_variance(log_returns, self.config.ewma_lambda)
            .map(|v| stats::annualize(v.sqrt()))?;
        let w = regime.ewma_weight();
        let combined = w * ewma + (1.0 - w) * standard;

        let estimate = VolatilityEstimate {
            standard,
            ewma,
            combined,
            regime,
            timestamp: observed_at,
        };

        let garch_next_variance = self.garch.filter(log_returns);
        let history_len = self.config.history_len;
        let state = self.assets.entry(asset.to_uppercase()).or_default();
        if state.last_observed == Some(observed_at) {
            state.estimates.pop_back();
        }
        state.estimates.push_back(estimate);
        state.last_observed = Some(observed_at);
        while state.estimates.len() > history_len {
            state.estimates.pop_front();
        }
        state.garch_next_variance = garch_next_variance;
        state.return_count = log_returns.len();
        state.historical_max = state
            .historical_max
            .max(combined)
            .max(standard)
            .max(ewma);

        Some(estimate)
    }

    pub fn latest(&self, asset: &str) -> Option<&VolatilityEstimate> {
        self.assets.get(&asset.to_uppercase())?.estimates.back()
    }

    pub fn history(&self, asset: &str) -> Vec<VolatilityEstimate> {
        self.assets
            .get(&asset.to_uppercase())
            .map(|s| s.estimates.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn historical_max(&self, asset: &str) -> f64 {
        self.assets
            .get(&asset.to_uppercase())
            .map(|s| s.historical_max)
            .unwrap_or(0.0)
    }

    /// Latest combined estimate vs the mean of the preceding ones
    pub fn volatility_trend(&self, asset: &str) -> Option<VolatilityTrend> {
        let combined: Vec<f64> = self
            .assets
            .get(&asset.to_uppercase())?
            .estimates
            .iter()
            .map(|e| e.combined)
            .collect();
        let (latest, previous) = combined.split_last()?;
        let baseline = stats::mean(previous)?;
        if baseline <= 0.0 {
            return Some(VolatilityTrend::Stable);
        }
        let change = *latest / baseline - 1.0;
        Some(if change > 0.10 {
            VolatilityTrend::Rising
        } else if change < -0.10 {
            VolatilityTrend::Falling
        } else {
            VolatilityTrend::Stable
        })
    }

    /// Annualized GARCH volatility projected `horizon` periods ahead
    pub fn garch_forecast(&self, asset: &str, horizon: u32) -> Option<f64> {
        let next = self.assets.get(&asset.to_uppercase())?.garch_next_variance?;
        let variance = self.garch.project(next, horizon.max(1));
        Some(stats::annualize(variance.max(0.0).sqrt()))
    }

    /// Blend GARCH, indicator-adjusted and regime-adjusted volatility for `horizon`.
    /// Falls back to `base_volatility` when the asset has no estimate yet.
    pub fn predict_volatility(
        &self,
        asset: &str,
        horizon: u32,
        indicators: &IndicatorSet,
        price: Option<f64>,
        regime: &MarketRegime,
        base_volatility: f64,
    ) -> VolatilityForecast {
        let key = asset.to_uppercase();
        let (state, current) = match self
            .assets
            .get(&key)
            .and_then(|s| s.estimates.back().map(|e| (s, e.combined)))
        {
            Some(found) => found,
            None => return VolatilityForecast::fallback(base_volatility, horizon),
        };

        let (w_garch, w_technical, w_regime) = match regime.volatility_regime {
            VolatilityRegime::High => (0.5, 0.3, 0.2),
            VolatilityRegime::Low => (0.3, 0.4, 0.3),
            _ => (0.4, 0.35, 0.25),
        };

        let mut components = Vec::with_capacity(3);
        if let Some(value) = self.garch_forecast(&key, horizon) {
            components.push(ForecastComponent {
                kind: ForecastComponentKind::Garch,
                value,
                confidence: if state.return_count >= 50 { 0.7 } else { 0.4 },
                weight: w_garch,
            });
        }
        components.push(ForecastComponent {
            kind: ForecastComponentKind::Technical,
            value: current * technical_multiplier(indicators, price, current),
            confidence: if indicators.is_complete() { 0.6 } else { 0.3 },
            weight: w_technical,
        });
        components.push(ForecastComponent {
            kind: ForecastComponentKind::Regime,
            value: current * regime_multiplier(regime.volatility_regime),
            confidence: 0.5,
            weight: w_regime,
        });

        let denom: f64 = components.iter().map(|c| c.weight * c.confidence).sum();
        let mut value = if denom > 0.0 {
            components
                .iter()
                .map(|c| c.weight * c.confidence * c.value)
                .sum::<f64>()
                / denom
        } else {
            current
        };

        let ceiling = self.config.max_multiple * state.historical_max;
        if ceiling > 0.0 {
            value = value.min(ceiling);
        }

        VolatilityForecast {
            horizon,
            value: value.max(0.0),
            confidence: stats::clamp_unit(denom),
            fallback: false,
            components,
        }
    }

    pub fn clear(&mut self) {
        self.assets.clear();
    }
}

pub fn regime_multiplier(regime: VolatilityRegime) -> f64 {
    match regime {
        VolatilityRegime::High => 1.2,
        VolatilityRegime::Divergent => 1.1,
        VolatilityRegime::Normal => 1.0,
        VolatilityRegime::Low => 0.85,
    }
}

/// Scale factor from ATR-implied volatility, Bollinger width and RSI extremity.
/// Missing inputs count as neutral; the result stays within [0.5, 2].
fn technical_multiplier(indicators: &IndicatorSet, price: Option<f64>, current: f64) -> f64 {
    if current <= 0.0 {
        return 1.0;
    }

    let atr_factor = match (indicators.atr_14, price) {
        (Some(atr), Some(price)) if price > 0.0 => {
            (stats::annualize(atr / price) / current).clamp(0.5, 2.0)
        }
        _ => 1.0,
    };

    // A ±2σ band over daily closes spans about 4 daily stdevs
    let band_factor = match indicators.bollinger() {
        Some(bands) => {
            let expected = 4.0 * current / stats::TRADING_DAYS.sqrt();
            if expected > 0.0 {
                (bands.width() / expected).clamp(0.5, 2.0)
            } else {
                1.0
            }
        }
        None => 1.0,
    };

    let rsi_factor = indicators
        .rsi_14
        .map(|rsi| 1.0 + 0.2 * (rsi - 50.0).abs() / 50.0)
        .unwrap_or(1.0);

    ((atr_factor + band_factor) / 2.0 * rsi_factor).clamp(0.5, 2.0)
}
