//! Per-asset directional opinions
//!
//! Six independent sources each produce a score in [-1, 1] and a confidence
//! in [0, 1]. The statistical and ml-proxy sources are deterministic
//! heuristics standing in for fitted models; `SignalSource::is_placeholder`
//! marks them.

use serde::{Deserialize, Serialize};

use crate::indicators::IndicatorSet;
use crate::regime::TrendRegime;
use crate::stats;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalSource {
    Technical,
    Statistical,
    MlProxy,
    Sentiment,
    Volume,
    Momentum,
}

impl SignalSource {
    pub const ALL: [SignalSource; 6] = [
        SignalSource::Technical,
        SignalSource::Statistical,
        SignalSource::MlProxy,
        SignalSource::Sentiment,
        SignalSource::Volume,
        SignalSource::Momentum,
    ];

    /// True for sources that approximate a statistical or ML model with a fixed rule
    pub fn is_placeholder(&self) -> bool {
        matches!(self, SignalSource::Statistical | SignalSource::MlProxy)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalOpinion {
    pub source: SignalSource,
    pub raw_score: f64,
    pub confidence: f64,
    pub placeholder: bool,
    pub reason: String,
}

impl SignalOpinion {
    pub fn new(source: SignalSource, raw_score: f64, confidence: f64, reason: String) -> Self {
        Self {
            source,
            raw_score: stats::clamp_signed(raw_score),
            confidence: stats::clamp_unit(confidence),
            placeholder: source.is_placeholder(),
            reason,
        }
    }

    pub fn silent(source: SignalSource, reason: &str) -> Self {
        Self::new(source, 0.0, 0.0, reason.to_string())
    }
}

/// Everything a source may look at for one asset in one cycle
#[derive(Debug, Clone, Copy)]
pub struct SignalContext<'a> {
    pub prices: &'a [f64],
    /// Simple returns, oldest first
    pub returns: &'a [f64],
    pub indicators: &'a IndicatorSet,
    /// Current combined annualized volatility
    pub volatility: Option<f64>,
    /// One-period GARCH forecast, annualized
    pub garch_volatility: Option<f64>,
    pub market_trend: TrendRegime,
}

/// Weighted blend of the components that are present
fn blend(components: &[(Option<f64>, f64)]) -> Option<(f64, f64)> {
    let (sum, weight) = components
        .iter()
        .filter_map(|(value, w)| value.map(|v| (v * w, *w)))
        .fold((0.0, 0.0), |(s, tw), (v, w)| (s + v, tw + w));
    if weight == 0.0 {
        None
    } else {
        Some((sum / weight, weight))
    }
}

fn sign(value: f64) -> f64 {
    if value > 0.0 {
        1.0
    } else if value < 0.0 {
        -1.0
    } else {
        0.0
    }
}

#[derive(Debug, Clone, Default)]
pub struct SignalGenerator;

impl SignalGenerator {
    pub fn new() -> Self {
        Self
    }

    /// All six opinions, in `SignalSource::ALL` order
    pub fn generate(&self, ctx: &SignalContext<'_>) -> Vec<SignalOpinion> {
        vec![
            self.technical(ctx),
            self.statistical(ctx),
            self.ml_proxy(ctx),
            self.sentiment(ctx),
            self.volume(ctx),
            self.momentum(ctx),
        ]
    }

    /// RSI extremity, MACD cross, Bollinger breach and SMA cross
    pub fn technical(&self, ctx: &SignalContext<'_>) -> SignalOpinion {
        let ind = ctx.indicators;
        let price = ctx.prices.last().copied();

        let rsi = ind.rsi_14.map(|rsi| {
            if rsi < 30.0 {
                1.0
            } else if rsi > 70.0 {
                -1.0
            } else {
                0.0
            }
        });
        let macd = match (ind.macd, ind.macd_signal) {
            (Some(m), Some(s)) => Some(sign(m - s)),
            _ => None,
        };
        let bollinger = match (ind.bollinger(), price) {
            (Some(b), Some(p)) if p < b.lower => Some(1.0),
            (Some(b), Some(p)) if p > b.upper => Some(-1.0),
            (Some(_), Some(_)) => Some(0.0),
            _ => None,
        };
        let sma_cross = match (ind.sma_20, ind.sma_50) {
            (Some(fast), Some(slow)) => Some(sign(fast - slow)),
            _ => None,
        };

        match blend(&[(rsi, 1.0), (macd, 1.0), (bollinger, 0.8), (sma_cross, 1.2)]) {
            Some((score, weight)) => SignalOpinion::new(
                SignalSource::Technical,
                score,
                (weight / 3.0).min(1.0),
                format!(
                    "rsi={:?} macd={:?} bollinger={:?} sma_cross={:?}",
                    rsi, macd, bollinger, sma_cross
                ),
            ),
            None => SignalOpinion::silent(SignalSource::Technical, "no indicators yet"),
        }
    }

    /// Heuristic stand-ins for ARIMA drift, GARCH direction and historical VaR
    pub fn statistical(&self, ctx: &SignalContext<'_>) -> SignalOpinion {
        let returns = ctx.returns;
        if returns.len() < 5 {
            return SignalOpinion::silent(SignalSource::Statistical, "fewer than 5 returns");
        }

        let drift = stats::mean(&returns[returns.len() - 5..]).unwrap_or(0.0);
        let arima = (drift * 100.0).tanh();

        let garch = match (ctx.garch_volatility, ctx.volatility) {
            (Some(forecast), Some(current)) if current > 0.0 => {
                if forecast > current * 1.1 {
                    -0.5
                } else if forecast < current * 0.9 {
                    0.5
                } else {
                    0.0
                }
            }
            _ => 0.0,
        };

        let var_95 = historical_var(returns, 0.95);
        let var_hint = if var_95 < 0.02 {
            0.3
        } else if var_95 > 0.05 {
            -0.6
        } else {
            0.0
        };

        let score = 0.3 * arima + 0.2 * garch + 0.5 * var_hint;
        let confidence = if returns.len() >= 30 { 0.4 } else { 0.2 };
        SignalOpinion::new(
            SignalSource::Statistical,
            score,
            confidence,
            format!("drift={:.5} garch_hint={} var95={:.4}", drift, garch, var_95),
        )
    }

    /// Bounded pseudo-scores standing in for forest, recurrent and margin models
    pub fn ml_proxy(&self, ctx: &SignalContext<'_>) -> SignalOpinion {
        let prices = ctx.prices;
        if prices.len() < 11 {
            return SignalOpinion::silent(SignalSource::MlProxy, "fewer than 11 prices");
        }
        let price = prices[prices.len() - 1];

        let recent = &ctx.returns[ctx.returns.len().saturating_sub(20)..];
        let forest = if recent.is_empty() {
            None
        } else {
            let ups = recent.iter().filter(|r| **r > 0.0).count() as f64;
            Some(2.0 * ups / recent.len() as f64 - 1.0)
        };

        let momentum_10 = price / prices[prices.len() - 11] - 1.0;
        let recurrent = Some((momentum_10 * 10.0).tanh());

        let margin = ctx
            .indicators
            .sma_20
            .filter(|sma| *sma > 0.0)
            .map(|sma| stats::clamp_signed((price - sma) / sma * 10.0));

        match blend(&[(forest, 0.4), (recurrent, 0.35), (margin, 0.25)]) {
            Some((score, weight)) => SignalOpinion::new(
                SignalSource::MlProxy,
                score,
                0.35 * weight,
                format!(
                    "forest={:?} recurrent={:?} margin={:?}",
                    forest, recurrent, margin
                ),
            ),
            None => SignalOpinion::silent(SignalSource::MlProxy, "no inputs"),
        }
    }

    /// Market trend read as sentiment, discounted by volatility
    pub fn sentiment(&self, ctx: &SignalContext<'_>) -> SignalOpinion {
        let score = 0.6 * ctx.market_trend.sign();
        let volatility = ctx.volatility.unwrap_or(0.5);
        let confidence = ((1.0 - volatility) * 0.7).max(0.0);
        SignalOpinion::new(
            SignalSource::Sentiment,
            score,
            confidence,
            format!("market trend {:?}", ctx.market_trend),
        )
    }

    pub fn volume(&self, ctx: &SignalContext<'_>) -> SignalOpinion {
        match ctx.indicators.volume_ratio {
            Some(ratio) => {
                let score = if ratio > 1.5 {
                    0.5
                } else if ratio < 0.5 {
                    -0.3
                } else {
                    0.0
                };
                SignalOpinion::new(
                    SignalSource::Volume,
                    score,
                    0.6,
                    format!("volume ratio {:.2}", ratio),
                )
            }
            None => SignalOpinion::silent(SignalSource::Volume, "volume ratio unavailable"),
        }
    }

    /// Stochastic, Williams %R and CCI extremity rules
    pub fn momentum(&self, ctx: &SignalContext<'_>) -> SignalOpinion {
        let ind = ctx.indicators;
        let extremity = |value: Option<f64>, low: f64, high: f64| {
            value.map(|v| {
                if v < low {
                    1.0
                } else if v > high {
                    -1.0
                } else {
                    0.0
                }
            })
        };

        let stochastic = extremity(ind.stochastic_k, 20.0, 80.0);
        let williams = extremity(ind.williams_r, -80.0, -20.0);
        let cci = extremity(ind.cci_20, -100.0, 100.0);

        match blend(&[(stochastic, 1.0), (williams, 1.0), (cci, 1.0)]) {
            Some((score, weight)) => SignalOpinion::new(
                SignalSource::Momentum,
                score,
                (weight / 3.0).min(1.0),
                format!(
                    "stochastic={:?} williams={:?} cci={:?}",
                    stochastic, williams, cci
                ),
            ),
            None => SignalOpinion::silent(SignalSource::Momentum, "no oscillators yet"),
        }
    }
}

/// Loss magnitude at the given confidence from the empirical return distribution
pub fn historical_var(returns: &[f64], confidence: f64) -> f64 {
    if returns.is_empty() {
        return 0.0;
    }
    let mut sorted = returns.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let index = (((1.0 - confidence) * sorted.len() as f64).floor() as usize).min(sorted.len() - 1);
    (-sorted[index]).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::IndicatorEngine;

    fn context<'a>(
        prices: &'a [f64],
        returns: &'a [f64],
        indicators: &'a IndicatorSet,
        trend: TrendRegime,
    ) -> SignalContext<'a> {
        SignalContext {
            prices,
            returns,
            indicators,
            volatility: Some(0.4),
            garch_volatility: Some(0.4),
            market_trend: trend,
        }
    }

    fn returns_of(prices: &[f64]) -> Vec<f64> {
        prices.windows(2).map(|w| w[1] / w[0] - 1.0).collect()
    }

    #[test]
    fn test_six_bounded_opinions() {
        let prices: Vec<f64> = (0..80).map(|i| 100.0 + (i as f64 * 0.7).sin() * 5.0).collect();
        let volumes: Vec<f64> = (0..80).map(|i| 1000.0 + (i % 7) as f64 * 100.0).collect();
        let returns = returns_of(&prices);
        let indicators = IndicatorEngine::default().compute(&prices, &volumes);
        let ctx = context(&prices, &returns, &indicators, TrendRegime::Sideways);

        let opinions = SignalGenerator::new().generate(&ctx);
        assert_eq!(opinions.len(), 6);
        for (opinion, source) in opinions.iter().zip(SignalSource::ALL) {
            assert_eq!(opinion.source, source);
            assert!((-1.0..=1.0).contains(&opinion.raw_score));
            assert!((0.0..=1.0).contains(&opinion.confidence));
            assert_eq!(opinion.placeholder, source.is_placeholder());
        }
    }

    #[test]
    fn test_cold_start_is_silent() {
        let indicators = IndicatorSet::default();
        let ctx = context(&[100.0], &[], &indicators, TrendRegime::Sideways);
        let gen = SignalGenerator::new();

        assert_eq!(gen.technical(&ctx).confidence, 0.0);
        assert_eq!(gen.statistical(&ctx).confidence, 0.0);
        assert_eq!(gen.ml_proxy(&ctx).confidence, 0.0);
        assert_eq!(gen.volume(&ctx).confidence, 0.0);
        assert_eq!(gen.momentum(&ctx).confidence, 0.0);
    }

    #[test]
    fn test_sentiment_follows_trend() {
        let indicators = IndicatorSet::default();
        let gen = SignalGenerator::new();

        let bull = gen.sentiment(&context(&[], &[], &indicators, TrendRegime::Bull));
        assert_eq!(bull.raw_score, 0.6);
        assert!((bull.confidence - 0.42).abs() < 1e-12);

        let mut ctx = context(&[], &[], &indicators, TrendRegime::Bear);
        ctx.volatility = Some(1.8);
        let bear = gen.sentiment(&ctx);
        assert_eq!(bear.raw_score, -0.6);
        assert_eq!(bear.confidence, 0.0);
    }

    #[test]
    fn test_volume_thresholds() {
        let gen = SignalGenerator::new();
        let mut indicators = IndicatorSet {
            volume_ratio: Some(2.0),
            ..IndicatorSet::default()
        };
        let opinion = gen.volume(&context(&[], &[], &indicators, TrendRegime::Sideways));
        assert_eq!((opinion.raw_score, opinion.confidence), (0.5, 0.6));

        indicators.volume_ratio = Some(0.3);
        let opinion = gen.volume(&context(&[], &[], &indicators, TrendRegime::Sideways));
        assert_eq!(opinion.raw_score, -0.3);
    }

    #[test]
    fn test_momentum_oversold() {
        let indicators = IndicatorSet {
            stochastic_k: Some(10.0),
            williams_r: Some(-90.0),
            cci_20: Some(-150.0),
            ..IndicatorSet::default()
        };
        let opinion =
            SignalGenerator::new().momentum(&context(&[], &[], &indicators, TrendRegime::Sideways));
        assert_eq!(opinion.raw_score, 1.0);
        assert_eq!(opinion.confidence, 1.0);
    }

    #[test]
    fn test_historical_var() {
        let returns: Vec<f64> = (0..100).map(|i| (i as f64 - 50.0) / 1000.0).collect();
        // 5th percentile is -0.045
        assert!((historical_var(&returns, 0.95) - 0.045).abs() < 1e-12);
        assert_eq!(historical_var(&[], 0.95), 0.0);
    }
}
