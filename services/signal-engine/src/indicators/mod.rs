//! Technical indicators
//!
//! Every indicator is nullable: below its required history it is `None`
//! rather than an error, so a cold-start series yields a partial set.

pub mod averages;
pub mod bands;
pub mod directional;
pub mod oscillators;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::store::AssetSeries;

/// Full indicator snapshot for one asset
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSet {
    pub sma_20: Option<f64>,
    pub sma_50: Option<f64>,
    pub ema_12: Option<f64>,
    pub ema_26: Option<f64>,
    pub rsi_14: Option<f64>,
    pub macd: Option<f64>,
    pub macd_signal: Option<f64>,
    pub macd_histogram: Option<f64>,
    pub bollinger_upper: Option<f64>,
    pub bollinger_middle: Option<f64>,
    pub bollinger_lower: Option<f64>,
    pub stochastic_k: Option<f64>,
    pub stochastic_d: Option<f64>,
    pub atr_14: Option<f64>,
    pub adx_14: Option<f64>,
    pub williams_r: Option<f64>,
    pub cci_20: Option<f64>,
    pub mfi_14: Option<f64>,
    pub volume_sma_20: Option<f64>,
    pub volume_ratio: Option<f64>,
    pub volatility_20: Option<f64>,
    pub volatility_50: Option<f64>,
    /// History reached the engine's longest period
    #[serde(default)]
    pub warmed_up: bool,
}

impl IndicatorSet {
    /// Name → value view, ordered by name
    pub fn as_map(&self) -> BTreeMap<&'static str, Option<f64>> {
        BTreeMap::from([
            ("sma_20", self.sma_20),
            ("sma_50", self.sma_50),
            ("ema_12", self.ema_12),
            ("ema_26", self.ema_26),
            ("rsi_14", self.rsi_14),
            ("macd", self.macd),
            ("macd_signal", self.macd_signal),
            ("macd_histogram", self.macd_histogram),
            ("bollinger_upper", self.bollinger_upper),
            ("bollinger_middle", self.bollinger_middle),
            ("bollinger_lower", self.bollinger_lower),
            ("stochastic_k", self.stochastic_k),
            ("stochastic_d", self.stochastic_d),
            ("atr_14", self.atr_14),
            ("adx_14", self.adx_14),
            ("williams_r", self.williams_r),
            ("cci_20", self.cci_20),
            ("mfi_14", self.mfi_14),
            ("volume_sma_20", self.volume_sma_20),
            ("volume_ratio", self.volume_ratio),
            ("volatility_20", self.volatility_20),
            ("volatility_50", self.volatility_50),
        ])
    }

    pub fn available(&self) -> usize {
        self.as_map().values().filter(|v| v.is_some()).count()
    }

    /// Warmed up and every indicator available
    pub fn is_complete(&self) -> bool {
        self.warmed_up && self.as_map().values().all(Option::is_some)
    }

    pub fn bollinger(&self) -> Option<bands::Bollinger> {
        Some(bands::Bollinger {
            upper: self.bollinger_upper?,
            middle: self.bollinger_middle?,
            lower: self.bollinger_lower?,
        })
    }
}

/// Computes an `IndicatorSet` from a close/volume history
#[derive(Debug, Clone)]
pub struct IndicatorEngine {
    longest_period: usize,
}

impl Default for IndicatorEngine {
    fn default() -> Self {
        Self::new(50)
    }
}

impl IndicatorEngine {
    pub fn new(longest_period: usize) -> Self {
        Self { longest_period }
    }

    /// History length below which a set never counts as complete
    pub fn longest_period(&self) -> usize {
        self.longest_period
    }

    pub fn compute_series(&self, series: &AssetSeries) -> IndicatorSet {
        self.compute(&series.prices(), &series.volumes())
    }

    pub fn compute(&self, closes: &[f64], volumes: &[f64]) -> IndicatorSet {
        let macd = averages::macd(closes, 12, 26, 9);
        let bollinger = bands::bollinger(closes, 20, 2.0);
        let (stochastic_k, stochastic_d) = oscillators::stochastic(closes, 14);
        let (volume_sma_20, volume_ratio) = bands::volume_ratio(volumes, 20);

        IndicatorSet {
            sma_20: averages::sma(closes, 20),
            sma_50: averages::sma(closes, 50),
            ema_12: averages::ema(closes, 12),
            ema_26: averages::ema(closes, 26),
            rsi_14: oscillators::rsi(closes, 14),
            macd: macd.map(|m| m.macd),
            macd_signal: macd.map(|m| m.signal),
            macd_histogram: macd.map(|m| m.histogram),
            bollinger_upper: bollinger.map(|b| b.upper),
            bollinger_middle: bollinger.map(|b| b.middle),
            bollinger_lower: bollinger.map(|b| b.lower),
            stochastic_k,
            stochastic_d,
            atr_14: directional::atr(closes, 14),
            adx_14: directional::adx(closes, 14),
            williams_r: oscillators::williams_r(closes, 14),
            cci_20: oscillators::cci(closes, 20),
            mfi_14: oscillators::mfi(closes, volumes, 14),
            volume_sma_20,
            volume_ratio,
            volatility_20: bands::rolling_volatility(closes, 20),
            volatility_50: bands::rolling_volatility(closes, 50),
            warmed_up: !closes.is_empty() && closes.len() >= self.longest_period,
        }
    }
}
