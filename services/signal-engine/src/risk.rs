//! Position sizing and protective levels
//!
//! Kelly-capped sizing with ATR-based stop-loss / take-profit, then regime
//! overrides. Always produces a recommendation; bad inputs degrade to
//! conservative values instead of failing.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::combiner::{CombinedSignal, Direction};
use crate::config::{AssetConfig, RiskConfig};
use crate::regime::VolatilityRegime;
use crate::stats;

/// Realized outcomes retained per asset
const MAX_TRADE_OUTCOMES: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OverrideReason {
    MaxDrawdownReached,
    HighVolatility,
    DegradedData,
}

/// Kelly: (b·p − q) / b with b = avg_win / avg_loss, capped then floored at 0
pub fn kelly_fraction(win_rate: f64, avg_win: f64, avg_loss: f64, cap: f64, max_position: f64) -> f64 {
    if !(avg_loss > 0.0 && avg_win > 0.0) || !(0.0..=1.0).contains(&win_rate) {
        return 0.0;
    }
    let b = avg_win / avg_loss;
    let p = win_rate;
    let q = 1.0 - p;
    let fraction = (b * p - q) / b;
    if !fraction.is_finite() {
        return 0.0;
    }
    fraction.min(cap).min(max_position).max(0.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KellyInputs {
    pub win_rate: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    /// True when derived from recorded outcomes rather than configured priors
    pub realized: bool,
}

/// Rolling record of realized trade returns for one asset
#[derive(Debug, Clone, Default)]
pub struct TradeStats {
    outcomes: VecDeque<f64>,
}

impl TradeStats {
    pub fn record(&mut self, trade_return: f64) {
        if !trade_return.is_finite() {
            return;
        }
        self.outcomes.push_back(trade_return);
        while self.outcomes.len() > MAX_TRADE_OUTCOMES {
            self.outcomes.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn win_rate(&self) -> f64 {
        if self.outcomes.is_empty() {
            return 0.0;
        }
        self.outcomes.iter().filter(|r| **r > 0.0).count() as f64 / self.outcomes.len() as f64
    }

    pub fn avg_win(&self) -> f64 {
        let wins: Vec<f64> = self.outcomes.iter().copied().filter(|r| *r > 0.0).collect();
        stats::mean(&wins).unwrap_or(0.0)
    }

    /// Average loss as a positive magnitude
    pub fn avg_loss(&self) -> f64 {
        let losses: Vec<f64> = self.outcomes.iter().filter(|r| **r < 0.0).map(|r| -r).collect();
        stats::mean(&losses).unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAdjustedRecommendation {
    pub direction: Direction,
    pub position_size_fraction: f64,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub risk_reward_ratio: f64,
    pub kelly_fraction: f64,
    pub strength: f64,
    pub confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub override_reason: Option<OverrideReason>,
}

impl RiskAdjustedRecommendation {
    /// No position, levels at the entry price
    pub fn neutral(entry_price: f64) -> Self {
        Self {
            direction: Direction::Neutral,
            position_size_fraction: 0.0,
            entry_price,
            stop_loss: entry_price,
            take_profit: entry_price,
            risk_reward_ratio: 0.0,
            kelly_fraction: 0.0,
            strength: 0.0,
            confidence: 0.0,
            override_reason: None,
        }
    }
}

/// Market state the recommendation is sized against
#[derive(Debug, Clone, Copy)]
pub struct RiskInputs {
    pub price: f64,
    pub atr: Option<f64>,
    /// Current combined annualized volatility
    pub volatility: f64,
    pub base_volatility: f64,
    pub drawdown: f64,
    pub regime: VolatilityRegime,
    pub degraded: bool,
    pub kelly: KellyInputs,
}

#[derive(Debug, Clone)]
pub struct RiskManager {
    config: RiskConfig,
}

impl RiskManager {
    pub fn new(config: RiskConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    /// Configured priors until enough outcomes are recorded, realized stats after
    pub fn kelly_inputs(&self, asset: &AssetConfig, trades: &TradeStats) -> KellyInputs {
        if trades.len() >= self.config.min_trade_outcomes {
            KellyInputs {
                win_rate: trades.win_rate(),
                avg_win: trades.avg_win(),
                avg_loss: trades.avg_loss(),
                realized: true,
            }
        } else {
            KellyInputs {
                win_rate: asset.win_rate,
                avg_win: asset.avg_win,
                avg_loss: asset.avg_loss,
                realized: false,
            }
        }
    }

    pub fn kelly(&self, inputs: &KellyInputs) -> f64 {
        kelly_fraction(
            inputs.win_rate,
            inputs.avg_win,
            inputs.avg_loss,
            self.config.kelly_cap,
            self.config.max_position,
        )
    }

    /// ATR, or a daily estimate from base volatility when ATR is missing or zero
    fn effective_atr(inputs: &RiskInputs) -> f64 {
        match inputs.atr {
            Some(atr) if atr.is_finite() && atr > 0.0 => atr,
            _ => inputs.price * inputs.base_volatility / stats::TRADING_DAYS.sqrt(),
        }
    }

    pub fn assess(&self, signal: &CombinedSignal, inputs: &RiskInputs) -> RiskAdjustedRecommendation {
        let price = inputs.price;
        if !(price.is_finite() && price > 0.0) {
            return RiskAdjustedRecommendation::neutral(0.0);
        }

        let kelly = self.kelly(&inputs.kelly);
        let position = if signal.direction.is_neutral() { 0.0 } else { kelly };

        let atr = Self::effective_atr(inputs);
        let stop_distance = self.config.stop_atr_multiple * atr;
        let target_distance = self.config.take_profit_atr_multiple * atr;
        let floor = price * 0.01;
        let (stop_loss, take_profit) = if signal.direction.is_sell() {
            (price + stop_distance, (price - target_distance).max(floor))
        } else {
            ((price - stop_distance).max(floor), price + target_distance)
        };

        let risk = (price - stop_loss).abs();
        let risk_reward_ratio = if risk > 0.0 {
            (take_profit - price).abs() / risk
        } else {
            0.0
        };

        let recommendation = RiskAdjustedRecommendation {
            direction: signal.direction,
            position_size_fraction: position,
            entry_price: price,
            stop_loss,
            take_profit,
            risk_reward_ratio,
            kelly_fraction: kelly,
            strength: signal.strength,
            confidence: signal.confidence,
            override_reason: None,
        };

        self.apply_regime_overrides(recommendation, inputs)
    }

    pub fn apply_regime_overrides(
        &self,
        mut rec: RiskAdjustedRecommendation,
        inputs: &RiskInputs,
    ) -> RiskAdjustedRecommendation {
        if inputs.drawdown > self.config.max_drawdown {
            rec.direction = Direction::Neutral;
            rec.strength = 0.0;
            rec.position_size_fraction = 0.0;
            rec.override_reason = Some(OverrideReason::MaxDrawdownReached);
            return rec;
        }

        if inputs.volatility > self.config.volatility_ceiling {
            rec.strength *= 0.5;
            rec.position_size_fraction *= 0.5;
            rec.override_reason = Some(OverrideReason::HighVolatility);
        } else {
            let (strength_scale, confidence_scale) = match inputs.regime {
                VolatilityRegime::High => (0.7, 0.8),
                VolatilityRegime::Divergent => (0.8, 0.85),
                VolatilityRegime::Low => (1.1, 1.05),
                VolatilityRegime::Normal => (1.0, 1.0),
            };
            rec.strength = stats::clamp_unit(rec.strength * strength_scale);
            rec.confidence = stats::clamp_unit(rec.confidence * confidence_scale);
        }

        if inputs.degraded {
            rec.position_size_fraction *= 0.5;
            rec.override_reason.get_or_insert(OverrideReason::DegradedData);
        }

        rec
    }
}
