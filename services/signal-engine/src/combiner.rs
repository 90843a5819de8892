//! Weighted ensemble of signal opinions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::regime::TrendRegime;
use crate::signals::{SignalOpinion, SignalSource};
use crate::stats;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    StrongBuy,
    WeakBuy,
    Neutral,
    WeakSell,
    StrongSell,
}

impl Direction {
    pub fn from_score(score: f64) -> Self {
        if score > 0.3 {
            Direction::StrongBuy
        } else if score > 0.1 {
            Direction::WeakBuy
        } else if score < -0.3 {
            Direction::StrongSell
        } else if score < -0.1 {
            Direction::WeakSell
        } else {
            Direction::Neutral
        }
    }

    pub fn is_buy(&self) -> bool {
        matches!(self, Direction::StrongBuy | Direction::WeakBuy)
    }

    pub fn is_sell(&self) -> bool {
        matches!(self, Direction::StrongSell | Direction::WeakSell)
    }

    pub fn is_neutral(&self) -> bool {
        *self == Direction::Neutral
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombinedSignal {
    pub direction: Direction,
    pub strength: f64,
    pub confidence: f64,
    pub raw_score: f64,
    pub contributing_opinions: Vec<SignalOpinion>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct SignalCombiner {
    weights: [(SignalSource, f64); 6],
}

impl Default for SignalCombiner {
    fn default() -> Self {
        Self {
            weights: [
                (SignalSource::Technical, 0.25),
                (SignalSource::Statistical, 0.20),
                (SignalSource::MlProxy, 0.25),
                (SignalSource::Sentiment, 0.10),
                (SignalSource::Volume, 0.10),
                (SignalSource::Momentum, 0.10),
            ],
        }
    }
}

impl SignalCombiner {
    pub fn weight(&self, source: SignalSource) -> f64 {
        self.weights
            .iter()
            .find(|(s, _)| *s == source)
            .map(|(_, w)| *w)
            .unwrap_or(0.0)
    }

    pub fn combine(
        &self,
        opinions: Vec<SignalOpinion>,
        market_trend: TrendRegime,
        timestamp: DateTime<Utc>,
    ) -> CombinedSignal {
        let mut weighted_score = 0.0;
        let mut score_weight = 0.0;
        let mut confidence = 0.0;
        for opinion in &opinions {
            let w = self.weight(opinion.source);
            weighted_score += opinion.raw_score * w * opinion.confidence;
            score_weight += w * opinion.confidence;
            confidence += opinion.confidence * w;
        }

        let raw_score = if score_weight > 0.0 {
            stats::clamp_signed(weighted_score / score_weight)
        } else {
            0.0
        };

        // Trend alignment
        let trend = market_trend.sign();
        let alignment = if trend == 0.0 || raw_score == 0.0 {
            1.0
        } else if raw_score.signum() == trend {
            1.1
        } else {
            0.9
        };

        CombinedSignal {
            direction: Direction::from_score(raw_score),
            strength: raw_score.abs(),
            confidence: stats::clamp_unit(confidence * alignment),
            raw_score,
            contributing_opinions: opinions,
            timestamp,
        }
    }
}
