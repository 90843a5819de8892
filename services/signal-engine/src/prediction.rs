//! Read side of the engine
//!
//! Predictions are pure functions of the latest published `CycleSnapshot`.
//! Reads never wait on a cycle in progress, so two calls between cycles
//! return identical output.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::watch;

use crate::combiner::Direction;
use crate::config::AssetConfig;
use crate::engine::CycleSnapshot;
use crate::error::{EngineError, Result};
use crate::regime::MarketRegime;
use crate::risk::OverrideReason;
use crate::volatility::{VolatilityEstimate, VolatilityForecast, VolatilityTrend};

/// Structured prediction for one asset and horizon
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    pub asset: String,
    pub horizon: u32,
    pub direction: Direction,
    pub strength: f64,
    pub confidence: f64,
    pub entry: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    pub position_size: f64,
    pub risk_reward: f64,
    pub kelly_fraction: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub override_reason: Option<OverrideReason>,
    pub indicators: BTreeMap<&'static str, Option<f64>>,
    pub regime: MarketRegime,
    pub volatility: VolatilityForecast,
    pub degraded: bool,
    /// 0 until the first cycle completes
    pub cycle: u64,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssetVolatility {
    pub estimate: Option<VolatilityEstimate>,
    pub trend: Option<VolatilityTrend>,
    pub base_volatility: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub cycle: u64,
    pub last_cycle_at: Option<DateTime<Utc>>,
    pub assets: Vec<String>,
    pub degraded_assets: Vec<String>,
}

fn to_price(value: f64) -> Decimal {
    Decimal::try_from(value)
        .map(|d| d.round_dp(8))
        .unwrap_or_default()
}

fn validate_horizon(horizon: i64) -> Result<u32> {
    if horizon < 1 {
        return Err(EngineError::InvalidHorizon(horizon));
    }
    Ok(u32::try_from(horizon).unwrap_or(u32::MAX))
}

#[derive(Clone)]
pub struct PredictionService {
    snapshots: watch::Receiver<Option<Arc<CycleSnapshot>>>,
    assets: Arc<HashMap<String, AssetConfig>>,
    started_at: DateTime<Utc>,
}

impl PredictionService {
    pub fn new(snapshots: watch::Receiver<Option<Arc<CycleSnapshot>>>, assets: &[AssetConfig]) -> Self {
        Self {
            snapshots,
            assets: Arc::new(
                assets
                    .iter()
                    .map(|a| {
                        let symbol = a.symbol.trim().to_uppercase();
                        (symbol.clone(), AssetConfig { symbol, ..a.clone() })
                    })
                    .collect(),
            ),
            started_at: Utc::now(),
        }
    }

    /// Latest published snapshot, if any cycle has completed
    pub fn snapshot(&self) -> Option<Arc<CycleSnapshot>> {
        self.snapshots.borrow().clone()
    }

    fn asset_config(&self, asset: &str) -> Result<&AssetConfig> {
        let key = asset.to_uppercase();
        self.assets.get(&key).ok_or(EngineError::UnknownAsset(key))
    }

    pub fn get_prediction(&self, asset: &str, horizon: i64) -> Result<Prediction> {
        let config = self.asset_config(asset)?;
        let horizon = validate_horizon(horizon)?;

        let snapshot = match self.snapshot() {
            Some(s) => s,
            None => return Ok(self.fallback_prediction(config, horizon)),
        };
        let analysis = match snapshot.asset(&config.symbol) {
            Some(a) => a,
            None => return Ok(self.fallback_prediction(config, horizon)),
        };

        let rec = &analysis.recommendation;
        let volatility = snapshot
            .predict_volatility(&config.symbol, horizon)
            .unwrap_or_else(|| VolatilityForecast::fallback(config.base_volatility, horizon));

        Ok(Prediction {
            asset: config.symbol.clone(),
            horizon,
            direction: rec.direction,
            strength: rec.strength,
            confidence: rec.confidence,
            entry: to_price(rec.entry_price),
            stop_loss: to_price(rec.stop_loss),
            take_profit: to_price(rec.take_profit),
            position_size: rec.position_size_fraction,
            risk_reward: rec.risk_reward_ratio,
            kelly_fraction: rec.kelly_fraction,
            override_reason: rec.override_reason,
            indicators: analysis.indicators.as_map(),
            regime: snapshot.regime,
            volatility,
            degraded: analysis.degraded,
            cycle: snapshot.cycle,
            generated_at: snapshot.generated_at,
        })
    }

    /// Before the first cycle: no position, base-volatility forecast
    fn fallback_prediction(&self, config: &AssetConfig, horizon: u32) -> Prediction {
        let entry = to_price(config.base_price);
        Prediction {
            asset: config.symbol.clone(),
            horizon,
            direction: Direction::Neutral,
            strength: 0.0,
            confidence: 0.0,
            entry,
            stop_loss: entry,
            take_profit: entry,
            position_size: 0.0,
            risk_reward: 0.0,
            kelly_fraction: 0.0,
            override_reason: None,
            indicators: Default::default(),
            regime: MarketRegime::neutral(self.started_at),
            volatility: VolatilityForecast::fallback(config.base_volatility, horizon),
            degraded: true,
            cycle: 0,
            generated_at: self.started_at,
        }
    }

    /// Latest volatility estimate and trend of every tracked asset
    pub fn get_all_volatilities(&self) -> BTreeMap<String, AssetVolatility> {
        let snapshot = self.snapshot();
        self.assets
            .values()
            .map(|config| {
                let analysis = snapshot.as_ref().and_then(|s| s.asset(&config.symbol));
                (
                    config.symbol.clone(),
                    AssetVolatility {
                        estimate: analysis.and_then(|a| a.volatility),
                        trend: analysis.and_then(|a| a.volatility_trend),
                        base_volatility: config.base_volatility,
                    },
                )
            })
            .collect()
    }

    pub fn regime(&self) -> Option<MarketRegime> {
        self.snapshot().map(|s| s.regime)
    }

    pub fn status(&self) -> EngineStatus {
        let snapshot = self.snapshot();
        let mut assets: Vec<String> = self.assets.keys().cloned().collect();
        assets.sort();
        EngineStatus {
            cycle: snapshot.as_ref().map_or(0, |s| s.cycle),
            last_cycle_at: snapshot.as_ref().map(|s| s.generated_at),
            assets,
            degraded_assets: snapshot
                .as_ref()
                .map(|s| s.degraded_assets().into_iter().map(String::from).collect())
                .unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::engine::SignalEngine;
    use chrono::Duration;

    fn service() -> (watch::Sender<Option<Arc<CycleSnapshot>>>, PredictionService) {
        let (tx, rx) = watch::channel(None);
        let config = EngineConfig::default();
        (tx, PredictionService::new(rx, &config.assets))
    }

    #[test]
    fn test_fallback_before_first_cycle() {
        let (_tx, svc) = service();
        let p = svc.get_prediction("eth", 3).unwrap();
        assert_eq!(p.asset, "ETH");
        assert_eq!(p.direction, Direction::Neutral);
        assert_eq!(p.position_size, 0.0);
        assert!(p.degraded);
        assert!(p.volatility.fallback);
        assert_eq!(p.volatility.value, 0.75);
        assert_eq!(p.entry, Decimal::from(3_500));
        assert_eq!(p, svc.get_prediction("ETH", 3).unwrap());
    }

    #[test]
    fn test_misuse_fails_fast() {
        let (_tx, svc) = service();
        assert_eq!(
            svc.get_prediction("DOGE", 1),
            Err(EngineError::UnknownAsset("DOGE".to_string()))
        );
        assert_eq!(svc.get_prediction("BTC", 0), Err(EngineError::InvalidHorizon(0)));
        assert_eq!(svc.get_prediction("BTC", -4), Err(EngineError::InvalidHorizon(-4)));
    }

    #[test]
    fn test_reads_latest_snapshot() {
        let (tx, svc) = service();
        let mut engine = SignalEngine::new(EngineConfig::default()).unwrap();
        let start = Utc::now() - Duration::days(60);
        for i in 0..60 {
            let price = 100.0 + i as f64;
            engine
                .ingest_tick("SOL", price, 500.0, start + Duration::days(i))
                .unwrap();
        }
        tx.send_replace(Some(Arc::new(engine.run_cycle(Utc::now()))));

        let p = svc.get_prediction("SOL", 10).unwrap();
        assert_eq!(p.cycle, 1);
        assert_eq!(p.entry, Decimal::from(159));
        assert_eq!(p.volatility.horizon, 10);
        assert!(!p.degraded);
        assert_eq!(p, svc.get_prediction("SOL", 10).unwrap());

        let vols = svc.get_all_volatilities();
        assert_eq!(vols.len(), 3);
        assert!(vols["SOL"].estimate.is_some());
        assert!(vols["BTC"].estimate.is_none());
        assert_eq!(svc.status().cycle, 1);
    }
}
