//! Signal engine core
//!
//! Owns every piece of per-asset state and runs one update cycle at a time:
//! detect regime → update volatility → indicators → opinions → combine → risk.
//! The result of a cycle is an immutable `CycleSnapshot`; readers never see
//! a cycle in progress.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info, warn};

use crate::combiner::{CombinedSignal, SignalCombiner};
use crate::config::{AssetConfig, EngineConfig};
use crate::error::{EngineError, Result};
use crate::indicators::{IndicatorEngine, IndicatorSet};
use crate::regime::{MarketRegime, RegimeDetector};
use crate::risk::{RiskAdjustedRecommendation, RiskInputs, RiskManager, TradeStats};
use crate::signals::{SignalContext, SignalGenerator};
use crate::store::TimeSeriesStore;
use crate::volatility::{
    VolatilityEstimate, VolatilityForecast, VolatilityModel, VolatilityTrend,
};

/// Fetch health of one asset
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AssetHealth {
    pub consecutive_failures: u32,
    pub degraded: bool,
    /// Cycles left before live fetches are attempted again
    pub skip_cycles_remaining: u32,
}

/// Everything one cycle derived for one asset
#[derive(Debug, Clone, Serialize)]
pub struct AssetAnalysis {
    pub symbol: String,
    pub price: Option<f64>,
    pub points: usize,
    pub indicators: IndicatorSet,
    pub volatility: Option<VolatilityEstimate>,
    pub volatility_trend: Option<VolatilityTrend>,
    pub base_volatility: f64,
    pub drawdown: f64,
    pub signal: CombinedSignal,
    pub recommendation: RiskAdjustedRecommendation,
    pub degraded: bool,
}

/// Immutable result of one cycle
#[derive(Debug, Clone)]
pub struct CycleSnapshot {
    pub cycle: u64,
    pub generated_at: DateTime<Utc>,
    pub regime: MarketRegime,
    pub assets: BTreeMap<String, AssetAnalysis>,
    volatility: VolatilityModel,
}

impl CycleSnapshot {
    pub fn asset(&self, symbol: &str) -> Option<&AssetAnalysis> {
        self.assets.get(&symbol.to_uppercase())
    }

    /// Volatility forecast for `horizon` periods from this cycle's state
    pub fn predict_volatility(&self, symbol: &str, horizon: u32) -> Option<VolatilityForecast> {
        let analysis = self.asset(symbol)?;
        Some(self.volatility.predict_volatility(
            &analysis.symbol,
            horizon,
            &analysis.indicators,
            analysis.price,
            &self.regime,
            analysis.base_volatility,
        ))
    }

    pub fn degraded_assets(&self) -> Vec<&str> {
        self.assets
            .values()
            .filter(|a| a.degraded)
            .map(|a| a.symbol.as_str())
            .collect()
    }
}

pub struct SignalEngine {
    config: EngineConfig,
    store: TimeSeriesStore,
    indicators: IndicatorEngine,
    volatility: VolatilityModel,
    detector: RegimeDetector,
    generator: SignalGenerator,
    combiner: SignalCombiner,
    risk: RiskManager,
    trades: HashMap<String, TradeStats>,
    health: HashMap<String, AssetHealth>,
    portfolio_drawdown: f64,
    regime: Option<MarketRegime>,
    cycle: u64,
}

impl SignalEngine {
    pub fn new(config: EngineConfig) -> Result<Self> {
        let config = config.validated()?;

        let symbols: Vec<&str> = config.assets.iter().map(|a| a.symbol.as_str()).collect();
        let engine = Self {
            store: TimeSeriesStore::from_config(&config),
            indicators: IndicatorEngine::new(config.indicators.longest_period),
            volatility: VolatilityModel::new(config.volatility.clone(), symbols.iter().copied()),
            detector: RegimeDetector::default(),
            generator: SignalGenerator::new(),
            combiner: SignalCombiner::default(),
            risk: RiskManager::new(config.risk.clone()),
            trades: symbols
                .iter()
                .map(|s| (s.to_string(), TradeStats::default()))
                .collect(),
            health: symbols
                .iter()
                .map(|s| (s.to_string(), AssetHealth::default()))
                .collect(),
            portfolio_drawdown: 0.0,
            regime: None,
            cycle: 0,
            config,
        };

        info!("Signal engine initialized for {} assets", engine.config.assets.len());
        Ok(engine)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &TimeSeriesStore {
        &self.store
    }

    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    /// Regime of the last completed cycle
    pub fn regime(&self) -> Option<&MarketRegime> {
        self.regime.as_ref()
    }

    pub fn symbols(&self) -> Vec<String> {
        self.config.assets.iter().map(|a| a.symbol.clone()).collect()
    }

    pub fn ingest_tick(
        &mut self,
        asset: &str,
        price: f64,
        volume: f64,
        timestamp: DateTime<Utc>,
    ) -> Result<()> {
        self.store.append_tick(asset, price, volume, timestamp)
    }

    /// Price of the most recent tick held for `asset`
    pub fn latest_price(&self, asset: &str) -> Option<f64> {
        self.store
            .series(asset)
            .ok()
            .and_then(|series| series.latest())
            .map(|record| record.price)
    }

    pub fn health(&self, asset: &str) -> Option<&AssetHealth> {
        self.health.get(&asset.to_uppercase())
    }

    pub fn is_degraded(&self, asset: &str) -> bool {
        self.health(asset).map_or(false, |h| h.degraded)
    }

    /// Whether a live fetch should be attempted for `asset` this cycle.
    /// A degraded asset sits out its skip window, one cycle per call.
    pub fn should_fetch(&mut self, asset: &str) -> bool {
        match self.health.get_mut(&asset.to_uppercase()) {
            Some(health) if health.skip_cycles_remaining > 0 => {
                health.skip_cycles_remaining -= 1;
                false
            }
            Some(_) => true,
            None => false,
        }
    }

    pub fn record_fetch_success(&mut self, asset: &str) {
        if let Some(health) = self.health.get_mut(&asset.to_uppercase()) {
            if health.degraded {
                info!("{} recovered after {} failed fetches", asset, health.consecutive_failures);
            }
            *health = AssetHealth::default();
        }
    }

    /// Count a failed live fetch. Returns true when this failure degrades the asset.
    pub fn record_fetch_failure(&mut self, asset: &str, error: &EngineError) -> bool {
        let threshold = self.config.cycle.degraded_threshold;
        let skip = self.config.cycle.degraded_skip_cycles;
        let health = match self.health.get_mut(&asset.to_uppercase()) {
            Some(h) => h,
            None => return false,
        };

        health.consecutive_failures = health.consecutive_failures.saturating_add(1);
        warn!(
            "Fetch failure {} for {}: {}",
            health.consecutive_failures, asset, error
        );

        if health.consecutive_failures >= threshold {
            let newly = !health.degraded;
            health.degraded = true;
            health.skip_cycles_remaining = skip;
            if newly {
                warn!(
                    "{} degraded after {} consecutive failures, skipping live fetch for {} cycles",
                    asset, health.consecutive_failures, skip
                );
            }
            return newly;
        }
        false
    }

    /// Realized return of a closed trade, reported by the execution side
    pub fn record_trade_outcome(&mut self, asset: &str, trade_return: f64) -> Result<()> {
        let key = asset.to_uppercase();
        let stats = self
            .trades
            .get_mut(&key)
            .ok_or(EngineError::UnknownAsset(key))?;
        stats.record(trade_return);
        Ok(())
    }

    pub fn trade_stats(&self, asset: &str) -> Option<&TradeStats> {
        self.trades.get(&asset.to_uppercase())
    }

    /// Portfolio drawdown reported by the execution side, as a fraction
    pub fn set_portfolio_drawdown(&mut self, drawdown: f64) {
        self.portfolio_drawdown = if drawdown.is_finite() {
            drawdown.clamp(0.0, 1.0)
        } else {
            0.0
        };
    }

    pub fn portfolio_drawdown(&self) -> f64 {
        self.portfolio_drawdown
    }

    /// Market regime from every asset's prices and the volatilities known at cycle start
    fn detect_regime(&self, timestamp: DateTime<Utc>) -> MarketRegime {
        let mut histories = Vec::with_capacity(self.config.assets.len());
        let mut volatilities = Vec::with_capacity(self.config.assets.len());

        for asset in &self.config.assets {
            let series = match self.store.series(&asset.symbol) {
                Ok(s) => s,
                Err(_) => continue,
            };
            histories.push(series.prices());

            let vol = self
                .volatility
                .latest(&asset.symbol)
                .map(|e| e.combined)
                .or_else(|| series.trailing_volatility(self.config.volatility.window));
            if let Some(vol) = vol {
                volatilities.push(vol);
            }
        }

        self.detector.detect(
            histories.iter().map(Vec::as_slice),
            &volatilities,
            timestamp,
        )
    }

    fn analyze(
        &mut self,
        asset: &AssetConfig,
        regime: &MarketRegime,
        timestamp: DateTime<Utc>,
    ) -> Result<AssetAnalysis> {
        let series = self.store.series(&asset.symbol)?;
        let prices = series.prices();
        let returns = series.returns();
        let log_returns = series.log_returns();
        let price = series.latest().map(|r| r.price);
        let points = series.len();
        let asset_drawdown = series.drawdown();
        let indicators = self.indicators.compute_series(series);

        if points < self.config.history.min_points {
            debug!("{}: {} points, running on partial output", asset.symbol, points);
        }

        let observed_at = series.latest().map_or(timestamp, |r| r.timestamp);
        let estimate =
            self.volatility
                .update(&asset.symbol, &log_returns, regime.volatility_regime, observed_at);
        let garch_volatility = self.volatility.garch_forecast(&asset.symbol, 1);

        let ctx = SignalContext {
            prices: &prices,
            returns: &returns,
            indicators: &indicators,
            volatility: estimate.map(|e| e.combined),
            garch_volatility,
            market_trend: regime.trend,
        };
        let opinions = self.generator.generate(&ctx);
        let signal = self.combiner.combine(opinions, regime.trend, timestamp);

        let degraded = self.is_degraded(&asset.symbol);
        let drawdown = self.portfolio_drawdown.max(asset_drawdown);
        let trades = self.trades.get(&asset.symbol).cloned().unwrap_or_default();
        let inputs = RiskInputs {
            price: price.unwrap_or(asset.base_price),
            atr: indicators.atr_14,
            volatility: estimate.map_or(asset.base_volatility, |e| e.combined),
            base_volatility: asset.base_volatility,
            drawdown,
            regime: regime.volatility_regime,
            degraded,
            kelly: self.risk.kelly_inputs(asset, &trades),
        };
        let recommendation = self.risk.assess(&signal, &inputs);

        Ok(AssetAnalysis {
            symbol: asset.symbol.clone(),
            price,
            points,
            indicators,
            volatility: estimate,
            volatility_trend: self.volatility.volatility_trend(&asset.symbol),
            base_volatility: asset.base_volatility,
            drawdown,
            signal,
            recommendation,
            degraded,
        })
    }

    /// Run one full cycle over every configured asset
    pub fn run_cycle(&mut self, timestamp: DateTime<Utc>) -> CycleSnapshot {
        self.cycle += 1;
        let regime = self.detect_regime(timestamp);

        let assets = self.config.assets.clone();
        let mut analyses = BTreeMap::new();
        for asset in &assets {
            match self.analyze(asset, &regime, timestamp) {
                Ok(analysis) => {
                    analyses.insert(asset.symbol.clone(), analysis);
                }
                Err(e) => warn!("Cycle {}: skipping {}: {}", self.cycle, asset.symbol, e),
            }
        }

        debug!(
            "Cycle {} complete: trend {:?}, volatility regime {:?}",
            self.cycle, regime.trend, regime.volatility_regime
        );
        self.regime = Some(regime);

        CycleSnapshot {
            cycle: self.cycle,
            generated_at: timestamp,
            regime,
            assets: analyses,
            volatility: self.volatility.clone(),
        }
    }

    /// Drop all per-asset state
    pub fn shutdown(&mut self) {
        self.store.clear();
        self.volatility.clear();
        self.trades.clear();
        self.health.clear();
        self.regime = None;
        info!("Signal engine shut down after {} cycles", self.cycle);
    }
}
