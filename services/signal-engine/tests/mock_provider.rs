//! Scripted market data source for testing without external services

#![allow(dead_code)]

use chrono::{Duration as ChronoDuration, Utc};
use market_data::{
    FallbackProvider, HistoricalPoint, MarketDataError, MarketDataProvider, Quote, SourceHealth,
    SyntheticMarket,
};
use rust_decimal::Decimal;
use signal_engine::EngineConfig;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Source quoting fixed prices, with assets that can be made to hang or fail
pub struct MockMarketSource {
    prices: HashMap<String, f64>,
    hanging: Mutex<HashSet<String>>,
    failing: Mutex<HashSet<String>>,
    quote_calls: Mutex<HashMap<String, usize>>,
}

impl MockMarketSource {
    pub fn new(prices: &[(&str, f64)]) -> Self {
        Self {
            prices: prices.iter().map(|(s, p)| (s.to_string(), *p)).collect(),
            hanging: Mutex::new(HashSet::new()),
            failing: Mutex::new(HashSet::new()),
            quote_calls: Mutex::new(HashMap::new()),
        }
    }

    pub fn hang(&self, asset: &str) {
        self.hanging.lock().unwrap().insert(asset.to_string());
    }

    pub fn fail(&self, asset: &str) {
        self.failing.lock().unwrap().insert(asset.to_string());
    }

    pub fn recover(&self, asset: &str) {
        self.hanging.lock().unwrap().remove(asset);
        self.failing.lock().unwrap().remove(asset);
    }

    pub fn quote_calls(&self, asset: &str) -> usize {
        self.quote_calls.lock().unwrap().get(asset).copied().unwrap_or(0)
    }

    fn is_hanging(&self, asset: &str) -> bool {
        self.hanging.lock().unwrap().contains(asset)
    }

    fn is_failing(&self, asset: &str) -> bool {
        self.failing.lock().unwrap().contains(asset)
    }

    fn price(&self, asset: &str) -> Result<f64, MarketDataError> {
        self.prices
            .get(asset)
            .copied()
            .ok_or_else(|| MarketDataError::AssetNotFound(asset.to_string()))
    }
}

#[async_trait::async_trait]
impl MarketDataProvider for MockMarketSource {
    async fn get_historical_series(
        &self,
        asset: &str,
        periods: usize,
    ) -> Result<Vec<HistoricalPoint>, MarketDataError> {
        if self.is_hanging(asset) {
            tokio::time::sleep(Duration::from_secs(60)).await;
        }
        if self.is_failing(asset) {
            return Err(MarketDataError::ApiError("scripted failure".to_string()));
        }

        let base = self.price(asset)?;
        let now = Utc::now();
        Ok((0..periods)
            .map(|i| {
                // Gentle oscillation so every indicator has something to measure
                let price = base * (1.0 + 0.02 * ((i as f64) * 0.5).sin());
                HistoricalPoint {
                    timestamp: now - ChronoDuration::days((periods - i) as i64),
                    price: Decimal::try_from(price).unwrap(),
                    volume: Decimal::from(1_000),
                }
            })
            .collect())
    }

    async fn get_realtime_quote(&self, asset: &str) -> Result<Quote, MarketDataError> {
        *self
            .quote_calls
            .lock()
            .unwrap()
            .entry(asset.to_string())
            .or_default() += 1;

        if self.is_hanging(asset) {
            tokio::time::sleep(Duration::from_secs(60)).await;
        }
        if self.is_failing(asset) {
            return Err(MarketDataError::ApiError("scripted failure".to_string()));
        }

        Ok(Quote {
            asset: asset.to_string(),
            price: Decimal::try_from(self.price(asset)?).unwrap(),
            volume: Decimal::from(1_000),
            change_24h: 0.0,
            source: "mock".to_string(),
            timestamp: Utc::now(),
        })
    }

    async fn health(&self) -> SourceHealth {
        SourceHealth {
            source: "mock".to_string(),
            is_healthy: true,
            last_success: None,
            last_error: None,
            success_rate_24h: 1.0,
            avg_latency_ms: 0,
        }
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// Fallback provider over `source`, with a synthetic market for every configured asset
pub fn fallback_provider(
    config: &EngineConfig,
    source: Arc<MockMarketSource>,
    timeout: Duration,
) -> FallbackProvider {
    let synthetic = config
        .assets
        .iter()
        .fold(SyntheticMarket::new(7), |market, asset| {
            market.with_asset(&asset.symbol, asset.synthetic_profile())
        });
    let mut provider = FallbackProvider::new(Arc::new(synthetic), timeout);
    provider.add_source(source);
    provider
}
