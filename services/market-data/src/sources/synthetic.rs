//! Synthetic market generator
//!
//! Fallback source used when live feeds fail or time out. Each asset follows a
//! geometric Brownian motion seeded from its base price, annualized volatility
//! and drift, one step per trading day. Output is deterministic for a given
//! seed so fallbacks are reproducible.

use crate::types::*;
use chrono::{Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use std::collections::HashMap;
use tokio::sync::Mutex;

const TRADING_DAYS: f64 = 252.0;

/// Per-asset generator parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyntheticProfile {
    pub base_price: f64,
    /// Annualized volatility (0.6 = 60%)
    pub volatility: f64,
    /// Annualized drift
    pub drift: f64,
    /// Typical per-period volume
    pub base_volume: f64,
}

impl SyntheticProfile {
    pub fn new(base_price: f64, volatility: f64, drift: f64) -> Self {
        Self {
            base_price,
            volatility,
            drift,
            base_volume: 1_000_000.0,
        }
    }
}

struct AssetWalk {
    profile: SyntheticProfile,
    rng: StdRng,
    last_price: f64,
}

impl AssetWalk {
    fn new(profile: SyntheticProfile, seed: u64) -> Self {
        Self {
            profile,
            rng: StdRng::seed_from_u64(seed),
            last_price: profile.base_price,
        }
    }

    /// Standard normal draw via Box-Muller
    fn standard_normal(&mut self) -> f64 {
        let u1: f64 = self.rng.gen_range(f64::EPSILON..1.0);
        let u2: f64 = self.rng.gen();
        (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
    }

    fn step(&mut self) -> (f64, f64) {
        let dt = 1.0 / TRADING_DAYS;
        let sigma = self.profile.volatility;
        let z = self.standard_normal();
        let growth = ((self.profile.drift - 0.5 * sigma * sigma) * dt + sigma * dt.sqrt() * z).exp();
        self.last_price = (self.last_price * growth).max(self.profile.base_price * 1e-6);

        let volume_noise: f64 = self.rng.gen_range(0.5..1.5);
        let volume = self.profile.base_volume * volume_noise * (1.0 + z.abs() * 0.5);
        (self.last_price, volume)
    }
}

/// Deterministic synthetic market for all configured assets
pub struct SyntheticMarket {
    profiles: HashMap<String, SyntheticProfile>,
    walks: Mutex<HashMap<String, AssetWalk>>,
    seed: u64,
}

impl SyntheticMarket {
    pub fn new(seed: u64) -> Self {
        Self {
            profiles: HashMap::new(),
            walks: Mutex::new(HashMap::new()),
            seed,
        }
    }

    pub fn with_asset(mut self, asset: &str, profile: SyntheticProfile) -> Self {
        self.profiles.insert(asset.to_uppercase(), profile);
        self
    }

    pub fn profile(&self, asset: &str) -> Option<SyntheticProfile> {
        self.profiles.get(&asset.to_uppercase()).copied()
    }

    fn asset_seed(&self, asset: &str) -> u64 {
        // FNV-1a over the symbol, mixed with the market seed
        let mut hash: u64 = 0xcbf29ce484222325;
        for byte in asset.bytes() {
            hash ^= byte as u64;
            hash = hash.wrapping_mul(0x100000001b3);
        }
        hash ^ self.seed
    }

    fn profile_or_err(&self, asset: &str) -> Result<SyntheticProfile> {
        self.profile(asset)
            .ok_or_else(|| MarketDataError::AssetNotFound(asset.to_string()))
    }

    /// Generate `periods` daily points ending now. Does not advance the live walk.
    pub fn history(&self, asset: &str, periods: usize) -> Result<Vec<HistoricalPoint>> {
        let profile = self.profile_or_err(asset)?;
        let mut walk = AssetWalk::new(profile, self.asset_seed(asset).rotate_left(17));
        let now = Utc::now();

        let points = (0..periods)
            .map(|i| {
                let (price, volume) = walk.step();
                let age_days = (periods - i) as i64;
                HistoricalPoint {
                    timestamp: now - Duration::days(age_days),
                    price: Decimal::try_from(price).unwrap_or(Decimal::ONE),
                    volume: Decimal::try_from(volume).unwrap_or_default(),
                }
            })
            .collect();

        Ok(points)
    }

    /// Continue the asset's live walk from `price`, normally the last real
    /// observation, so fallback quotes stay continuous with live data.
    pub async fn anchor(&self, asset: &str, price: f64) -> Result<()> {
        let profile = self.profile_or_err(asset)?;
        if !(price.is_finite() && price > 0.0) {
            return Err(MarketDataError::InvalidResponse(format!(
                "cannot anchor {} at {}",
                asset, price
            )));
        }
        let key = asset.to_uppercase();

        let mut walks = self.walks.lock().await;
        walks
            .entry(key.clone())
            .or_insert_with(|| AssetWalk::new(profile, self.asset_seed(&key)))
            .last_price = price;
        Ok(())
    }

    /// Advance the asset's walk by one period and quote it
    pub async fn next_quote(&self, asset: &str) -> Result<Quote> {
        let profile = self.profile_or_err(asset)?;
        let key = asset.to_uppercase();

        let mut walks = self.walks.lock().await;
        let walk = walks
            .entry(key.clone())
            .or_insert_with(|| AssetWalk::new(profile, self.asset_seed(&key)));
        let previous = walk.last_price;
        let (price, volume) = walk.step();
        let change_24h = (price / previous - 1.0) * 100.0;

        Ok(Quote {
            asset: key,
            price: Decimal::try_from(price).unwrap_or(Decimal::ONE),
            volume: Decimal::try_from(volume).unwrap_or_default(),
            change_24h,
            source: "synthetic".to_string(),
            timestamp: Utc::now(),
        })
    }
}

#[async_trait::async_trait]
impl MarketDataProvider for SyntheticMarket {
    async fn get_historical_series(
        &self,
        asset: &str,
        periods: usize,
    ) -> Result<Vec<HistoricalPoint>> {
        self.history(asset, periods)
    }

    async fn get_realtime_quote(&self, asset: &str) -> Result<Quote> {
        self.next_quote(asset).await
    }

    async fn health(&self) -> SourceHealth {
        SourceHealth {
            source: "synthetic".to_string(),
            is_healthy: true,
            last_success: Some(Utc::now()),
            last_error: None,
            success_rate_24h: 1.0,
            avg_latency_ms: 0,
        }
    }

    fn name(&self) -> &str {
        "synthetic"
    }
}
