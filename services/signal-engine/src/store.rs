//! Bounded per-asset price history
//!
//! Each asset keeps one ring buffer of tick records, so price, volume and
//! return fields are always evicted together.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use tracing::warn;

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::stats;

/// One accepted tick plus the values derived from it on arrival
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TickRecord {
    pub timestamp: DateTime<Utc>,
    pub price: f64,
    pub volume: f64,
    pub simple_return: f64,
    pub log_return: f64,
    /// Annualized volatility of the trailing log returns; 0 until the window fills
    pub rolling_volatility: f64,
}

#[derive(Debug, Clone)]
pub struct AssetSeries {
    symbol: String,
    records: VecDeque<TickRecord>,
    capacity: usize,
    volatility_window: usize,
    /// Front record is the asset's first tick and has no real return
    front_is_seed: bool,
}

impl AssetSeries {
    pub fn new(symbol: &str, capacity: usize, volatility_window: usize) -> Self {
        Self {
            symbol: symbol.to_uppercase(),
            records: VecDeque::with_capacity(capacity),
            capacity,
            volatility_window,
            front_is_seed: false,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn latest(&self) -> Option<&TickRecord> {
        self.records.back()
    }

    pub fn records(&self) -> impl Iterator<Item = &TickRecord> + '_ {
        self.records.iter()
    }

    pub fn append(&mut self, price: f64, volume: f64, timestamp: DateTime<Utc>) -> Result<()> {
        if !price.is_finite() || price <= 0.0 {
            return Err(self.invalid(format!("price must be positive and finite, got {}", price)));
        }
        if !volume.is_finite() || volume < 0.0 {
            return Err(self.invalid(format!(
                "volume must be non-negative and finite, got {}",
                volume
            )));
        }

        let (simple_return, log_return) = match self.records.back() {
            Some(prev) => {
                if timestamp <= prev.timestamp {
                    return Err(self.invalid(format!(
                        "timestamp {} is not after {}",
                        timestamp, prev.timestamp
                    )));
                }
                (price / prev.price - 1.0, (price / prev.price).ln())
            }
            None => {
                self.front_is_seed = true;
                (0.0, 0.0)
            }
        };

        self.records.push_back(TickRecord {
            timestamp,
            price,
            volume,
            simple_return,
            log_return,
            rolling_volatility: 0.0,
        });

        while self.records.len() > self.capacity {
            self.records.pop_front();
            self.front_is_seed = false;
        }

        let rolling = self.trailing_volatility(self.volatility_window);
        if let Some(last) = self.records.back_mut() {
            last.rolling_volatility = rolling.unwrap_or(0.0);
        }

        Ok(())
    }

    fn invalid(&self, reason: String) -> EngineError {
        EngineError::InvalidTick {
            asset: self.symbol.clone(),
            reason,
        }
    }

    fn return_records(&self) -> impl Iterator<Item = &TickRecord> + '_ {
        self.records.iter().skip(usize::from(self.front_is_seed))
    }

    pub fn prices(&self) -> Vec<f64> {
        self.records.iter().map(|r| r.price).collect()
    }

    pub fn volumes(&self) -> Vec<f64> {
        self.records.iter().map(|r| r.volume).collect()
    }

    /// Simple returns, excluding the seed tick while it is held
    pub fn returns(&self) -> Vec<f64> {
        self.return_records().map(|r| r.simple_return).collect()
    }

    pub fn log_returns(&self) -> Vec<f64> {
        self.return_records().map(|r| r.log_return).collect()
    }

    pub fn rolling_volatilities(&self) -> Vec<f64> {
        self.records.iter().map(|r| r.rolling_volatility).collect()
    }

    /// Annualized sample stdev of the last `window` log returns
    pub fn trailing_volatility(&self, window: usize) -> Option<f64> {
        let log_returns = self.log_returns();
        if window < 2 || log_returns.len() < window {
            return None;
        }
        let tail = &log_returns[log_returns.len() - window..];
        stats::sample_std_dev(tail).map(stats::annualize)
    }

    /// Drawdown of the latest price from the in-window peak, in [0, 1)
    pub fn drawdown(&self) -> f64 {
        let peak = self.records.iter().map(|r| r.price).fold(0.0_f64, f64::max);
        match self.latest() {
            Some(last) if peak > 0.0 => (1.0 - last.price / peak).max(0.0),
            _ => 0.0,
        }
    }
}

/// Store of every configured asset's series
#[derive(Debug, Clone)]
pub struct TimeSeriesStore {
    series: HashMap<String, AssetSeries>,
    min_points: usize,
}

impl TimeSeriesStore {
    pub fn new<'a>(
        symbols: impl IntoIterator<Item = &'a str>,
        capacity: usize,
        min_points: usize,
        volatility_window: usize,
    ) -> Self {
        let series = symbols
            .into_iter()
            .map(|s| {
                let series = AssetSeries::new(s, capacity, volatility_window);
                (series.symbol().to_string(), series)
            })
            .collect();
        Self { series, min_points }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(
            config.assets.iter().map(|a| a.symbol.as_str()),
            config.history.capacity,
            config.history.min_points,
            config.volatility.window,
        )
    }

    /// Append one tick. Invalid ticks are logged and rejected without touching the series.
    pub fn append_tick(
        &mut self,
        asset: &str,
        price: f64,
        volume: f64,
        timestamp: DateTime<Utc>,
    ) -> Result<()> {
        let key = asset.to_uppercase();
        let series = self
            .series
            .get_mut(&key)
            .ok_or_else(|| EngineError::UnknownAsset(key.clone()))?;

        series.append(price, volume, timestamp).map_err(|e| {
            warn!("Dropping tick: {}", e);
            e
        })
    }

    /// The most recent `lookback` records (all of them if fewer are held)
    pub fn get_series(&self, asset: &str, lookback: usize) -> Result<Vec<TickRecord>> {
        let series = self.series(asset)?;
        if series.len() < self.min_points {
            return Err(EngineError::InsufficientHistory {
                asset: series.symbol().to_string(),
                have: series.len(),
                need: self.min_points,
            });
        }
        let skip = series.len().saturating_sub(lookback);
        Ok(series.records().skip(skip).copied().collect())
    }

    pub fn series(&self, asset: &str) -> Result<&AssetSeries> {
        let key = asset.to_uppercase();
        self.series
            .get(&key)
            .ok_or(EngineError::UnknownAsset(key))
    }

    pub fn contains(&self, asset: &str) -> bool {
        self.series.contains_key(&asset.to_uppercase())
    }

    pub fn symbols(&self) -> impl Iterator<Item = &str> + '_ {
        self.series.keys().map(String::as_str)
    }

    pub fn clear(&mut self) {
        self.series.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn store(capacity: usize) -> TimeSeriesStore {
        TimeSeriesStore::new(["BTC", "ETH"], capacity, 2, 20)
    }

    fn ts(i: i64) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap() + Duration::minutes(i)
    }

    #[test]
    fn test_append_computes_returns() {
        let mut s = store(200);
        s.append_tick("btc", 100.0, 1.0, ts(0)).unwrap();
        s.append_tick("BTC", 110.0, 1.0, ts(1)).unwrap();

        let series = s.series("BTC").unwrap();
        let last = series.latest().unwrap();
        assert!((last.simple_return - 0.1).abs() < 1e-12);
        assert!((last.log_return - (1.1_f64).ln()).abs() < 1e-12);
        // seed tick is excluded from return statistics
        assert_eq!(series.returns().len(), 1);
    }

    #[test]
    fn test_rejects_invalid_ticks() {
        let mut s = store(200);
        s.append_tick("BTC", 100.0, 1.0, ts(5)).unwrap();

        assert!(matches!(
            s.append_tick("BTC", 0.0, 1.0, ts(6)),
            Err(EngineError::InvalidTick { .. })
        ));
        assert!(s.append_tick("BTC", 100.0, -1.0, ts(6)).is_err());
        assert!(s.append_tick("BTC", f64::NAN, 1.0, ts(6)).is_err());
        assert!(s.append_tick("BTC", 101.0, 1.0, ts(5)).is_err());
        assert!(s.append_tick("BTC", 101.0, 1.0, ts(4)).is_err());
        assert!(matches!(
            s.append_tick("DOGE", 1.0, 1.0, ts(7)),
            Err(EngineError::UnknownAsset(_))
        ));

        assert_eq!(s.series("BTC").unwrap().len(), 1);
        assert!(s.series("ETH").unwrap().is_empty());
    }

    #[test]
    fn test_capacity_is_never_exceeded() {
        let mut s = store(200);
        let mut previous_len = 0;
        for i in 0..450 {
            s.append_tick("ETH", 100.0 + i as f64, 10.0, ts(i)).unwrap();
            let len = s.series("ETH").unwrap().len();
            assert!(len >= previous_len);
            assert!(len <= 200);
            previous_len = len;
        }

        let series = s.series("ETH").unwrap();
        assert_eq!(series.len(), 200);
        assert_eq!(series.records().next().unwrap().price, 350.0);
        // seed tick was evicted, every held record now has a real return
        assert_eq!(series.returns().len(), 200);
    }

    #[test]
    fn test_get_series_lookback_and_minimum() {
        let mut s = store(200);
        s.append_tick("BTC", 100.0, 1.0, ts(0)).unwrap();
        assert!(matches!(
            s.get_series("BTC", 10),
            Err(EngineError::InsufficientHistory { have: 1, need: 2, .. })
        ));

        for i in 1..30 {
            s.append_tick("BTC", 100.0 + i as f64, 1.0, ts(i)).unwrap();
        }
        let tail = s.get_series("BTC", 10).unwrap();
        assert_eq!(tail.len(), 10);
        assert_eq!(tail.last().unwrap().price, 129.0);
        assert_eq!(s.get_series("BTC", 1000).unwrap().len(), 30);
    }

    #[test]
    fn test_rolling_volatility_fills_after_window() {
        let mut s = store(200);
        for i in 0..25 {
            let price = if i % 2 == 0 { 100.0 } else { 102.0 };
            s.append_tick("BTC", price, 1.0, ts(i)).unwrap();
        }
        let vols = s.series("BTC").unwrap().rolling_volatilities();
        assert_eq!(vols[10], 0.0);
        assert!(vols[24] > 0.0);
    }

    #[test]
    fn test_drawdown_from_peak() {
        let mut s = store(200);
        for (i, p) in [100.0, 120.0, 90.0].iter().enumerate() {
            s.append_tick("BTC", *p, 1.0, ts(i as i64)).unwrap();
        }
        assert!((s.series("BTC").unwrap().drawdown() - 0.25).abs() < 1e-12);
    }
}
