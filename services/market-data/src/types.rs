use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Latest quote for an asset from any source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub asset: String,           // "BTC", "ETH", etc.
    pub price: Decimal,
    pub volume: Decimal,         // Volume for the sampling period
    pub change_24h: f64,         // Percent change over 24h
    pub source: String,          // "coingecko", "synthetic"
    pub timestamp: DateTime<Utc>,
}

/// One historical sample (close-only; no OHLC from the upstream feeds)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalPoint {
    pub timestamp: DateTime<Utc>,
    pub price: Decimal,
    pub volume: Decimal,
}

/// Where a quote or history actually came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataOrigin {
    /// Fresh response from a primary source
    Live,
    /// Cached primary response still within its TTL
    LastKnown,
    /// Generated by the synthetic market
    Synthetic,
}

impl DataOrigin {
    pub fn is_fallback(&self) -> bool {
        !matches!(self, DataOrigin::Live)
    }
}

/// Quote plus provenance. Never an error: the fallback chain always yields a value.
#[derive(Debug, Clone)]
pub struct QuoteOutcome {
    pub quote: Quote,
    pub origin: DataOrigin,
    /// Failure that forced the fallback, if any
    pub error: Option<MarketDataError>,
}

/// History plus provenance.
#[derive(Debug, Clone)]
pub struct HistoryOutcome {
    pub points: Vec<HistoricalPoint>,
    pub origin: DataOrigin,
    pub error: Option<MarketDataError>,
}

/// Data source health/status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceHealth {
    pub source: String,
    pub is_healthy: bool,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub success_rate_24h: f64,
    pub avg_latency_ms: u64,
}

/// Error types for market data retrieval
#[derive(Debug, Clone, thiserror::Error)]
pub enum MarketDataError {
    #[error("API request failed: {0}")]
    ApiError(String),

    #[error("Rate limit exceeded for {source_name}")]
    RateLimit {
        source_name: String,
        retry_after: Option<u64>,
    },

    #[error("Invalid response format: {0}")]
    InvalidResponse(String),

    #[error("Asset not found: {0}")]
    AssetNotFound(String),

    #[error("Fetch for {asset} timed out after {timeout_ms}ms")]
    Timeout { asset: String, timeout_ms: u64 },

    #[error("Source unhealthy: {0}")]
    SourceUnhealthy(String),
}

impl MarketDataError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, MarketDataError::Timeout { .. })
    }
}

/// Result type for market data operations
pub type Result<T> = std::result::Result<T, MarketDataError>;

/// Market data provider consumed by the signal engine
#[async_trait::async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Get the last `periods` samples for an asset, oldest first
    async fn get_historical_series(
        &self,
        asset: &str,
        periods: usize,
    ) -> Result<Vec<HistoricalPoint>>;

    /// Get the current quote for an asset
    async fn get_realtime_quote(&self, asset: &str) -> Result<Quote>;

    /// Get source health status
    async fn health(&self) -> SourceHealth;

    /// Source name
    fn name(&self) -> &str;
}
