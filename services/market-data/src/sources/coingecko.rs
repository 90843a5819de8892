use crate::sources::tracker::RequestStats;
use crate::types::*;
use chrono::{DateTime, Utc};
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Semaphore};
use tracing::warn;

const COINGECKO_BASE: &str = "https://api.coingecko.com/api/v3";
const SOURCE: &str = "coingecko";
/// Spacing between consecutive requests
const MIN_REQUEST_SPACING: Duration = Duration::from_millis(100);
const MAX_RETRY_WAIT_SECS: u64 = 120;

/// CoinGecko coin ids for the symbols we track.
pub static COINGECKO_IDS: phf::Map<&'static str, &'static str> = phf::phf_map! {
    "BTC" => "bitcoin",
    "ETH" => "ethereum",
    "SOL" => "solana",
    "BNB" => "binancecoin",
    "XRP" => "ripple",
    "ADA" => "cardano",
    "DOGE" => "dogecoin",
    "AVAX" => "avalanche-2",
    "DOT" => "polkadot",
    "MATIC" => "matic-network",
    "LINK" => "chainlink",
    "USDC" => "usd-coin",
};

/// `/simple/price` entry for one coin
#[derive(Debug, Deserialize)]
struct SimplePrice {
    usd: f64,
    #[serde(default)]
    usd_24h_vol: f64,
    #[serde(default)]
    usd_24h_change: f64,
}

/// `/coins/{id}/market_chart`: `[[ts_ms, value], ...]` series
#[derive(Debug, Deserialize)]
struct MarketChart {
    prices: Vec<[f64; 2]>,
    #[serde(default)]
    total_volumes: Vec<[f64; 2]>,
}

enum Attempt<T> {
    Done(T),
    Throttled(Option<u64>),
}

/// CoinGecko REST source
///
/// Free tier allows roughly 10-30 calls/minute, so without an API key only
/// one request is in flight at a time.
pub struct CoinGeckoClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    permits: Semaphore,
    last_request: Mutex<Instant>,
    request_timeout: Duration,
    stats: RequestStats,
}

impl CoinGeckoClient {
    pub const REQUEST_TIMEOUT_SECS: u64 = 10;

    pub fn new(api_key: Option<String>) -> Self {
        Self::with_base_url(COINGECKO_BASE, api_key)
    }

    /// Point the client at another base URL (mock servers, proxies)
    pub fn with_base_url(base_url: &str, api_key: Option<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(10)
            .build()
            .unwrap_or_default();

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            permits: Semaphore::new(if api_key.is_some() { 5 } else { 1 }),
            api_key,
            last_request: Mutex::new(Instant::now() - MIN_REQUEST_SPACING),
            request_timeout: Duration::from_secs(Self::REQUEST_TIMEOUT_SECS),
            stats: RequestStats::default(),
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn coin_id(symbol: &str) -> Result<&'static str> {
        COINGECKO_IDS
            .get(symbol.to_uppercase().as_str())
            .copied()
            .ok_or_else(|| MarketDataError::AssetNotFound(symbol.to_string()))
    }

    pub fn supports_symbol(symbol: &str) -> bool {
        COINGECKO_IDS.contains_key(symbol.to_uppercase().as_str())
    }

    async fn pace(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(wait) = MIN_REQUEST_SPACING.checked_sub(last.elapsed()) {
            tokio::time::sleep(wait).await;
        }
        *last = Instant::now();
    }

    async fn send_once<T: DeserializeOwned>(&self, asset: &str, endpoint: &str) -> Result<Attempt<T>> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| MarketDataError::ApiError(e.to_string()))?;
        self.pace().await;

        let mut request = self.client.get(format!("{}{}", self.base_url, endpoint));
        if let Some(key) = &self.api_key {
            request = request.header("x-cg-pro-api-key", key);
        }

        let response = tokio::time::timeout(self.request_timeout, request.send())
            .await
            .map_err(|_| MarketDataError::Timeout {
                asset: asset.to_string(),
                timeout_ms: self.request_timeout.as_millis() as u64,
            })?
            .map_err(|e| MarketDataError::ApiError(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok());
            return Ok(Attempt::Throttled(retry_after));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MarketDataError::ApiError(format!(
                "CoinGecko returned {}: {}",
                status, body
            )));
        }

        response
            .json::<T>()
            .await
            .map(Attempt::Done)
            .map_err(|e| MarketDataError::InvalidResponse(e.to_string()))
    }

    /// GET `endpoint` and decode it, retrying once when throttled
    async fn get_json<T: DeserializeOwned>(&self, asset: &str, endpoint: &str) -> Result<T> {
        let started = Instant::now();

        let mut attempt = self.send_once(asset, endpoint).await;
        if let Ok(Attempt::Throttled(retry_after)) = attempt {
            let wait = retry_after.unwrap_or(60).min(MAX_RETRY_WAIT_SECS);
            warn!("CoinGecko throttled {} request, retrying in {}s", asset, wait);
            tokio::time::sleep(Duration::from_secs(wait)).await;
            attempt = self.send_once(asset, endpoint).await;
        }

        let result = match attempt {
            Ok(Attempt::Done(value)) => Ok(value),
            Ok(Attempt::Throttled(retry_after)) => Err(MarketDataError::RateLimit {
                source_name: SOURCE.to_string(),
                retry_after,
            }),
            Err(e) => Err(e),
        };

        match &result {
            Ok(_) => self.stats.record_success(started.elapsed()),
            Err(_) => self.stats.record_failure(),
        }
        result
    }

    /// Current USD price with 24h volume and change
    pub async fn get_quote(&self, asset: &str) -> Result<Quote> {
        let coin_id = Self::coin_id(asset)?;
        let endpoint = format!(
            "/simple/price?ids={}&vs_currencies=usd&include_24hr_vol=true&include_24hr_change=true",
            coin_id
        );

        let mut prices: HashMap<String, SimplePrice> = self.get_json(asset, &endpoint).await?;
        let entry = prices.remove(coin_id).ok_or_else(|| {
            MarketDataError::InvalidResponse(format!("Missing data for coin: {}", coin_id))
        })?;

        Ok(Quote {
            asset: asset.to_uppercase(),
            price: Decimal::try_from(entry.usd)
                .map_err(|e| MarketDataError::InvalidResponse(e.to_string()))?,
            volume: Decimal::try_from(entry.usd_24h_vol).unwrap_or_default(),
            change_24h: entry.usd_24h_change,
            source: SOURCE.to_string(),
            timestamp: Utc::now(),
        })
    }

    /// Daily close and volume for the last `periods` days, oldest first
    pub async fn get_history(&self, asset: &str, periods: usize) -> Result<Vec<HistoricalPoint>> {
        let coin_id = Self::coin_id(asset)?;
        let endpoint = format!(
            "/coins/{}/market_chart?vs_currency=usd&days={}&interval=daily",
            coin_id,
            periods.max(1)
        );

        let chart: MarketChart = self.get_json(asset, &endpoint).await?;
        let volumes = chart.total_volumes;

        Ok(chart
            .prices
            .into_iter()
            .enumerate()
            .filter_map(|(i, [ts_ms, price])| {
                let volume = volumes.get(i).map_or(0.0, |[_, v]| *v);
                Some(HistoricalPoint {
                    timestamp: DateTime::from_timestamp_millis(ts_ms as i64)?,
                    price: Decimal::try_from(price).ok()?,
                    volume: Decimal::try_from(volume).unwrap_or_default(),
                })
            })
            .collect())
    }

    /// Health from recorded request outcomes (no API call)
    pub fn health(&self) -> SourceHealth {
        self.stats.report(SOURCE)
    }
}

#[async_trait::async_trait]
impl MarketDataProvider for CoinGeckoClient {
    async fn get_historical_series(
        &self,
        asset: &str,
        periods: usize,
    ) -> Result<Vec<HistoricalPoint>> {
        self.get_history(asset, periods).await
    }

    async fn get_realtime_quote(&self, asset: &str) -> Result<Quote> {
        self.get_quote(asset).await
    }

    async fn health(&self) -> SourceHealth {
        CoinGeckoClient::health(self)
    }

    fn name(&self) -> &str {
        SOURCE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_supports_symbol() {
        assert!(CoinGeckoClient::supports_symbol("BTC"));
        assert!(CoinGeckoClient::supports_symbol("eth"));
        assert!(!CoinGeckoClient::supports_symbol("FAKE"));
    }

    #[tokio::test]
    async fn test_get_quote_parses_simple_price() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/simple/price"))
            .and(query_param("ids", "bitcoin"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "bitcoin": {
                    "usd": 65000.5,
                    "usd_24h_vol": 1200000.0,
                    "usd_24h_change": -2.5
                }
            })))
            .mount(&server)
            .await;

        let client = CoinGeckoClient::with_base_url(&server.uri(), None);
        let quote = client.get_quote("btc").await.unwrap();

        assert_eq!(quote.asset, "BTC");
        assert_eq!(quote.source, "coingecko");
        assert_eq!(quote.price, Decimal::try_from(65000.5).unwrap());
        assert_eq!(quote.change_24h, -2.5);
        assert!(client.health().is_healthy);
    }

    #[tokio::test]
    async fn test_get_history_zips_prices_and_volumes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/coins/ethereum/market_chart"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "prices": [[1700000000000.0, 2000.0], [1700086400000.0, 2050.0]],
                "total_volumes": [[1700000000000.0, 500.0], [1700086400000.0, 650.0]]
            })))
            .mount(&server)
            .await;

        let client = CoinGeckoClient::with_base_url(&server.uri(), None);
        let history = client.get_history("ETH", 2).await.unwrap();

        assert_eq!(history.len(), 2);
        assert_eq!(history[1].price, Decimal::from(2050));
        assert_eq!(history[1].volume, Decimal::from(650));
        assert!(history[0].timestamp < history[1].timestamp);
    }

    #[tokio::test]
    async fn test_slow_response_maps_to_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/simple/price"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"solana": {"usd": 150.0}}))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let client = CoinGeckoClient::with_base_url(&server.uri(), None)
            .with_request_timeout(Duration::from_millis(50));
        let err = client.get_quote("SOL").await.unwrap_err();

        assert!(err.is_timeout());
        assert!(!client.health().is_healthy);
    }

    #[tokio::test]
    async fn test_server_error_is_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/simple/price"))
            .respond_with(ResponseTemplate::new(500).set_body_string("upstream down"))
            .mount(&server)
            .await;

        let client = CoinGeckoClient::with_base_url(&server.uri(), None);
        let err = client.get_quote("ETH").await.unwrap_err();
        assert!(matches!(err, MarketDataError::ApiError(msg) if msg.contains("upstream down")));
    }

    #[tokio::test]
    async fn test_unknown_symbol_is_not_found() {
        let client = CoinGeckoClient::new(None);
        let err = client.get_quote("NOPE").await.unwrap_err();
        assert!(matches!(err, MarketDataError::AssetNotFound(_)));
    }
}
