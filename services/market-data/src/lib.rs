pub mod types;
pub mod sources {
    pub mod coingecko;
    pub mod synthetic;
    pub mod tracker;
}
pub mod normalizers;

pub use types::*;
pub use sources::coingecko::CoinGeckoClient;
pub use sources::synthetic::{SyntheticMarket, SyntheticProfile};

use chrono::Utc;
use rust_decimal::prelude::ToPrimitive;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Maximum number of symbols in the last-known cache (prevent unbounded growth)
const MAX_CACHE_SIZE: usize = 1000;
/// Default age after which a last-known quote is no longer served
const DEFAULT_LAST_KNOWN_TTL_SECONDS: i64 = 300; // 5 minutes

/// Live sources with a mandatory timeout, backed by a last-known cache and a
/// synthetic market. Every call yields data; the outcome records where it came from.
pub struct FallbackProvider {
    sources: Vec<Arc<dyn MarketDataProvider>>,
    synthetic: Arc<SyntheticMarket>,
    last_known: Arc<RwLock<HashMap<String, Quote>>>,
    timeout: Duration,
    last_known_ttl: chrono::Duration,
}

impl FallbackProvider {
    pub fn new(synthetic: Arc<SyntheticMarket>, timeout: Duration) -> Self {
        Self {
            sources: Vec::new(),
            synthetic,
            last_known: Arc::new(RwLock::new(HashMap::new())),
            timeout,
            last_known_ttl: chrono::Duration::seconds(DEFAULT_LAST_KNOWN_TTL_SECONDS),
        }
    }

    /// Add a primary source. Earlier sources win when several succeed.
    pub fn add_source(&mut self, source: Arc<dyn MarketDataProvider>) {
        self.sources.push(source);
    }

    pub fn with_last_known_ttl(mut self, ttl: chrono::Duration) -> Self {
        self.last_known_ttl = ttl;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn synthetic(&self) -> &SyntheticMarket {
        &self.synthetic
    }

    fn timeout_error(&self, asset: &str) -> MarketDataError {
        MarketDataError::Timeout {
            asset: asset.to_string(),
            timeout_ms: self.timeout.as_millis() as u64,
        }
    }

    /// Fetch all primaries concurrently, each under the timeout. Returns the
    /// first valid quote in source order, or the most relevant failure.
    async fn fetch_primary_quote(&self, asset: &str) -> std::result::Result<Quote, MarketDataError> {
        if self.sources.is_empty() {
            return Err(MarketDataError::SourceUnhealthy(
                "No primary sources configured".to_string(),
            ));
        }

        let futures = self.sources.iter().map(|source| {
            let fut = source.get_realtime_quote(asset);
            async move {
                match tokio::time::timeout(self.timeout, fut).await {
                    Ok(result) => result,
                    Err(_) => Err(self.timeout_error(asset)),
                }
            }
        });
        let results = futures::future::join_all(futures).await;

        let mut first_error: Option<MarketDataError> = None;
        for (source, result) in self.sources.iter().zip(results) {
            match result.and_then(|q| normalizers::validate_quote(&q).map(|_| q)) {
                Ok(quote) => return Ok(quote),
                Err(e) => {
                    warn!("Source {} failed for {}: {}", source.name(), asset, e);
                    // Timeouts take precedence: they drive the caller's degradation logic
                    if first_error.as_ref().map_or(true, |prev| !prev.is_timeout() && e.is_timeout()) {
                        first_error = Some(e);
                    }
                }
            }
        }

        Err(first_error.unwrap_or_else(|| {
            MarketDataError::SourceUnhealthy("All sources failed".to_string())
        }))
    }

    async fn remember(&self, quote: &Quote) {
        // Later synthetic quotes continue from the latest live price
        if let Some(price) = quote.price.to_f64() {
            if let Err(e) = self.synthetic.anchor(&quote.asset, price).await {
                debug!("Synthetic walk for {} not anchored: {}", quote.asset, e);
            }
        }

        let mut cache = self.last_known.write().await;
        cache.insert(quote.asset.clone(), quote.clone());

        if cache.len() > MAX_CACHE_SIZE {
            let now = Utc::now();
            let ttl = self.last_known_ttl;
            let before_count = cache.len();
            cache.retain(|_, q| now - q.timestamp < ttl);
            debug!(
                "Last-known cache: evicted {} stale entries",
                before_count.saturating_sub(cache.len())
            );
        }
    }

    async fn fresh_last_known(&self, asset: &str) -> Option<Quote> {
        let cache = self.last_known.read().await;
        cache
            .get(asset)
            .filter(|q| Utc::now() - q.timestamp < self.last_known_ttl)
            .cloned()
    }

    /// Get a quote: live, else last-known within TTL, else synthetic.
    pub async fn quote(&self, asset: &str) -> Result<QuoteOutcome> {
        let key = asset.to_uppercase();

        let error = match self.fetch_primary_quote(&key).await {
            Ok(quote) => {
                self.remember(&quote).await;
                return Ok(QuoteOutcome {
                    quote,
                    origin: DataOrigin::Live,
                    error: None,
                });
            }
            Err(e) => e,
        };

        if let Some(quote) = self.fresh_last_known(&key).await {
            debug!("Serving last-known quote for {}", key);
            return Ok(QuoteOutcome {
                quote,
                origin: DataOrigin::LastKnown,
                error: Some(error),
            });
        }

        // Only an asset the synthetic market has no profile for can fail here
        let quote = self.synthetic.next_quote(&key).await?;
        Ok(QuoteOutcome {
            quote,
            origin: DataOrigin::Synthetic,
            error: if self.sources.is_empty() { None } else { Some(error) },
        })
    }

    /// Get normalized history: first primary that answers in time, else synthetic.
    pub async fn history(&self, asset: &str, periods: usize) -> Result<HistoryOutcome> {
        let key = asset.to_uppercase();
        let mut error = None;

        for source in &self.sources {
            let fetched = match tokio::time::timeout(
                self.timeout,
                source.get_historical_series(&key, periods),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(self.timeout_error(&key)),
            };

            match fetched {
                Ok(points) => {
                    let points = normalizers::tail(normalizers::normalize_history(points), periods);
                    if !points.is_empty() {
                        return Ok(HistoryOutcome {
                            points,
                            origin: DataOrigin::Live,
                            error: None,
                        });
                    }
                    error.get_or_insert(MarketDataError::InvalidResponse(format!(
                        "{} returned no usable history for {}",
                        source.name(),
                        key
                    )));
                }
                Err(e) => {
                    warn!("History fetch from {} failed for {}: {}", source.name(), key, e);
                    error.get_or_insert(e);
                }
            }
        }

        let points = self.synthetic.history(&key, periods)?;
        Ok(HistoryOutcome {
            points,
            origin: DataOrigin::Synthetic,
            error,
        })
    }

    /// Get health status of all primary sources plus the synthetic fallback
    pub async fn health_check(&self) -> Vec<SourceHealth> {
        let mut healths = Vec::with_capacity(self.sources.len() + 1);
        for source in &self.sources {
            healths.push(source.health().await);
        }
        healths.push(self.synthetic.health().await);
        healths
    }
}
