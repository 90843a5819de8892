use market_data::MarketDataError;

/// Error types for the signal engine
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    /// Malformed or out-of-order tick. Dropped; only the asset it targets is affected.
    #[error("Invalid tick for {asset}: {reason}")]
    InvalidTick { asset: String, reason: String },

    #[error("Insufficient history for {asset}: have {have} points, need {need}")]
    InsufficientHistory {
        asset: String,
        have: usize,
        need: usize,
    },

    #[error("External fetch for {asset} timed out after {timeout_ms}ms")]
    ExternalFetchTimeout { asset: String, timeout_ms: u64 },

    #[error("Market data fetch failed: {0}")]
    Fetch(String),

    /// Fatal at startup only
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Unknown asset: {0}")]
    UnknownAsset(String),

    #[error("Invalid horizon {0}: must be at least 1")]
    InvalidHorizon(i64),
}

impl From<MarketDataError> for EngineError {
    fn from(err: MarketDataError) -> Self {
        match err {
            MarketDataError::Timeout { asset, timeout_ms } => {
                EngineError::ExternalFetchTimeout { asset, timeout_ms }
            }
            MarketDataError::AssetNotFound(asset) => EngineError::UnknownAsset(asset),
            other => EngineError::Fetch(other.to_string()),
        }
    }
}

impl From<config::ConfigError> for EngineError {
    fn from(err: config::ConfigError) -> Self {
        EngineError::Configuration(err.to_string())
    }
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;
