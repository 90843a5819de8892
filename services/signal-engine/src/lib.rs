pub mod config;
pub mod error;
pub mod stats;
pub mod store;
pub mod indicators;
pub mod volatility;
pub mod regime;
pub mod signals;
pub mod combiner;
pub mod risk;
pub mod engine;
pub mod prediction;
pub mod runner;
pub mod handlers;

pub use combiner::{CombinedSignal, Direction, SignalCombiner};
pub use config::EngineConfig;
pub use engine::{AssetAnalysis, CycleSnapshot, SignalEngine};
pub use error::{EngineError, Result};
pub use indicators::{IndicatorEngine, IndicatorSet};
pub use prediction::{Prediction, PredictionService};
pub use regime::{MarketRegime, RegimeDetector, TrendRegime, VolatilityRegime};
pub use risk::{OverrideReason, RiskAdjustedRecommendation, RiskManager};
pub use runner::{EngineRunner, Tick};
pub use signals::{SignalGenerator, SignalOpinion, SignalSource};
pub use store::TimeSeriesStore;
pub use volatility::{VolatilityEstimate, VolatilityForecast, VolatilityModel};
