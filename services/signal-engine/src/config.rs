//! Engine configuration
//!
//! Layered: serde defaults, then an optional file named by `SIGNAL_ENGINE_CONFIG`,
//! then `SIGNAL_ENGINE__SECTION__KEY` environment variables. `.env` is read first.

use market_data::SyntheticProfile;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::{EngineError, Result};

/// Environment variable naming an optional config file
pub const CONFIG_PATH_VAR: &str = "SIGNAL_ENGINE_CONFIG";
const ENV_PREFIX: &str = "SIGNAL_ENGINE";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    #[serde(default = "default_assets")]
    pub assets: Vec<AssetConfig>,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub indicators: IndicatorConfig,
    #[serde(default)]
    pub volatility: VolatilityConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub cycle: CycleConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub data: DataConfig,
}

/// One tracked asset and its static priors
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AssetConfig {
    pub symbol: String,
    pub base_price: f64,
    /// Annualized (0.6 = 60%)
    pub base_volatility: f64,
    #[serde(default)]
    pub drift: f64,
    #[serde(default = "default_win_rate")]
    pub win_rate: f64,
    /// Average winning trade return (0.04 = 4%)
    #[serde(default = "default_avg_win")]
    pub avg_win: f64,
    #[serde(default = "default_avg_loss")]
    pub avg_loss: f64,
}

impl AssetConfig {
    pub fn new(symbol: &str, base_price: f64, base_volatility: f64) -> Self {
        Self {
            symbol: symbol.to_string(),
            base_price,
            base_volatility,
            drift: 0.0,
            win_rate: default_win_rate(),
            avg_win: default_avg_win(),
            avg_loss: default_avg_loss(),
        }
    }

    pub fn synthetic_profile(&self) -> SyntheticProfile {
        SyntheticProfile::new(self.base_price, self.base_volatility, self.drift)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HistoryConfig {
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    #[serde(default = "default_min_points")]
    pub min_points: usize,
    /// Points requested from providers when an asset is first seeded
    #[serde(default = "default_bootstrap_periods")]
    pub bootstrap_periods: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            min_points: default_min_points(),
            bootstrap_periods: default_bootstrap_periods(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IndicatorConfig {
    #[serde(default = "default_longest_period")]
    pub longest_period: usize,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            longest_period: default_longest_period(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VolatilityConfig {
    #[serde(default = "default_ewma_lambda")]
    pub ewma_lambda: f64,
    #[serde(default = "default_vol_window")]
    pub window: usize,
    #[serde(default = "default_garch_omega")]
    pub garch_omega: f64,
    #[serde(default = "default_garch_alpha")]
    pub garch_alpha: f64,
    #[serde(default = "default_garch_beta")]
    pub garch_beta: f64,
    /// Estimates retained per asset for trend queries
    #[serde(default = "default_vol_history_len")]
    pub history_len: usize,
    /// Forecast ceiling as a multiple of the asset's historical max
    #[serde(default = "default_max_multiple")]
    pub max_multiple: f64,
}

impl Default for VolatilityConfig {
    fn default() -> Self {
        Self {
            ewma_lambda: default_ewma_lambda(),
            window: default_vol_window(),
            garch_omega: default_garch_omega(),
            garch_alpha: default_garch_alpha(),
            garch_beta: default_garch_beta(),
            history_len: default_vol_history_len(),
            max_multiple: default_max_multiple(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RiskConfig {
    #[serde(default = "default_kelly_cap")]
    pub kelly_cap: f64,
    #[serde(default = "default_max_position")]
    pub max_position: f64,
    #[serde(default = "default_max_drawdown")]
    pub max_drawdown: f64,
    /// Annualized volatility above which positions are halved
    #[serde(default = "default_volatility_ceiling")]
    pub volatility_ceiling: f64,
    #[serde(default = "default_stop_atr_multiple")]
    pub stop_atr_multiple: f64,
    #[serde(default = "default_take_profit_atr_multiple")]
    pub take_profit_atr_multiple: f64,
    /// Realized outcomes needed before they replace the configured Kelly priors
    #[serde(default = "default_min_trade_outcomes")]
    pub min_trade_outcomes: usize,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            kelly_cap: default_kelly_cap(),
            max_position: default_max_position(),
            max_drawdown: default_max_drawdown(),
            volatility_ceiling: default_volatility_ceiling(),
            stop_atr_multiple: default_stop_atr_multiple(),
            take_profit_atr_multiple: default_take_profit_atr_multiple(),
            min_trade_outcomes: default_min_trade_outcomes(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CycleConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,
    /// Upper bound on the fetch phase of one cycle
    #[serde(default = "default_watchdog_secs")]
    pub watchdog_secs: u64,
    /// Consecutive fetch failures before an asset is marked degraded
    #[serde(default = "default_degraded_threshold")]
    pub degraded_threshold: u32,
    #[serde(default = "default_degraded_skip_cycles")]
    pub degraded_skip_cycles: u32,
    #[serde(default = "default_tick_buffer")]
    pub tick_buffer: usize,
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            fetch_timeout_ms: default_fetch_timeout_ms(),
            watchdog_secs: default_watchdog_secs(),
            degraded_threshold: default_degraded_threshold(),
            degraded_skip_cycles: default_degraded_skip_cycles(),
            tick_buffer: default_tick_buffer(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
        }
    }
}

/// Market data wiring
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DataConfig {
    /// Query CoinGecko; when false the engine runs on synthetic data only
    #[serde(default = "default_live")]
    pub live: bool,
    #[serde(default)]
    pub coingecko_api_key: Option<String>,
    #[serde(default = "default_synthetic_seed")]
    pub synthetic_seed: u64,
    #[serde(default = "default_last_known_ttl_secs")]
    pub last_known_ttl_secs: i64,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            live: default_live(),
            coingecko_api_key: None,
            synthetic_seed: default_synthetic_seed(),
            last_known_ttl_secs: default_last_known_ttl_secs(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            assets: default_assets(),
            history: HistoryConfig::default(),
            indicators: IndicatorConfig::default(),
            volatility: VolatilityConfig::default(),
            risk: RiskConfig::default(),
            cycle: CycleConfig::default(),
            server: ServerConfig::default(),
            data: DataConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load from `.env`, the optional config file and the environment, then validate
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut builder = config::Config::builder();
        if let Ok(path) = std::env::var(CONFIG_PATH_VAR) {
            builder = builder.add_source(config::File::with_name(&path));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

        let cfg: EngineConfig = builder.build()?.try_deserialize()?;
        cfg.validated()
    }

    /// Parse an inline document (toml, yaml, json) and validate
    pub fn from_document(contents: &str, format: config::FileFormat) -> Result<Self> {
        let cfg: EngineConfig = config::Config::builder()
            .add_source(config::File::from_str(contents, format))
            .build()?
            .try_deserialize()?;
        cfg.validated()
    }

    /// Upper-case and trim every symbol, then validate
    pub(crate) fn validated(mut self) -> Result<Self> {
        for asset in &mut self.assets {
            asset.symbol = asset.symbol.trim().to_uppercase();
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.assets.is_empty() {
            return Err(invalid("at least one asset must be configured"));
        }

        let mut seen = HashSet::new();
        for asset in &self.assets {
            let symbol = asset.symbol.to_uppercase();
            if symbol.is_empty() {
                return Err(invalid("asset symbol must not be empty"));
            }
            if !seen.insert(symbol.clone()) {
                return Err(invalid(format!("duplicate asset {}", symbol)));
            }
            if !(asset.base_price.is_finite() && asset.base_price > 0.0) {
                return Err(invalid(format!("{}: base_price must be positive", symbol)));
            }
            if !(asset.base_volatility.is_finite() && asset.base_volatility > 0.0) {
                return Err(invalid(format!("{}: base_volatility must be positive", symbol)));
            }
            if !asset.drift.is_finite() {
                return Err(invalid(format!("{}: drift must be finite", symbol)));
            }
            if !(0.0..=1.0).contains(&asset.win_rate) {
                return Err(invalid(format!("{}: win_rate must be within [0, 1]", symbol)));
            }
            if !(asset.avg_win >= 0.0 && asset.avg_loss >= 0.0) {
                return Err(invalid(format!(
                    "{}: avg_win and avg_loss must be non-negative",
                    symbol
                )));
            }
        }

        let history = &self.history;
        if !(200..=1000).contains(&history.capacity) {
            return Err(invalid(format!(
                "history.capacity must be within 200..=1000, got {}",
                history.capacity
            )));
        }
        if history.min_points < 2 {
            return Err(invalid("history.min_points must be at least 2"));
        }

        if self.indicators.longest_period == 0 {
            return Err(invalid("indicators.longest_period must be positive"));
        }

        let vol = &self.volatility;
        if !(vol.ewma_lambda > 0.0 && vol.ewma_lambda < 1.0) {
            return Err(invalid("volatility.ewma_lambda must be within (0, 1)"));
        }
        if vol.window < 2 {
            return Err(invalid("volatility.window must be at least 2"));
        }
        if !(vol.garch_omega > 0.0 && vol.garch_alpha >= 0.0 && vol.garch_beta >= 0.0) {
            return Err(invalid("GARCH parameters require omega > 0, alpha >= 0, beta >= 0"));
        }
        if vol.garch_alpha + vol.garch_beta >= 1.0 {
            return Err(invalid("GARCH alpha + beta must be below 1"));
        }
        if vol.history_len == 0 || !(vol.max_multiple > 0.0) {
            return Err(invalid(
                "volatility.history_len and volatility.max_multiple must be positive",
            ));
        }

        let risk = &self.risk;
        for (name, value) in [
            ("risk.kelly_cap", risk.kelly_cap),
            ("risk.max_position", risk.max_position),
            ("risk.max_drawdown", risk.max_drawdown),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(invalid(format!("{} must be within (0, 1]", name)));
            }
        }
        if !(risk.volatility_ceiling > 0.0
            && risk.stop_atr_multiple > 0.0
            && risk.take_profit_atr_multiple > 0.0)
        {
            return Err(invalid(
                "risk.volatility_ceiling and ATR multiples must be positive",
            ));
        }

        let cycle = &self.cycle;
        if cycle.interval_secs == 0 || cycle.fetch_timeout_ms == 0 || cycle.watchdog_secs == 0 {
            return Err(invalid("cycle intervals and timeouts must be positive"));
        }
        if cycle.degraded_threshold == 0 || cycle.tick_buffer == 0 {
            return Err(invalid(
                "cycle.degraded_threshold and cycle.tick_buffer must be positive",
            ));
        }

        Ok(())
    }

    pub fn asset(&self, symbol: &str) -> Option<&AssetConfig> {
        let symbol = symbol.to_uppercase();
        self.assets.iter().find(|a| a.symbol == symbol)
    }
}

fn invalid(msg: impl Into<String>) -> EngineError {
    EngineError::Configuration(msg.into())
}

fn default_assets() -> Vec<AssetConfig> {
    vec![
        AssetConfig {
            drift: 0.15,
            ..AssetConfig::new("BTC", 65_000.0, 0.6)
        },
        AssetConfig {
            drift: 0.10,
            ..AssetConfig::new("ETH", 3_500.0, 0.75)
        },
        AssetConfig {
            drift: 0.10,
            ..AssetConfig::new("SOL", 150.0, 0.9)
        },
    ]
}

fn default_win_rate() -> f64 { 0.55 }
fn default_avg_win() -> f64 { 0.04 }
fn default_avg_loss() -> f64 { 0.025 }
fn default_capacity() -> usize { 500 }
fn default_min_points() -> usize { 2 }
fn default_bootstrap_periods() -> usize { 200 }
fn default_longest_period() -> usize { 50 }
fn default_ewma_lambda() -> f64 { 0.94 }
fn default_vol_window() -> usize { 20 }
fn default_garch_omega() -> f64 { 1e-5 }
fn default_garch_alpha() -> f64 { 0.1 }
fn default_garch_beta() -> f64 { 0.85 }
fn default_vol_history_len() -> usize { 100 }
fn default_max_multiple() -> f64 { 10.0 }
fn default_kelly_cap() -> f64 { 0.25 }
fn default_max_position() -> f64 { 0.10 }
fn default_max_drawdown() -> f64 { 0.20 }
fn default_volatility_ceiling() -> f64 { 1.5 }
fn default_stop_atr_multiple() -> f64 { 2.0 }
fn default_take_profit_atr_multiple() -> f64 { 3.0 }
fn default_min_trade_outcomes() -> usize { 20 }
fn default_interval_secs() -> u64 { 30 }
fn default_fetch_timeout_ms() -> u64 { 5_000 }
fn default_watchdog_secs() -> u64 { 20 }
fn default_degraded_threshold() -> u32 { 3 }
fn default_degraded_skip_cycles() -> u32 { 5 }
fn default_tick_buffer() -> usize { 1024 }
fn default_port() -> u16 { 8080 }
fn default_live() -> bool { true }
fn default_synthetic_seed() -> u64 { 42 }
fn default_last_known_ttl_secs() -> i64 { 300 }

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;

    #[test]
    fn test_defaults_are_valid() {
        let cfg = EngineConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.history.capacity, 500);
        assert_eq!(cfg.volatility.ewma_lambda, 0.94);
        assert_eq!(cfg.risk.kelly_cap, 0.25);
        assert_eq!(cfg.cycle.interval_secs, 30);
    }

    #[test]
    fn test_from_toml_fills_defaults_and_uppercases() {
        let cfg = EngineConfig::from_document(
            r#"
            [[assets]]
            symbol = "btc"
            base_price = 60000.0
            base_volatility = 0.55

            [risk]
            max_drawdown = 0.15
            "#,
            FileFormat::Toml,
        )
        .unwrap();

        assert_eq!(cfg.assets.len(), 1);
        assert_eq!(cfg.assets[0].symbol, "BTC");
        assert_eq!(cfg.assets[0].win_rate, 0.55);
        assert_eq!(cfg.risk.max_drawdown, 0.15);
        assert_eq!(cfg.risk.max_position, 0.10);
        assert!(cfg.asset("btc").is_some());
    }

    #[test]
    fn test_capacity_out_of_range_is_rejected() {
        let mut cfg = EngineConfig::default();
        cfg.history.capacity = 100;
        assert!(matches!(cfg.validate(), Err(EngineError::Configuration(_))));

        cfg.history.capacity = 1001;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_duplicate_symbol_is_rejected() {
        let mut cfg = EngineConfig::default();
        cfg.assets.push(AssetConfig::new("btc", 1.0, 0.5));
        assert!(cfg.validated().is_err());
    }

    #[test]
    fn test_explosive_garch_is_rejected() {
        let mut cfg = EngineConfig::default();
        cfg.volatility.garch_alpha = 0.2;
        cfg.volatility.garch_beta = 0.8;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_invalid_win_rate_is_rejected() {
        let mut cfg = EngineConfig::default();
        cfg.assets[0].win_rate = 1.5;
        assert!(cfg.validate().is_err());
    }
}
