//! End-to-end engine scenarios
//!
//! ticks → store → indicators/volatility → regime → opinions → combine → risk → prediction

mod mock_provider;

use chrono::{DateTime, Duration, Utc};
use market_data::DataOrigin;
use mock_provider::{fallback_provider, MockMarketSource};
use signal_engine::{
    indicators::oscillators, volatility::ewma_variance, Direction, EngineConfig, EngineRunner,
    OverrideReason, SignalEngine, Tick, TrendRegime,
};
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio::sync::watch;
use tokio_test::{assert_err, assert_ok};

fn feed(engine: &mut SignalEngine, asset: &str, prices: &[f64]) -> DateTime<Utc> {
    let start = Utc::now() - Duration::days(prices.len() as i64 + 1);
    for (i, price) in prices.iter().enumerate() {
        engine
            .ingest_tick(asset, *price, 1_000.0, start + Duration::days(i as i64))
            .unwrap();
    }
    Utc::now()
}

#[test]
fn test_flat_ticks_give_rsi_100() {
    let mut engine = SignalEngine::new(EngineConfig::default()).unwrap();
    let now = feed(&mut engine, "BTC", &[100.0; 25]);

    let snapshot = engine.run_cycle(now);
    let btc = snapshot.asset("BTC").unwrap();
    assert_eq!(btc.indicators.rsi_14, Some(100.0));
    assert_eq!(oscillators::rsi(&[100.0; 25], 14), Some(100.0));
}

#[test]
fn test_rising_series_is_bull_with_sma_cross() {
    let mut engine = SignalEngine::new(EngineConfig::default()).unwrap();
    let prices: Vec<f64> = (0..60).map(|i| 100.0 + 60.0 * i as f64 / 59.0).collect();
    let now = feed(&mut engine, "BTC", &prices);

    let snapshot = engine.run_cycle(now);
    let ind = &snapshot.asset("BTC").unwrap().indicators;
    assert!(ind.sma_20.unwrap() > ind.sma_50.unwrap());
    assert_eq!(snapshot.regime.trend, TrendRegime::Bull);
}

#[test]
fn test_ewma_matches_hand_computation() {
    let returns = [0.01, -0.02, 0.015, -0.005, 0.03];
    let variance = ewma_variance(&returns, 0.94).unwrap();
    assert!((variance - 1.65347512e-4).abs() < 1e-6);
}

#[test]
fn test_drawdown_beyond_max_forces_neutral() {
    let mut config = EngineConfig::default();
    config.risk.max_drawdown = 0.2;
    let mut engine = SignalEngine::new(config.clone()).unwrap();
    let prices: Vec<f64> = (0..60).map(|i| 100.0 + i as f64).collect();
    let now = feed(&mut engine, "SOL", &prices);
    engine.set_portfolio_drawdown(0.25);

    let (tx, rx) = watch::channel(None);
    let predictions = signal_engine::PredictionService::new(rx, &config.assets);
    tx.send_replace(Some(Arc::new(engine.run_cycle(now))));

    let prediction = predictions.get_prediction("SOL", 1).unwrap();
    assert_eq!(prediction.direction, Direction::Neutral);
    assert_eq!(prediction.override_reason, Some(OverrideReason::MaxDrawdownReached));
    assert_eq!(prediction.position_size, 0.0);

    let json = serde_json::to_value(&prediction).unwrap();
    assert_eq!(json["direction"], "NEUTRAL");
    assert_eq!(json["override_reason"], "MAX_DRAWDOWN_REACHED");
}

#[test]
fn test_asset_drawdown_counts_without_portfolio_report() {
    let mut engine = SignalEngine::new(EngineConfig::default()).unwrap();
    let mut prices: Vec<f64> = (0..40).map(|i| 100.0 + i as f64).collect();
    prices.extend((0..20).map(|i| 139.0 - 2.5 * i as f64));
    let now = feed(&mut engine, "ETH", &prices);

    let snapshot = engine.run_cycle(now);
    let eth = snapshot.asset("ETH").unwrap();
    assert!(eth.drawdown > 0.2);
    assert_eq!(
        eth.recommendation.override_reason,
        Some(OverrideReason::MaxDrawdownReached)
    );
}

#[test]
fn test_predictions_are_idempotent_within_a_cycle() {
    let config = EngineConfig::default();
    let mut engine = SignalEngine::new(config.clone()).unwrap();
    let prices: Vec<f64> = (0..120)
        .map(|i| 3_000.0 * (1.0 + 0.05 * ((i as f64) * 0.3).sin()))
        .collect();
    let now = feed(&mut engine, "ETH", &prices);

    let (tx, rx) = watch::channel(None);
    let predictions = signal_engine::PredictionService::new(rx, &config.assets);
    tx.send_replace(Some(Arc::new(engine.run_cycle(now))));

    let first = predictions.get_prediction("ETH", 7).unwrap();
    let second = predictions.get_prediction("eth", 7).unwrap();
    assert_eq!(first, second);
    assert_eq!(predictions.get_all_volatilities(), predictions.get_all_volatilities());
    assert!(!first.volatility.fallback);
    assert!((0.0..=1.0).contains(&first.confidence));
}

#[test]
fn test_store_never_exceeds_capacity() {
    let mut config = EngineConfig::default();
    config.history.capacity = 200;
    let mut engine = SignalEngine::new(config).unwrap();
    let prices: Vec<f64> = (0..350).map(|i| 50.0 + (i % 17) as f64).collect();
    feed(&mut engine, "SOL", &prices);

    let series = engine.store().series("SOL").unwrap();
    assert_eq!(series.len(), 200);
    assert_eq!(series.latest().unwrap().price, *prices.last().unwrap());
}

#[tokio::test]
async fn test_timeouts_degrade_only_the_failing_asset() {
    let config = EngineConfig::default();
    let source = Arc::new(MockMarketSource::new(&[
        ("BTC", 65_000.0),
        ("ETH", 3_500.0),
        ("SOL", 150.0),
    ]));
    source.hang("ETH");

    let provider = fallback_provider(&config, source.clone(), StdDuration::from_millis(50));
    let synthetic_history = provider.history("ETH", 10).await.unwrap();
    assert_eq!(synthetic_history.origin, DataOrigin::Synthetic);

    let engine = SignalEngine::new(config.clone()).unwrap();
    let mut runner = EngineRunner::new(engine, Arc::new(provider));
    runner.bootstrap().await;
    assert_eq!(runner.engine().store().series("ETH").unwrap().len(), 200);

    for cycle in 1..=2 {
        runner.run_once().await;
        let health = runner.engine().health("ETH").unwrap();
        assert_eq!(health.consecutive_failures, cycle);
        assert!(!health.degraded);
    }

    let snapshot = runner.run_once().await;
    assert!(runner.engine().is_degraded("ETH"));
    assert!(snapshot.asset("ETH").unwrap().degraded);
    assert_eq!(snapshot.degraded_assets(), vec!["ETH"]);

    for asset in ["BTC", "SOL"] {
        assert!(!runner.engine().is_degraded(asset));
        assert_eq!(runner.engine().health(asset).unwrap().consecutive_failures, 0);
        assert!(!snapshot.asset(asset).unwrap().degraded);
    }

    // Skipped fetches still feed the asset from synthetic data
    let eth_points = runner.engine().store().series("ETH").unwrap().len();
    let eth_calls = source.quote_calls("ETH");
    runner.run_once().await;
    assert_eq!(source.quote_calls("ETH"), eth_calls);
    assert!(runner.engine().store().series("ETH").unwrap().len() >= eth_points);
    assert!(runner.engine().is_degraded("ETH"));
}

#[tokio::test]
async fn test_fallback_quotes_continue_from_live_prices() {
    let mut config = EngineConfig::default();
    config.assets[0].base_volatility = 0.3;
    assert_eq!(config.assets[0].base_price, 65_000.0);

    // Live BTC trades far from its configured base price
    let source = Arc::new(MockMarketSource::new(&[
        ("BTC", 95_000.0),
        ("ETH", 3_500.0),
        ("SOL", 150.0),
    ]));
    let provider = fallback_provider(&config, source.clone(), StdDuration::from_millis(50))
        .with_last_known_ttl(Duration::zero());
    let mut runner = EngineRunner::new(SignalEngine::new(config.clone()).unwrap(), Arc::new(provider));
    runner.bootstrap().await;
    runner.run_once().await;
    assert_eq!(runner.engine().latest_price("BTC"), Some(95_000.0));

    source.fail("BTC");
    for _ in 0..5 {
        let snapshot = runner.run_once().await;
        let btc = snapshot.asset("BTC").unwrap();
        let price = btc.price.unwrap();

        assert!((price / 95_000.0 - 1.0).abs() < 0.2, "fallback price {}", price);
        assert!(btc.drawdown < config.risk.max_drawdown, "drawdown {}", btc.drawdown);
        assert_ne!(
            btc.recommendation.override_reason,
            Some(OverrideReason::MaxDrawdownReached)
        );
    }
    assert!(runner.engine().is_degraded("BTC"));
    assert_eq!(
        runner.engine().store().series("BTC").unwrap().len(),
        config.history.bootstrap_periods + 6
    );
}

#[tokio::test]
async fn test_lowercase_configured_symbols_are_served() {
    let mut config = EngineConfig::default();
    config.assets.truncate(1);
    config.assets[0].symbol = "btc".to_string();

    let source = Arc::new(MockMarketSource::new(&[("BTC", 65_000.0)]));
    let provider = fallback_provider(&config, source.clone(), StdDuration::from_millis(200));
    let mut runner = EngineRunner::new(SignalEngine::new(config).unwrap(), Arc::new(provider));
    let predictions = runner.predictions();

    runner.bootstrap().await;
    runner.run_once().await;
    assert_eq!(source.quote_calls("BTC"), 1);
    assert_ok!(runner.engine_mut().record_trade_outcome("btc", 0.03));

    let prediction = predictions.get_prediction("btc", 1).unwrap();
    assert_eq!(prediction.asset, "BTC");
    assert_eq!(prediction.cycle, 1);
    assert!(!prediction.degraded);
    assert_err!(predictions.get_prediction("btc", 0));
}

#[tokio::test]
async fn test_external_ticks_are_ingested_between_cycles() {
    let config = EngineConfig::default();
    let source = Arc::new(MockMarketSource::new(&[
        ("BTC", 65_000.0),
        ("ETH", 3_500.0),
        ("SOL", 150.0),
    ]));
    let provider = fallback_provider(&config, source, StdDuration::from_millis(200));
    let engine = SignalEngine::new(config).unwrap();
    let mut runner = EngineRunner::new(engine, Arc::new(provider));
    runner.bootstrap().await;

    let predictions = runner.predictions();
    assert_eq!(predictions.get_prediction("SOL", 1).unwrap().cycle, 0);

    let before = runner.engine().store().series("SOL").unwrap().len();
    runner
        .ticks()
        .send(Tick {
            asset: "SOL".to_string(),
            price: 151.0,
            volume: 900.0,
            timestamp: Utc::now(),
        })
        .await
        .unwrap();

    let snapshot = runner.run_once().await;
    assert_eq!(snapshot.asset("SOL").unwrap().points, before + 2);
    assert_eq!(snapshot.asset("SOL").unwrap().price, Some(150.0));

    let prediction = predictions.get_prediction("SOL", 1).unwrap();
    assert_eq!(prediction.cycle, 1);
    assert!(!prediction.degraded);
}

#[tokio::test]
async fn test_run_stops_on_shutdown() {
    let mut config = EngineConfig::default();
    config.history.bootstrap_periods = 30;
    let source = Arc::new(MockMarketSource::new(&[
        ("BTC", 65_000.0),
        ("ETH", 3_500.0),
        ("SOL", 150.0),
    ]));
    let provider = fallback_provider(&config, source, StdDuration::from_millis(200));
    let runner = EngineRunner::new(SignalEngine::new(config).unwrap(), Arc::new(provider));
    let predictions = runner.predictions();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(runner.run(shutdown_rx));

    // The first interval tick fires immediately
    for _ in 0..100 {
        if predictions.status().cycle >= 1 {
            break;
        }
        tokio::time::sleep(StdDuration::from_millis(20)).await;
    }
    assert!(predictions.status().cycle >= 1);

    shutdown_tx.send(true).unwrap();
    let result = tokio::time::timeout(StdDuration::from_secs(5), handle).await;
    assert!(matches!(result, Ok(Ok(Ok(())))));
}
