//! Engine runner - fixed-cadence update loop
//!
//! Each cycle fetches a quote per asset through the fallback provider, drains
//! the tick channel into the engine, runs the engine cycle and publishes the
//! snapshot. Only this task mutates the engine.

use chrono::{DateTime, Utc};
use market_data::{DataOrigin, FallbackProvider, HistoricalPoint, Quote};
use rust_decimal::prelude::ToPrimitive;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::engine::{CycleSnapshot, SignalEngine};
use crate::error::{EngineError, Result};
use crate::prediction::PredictionService;

/// One completed price observation handed to the engine
#[derive(Debug, Clone, PartialEq)]
pub struct Tick {
    pub asset: String,
    pub price: f64,
    pub volume: f64,
    pub timestamp: DateTime<Utc>,
}

impl Tick {
    pub fn from_quote(quote: &Quote) -> Self {
        Self {
            asset: quote.asset.clone(),
            price: quote.price.to_f64().unwrap_or(0.0),
            volume: quote.volume.to_f64().unwrap_or(0.0),
            timestamp: quote.timestamp,
        }
    }

    pub fn from_point(asset: &str, point: &HistoricalPoint) -> Self {
        Self {
            asset: asset.to_string(),
            price: point.price.to_f64().unwrap_or(0.0),
            volume: point.volume.to_f64().unwrap_or(0.0),
            timestamp: point.timestamp,
        }
    }
}

/// How one asset's fetch went this cycle
#[derive(Debug)]
enum FetchReport {
    Live,
    Fallback(EngineError),
    Skipped,
    Failed(EngineError),
}

pub struct EngineRunner {
    engine: SignalEngine,
    provider: Arc<FallbackProvider>,
    ticks_tx: mpsc::Sender<Tick>,
    ticks_rx: mpsc::Receiver<Tick>,
    snapshots: watch::Sender<Option<Arc<CycleSnapshot>>>,
}

impl EngineRunner {
    pub fn new(engine: SignalEngine, provider: Arc<FallbackProvider>) -> Self {
        let (ticks_tx, ticks_rx) = mpsc::channel(engine.config().cycle.tick_buffer);
        let (snapshots, _) = watch::channel(None);
        Self {
            engine,
            provider,
            ticks_tx,
            ticks_rx,
            snapshots,
        }
    }

    /// Sender for externally ingested ticks; they are applied between cycles
    pub fn ticks(&self) -> mpsc::Sender<Tick> {
        self.ticks_tx.clone()
    }

    pub fn predictions(&self) -> PredictionService {
        PredictionService::new(self.snapshots.subscribe(), &self.engine.config().assets)
    }

    pub fn engine(&self) -> &SignalEngine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut SignalEngine {
        &mut self.engine
    }

    fn ingest(&mut self, tick: Tick) {
        // Invalid ticks are logged by the store
        if let Err(e) = self
            .engine
            .ingest_tick(&tick.asset, tick.price, tick.volume, tick.timestamp)
        {
            debug!("Tick for {} dropped: {}", tick.asset, e);
        }
    }

    fn drain_ticks(&mut self) -> usize {
        let mut count = 0;
        while let Ok(tick) = self.ticks_rx.try_recv() {
            self.ingest(tick);
            count += 1;
        }
        count
    }

    /// Seed every asset with history from the provider (synthetic if live fails)
    pub async fn bootstrap(&mut self) {
        let periods = self.engine.config().history.bootstrap_periods;
        for symbol in self.engine.symbols() {
            match self.provider.history(&symbol, periods).await {
                Ok(outcome) => {
                    if outcome.origin.is_fallback() {
                        warn!(
                            "Bootstrapping {} from {:?} data ({})",
                            symbol,
                            outcome.origin,
                            outcome
                                .error
                                .as_ref()
                                .map(|e| e.to_string())
                                .unwrap_or_else(|| "no live source".to_string())
                        );
                    }
                    let count = outcome.points.len();
                    for point in &outcome.points {
                        self.ingest(Tick::from_point(&symbol, point));
                    }
                    info!("✓ {} seeded with {} points", symbol, count);
                }
                Err(e) => error!("Failed to bootstrap {}: {}", symbol, e),
            }
        }
    }

    async fn fetch_one(
        provider: &FallbackProvider,
        ticks: &mpsc::Sender<Tick>,
        symbol: &str,
        live: bool,
        last_price: Option<f64>,
    ) -> FetchReport {
        // Any synthetic quote drawn below continues from the series' latest price
        if let Some(price) = last_price {
            if let Err(e) = provider.synthetic().anchor(symbol, price).await {
                debug!("Synthetic walk for {} not anchored: {}", symbol, e);
            }
        }

        let (quote, report) = if live {
            match provider.quote(symbol).await {
                Ok(outcome) => {
                    let report = match (outcome.origin, outcome.error) {
                        (DataOrigin::Live, _) | (_, None) => FetchReport::Live,
                        (_, Some(e)) => FetchReport::Fallback(e.into()),
                    };
                    (outcome.quote, report)
                }
                Err(e) => return FetchReport::Failed(e.into()),
            }
        } else {
            match provider.synthetic().next_quote(symbol).await {
                Ok(quote) => (quote, FetchReport::Skipped),
                Err(e) => return FetchReport::Failed(e.into()),
            }
        };

        if ticks.send(Tick::from_quote(&quote)).await.is_err() {
            warn!("Tick channel closed, dropping quote for {}", symbol);
        }
        report
    }

    /// Fetch every asset concurrently under the watchdog. Ticks are queued as
    /// they arrive, so a stalled phase keeps what already completed.
    async fn fetch_phase(&mut self) {
        let plan: Vec<(String, bool, Option<f64>)> = self
            .engine
            .symbols()
            .into_iter()
            .map(|s| {
                let live = self.engine.should_fetch(&s);
                let last_price = self.engine.latest_price(&s);
                (s, live, last_price)
            })
            .collect();

        let watchdog = Duration::from_secs(self.engine.config().cycle.watchdog_secs);
        let provider = self.provider.clone();
        let ticks = self.ticks_tx.clone();
        let fetches = plan.iter().map(|(symbol, live, last_price)| {
            let provider = &provider;
            let ticks = &ticks;
            async move {
                let report = Self::fetch_one(provider, ticks, symbol, *live, *last_price).await;
                (symbol.clone(), report)
            }
        });

        let reports = match timeout(watchdog, futures::future::join_all(fetches)).await {
            Ok(reports) => reports,
            Err(_) => {
                error!(
                    "Fetch phase stalled past {}s watchdog, proceeding with ingested data",
                    watchdog.as_secs()
                );
                return;
            }
        };

        for (symbol, report) in reports {
            match report {
                FetchReport::Live => self.engine.record_fetch_success(&symbol),
                FetchReport::Fallback(e) | FetchReport::Failed(e) => {
                    self.engine.record_fetch_failure(&symbol, &e);
                }
                FetchReport::Skipped => debug!("{} skipped live fetch (degraded)", symbol),
            }
        }
    }

    /// One full cycle: fetch, drain, compute, publish
    pub async fn run_once(&mut self) -> Arc<CycleSnapshot> {
        self.fetch_phase().await;
        let drained = self.drain_ticks();

        let snapshot = Arc::new(self.engine.run_cycle(Utc::now()));
        debug!("Cycle {} ingested {} ticks", snapshot.cycle, drained);
        let degraded = snapshot.degraded_assets();
        if !degraded.is_empty() {
            warn!("Cycle {}: degraded assets {:?}", snapshot.cycle, degraded);
        }

        self.snapshots.send_replace(Some(snapshot.clone()));
        snapshot
    }

    /// Run until `shutdown` flips to true or its sender is dropped
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!("Engine runner starting main loop...");
        self.bootstrap().await;

        let mut cycle_interval =
            interval(Duration::from_secs(self.engine.config().cycle.interval_secs));
        cycle_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cycle_interval.tick() => {
                    let snapshot = self.run_once().await;
                    info!(
                        "Cycle {} published: trend {:?}, volatility {:?}",
                        snapshot.cycle, snapshot.regime.trend, snapshot.regime.volatility_regime
                    );
                }
                Some(tick) = self.ticks_rx.recv() => {
                    self.ingest(tick);
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Shutdown requested");
                        break;
                    }
                }
            }
        }

        self.engine.shutdown();
        Ok(())
    }
}
