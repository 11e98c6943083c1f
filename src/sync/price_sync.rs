//! Periodic refresh of the price store from the market data provider.
//!
//! One pass reads the active tracked instruments, fetches all their prices in
//! a single batch request and upserts a row per returned instrument. Passes
//! never overlap: the loop runs them one after another and a manual pass
//! requested while another is running is skipped.

use crate::db::Repository;
use crate::domain::{InstrumentKey, PriceQuote, TimeMs};
use crate::marketdata::{MarketDataClient, MarketDataError};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("price fetch failed: {0}")]
    Upstream(#[from] MarketDataError),
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

/// Result of one completed pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PassReport {
    pub requested: usize,
    pub updated: usize,
    /// Tracked instruments the provider returned nothing for.
    pub missing: Vec<InstrumentKey>,
    pub completed_at: TimeMs,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum PassOutcome {
    Completed(PassReport),
    /// No active tracked instruments.
    SkippedEmptyUniverse,
    /// Another pass was running.
    SkippedBusy,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub running: bool,
    pub interval_ms: u64,
    pub passes_completed: u64,
    pub passes_failed: u64,
    pub passes_skipped: u64,
    pub last_pass_at: Option<TimeMs>,
    pub last_error: Option<String>,
    pub last_report: Option<PassReport>,
}

#[derive(Debug, Default)]
struct SyncStats {
    passes_completed: u64,
    passes_failed: u64,
    passes_skipped: u64,
    last_pass_at: Option<TimeMs>,
    last_error: Option<String>,
    last_report: Option<PassReport>,
}

#[derive(Debug)]
struct Runner {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Keeps the price store current for the tracked universe.
#[derive(Debug)]
pub struct PriceSyncService {
    client: Arc<dyn MarketDataClient>,
    repo: Arc<Repository>,
    interval: Duration,
    pass_guard: Mutex<()>,
    runner: Mutex<Option<Runner>>,
    stats: RwLock<SyncStats>,
}

impl PriceSyncService {
    pub fn new(
        client: Arc<dyn MarketDataClient>,
        repo: Arc<Repository>,
        interval: Duration,
    ) -> Self {
        Self {
            client,
            repo,
            interval,
            pass_guard: Mutex::new(()),
            runner: Mutex::new(None),
            stats: RwLock::new(SyncStats::default()),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Start the loop: one pass now, then one per interval.
    ///
    /// Returns false if the loop was already running.
    pub async fn start(self: &Arc<Self>) -> bool {
        let mut runner = self.runner.lock().await;
        if runner.as_ref().is_some_and(|r| !r.handle.is_finished()) {
            return false;
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        let service = Arc::clone(self);
        let handle = tokio::spawn(async move { service.run_loop(stop_rx).await });
        *runner = Some(Runner { stop_tx, handle });

        info!(interval_ms = self.interval.as_millis() as u64, "price sync started");
        true
    }

    /// Stop scheduling passes. A pass already in flight runs to completion.
    ///
    /// Returns false if the loop was not running.
    pub async fn stop(&self) -> bool {
        let Some(runner) = self.runner.lock().await.take() else {
            return false;
        };
        let was_running = !runner.handle.is_finished();
        // the loop also exits if the receiver sees the sender dropped
        let _ = runner.stop_tx.send(true);
        if was_running {
            info!("price sync stopped");
        }
        was_running
    }

    /// Stop and wait for the loop task, including any in-flight pass, to finish.
    pub async fn shutdown(&self) {
        let runner = self.runner.lock().await.take();
        if let Some(runner) = runner {
            let _ = runner.stop_tx.send(true);
            if let Err(e) = runner.handle.await {
                warn!(error = %e, "price sync task ended abnormally");
            }
            info!("price sync shut down");
        }
    }

    pub async fn is_running(&self) -> bool {
        self.runner
            .lock()
            .await
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished())
    }

    pub async fn status(&self) -> SyncStatus {
        let running = self.is_running().await;
        let stats = self.stats.read().await;
        SyncStatus {
            running,
            interval_ms: self.interval.as_millis() as u64,
            passes_completed: stats.passes_completed,
            passes_failed: stats.passes_failed,
            passes_skipped: stats.passes_skipped,
            last_pass_at: stats.last_pass_at,
            last_error: stats.last_error.clone(),
            last_report: stats.last_report.clone(),
        }
    }

    async fn run_loop(self: Arc<Self>, mut stop_rx: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                changed = stop_rx.changed() => {
                    if changed.is_err() || *stop_rx.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    // failures are recorded in status by run_pass
                    let _ = self.run_pass().await;
                }
            }
        }
        debug!("price sync loop exited");
    }

    /// Run one pass now, unless another pass is in progress.
    pub async fn run_pass(&self) -> Result<PassOutcome, SyncError> {
        let Ok(_guard) = self.pass_guard.try_lock() else {
            debug!("price sync pass already running, skipping");
            return Ok(PassOutcome::SkippedBusy);
        };

        let result = self.execute_pass().await;

        let mut stats = self.stats.write().await;
        stats.last_pass_at = Some(TimeMs::now());
        match &result {
            Ok(PassOutcome::Completed(report)) => {
                stats.passes_completed += 1;
                stats.last_error = None;
                stats.last_report = Some(report.clone());
            }
            Ok(_) => stats.passes_skipped += 1,
            Err(e) => {
                error!(error = %e, "price sync pass failed");
                stats.passes_failed += 1;
                stats.last_error = Some(e.to_string());
            }
        }
        result
    }

    async fn execute_pass(&self) -> Result<PassOutcome, SyncError> {
        let instruments = self.repo.active_instruments().await?;
        if instruments.is_empty() {
            warn!("no active tracked instruments, skipping price sync pass");
            return Ok(PassOutcome::SkippedEmptyUniverse);
        }

        let keys: Vec<InstrumentKey> = instruments
            .iter()
            .map(|i| i.instrument_key.clone())
            .collect();
        let batch = self.client.fetch_prices(&keys).await?;

        let now = TimeMs::now();
        let mut updated = 0;
        let mut missing = Vec::new();
        for instrument in &instruments {
            let Some(market) = batch.get(&instrument.instrument_key) else {
                missing.push(instrument.instrument_key.clone());
                continue;
            };
            let quote = PriceQuote {
                instrument_key: instrument.instrument_key.clone(),
                symbol: instrument.symbol.clone(),
                name: instrument.name.clone(),
                current_price: market.price,
                market_cap: market.market_cap,
                volume_24h: market.volume_24h,
                change_24h: market.change_24h,
                change_pct_24h: market.change_pct_24h,
                last_updated: now,
            };
            self.repo.upsert_price_quote(&quote).await?;
            updated += 1;
        }

        if !missing.is_empty() {
            debug!(missing = ?missing, "provider returned no price for some instruments");
        }
        info!(
            requested = keys.len(),
            updated,
            missing = missing.len(),
            "price sync pass completed"
        );

        Ok(PassOutcome::Completed(PassReport {
            requested: keys.len(),
            updated,
            missing,
            completed_at: now,
        }))
    }
}
