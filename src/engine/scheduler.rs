//! Recurring job scheduler.
//!
//! Three independent-period jobs share one process: the scanner, the
//! position monitor (fill reconciliation + stop-loss), and the
//! resolution checker. Each job is guarded by its own `try_lock` so a
//! slow tick skips the next one instead of overlapping itself.
//! Shutdown is cooperative via `tokio::signal::ctrl_c()`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::engine::lifecycle::LifecycleManager;
use crate::engine::scanner::Scanner;
use crate::platforms::VenueClient;
use crate::storage::Store;
use crate::types::Venue;

pub struct Scheduler {
    store: Arc<Store>,
    venues: Arc<HashMap<Venue, Box<dyn VenueClient>>>,
    scanner_interval: Duration,
    min_market_volume: rust_decimal::Decimal,
    max_days_to_expiry: i64,
    scanner_lock: Mutex<()>,
    monitor_lock: Mutex<()>,
    resolution_lock: Mutex<()>,
}

impl Scheduler {
    pub fn new(
        store: Arc<Store>,
        venues: Arc<HashMap<Venue, Box<dyn VenueClient>>>,
        scanner_interval_hours: u64,
        min_market_volume: rust_decimal::Decimal,
        max_days_to_expiry: i64,
    ) -> Self {
        Self {
            store,
            venues,
            scanner_interval: Duration::from_secs(scanner_interval_hours * 3600),
            min_market_volume,
            max_days_to_expiry,
            scanner_lock: Mutex::new(()),
            monitor_lock: Mutex::new(()),
            resolution_lock: Mutex::new(()),
        }
    }

    /// Run all three jobs until a ctrl-c signal arrives. In-flight ticks
    /// complete before returning.
    pub async fn run(&self) {
        let mut scanner_tick = tokio::time::interval(self.scanner_interval);
        let mut monitor_tick = tokio::time::interval(Duration::from_secs(60));
        let mut resolution_tick = tokio::time::interval(Duration::from_secs(3600));

        loop {
            tokio::select! {
                _ = scanner_tick.tick() => self.run_scanner_job().await,
                _ = monitor_tick.tick() => self.run_monitor_job().await,
                _ = resolution_tick.tick() => self.run_resolution_job().await,
                _ = tokio::signal::ctrl_c() => {
                    info!("shutdown signal received, exiting after current ticks");
                    break;
                }
            }
        }
    }

    async fn run_scanner_job(&self) {
        let Ok(_guard) = self.scanner_lock.try_lock() else {
            warn!("scanner job still running, skipping this tick");
            return;
        };

        let scanner = Scanner::new(&self.store, &self.venues, self.min_market_volume, self.max_days_to_expiry);
        let scan_id = format!("scan-{}", uuid::Uuid::new_v4());
        let result = scanner.scan(scan_id.clone()).await;
        info!(
            scan_id = %result.scan_id,
            total_fetched = result.total_fetched,
            qualifying = result.qualifying,
            new = result.new,
            updated = result.updated,
            errors = result.errors.len(),
            "scanner job finished"
        );
    }

    async fn run_monitor_job(&self) {
        let Ok(_guard) = self.monitor_lock.try_lock() else {
            warn!("monitor job still running, skipping this tick");
            return;
        };

        let lifecycle = LifecycleManager::new(&self.store, &self.venues);
        match lifecycle.reconcile_fills().await {
            Ok(n) => info!(transitioned = n, "fill reconciliation complete"),
            Err(e) => warn!(error = %e, "fill reconciliation failed"),
        }
        match lifecycle.enforce_stop_loss().await {
            Ok(n) => info!(closed = n, "stop-loss enforcement complete"),
            Err(e) => warn!(error = %e, "stop-loss enforcement failed"),
        }
    }

    async fn run_resolution_job(&self) {
        let Ok(_guard) = self.resolution_lock.try_lock() else {
            warn!("resolution job still running, skipping this tick");
            return;
        };

        let lifecycle = LifecycleManager::new(&self.store, &self.venues);
        match lifecycle.settle_resolutions().await {
            Ok(n) => info!(settled = n, "resolution settlement complete"),
            Err(e) => warn!(error = %e, "resolution settlement failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_try_lock_prevents_overlap() {
        let lock = Mutex::new(());
        let _guard = lock.try_lock().unwrap();
        assert!(lock.try_lock().is_err());
    }
}
