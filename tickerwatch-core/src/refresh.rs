//! Refresh logic: fetch specs from the provider and write them into the cache.
//!
//! The same callable serves the scheduler tick, startup, and user actions.
//! Per-spec slots keep at most one fetch in flight per spec: callers queue on
//! the slot's mutex, and a provider call that overran its timeout stays
//! counted against the slot until it returns, so the spec reports `Busy`
//! instead of stacking another request behind a hung upstream. A pass fans
//! out over a private rayon pool. Every provider call is bounded by
//! [`fetch_with_timeout`].

use crate::cache::{CacheEntry, MarketCache};
use crate::config::{RefreshConfig, SeriesConfig};
use crate::data::{DataError, MarketDataProvider};
use crate::domain::{Interval, Symbol, SymbolSpec, TimeSeries};
use crate::locks::lock;
use crate::registry::AssetRegistry;
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

/// A failed fetch, naming the leg that failed.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{symbol}: {error}")]
pub struct FetchError {
    pub symbol: Symbol,
    #[source]
    pub error: DataError,
}

/// One failed spec in a refresh pass.
#[derive(Debug, Clone, Serialize)]
pub struct FailedRefresh {
    pub spec: SymbolSpec,
    pub error: String,
}

/// Outcome of a refresh pass.
#[derive(Debug, Clone, Serialize)]
pub struct RefreshReport {
    pub started_at: DateTime<Utc>,
    pub refreshed: Vec<SymbolSpec>,
    pub failed: Vec<FailedRefresh>,
    pub evicted: Vec<SymbolSpec>,
    pub elapsed_ms: u64,
}

impl RefreshReport {
    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn total(&self) -> usize {
        self.refreshed.len() + self.failed.len()
    }
}

/// Run one provider call on its own thread and give up after `timeout`.
///
/// A call that overruns is left to finish on its detached thread; its result
/// is discarded.
pub fn fetch_with_timeout(
    provider: Arc<dyn MarketDataProvider>,
    symbol: &Symbol,
    interval: Interval,
    limit: usize,
    timeout: Duration,
) -> Result<TimeSeries, DataError> {
    fetch_holding(provider, symbol, interval, limit, timeout, ())
}

/// [`fetch_with_timeout`], keeping `held` alive on the fetch thread until the
/// provider call returns, however long that takes.
fn fetch_holding<H: Send + 'static>(
    provider: Arc<dyn MarketDataProvider>,
    symbol: &Symbol,
    interval: Interval,
    limit: usize,
    timeout: Duration,
    held: H,
) -> Result<TimeSeries, DataError> {
    let (tx, rx) = mpsc::channel();
    let owned = symbol.clone();
    thread::Builder::new()
        .name(format!("tickerwatch-fetch-{symbol}"))
        .spawn(move || {
            let result = provider.fetch_klines(&owned, interval, limit);
            // Released before the send so the caller's next leg sees it.
            drop(held);
            // Receiver is gone if the caller already timed out.
            let _ = tx.send(result);
        })
        .map_err(|e| DataError::Unavailable(format!("failed to spawn fetch thread: {e}")))?;

    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(mpsc::RecvTimeoutError::Timeout) => Err(DataError::Timeout {
            symbol: symbol.to_string(),
            after: timeout,
        }),
        Err(mpsc::RecvTimeoutError::Disconnected) => Err(DataError::Unavailable(format!(
            "fetch thread for {symbol} exited without a result"
        ))),
    }
}

/// Serialization point for one spec.
#[derive(Debug, Default)]
struct SpecSlot {
    queue: Mutex<()>,
    /// Provider calls for this spec that have not returned.
    outstanding: AtomicUsize,
}

/// Counts one provider call against its slot until dropped.
struct Outstanding(Arc<SpecSlot>);

impl Outstanding {
    fn acquire(slot: &Arc<SpecSlot>) -> Self {
        slot.outstanding.fetch_add(1, Ordering::AcqRel);
        Self(Arc::clone(slot))
    }
}

impl Drop for Outstanding {
    fn drop(&mut self) {
        self.0.outstanding.fetch_sub(1, Ordering::AcqRel);
    }
}

pub struct Refresher {
    provider: Arc<dyn MarketDataProvider>,
    cache: Arc<MarketCache>,
    registry: Arc<AssetRegistry>,
    interval: Interval,
    limit: usize,
    fetch_timeout: Duration,
    pool: rayon::ThreadPool,
    slots: Mutex<HashMap<SymbolSpec, Arc<SpecSlot>>>,
}

impl Refresher {
    pub fn new(
        provider: Arc<dyn MarketDataProvider>,
        cache: Arc<MarketCache>,
        registry: Arc<AssetRegistry>,
        series: &SeriesConfig,
        refresh: &RefreshConfig,
    ) -> Result<Self, rayon::ThreadPoolBuildError> {
        // Private pool so refresh passes never compete with the global one.
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(refresh.fetch_concurrency.max(1))
            .thread_name(|i| format!("tickerwatch-refresh-{i}"))
            .build()?;

        Ok(Self {
            provider,
            cache,
            registry,
            interval: series.interval,
            limit: series.limit,
            fetch_timeout: refresh.fetch_timeout(),
            pool,
            slots: Mutex::new(HashMap::new()),
        })
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Interval and limit of the series kept in the cache.
    pub fn defaults(&self) -> (Interval, usize) {
        (self.interval, self.limit)
    }

    /// Fetch every leg of `spec` without touching the cache.
    pub fn fetch_entry(
        &self,
        spec: &SymbolSpec,
        interval: Interval,
        limit: usize,
    ) -> Result<CacheEntry, FetchError> {
        let slot = self.slot(spec);
        let _queued = lock(&slot.queue);
        self.fetch_in_slot(&slot, spec, interval, limit)
    }

    /// Fetch a single symbol, serialized with refreshes of its simple spec.
    pub fn fetch_series(
        &self,
        symbol: &Symbol,
        interval: Interval,
        limit: usize,
    ) -> Result<TimeSeries, FetchError> {
        let slot = self.slot(&SymbolSpec::Simple(symbol.clone()));
        let _queued = lock(&slot.queue);
        self.fetch_leg(&slot, symbol, interval, limit)
    }

    /// Refresh one spec at the cached interval and limit.
    ///
    /// Success replaces the entry; failure marks existing data stale. Either
    /// way nothing is written for a spec that is no longer registered.
    pub fn refresh_spec(&self, spec: &SymbolSpec) -> Result<(), FetchError> {
        let slot = self.slot(spec);
        let _queued = lock(&slot.queue);

        match self.fetch_in_slot(&slot, spec, self.interval, self.limit) {
            Ok(entry) => {
                let stored = self
                    .cache
                    .put_if(spec.clone(), entry, |s| self.registry.contains(s));
                if stored {
                    tracing::debug!(%spec, "refreshed");
                } else {
                    tracing::debug!(%spec, "discarded refresh of unregistered spec");
                }
                Ok(())
            }
            Err(e) => {
                tracing::warn!(%spec, symbol = %e.symbol, error = %e.error, "refresh failed, keeping previous data");
                self.cache
                    .mark_failed_if(spec, e.error.clone(), |s| self.registry.contains(s));
                Err(e)
            }
        }
    }

    /// Refresh every registered spec, then evict entries for specs that are
    /// no longer registered.
    pub fn refresh_all(&self) -> RefreshReport {
        let started_at = Utc::now();
        let start = Instant::now();
        let specs = self.registry.list();

        let results: Vec<(SymbolSpec, Result<(), FetchError>)> = self.pool.install(|| {
            specs
                .par_iter()
                .map(|spec| (spec.clone(), self.refresh_spec(spec)))
                .collect()
        });

        let mut refreshed = Vec::new();
        let mut failed = Vec::new();
        for (spec, result) in results {
            match result {
                Ok(()) => refreshed.push(spec),
                Err(e) => failed.push(FailedRefresh {
                    spec,
                    error: e.to_string(),
                }),
            }
        }

        let evicted = self.cache.retain(|s| self.registry.contains(s));
        self.prune_slots();

        let report = RefreshReport {
            started_at,
            refreshed,
            failed,
            evicted,
            elapsed_ms: start.elapsed().as_millis() as u64,
        };
        tracing::info!(
            refreshed = report.refreshed.len(),
            failed = report.failed.len(),
            evicted = report.evicted.len(),
            elapsed_ms = report.elapsed_ms,
            "refresh pass complete"
        );
        report
    }

    /// Caller holds `slot.queue`.
    fn fetch_in_slot(
        &self,
        slot: &Arc<SpecSlot>,
        spec: &SymbolSpec,
        interval: Interval,
        limit: usize,
    ) -> Result<CacheEntry, FetchError> {
        match spec {
            SymbolSpec::Simple(symbol) => Ok(self.fetch_leg(slot, symbol, interval, limit)?.into()),
            SymbolSpec::Ratio { base, quote } => {
                let base = self.fetch_leg(slot, base, interval, limit)?;
                let quote = self.fetch_leg(slot, quote, interval, limit)?;
                Ok(CacheEntry::ratio(base, quote))
            }
        }
    }

    fn fetch_leg(
        &self,
        slot: &Arc<SpecSlot>,
        symbol: &Symbol,
        interval: Interval,
        limit: usize,
    ) -> Result<TimeSeries, FetchError> {
        let fail = |error| FetchError {
            symbol: symbol.clone(),
            error,
        };

        if slot.outstanding.load(Ordering::Acquire) > 0 {
            return Err(fail(DataError::Busy {
                symbol: symbol.to_string(),
            }));
        }

        // Don't queue more work behind an open breaker.
        if !self.provider.is_available() {
            return Err(fail(DataError::CircuitBreakerTripped));
        }

        fetch_holding(
            Arc::clone(&self.provider),
            symbol,
            interval,
            limit,
            self.fetch_timeout,
            Outstanding::acquire(slot),
        )
        .map_err(fail)
    }

    fn slot(&self, spec: &SymbolSpec) -> Arc<SpecSlot> {
        Arc::clone(lock(&self.slots).entry(spec.clone()).or_default())
    }

    /// Drop slots of unregistered specs nobody is using.
    fn prune_slots(&self) {
        lock(&self.slots)
            .retain(|spec, slot| Arc::strong_count(slot) > 1 || self.registry.contains(spec));
    }
}
