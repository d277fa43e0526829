//! In-memory market cache: latest fetched entry per tracked spec.
//!
//! One coarse `RwLock` guards the whole state. Values are `Arc`s, so a reader
//! clones a pointer and drops the lock immediately; writers swap whole entries
//! and never hold the lock across a fetch. A reader therefore sees either the
//! previous entry or the new one, never a mix.
//!
//! The cache distinguishes "never fetched" (no entry, maybe a failure record)
//! from "fetch failed, previous data kept" (entry marked stale).

use crate::data::DataError;
use crate::domain::{Interval, RatioSeries, SymbolSpec, TimeSeries};
use crate::locks::{read, write};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Fetched data for one spec.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheEntry {
    Simple(Arc<TimeSeries>),
    Ratio {
        base: Arc<TimeSeries>,
        quote: Arc<TimeSeries>,
    },
}

impl CacheEntry {
    pub fn ratio(base: TimeSeries, quote: TimeSeries) -> Self {
        CacheEntry::Ratio {
            base: Arc::new(base),
            quote: Arc::new(quote),
        }
    }

    /// Whether every leg was fetched with these parameters.
    pub fn matches(&self, interval: Interval, limit: usize) -> bool {
        match self {
            CacheEntry::Simple(series) => series.matches(interval, limit),
            CacheEntry::Ratio { base, quote } => {
                base.matches(interval, limit) && quote.matches(interval, limit)
            }
        }
    }

    /// Ratio of the two legs, computed on demand.
    pub fn ratio_series(&self) -> Option<RatioSeries> {
        match self {
            CacheEntry::Simple(_) => None,
            CacheEntry::Ratio { base, quote } => Some(RatioSeries::compute(base, quote)),
        }
    }
}

impl From<TimeSeries> for CacheEntry {
    fn from(series: TimeSeries) -> Self {
        CacheEntry::Simple(Arc::new(series))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Freshness {
    Fresh,
    /// The last refresh failed; data is from `refreshed_at`.
    Stale { since: DateTime<Utc>, error: DataError },
}

#[derive(Debug, Clone, PartialEq)]
pub struct CachedEntry {
    pub entry: CacheEntry,
    pub refreshed_at: DateTime<Utc>,
    pub freshness: Freshness,
}

impl CachedEntry {
    pub fn is_stale(&self) -> bool {
        matches!(self.freshness, Freshness::Stale { .. })
    }
}

/// A failed fetch for a spec that has no data yet.
#[derive(Debug, Clone, PartialEq)]
pub struct FailureRecord {
    pub at: DateTime<Utc>,
    pub error: DataError,
}

/// What the cache knows about a spec.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    NoData { last_error: Option<FailureRecord> },
    Fresh(Arc<CachedEntry>),
    Stale(Arc<CachedEntry>),
}

impl Lookup {
    pub fn entry(&self) -> Option<&Arc<CachedEntry>> {
        match self {
            Lookup::NoData { .. } => None,
            Lookup::Fresh(entry) | Lookup::Stale(entry) => Some(entry),
        }
    }
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<SymbolSpec, Arc<CachedEntry>>,
    failures: HashMap<SymbolSpec, FailureRecord>,
}

#[derive(Debug, Default)]
pub struct MarketCache {
    state: RwLock<CacheState>,
}

impl MarketCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, spec: &SymbolSpec) -> Option<Arc<CachedEntry>> {
        read(&self.state).entries.get(spec).cloned()
    }

    pub fn lookup(&self, spec: &SymbolSpec) -> Lookup {
        let state = read(&self.state);
        match state.entries.get(spec) {
            Some(entry) if entry.is_stale() => Lookup::Stale(Arc::clone(entry)),
            Some(entry) => Lookup::Fresh(Arc::clone(entry)),
            None => Lookup::NoData {
                last_error: state.failures.get(spec).cloned(),
            },
        }
    }

    pub fn last_failure(&self, spec: &SymbolSpec) -> Option<FailureRecord> {
        read(&self.state).failures.get(spec).cloned()
    }

    /// Replace the entry for `spec` with fresh data.
    pub fn put(&self, spec: SymbolSpec, entry: CacheEntry) {
        self.put_if(spec, entry, |_| true);
    }

    /// Replace the entry only if `predicate(spec)` holds while the write lock
    /// is held. Returns whether the entry was stored.
    pub fn put_if(
        &self,
        spec: SymbolSpec,
        entry: CacheEntry,
        predicate: impl FnOnce(&SymbolSpec) -> bool,
    ) -> bool {
        let cached = Arc::new(CachedEntry {
            entry,
            refreshed_at: Utc::now(),
            freshness: Freshness::Fresh,
        });

        let mut state = write(&self.state);
        if !predicate(&spec) {
            return false;
        }
        state.failures.remove(&spec);
        state.entries.insert(spec, cached);
        true
    }

    /// Record a failed refresh of `spec`.
    ///
    /// Existing data is kept and marked stale (the first failure's time is
    /// kept as `since`); a spec with no data only gets a failure record.
    pub fn mark_failed(&self, spec: &SymbolSpec, error: DataError) {
        self.mark_failed_if(spec, error, |_| true);
    }

    /// [`mark_failed`](Self::mark_failed), gated like [`put_if`](Self::put_if).
    pub fn mark_failed_if(
        &self,
        spec: &SymbolSpec,
        error: DataError,
        predicate: impl FnOnce(&SymbolSpec) -> bool,
    ) -> bool {
        let now = Utc::now();
        let mut state = write(&self.state);
        if !predicate(spec) {
            return false;
        }

        match state.entries.get(spec).cloned() {
            Some(existing) => {
                let since = match &existing.freshness {
                    Freshness::Stale { since, .. } => *since,
                    Freshness::Fresh => now,
                };
                let stale = CachedEntry {
                    entry: existing.entry.clone(),
                    refreshed_at: existing.refreshed_at,
                    freshness: Freshness::Stale { since, error },
                };
                state.entries.insert(spec.clone(), Arc::new(stale));
            }
            None => {
                state
                    .failures
                    .insert(spec.clone(), FailureRecord { at: now, error });
            }
        }
        true
    }

    /// Drop everything known about `spec`. Returns whether data was held.
    pub fn evict(&self, spec: &SymbolSpec) -> bool {
        let mut state = write(&self.state);
        state.failures.remove(spec);
        state.entries.remove(spec).is_some()
    }

    /// Keep only specs for which `keep` holds; returns the evicted data
    /// entries.
    pub fn retain(&self, mut keep: impl FnMut(&SymbolSpec) -> bool) -> Vec<SymbolSpec> {
        let mut state = write(&self.state);
        let evicted: Vec<SymbolSpec> = state
            .entries
            .keys()
            .filter(|spec| !keep(spec))
            .cloned()
            .collect();
        for spec in &evicted {
            state.entries.remove(spec);
        }
        state.failures.retain(|spec, _| keep(spec));
        evicted
    }

    /// Point-in-time copy of all entries.
    pub fn snapshot(&self) -> HashMap<SymbolSpec, Arc<CachedEntry>> {
        read(&self.state).entries.clone()
    }

    /// Every spec the cache holds anything for, data or failure record.
    pub fn known_specs(&self) -> Vec<SymbolSpec> {
        let state = read(&self.state);
        let mut specs: Vec<SymbolSpec> = state
            .entries
            .keys()
            .chain(state.failures.keys())
            .cloned()
            .collect();
        specs.sort();
        specs.dedup();
        specs
    }

    pub fn len(&self) -> usize {
        read(&self.state).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        read(&self.state).entries.is_empty()
    }
}
