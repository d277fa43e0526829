//! Query façade over the registry, cache, and refresher.
//!
//! `MarketService` is the composition root: it owns the registry, the cache,
//! the refresher and the scheduler thread, and is the only type callers talk
//! to. Reads come from the cache when the requested interval and limit match
//! what the cache holds, and fall back to a synchronous fetch otherwise.

use crate::api::{PlotRatioRequest, PlotRequest, PlotResponse};
use crate::cache::{CacheEntry, CachedEntry, Freshness, Lookup, MarketCache};
use crate::config::WatchConfig;
use crate::data::MarketDataProvider;
use crate::domain::{Interval, RatioSeries, Symbol, SymbolSpec, TimeSeries};
use crate::error::ServiceError;
use crate::locks::lock;
use crate::refresh::{RefreshReport, Refresher};
use crate::registry::AssetRegistry;
use crate::scheduler::{RefreshScheduler, SchedulerHandle};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex};

/// Where the data in a view came from.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DataStatus {
    /// Cached, last refresh succeeded.
    Fresh,
    /// Cached, last refresh failed.
    Stale { since: DateTime<Utc>, error: String },
    /// Fetched for this request and not cached.
    OnDemand,
}

impl DataStatus {
    /// Status of data built from two sources: stale if either is, then
    /// on-demand if either is.
    fn combine(self, other: DataStatus) -> DataStatus {
        match (self, other) {
            (stale @ DataStatus::Stale { .. }, _) | (_, stale @ DataStatus::Stale { .. }) => stale,
            (DataStatus::OnDemand, _) | (_, DataStatus::OnDemand) => DataStatus::OnDemand,
            (DataStatus::Fresh, DataStatus::Fresh) => DataStatus::Fresh,
        }
    }
}

impl From<&Freshness> for DataStatus {
    fn from(freshness: &Freshness) -> Self {
        match freshness {
            Freshness::Fresh => DataStatus::Fresh,
            Freshness::Stale { since, error } => DataStatus::Stale {
                since: *since,
                error: error.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ViewData {
    Series {
        series: Arc<TimeSeries>,
    },
    Ratio {
        base: Arc<TimeSeries>,
        quote: Arc<TimeSeries>,
        ratio: RatioSeries,
    },
}

impl From<&CacheEntry> for ViewData {
    fn from(entry: &CacheEntry) -> Self {
        match entry {
            CacheEntry::Simple(series) => ViewData::Series {
                series: Arc::clone(series),
            },
            CacheEntry::Ratio { base, quote } => ViewData::Ratio {
                base: Arc::clone(base),
                quote: Arc::clone(quote),
                ratio: RatioSeries::compute(base, quote),
            },
        }
    }
}

/// Series for one spec, ready for a renderer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarketView {
    pub spec: SymbolSpec,
    pub interval: Interval,
    pub limit: usize,
    pub status: DataStatus,
    pub refreshed_at: DateTime<Utc>,
    pub data: ViewData,
}

impl MarketView {
    fn from_cached(spec: SymbolSpec, interval: Interval, limit: usize, cached: &CachedEntry) -> Self {
        Self {
            spec,
            interval,
            limit,
            status: DataStatus::from(&cached.freshness),
            refreshed_at: cached.refreshed_at,
            data: ViewData::from(&cached.entry),
        }
    }

    pub fn series(&self) -> Option<&TimeSeries> {
        match &self.data {
            ViewData::Series { series } => Some(series),
            ViewData::Ratio { .. } => None,
        }
    }

    pub fn ratio(&self) -> Option<&RatioSeries> {
        match &self.data {
            ViewData::Series { .. } => None,
            ViewData::Ratio { ratio, .. } => Some(ratio),
        }
    }

    pub fn is_stale(&self) -> bool {
        matches!(self.status, DataStatus::Stale { .. })
    }

    /// Rows (or ratio points) in the view.
    pub fn points(&self) -> usize {
        match &self.data {
            ViewData::Series { series } => series.len(),
            ViewData::Ratio { ratio, .. } => ratio.len(),
        }
    }
}

/// Result of a ratio query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RatioView {
    pub spec: SymbolSpec,
    pub interval: Interval,
    pub limit: usize,
    /// Freshness of the legs the ratio was computed from.
    pub status: DataStatus,
    pub ratio: RatioSeries,
    /// The pair was not tracked before this query.
    pub newly_tracked: bool,
}

/// Lifecycle state of a spec.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum AssetState {
    Unregistered,
    NoData {
        last_error: Option<String>,
        failed_at: Option<DateTime<Utc>>,
    },
    Fresh {
        refreshed_at: DateTime<Utc>,
    },
    Stale {
        refreshed_at: DateTime<Utc>,
        since: DateTime<Utc>,
        error: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssetStatus {
    pub spec: SymbolSpec,
    #[serde(flatten)]
    pub state: AssetState,
    pub points: usize,
}

pub struct MarketService {
    config: WatchConfig,
    registry: Arc<AssetRegistry>,
    cache: Arc<MarketCache>,
    refresher: Arc<Refresher>,
    scheduler: Mutex<Option<SchedulerHandle>>,
}

impl MarketService {
    /// Load the registry named in `config` and wire up an empty cache.
    ///
    /// Nothing is fetched until [`start`](Self::start) or a query.
    pub fn open(
        config: WatchConfig,
        provider: Arc<dyn MarketDataProvider>,
    ) -> Result<Self, ServiceError> {
        let registry = Arc::new(AssetRegistry::load(config.registry.path.clone())?);
        Self::with_components(config, provider, registry, Arc::new(MarketCache::new()))
    }

    pub fn with_components(
        config: WatchConfig,
        provider: Arc<dyn MarketDataProvider>,
        registry: Arc<AssetRegistry>,
        cache: Arc<MarketCache>,
    ) -> Result<Self, ServiceError> {
        let refresher = Refresher::new(
            provider,
            Arc::clone(&cache),
            Arc::clone(&registry),
            &config.series,
            &config.refresh,
        )
        .map_err(|e| ServiceError::Internal(format!("build refresh pool: {e}")))?;

        Ok(Self {
            config,
            registry,
            cache,
            refresher: Arc::new(refresher),
            scheduler: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &WatchConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<AssetRegistry> {
        &self.registry
    }

    pub fn cache(&self) -> &Arc<MarketCache> {
        &self.cache
    }

    pub fn provider_name(&self) -> &str {
        self.refresher.provider_name()
    }

    // ─── Lifecycle ───────────────────────────────────────────────────

    /// Populate the cache synchronously, then start the periodic scheduler.
    /// Calling it again only runs another pass.
    pub fn start(&self) -> Result<RefreshReport, ServiceError> {
        let report = self.refresher.refresh_all();

        let mut scheduler = lock(&self.scheduler);
        if scheduler.is_none() {
            let handle =
                RefreshScheduler::start(Arc::clone(&self.refresher), self.config.refresh.period())
                    .map_err(|e| ServiceError::Internal(format!("spawn scheduler: {e}")))?;
            *scheduler = Some(handle);
        }
        Ok(report)
    }

    /// Stop the scheduler and wait for any running pass to finish.
    pub fn stop(&self) {
        let handle = lock(&self.scheduler).take();
        if let Some(mut handle) = handle {
            handle.stop();
        }
    }

    /// Passes completed by the scheduler, if it is running.
    pub fn scheduled_passes(&self) -> Option<u64> {
        lock(&self.scheduler).as_ref().map(|h| h.passes())
    }

    pub fn last_scheduled_report(&self) -> Option<RefreshReport> {
        lock(&self.scheduler).as_ref().and_then(|h| h.last_report())
    }

    /// Ask the running scheduler for a pass without waiting for it. Returns
    /// `false` when the scheduler is not running; use
    /// [`refresh_now`](Self::refresh_now) for a synchronous pass.
    pub fn request_refresh(&self) -> bool {
        match lock(&self.scheduler).as_ref() {
            Some(handle) => {
                handle.trigger();
                true
            }
            None => false,
        }
    }

    // ─── Queries ─────────────────────────────────────────────────────

    pub fn list_assets(&self) -> Vec<SymbolSpec> {
        self.registry.list()
    }

    /// Series for `spec`, from the cache when `interval` and `limit` match
    /// the cached defaults, otherwise fetched now.
    pub fn get_series(
        &self,
        spec: &SymbolSpec,
        interval: Interval,
        limit: usize,
    ) -> Result<MarketView, ServiceError> {
        self.check_limit(limit)?;
        let cacheable = (interval, limit) == self.refresher.defaults();

        if cacheable {
            if let Some(cached) = self.cache.lookup(spec).entry() {
                return Ok(MarketView::from_cached(spec.clone(), interval, limit, cached));
            }
        }

        match self.refresher.fetch_entry(spec, interval, limit) {
            Ok(entry) => {
                let stored = cacheable
                    && self
                        .cache
                        .put_if(spec.clone(), entry.clone(), |s| self.registry.contains(s));
                Ok(MarketView {
                    spec: spec.clone(),
                    interval,
                    limit,
                    status: if stored {
                        DataStatus::Fresh
                    } else {
                        DataStatus::OnDemand
                    },
                    refreshed_at: Utc::now(),
                    data: ViewData::from(&entry),
                })
            }
            Err(e) if e.error.is_transient() && cacheable && self.registry.contains(spec) => {
                tracing::warn!(%spec, error = %e, "on-demand fetch failed for tracked asset with no data");
                self.cache
                    .mark_failed_if(spec, e.error, |s| self.registry.contains(s));
                Err(ServiceError::NoData { spec: spec.clone() })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// `close(base) / close(quote)` on shared timestamps. The pair is tracked
    /// afterwards, as if added with [`add_asset`](Self::add_asset).
    pub fn get_ratio(
        &self,
        base: &Symbol,
        quote: &Symbol,
        interval: Interval,
        limit: usize,
    ) -> Result<RatioView, ServiceError> {
        self.check_limit(limit)?;
        let spec = SymbolSpec::ratio(base.clone(), quote.clone());
        let cacheable = (interval, limit) == self.refresher.defaults();

        let cached_pair = if cacheable {
            self.cache.get(&spec)
        } else {
            None
        };
        let (base_series, quote_series, mut status) =
            match cached_pair.as_deref().map(|c| (&c.entry, &c.freshness)) {
                Some((CacheEntry::Ratio { base, quote }, freshness)) => {
                    (Arc::clone(base), Arc::clone(quote), DataStatus::from(freshness))
                }
                _ => {
                    let (base, base_status) = self.leg(base, interval, limit, cacheable)?;
                    let (quote, quote_status) = self.leg(quote, interval, limit, cacheable)?;
                    (base, quote, base_status.combine(quote_status))
                }
            };

        let newly_tracked = self.registry.add(spec.clone())?;
        if newly_tracked {
            tracing::info!(%spec, "tracking ratio");
        }
        // A pair built from a stale leg is not cached as fresh.
        let storable = !matches!(status, DataStatus::Stale { .. });
        if cacheable && cached_pair.is_none() && storable {
            let entry = CacheEntry::Ratio {
                base: Arc::clone(&base_series),
                quote: Arc::clone(&quote_series),
            };
            if self
                .cache
                .put_if(spec.clone(), entry, |s| self.registry.contains(s))
            {
                status = DataStatus::Fresh;
            }
        }

        Ok(RatioView {
            ratio: RatioSeries::compute(&base_series, &quote_series),
            spec,
            interval,
            limit,
            status,
            newly_tracked,
        })
    }

    fn leg(
        &self,
        symbol: &Symbol,
        interval: Interval,
        limit: usize,
        cacheable: bool,
    ) -> Result<(Arc<TimeSeries>, DataStatus), ServiceError> {
        if cacheable {
            let cached = self.cache.get(&SymbolSpec::Simple(symbol.clone()));
            if let Some(cached) = cached.as_deref() {
                if let CacheEntry::Simple(series) = &cached.entry {
                    return Ok((Arc::clone(series), DataStatus::from(&cached.freshness)));
                }
            }
        }
        let series = self.refresher.fetch_series(symbol, interval, limit)?;
        Ok((Arc::new(series), DataStatus::OnDemand))
    }

    fn check_limit(&self, limit: usize) -> Result<(), ServiceError> {
        let max = self.config.series.max_limit;
        if limit == 0 || limit > max {
            return Err(ServiceError::InvalidLimit { limit, max });
        }
        Ok(())
    }

    /// What to show when nothing was asked for: the first tracked asset, or
    /// the configured fallback symbol.
    pub fn default_view(&self) -> Result<MarketView, ServiceError> {
        let spec = self
            .registry
            .first()
            .unwrap_or_else(|| SymbolSpec::Simple(self.config.series.fallback_symbol.clone()));
        let (interval, limit) = self.refresher.defaults();
        self.get_series(&spec, interval, limit)
    }

    pub fn asset_state(&self, spec: &SymbolSpec) -> AssetState {
        if !self.registry.contains(spec) {
            return AssetState::Unregistered;
        }
        match self.cache.lookup(spec) {
            Lookup::NoData { last_error } => AssetState::NoData {
                failed_at: last_error.as_ref().map(|f| f.at),
                last_error: last_error.map(|f| f.error.to_string()),
            },
            Lookup::Fresh(cached) => AssetState::Fresh {
                refreshed_at: cached.refreshed_at,
            },
            Lookup::Stale(cached) => match &cached.freshness {
                Freshness::Stale { since, error } => AssetState::Stale {
                    refreshed_at: cached.refreshed_at,
                    since: *since,
                    error: error.to_string(),
                },
                Freshness::Fresh => AssetState::Fresh {
                    refreshed_at: cached.refreshed_at,
                },
            },
        }
    }

    /// State of every tracked asset, in registry order.
    pub fn status(&self) -> Vec<AssetStatus> {
        self.registry
            .list()
            .into_iter()
            .map(|spec| {
                let points = self
                    .cache
                    .get(&spec)
                    .map(|cached| match &cached.entry {
                        CacheEntry::Simple(series) => series.len(),
                        CacheEntry::Ratio { base, quote } => {
                            RatioSeries::compute(base, quote).len()
                        }
                    })
                    .unwrap_or(0);
                AssetStatus {
                    state: self.asset_state(&spec),
                    spec,
                    points,
                }
            })
            .collect()
    }

    // ─── Mutations ───────────────────────────────────────────────────

    /// Track `spec`. Returns `false` if it already was.
    ///
    /// One trial fetch runs first; if it fails nothing is persisted or cached.
    pub fn add_asset(&self, spec: &SymbolSpec) -> Result<bool, ServiceError> {
        if self.registry.contains(spec) {
            return Ok(false);
        }

        let (interval, limit) = self.refresher.defaults();
        let entry = self.refresher.fetch_entry(spec, interval, limit)?;

        let added = self.registry.add(spec.clone())?;
        if added {
            self.cache
                .put_if(spec.clone(), entry, |s| self.registry.contains(s));
            tracing::info!(%spec, "asset added");
        }
        Ok(added)
    }

    /// Stop tracking `spec` and drop its cached data.
    pub fn remove_asset(&self, spec: &SymbolSpec) -> Result<bool, ServiceError> {
        let removed = self.registry.remove(spec)?;
        if removed {
            self.cache.evict(spec);
            tracing::info!(%spec, "asset removed");
        }
        Ok(removed)
    }

    /// Refresh every tracked asset now and wait for the pass to finish.
    pub fn refresh_now(&self) -> RefreshReport {
        self.refresher.refresh_all()
    }

    /// Refresh one tracked asset, surfacing its fetch error.
    pub fn refresh_asset(&self, spec: &SymbolSpec) -> Result<MarketView, ServiceError> {
        if !self.registry.contains(spec) {
            return Err(ServiceError::NotRegistered { spec: spec.clone() });
        }
        self.refresher.refresh_spec(spec)?;

        let (interval, limit) = self.refresher.defaults();
        self.cache
            .lookup(spec)
            .entry()
            .map(|cached| MarketView::from_cached(spec.clone(), interval, limit, cached))
            .ok_or_else(|| ServiceError::NoData { spec: spec.clone() })
    }

    // ─── Request shapes ──────────────────────────────────────────────

    /// Apply defaults to a plot request and run it.
    pub fn plot(&self, request: &PlotRequest) -> Result<PlotResponse, ServiceError> {
        let spec = SymbolSpec::parse(&request.symbol)?;
        let (interval, limit) = self.request_params(request.interval.as_deref(), request.limit)?;
        let view = self.get_series(&spec, interval, limit)?;
        Ok(PlotResponse {
            chart_type: request.chart_type.unwrap_or_default(),
            view,
        })
    }

    pub fn plot_ratio(&self, request: &PlotRatioRequest) -> Result<RatioView, ServiceError> {
        let base = Symbol::parse(&request.symbol1)?;
        let quote = Symbol::parse(&request.symbol2)?;
        let (interval, limit) = self.request_params(request.interval.as_deref(), request.limit)?;
        self.get_ratio(&base, &quote, interval, limit)
    }

    fn request_params(
        &self,
        interval: Option<&str>,
        limit: Option<usize>,
    ) -> Result<(Interval, usize), ServiceError> {
        let (default_interval, default_limit) = self.refresher.defaults();
        let interval = match interval {
            Some(raw) => raw.parse::<Interval>()?,
            None => default_interval,
        };
        Ok((interval, limit.unwrap_or(default_limit)))
    }
}

impl Drop for MarketService {
    fn drop(&mut self) {
        self.stop();
    }
}
