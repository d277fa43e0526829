//! TickerWatch CLI — manage tracked assets, refresh them, and query series.
//!
//! Commands:
//! - `list` / `add` / `remove` — edit the tracked-asset list
//! - `plot` — series for one spec (default view when no symbol is given)
//! - `ratio` — close ratio of two symbols; tracks the pair
//! - `refresh` — refresh every tracked asset, or one
//! - `status` — per-asset freshness
//! - `watch` — run the background scheduler and report each pass
//!
//! Results are printed as JSON. Failures print an error body to stderr and
//! exit with status 1.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tickerwatch_core::data::{
    BinanceProvider, CircuitBreaker, MarketDataProvider, SyntheticProvider,
};
use tickerwatch_core::{
    AssetRequest, AssetResponse, ChartType, ErrorBody, MarketService, MarketView,
    PlotRatioRequest, PlotRequest, RefreshResponse, ServiceError, WatchConfig,
};
use tracing_subscriber::EnvFilter;

/// Config file picked up from the working directory when `--config` is absent.
const DEFAULT_CONFIG_FILE: &str = "tickerwatch.toml";

#[derive(Parser)]
#[command(
    name = "tickerwatch",
    about = "TickerWatch CLI — tracked crypto assets, refreshed in the background"
)]
struct Cli {
    /// Path to a TOML config file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Asset list file (overrides `[registry] path`).
    #[arg(long, global = true)]
    assets: Option<PathBuf>,

    /// Use deterministic synthetic data instead of Binance.
    #[arg(long, global = true, default_value_t = false)]
    synthetic: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the tracked assets.
    List,
    /// Track an asset (`BTCUSDT` or `ETHUSDT/BTCUSDT`).
    Add { asset: String },
    /// Stop tracking an asset.
    Remove { asset: String },
    /// Series for a symbol or ratio spec.
    Plot {
        /// Symbol or `A/B` spec. Defaults to the first tracked asset.
        symbol: Option<String>,

        /// Kline interval (e.g. 1h, 4h, 1d).
        #[arg(long)]
        interval: Option<String>,

        /// Number of candles.
        #[arg(long)]
        limit: Option<usize>,

        /// candlestick or line.
        #[arg(long, value_parser = parse_chart_type)]
        chart_type: Option<ChartType>,

        /// Print every candle instead of a summary.
        #[arg(long, default_value_t = false)]
        full: bool,
    },
    /// Close ratio of two symbols.
    Ratio {
        symbol1: String,
        symbol2: String,

        #[arg(long)]
        interval: Option<String>,

        #[arg(long)]
        limit: Option<usize>,
    },
    /// Refresh every tracked asset, or just one.
    Refresh { asset: Option<String> },
    /// Freshness of every tracked asset.
    Status,
    /// Run the scheduler in the foreground.
    Watch {
        /// Exit after this many scheduled passes.
        #[arg(long)]
        passes: Option<u64>,
    },
}

fn parse_chart_type(raw: &str) -> Result<ChartType, String> {
    match raw.to_ascii_lowercase().as_str() {
        "candlestick" => Ok(ChartType::Candlestick),
        "line" => Ok(ChartType::Line),
        other => Err(format!("unknown chart type '{other}' (candlestick or line)")),
    }
}

/// Compact form of a plot for terminal output.
#[derive(Serialize)]
struct PlotSummary<'a> {
    spec: String,
    chart_type: ChartType,
    interval: String,
    status: &'a tickerwatch_core::DataStatus,
    refreshed_at: String,
    points: usize,
    last_close: Option<f64>,
    last_ratio: Option<f64>,
}

impl<'a> PlotSummary<'a> {
    fn new(chart_type: ChartType, view: &'a MarketView) -> Self {
        Self {
            spec: view.spec.to_string(),
            chart_type,
            interval: view.interval.to_string(),
            status: &view.status,
            refreshed_at: view.refreshed_at.to_rfc3339(),
            points: view.points(),
            last_close: view.series().and_then(|s| s.last()).map(|c| c.close),
            last_ratio: view
                .ratio()
                .and_then(|r| r.points.last())
                .map(|p| p.ratio),
        }
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref(), cli.assets)?;
    let provider = build_provider(&config, cli.synthetic)?;
    let service = MarketService::open(config, provider).context("failed to open asset list")?;
    tracing::debug!(provider = service.provider_name(), "service ready");

    match cli.command {
        Commands::List => print_json(&service.list_assets()),
        Commands::Add { asset } => {
            let request = AssetRequest { asset };
            emit(request.spec().and_then(|spec| {
                let changed = service.add_asset(&spec)?;
                Ok(AssetResponse {
                    asset: spec,
                    changed,
                    assets: service.list_assets(),
                })
            }))
        }
        Commands::Remove { asset } => {
            let request = AssetRequest { asset };
            emit(request.spec().and_then(|spec| {
                let changed = service.remove_asset(&spec)?;
                Ok(AssetResponse {
                    asset: spec,
                    changed,
                    assets: service.list_assets(),
                })
            }))
        }
        Commands::Plot {
            symbol,
            interval,
            limit,
            chart_type,
            full,
        } => run_plot(&service, symbol, interval, limit, chart_type, full),
        Commands::Ratio {
            symbol1,
            symbol2,
            interval,
            limit,
        } => emit(service.plot_ratio(&PlotRatioRequest {
            symbol1,
            symbol2,
            interval,
            limit,
        })),
        Commands::Refresh { asset: None } => {
            let response = RefreshResponse::from(service.refresh_now());
            let success = response.success;
            print_json(&response)?;
            if !success {
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::Refresh { asset: Some(asset) } => {
            let request = AssetRequest { asset };
            emit(
                request
                    .spec()
                    .and_then(|spec| service.refresh_asset(&spec))
                    .map(|view| PlotSummary::new(ChartType::default(), &view).to_json()),
            )
        }
        Commands::Status => print_json(&service.status()),
        Commands::Watch { passes } => run_watch(&service, passes),
    }
}

fn load_config(path: Option<&Path>, assets: Option<PathBuf>) -> Result<WatchConfig> {
    let mut config = match path {
        Some(path) => WatchConfig::from_file(path)?,
        None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
            WatchConfig::from_file(Path::new(DEFAULT_CONFIG_FILE))?
        }
        None => WatchConfig::default(),
    };
    if let Some(assets) = assets {
        config.registry.path = assets;
    }
    config.validate()?;
    Ok(config)
}

fn build_provider(config: &WatchConfig, synthetic: bool) -> Result<Arc<dyn MarketDataProvider>> {
    if synthetic {
        return Ok(Arc::new(SyntheticProvider::new()));
    }
    let breaker = Arc::new(CircuitBreaker::new(
        Duration::from_secs(config.provider.breaker_cooldown_secs),
        config.provider.breaker_threshold,
    ));
    let provider = BinanceProvider::new(&config.provider, breaker)?;
    Ok(Arc::new(provider))
}

fn run_plot(
    service: &MarketService,
    symbol: Option<String>,
    interval: Option<String>,
    limit: Option<usize>,
    chart_type: Option<ChartType>,
    full: bool,
) -> Result<()> {
    let result = match symbol {
        Some(symbol) => service.plot(&PlotRequest {
            symbol,
            interval,
            limit,
            chart_type,
        }),
        None => service
            .default_view()
            .map(|view| tickerwatch_core::PlotResponse {
                chart_type: chart_type.unwrap_or_default(),
                view,
            }),
    };

    if full {
        emit(result)
    } else {
        emit(result.map(|r| PlotSummary::new(r.chart_type, &r.view).to_json()))
    }
}

fn run_watch(service: &MarketService, max_passes: Option<u64>) -> Result<()> {
    let initial = service.start()?;
    tracing::info!(
        assets = service.list_assets().len(),
        refreshed = initial.refreshed.len(),
        failed = initial.failed.len(),
        period_secs = service.config().refresh.period_secs,
        "watching"
    );

    let poll = service.config().refresh.period().min(Duration::from_secs(1));
    let mut reported = 0;
    loop {
        thread::sleep(poll);
        let passes = service.scheduled_passes().unwrap_or(0);
        if passes > reported {
            reported = passes;
            if let Some(report) = service.last_scheduled_report() {
                print_json(&RefreshResponse::from(report))?;
            }
        }
        if max_passes.is_some_and(|max| reported >= max) {
            break;
        }
    }

    service.stop();
    print_json(&service.status())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print a service result, or its error body and exit 1.
fn emit<T: Serialize>(result: Result<T, ServiceError>) -> Result<()> {
    match result {
        Ok(value) => print_json(&value),
        Err(e) => {
            eprintln!("{}", serde_json::to_string_pretty(&ErrorBody::from(&e))?);
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "tickerwatch",
            "plot",
            "BTCUSDT",
            "--interval",
            "4h",
            "--chart-type",
            "line",
            "--synthetic",
        ])
        .unwrap();
        assert!(cli.synthetic);
        match cli.command {
            Commands::Plot {
                symbol,
                interval,
                chart_type,
                ..
            } => {
                assert_eq!(symbol.as_deref(), Some("BTCUSDT"));
                assert_eq!(interval.as_deref(), Some("4h"));
                assert_eq!(chart_type, Some(ChartType::Line));
            }
            _ => panic!("expected plot"),
        }
    }

    #[test]
    fn assets_flag_overrides_config() {
        let config = load_config(None, Some(PathBuf::from("/tmp/custom.txt"))).unwrap();
        assert_eq!(config.registry.path, PathBuf::from("/tmp/custom.txt"));
    }

    #[test]
    fn rejects_unknown_chart_type() {
        assert!(parse_chart_type("bar").is_err());
        assert_eq!(parse_chart_type("LINE").unwrap(), ChartType::Line);
    }
}
