//! MarketFlow CLI: build and inspect OHLCV datasets.
//!
//! Commands:
//! - `aggregate`: download one symbol at one interval from CoinAPI into a dataset file
//! - `ingest`: merge rows of a CryptoDataDownload or CryptoTick file into a dataset
//! - `prune`: keep or drop symbols, intervals and time ranges
//! - `view`: print a dataset as a report or as raw JSON

use anyhow::{bail, Context, Result};
use chrono::NaiveDateTime;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use marketflow_core::config::{resolve_api_key, AppConfig};
use marketflow_core::data::{
    ingest_into, parse_user_time, CircuitBreaker, CoinApiSource, IngestFilter, IngestReader,
    IngestTarget, LayoutPreset,
};
use marketflow_core::diagnostics::TracingDiagnostics;
use marketflow_core::domain::{Interval, TimeRange};
use marketflow_core::merge::{MergeEngine, ReconcilePolicy, SymbolKey};
use marketflow_core::prune::{prune_with_report, DatasetFilter};
use marketflow_core::report::{render_dataset, ViewOptions, DEFAULT_POINT_LIMIT};
use marketflow_core::schedule::{aggregate, AggregateRequest, CancelToken, DownloadMode};
use marketflow_core::storage::{StorageFormat, TransparentFormat};

#[derive(Parser)]
#[command(name = "marketflow", about = "MarketFlow CLI: OHLCV dataset aggregation")]
struct Cli {
    /// Log progress and repaired inconsistencies.
    #[arg(long, short, global = true, default_value_t = false)]
    verbose: bool,

    /// Path to a TOML config file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download market data from CoinAPI into a dataset file.
    Aggregate {
        /// Exchange id (e.g., BITSTAMP).
        #[arg(long)]
        exchange: String,

        /// Traded asset (e.g., BTC).
        #[arg(long)]
        base: String,

        /// Quote asset (e.g., USD).
        #[arg(long)]
        quote: String,

        /// Interval notation (e.g., 1DAY, 4h, 15MIN).
        #[arg(long)]
        interval: String,

        /// Start time (YYYY-MM-DD or YYYY-MM-DDTHH:MM:SS). Defaults to the last stored point.
        #[arg(long)]
        from: Option<String>,

        /// End time. Open-ended when omitted.
        #[arg(long)]
        to: Option<String>,

        /// Maximum number of entries to download. Defaults to the configured limit.
        #[arg(long)]
        limit: Option<usize>,

        /// append or fill.
        #[arg(long, default_value = "append")]
        mode: String,

        /// self-healing or strict.
        #[arg(long, default_value = "self-healing")]
        policy: String,

        /// CoinAPI key. Falls back to MARKETFLOW_API_KEY or COINAPI_KEY.
        #[arg(long)]
        api_key: Option<String>,

        /// Store data merged before a failure.
        #[arg(long, default_value_t = false)]
        keep_partial: bool,

        /// Give up after this many seconds. Defaults to the configured timeout.
        #[arg(long)]
        timeout_secs: Option<u64>,

        /// Dataset file or directory. Defaults to the configured output.
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Merge rows of a delimited file into a dataset.
    Ingest {
        /// Input file.
        file: PathBuf,

        /// crypto-data-download or crypto-tick. Detected from the first line when omitted.
        #[arg(long)]
        layout: Option<String>,

        #[arg(long)]
        exchange: String,

        #[arg(long)]
        base: String,

        #[arg(long)]
        quote: String,

        /// Dataset symbol id. Defaults to EXCHANGE_SPOT_BASE_QUOTE.
        #[arg(long)]
        symbol_id: Option<String>,

        /// Only rows whose symbol column equals this (e.g., BTC/USD).
        #[arg(long)]
        file_symbol: Option<String>,

        /// Interval of the rows.
        #[arg(long)]
        interval: String,

        /// Skip rows before this time.
        #[arg(long)]
        from: Option<String>,

        /// Skip rows after this time.
        #[arg(long)]
        to: Option<String>,

        /// Maximum number of rows to take.
        #[arg(long)]
        limit: Option<usize>,

        /// self-healing or strict.
        #[arg(long, default_value = "self-healing")]
        policy: String,

        /// Dataset file or directory. Defaults to the configured output.
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Keep what the inclusion filters match and drop what the exclusion filters match.
    Prune {
        /// Dataset file or directory.
        dataset: PathBuf,

        /// Inclusion filter, `<type>:<value>` with type s|symbol, i|interval, t|time.
        #[arg(long = "include", short = 'i')]
        include: Vec<String>,

        /// Exclusion filter, same grammar as --include.
        #[arg(long = "exclude", short = 'x')]
        exclude: Vec<String>,

        /// Write the result here instead of replacing the input.
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Print a dataset.
    View {
        /// Dataset file or directory.
        dataset: PathBuf,

        /// Print the stored JSON instead of the report.
        #[arg(long, default_value_t = false)]
        raw: bool,

        /// Points shown per flow.
        #[arg(long, default_value_t = DEFAULT_POINT_LIMIT)]
        points: usize,

        /// Omit the term index and symbol metadata.
        #[arg(long, default_value_t = false)]
        no_index: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let config = AppConfig::load_or_default(cli.config.as_deref())?;
    tracing::debug!(config = ?cli.config, "configuration loaded");

    match cli.command {
        Commands::Aggregate {
            exchange,
            base,
            quote,
            interval,
            from,
            to,
            limit,
            mode,
            policy,
            api_key,
            keep_partial,
            timeout_secs,
            output,
        } => {
            let request = AggregateRequest {
                exchange,
                base,
                quote,
                interval: parse_interval_arg(&interval)?,
                from: parse_time_arg("--from", from.as_deref())?,
                to: parse_time_arg("--to", to.as_deref())?,
                limit: limit.unwrap_or(config.aggregate.default_limit),
                mode: mode.parse::<DownloadMode>().map_err(anyhow::Error::msg)?,
                keep_partial,
            };
            let policy = policy.parse::<ReconcilePolicy>().map_err(anyhow::Error::msg)?;
            let output = output.unwrap_or_else(|| config.aggregate.default_output.clone());
            run_aggregate(&config, &request, policy, api_key.as_deref(), timeout_secs, &output)
        }
        Commands::Ingest {
            file,
            layout,
            exchange,
            base,
            quote,
            symbol_id,
            file_symbol,
            interval,
            from,
            to,
            limit,
            policy,
            output,
        } => {
            let layout = layout
                .map(|name| name.parse::<LayoutPreset>().map_err(anyhow::Error::msg))
                .transpose()?;
            let symbol_id = symbol_id.unwrap_or_else(|| {
                format!("{exchange}_SPOT_{base}_{quote}").to_ascii_uppercase()
            });
            let target = IngestTarget {
                key: SymbolKey::new(
                    &symbol_id,
                    &base.to_ascii_uppercase(),
                    &quote.to_ascii_uppercase(),
                    &exchange.to_ascii_uppercase(),
                ),
                interval: parse_interval_arg(&interval)?,
                file_symbol: file_symbol.clone(),
            };
            let filter = IngestFilter {
                symbol: file_symbol,
                range: time_window(
                    parse_time_arg("--from", from.as_deref())?,
                    parse_time_arg("--to", to.as_deref())?,
                )?,
                limit,
            };
            let policy = policy.parse::<ReconcilePolicy>().map_err(anyhow::Error::msg)?;
            let output = output.unwrap_or_else(|| config.aggregate.default_output.clone());
            run_ingest(&file, layout, &target, filter, policy, &output)
        }
        Commands::Prune {
            dataset,
            include,
            exclude,
            output,
        } => run_prune(&dataset, &include, &exclude, output.as_deref()),
        Commands::View {
            dataset,
            raw,
            points,
            no_index,
        } => run_view(
            &dataset,
            raw,
            ViewOptions {
                show_index: !no_index,
                point_limit: points,
            },
        ),
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn parse_interval_arg(raw: &str) -> Result<Interval> {
    raw.parse::<Interval>()
        .with_context(|| format!("invalid interval '{raw}'"))
}

fn parse_time_arg(flag: &str, raw: Option<&str>) -> Result<Option<NaiveDateTime>> {
    raw.map(|value| parse_user_time(value).with_context(|| format!("invalid {flag} value '{value}'")))
        .transpose()
}

fn time_window(from: Option<NaiveDateTime>, to: Option<NaiveDateTime>) -> Result<Option<TimeRange>> {
    match (from, to) {
        (None, None) => Ok(None),
        (Some(from), Some(to)) if from > to => bail!("--from ({from}) is after --to ({to})"),
        (from, to) => Ok(Some(TimeRange::new(
            from.unwrap_or(NaiveDateTime::MIN),
            to.unwrap_or(NaiveDateTime::MAX),
        ))),
    }
}

fn run_aggregate(
    config: &AppConfig,
    request: &AggregateRequest,
    policy: ReconcilePolicy,
    api_key: Option<&str>,
    timeout_secs: Option<u64>,
    output: &Path,
) -> Result<()> {
    if !CoinApiSource::supports(request.interval) {
        bail!(
            "CoinAPI does not offer {} data; supported lengths are 1-6,10,15,20,30 SEC/MIN, 1-4,6,12 HRS, 1-3,5,7,10 DAY, 1-4,6 MTH, 1-5 YRS",
            request.interval.describe()
        );
    }

    let key = resolve_api_key(api_key)?;
    let breaker = Arc::new(
        CircuitBreaker::new(config.source.breaker_cooldown())
            .with_threshold(config.source.breaker_threshold),
    );
    let source = CoinApiSource::new(key, &config.source, breaker, Arc::new(TracingDiagnostics))?;

    let diagnostics = TracingDiagnostics;
    let engine = MergeEngine::new(&diagnostics).with_policy(policy);
    let timeout = timeout_secs
        .map(std::time::Duration::from_secs)
        .unwrap_or_else(|| config.aggregate.timeout());
    let cancel = CancelToken::with_timeout(timeout);

    tracing::info!(
        exchange = %request.exchange,
        base = %request.base,
        quote = %request.quote,
        interval = %request.interval,
        mode = %request.mode,
        limit = request.limit,
        %policy,
        timeout_secs = timeout.as_secs(),
        output = %output.display(),
        "starting aggregation"
    );
    let outcome = match aggregate(request, &source, &TransparentFormat::new(), output, &engine, &cancel) {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::warn!(keep_partial = request.keep_partial, error = %e, "aggregation failed");
            return Err(e.into());
        }
    };
    tracing::info!(
        symbol = %outcome.symbol.symbol_id,
        points = outcome.points,
        requests = outcome.fetches.len(),
        "aggregation stored"
    );

    println!(
        "{} {}: {} new points in {} requests, stored in {}",
        outcome.symbol.symbol_id,
        request.interval.describe(),
        outcome.points,
        outcome.fetches.len(),
        output.display()
    );
    Ok(())
}

fn run_ingest(
    file: &Path,
    layout: Option<LayoutPreset>,
    target: &IngestTarget,
    filter: IngestFilter,
    policy: ReconcilePolicy,
    output: &Path,
) -> Result<()> {
    let storage = TransparentFormat::new();
    if !storage.can_store_to(output) {
        bail!("cannot store a dataset at {}", output.display());
    }
    let base = storage.extract(output)?.unwrap_or_default();

    tracing::info!(
        file = %file.display(),
        layout = ?layout,
        symbol = %target.key.symbol,
        interval = %target.interval,
        output = %output.display(),
        "starting ingest"
    );
    let layout = layout.map(LayoutPreset::layout);
    let reader = IngestReader::open(file, layout.as_ref(), filter)?;
    let diagnostics = TracingDiagnostics;
    let engine = MergeEngine::new(&diagnostics).with_policy(policy);
    let (dataset, summary) = ingest_into(&base, reader, target, &engine)?;
    storage.store(&dataset, output)?;
    tracing::info!(
        points = summary.points_merged,
        rows = summary.rows_read,
        skipped = summary.rows_skipped,
        "ingest stored"
    );

    println!(
        "Ingested {} points for {} {} ({} rows read, {} skipped), stored in {}",
        summary.points_merged,
        target.key.symbol,
        target.interval.describe(),
        summary.rows_read,
        summary.rows_skipped,
        output.display()
    );
    Ok(())
}

fn run_prune(
    dataset_path: &Path,
    include: &[String],
    exclude: &[String],
    output: Option<&Path>,
) -> Result<()> {
    if include.is_empty() && exclude.is_empty() {
        bail!("nothing to prune: pass at least one --include or --exclude filter");
    }
    let inclusion = DatasetFilter::parse(include, DatasetFilter::All)?;
    let exclusion = DatasetFilter::parse(exclude, DatasetFilter::None)?;

    let storage = TransparentFormat::new();
    let Some(dataset) = storage.extract(dataset_path)? else {
        bail!("no dataset at {}", dataset_path.display());
    };
    let output = output.unwrap_or(dataset_path);
    if !storage.can_store_to(output) {
        bail!("cannot store a dataset at {}", output.display());
    }

    tracing::info!(
        dataset = %dataset_path.display(),
        include = include.len(),
        exclude = exclude.len(),
        output = %output.display(),
        "pruning"
    );
    let (pruned, report) = prune_with_report(&dataset, &inclusion, &exclusion, &TracingDiagnostics);
    storage.store(&pruned, output)?;
    tracing::debug!(
        symbols = report.symbols,
        flows = report.flows,
        points = report.points,
        "prune stored"
    );

    println!(
        "Removed {} symbols, {} flows and {} points; {} points remain in {}",
        report.symbols,
        report.flows,
        report.points,
        pruned.point_count(),
        output.display()
    );
    Ok(())
}

fn run_view(dataset_path: &Path, raw: bool, options: ViewOptions) -> Result<()> {
    let storage = TransparentFormat::new();
    let Some(dataset) = storage.extract(dataset_path)? else {
        bail!("no dataset at {}", dataset_path.display());
    };
    tracing::debug!(
        dataset = %dataset_path.display(),
        points = dataset.point_count(),
        raw,
        "viewing dataset"
    );

    if raw {
        println!("{}", serde_json::to_string_pretty(&dataset)?);
    } else {
        print!("{}", render_dataset(&dataset, options));
    }
    Ok(())
}
