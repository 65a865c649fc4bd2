//! Pairs Trader - Main Entry Point
//!
//! Research commands (scan, backtest, optimize, fetch) work on wide price
//! CSV files; `live` runs the webhook signal loop.

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use clap::{Parser, Subcommand};
use pairs_trader::backtest::{
    run_backtest, BacktestConfig, PerformanceSummary, RandomSearch, SearchRunner, TrialParams,
};
use pairs_trader::config::Config;
use pairs_trader::data::PriceTable;
use pairs_trader::exchange::{fetch_price_table, BitgetClient, Timeframe};
use pairs_trader::execution::WebhookClient;
use pairs_trader::live::{LiveSignalLoop, WallClockTrigger};
use pairs_trader::persistence::PairStateStore;
use pairs_trader::stats::EngleGranger;
use pairs_trader::strategy::{CointegrationMatrix, CointegrationSelector, SelectedPair};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

/// Pairs Trader CLI
#[derive(Parser)]
#[command(name = "pairs-trader")]
#[command(version, about = "Cointegration pairs trading with webhook execution")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Score every pair for cointegration and show the best candidate
    Scan {
        /// Path to wide price CSV
        #[arg(short, long)]
        data: String,

        /// Comma-separated subset of columns to scan
        #[arg(short, long)]
        symbols: Option<String>,

        /// Also show the current z-score of the best pair for this window
        #[arg(short, long)]
        window: Option<usize>,
    },

    /// Backtest the best pair with fixed parameters
    Backtest {
        /// Path to wide price CSV
        #[arg(short, long)]
        data: String,

        /// Rolling z-score window in bars
        #[arg(short, long)]
        window: usize,

        /// Entry threshold in standard deviations
        #[arg(short, long)]
        threshold: f64,

        /// Comma-separated subset of columns to select from
        #[arg(short, long)]
        symbols: Option<String>,

        /// Bar size of the data (sets the annualization base)
        #[arg(long, default_value = "15m")]
        timeframe: String,

        /// Override the number of bars per year
        #[arg(long)]
        periods_per_year: Option<f64>,

        /// Output directory for results
        #[arg(short, long)]
        output: Option<String>,
    },

    /// Search the window and threshold maximising the Sharpe ratio
    Optimize {
        /// Path to wide price CSV
        #[arg(short, long)]
        data: String,

        /// Comma-separated subset of columns to select from
        #[arg(short, long)]
        symbols: Option<String>,

        /// Number of trials (default from config)
        #[arg(short = 'n', long)]
        trials: Option<usize>,

        /// Number of parallel backtests (default from config)
        #[arg(short, long)]
        parallelism: Option<usize>,

        /// Sampler seed
        #[arg(long)]
        seed: Option<u64>,

        /// Bar size of the data (sets the annualization base)
        #[arg(long, default_value = "15m")]
        timeframe: String,

        /// Override the number of bars per year
        #[arg(long)]
        periods_per_year: Option<f64>,

        /// Output directory for results
        #[arg(short, long)]
        output: Option<String>,
    },

    /// Download closes from Bitget into a wide price CSV
    Fetch {
        /// Comma-separated instruments, e.g. DOGE/USDT:USDT,ADA/USDT:USDT
        #[arg(short, long)]
        symbols: String,

        #[arg(short, long, default_value = "15m")]
        timeframe: String,

        /// Days of history ending now
        #[arg(long, default_value = "30")]
        days: i64,

        /// Output CSV path
        #[arg(short, long)]
        output: String,
    },

    /// Run the live signal loop (default)
    Live {
        /// Path to SQLite database (default from config)
        #[arg(long)]
        db: Option<String>,
    },

    /// Show persisted pair states and recent dispatches
    Status {
        /// Path to SQLite database (default from config)
        #[arg(long)]
        db: Option<String>,

        /// Number of dispatches to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging()?;

    let config = Config::load()?;
    config.validate()?;

    match cli.command {
        Some(Commands::Scan {
            data,
            symbols,
            window,
        }) => run_scan(&config, &data, symbols.as_deref(), window),
        Some(Commands::Backtest {
            data,
            window,
            threshold,
            symbols,
            timeframe,
            periods_per_year,
            output,
        }) => run_single_backtest(
            &config,
            &data,
            symbols.as_deref(),
            TrialParams { window, threshold },
            annualization(&timeframe, periods_per_year)?,
            output.as_deref(),
        ),
        Some(Commands::Optimize {
            data,
            symbols,
            trials,
            parallelism,
            seed,
            timeframe,
            periods_per_year,
            output,
        }) => {
            run_optimize(
                &config,
                &data,
                symbols.as_deref(),
                trials.unwrap_or(config.search.n_trials),
                parallelism.unwrap_or(config.search.parallelism),
                seed.or(config.search.seed),
                annualization(&timeframe, periods_per_year)?,
                output.as_deref(),
            )
            .await
        }
        Some(Commands::Fetch {
            symbols,
            timeframe,
            days,
            output,
        }) => run_fetch(&config, &symbols, &timeframe, days, &output).await,
        Some(Commands::Status { db, limit }) => {
            show_status(db.as_deref().unwrap_or(&config.live.state_db), limit)
        }
        Some(Commands::Live { db }) => run_live(&config, db).await,
        None => run_live(&config, None).await,
    }
}

/// Initialize logging to stdout and an hourly rolling file.
fn init_logging() -> Result<()> {
    use tracing_subscriber::fmt::writer::MakeWriterExt;

    std::fs::create_dir_all("logs")?;

    let file_appender = tracing_appender::rolling::hourly("logs", "pairs-trader.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    // Keep the writer alive for the program duration
    Box::leak(Box::new(guard));

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("pairs_trader=debug".parse()?)
                .add_directive(Level::INFO.into()),
        )
        .with_writer(std::io::stdout.and(file_writer))
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .init();

    Ok(())
}

/// Log configuration on startup.
fn log_config(config: &Config) {
    info!("📋 Configuration:");
    info!("   Timeframe: {}", config.live.timeframe);
    info!("   Buffer Bars: {}", config.live.buffer_bars);
    info!("   Tick Offset: {}s", config.live.tick_offset_secs);
    info!("   Webhook: {}", config.webhook.url);
    info!("   State DB: {}", config.live.state_db);
    info!("   Tracked Pairs: {}", config.live.pairs.len());
}

fn split_symbols(list: &str) -> Vec<String> {
    list.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn annualization(timeframe: &str, periods_per_year: Option<f64>) -> Result<BacktestConfig> {
    let timeframe: Timeframe = timeframe.parse()?;
    let mut config = BacktestConfig::for_timeframe(timeframe);
    if let Some(periods) = periods_per_year {
        anyhow::ensure!(periods > 0.0, "periods-per-year must be positive");
        config.periods_per_year = periods;
    }
    Ok(config)
}

fn load_table(data_path: &str, symbols: Option<&str>) -> Result<PriceTable> {
    info!("📊 Loading data from: {}", data_path);
    let table = PriceTable::from_csv(data_path)?;

    let table = match symbols {
        Some(list) => table.select(&split_symbols(list))?,
        None => table,
    };

    if let (Some(first), Some(last)) = (table.index().first(), table.index().last()) {
        info!(
            "   Data range: {} to {}",
            first.format("%Y-%m-%d %H:%M"),
            last.format("%Y-%m-%d %H:%M")
        );
    }
    info!("   Instruments: {}", table.width());
    info!("   Bars: {}", table.len());

    Ok(table)
}

fn selector(config: &Config) -> CointegrationSelector {
    CointegrationSelector::new(
        Arc::new(EngleGranger::new(config.selection.max_lag)),
        config.selection.significance,
    )
}

fn print_matrix(matrix: &CointegrationMatrix) {
    let names = matrix.names();
    let width = names.iter().map(|n| n.len()).max().unwrap_or(8).max(8);

    print!("{:width$} ", "", width = width);
    for name in names {
        print!("{:>width$} ", name, width = width);
    }
    println!();

    for i in 0..matrix.size() {
        print!("{:width$} ", names[i], width = width);
        for j in 0..matrix.size() {
            if j > i {
                print!("{:>width$.4} ", matrix.p_value(i, j), width = width);
            } else {
                print!("{:>width$} ", "-", width = width);
            }
        }
        println!();
    }
}

/// Score the universe and print the candidate pairs.
fn run_scan(
    config: &Config,
    data_path: &str,
    symbols: Option<&str>,
    window: Option<usize>,
) -> Result<()> {
    info!("╔════════════════════════════════════════════════════════════╗");
    info!("║              COINTEGRATION SCAN                            ║");
    info!("╚════════════════════════════════════════════════════════════╝");

    let table = load_table(data_path, symbols)?;
    let (matrix, pair) = selector(config).select(&table)?;

    println!("\n📐 Engle-Granger p-values");
    print_matrix(&matrix);

    let candidates = matrix.ranked_candidates();
    println!(
        "\n🔎 Candidate pairs (p < {}): {}",
        matrix.significance(),
        candidates.len()
    );
    for (rank, candidate) in candidates.iter().enumerate() {
        println!(
            "   #{:<3} {} / {} | t-stat: {:.4} | p-value: {:.6}",
            rank + 1,
            candidate.name1,
            candidate.name2,
            candidate.statistic,
            candidate.p_value
        );
    }

    println!("\n🏆 Best pair: {} / {} (p-value {:.6})", pair.name1, pair.name2, pair.p_value);
    if candidates.is_empty() {
        warn!("No pair passes the significance level; the best pair is not cointegrated");
    }

    if let Some(window) = window {
        let signal = pair.signal(window)?;
        if let (Some(z), Some(ts)) = (signal.zscore.last(), signal.index.last()) {
            println!("   Current z-score (window {}): {:.4} at {}", window, z, ts);
        }
    }

    println!();
    Ok(())
}

fn export_backtest(
    pair: &SelectedPair,
    params: TrialParams,
    backtest_config: BacktestConfig,
    output_dir: Option<&str>,
) -> Result<PerformanceSummary> {
    let signal = pair.signal(params.window)?;
    let record = run_backtest(&signal, params.threshold)?;
    let summary = PerformanceSummary::calculate(&record, backtest_config.periods_per_year)?;

    info!("   Bars traded: {} | Position changes: {}", record.len(), record.trade_count());

    if let Some(dir) = output_dir {
        std::fs::create_dir_all(dir)?;

        let record_path = format!("{}/backtest.csv", dir);
        record.to_csv(&record_path)?;
        info!("📁 Backtest saved to: {}", record_path);

        let metrics_path = format!("{}/metrics.csv", dir);
        summary.to_csv(&metrics_path)?;
        info!("📁 Metrics saved to: {}", metrics_path);
    }

    Ok(summary)
}

/// Run a single backtest with the given parameters.
fn run_single_backtest(
    config: &Config,
    data_path: &str,
    symbols: Option<&str>,
    params: TrialParams,
    backtest_config: BacktestConfig,
    output_dir: Option<&str>,
) -> Result<()> {
    info!("╔════════════════════════════════════════════════════════════╗");
    info!("║              BACKTEST MODE                                 ║");
    info!("╚════════════════════════════════════════════════════════════╝");

    let table = load_table(data_path, symbols)?;
    let (_, pair) = selector(config).select(&table)?;

    info!("📈 Pair: {} / {} (p-value {:.6})", pair.name1, pair.name2, pair.p_value);
    info!(
        "🔧 Window: {} | Threshold: {:.4} | Periods/year: {:.0}",
        params.window, params.threshold, backtest_config.periods_per_year
    );

    let summary = export_backtest(&pair, params, backtest_config, output_dir)?;
    println!("\n{}", summary.summary());

    Ok(())
}

/// Run the hyperparameter search and export the winning backtest.
#[allow(clippy::too_many_arguments)]
async fn run_optimize(
    config: &Config,
    data_path: &str,
    symbols: Option<&str>,
    n_trials: usize,
    parallelism: usize,
    seed: Option<u64>,
    backtest_config: BacktestConfig,
    output_dir: Option<&str>,
) -> Result<()> {
    info!("╔════════════════════════════════════════════════════════════╗");
    info!("║           PARAMETER SEARCH MODE                            ║");
    info!("╚════════════════════════════════════════════════════════════╝");

    let table = load_table(data_path, symbols)?;
    let (_, pair) = selector(config).select(&table)?;
    let pair = Arc::new(pair);

    let space = config.search.space();
    info!("📈 Pair: {} / {} (p-value {:.6})", pair.name1, pair.name2, pair.p_value);
    info!(
        "🔧 Window: [{}, {}] | Threshold: [{:.2}, {:.2}]",
        space.window_min, space.window_max, space.threshold_min, space.threshold_max
    );
    info!("⚡ Trials: {} | Parallelism: {}", n_trials, parallelism);

    let runner = SearchRunner::new(space, n_trials, parallelism, backtest_config.periods_per_year);
    let mut sampler = RandomSearch::new(n_trials, config.search.startup_trials, seed);
    let results = runner.run(pair.clone(), &mut sampler).await?;

    println!("\n{}", results.summary());

    if let Some(dir) = output_dir {
        std::fs::create_dir_all(dir)?;
        let trials_path = format!("{}/trials.csv", dir);
        results.to_csv(&trials_path)?;
        info!("📁 Trials saved to: {}", trials_path);
    }

    let Some(best) = results.best().filter(|t| !t.is_degenerate()) else {
        warn!("⚠️  Every trial was degenerate; nothing to export");
        return Ok(());
    };

    let summary = export_backtest(&pair, best.params, backtest_config, output_dir)?;
    println!("{}", summary.summary());

    println!("Add to config.toml to trade this pair live:\n");
    println!("[[live.pairs]]");
    println!("s1 = \"{}\"", pair.name1);
    println!("s2 = \"{}\"", pair.name2);
    println!("s1_exec_symbol = \"{}\"", exec_symbol_hint(&pair.name1));
    println!("s2_exec_symbol = \"{}\"", exec_symbol_hint(&pair.name2));
    println!("window = {}", best.params.window);
    println!("threshold = {:.4}\n", best.params.threshold);

    Ok(())
}

/// `DOGE/USDT:USDT` -> `DOGE_USDT`.
fn exec_symbol_hint(instrument: &str) -> String {
    let pair = instrument.split(':').next().unwrap_or(instrument);
    pair.replace('/', "_")
}

/// Download history for the given instruments into a wide CSV.
async fn run_fetch(
    config: &Config,
    symbols: &str,
    timeframe: &str,
    days: i64,
    output: &str,
) -> Result<()> {
    let instruments = split_symbols(symbols);
    anyhow::ensure!(!instruments.is_empty(), "no symbols given");
    anyhow::ensure!(days > 0, "days must be positive");
    let timeframe: Timeframe = timeframe.parse()?;

    let client = BitgetClient::new(&config.exchange)?;
    let end = Utc::now();
    let start = end - Duration::days(days);

    info!(
        "📡 [FETCH] {} instruments, {} bars, {} to {}",
        instruments.len(),
        timeframe,
        start.format("%Y-%m-%d %H:%M"),
        end.format("%Y-%m-%d %H:%M")
    );

    let table = fetch_price_table(&client, &instruments, timeframe, start, end).await?;
    table.to_csv(output)?;

    info!("📁 {} aligned bars saved to: {}", table.len(), output);
    Ok(())
}

/// Run the live signal loop until Ctrl-C.
async fn run_live(config: &Config, db: Option<String>) -> Result<()> {
    info!("╔════════════════════════════════════════════════════════════╗");
    info!(
        "║       Pairs Trader v{} - Live Signals                    ║",
        env!("CARGO_PKG_VERSION")
    );
    info!("╚════════════════════════════════════════════════════════════╝");

    config.validate_live()?;
    log_config(config);

    let db_path = db.unwrap_or_else(|| config.live.state_db.clone());
    if let Some(parent) = Path::new(&db_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }

    let store = PairStateStore::new(&db_path)?;
    let provider = Arc::new(BitgetClient::new(&config.exchange)?);
    let dispatcher = Arc::new(WebhookClient::new(&config.webhook)?);
    let mut live = LiveSignalLoop::new(config, provider, dispatcher, store)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("🛑 Shutdown signal received");
        shutdown_tx.send(true).ok();
    });

    let mut trigger =
        WallClockTrigger::new(config.live.timeframe, config.live.tick_offset_secs, shutdown_rx);
    live.run(&mut trigger).await?;

    info!("👋 Pairs Trader shutdown complete");
    Ok(())
}

/// Print persisted pair states and the dispatch log.
fn show_status(db_path: &str, limit: usize) -> Result<()> {
    println!("╔════════════════════════════════════════════════════════════╗");
    println!("║              LIVE PAIRS STATUS                             ║");
    println!("╚════════════════════════════════════════════════════════════╝");

    if !Path::new(db_path).exists() {
        println!("\n❌ Database not found: {}", db_path);
        println!("   The live loop has not been started yet, or the database path is incorrect.");
        return Ok(());
    }

    let store = PairStateStore::new(db_path)?;
    let mut pairs: Vec<_> = store.load_pairs()?.into_values().collect();
    pairs.sort_by(|a, b| a.pair_id.cmp(&b.pair_id));

    if pairs.is_empty() {
        println!("\n❌ No pair states saved yet.");
    }

    for pair in &pairs {
        let (s1, s2) = pair.state.legs();
        println!("\n📈 {}", pair.pair_id);
        println!("   ├─ State:       {}", pair.state);
        println!("   ├─ Legs:        S1 {} | S2 {}", s1, s2);
        println!("   ├─ Window:      {}", pair.window);
        println!("   ├─ Threshold:   {:.4}", pair.threshold);
        match pair.last_zscore {
            Some(z) => println!("   ├─ Last Z:      {:.4}", z),
            None => println!("   ├─ Last Z:      n/a"),
        }
        println!(
            "   └─ Updated:     {}",
            pair.updated_at.format("%Y-%m-%d %H:%M:%S UTC")
        );
    }

    let dispatches = store.recent_dispatches(limit)?;
    if !dispatches.is_empty() {
        println!("\n📨 Recent Dispatches");
        for d in &dispatches {
            let status = if d.success { "✅" } else { "❌" };
            println!(
                "   {} {} | {} {} {} {}{}",
                status,
                d.timestamp.format("%Y-%m-%d %H:%M:%S"),
                d.pair_id,
                d.leg,
                d.action,
                d.symbol,
                d.error.as_deref().map(|e| format!(" ({})", e)).unwrap_or_default()
            );
        }
    }

    println!();
    Ok(())
}
