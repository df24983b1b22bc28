//! BistLab CLI — scan, signal, backtest, universe and serve commands.
//!
//! Commands:
//! - `scan` — score the universe and print today's sector-diversified picks
//! - `signal` — score and plan a single ticker
//! - `backtest` — replay the strategy over history from a TOML config
//! - `universe` — print the sector map
//! - `serve` — run the scheduler, polling loops and fan-out until Ctrl-C

use anyhow::{anyhow, Result};
use chrono::{Duration as ChronoDuration, NaiveTime};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use bistlab_core::data::{
    normalize_ticker, CacheConfig, CachingSource, CircuitBreaker, FallbackSource,
    MarketDataSource, SyntheticSource, YahooSource,
};
use bistlab_core::{
    Clock, ExchangeCalendar, Interval, ManualClock, Period, Signal, SystemClock, Universe,
};
use bistlab_live::{LiveConfig, Runtime as LiveRuntime};
use bistlab_runner::backtest::save_artifacts;
use bistlab_runner::{
    load_history, BacktestConfig, BacktestReport, Backtester, DailyPicks, HybridSignalGenerator,
    PicksService, PicksStore, ScanConfig,
};

#[derive(Parser)]
#[command(
    name = "bistlab",
    about = "BistLab CLI — BIST trend and pullback signal service"
)]
struct Cli {
    /// Emit logs as JSON lines instead of text.
    #[arg(long, global = true, default_value_t = false)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan the universe and print today's picks.
    Scan {
        /// Maximum number of picks (one per sector).
        #[arg(long)]
        max_picks: Option<usize>,

        /// Minimum total score for a pick.
        #[arg(long)]
        min_score: Option<u8>,

        /// Use synthetic data instead of Yahoo Finance.
        #[arg(long, default_value_t = false)]
        synthetic: bool,

        /// Persist the picks to this JSON file.
        #[arg(long)]
        picks_file: Option<PathBuf>,

        /// Universe TOML. Defaults to the built-in BIST-30.
        #[arg(long)]
        universe: Option<PathBuf>,
    },
    /// Score and plan a single ticker.
    Signal {
        /// Ticker, with or without the `.IS` suffix.
        ticker: String,

        /// Bar interval: 1m, 2m, 5m, 15m, 30m, 60m, 90m, 1h, 1d.
        #[arg(long, default_value = "1d")]
        interval: Interval,

        /// Lookback period: 1d, 5d, 1mo, 3mo, 6mo, 1y, 2y, 5y, max.
        #[arg(long, default_value = "1y")]
        period: Period,

        /// Use synthetic data instead of Yahoo Finance.
        #[arg(long, default_value_t = false)]
        synthetic: bool,
    },
    /// Replay the strategy over history from a TOML config.
    Backtest {
        /// Path to a backtest TOML config file.
        #[arg(long)]
        config: PathBuf,

        /// Use synthetic data instead of Yahoo Finance.
        #[arg(long, default_value_t = false)]
        synthetic: bool,

        /// Output directory for report.json, trades.csv and equity.csv.
        #[arg(long, default_value = "results")]
        output_dir: PathBuf,
    },
    /// Print the universe grouped by sector.
    Universe {
        /// Universe TOML. Defaults to the built-in BIST-30.
        #[arg(long)]
        universe: Option<PathBuf>,
    },
    /// Run the live service until Ctrl-C.
    Serve {
        /// Path to a live TOML config file.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Use synthetic data instead of Yahoo Finance.
        #[arg(long, default_value_t = false)]
        synthetic: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Commands::Scan {
            max_picks,
            min_score,
            synthetic,
            picks_file,
            universe,
        } => run_scan(max_picks, min_score, synthetic, picks_file, universe),
        Commands::Signal {
            ticker,
            interval,
            period,
            synthetic,
        } => run_signal(&ticker, interval, period, synthetic),
        Commands::Backtest {
            config,
            synthetic,
            output_dir,
        } => run_backtest_cmd(&config, synthetic, &output_dir),
        Commands::Universe { universe } => run_universe(universe.as_deref()),
        Commands::Serve { config, synthetic } => run_serve(config, synthetic),
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.compact().init();
    }
}

fn load_universe(path: Option<&Path>) -> Result<Universe> {
    match path {
        Some(p) => Ok(Universe::from_file(p)?),
        None => Ok(Universe::bist30()),
    }
}

/// Synthetic bars only, or Yahoo behind the cache with a synthetic fallback.
fn build_source(
    clock: Arc<dyn Clock>,
    synthetic: bool,
    fetch_timeout_secs: u64,
) -> Result<Arc<dyn MarketDataSource>> {
    let fake = SyntheticSource::new(Arc::clone(&clock), ExchangeCalendar::bist());
    if synthetic {
        return Ok(Arc::new(fake));
    }
    let yahoo = YahooSource::new(
        Arc::new(CircuitBreaker::default_provider()),
        Duration::from_secs(fetch_timeout_secs),
    )?;
    let cached = CachingSource::new(yahoo, clock, CacheConfig::default());
    Ok(Arc::new(FallbackSource::new(cached, fake)))
}

fn generator(
    config: ScanConfig,
    synthetic: bool,
    universe: Universe,
) -> Result<HybridSignalGenerator> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let source = build_source(Arc::clone(&clock), synthetic, config.fetch_timeout_secs)?;
    Ok(HybridSignalGenerator::new(
        source,
        clock,
        ExchangeCalendar::bist(),
        universe,
        config,
    ))
}

fn run_scan(
    max_picks: Option<usize>,
    min_score: Option<u8>,
    synthetic: bool,
    picks_file: Option<PathBuf>,
    universe: Option<PathBuf>,
) -> Result<()> {
    let mut config = ScanConfig::default();
    if let Some(n) = max_picks {
        config.max_picks = n;
    }
    if let Some(s) = min_score {
        config.min_score = s;
    }
    config.validate()?;

    let universe = load_universe(universe.as_deref())?;
    let service = PicksService::new(
        generator(config, synthetic, universe)?,
        picks_file.map(PicksStore::new),
    );
    let picks = service.daily_picks(true);
    print_picks(&picks);
    Ok(())
}

fn run_signal(ticker: &str, interval: Interval, period: Period, synthetic: bool) -> Result<()> {
    let generator = generator(ScanConfig::default(), synthetic, Universe::bist30())?;
    let signal = generator.per_ticker_signal(ticker, interval, period)?;
    print_signal(&signal);
    Ok(())
}

fn run_backtest_cmd(config_path: &Path, synthetic: bool, output_dir: &Path) -> Result<()> {
    let config = BacktestConfig::from_file(config_path)?;
    let universe = load_universe(config.universe.as_deref())?;

    // Synthetic history is generated backwards from the clock, so anchor it
    // at the end of the backtest range.
    let clock: Arc<dyn Clock> = if synthetic {
        let close = config.end.and_time(NaiveTime::MIN) + ChronoDuration::hours(16);
        Arc::new(ManualClock::new(close.and_utc()))
    } else {
        Arc::new(SystemClock)
    };
    let source = build_source(clock, synthetic, ScanConfig::default().fetch_timeout_secs)?;

    let tickers: Vec<String> = if config.tickers.is_empty() {
        universe.all_tickers()
    } else {
        config.tickers.iter().map(|t| normalize_ticker(t)).collect()
    };
    let history = load_history(
        source.as_ref(),
        &tickers,
        &config.index_ticker,
        config.period,
    );

    let backtester = Backtester::new(config, &universe, ExchangeCalendar::bist())?;
    let report = backtester.run(&history)?;
    print_report(&report);

    let run_dir = save_artifacts(&report, output_dir)?;
    println!("Artifacts saved to: {}", run_dir.display());
    Ok(())
}

fn run_universe(path: Option<&Path>) -> Result<()> {
    let universe = load_universe(path)?;
    println!(
        "Universe: {} tickers in {} sectors",
        universe.ticker_count(),
        universe.sector_names().len()
    );
    println!();
    for (sector, tickers) in &universe.sectors {
        println!("{:<16} {}", sector, tickers.join(", "));
    }
    Ok(())
}

fn run_serve(config_path: Option<PathBuf>, synthetic: bool) -> Result<()> {
    let config = match config_path {
        Some(path) => LiveConfig::from_file(&path)?,
        None => LiveConfig::default(),
    };
    let universe = load_universe(config.universe.as_deref())?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let source = build_source(Arc::clone(&clock), synthetic, config.scan.fetch_timeout_secs)?;

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| anyhow!("failed to start tokio runtime: {e}"))?;

    rt.block_on(async move {
        let live = LiveRuntime::new(config, source, clock, universe)?;
        let token = CancellationToken::new();
        let shutdown = token.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("shutdown requested");
                    shutdown.cancel();
                }
                Err(e) => error!(error = %e, "could not listen for Ctrl-C"),
            }
        });
        live.run(token).await;
        Ok(())
    })
}

fn print_picks(picks: &DailyPicks) {
    println!();
    println!("=== Daily Picks {} ===", picks.scan_date);
    println!(
        "Market:         {} ({:?})",
        if picks.market_ok { "OK" } else { "WEAK" },
        picks.phase
    );
    println!(
        "Scanned:        {} ({} failed)",
        picks.scanned,
        picks.failures.len()
    );
    println!();
    if picks.picks.is_empty() {
        println!("No ticker reached the minimum score.");
    } else {
        println!(
            "{:<7} {:<16} {:>5} {:<11} {:>9} {:>9} {:>9} {:>9} {:>5}",
            "Ticker", "Sector", "Score", "Rec", "Entry", "Stop", "TP1", "TP2", "R:R"
        );
        println!("{}", "-".repeat(88));
        for s in &picks.picks {
            println!(
                "{:<7} {:<16} {:>5} {:<11} {:>9.2} {:>9.2} {:>9.2} {:>9.2} {:>5.2}",
                s.ticker,
                s.sector,
                s.score.total,
                s.score.recommendation.as_str(),
                s.levels.entry,
                s.levels.stop_loss,
                s.levels.tp1,
                s.levels.tp2,
                s.levels.rr1,
            );
        }
    }
    if picks.picks.iter().any(Signal::is_synthetic) {
        println!();
        println!("WARNING: Picks based on SYNTHETIC data");
    }
    for w in &picks.warnings {
        println!("WARNING: {w}");
    }
    for f in &picks.failures {
        println!("SKIPPED: {} [{}] {}", f.ticker, f.kind, f.message);
    }
    println!();
}

fn print_signal(signal: &Signal) {
    let l = &signal.levels;
    let s = &signal.score;
    println!();
    println!("=== {} ({}) ===", signal.ticker, signal.sector);
    println!(
        "Score:          {} / 100 -> {} ({:?})",
        s.total, s.recommendation, s.quality
    );
    println!(
        "Components:     trend {} / momentum {} / position {} / volume {}",
        s.trend, s.momentum, s.position, s.volume
    );
    println!();
    println!("--- Levels ---");
    println!("Entry:          {:.2}", l.entry);
    println!("Stop:           {:.2} (-{:.2}%)", l.stop_loss, l.sl_pct);
    println!("TP1:            {:.2} (+{:.2}%, R:R {:.2})", l.tp1, l.tp_pct, l.rr1);
    println!("TP2:            {:.2} (R:R {:.2})", l.tp2, l.rr2);
    println!("ATR:            {:.2} ({:.2}%)", l.atr, l.atr_pct);
    println!("Max hold:       {} days", l.max_hold_days);
    if !signal.reasons.is_empty() {
        println!();
        println!("Reasons:        {}", signal.reasons.join(", "));
    }
    if !s.missing_indicators.is_empty() {
        println!("Missing:        {}", s.missing_indicators.join(", "));
    }
    if signal.is_synthetic() {
        println!();
        println!("WARNING: Signal based on SYNTHETIC data");
    }
    println!();
}

fn print_report(report: &BacktestReport) {
    let m = &report.metrics;
    println!();
    println!("=== Backtest Result ===");
    println!(
        "Period:         {} to {}",
        report.config.start, report.config.end
    );
    println!("Trades:         {} ({} won, {} lost)", m.total_trades, m.wins, m.losses);
    println!();
    println!("--- Performance ---");
    println!("Total Return:   {:.2}%", m.total_return * 100.0);
    println!("Final Equity:   {:.2}", m.final_equity);
    println!("Sharpe:         {:.3}", m.sharpe);
    println!("Max Drawdown:   {:.2}%", m.max_drawdown * 100.0);
    println!("Win Rate:       {:.1}%", m.win_rate * 100.0);
    println!("Avg Win:        {:.2}%", m.avg_win_pct);
    println!("Avg Loss:       {:.2}%", m.avg_loss_pct);
    println!("Profit Factor:  {:.2}", m.profit_factor);
    println!("Avg Hold:       {:.1} days", m.avg_holding_days);
    if !report.sector_stats.is_empty() {
        println!();
        println!("--- Sectors ---");
        for s in &report.sector_stats {
            println!(
                "{:<16} {:>3} trades  {:>5.1}% won  {:>12.2} net",
                s.sector,
                s.trades,
                s.win_rate * 100.0,
                s.net_pnl
            );
        }
    }
    println!();
    println!("Run hash:       {}", report.run_hash);
    if report.has_synthetic {
        println!();
        println!("WARNING: Results based on SYNTHETIC data");
    }
    for warn in &report.warnings {
        println!("WARNING: {warn}");
    }
    println!();
}
