//! perpsig CLI: backtest, walk-forward and live signal polling.
//!
//! Commands:
//! - `backtest`: replay CSV (or synthetic) candles and export the results
//! - `walk-forward`: train/test split of the same replay, with degradation flags
//! - `live`: poll public klines, manage positions and persist state
//! - `close`: manually close one live position and persist state

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use perpsig_core::data::MarketData;
use perpsig_core::engine::{Clock, LivePoller, SystemClock};
use perpsig_core::lifecycle::{FanoutSink, TracingSink};
use perpsig_runner::{
    default_evaluator, load_for_config, run_backtest_from_config, run_walk_forward,
    save_artifacts, save_walk_forward, summary_text, BotConfig, JsonFileStore, JsonlEventSink,
    KlinesClient, WalkForwardConfig,
};

#[derive(Parser)]
#[command(name = "perpsig", about = "perpsig: crypto futures signal bot", version)]
struct Cli {
    /// TOML config file. Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug-level logging (overridden by RUST_LOG).
    #[arg(long, short, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay history and export results.
    Backtest {
        /// Use seeded synthetic candles instead of CSV files.
        #[arg(long, default_value_t = false)]
        synthetic: bool,

        /// Comma-separated symbols, overriding the config.
        #[arg(long, value_delimiter = ',')]
        symbols: Option<Vec<String>>,

        /// Print the summary without writing artifacts.
        #[arg(long, default_value_t = false)]
        no_export: bool,
    },
    /// Train on the first part of the range, test on the rest.
    WalkForward {
        #[arg(long, default_value_t = false)]
        synthetic: bool,

        #[arg(long, value_delimiter = ',')]
        symbols: Option<Vec<String>>,

        /// Training share of the date range, overriding the config.
        #[arg(long)]
        train_split: Option<f64>,
    },
    /// Poll the exchange and manage positions.
    Live {
        /// Run a single poll and exit.
        #[arg(long, default_value_t = false)]
        once: bool,
    },
    /// Close one live position now.
    Close {
        symbol: String,

        /// Exit price before slippage. Defaults to the last closed candle.
        #[arg(long)]
        price: Option<f64>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = match &cli.config {
        Some(path) => BotConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => BotConfig::default(),
    };

    match cli.command {
        Commands::Backtest {
            synthetic,
            symbols,
            no_export,
        } => {
            apply_overrides(&mut config, synthetic, symbols);
            run_backtest_cmd(&config, !no_export)
        }
        Commands::WalkForward {
            synthetic,
            symbols,
            train_split,
        } => {
            apply_overrides(&mut config, synthetic, symbols);
            if let Some(split) = train_split {
                config.backtest.train_split = split;
            }
            run_walk_forward_cmd(&config)
        }
        Commands::Live { once } => run_live_cmd(&config, once),
        Commands::Close { symbol, price } => run_close_cmd(&config, &symbol, price),
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "perpsig=debug" } else { "perpsig=info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn apply_overrides(config: &mut BotConfig, synthetic: bool, symbols: Option<Vec<String>>) {
    if synthetic {
        config.backtest.synthetic = true;
    }
    if let Some(symbols) = symbols {
        config.backtest.symbols = symbols;
    }
}

fn run_backtest_cmd(config: &BotConfig, export: bool) -> Result<()> {
    config.validate().context("invalid config")?;
    let loaded = load_for_config(config).context("failed to load candles")?;
    let evaluator = default_evaluator(&config.engine);
    let report = run_backtest_from_config(config, &loaded, evaluator, &mut TracingSink)
        .context("backtest failed")?;

    println!("{}", summary_text(&report));
    if export {
        let run_dir = save_artifacts(&report, &config.backtest.results_dir)?;
        println!("Artifacts saved to: {}", run_dir.display());
    }
    Ok(())
}

fn run_walk_forward_cmd(config: &BotConfig) -> Result<()> {
    config.validate().context("invalid config")?;
    let loaded = load_for_config(config).context("failed to load candles")?;
    let result = run_walk_forward(
        config,
        &loaded.data,
        default_evaluator(&config.engine),
        &WalkForwardConfig::from_bot_config(config),
    )
    .context("walk-forward failed")?;

    println!("split at   {}", result.split_at.format("%Y-%m-%d %H:%M"));
    for (name, m) in [("train", &result.train), ("test", &result.test)] {
        println!(
            "{name:<10} {:>4} trades, win rate {:.1}%, return {:+.2}%, PF {:.2}, max DD {:.2}%",
            m.total_trades, m.win_rate, m.total_return_pct, m.profit_factor, m.max_drawdown_pct
        );
    }
    if result.is_robust() {
        println!("no degradation detected");
    }
    for flag in &result.flags {
        println!("degraded: {}", serde_json::to_string(flag)?);
    }

    let path = save_walk_forward(&result, &config.run_id(), &config.backtest.results_dir)?;
    println!("Saved to: {}", path.display());
    Ok(())
}

fn live_poller(config: &BotConfig) -> Result<(LivePoller, Arc<dyn MarketData>)> {
    config.validate().context("invalid config")?;
    let live = &config.live;

    let client = KlinesClient::new(
        live.base_url.clone(),
        config.backtest.symbols.clone(),
        Duration::from_secs(live.request_timeout_secs),
    )
    .context("failed to build HTTP client")?;
    let data: Arc<dyn MarketData> = Arc::new(client);

    let mut sink = FanoutSink::new().with(TracingSink);
    if let Some(path) = &live.event_log {
        let log = JsonlEventSink::open(path)
            .with_context(|| format!("failed to open event log {}", path.display()))?;
        sink = sink.with(log);
    }

    let poller = LivePoller::new(
        config.engine.clone(),
        default_evaluator(&config.engine),
        Arc::clone(&data),
        Box::new(JsonFileStore::new(&live.state_file)),
        Box::new(sink),
        config.backtest.symbols.clone(),
    )
    .with_context(|| format!("failed to load state from {}", live.state_file.display()))?;
    Ok((poller, data))
}

fn run_close_cmd(config: &BotConfig, symbol: &str, price: Option<f64>) -> Result<()> {
    let (mut poller, data) = live_poller(config)?;
    if !poller.desk().book().contains(symbol) {
        bail!("no open position for {symbol}");
    }
    let now = SystemClock.now();
    let price = match price {
        Some(p) => p,
        None => data
            .window(symbol, config.engine.timeframes.entry, now, 1)
            .with_context(|| format!("failed to fetch the last price of {symbol}"))?
            .last()
            .map(|c| c.close)
            .with_context(|| format!("no recent candle for {symbol}"))?,
    };
    if let Some(trade) = poller.manual_close(symbol, price, now) {
        println!(
            "closed {} {} at {:.4} pnl ${:.2} ({:+.2}%)",
            trade.id, trade.direction, trade.exit_price, trade.pnl, trade.pnl_percent
        );
    }
    Ok(())
}

fn run_live_cmd(config: &BotConfig, once: bool) -> Result<()> {
    let live = &config.live;
    let (mut poller, _) = live_poller(config)?;

    info!(
        symbols = config.backtest.symbols.len(),
        open = poller.desk().book().len(),
        interval_secs = live.interval_secs,
        "live polling started"
    );
    let max_polls = once.then_some(1);
    let summaries = poller.run(
        &SystemClock,
        Duration::from_secs(live.interval_secs),
        max_polls,
    );
    for summary in &summaries {
        if let Some(e) = &summary.persist_error {
            warn!(error = %e, "state was not saved on this poll");
        }
        for trade in &summary.closed {
            println!(
                "closed {} {} {} pnl ${:.2} ({:+.2}%)",
                trade.id, trade.direction, trade.exit_reason, trade.pnl, trade.pnl_percent
            );
        }
        for id in &summary.opened {
            println!("opened {id}");
        }
    }
    Ok(())
}
