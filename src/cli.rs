//! CLI definition and dispatch.

use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use crate::adapters::csv_adapter::CsvMarketData;
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::adapters::json_state_store::JsonStateStore;
use crate::adapters::system_clock::SystemClock;
use crate::domain::backtest::{BacktestConfig, BacktestResult, BacktestRunner};
use crate::domain::candle::{SymbolSeries, Timeframe};
use crate::domain::error::BarwardenError;
use crate::domain::gateway::MarketDataGateway;
use crate::domain::live::{LiveConfig, LiveLoop, LiveSummary};
use crate::domain::settings::{Settings, build_settings};
use crate::domain::shutdown::Shutdown;
use crate::domain::universe::validate_symbols;

pub const MAX_LIMIT: usize = 2000;

#[derive(Parser, Debug)]
#[command(
    name = "barwarden",
    about = "Risk-gated SMA crossover decision engine (dry run, never places orders)"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Symbols such as BTC-USD, ETH/USD or SOL (quote defaults to USD)
    #[arg(required = true, num_args = 1..)]
    pub symbols: Vec<String>,
    #[arg(short, long, default_value = "1h")]
    pub timeframe: String,
    /// Candles requested per symbol (at most 2000)
    #[arg(short, long, default_value_t = 300)]
    pub limit: usize,
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    /// Directory of <BASE>-<QUOTE>_<timeframe>.csv files
    #[arg(long, default_value = "data")]
    pub data_dir: PathBuf,
    #[arg(long)]
    pub state: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Replay historical candles through the pipeline
    Backtest {
        #[command(flatten)]
        args: RunArgs,
    },
    /// Poll for new bars and plan trades as they close
    Live {
        #[command(flatten)]
        args: RunArgs,
        /// Maximum number of polling iterations
        #[arg(short, long, default_value_t = 1)]
        max: u64,
    },
}

pub fn run(cli: Cli) -> ExitCode {
    let result = match cli.command {
        Command::Backtest { args } => run_backtest(&args),
        Command::Live { args, max } => run_live(&args, max),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "run failed");
            eprintln!("error: {err}");
            ExitCode::from(&err)
        }
    }
}

pub fn load_settings(path: Option<&Path>) -> Result<Settings, BarwardenError> {
    let adapter = match path {
        Some(path) => FileConfigAdapter::from_file(path)?,
        None => FileConfigAdapter::empty(),
    };
    build_settings(&adapter.with_env_overrides(std::env::vars()))
}

pub fn clamp_limit(limit: usize) -> usize {
    if limit > MAX_LIMIT {
        tracing::warn!(requested = limit, max = MAX_LIMIT, "limit clamped");
        MAX_LIMIT
    } else {
        limit.max(1)
    }
}

struct Prepared {
    settings: Settings,
    timeframe: Timeframe,
    limit: usize,
    gateway: MarketDataGateway,
    symbols: Vec<String>,
}

fn prepare(args: &RunArgs) -> Result<Prepared, BarwardenError> {
    let settings = load_settings(args.config.as_deref())?;
    let timeframe: Timeframe = args.timeframe.parse()?;
    let limit = clamp_limit(args.limit);

    let gateway = MarketDataGateway::new(
        Arc::new(CsvMarketData::new(args.data_dir.clone())),
        Arc::new(SystemClock),
        settings.gateway.clone(),
    );
    let validation = validate_symbols(&gateway, &args.symbols, timeframe)?;

    Ok(Prepared {
        settings,
        timeframe,
        limit,
        gateway,
        symbols: validation.symbols,
    })
}

fn run_backtest(args: &RunArgs) -> Result<(), BarwardenError> {
    let Prepared {
        settings,
        timeframe,
        limit,
        mut gateway,
        symbols,
    } = prepare(args)?;

    let mut series: Vec<Arc<SymbolSeries>> = Vec::new();
    for symbol in &symbols {
        match gateway.get_candles(symbol, timeframe, limit) {
            Ok(s) => series.push(s),
            Err(e) if !e.is_fatal() => {
                tracing::warn!(%symbol, error = %e, "no candles, dropping symbol from backtest");
            }
            Err(e) => return Err(e),
        }
    }
    if series.is_empty() {
        return Err(BarwardenError::NoValidSymbols);
    }
    let refs: Vec<&SymbolSeries> = series.iter().map(Arc::as_ref).collect();

    let config = BacktestConfig {
        initial_equity: settings.initial_equity,
        engine: settings.engine,
    };
    let mut store = args.state.as_ref().map(JsonStateStore::open).transpose()?;
    let mut runner = BacktestRunner::new(config);
    if let Some(store) = store.as_mut() {
        runner = runner.with_store(store);
    }
    let result = runner.run(&refs, timeframe)?;
    print_backtest(&result);
    Ok(())
}

fn run_live(args: &RunArgs, max_iterations: u64) -> Result<(), BarwardenError> {
    let Prepared {
        settings,
        timeframe,
        limit,
        mut gateway,
        symbols,
    } = prepare(args)?;

    let state_path = args
        .state
        .clone()
        .unwrap_or_else(|| PathBuf::from("barwarden_state.json"));
    let mut store = JsonStateStore::open(&state_path)?;

    let shutdown = Shutdown::new();
    let handler_token = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        tracing::info!("interrupt received, stopping after the current bar");
        handler_token.trigger();
    }) {
        tracing::warn!(error = %e, "could not install Ctrl-C handler");
    }

    let config = LiveConfig {
        timeframe,
        limit,
        max_iterations,
        poll_offset: settings.poll_offset,
        initial_equity: settings.initial_equity,
        engine: settings.engine,
    };
    let summary = LiveLoop::new(&mut gateway, &mut store, symbols, config, shutdown).run()?;
    print_live(&summary, &state_path);
    Ok(())
}

fn print_backtest(result: &BacktestResult) {
    let m = &result.metrics;
    println!("Backtest summary");
    if let (Some(start), Some(end)) = (m.start, m.end) {
        println!(
            "  Period:         {} .. {}",
            start.format("%Y-%m-%d %H:%M"),
            end.format("%Y-%m-%d %H:%M")
        );
    }
    println!("  Bars:           {}", result.equity_curve.len());
    println!("  Trades:         {}", m.trades);
    println!("  Win rate:       {:.1}%", m.win_rate * 100.0);
    println!("  Profit factor:  {:.2}", m.profit_factor);
    println!("  Net PnL:        {:.2}", m.net_pnl);
    println!("  Total return:   {:.2}%", m.total_return * 100.0);
    println!("  CAGR:           {:.2}%", m.cagr * 100.0);
    println!("  Sharpe:         {:.2}", m.sharpe_ratio);
    println!("  Max drawdown:   {:.2}%", m.max_drawdown * 100.0);
    println!("  Exposure:       {:.1}%", m.exposure * 100.0);
    println!("  Halt:           {:?}", result.final_state.risk.halt_reason);
    for (symbol, pnl) in &result.pnl_by_symbol {
        println!("  {symbol:<14}  {pnl:.2}");
    }
}

fn print_live(summary: &LiveSummary, state_path: &Path) {
    let state = &summary.final_state;
    println!("Live run stopped: {:?}", summary.stop_reason);
    println!("  Iterations:     {}", summary.iterations);
    println!("  Bars processed: {}", summary.bars_processed);
    println!("  Planned trades: {}", summary.trade_log.len());
    println!("  Equity:         {:.2}", state.risk.equity);
    println!("  Cash:           {:.2}", state.cash);
    println!("  Open positions: {}", state.positions.len());
    println!("  Halt:           {:?}", state.risk.halt_reason);
    println!("  State file:     {}", state_path.display());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_is_clamped() {
        assert_eq!(clamp_limit(5000), MAX_LIMIT);
        assert_eq!(clamp_limit(2000), 2000);
        assert_eq!(clamp_limit(0), 1);
    }

    #[test]
    fn parses_live_command() {
        let cli = Cli::try_parse_from([
            "barwarden", "live", "btc-usd", "ETH", "--timeframe", "15m", "--max", "3",
        ])
        .unwrap();
        match cli.command {
            Command::Live { args, max } => {
                assert_eq!(args.symbols, vec!["btc-usd", "ETH"]);
                assert_eq!(args.timeframe, "15m");
                assert_eq!(args.limit, 300);
                assert_eq!(max, 3);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn symbols_are_required() {
        assert!(Cli::try_parse_from(["barwarden", "backtest"]).is_err());
    }
}
