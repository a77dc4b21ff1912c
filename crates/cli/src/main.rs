use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use fxbot_brokers_metatrader::{MetaTraderBroker, MetaTraderFeed};
use fxbot_core::{AppConfig, TradingMode, DEFAULT_CONFIG_TOML};
use fxbot_data::CsvDataProvider;
use fxbot_engine::{
    load_bars, paper_broker, run_backtest, write_backtest_report, BacktestReport, EngineState,
    LiveEngine, LiveSettings,
};
use rust_decimal::Decimal;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "fxbot")]
#[command(about = "FX intraday breakout bot: backtest on CSV data, paper or live trade through MetaTrader 5")]
#[command(version)]
struct Cli {
    /// Path to the TOML config file
    #[arg(short, long, global = true, default_value = "config.toml")]
    config: PathBuf,

    /// Shorthand for --log-level debug
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override `output.results_dir` from the config
    #[arg(long, global = true)]
    results_dir: Option<PathBuf>,

    /// MetaTrader 5 account password
    #[arg(long, global = true, env = "FXBOT_MT5_PASSWORD", hide_env_values = true)]
    mt5_password: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay CSV history through the strategy and write a report
    Backtest,

    /// Trade on live MT5 data against a simulated account
    Paper,

    /// Trade on a real MT5 account
    Live,

    /// Write a commented default config file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

impl Commands {
    fn mode(&self) -> Option<TradingMode> {
        match self {
            Commands::Backtest => Some(TradingMode::Backtest),
            Commands::Paper => Some(TradingMode::Paper),
            Commands::Live => Some(TradingMode::Live),
            Commands::InitConfig { .. } => None,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli);

    let Some(mode) = cli.command.mode() else {
        if let Commands::InitConfig { force } = cli.command {
            init_config(&cli.config, force)?;
        }
        return Ok(());
    };

    let mut config = AppConfig::load(&cli.config)
        .with_context(|| format!("run `fxbot init-config` to create {}", cli.config.display()))?;
    config.mode = mode;
    if let Some(dir) = cli.results_dir {
        config.output.results_dir = dir;
    }
    if let Some(password) = cli.mt5_password {
        config.mt5.password = password;
    }
    config.validate()?;

    info!(
        mode = %config.mode,
        symbols = ?config.symbols,
        timeframe = %config.timeframe,
        timezone = %config.data.timezone,
        "Configuration loaded"
    );

    match config.mode {
        TradingMode::Backtest => backtest(&config).await,
        TradingMode::Paper | TradingMode::Live => trade(&config).await,
    }
}

fn init_tracing(cli: &Cli) {
    let level = if cli.verbose { "debug" } else { cli.log_level.as_str() };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    match cli.log_format {
        LogFormat::Text => fmt().with_env_filter(filter).with_target(false).init(),
        LogFormat::Json => fmt().json().with_env_filter(filter).with_target(false).init(),
    }
}

fn init_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    std::fs::write(path, DEFAULT_CONFIG_TOML)
        .with_context(|| format!("writing {}", path.display()))?;
    println!("Wrote default config to {}", path.display());
    Ok(())
}

async fn backtest(config: &AppConfig) -> Result<()> {
    let provider = CsvDataProvider::new(&config.data.csv_dir, config.data.timezone);
    let bars = load_bars(&provider, &config.symbols).await?;
    let report = run_backtest(&bars, config).await?;

    let out_dir = &config.output.results_dir;
    write_backtest_report(&report, out_dir, config.data.timezone)?;
    print_summary(&report, out_dir);
    Ok(())
}

async fn trade(config: &AppConfig) -> Result<()> {
    let state_file = &config.output.state_file;
    let state = match EngineState::load(state_file)? {
        Some(state) => {
            info!(
                path = %state_file.display(),
                open_positions = state.open_positions().len(),
                "Resuming from saved state"
            );
            state
        }
        None => EngineState::for_symbols(&config.symbols),
    };

    let settings = LiveSettings::from_config(config);
    let feed = MetaTraderFeed::new(config.mt5.clone());

    match config.mode {
        TradingMode::Paper => {
            let broker = paper_broker(config, &state);
            LiveEngine::new(feed, broker, settings, state).run(shutdown_signal()).await?;
        }
        _ => {
            let broker = MetaTraderBroker::new(config.mt5.clone(), config.costs.lot_size);
            LiveEngine::new(feed, broker, settings, state).run(shutdown_signal()).await?;
        }
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Cannot listen for Ctrl+C, stop the process to exit");
        std::future::pending::<()>().await;
    }
}

fn print_summary(report: &BacktestReport, out_dir: &Path) {
    let s = &report.summary;
    let pct = |v: Decimal| v * Decimal::ONE_HUNDRED;
    let period = match (report.equity_curve.first(), report.equity_curve.last()) {
        (Some(first), Some(last)) => format!(
            "{} → {}",
            first.timestamp.format("%Y-%m-%d"),
            last.timestamp.format("%Y-%m-%d")
        ),
        _ => "-".to_string(),
    };

    let sep = "=".repeat(60);
    println!("\n{sep}");
    println!("  BACKTEST RESULTS");
    println!("{sep}");
    println!("  Symbols:         {}", report.symbols.join(", "));
    println!("  Period:          {}", period);
    println!("  Initial Equity:  {:.2}", report.initial_equity);
    println!("  Final Equity:    {:.2}", report.final_equity);
    println!("  Total Return:    {:.2}%", pct(s.total_return));
    println!("  Net Profit:      {:.2}", s.net_profit);
    println!("  Fees:            {:.2}", s.total_fees);
    println!("  Trades:          {}", s.num_trades);
    println!("  Win Rate:        {:.1}%", pct(s.win_rate));
    println!("  Profit Factor:   {:.2}", s.profit_factor);
    println!("  Avg Trade:       {:.2}", s.avg_trade);
    println!("  Max Drawdown:    {:.2}%", pct(s.max_drawdown));
    println!("  Sharpe (trade):  {:.2}", s.sharpe);
    println!("  Exposure:        {:.1}%", pct(s.exposure_time));
    println!("  Results:         {}", out_dir.display());
    println!("{sep}\n");
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "fxbot",
            "backtest",
            "--config",
            "cfg/fx.toml",
            "-v",
            "--log-format",
            "json",
            "--results-dir",
            "out",
        ])
        .unwrap();
        assert_eq!(cli.command.mode(), Some(TradingMode::Backtest));
        assert_eq!(cli.config, PathBuf::from("cfg/fx.toml"));
        assert!(cli.verbose);
        assert_eq!(cli.log_format, LogFormat::Json);
        assert_eq!(cli.results_dir, Some(PathBuf::from("out")));
    }

    #[test]
    fn test_unknown_mode_rejected() {
        assert!(Cli::try_parse_from(["fxbot", "replay"]).is_err());
    }

    #[test]
    fn test_init_config_refuses_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conf").join("config.toml");

        init_config(&path, false).unwrap();
        let written = AppConfig::load(&path).unwrap();
        written.validate().unwrap();

        assert!(init_config(&path, false).is_err());
        init_config(&path, true).unwrap();
    }
}
