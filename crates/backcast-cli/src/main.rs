mod commands;
mod config;
mod obs;

use clap::{Parser, Subcommand};
use commands::Command;
use config::LogConfig;
use std::path::PathBuf;

const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("BACKCAST_GIT_SHA"),
    ", ",
    env!("BACKCAST_TARGET"),
    ")"
);

#[derive(Parser)]
#[command(name = "backcast")]
#[command(
    about = "Bar-replay backtester for single-instrument strategies",
    version,
    long_version = LONG_VERSION,
    arg_required_else_help = true
)]
#[command(
    after_help = "Examples:\n  backcast backtest --config configs/sample.toml --out runs/\n  backcast sweep --sweep-config configs/sweep_sma.toml\n  backcast validate --config configs/sample.toml --strict\n  backcast report --input runs/<run_id>/\n"
)]
struct Cli {
    /// Serve Prometheus metrics on host:port while the command runs.
    #[arg(long, global = true)]
    metrics_addr: Option<String>,

    /// Log filter; overrides the config's [log] level. BACKCAST_LOG wins over both.
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Log format: text | json.
    #[arg(long, global = true)]
    log_format: Option<String>,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Run one backtest and write trades, equity and summary artifacts.
    Backtest {
        #[arg(long)]
        config: PathBuf,
        /// Output root; defaults to the config's paths.out_dir.
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Run every parameter combination of a sweep file.
    Sweep {
        #[arg(long)]
        sweep_config: PathBuf,
    },
    /// Check config and OHLCV data quality without running.
    Validate {
        #[arg(long)]
        config: PathBuf,
        /// Fail (exit code 2) when data quality limits are exceeded.
        #[arg(long, default_value_t = false)]
        strict: bool,
    },
    /// Recompute metrics from a run directory.
    Report {
        #[arg(long)]
        input: PathBuf,
    },
}

impl CliCommand {
    fn config_path(&self) -> Option<&PathBuf> {
        match self {
            CliCommand::Backtest { config, .. } | CliCommand::Validate { config, .. } => {
                Some(config)
            }
            CliCommand::Sweep { .. } | CliCommand::Report { .. } => None,
        }
    }
}

fn log_settings(cli: &Cli) -> LogConfig {
    let from_config = cli
        .command
        .config_path()
        .and_then(|path| config::load_config(path).ok())
        .map(|config| config.log)
        .unwrap_or_default();
    LogConfig {
        level: cli.log_level.clone().unwrap_or(from_config.level),
        format: cli.log_format.clone().unwrap_or(from_config.format),
    }
}

fn main() {
    let cli = Cli::parse();

    let log = log_settings(&cli);
    if let Err(err) = obs::init_tracing(&log.level, &log.format) {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
    if let Err(err) = obs::init_metrics(cli.metrics_addr.as_deref()) {
        eprintln!("error: {err}");
        std::process::exit(1);
    }

    let command = match cli.command {
        CliCommand::Backtest { config, out } => Command::Backtest { config, out },
        CliCommand::Sweep { sweep_config } => Command::Sweep { sweep_config },
        CliCommand::Validate { config, strict } => Command::Validate { config, strict },
        CliCommand::Report { input } => Command::Report { input },
    };

    match commands::run(command) {
        Ok(json) => {
            println!(
                "{}",
                serde_json::to_string(&json)
                    .unwrap_or_else(|_| "{\"status\":\"error\",\"error\":\"json\"}".to_string())
            );
        }
        Err(err) => {
            let code = if err.contains(commands::STRICT_FAILURE) {
                2
            } else {
                1
            };
            eprintln!("error: {err}");
            std::process::exit(code);
        }
    }
}
