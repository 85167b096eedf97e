mod backtest;
mod report;
mod sweep;
mod validate;

pub use validate::STRICT_FAILURE;

use crate::config::Config;
use backcast_core::data::{load_csv, DataQualityReport};
use backcast_core::engine::backtest::Benchmark;
use backcast_core::types::Bar;
use std::path::{Path, PathBuf};

pub enum Command {
    Backtest { config: PathBuf, out: Option<PathBuf> },
    Sweep { sweep_config: PathBuf },
    Validate { config: PathBuf, strict: bool },
    Report { input: PathBuf },
}

/// Runs a command and returns its JSON result for stdout.
pub fn run(command: Command) -> Result<serde_json::Value, String> {
    match command {
        Command::Backtest { config, out } => backtest::run_backtest(&config, out),
        Command::Sweep { sweep_config } => sweep::run_sweep(&sweep_config),
        Command::Validate { config, strict } => validate::run_validate(&config, strict),
        Command::Report { input } => report::run_report(&input),
    }
}

fn load_bars(config: &Config) -> Result<(Vec<Bar>, DataQualityReport), String> {
    load_csv(
        Path::new(&config.paths.ohlcv_csv),
        config.data_quality.step_seconds,
    )
}

fn load_benchmark(config: &Config) -> Result<Option<Benchmark>, String> {
    let Some(raw) = config.paths.benchmark_csv.as_deref() else {
        return Ok(None);
    };
    let path = Path::new(raw);
    let (bars, _) = load_csv(path, config.data_quality.step_seconds)?;
    let name = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("benchmark")
        .to_string();
    Ok(Some(Benchmark { name, bars }))
}

fn warn_on_quality(report: &DataQualityReport) {
    if !report.is_clean() || report.gaps > 0 {
        tracing::warn!(
            duplicates = report.duplicates,
            gaps = report.gaps,
            out_of_order = report.out_of_order,
            invalid_close = report.invalid_close,
            "OHLCV data quality issues"
        );
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::fs;
    use std::path::{Path, PathBuf};

    pub fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(name);
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).expect("create dir");
        dir
    }

    /// 40 daily bars: flat, rally, then slide, so SMA crossovers fire.
    pub fn write_ohlcv(path: &Path) {
        let mut csv = String::from("timestamp_utc,open,high,low,close,volume\n");
        for day in 0..40i64 {
            let close = match day {
                0..=9 => 100.0,
                10..=24 => 100.0 + (day - 9) as f64 * 2.0,
                _ => 130.0 - (day - 24) as f64 * 3.0,
            };
            csv.push_str(&format!(
                "{},{close},{},{},{close},1000\n",
                day * 86_400,
                close + 1.0,
                close - 1.0
            ));
        }
        fs::write(path, csv).expect("write ohlcv");
    }

    pub fn write_config(dir: &Path, strategy: &str, extra: &str) -> PathBuf {
        let csv_path = dir.join("ohlcv.csv");
        write_ohlcv(&csv_path);
        let config_path = dir.join("config.toml");
        let toml = format!(
            "[run]\n\
run_id = \"test_run\"\n\
ticker = \"TEST\"\n\
initial_capital = 10000.0\n\
strategy = \"{strategy}\"\n\
\n\
[paths]\n\
ohlcv_csv = \"{}\"\n\
out_dir = \"{}\"\n\
\n\
[costs]\n\
fee_bps = 5.0\n\
slippage = 0.0\n\
{extra}",
            csv_path.display(),
            dir.join("runs").display()
        );
        fs::write(&config_path, toml).expect("write config");
        config_path
    }
}
