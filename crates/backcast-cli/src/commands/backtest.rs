use crate::config::{load_config_with_source, Config};
use backcast_core::engine::backtest::{BacktestResult, Benchmark, CancelToken, Engine};
use backcast_core::report::{
    write_equity_csv, write_summary_json, write_trades_csv, SummaryMeta, EQUITY_FILE,
    SUMMARY_FILE, TRADES_FILE,
};
use backcast_core::types::Bar;
use std::fs;
use std::path::{Path, PathBuf};

pub(super) const CONFIG_SNAPSHOT_FILE: &str = "config_snapshot.toml";

pub(super) fn run_backtest(config_path: &Path, out: Option<PathBuf>) -> Result<serde_json::Value, String> {
    let (config, config_toml) = load_config_with_source(config_path)?;
    let out_dir = out.unwrap_or_else(|| PathBuf::from(&config.paths.out_dir));
    tracing::info!(
        run_id = %config.run.run_id,
        ticker = %config.run.ticker,
        strategy = %config.run.strategy,
        out_dir = %out_dir.display(),
        "backtest requested"
    );

    let (bars, quality) = super::load_bars(&config)?;
    super::warn_on_quality(&quality);
    let benchmark = super::load_benchmark(&config)?;

    let result = execute(&config, &bars, benchmark, &CancelToken::new())?;
    let run_dir = out_dir.join(&config.run.run_id);
    write_artifacts(&run_dir, &config, &config_toml, &result)?;

    Ok(serde_json::json!({
        "mode": "backtest",
        "run_id": config.run.run_id,
        "run_dir": run_dir.display().to_string(),
        "bars_processed": result.bars_processed,
        "trades": result.trades.len(),
        "final_capital": result.final_capital,
        "total_return_pct": result.total_return_pct,
        "metrics": result.metrics,
        "benchmark": result.benchmark,
    }))
}

/// One configured run over already loaded bars.
pub(super) fn execute(
    config: &Config,
    bars: &[Bar],
    benchmark: Option<Benchmark>,
    cancel: &CancelToken,
) -> Result<BacktestResult, String> {
    let mut strategy = config.strategy()?;
    let engine = Engine::new(config.engine_config(benchmark)).with_cost_model(config.cost_model());
    engine
        .run_with_cancel(&mut strategy, &config.run.ticker, bars, cancel)
        .map_err(|err| format!("run {} failed: {err}", config.run.run_id))
}

pub(super) fn write_artifacts(
    run_dir: &Path,
    config: &Config,
    config_toml: &str,
    result: &BacktestResult,
) -> Result<(), String> {
    fs::create_dir_all(run_dir)
        .map_err(|err| format!("failed to create run dir {}: {}", run_dir.display(), err))?;

    write_trades_csv(&run_dir.join(TRADES_FILE), &result.trades)?;
    write_equity_csv(&run_dir.join(EQUITY_FILE), &result.equity_curve)?;

    let meta = SummaryMeta::from_result(&config.run.run_id, result);
    let snapshot = serde_json::to_value(config)
        .map_err(|err| format!("failed to serialize config snapshot: {err}"))?;
    write_summary_json(&run_dir.join(SUMMARY_FILE), result, Some(&meta), Some(&snapshot))?;

    let snapshot_path = run_dir.join(CONFIG_SNAPSHOT_FILE);
    fs::write(&snapshot_path, config_toml).map_err(|err| {
        format!(
            "failed to write config snapshot {}: {}",
            snapshot_path.display(),
            err
        )
    })?;

    tracing::info!(run_dir = %run_dir.display(), trades = result.trades.len(), "run artifacts written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{run_backtest, CONFIG_SNAPSHOT_FILE};
    use crate::commands::test_support::{scratch_dir, write_config};
    use backcast_core::report::{read_trades_csv, SUMMARY_FILE, TRADES_FILE};
    use std::fs;

    #[test]
    fn run_backtest_writes_outputs() {
        let tmp_dir = scratch_dir("backcast_cli_backtest");
        let config_path = write_config(&tmp_dir, "sma_crossover", "\n[run.params]\nfast = 3\nslow = 8\n");
        let out = run_backtest(&config_path, None).expect("backtest");

        let run_dir = tmp_dir.join("runs").join("test_run");
        assert!(run_dir.join(SUMMARY_FILE).exists());
        assert!(run_dir.join(TRADES_FILE).exists());
        assert!(run_dir.join("equity.csv").exists());
        assert!(run_dir.join(CONFIG_SNAPSHOT_FILE).exists());
        assert_eq!(out["bars_processed"], 40);

        let trades = read_trades_csv(&run_dir.join(TRADES_FILE)).expect("trades");
        assert!(!trades.is_empty());
        assert!(trades.iter().all(|trade| trade.cost > 0.0));

        let summary: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(run_dir.join(SUMMARY_FILE)).expect("read"))
                .expect("json");
        assert_eq!(summary["meta"]["run_id"], "test_run");
        assert_eq!(summary["config_snapshot"]["run"]["strategy"], "sma_crossover");
        assert_eq!(summary["fingerprint"].as_str().map(str::len), Some(64));
    }

    #[test]
    fn out_flag_overrides_configured_dir() {
        let tmp_dir = scratch_dir("backcast_cli_backtest_out");
        let config_path = write_config(&tmp_dir, "buy_and_hold", "");
        let out_dir = tmp_dir.join("elsewhere");
        run_backtest(&config_path, Some(out_dir.clone())).expect("backtest");
        assert!(out_dir.join("test_run").join(SUMMARY_FILE).exists());
        assert!(!tmp_dir.join("runs").exists());
    }

    #[test]
    fn unknown_strategy_fails_before_running() {
        let tmp_dir = scratch_dir("backcast_cli_backtest_unknown");
        let config_path = write_config(&tmp_dir, "martingale", "");
        let err = run_backtest(&config_path, None).expect_err("unknown strategy");
        assert!(err.contains("unknown strategy"));
    }
}
