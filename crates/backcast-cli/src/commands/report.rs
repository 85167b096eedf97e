use backcast_core::engine::backtest::EngineConfig;
use backcast_core::report::{
    read_equity_csv, read_trades_csv, recompute_summary, EQUITY_FILE, SUMMARY_FILE, TRADES_FILE,
};
use std::fs;
use std::path::Path;

pub(super) const REPORT_FILE: &str = "report.json";

/// What the stored summary says about the run, when it is there.
struct StoredSummary {
    run_id: Option<String>,
    initial_capital: Option<f64>,
    final_capital: Option<f64>,
    risk_free_rate: Option<f64>,
}

fn read_stored_summary(path: &Path) -> Result<Option<StoredSummary>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|err| format!("failed to read summary {}: {}", path.display(), err))?;
    let json: serde_json::Value = serde_json::from_str(&raw)
        .map_err(|err| format!("failed to parse summary {}: {}", path.display(), err))?;
    Ok(Some(StoredSummary {
        run_id: json["meta"]["run_id"].as_str().map(str::to_string),
        initial_capital: json["initial_capital"].as_f64(),
        final_capital: json["final_capital"].as_f64(),
        risk_free_rate: json["config_snapshot"]["account"]["risk_free_rate"].as_f64(),
    }))
}

/// Recomputes metrics from a run directory's trade log and equity curve.
pub(super) fn run_report(input: &Path) -> Result<serde_json::Value, String> {
    let trades = read_trades_csv(&input.join(TRADES_FILE))?;
    let equity = read_equity_csv(&input.join(EQUITY_FILE))?;
    let stored = read_stored_summary(&input.join(SUMMARY_FILE))?;

    let initial_capital = stored
        .as_ref()
        .and_then(|summary| summary.initial_capital)
        .or_else(|| equity.first().map(|point| point.value))
        .ok_or_else(|| format!("{} has no equity points", input.display()))?;
    let final_capital = stored
        .as_ref()
        .and_then(|summary| summary.final_capital)
        .or_else(|| equity.last().map(|point| point.value))
        .unwrap_or(initial_capital);
    let risk_free_rate = stored
        .as_ref()
        .and_then(|summary| summary.risk_free_rate)
        .unwrap_or_else(|| EngineConfig::default().risk_free_rate);
    let run_id = stored
        .and_then(|summary| summary.run_id)
        .or_else(|| {
            input
                .file_name()
                .and_then(|name| name.to_str())
                .map(str::to_string)
        })
        .unwrap_or_default();

    let metrics = recompute_summary(
        &trades,
        &equity,
        initial_capital,
        Some(final_capital),
        risk_free_rate,
    );
    let report = serde_json::json!({
        "mode": "report",
        "run_id": run_id,
        "trades": trades.len(),
        "equity_points": equity.len(),
        "initial_capital": initial_capital,
        "final_capital": final_capital,
        "risk_free_rate": risk_free_rate,
        "metrics": metrics,
    });

    let path = input.join(REPORT_FILE);
    let pretty = serde_json::to_string_pretty(&report)
        .map_err(|err| format!("failed to serialize report: {err}"))?;
    fs::write(&path, pretty).map_err(|err| format!("failed to write {}: {}", path.display(), err))?;
    tracing::info!(run_id = %run_id, report = %path.display(), "report regenerated");
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::{run_report, REPORT_FILE};
    use crate::commands::backtest::run_backtest;
    use crate::commands::test_support::{scratch_dir, write_config};
    use backcast_core::report::SUMMARY_FILE;
    use std::fs;

    #[test]
    fn report_matches_the_backtest_summary() {
        let tmp_dir = scratch_dir("backcast_cli_report");
        let config_path = write_config(&tmp_dir, "sma_crossover", "\n[run.params]\nfast = 3\nslow = 8\n");
        let backtest = run_backtest(&config_path, None).expect("backtest");

        let run_dir = tmp_dir.join("runs").join("test_run");
        let report = run_report(&run_dir).expect("report");
        assert!(run_dir.join(REPORT_FILE).exists());
        assert_eq!(report["run_id"], "test_run");
        assert_eq!(report["initial_capital"], 10_000.0);
        for key in [
            "total_trades",
            "wins",
            "losses",
            "max_drawdown",
            "total_cost",
            "cagr",
            "sharpe",
            "sortino",
            "calmar",
        ] {
            assert_eq!(report["metrics"][key], backtest["metrics"][key], "{key}");
        }
    }

    #[test]
    fn report_keeps_the_cost_of_the_closing_fill() {
        let tmp_dir = scratch_dir("backcast_cli_report_open_end");
        let config_path = write_config(&tmp_dir, "buy_and_hold", "");
        let backtest = run_backtest(&config_path, None).expect("backtest");

        let run_dir = tmp_dir.join("runs").join("test_run");
        let report = run_report(&run_dir).expect("report");
        assert_eq!(report["final_capital"], backtest["final_capital"]);
        for key in ["cagr", "calmar", "total_cost"] {
            assert_eq!(report["metrics"][key], backtest["metrics"][key], "{key}");
        }
    }

    #[test]
    fn report_without_summary_falls_back_to_equity() {
        let tmp_dir = scratch_dir("backcast_cli_report_bare");
        let config_path = write_config(&tmp_dir, "buy_and_hold", "");
        run_backtest(&config_path, None).expect("backtest");
        let run_dir = tmp_dir.join("runs").join("test_run");
        fs::remove_file(run_dir.join(SUMMARY_FILE)).expect("remove summary");

        let report = run_report(&run_dir).expect("report");
        assert_eq!(report["run_id"], "test_run");
        assert_eq!(report["trades"], 1);
    }

    #[test]
    fn missing_run_dir_is_an_error() {
        let dir = std::env::temp_dir().join("backcast_cli_report_missing");
        let _ = fs::remove_dir_all(&dir);
        assert!(run_report(&dir).is_err());
    }
}
