//! Run artifacts: trade log and equity curve as CSV, summary as JSON.

use crate::engine::backtest::BacktestResult;
use crate::metrics::{summarize, MetricsSummary};
use crate::types::{EquityPoint, Trade};
use serde::Serialize;
use std::fs;
use std::path::Path;
use std::time::Instant;

pub const TRADES_FILE: &str = "trades.csv";
pub const EQUITY_FILE: &str = "equity.csv";
pub const SUMMARY_FILE: &str = "summary.json";

fn record_write_metrics(kind: &'static str, start: Instant, result: &Result<(), String>) {
    let result_label = if result.is_ok() { "ok" } else { "err" };
    ::metrics::counter!("backcast.report.writes", "kind" => kind, "result" => result_label)
        .increment(1);
    ::metrics::histogram!("backcast.report.write_ms", "kind" => kind)
        .record(start.elapsed().as_secs_f64() * 1000.0);
}

fn write_rows<T: Serialize>(path: &Path, rows: &[T]) -> Result<(), String> {
    let mut writer = csv::Writer::from_path(path)
        .map_err(|err| format!("failed to create {}: {}", path.display(), err))?;
    for row in rows {
        writer
            .serialize(row)
            .map_err(|err| format!("failed to write {}: {}", path.display(), err))?;
    }
    writer
        .flush()
        .map_err(|err| format!("failed to flush {}: {}", path.display(), err))
}

pub fn write_trades_csv(path: &Path, trades: &[Trade]) -> Result<(), String> {
    let start = Instant::now();
    let result = if trades.is_empty() {
        // csv::Writer only emits headers alongside the first record.
        fs::write(
            path,
            "entry_timestamp,exit_timestamp,side,entry_price,exit_price,quantity,pnl,pnl_pct,cost,reason\n",
        )
        .map_err(|err| format!("failed to write {}: {}", path.display(), err))
    } else {
        write_rows(path, trades)
    };
    record_write_metrics("trades_csv", start, &result);
    result
}

pub fn write_equity_csv(path: &Path, points: &[EquityPoint]) -> Result<(), String> {
    let start = Instant::now();
    let result = if points.is_empty() {
        fs::write(path, "timestamp,value\n")
            .map_err(|err| format!("failed to write {}: {}", path.display(), err))
    } else {
        write_rows(path, points)
    };
    record_write_metrics("equity_csv", start, &result);
    result
}

#[derive(Debug, Clone, Serialize)]
pub struct SummaryMeta {
    pub run_id: String,
    pub strategy: String,
    pub ticker: String,
    pub start: i64,
    pub end: i64,
}

impl SummaryMeta {
    pub fn from_result(run_id: &str, result: &BacktestResult) -> Self {
        Self {
            run_id: run_id.to_string(),
            strategy: result.strategy.clone(),
            ticker: result.ticker.clone(),
            start: result.start,
            end: result.end,
        }
    }
}

/// Writes headline figures and metrics. Infinite ratios serialize as `null`.
pub fn write_summary_json(
    path: &Path,
    result: &BacktestResult,
    meta: Option<&SummaryMeta>,
    config_snapshot: Option<&serde_json::Value>,
) -> Result<(), String> {
    let start = Instant::now();
    let written = summary_json(result, meta, config_snapshot).and_then(|json| {
        fs::write(path, json).map_err(|err| format!("failed to write {}: {}", path.display(), err))
    });
    record_write_metrics("summary_json", start, &written);
    written
}

fn summary_json(
    result: &BacktestResult,
    meta: Option<&SummaryMeta>,
    config_snapshot: Option<&serde_json::Value>,
) -> Result<String, String> {
    let json = serde_json::json!({
        "engine": crate::engine_name(),
        "meta": meta,
        "config_snapshot": config_snapshot,
        "fingerprint": result.fingerprint()?,
        "bars_processed": result.bars_processed,
        "initial_capital": result.initial_capital,
        "final_capital": result.final_capital,
        "total_return": result.total_return,
        "total_return_pct": result.total_return_pct,
        "benchmark": result.benchmark,
        "metrics": result.metrics,
    });
    serde_json::to_string_pretty(&json).map_err(|err| format!("failed to serialize summary: {}", err))
}

fn read_rows<T: serde::de::DeserializeOwned>(path: &Path, what: &str) -> Result<Vec<T>, String> {
    let mut reader = csv::Reader::from_path(path)
        .map_err(|err| format!("failed to open {what} csv {}: {}", path.display(), err))?;
    reader
        .deserialize::<T>()
        .enumerate()
        .map(|(line, row)| {
            row.map_err(|err| format!("failed to parse {what} row {}: {}", line + 1, err))
        })
        .collect()
}

pub fn read_trades_csv(path: &Path) -> Result<Vec<Trade>, String> {
    read_rows(path, "trades")
}

pub fn read_equity_csv(path: &Path) -> Result<Vec<EquityPoint>, String> {
    read_rows(path, "equity")
}

/// Metrics for a run read back from its artifacts. Pass the stored final
/// capital when there is one: the last equity point is marked before the
/// end-of-data close and misses its slippage and cost. Exposure is not
/// recoverable and reads as 0.
pub fn recompute_summary(
    trades: &[Trade],
    equity: &[EquityPoint],
    initial_capital: f64,
    final_capital: Option<f64>,
    risk_free_rate: f64,
) -> MetricsSummary {
    let final_capital = final_capital
        .unwrap_or_else(|| equity.last().map_or(initial_capital, |point| point.value));
    summarize(trades, equity, initial_capital, final_capital, None, risk_free_rate)
}
