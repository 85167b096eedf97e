//! Parameter grid runs over one base config.
//!
//! A sweep file names a base config and a list of dotted config paths with
//! candidate values. Every combination becomes one run with its own run
//! directory; the sweep directory gets a manifest, a results table and a
//! leaderboard.

use super::backtest::{execute, write_artifacts};
use crate::config::{load_config_with_source, Config};
use backcast_core::engine::backtest::{BacktestResult, CancelToken};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SweepFile {
    pub base: SweepBase,
    pub sweep: SweepMeta,
    #[serde(default)]
    pub params: Vec<SweepParam>,
    pub leaderboard: Option<LeaderboardConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SweepBase {
    /// Relative paths resolve against the sweep file's directory.
    pub config: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SweepMeta {
    pub id: String,
    /// Stop at the first failed run; the remaining runs are recorded as cancelled.
    #[serde(default)]
    pub fail_fast: bool,
    /// Reuse runs whose summary already exists.
    #[serde(default)]
    pub resume: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SweepParam {
    pub path: String,
    pub values: Vec<toml::Value>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LeaderboardConfig {
    pub sort_by: Option<String>,
    pub descending: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SweepRunEntry {
    pub run_id: String,
    pub params: BTreeMap<String, toml::Value>,
    pub status: String,
    pub error: Option<String>,
    pub metrics: Option<RunMetrics>,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct RunMetrics {
    pub bars_processed: usize,
    pub trades: usize,
    pub win_rate: f64,
    pub total_return_pct: f64,
    pub sharpe: f64,
    pub sortino: f64,
    pub max_drawdown_pct: f64,
}

impl RunMetrics {
    fn from_result(result: &BacktestResult) -> Self {
        Self {
            bars_processed: result.bars_processed,
            trades: result.trades.len(),
            win_rate: result.metrics.win_rate,
            total_return_pct: result.total_return_pct,
            sharpe: result.metrics.sharpe,
            sortino: result.metrics.sortino,
            max_drawdown_pct: result.metrics.max_drawdown_pct,
        }
    }

    fn from_summary_json(json: &serde_json::Value) -> Option<Self> {
        let metrics = &json["metrics"];
        Some(Self {
            bars_processed: json["bars_processed"].as_u64()? as usize,
            trades: metrics["total_trades"].as_u64()? as usize,
            win_rate: metrics["win_rate"].as_f64()?,
            total_return_pct: json["total_return_pct"].as_f64()?,
            sharpe: metrics["sharpe"].as_f64()?,
            sortino: metrics["sortino"].as_f64()?,
            max_drawdown_pct: metrics["max_drawdown_pct"].as_f64()?,
        })
    }

    fn value(&self, key: &str) -> f64 {
        match key {
            "trades" => self.trades as f64,
            "win_rate" => self.win_rate,
            "total_return_pct" | "return" => self.total_return_pct,
            "sortino" => self.sortino,
            "max_drawdown_pct" | "max_drawdown" => self.max_drawdown_pct,
            _ => self.sharpe,
        }
    }
}

const SORT_KEYS: &[&str] = &[
    "sharpe",
    "sortino",
    "total_return_pct",
    "return",
    "win_rate",
    "trades",
    "max_drawdown_pct",
    "max_drawdown",
];

#[derive(Debug, Clone, Serialize)]
pub struct SweepResult {
    pub sweep_id: String,
    pub sweep_dir: PathBuf,
    pub base_config: String,
    pub runs: Vec<SweepRunEntry>,
}

pub(super) fn run_sweep(sweep_path: &Path) -> Result<serde_json::Value, String> {
    let raw = std::fs::read_to_string(sweep_path).map_err(|err| {
        format!(
            "failed to read sweep config {}: {err}",
            sweep_path.display()
        )
    })?;
    let sweep: SweepFile = toml::from_str(&raw)
        .map_err(|err| format!("failed to parse sweep TOML {}: {err}", sweep_path.display()))?;
    validate_sweep(&sweep)?;

    let base_config_path = resolve_base_config_path(sweep_path, &sweep.base.config);
    let (base_config, base_toml) = load_config_with_source(&base_config_path)?;
    let base_value: toml::Value = toml::from_str(&base_toml)
        .map_err(|err| format!("failed to parse base config TOML as value: {err}"))?;

    let out_dir = PathBuf::from(&base_config.paths.out_dir);
    let sweep_dir = out_dir.join("sweeps").join(&sweep.sweep.id);
    std::fs::create_dir_all(&sweep_dir)
        .map_err(|err| format!("failed to create sweep dir {}: {err}", sweep_dir.display()))?;

    let (bars, quality) = super::load_bars(&base_config)?;
    super::warn_on_quality(&quality);
    let benchmark = super::load_benchmark(&base_config)?;

    let grid = expand_grid(&sweep.params);
    tracing::info!(sweep_id = %sweep.sweep.id, runs = grid.len(), "sweep started");

    let cancel = CancelToken::new();
    let mut runs = Vec::with_capacity(grid.len());
    for assignment in grid {
        let run_id = format!("{}__{}", sweep.sweep.id, assignment_hash(&assignment));
        let run_dir = out_dir.join(&run_id);
        let summary_path = run_dir.join(backcast_core::report::SUMMARY_FILE);

        if sweep.sweep.resume && summary_path.exists() {
            runs.push(SweepRunEntry {
                run_id,
                params: assignment,
                status: "skipped".to_string(),
                error: None,
                metrics: read_summary_metrics(&summary_path),
            });
            continue;
        }

        let planned = plan_run(&base_value, &assignment, &run_id);
        let outcome = planned.and_then(|(config, config_toml)| {
            let result = execute(&config, &bars, benchmark.clone(), &cancel)?;
            write_artifacts(&run_dir, &config, &config_toml, &result)?;
            Ok(result)
        });

        let entry = match outcome {
            Ok(result) => SweepRunEntry {
                run_id,
                params: assignment,
                status: "ok".to_string(),
                error: None,
                metrics: Some(RunMetrics::from_result(&result)),
            },
            Err(err) => {
                let status = if cancel.is_cancelled() { "cancelled" } else { "error" };
                tracing::warn!(run_id = %run_id, error = %err, status, "sweep run did not complete");
                if sweep.sweep.fail_fast {
                    cancel.cancel();
                }
                SweepRunEntry {
                    run_id,
                    params: assignment,
                    status: status.to_string(),
                    error: Some(err),
                    metrics: None,
                }
            }
        };
        runs.push(entry);
    }

    let result = SweepResult {
        sweep_id: sweep.sweep.id.clone(),
        sweep_dir: sweep_dir.clone(),
        base_config: base_config_path.display().to_string(),
        runs,
    };
    write_manifest(&sweep_dir, &result)?;
    write_results_csv(&sweep_dir, &result)?;
    let leaderboard = leaderboard(&result, sweep.leaderboard.as_ref());
    write_leaderboard_csv(&sweep_dir, &leaderboard)?;

    let count = |status: &str| result.runs.iter().filter(|run| run.status == status).count();
    tracing::info!(
        sweep_id = %result.sweep_id,
        ok = count("ok"),
        error = count("error"),
        "sweep complete"
    );
    Ok(serde_json::json!({
        "mode": "sweep",
        "sweep_id": result.sweep_id,
        "sweep_dir": result.sweep_dir.display().to_string(),
        "runs": result.runs.len(),
        "ok": count("ok"),
        "skipped": count("skipped"),
        "error": count("error"),
        "cancelled": count("cancelled"),
        "best": leaderboard.first().map(|entry| &entry.run_id),
    }))
}

fn validate_sweep(sweep: &SweepFile) -> Result<(), String> {
    if sweep.sweep.id.trim().is_empty() {
        return Err("sweep.id must not be empty".to_string());
    }
    if let Some(sort_by) = sweep.leaderboard.as_ref().and_then(|l| l.sort_by.as_deref()) {
        if !SORT_KEYS.contains(&sort_by.trim().to_lowercase().as_str()) {
            return Err(format!(
                "unsupported leaderboard.sort_by '{sort_by}' (expected one of: {})",
                SORT_KEYS.join(", ")
            ));
        }
    }
    validate_param_paths(&sweep.params)
}

fn validate_param_paths(params: &[SweepParam]) -> Result<(), String> {
    for p in params {
        let path = p.path.trim();
        if path.is_empty() {
            return Err("sweep param path cannot be empty".to_string());
        }
        let forbidden_prefixes = ["run.run_id", "run.ticker", "paths.", "log."];
        if forbidden_prefixes.iter().any(|pre| path.starts_with(pre)) {
            return Err(format!("sweep param path not allowed: {}", p.path));
        }
        if p.values.is_empty() {
            return Err(format!("sweep param has no values: {}", p.path));
        }
    }
    Ok(())
}

fn resolve_base_config_path(sweep_path: &Path, raw: &str) -> PathBuf {
    let path = PathBuf::from(raw);
    if path.is_absolute() {
        return path;
    }
    match sweep_path.parent() {
        Some(parent) => parent.join(path),
        None => path,
    }
}

/// Cartesian product in declaration order; the last param varies fastest.
fn expand_grid(params: &[SweepParam]) -> Vec<BTreeMap<String, toml::Value>> {
    let mut out: Vec<BTreeMap<String, toml::Value>> = vec![BTreeMap::new()];
    for p in params {
        let mut next: Vec<BTreeMap<String, toml::Value>> = Vec::new();
        for base in &out {
            for v in &p.values {
                let mut m = base.clone();
                m.insert(p.path.trim().to_string(), v.clone());
                next.push(m);
            }
        }
        out = next;
    }
    out
}

fn assignment_hash(assignment: &BTreeMap<String, toml::Value>) -> String {
    let canonical = serde_json::to_string(assignment)
        .unwrap_or_else(|_| "{\"error\":\"assignment\"}".to_string());
    let digest = Sha256::digest(canonical.as_bytes());
    digest[..6].iter().map(|b| format!("{b:02x}")).collect()
}

fn plan_run(
    base: &toml::Value,
    assignment: &BTreeMap<String, toml::Value>,
    run_id: &str,
) -> Result<(Config, String), String> {
    let mut value = base.clone();
    for (path, v) in assignment {
        set_path_value(&mut value, path, v.clone())?;
    }
    set_path_value(&mut value, "run.run_id", toml::Value::String(run_id.to_string()))?;

    let config_toml = toml::to_string_pretty(&value)
        .map_err(|err| format!("failed to serialize sweep config TOML: {err}"))?;
    let config: Config = toml::from_str(&config_toml)
        .map_err(|err| format!("failed to parse generated config TOML: {err}"))?;
    config.validate()?;
    Ok((config, config_toml))
}

/// Sets a dotted path, creating missing intermediate tables. Unknown leaf
/// keys are caught later by the config's `deny_unknown_fields`.
fn set_path_value(root: &mut toml::Value, path: &str, value: toml::Value) -> Result<(), String> {
    let parts: Vec<&str> = path
        .split('.')
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .collect();
    let Some((last, parents)) = parts.split_last() else {
        return Err("empty path".to_string());
    };
    let mut cur = root;
    for key in parents {
        let table = cur
            .as_table_mut()
            .ok_or_else(|| format!("path is not a table: {}", path))?;
        cur = table
            .entry(key.to_string())
            .or_insert(toml::Value::Table(toml::map::Map::new()));
    }
    let table = cur
        .as_table_mut()
        .ok_or_else(|| format!("path is not a table: {}", path))?;
    table.insert(last.to_string(), value);
    Ok(())
}

fn read_summary_metrics(path: &Path) -> Option<RunMetrics> {
    let raw = std::fs::read_to_string(path).ok()?;
    let json: serde_json::Value = serde_json::from_str(&raw).ok()?;
    RunMetrics::from_summary_json(&json)
}

fn leaderboard<'a>(
    result: &'a SweepResult,
    cfg: Option<&LeaderboardConfig>,
) -> Vec<&'a SweepRunEntry> {
    let sort_by = cfg
        .and_then(|c| c.sort_by.as_deref())
        .unwrap_or("sharpe")
        .trim()
        .to_lowercase();
    let descending = cfg.and_then(|c| c.descending).unwrap_or(true);

    let mut rows: Vec<(&SweepRunEntry, f64)> = result
        .runs
        .iter()
        .filter_map(|r| {
            let metrics = r.metrics.as_ref()?;
            matches!(r.status.as_str(), "ok" | "skipped").then(|| (r, metrics.value(&sort_by)))
        })
        .collect();
    rows.sort_by(|(_, a), (_, b)| {
        let ord = b.total_cmp(a);
        if descending {
            ord
        } else {
            ord.reverse()
        }
    });
    rows.into_iter().map(|(entry, _)| entry).collect()
}

fn write_manifest(dir: &Path, result: &SweepResult) -> Result<(), String> {
    let path = dir.join("manifest.json");
    let json = serde_json::to_string_pretty(result)
        .map_err(|err| format!("failed to serialize manifest: {err}"))?;
    std::fs::write(&path, json)
        .map_err(|err| format!("failed to write {}: {err}", path.display()))?;
    Ok(())
}

const METRIC_COLUMNS: [&str; 7] = [
    "bars_processed",
    "trades",
    "win_rate",
    "total_return_pct",
    "sharpe",
    "sortino",
    "max_drawdown_pct",
];

fn metric_cells(metrics: Option<&RunMetrics>) -> Vec<String> {
    match metrics {
        Some(m) => vec![
            m.bars_processed.to_string(),
            m.trades.to_string(),
            m.win_rate.to_string(),
            m.total_return_pct.to_string(),
            m.sharpe.to_string(),
            m.sortino.to_string(),
            m.max_drawdown_pct.to_string(),
        ],
        None => vec![String::new(); METRIC_COLUMNS.len()],
    }
}

fn write_results_csv(dir: &Path, result: &SweepResult) -> Result<(), String> {
    let path = dir.join("results.csv");
    let mut wtr = csv::Writer::from_path(&path)
        .map_err(|err| format!("failed to create {}: {err}", path.display()))?;
    let mut header = vec!["run_id", "status", "params"];
    header.extend(METRIC_COLUMNS);
    header.push("error");
    wtr.write_record(&header)
        .map_err(|err| format!("failed to write results header: {err}"))?;

    for r in &result.runs {
        let params = serde_json::to_string(&r.params)
            .map_err(|err| format!("failed to serialize params for {}: {err}", r.run_id))?;
        let mut record = vec![r.run_id.clone(), r.status.clone(), params];
        record.extend(metric_cells(r.metrics.as_ref()));
        record.push(r.error.clone().unwrap_or_default());
        wtr.write_record(&record)
            .map_err(|err| format!("failed to write results row: {err}"))?;
    }
    wtr.flush()
        .map_err(|err| format!("failed to flush {}: {err}", path.display()))?;
    Ok(())
}

fn write_leaderboard_csv(dir: &Path, rows: &[&SweepRunEntry]) -> Result<(), String> {
    let path = dir.join("leaderboard.csv");
    let mut wtr = csv::Writer::from_path(&path)
        .map_err(|err| format!("failed to create {}: {err}", path.display()))?;
    let mut header = vec!["rank", "run_id", "params"];
    header.extend(METRIC_COLUMNS);
    wtr.write_record(&header)
        .map_err(|err| format!("failed to write leaderboard header: {err}"))?;

    for (rank, r) in rows.iter().enumerate() {
        let params = serde_json::to_string(&r.params)
            .map_err(|err| format!("failed to serialize params for {}: {err}", r.run_id))?;
        let mut record = vec![(rank + 1).to_string(), r.run_id.clone(), params];
        record.extend(metric_cells(r.metrics.as_ref()));
        wtr.write_record(&record)
            .map_err(|err| format!("failed to write leaderboard row: {err}"))?;
    }
    wtr.flush()
        .map_err(|err| format!("failed to flush {}: {err}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::{scratch_dir, write_config};
    use std::fs;

    fn write_sweep(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("sweep.toml");
        fs::write(&path, format!("[base]\nconfig = \"config.toml\"\n\n{body}")).expect("write");
        path
    }

    #[test]
    fn expand_grid_is_deterministic() {
        let params = vec![
            SweepParam {
                path: "run.params.fast".to_string(),
                values: vec![toml::Value::Integer(3), toml::Value::Integer(5)],
            },
            SweepParam {
                path: "run.params.slow".to_string(),
                values: vec![toml::Value::Integer(10), toml::Value::Integer(20)],
            },
        ];
        let grid = expand_grid(&params);
        assert_eq!(grid.len(), 4);
        assert_eq!(grid[0]["run.params.fast"].as_integer(), Some(3));
        assert_eq!(grid[0]["run.params.slow"].as_integer(), Some(10));
        assert_eq!(grid[3]["run.params.fast"].as_integer(), Some(5));
        assert_eq!(grid[3]["run.params.slow"].as_integer(), Some(20));
        assert_eq!(assignment_hash(&grid[1]), assignment_hash(&grid[1].clone()));
        assert_ne!(assignment_hash(&grid[1]), assignment_hash(&grid[2]));
    }

    #[test]
    fn set_path_value_creates_missing_tables() {
        let mut value: toml::Value = toml::from_str("[run]\nrun_id = \"a\"\n").expect("toml");
        set_path_value(&mut value, "run.params.fast", toml::Value::Integer(4)).expect("set");
        assert_eq!(value["run"]["params"]["fast"].as_integer(), Some(4));
        assert!(set_path_value(&mut value, "run.run_id.deeper", toml::Value::Integer(1)).is_err());
    }

    #[test]
    fn forbidden_and_empty_params_are_rejected() {
        let bad_path = vec![SweepParam {
            path: "paths.out_dir".to_string(),
            values: vec![toml::Value::String("x".to_string())],
        }];
        assert!(validate_param_paths(&bad_path).is_err());
        let no_values = vec![SweepParam {
            path: "costs.fee_bps".to_string(),
            values: Vec::new(),
        }];
        assert!(validate_param_paths(&no_values).is_err());
    }

    #[test]
    fn sweep_runs_every_combination_and_ranks_them() {
        let tmp_dir = scratch_dir("backcast_cli_sweep");
        write_config(&tmp_dir, "sma_crossover", "");
        let sweep_path = write_sweep(
            &tmp_dir,
            r#"[sweep]
id = "sma_grid"

[[params]]
path = "run.params.fast"
values = [2, 3]

[[params]]
path = "run.params.slow"
values = [6, 9]

[leaderboard]
sort_by = "total_return_pct"
"#,
        );

        let out = run_sweep(&sweep_path).expect("sweep");
        assert_eq!(out["runs"], 4);
        assert_eq!(out["ok"], 4);

        let sweep_dir = tmp_dir.join("runs").join("sweeps").join("sma_grid");
        for file in ["manifest.json", "results.csv", "leaderboard.csv"] {
            assert!(sweep_dir.join(file).exists(), "{file}");
        }
        let leaderboard = fs::read_to_string(sweep_dir.join("leaderboard.csv")).expect("read");
        assert_eq!(leaderboard.lines().count(), 5);

        let best = out["best"].as_str().expect("best run");
        assert!(best.starts_with("sma_grid__"));
        assert!(tmp_dir.join("runs").join(best).join("summary.json").exists());

        let resumed = fs::read_to_string(&sweep_path)
            .expect("read")
            .replace("id = \"sma_grid\"", "id = \"sma_grid\"\nresume = true");
        fs::write(&sweep_path, resumed).expect("write");
        let again = run_sweep(&sweep_path).expect("resume");
        assert_eq!(again["skipped"], 4);
        assert_eq!(again["best"], out["best"]);
    }

    #[test]
    fn fail_fast_cancels_remaining_runs() {
        let tmp_dir = scratch_dir("backcast_cli_sweep_fail_fast");
        write_config(&tmp_dir, "sma_crossover", "");
        let sweep_path = write_sweep(
            &tmp_dir,
            r#"[sweep]
id = "broken"
fail_fast = true

[[params]]
path = "run.params.fast"
values = [50, 3, 4]
"#,
        );

        let out = run_sweep(&sweep_path).expect("sweep finishes");
        assert_eq!(out["error"], 1);
        assert_eq!(out["cancelled"], 2);
        assert!(out["best"].is_null());
    }
}
