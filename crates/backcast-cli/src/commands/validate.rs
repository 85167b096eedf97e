use crate::config::{load_config, DataQualityConfig};
use backcast_core::data::DataQualityReport;
use std::path::Path;

pub const STRICT_FAILURE: &str = "strict validation failed";

pub(super) fn run_validate(config_path: &Path, strict: bool) -> Result<serde_json::Value, String> {
    let config = load_config(config_path)?;
    let (bars, report) = super::load_bars(&config)?;
    super::warn_on_quality(&report);

    let benchmark_bars = super::load_benchmark(&config)?.map(|benchmark| benchmark.bars.len());

    ::metrics::gauge!("backcast.validate.ohlcv.gaps").set(report.gaps as f64);
    ::metrics::gauge!("backcast.validate.ohlcv.duplicates").set(report.duplicates as f64);
    ::metrics::gauge!("backcast.validate.ohlcv.out_of_order").set(report.out_of_order as f64);
    ::metrics::gauge!("backcast.validate.ohlcv.invalid_close").set(report.invalid_close as f64);

    let violations = limit_violations(&report, &config.data_quality);
    if bars.len() < 2 {
        return Err(format!(
            "{} has {} usable bars; a backtest needs at least 2",
            config.paths.ohlcv_csv,
            bars.len()
        ));
    }
    if strict && !violations.is_empty() {
        return Err(format!(
            "{STRICT_FAILURE}: data quality limits exceeded ({})",
            violations.join(", ")
        ));
    }

    Ok(serde_json::json!({
        "mode": "validate",
        "run_id": config.run.run_id,
        "strict": strict,
        "bars": bars.len(),
        "benchmark_bars": benchmark_bars,
        "ohlcv": report,
        "violations": violations,
    }))
}

fn limit_violations(report: &DataQualityReport, limits: &DataQualityConfig) -> Vec<String> {
    let checks = [
        ("gaps", report.gaps, limits.max_gaps),
        ("duplicates", report.duplicates, limits.max_duplicates),
        ("out_of_order", report.out_of_order, limits.max_out_of_order),
        ("invalid_close", report.invalid_close, limits.max_invalid_close),
    ];
    checks
        .into_iter()
        .filter_map(|(name, found, limit)| {
            let limit = limit.unwrap_or(0);
            (found > limit).then(|| format!("{name}={found} > {limit}"))
        })
        .collect()
}
