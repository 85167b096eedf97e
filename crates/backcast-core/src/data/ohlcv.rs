use crate::types::Bar;
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DataQualityReport {
    pub rows: usize,
    pub duplicates: usize,
    pub gaps: usize,
    pub out_of_order: usize,
    pub invalid_close: usize,
    pub first_timestamp: Option<i64>,
    pub last_timestamp: Option<i64>,
    pub first_gap: Option<i64>,
    pub first_duplicate: Option<i64>,
    pub first_out_of_order: Option<i64>,
    pub first_invalid_close: Option<i64>,
    pub max_gap_seconds: Option<i64>,
    /// Spacing gaps were measured against.
    pub step_seconds: Option<i64>,
}

impl DataQualityReport {
    pub fn is_clean(&self) -> bool {
        self.duplicates == 0 && self.out_of_order == 0 && self.invalid_close == 0
    }
}

#[derive(Debug, Deserialize)]
struct OhlcvRecord {
    timestamp_utc: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    #[serde(default)]
    volume: f64,
}

/// Loads `timestamp_utc,open,high,low,close,volume` rows.
///
/// Rows with a non-positive or non-finite close are skipped. A row repeating
/// the previous timestamp replaces it. Rows are kept in file order; the
/// engine sorts them.
pub fn load_csv(
    path: &Path,
    expected_step_seconds: Option<i64>,
) -> Result<(Vec<Bar>, DataQualityReport), String> {
    let file = File::open(path)
        .map_err(|err| format!("failed to open OHLCV CSV {}: {}", path.display(), err))?;
    read_csv(file, expected_step_seconds)
        .map_err(|err| format!("{}: {}", path.display(), err))
}

pub fn read_csv<R: Read>(
    source: R,
    expected_step_seconds: Option<i64>,
) -> Result<(Vec<Bar>, DataQualityReport), String> {
    let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(source);

    let mut bars: Vec<Bar> = Vec::new();
    let mut report = DataQualityReport::default();
    let mut last_ts: Option<i64> = None;

    for (line, result) in reader.deserialize::<OhlcvRecord>().enumerate() {
        let record =
            result.map_err(|err| format!("failed to parse CSV row {}: {}", line + 1, err))?;
        let timestamp = parse_timestamp(&record.timestamp_utc)?;
        report.rows += 1;

        if !record.close.is_finite() || record.close <= 0.0 {
            report.invalid_close += 1;
            report.first_invalid_close.get_or_insert(timestamp);
            continue;
        }

        let bar = Bar::new(
            timestamp,
            record.open,
            record.high,
            record.low,
            record.close,
            record.volume,
        );
        if last_ts == Some(timestamp) {
            report.duplicates += 1;
            report.first_duplicate.get_or_insert(timestamp);
            if let Some(last) = bars.last_mut() {
                *last = bar;
                continue;
            }
        }
        if let Some(prev) = last_ts {
            if timestamp < prev {
                report.out_of_order += 1;
                report.first_out_of_order.get_or_insert(timestamp);
            }
        }

        last_ts = Some(timestamp);
        bars.push(bar);
    }

    let spacing = data_quality_from_bars(&bars, expected_step_seconds);
    report.gaps = spacing.gaps;
    report.first_gap = spacing.first_gap;
    report.max_gap_seconds = spacing.max_gap_seconds;
    report.step_seconds = spacing.step_seconds;
    report.first_timestamp = bars.iter().map(|bar| bar.timestamp).min();
    report.last_timestamp = bars.iter().map(|bar| bar.timestamp).max();

    tracing::debug!(
        rows = report.rows,
        bars = bars.len(),
        duplicates = report.duplicates,
        gaps = report.gaps,
        out_of_order = report.out_of_order,
        invalid_close = report.invalid_close,
        "loaded OHLCV"
    );
    Ok((bars, report))
}

/// Quality report for bars already in memory. Without an expected step the
/// smallest positive spacing in the series is used.
pub fn data_quality_from_bars(
    bars: &[Bar],
    expected_step_seconds: Option<i64>,
) -> DataQualityReport {
    let mut report = DataQualityReport {
        rows: bars.len(),
        ..DataQualityReport::default()
    };
    if bars.is_empty() {
        return report;
    }

    let step = expected_step_seconds
        .filter(|step| *step > 0)
        .or_else(|| smallest_step(bars));
    report.step_seconds = step;
    report.first_timestamp = bars.iter().map(|bar| bar.timestamp).min();
    report.last_timestamp = bars.iter().map(|bar| bar.timestamp).max();

    let mut max_gap: Option<i64> = None;
    for pair in bars.windows(2) {
        let (prev, ts) = (pair[0].timestamp, pair[1].timestamp);
        if !pair[1].close.is_finite() || pair[1].close <= 0.0 {
            report.invalid_close += 1;
            report.first_invalid_close.get_or_insert(ts);
        }
        if ts == prev {
            report.duplicates += 1;
            report.first_duplicate.get_or_insert(ts);
        } else if ts < prev {
            report.out_of_order += 1;
            report.first_out_of_order.get_or_insert(ts);
        } else if let Some(step) = step {
            let diff = ts - prev;
            if diff > step {
                report.gaps += 1;
                report.first_gap.get_or_insert(ts);
                max_gap = Some(max_gap.map_or(diff, |current| current.max(diff)));
            }
        }
    }
    if !bars[0].close.is_finite() || bars[0].close <= 0.0 {
        report.invalid_close += 1;
        report.first_invalid_close = Some(bars[0].timestamp);
    }

    report.max_gap_seconds = max_gap;
    report
}

fn smallest_step(bars: &[Bar]) -> Option<i64> {
    bars.windows(2)
        .map(|pair| pair[1].timestamp - pair[0].timestamp)
        .filter(|diff| *diff > 0)
        .min()
}

/// Epoch seconds, RFC 3339, `YYYY-MM-DD HH:MM:SS` (UTC) or a bare date.
pub fn parse_timestamp(value: &str) -> Result<i64, String> {
    let value = value.trim();
    if let Ok(seconds) = value.parse::<i64>() {
        return Ok(seconds);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.timestamp());
    }
    if let Ok(dt) = DateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%z") {
        return Ok(dt.timestamp());
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S") {
        let dt: DateTime<Utc> = Utc.from_utc_datetime(&naive);
        return Ok(dt.timestamp());
    }
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        if let Some(naive) = date.and_hms_opt(0, 0, 0) {
            return Ok(Utc.from_utc_datetime(&naive).timestamp());
        }
    }

    Err(format!("unsupported timestamp format: {}", value))
}
