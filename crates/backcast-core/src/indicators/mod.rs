//! Technical indicators used by the reference strategies.
//!
//! Each function returns a series aligned with its input: element `i` is
//! computed from inputs `0..=i` only and is `None` until enough history exists.

use crate::types::Bar;

pub fn sma(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    if period == 0 || values.len() < period {
        return out;
    }
    let mut sum: f64 = values[..period].iter().sum();
    out[period - 1] = Some(sum / period as f64);
    for i in period..values.len() {
        sum += values[i] - values[i - period];
        out[i] = Some(sum / period as f64);
    }
    out
}

/// Exponential moving average seeded with the SMA of the first `period` values.
pub fn ema(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    if period == 0 || values.len() < period {
        return out;
    }
    let alpha = 2.0 / (period as f64 + 1.0);
    let mut prev = values[..period].iter().sum::<f64>() / period as f64;
    out[period - 1] = Some(prev);
    for i in period..values.len() {
        prev = alpha * values[i] + (1.0 - alpha) * prev;
        out[i] = Some(prev);
    }
    out
}

/// Wilder's RSI.
pub fn rsi(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    if period == 0 || values.len() <= period {
        return out;
    }

    let mut avg_gain = 0.0;
    let mut avg_loss = 0.0;
    for i in 1..=period {
        let diff = values[i] - values[i - 1];
        if diff > 0.0 {
            avg_gain += diff;
        } else {
            avg_loss -= diff;
        }
    }
    avg_gain /= period as f64;
    avg_loss /= period as f64;
    out[period] = Some(rsi_value(avg_gain, avg_loss));

    for i in (period + 1)..values.len() {
        let diff = values[i] - values[i - 1];
        let (gain, loss) = if diff > 0.0 { (diff, 0.0) } else { (0.0, -diff) };
        avg_gain = (avg_gain * (period as f64 - 1.0) + gain) / period as f64;
        avg_loss = (avg_loss * (period as f64 - 1.0) + loss) / period as f64;
        out[i] = Some(rsi_value(avg_gain, avg_loss));
    }
    out
}

fn rsi_value(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_gain + avg_loss == 0.0 {
        return 50.0;
    }
    if avg_loss == 0.0 {
        return 100.0;
    }
    let rs = avg_gain / avg_loss;
    100.0 - 100.0 / (1.0 + rs)
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Macd {
    pub macd: Vec<Option<f64>>,
    pub signal: Vec<Option<f64>>,
    pub histogram: Vec<Option<f64>>,
}

pub fn macd(values: &[f64], fast: usize, slow: usize, signal: usize) -> Macd {
    let fast_ema = ema(values, fast);
    let slow_ema = ema(values, slow);
    let line: Vec<Option<f64>> = fast_ema
        .iter()
        .zip(&slow_ema)
        .map(|(f, s)| Some((*f)? - (*s)?))
        .collect();

    // Signal EMA runs over the defined part of the MACD line only.
    let start = line.iter().position(Option::is_some).unwrap_or(line.len());
    let defined: Vec<f64> = line[start..].iter().flatten().copied().collect();
    let mut signal_line = vec![None; start];
    signal_line.extend(ema(&defined, signal));

    let histogram = line
        .iter()
        .zip(&signal_line)
        .map(|(m, s)| Some((*m)? - (*s)?))
        .collect();

    Macd {
        macd: line,
        signal: signal_line,
        histogram,
    }
}

/// Rolling volume-weighted average of the typical price over `period` bars.
pub fn vwap(bars: &[Bar], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; bars.len()];
    if period == 0 {
        return out;
    }
    let mut pv = 0.0;
    let mut vol = 0.0;
    for i in 0..bars.len() {
        pv += bars[i].typical_price() * bars[i].volume;
        vol += bars[i].volume;
        if i >= period {
            let old = &bars[i - period];
            pv -= old.typical_price() * old.volume;
            vol -= old.volume;
        }
        if i + 1 >= period && vol > 0.0 {
            out[i] = Some(pv / vol);
        }
    }
    out
}

pub fn true_range(bars: &[Bar]) -> Vec<f64> {
    bars.iter()
        .enumerate()
        .map(|(i, bar)| {
            let hl = bar.high - bar.low;
            match i.checked_sub(1).map(|p| bars[p].close) {
                Some(prev_close) => hl
                    .max((bar.high - prev_close).abs())
                    .max((bar.low - prev_close).abs()),
                None => hl,
            }
        })
        .collect()
}

/// Wilder's average true range.
pub fn atr(bars: &[Bar], period: usize) -> Vec<Option<f64>> {
    let tr = true_range(bars);
    let mut out = vec![None; bars.len()];
    if period == 0 || bars.len() < period {
        return out;
    }
    let mut prev = tr[..period].iter().sum::<f64>() / period as f64;
    out[period - 1] = Some(prev);
    for i in period..bars.len() {
        prev = (prev * (period as f64 - 1.0) + tr[i]) / period as f64;
        out[i] = Some(prev);
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SuperTrendPoint {
    pub value: f64,
    pub uptrend: bool,
}

pub fn supertrend(bars: &[Bar], period: usize, multiplier: f64) -> Vec<Option<SuperTrendPoint>> {
    let atr = atr(bars, period);
    let mut out = vec![None; bars.len()];
    let mut final_upper = 0.0;
    let mut final_lower = 0.0;
    let mut uptrend = true;
    let mut seeded = false;

    for i in 0..bars.len() {
        let Some(range) = atr[i] else { continue };
        let mid = (bars[i].high + bars[i].low) / 2.0;
        let basic_upper = mid + multiplier * range;
        let basic_lower = mid - multiplier * range;

        if !seeded {
            final_upper = basic_upper;
            final_lower = basic_lower;
            uptrend = bars[i].close >= mid;
            seeded = true;
        } else {
            let prev_close = bars[i - 1].close;
            final_upper = if basic_upper < final_upper || prev_close > final_upper {
                basic_upper
            } else {
                final_upper
            };
            final_lower = if basic_lower > final_lower || prev_close < final_lower {
                basic_lower
            } else {
                final_lower
            };
            if uptrend && bars[i].close < final_lower {
                uptrend = false;
            } else if !uptrend && bars[i].close > final_upper {
                uptrend = true;
            }
        }

        out[i] = Some(SuperTrendPoint {
            value: if uptrend { final_lower } else { final_upper },
            uptrend,
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bars_from_closes(closes: &[f64]) -> Vec<Bar> {
        closes
            .iter()
            .enumerate()
            .map(|(i, c)| Bar::new(i as i64, *c, c + 1.0, c - 1.0, *c, 100.0))
            .collect()
    }

    #[test]
    fn sma_aligns_with_input() {
        let out = sma(&[1.0, 2.0, 3.0, 4.0], 2);
        assert_eq!(out, vec![None, Some(1.5), Some(2.5), Some(3.5)]);
        assert!(sma(&[1.0], 3).iter().all(Option::is_none));
        assert!(sma(&[1.0, 2.0], 0).iter().all(Option::is_none));
    }

    #[test]
    fn ema_is_seeded_by_sma() {
        let out = ema(&[2.0, 4.0, 6.0, 8.0], 3);
        assert_eq!(out[1], None);
        assert_eq!(out[2], Some(4.0));
        assert_eq!(out[3], Some(0.5 * 8.0 + 0.5 * 4.0));
    }

    #[test]
    fn rsi_extremes() {
        let rising: Vec<f64> = (0..20).map(|i| i as f64).collect();
        assert_eq!(rsi(&rising, 14)[19], Some(100.0));
        let flat = vec![5.0; 20];
        assert_eq!(rsi(&flat, 14)[19], Some(50.0));
        assert_eq!(rsi(&flat, 14)[13], None);
    }

    #[test]
    fn macd_signal_starts_after_line() {
        let closes: Vec<f64> = (0..60).map(|i| 100.0 + (i as f64 * 0.3).sin()).collect();
        let out = macd(&closes, 12, 26, 9);
        assert_eq!(out.macd.len(), closes.len());
        assert_eq!(out.signal.len(), closes.len());
        assert!(out.macd[24].is_none());
        assert!(out.macd[25].is_some());
        assert!(out.signal[32].is_none());
        assert!(out.signal[33].is_some());
        assert!(out.histogram[33].is_some());
    }

    #[test]
    fn vwap_weights_by_volume() {
        let mut bars = bars_from_closes(&[10.0, 20.0]);
        bars[1].volume = 300.0;
        let out = vwap(&bars, 2);
        assert_eq!(out[0], None);
        let expected = (10.0 * 100.0 + 20.0 * 300.0) / 400.0;
        assert!((out[1].unwrap() - expected).abs() < 1e-9);
    }

    #[test]
    fn atr_of_constant_range() {
        let bars = bars_from_closes(&[10.0, 10.0, 10.0, 10.0]);
        let out = atr(&bars, 2);
        assert_eq!(out[0], None);
        assert_eq!(out[1], Some(2.0));
        assert_eq!(out[3], Some(2.0));
    }

    #[test]
    fn supertrend_flips_on_reversal() {
        let mut closes: Vec<f64> = (0..20).map(|i| 100.0 + i as f64 * 2.0).collect();
        closes.extend((0..20).map(|i| 138.0 - i as f64 * 4.0));
        let bars = bars_from_closes(&closes);
        let out = supertrend(&bars, 5, 2.0);
        assert!(out[19].map(|p| p.uptrend).unwrap_or(false));
        assert!(out[39].map(|p| !p.uptrend).unwrap_or(false));
    }
}
