use super::{detect_cross, go_long, go_short, window_start, Cross, OrderSize, Strategy};
use crate::context::{SimulationContext, StateKey};
use crate::indicators::macd;
use crate::types::Bar;

const PREV: StateKey<(f64, f64)> = StateKey::new("macd_crossover.prev");

/// Trades the MACD line crossing its signal line.
pub struct MacdCrossover {
    fast: usize,
    slow: usize,
    signal: usize,
    size: OrderSize,
}

impl MacdCrossover {
    pub fn new(fast: usize, slow: usize, signal: usize, size: OrderSize) -> Result<Self, String> {
        if fast == 0 || signal == 0 || fast >= slow {
            return Err(format!(
                "macd_crossover needs 0 < fast < slow and signal > 0, got {fast}/{slow}/{signal}"
            ));
        }
        Ok(Self {
            fast,
            slow,
            signal,
            size,
        })
    }
}

impl Strategy for MacdCrossover {
    fn name(&self) -> &str {
        "macd_crossover"
    }

    fn on_bar(&mut self, ctx: &mut SimulationContext, _bar: &Bar) {
        let history = ctx.bars_so_far();
        let start = window_start(history.len(), (self.slow + self.signal) * 10);
        let closes: Vec<f64> = history[start..].iter().map(|bar| bar.close).collect();
        let series = macd(&closes, self.fast, self.slow, self.signal);
        let (Some(Some(line)), Some(Some(signal))) =
            (series.macd.last().copied(), series.signal.last().copied())
        else {
            return;
        };

        match detect_cross(ctx.get(PREV).copied(), line, signal) {
            Some(Cross::Above) => go_long(ctx, self.size, "macd crossed above signal"),
            Some(Cross::Below) => go_short(ctx, self.size, "macd crossed below signal"),
            None => {}
        }
        ctx.set(PREV, (line, signal));
    }
}
