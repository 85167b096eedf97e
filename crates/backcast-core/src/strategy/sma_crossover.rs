use super::{detect_cross, go_long, go_short, window_start, Cross, OrderSize, Strategy};
use crate::context::{SimulationContext, StateKey};
use crate::indicators::sma;
use crate::types::Bar;

const PREV: StateKey<(f64, f64)> = StateKey::new("sma_crossover.prev");

/// Long when the fast SMA crosses above the slow one, short (or flat under
/// delivery) when it crosses below.
pub struct SmaCrossover {
    fast: usize,
    slow: usize,
    size: OrderSize,
}

impl SmaCrossover {
    pub fn new(fast: usize, slow: usize, size: OrderSize) -> Result<Self, String> {
        if fast == 0 || fast >= slow {
            return Err(format!("sma_crossover needs 0 < fast < slow, got {fast}/{slow}"));
        }
        Ok(Self { fast, slow, size })
    }
}

impl Strategy for SmaCrossover {
    fn name(&self) -> &str {
        "sma_crossover"
    }

    fn on_bar(&mut self, ctx: &mut SimulationContext, _bar: &Bar) {
        let history = ctx.bars_so_far();
        let start = window_start(history.len(), self.slow);
        let closes: Vec<f64> = history[start..].iter().map(|bar| bar.close).collect();

        let (Some(Some(fast)), Some(Some(slow))) = (
            sma(&closes, self.fast).last().copied(),
            sma(&closes, self.slow).last().copied(),
        ) else {
            return;
        };

        match detect_cross(ctx.get(PREV).copied(), fast, slow) {
            Some(Cross::Above) => go_long(ctx, self.size, "sma cross up"),
            Some(Cross::Below) => go_short(ctx, self.size, "sma cross down"),
            None => {}
        }
        ctx.set(PREV, (fast, slow));
    }
}
