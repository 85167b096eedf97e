use super::{detect_cross, go_long, go_short, window_start, Cross, OrderSize, Strategy};
use crate::context::{SimulationContext, StateKey};
use crate::indicators::vwap;
use crate::types::Bar;

const PREV: StateKey<(f64, f64)> = StateKey::new("vwap_breakout.prev");

/// Trades closes breaking through the rolling VWAP.
pub struct VwapBreakout {
    period: usize,
    size: OrderSize,
}

impl VwapBreakout {
    pub fn new(period: usize, size: OrderSize) -> Result<Self, String> {
        if period == 0 {
            return Err("vwap_breakout period must be positive".to_string());
        }
        Ok(Self { period, size })
    }
}

impl Strategy for VwapBreakout {
    fn name(&self) -> &str {
        "vwap_breakout"
    }

    fn on_bar(&mut self, ctx: &mut SimulationContext, bar: &Bar) {
        let history = ctx.bars_so_far();
        let start = window_start(history.len(), self.period);
        let Some(Some(level)) = vwap(&history[start..], self.period).last().copied() else {
            return;
        };

        match detect_cross(ctx.get(PREV).copied(), bar.close, level) {
            Some(Cross::Above) => go_long(ctx, self.size, "close broke above vwap"),
            Some(Cross::Below) => go_short(ctx, self.size, "close broke below vwap"),
            None => {}
        }
        ctx.set(PREV, (bar.close, level));
    }
}
