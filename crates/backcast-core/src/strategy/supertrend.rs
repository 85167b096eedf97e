use super::{go_long, go_short, window_start, OrderSize, Strategy};
use crate::context::{SimulationContext, StateKey};
use crate::indicators::supertrend;
use crate::types::Bar;

const PREV_UPTREND: StateKey<bool> = StateKey::new("supertrend.uptrend");

/// Follows SuperTrend direction changes.
pub struct SuperTrendFollower {
    period: usize,
    multiplier: f64,
    size: OrderSize,
}

impl SuperTrendFollower {
    pub fn new(period: usize, multiplier: f64, size: OrderSize) -> Result<Self, String> {
        if period == 0 || !(multiplier.is_finite() && multiplier > 0.0) {
            return Err(format!(
                "supertrend needs a positive period and multiplier, got {period}/{multiplier}"
            ));
        }
        Ok(Self {
            period,
            multiplier,
            size,
        })
    }
}

impl Strategy for SuperTrendFollower {
    fn name(&self) -> &str {
        "supertrend"
    }

    fn on_bar(&mut self, ctx: &mut SimulationContext, _bar: &Bar) {
        let history = ctx.bars_so_far();
        let start = window_start(history.len(), self.period * 10);
        let Some(Some(point)) = supertrend(&history[start..], self.period, self.multiplier)
            .last()
            .copied()
        else {
            return;
        };

        match ctx.get(PREV_UPTREND).copied() {
            Some(false) if point.uptrend => go_long(ctx, self.size, "supertrend turned up"),
            Some(true) if !point.uptrend => go_short(ctx, self.size, "supertrend turned down"),
            _ => {}
        }
        ctx.set(PREV_UPTREND, point.uptrend);
    }
}

#[cfg(test)]
mod tests {
    use super::SuperTrendFollower;
    use crate::strategy::test_support::{bars_from_closes, ctx_with, signal_indices};
    use crate::strategy::OrderSize;
    use crate::types::ProductMode;

    #[test]
    fn signals_on_trend_reversal_only() {
        let mut closes: Vec<f64> = (0..20).map(|i| 100.0 + i as f64 * 2.0).collect();
        closes.extend((0..20).map(|i| 138.0 - i as f64 * 4.0));
        let mut ctx = ctx_with(bars_from_closes(&closes), ProductMode::Intraday);
        let mut strategy =
            SuperTrendFollower::new(5, 2.0, OrderSize::Quantity(1)).expect("valid params");

        let hits = signal_indices(&mut strategy, &mut ctx);
        assert_eq!(hits.len(), 1);
        assert!(hits[0] >= 20);
    }

    #[test]
    fn rejects_bad_multiplier() {
        assert!(SuperTrendFollower::new(10, 0.0, OrderSize::Quantity(1)).is_err());
        assert!(SuperTrendFollower::new(10, f64::NAN, OrderSize::Quantity(1)).is_err());
    }
}
