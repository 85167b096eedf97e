use super::{detect_cross, go_long, go_short, window_start, Cross, OrderSize, Strategy};
use crate::context::{SimulationContext, StateKey};
use crate::indicators::rsi;
use crate::types::Bar;

const PREV_RSI: StateKey<f64> = StateKey::new("rsi_reversion.prev");

/// Buys when RSI climbs back above the oversold level and sells when it
/// falls back below the overbought level.
pub struct RsiReversion {
    period: usize,
    oversold: f64,
    overbought: f64,
    size: OrderSize,
}

impl RsiReversion {
    pub fn new(period: usize, oversold: f64, overbought: f64, size: OrderSize) -> Result<Self, String> {
        if period == 0 {
            return Err("rsi_reversion period must be positive".to_string());
        }
        if !(0.0..100.0).contains(&oversold) || !(oversold < overbought && overbought <= 100.0) {
            return Err(format!(
                "rsi_reversion needs 0 <= oversold < overbought <= 100, got {oversold}/{overbought}"
            ));
        }
        Ok(Self {
            period,
            oversold,
            overbought,
            size,
        })
    }
}

impl Strategy for RsiReversion {
    fn name(&self) -> &str {
        "rsi_reversion"
    }

    fn on_bar(&mut self, ctx: &mut SimulationContext, _bar: &Bar) {
        let history = ctx.bars_so_far();
        let start = window_start(history.len(), self.period * 10);
        let closes: Vec<f64> = history[start..].iter().map(|bar| bar.close).collect();
        let Some(Some(value)) = rsi(&closes, self.period).last().copied() else {
            return;
        };

        let prev = ctx.get(PREV_RSI).copied();
        let up = detect_cross(prev.map(|p| (p, self.oversold)), value, self.oversold);
        let down = detect_cross(prev.map(|p| (p, self.overbought)), value, self.overbought);
        if up == Some(Cross::Above) {
            go_long(ctx, self.size, "rsi left oversold");
        } else if down == Some(Cross::Below) {
            go_short(ctx, self.size, "rsi left overbought");
        }
        ctx.set(PREV_RSI, value);
    }
}

#[cfg(test)]
mod tests {
    use super::RsiReversion;
    use crate::strategy::test_support::{bars_from_closes, ctx_with, signal_indices};
    use crate::strategy::{OrderSize, Strategy};
    use crate::types::{ProductMode, Side};

    #[test]
    fn buys_on_recovery_from_oversold() {
        let mut closes: Vec<f64> = (0..10).map(|i| 100.0 - 3.0 * i as f64).collect();
        closes.extend((1..=6).map(|i| 73.0 + 4.0 * i as f64));
        let mut ctx = ctx_with(bars_from_closes(&closes), ProductMode::Delivery);
        let mut strategy =
            RsiReversion::new(3, 30.0, 70.0, OrderSize::Quantity(2)).expect("valid thresholds");

        strategy.init(&mut ctx);
        let mut sides = Vec::new();
        for i in 0..closes.len() {
            ctx.set_index(i);
            let bar = ctx.bars()[i];
            strategy.on_bar(&mut ctx, &bar);
            sides.extend(ctx.pending_orders().iter().map(|o| (i, o.side)));
            ctx.cancel_pending();
        }
        assert_eq!(sides, vec![(10, Side::Buy)]);
    }

    #[test]
    fn flat_prices_never_signal() {
        let mut ctx = ctx_with(bars_from_closes(&[50.0; 40]), ProductMode::Intraday);
        let mut strategy =
            RsiReversion::new(14, 30.0, 70.0, OrderSize::Quantity(1)).expect("valid thresholds");
        assert!(signal_indices(&mut strategy, &mut ctx).is_empty());
    }

    #[test]
    fn rejects_inverted_thresholds() {
        assert!(RsiReversion::new(14, 70.0, 30.0, OrderSize::Quantity(1)).is_err());
    }
}
