use crate::context::SimulationContext;
use crate::types::Bar;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

mod macd_crossover;
mod rsi_reversion;
mod sma_crossover;
mod supertrend;
mod vwap_breakout;

pub use macd_crossover::MacdCrossover;
pub use rsi_reversion::RsiReversion;
pub use sma_crossover::SmaCrossover;
pub use supertrend::SuperTrendFollower;
pub use vwap_breakout::VwapBreakout;

/// Anything the engine can replay bars through.
///
/// `init` runs once before the first bar; orders queued there are eligible
/// from bar 0. `on_bar` runs after the bar's fills have been applied.
pub trait Strategy {
    fn name(&self) -> &str;

    fn init(&mut self, _ctx: &mut SimulationContext) {}

    fn on_bar(&mut self, ctx: &mut SimulationContext, bar: &Bar);
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderSize {
    /// Fixed number of shares.
    Quantity(i64),
    /// Fraction of current portfolio value, converted at the current close.
    PctEquity(f64),
}

impl Default for OrderSize {
    fn default() -> Self {
        OrderSize::Quantity(1)
    }
}

impl OrderSize {
    pub fn quantity(&self, ctx: &SimulationContext) -> i64 {
        match *self {
            OrderSize::Quantity(qty) => qty.max(0),
            OrderSize::PctEquity(pct) => {
                let price = ctx.current_bar().close;
                if price <= 0.0 || !pct.is_finite() || pct <= 0.0 {
                    return 0;
                }
                (ctx.portfolio_value() * pct / price).floor().max(0.0) as i64
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cross {
    Above,
    Below,
}

/// Detects `fast` crossing `slow` between the previous observation and now.
pub fn detect_cross(prev: Option<(f64, f64)>, fast: f64, slow: f64) -> Option<Cross> {
    let (prev_fast, prev_slow) = prev?;
    if prev_fast <= prev_slow && fast > slow {
        Some(Cross::Above)
    } else if prev_fast >= prev_slow && fast < slow {
        Some(Cross::Below)
    } else {
        None
    }
}

/// Queues one buy that covers any short and opens `size` long.
pub fn go_long(ctx: &mut SimulationContext, size: OrderSize, reason: &str) {
    let position = ctx.position();
    if position > 0 {
        return;
    }
    let qty = size.quantity(ctx) + position.abs();
    if qty > 0 {
        ctx.buy(qty, reason);
    }
}

/// Queues one sell that closes any long and, when the product allows it,
/// opens `size` short.
pub fn go_short(ctx: &mut SimulationContext, size: OrderSize, reason: &str) {
    let position = ctx.position();
    if position < 0 {
        return;
    }
    let open = if ctx.product().allows_short() {
        size.quantity(ctx)
    } else {
        0
    };
    let qty = position + open;
    if qty > 0 {
        ctx.sell(qty, reason);
    }
}

/// Start of the trailing window a strategy recomputes its indicators over.
pub(crate) fn window_start(len: usize, window: usize) -> usize {
    len.saturating_sub(window)
}

pub struct BuyAndHold {
    has_bought: bool,
    size: OrderSize,
}

impl BuyAndHold {
    pub fn new(size: OrderSize) -> Self {
        Self {
            has_bought: false,
            size,
        }
    }
}

impl Strategy for BuyAndHold {
    fn name(&self) -> &str {
        "buy_and_hold"
    }

    fn on_bar(&mut self, ctx: &mut SimulationContext, _bar: &Bar) {
        if self.has_bought {
            return;
        }
        let qty = self.size.quantity(ctx);
        if qty > 0 {
            ctx.buy(qty, "buy and hold");
            self.has_bought = true;
        }
    }
}

/// Named strategy parameters, as read from a config table.
pub type StrategyParams = BTreeMap<String, f64>;

pub enum StrategyKind {
    BuyAndHold(BuyAndHold),
    SmaCrossover(SmaCrossover),
    RsiReversion(RsiReversion),
    SuperTrend(SuperTrendFollower),
    VwapBreakout(VwapBreakout),
    MacdCrossover(MacdCrossover),
}

pub const STRATEGY_NAMES: &[&str] = &[
    "buy_and_hold",
    "sma_crossover",
    "rsi_reversion",
    "supertrend",
    "vwap_breakout",
    "macd_crossover",
];

impl StrategyKind {
    /// Builds a reference strategy by name. Unknown parameter keys are
    /// rejected so typos in a config do not silently fall back to defaults.
    pub fn from_name(name: &str, params: &StrategyParams) -> Result<Self, String> {
        let size = order_size(params)?;
        let reader = ParamReader::new(name, params);
        let kind = match name.trim().to_lowercase().as_str() {
            "buy_and_hold" | "buy_hold" => {
                reader.check(&[])?;
                StrategyKind::BuyAndHold(BuyAndHold::new(size))
            }
            "sma_crossover" | "sma" => {
                reader.check(&["fast", "slow"])?;
                StrategyKind::SmaCrossover(SmaCrossover::new(
                    reader.period("fast", 10)?,
                    reader.period("slow", 30)?,
                    size,
                )?)
            }
            "rsi_reversion" | "rsi" => {
                reader.check(&["period", "oversold", "overbought"])?;
                StrategyKind::RsiReversion(RsiReversion::new(
                    reader.period("period", 14)?,
                    reader.value("oversold", 30.0),
                    reader.value("overbought", 70.0),
                    size,
                )?)
            }
            "supertrend" => {
                reader.check(&["period", "multiplier"])?;
                StrategyKind::SuperTrend(SuperTrendFollower::new(
                    reader.period("period", 10)?,
                    reader.value("multiplier", 3.0),
                    size,
                )?)
            }
            "vwap_breakout" | "vwap" => {
                reader.check(&["period"])?;
                StrategyKind::VwapBreakout(VwapBreakout::new(reader.period("period", 20)?, size)?)
            }
            "macd_crossover" | "macd" => {
                reader.check(&["fast", "slow", "signal"])?;
                StrategyKind::MacdCrossover(MacdCrossover::new(
                    reader.period("fast", 12)?,
                    reader.period("slow", 26)?,
                    reader.period("signal", 9)?,
                    size,
                )?)
            }
            other => {
                return Err(format!(
                    "unknown strategy '{other}' (expected one of: {})",
                    STRATEGY_NAMES.join(", ")
                ))
            }
        };
        Ok(kind)
    }
}

const SIZE_KEYS: &[&str] = &["qty", "pct_equity"];

fn order_size(params: &StrategyParams) -> Result<OrderSize, String> {
    match (params.get("qty"), params.get("pct_equity")) {
        (Some(_), Some(_)) => Err("set only one of qty or pct_equity".to_string()),
        (Some(qty), None) => {
            if *qty < 1.0 || qty.fract() != 0.0 {
                return Err(format!("qty must be a positive whole number, got {qty}"));
            }
            Ok(OrderSize::Quantity(*qty as i64))
        }
        (None, Some(pct)) => {
            if !(*pct > 0.0 && *pct <= 1.0) {
                return Err(format!("pct_equity must be in (0, 1], got {pct}"));
            }
            Ok(OrderSize::PctEquity(*pct))
        }
        (None, None) => Ok(OrderSize::default()),
    }
}

struct ParamReader<'a> {
    strategy: &'a str,
    params: &'a StrategyParams,
}

impl<'a> ParamReader<'a> {
    fn new(strategy: &'a str, params: &'a StrategyParams) -> Self {
        Self { strategy, params }
    }

    fn check(&self, allowed: &[&str]) -> Result<(), String> {
        for key in self.params.keys() {
            if !allowed.contains(&key.as_str()) && !SIZE_KEYS.contains(&key.as_str()) {
                return Err(format!(
                    "unknown parameter '{key}' for strategy '{}'",
                    self.strategy
                ));
            }
        }
        Ok(())
    }

    fn value(&self, key: &str, default: f64) -> f64 {
        self.params.get(key).copied().unwrap_or(default)
    }

    fn period(&self, key: &str, default: usize) -> Result<usize, String> {
        match self.params.get(key) {
            None => Ok(default),
            Some(v) if *v >= 1.0 && v.fract() == 0.0 => Ok(*v as usize),
            Some(v) => Err(format!("{key} must be a positive whole number, got {v}")),
        }
    }
}

impl Strategy for StrategyKind {
    fn name(&self) -> &str {
        match self {
            StrategyKind::BuyAndHold(strategy) => strategy.name(),
            StrategyKind::SmaCrossover(strategy) => strategy.name(),
            StrategyKind::RsiReversion(strategy) => strategy.name(),
            StrategyKind::SuperTrend(strategy) => strategy.name(),
            StrategyKind::VwapBreakout(strategy) => strategy.name(),
            StrategyKind::MacdCrossover(strategy) => strategy.name(),
        }
    }

    fn init(&mut self, ctx: &mut SimulationContext) {
        match self {
            StrategyKind::BuyAndHold(strategy) => strategy.init(ctx),
            StrategyKind::SmaCrossover(strategy) => strategy.init(ctx),
            StrategyKind::RsiReversion(strategy) => strategy.init(ctx),
            StrategyKind::SuperTrend(strategy) => strategy.init(ctx),
            StrategyKind::VwapBreakout(strategy) => strategy.init(ctx),
            StrategyKind::MacdCrossover(strategy) => strategy.init(ctx),
        }
    }

    fn on_bar(&mut self, ctx: &mut SimulationContext, bar: &Bar) {
        match self {
            StrategyKind::BuyAndHold(strategy) => strategy.on_bar(ctx, bar),
            StrategyKind::SmaCrossover(strategy) => strategy.on_bar(ctx, bar),
            StrategyKind::RsiReversion(strategy) => strategy.on_bar(ctx, bar),
            StrategyKind::SuperTrend(strategy) => strategy.on_bar(ctx, bar),
            StrategyKind::VwapBreakout(strategy) => strategy.on_bar(ctx, bar),
            StrategyKind::MacdCrossover(strategy) => strategy.on_bar(ctx, bar),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::{bars_from_closes, ctx_with};
    use super::*;
    use crate::types::{ProductMode, Side};

    #[test]
    fn detect_cross_needs_previous_point() {
        assert_eq!(detect_cross(None, 2.0, 1.0), None);
        assert_eq!(detect_cross(Some((1.0, 2.0)), 3.0, 2.0), Some(Cross::Above));
        assert_eq!(detect_cross(Some((3.0, 2.0)), 1.0, 2.0), Some(Cross::Below));
        assert_eq!(detect_cross(Some((3.0, 2.0)), 4.0, 2.0), None);
    }

    #[test]
    fn pct_equity_sizes_from_close() {
        let mut ctx = ctx_with(bars_from_closes(&[100.0, 100.0]), ProductMode::Delivery);
        ctx.set_index(1);
        assert_eq!(OrderSize::PctEquity(0.5).quantity(&ctx), 500);
        assert_eq!(OrderSize::Quantity(-3).quantity(&ctx), 0);
    }

    #[test]
    fn go_short_only_closes_under_delivery() {
        let mut ctx = ctx_with(bars_from_closes(&[100.0, 100.0]), ProductMode::Delivery);
        go_short(&mut ctx, OrderSize::Quantity(5), "flip");
        assert!(ctx.pending_orders().is_empty());

        let mut ctx = ctx_with(bars_from_closes(&[100.0, 100.0]), ProductMode::Intraday);
        go_short(&mut ctx, OrderSize::Quantity(5), "flip");
        let order = &ctx.pending_orders()[0];
        assert_eq!((order.side, order.quantity), (Side::Sell, 5));
    }

    #[test]
    fn buy_and_hold_orders_once() {
        let mut ctx = ctx_with(bars_from_closes(&[100.0, 101.0, 102.0]), ProductMode::Delivery);
        let mut strategy = BuyAndHold::new(OrderSize::Quantity(3));
        let bar = ctx.current_bar();
        strategy.on_bar(&mut ctx, &bar);
        strategy.on_bar(&mut ctx, &bar);
        assert_eq!(ctx.pending_orders().len(), 1);
    }

    #[test]
    fn from_name_builds_each_reference_strategy() {
        let params = StrategyParams::new();
        for name in STRATEGY_NAMES {
            let strategy = StrategyKind::from_name(name, &params).expect("known strategy");
            assert_eq!(strategy.name(), *name);
        }
    }

    #[test]
    fn from_name_rejects_bad_input() {
        let empty = StrategyParams::new();
        assert!(StrategyKind::from_name("martingale", &empty).is_err());

        let mut typo = StrategyParams::new();
        typo.insert("fsat".to_string(), 5.0);
        assert!(StrategyKind::from_name("sma_crossover", &typo).is_err());

        let mut inverted = StrategyParams::new();
        inverted.insert("fast".to_string(), 30.0);
        inverted.insert("slow".to_string(), 10.0);
        assert!(StrategyKind::from_name("sma_crossover", &inverted).is_err());

        let mut both = StrategyParams::new();
        both.insert("qty".to_string(), 1.0);
        both.insert("pct_equity".to_string(), 0.5);
        assert!(StrategyKind::from_name("buy_and_hold", &both).is_err());
    }
}
