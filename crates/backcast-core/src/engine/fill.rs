//! Per-bar fill test for queued orders.

use crate::types::{Bar, OrderKind, PendingOrder, Side};

/// Price an order fills at against `bar`, before slippage, or `None` when the
/// bar never reaches it.
pub fn fill_price(order: &PendingOrder, bar: &Bar) -> Option<f64> {
    match (order.kind, order.side) {
        (OrderKind::Market, _) => Some(bar.open),
        (OrderKind::Limit, Side::Buy) => {
            let limit = order.limit_price?;
            (bar.low <= limit).then(|| bar.open.min(limit))
        }
        (OrderKind::Limit, Side::Sell) => {
            let limit = order.limit_price?;
            (bar.high >= limit).then(|| bar.open.max(limit))
        }
        (OrderKind::StopMarket, Side::Buy) => {
            let trigger = order.trigger_price?;
            (bar.high >= trigger).then_some(trigger)
        }
        (OrderKind::StopMarket, Side::Sell) => {
            let trigger = order.trigger_price?;
            (bar.low <= trigger).then_some(trigger)
        }
        (OrderKind::StopLimit, Side::Buy) => {
            let trigger = order.trigger_price?;
            let limit = order.limit_price?;
            (bar.high >= trigger).then(|| trigger.max(limit))
        }
        (OrderKind::StopLimit, Side::Sell) => {
            let trigger = order.trigger_price?;
            let limit = order.limit_price?;
            (bar.low <= trigger).then(|| trigger.min(limit))
        }
    }
}

/// Buys pay up, sells give up.
pub fn apply_slippage(price: f64, side: Side, slippage: f64) -> f64 {
    match side {
        Side::Buy => price * (1.0 + slippage),
        Side::Sell => price * (1.0 - slippage),
    }
}

#[cfg(test)]
mod tests {
    use super::{apply_slippage, fill_price};
    use crate::types::{Bar, OrderKind, PendingOrder, Side};

    fn order(side: Side, kind: OrderKind, limit: Option<f64>, trigger: Option<f64>) -> PendingOrder {
        PendingOrder {
            side,
            kind,
            quantity: 1,
            limit_price: limit,
            trigger_price: trigger,
            reason: String::new(),
            placed_at: 0,
        }
    }

    fn bar(open: f64, high: f64, low: f64, close: f64) -> Bar {
        Bar::new(0, open, high, low, close, 1.0)
    }

    #[test]
    fn market_fills_at_open() {
        let b = bar(101.0, 105.0, 95.0, 100.0);
        assert_eq!(fill_price(&order(Side::Buy, OrderKind::Market, None, None), &b), Some(101.0));
        assert_eq!(fill_price(&order(Side::Sell, OrderKind::Market, None, None), &b), Some(101.0));
    }

    #[test]
    fn buy_limit_fills_at_better_of_open_and_limit() {
        let b = bar(102.0, 105.0, 95.0, 100.0);
        let o = order(Side::Buy, OrderKind::Limit, Some(100.0), None);
        assert_eq!(fill_price(&o, &b), Some(100.0));

        let gap_down = bar(97.0, 99.0, 96.0, 98.0);
        assert_eq!(fill_price(&o, &gap_down), Some(97.0));

        let never = bar(104.0, 106.0, 101.0, 103.0);
        assert_eq!(fill_price(&o, &never), None);
    }

    #[test]
    fn sell_limit_fills_at_better_of_open_and_limit() {
        let o = order(Side::Sell, OrderKind::Limit, Some(110.0), None);
        assert_eq!(fill_price(&o, &bar(105.0, 112.0, 104.0, 111.0)), Some(110.0));
        assert_eq!(fill_price(&o, &bar(113.0, 115.0, 111.0, 114.0)), Some(113.0));
        assert_eq!(fill_price(&o, &bar(105.0, 109.0, 104.0, 108.0)), None);
    }

    #[test]
    fn sell_stop_market_fills_at_trigger_not_low() {
        let o = order(Side::Sell, OrderKind::StopMarket, None, Some(90.0));
        assert_eq!(fill_price(&o, &bar(95.0, 96.0, 85.0, 88.0)), Some(90.0));
        assert_eq!(fill_price(&o, &bar(95.0, 96.0, 91.0, 92.0)), None);
    }

    #[test]
    fn buy_stop_market_triggers_on_high() {
        let o = order(Side::Buy, OrderKind::StopMarket, None, Some(105.0));
        assert_eq!(fill_price(&o, &bar(100.0, 106.0, 99.0, 104.0)), Some(105.0));
        assert_eq!(fill_price(&o, &bar(100.0, 104.0, 99.0, 103.0)), None);
    }

    #[test]
    fn stop_limit_prices() {
        let buy = order(Side::Buy, OrderKind::StopLimit, Some(106.0), Some(105.0));
        assert_eq!(fill_price(&buy, &bar(100.0, 107.0, 99.0, 104.0)), Some(106.0));

        let sell = order(Side::Sell, OrderKind::StopLimit, Some(89.0), Some(90.0));
        assert_eq!(fill_price(&sell, &bar(95.0, 96.0, 85.0, 88.0)), Some(89.0));
        assert_eq!(fill_price(&sell, &bar(95.0, 96.0, 91.0, 92.0)), None);
    }

    #[test]
    fn slippage_direction() {
        assert!((apply_slippage(100.0, Side::Buy, 0.001) - 100.1).abs() < 1e-9);
        assert!((apply_slippage(100.0, Side::Sell, 0.001) - 99.9).abs() < 1e-9);
    }
}
