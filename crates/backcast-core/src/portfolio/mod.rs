use crate::costs::CostModel;
use crate::types::{PositionSide, ProductMode, Side, Trade};

/// Single-instrument account: cash, signed position and short margin.
#[derive(Debug, Clone)]
pub struct Portfolio {
    cash: f64,
    position: i64,
    avg_price: f64,
    reserved_margin: f64,
    margin_rate: f64,
    entry_index: Option<usize>,
    entry_timestamp: i64,
}

/// A fill the engine wants to book against the account.
#[derive(Debug, Clone, Copy)]
pub struct Fill<'a> {
    pub side: Side,
    pub quantity: i64,
    pub price: f64,
    pub timestamp: i64,
    pub bar_index: usize,
    pub reason: &'a str,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Rejection {
    InsufficientCash { required: f64, available: f64 },
    InsufficientMargin { required: f64, available: f64 },
    ShortNotAllowed,
}

impl Rejection {
    pub fn label(&self) -> &'static str {
        match self {
            Rejection::InsufficientCash { .. } => "insufficient_cash",
            Rejection::InsufficientMargin { .. } => "insufficient_margin",
            Rejection::ShortNotAllowed => "short_not_allowed",
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct FillReport {
    /// Quantity actually booked across the closing and opening legs.
    pub filled: i64,
    pub trade: Option<Trade>,
    pub rejected: Option<Rejection>,
}

impl Portfolio {
    pub fn new_with_cash(initial_cash: f64, margin_rate: f64) -> Self {
        Self {
            cash: initial_cash,
            position: 0,
            avg_price: 0.0,
            reserved_margin: 0.0,
            margin_rate,
            entry_index: None,
            entry_timestamp: 0,
        }
    }

    pub fn cash(&self) -> f64 {
        self.cash
    }

    pub fn position(&self) -> i64 {
        self.position
    }

    pub fn avg_price(&self) -> f64 {
        self.avg_price
    }

    pub fn reserved_margin(&self) -> f64 {
        self.reserved_margin
    }

    pub fn entry_index(&self) -> Option<usize> {
        self.entry_index
    }

    /// Books a fill. The part that reduces opposite exposure is applied
    /// first; any remainder opens or extends a position in the fill's
    /// direction. A leg the account cannot afford is skipped and reported in
    /// `rejected`. `force` books the closing leg without the cash check.
    ///
    /// An opening buy is checked against its notional alone. Both legs' costs
    /// are charged on the closing fill, so they never count against the
    /// opening cash check.
    pub fn apply_fill(
        &mut self,
        fill: &Fill<'_>,
        product: ProductMode,
        costs: &dyn CostModel,
        force: bool,
    ) -> FillReport {
        let mut report = FillReport::default();
        if fill.quantity <= 0 {
            return report;
        }

        let mut remaining = fill.quantity;
        let closing = match fill.side {
            Side::Buy => self.position < 0,
            Side::Sell => self.position > 0,
        };

        if closing {
            let qty = remaining.min(self.position.abs());
            match self.close_leg(fill, qty, product, costs, force) {
                Ok(trade) => {
                    report.trade = Some(trade);
                    report.filled += qty;
                    remaining -= qty;
                }
                Err(rejection) => {
                    report.rejected = Some(rejection);
                    return report;
                }
            }
        }

        if remaining > 0 {
            match self.open_leg(fill, remaining, product) {
                Ok(()) => report.filled += remaining,
                Err(rejection) => report.rejected = Some(rejection),
            }
        }

        report
    }

    fn close_leg(
        &mut self,
        fill: &Fill<'_>,
        qty: i64,
        product: ProductMode,
        costs: &dyn CostModel,
        force: bool,
    ) -> Result<Trade, Rejection> {
        let entry = self.avg_price;
        let cost = costs.cost(entry, fill.price, qty, product);
        let (side, gross, settlement, released) = if self.position > 0 {
            let gross = (fill.price - entry) * qty as f64;
            (PositionSide::Long, gross, fill.price * qty as f64 - cost, 0.0)
        } else {
            let released = self.reserved_margin * qty as f64 / self.position.abs() as f64;
            let gross = (entry - fill.price) * qty as f64;
            (PositionSide::Short, gross, released + gross - cost, released)
        };

        if !force && self.cash + settlement < 0.0 {
            return Err(Rejection::InsufficientCash {
                required: -settlement,
                available: self.cash,
            });
        }

        let pnl = gross - cost;
        let basis = entry * qty as f64;
        let pnl_pct = if basis > 0.0 { pnl / basis * 100.0 } else { 0.0 };

        self.cash += settlement;
        self.reserved_margin -= released;
        match side {
            PositionSide::Long => self.position -= qty,
            PositionSide::Short => self.position += qty,
        }

        let trade = Trade {
            entry_timestamp: self.entry_timestamp,
            exit_timestamp: fill.timestamp,
            side,
            entry_price: entry,
            exit_price: fill.price,
            quantity: qty,
            pnl,
            pnl_pct,
            cost,
            reason: fill.reason.to_string(),
        };

        if self.position == 0 {
            self.reset_entry();
        }
        Ok(trade)
    }

    fn open_leg(&mut self, fill: &Fill<'_>, qty: i64, product: ProductMode) -> Result<(), Rejection> {
        let notional = fill.price * qty as f64;
        match fill.side {
            Side::Buy => {
                if notional > self.cash {
                    return Err(Rejection::InsufficientCash {
                        required: notional,
                        available: self.cash,
                    });
                }
                self.cash -= notional;
            }
            Side::Sell => {
                if !product.allows_short() {
                    return Err(Rejection::ShortNotAllowed);
                }
                let margin = notional * self.margin_rate;
                if margin > self.cash {
                    return Err(Rejection::InsufficientMargin {
                        required: margin,
                        available: self.cash,
                    });
                }
                self.cash -= margin;
                self.reserved_margin += margin;
            }
        }

        let held = self.position.abs();
        if held == 0 {
            self.entry_index = Some(fill.bar_index);
            self.entry_timestamp = fill.timestamp;
        }
        let total = held + qty;
        self.avg_price = (self.avg_price * held as f64 + notional) / total as f64;
        self.position = match fill.side {
            Side::Buy => total,
            Side::Sell => -total,
        };
        Ok(())
    }

    fn reset_entry(&mut self) {
        self.avg_price = 0.0;
        self.reserved_margin = 0.0;
        self.entry_index = None;
        self.entry_timestamp = 0;
    }

    /// Signed market value: positive when long, negative when short. Not the
    /// equity term for a short; see [`Portfolio::equity`].
    pub fn position_value(&self, price: f64) -> f64 {
        self.position as f64 * price
    }

    pub fn unrealized_pnl(&self, price: f64) -> f64 {
        match self.position {
            0 => 0.0,
            qty if qty > 0 => (price - self.avg_price) * qty as f64,
            qty => (self.avg_price - price) * qty.abs() as f64,
        }
    }

    /// Cash plus what the open position is worth at `price`. A short is worth
    /// its reserved margin plus its unrealized PnL.
    pub fn equity(&self, price: f64) -> f64 {
        if self.position >= 0 {
            self.cash + self.position_value(price)
        } else {
            self.cash + self.reserved_margin + self.unrealized_pnl(price)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Fill, Portfolio, Rejection};
    use crate::costs::{BpsCost, ZeroCost};
    use crate::types::{PositionSide, ProductMode, Side};

    fn fill(side: Side, quantity: i64, price: f64, bar_index: usize) -> Fill<'static> {
        Fill {
            side,
            quantity,
            price,
            timestamp: bar_index as i64 * 86_400,
            bar_index,
            reason: "test",
        }
    }

    #[test]
    fn buy_and_sell_updates_cash_and_position() {
        let mut portfolio = Portfolio::new_with_cash(1000.0, 0.2);
        let report = portfolio.apply_fill(
            &fill(Side::Buy, 2, 100.0, 0),
            ProductMode::Delivery,
            &ZeroCost,
            false,
        );
        assert_eq!(report.filled, 2);
        assert!(report.trade.is_none());
        assert_eq!(portfolio.position(), 2);
        assert!((portfolio.cash() - 800.0).abs() < 1e-9);

        let report = portfolio.apply_fill(
            &fill(Side::Sell, 2, 110.0, 3),
            ProductMode::Delivery,
            &ZeroCost,
            false,
        );
        let trade = report.trade.expect("closing fill emits a trade");
        assert_eq!(trade.side, PositionSide::Long);
        assert!((trade.pnl - 20.0).abs() < 1e-9);
        assert!((trade.pnl_pct - 10.0).abs() < 1e-9);
        assert_eq!(trade.entry_timestamp, 0);
        assert_eq!(trade.exit_timestamp, 3 * 86_400);
        assert_eq!(portfolio.position(), 0);
        assert_eq!(portfolio.avg_price(), 0.0);
        assert!((portfolio.cash() - 1020.0).abs() < 1e-9);
    }

    #[test]
    fn adding_to_long_weights_entry_price() {
        let mut portfolio = Portfolio::new_with_cash(10_000.0, 0.2);
        portfolio.apply_fill(&fill(Side::Buy, 10, 100.0, 0), ProductMode::Delivery, &ZeroCost, false);
        portfolio.apply_fill(&fill(Side::Buy, 30, 120.0, 1), ProductMode::Delivery, &ZeroCost, false);
        assert_eq!(portfolio.position(), 40);
        assert!((portfolio.avg_price() - 115.0).abs() < 1e-9);
        assert_eq!(portfolio.entry_index(), Some(0));
    }

    #[test]
    fn insufficient_cash_leaves_state_untouched() {
        let mut portfolio = Portfolio::new_with_cash(500.0, 0.2);
        let report = portfolio.apply_fill(
            &fill(Side::Buy, 10, 100.0, 0),
            ProductMode::Delivery,
            &ZeroCost,
            false,
        );
        assert_eq!(report.filled, 0);
        assert!(matches!(report.rejected, Some(Rejection::InsufficientCash { .. })));
        assert_eq!(portfolio.position(), 0);
        assert_eq!(portfolio.cash(), 500.0);
    }

    #[test]
    fn opening_buy_checks_notional_only() {
        let costs = BpsCost {
            fee_bps: 10.0,
            flat_fee_per_leg: 5.0,
        };
        let mut portfolio = Portfolio::new_with_cash(1_000.0, 0.2);
        let report = portfolio.apply_fill(
            &fill(Side::Buy, 10, 100.0, 0),
            ProductMode::Delivery,
            &costs,
            false,
        );
        assert_eq!(report.filled, 10);
        assert!(report.rejected.is_none());
        assert_eq!(portfolio.cash(), 0.0);
    }

    #[test]
    fn delivery_refuses_short() {
        let mut portfolio = Portfolio::new_with_cash(1000.0, 0.2);
        let report = portfolio.apply_fill(
            &fill(Side::Sell, 1, 100.0, 0),
            ProductMode::Delivery,
            &ZeroCost,
            false,
        );
        assert_eq!(report.rejected, Some(Rejection::ShortNotAllowed));
        assert_eq!(portfolio.position(), 0);
    }

    #[test]
    fn short_reserves_margin_and_cover_releases_it() {
        let mut portfolio = Portfolio::new_with_cash(1000.0, 0.2);
        portfolio.apply_fill(&fill(Side::Sell, 10, 100.0, 0), ProductMode::Intraday, &ZeroCost, false);
        assert_eq!(portfolio.position(), -10);
        assert!((portfolio.reserved_margin() - 200.0).abs() < 1e-9);
        assert!((portfolio.cash() - 800.0).abs() < 1e-9);
        assert!((portfolio.equity(100.0) - 1000.0).abs() < 1e-9);
        assert!((portfolio.equity(90.0) - 1100.0).abs() < 1e-9);
        assert!((portfolio.position_value(90.0) + 900.0).abs() < 1e-9);
        let marked = portfolio.cash() + portfolio.position_value(90.0);
        assert!((marked - portfolio.equity(90.0)).abs() > 1.0);

        let report = portfolio.apply_fill(
            &fill(Side::Buy, 4, 90.0, 1),
            ProductMode::Intraday,
            &ZeroCost,
            false,
        );
        let trade = report.trade.expect("cover emits a trade");
        assert_eq!(trade.side, PositionSide::Short);
        assert!((trade.pnl - 40.0).abs() < 1e-9);
        assert_eq!(portfolio.position(), -6);
        assert!((portfolio.reserved_margin() - 120.0).abs() < 1e-9);
        assert!((portfolio.cash() - 920.0).abs() < 1e-9);
    }

    #[test]
    fn oversized_sell_flips_to_short_when_allowed() {
        let mut portfolio = Portfolio::new_with_cash(10_000.0, 0.2);
        portfolio.apply_fill(&fill(Side::Buy, 5, 100.0, 0), ProductMode::CarryForward, &ZeroCost, false);
        let report = portfolio.apply_fill(
            &fill(Side::Sell, 8, 100.0, 1),
            ProductMode::CarryForward,
            &ZeroCost,
            false,
        );
        assert_eq!(report.filled, 8);
        assert_eq!(report.trade.map(|t| t.quantity), Some(5));
        assert_eq!(portfolio.position(), -3);
        assert_eq!(portfolio.entry_index(), Some(1));
        assert!((portfolio.avg_price() - 100.0).abs() < 1e-9);
    }

    #[test]
    fn closing_cost_is_netted_from_pnl() {
        let mut portfolio = Portfolio::new_with_cash(10_000.0, 0.2);
        let costs = BpsCost::new(10.0);
        portfolio.apply_fill(&fill(Side::Buy, 10, 100.0, 0), ProductMode::Delivery, &costs, false);
        let report = portfolio.apply_fill(
            &fill(Side::Sell, 10, 110.0, 1),
            ProductMode::Delivery,
            &costs,
            false,
        );
        let trade = report.trade.expect("trade");
        assert!((trade.cost - 2.1).abs() < 1e-9);
        assert!((trade.pnl - 97.9).abs() < 1e-9);
        assert!((portfolio.cash() - 10_097.9).abs() < 1e-9);
    }
}
