//! Transaction cost collaborator.
//!
//! The engine asks for a cost once per closing fill, passing the position's
//! average entry price and the exit fill price. Implementations return the
//! total round-trip charge for that quantity, which is netted out of the
//! realized PnL.

use crate::types::ProductMode;
use serde::{Deserialize, Serialize};

pub trait CostModel: Send + Sync {
    fn cost(&self, entry_price: f64, exit_price: f64, quantity: i64, product: ProductMode) -> f64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ZeroCost;

impl CostModel for ZeroCost {
    fn cost(&self, _entry: f64, _exit: f64, _quantity: i64, _product: ProductMode) -> f64 {
        0.0
    }
}

/// Turnover fee in basis points on both legs, plus an optional flat fee per
/// leg. Intraday turnover is charged at half rate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BpsCost {
    pub fee_bps: f64,
    #[serde(default)]
    pub flat_fee_per_leg: f64,
}

impl BpsCost {
    pub fn new(fee_bps: f64) -> Self {
        Self {
            fee_bps,
            flat_fee_per_leg: 0.0,
        }
    }
}

impl CostModel for BpsCost {
    fn cost(&self, entry_price: f64, exit_price: f64, quantity: i64, product: ProductMode) -> f64 {
        if quantity <= 0 {
            return 0.0;
        }
        let turnover = (entry_price.abs() + exit_price.abs()) * quantity as f64;
        let rate = match product {
            ProductMode::Intraday => self.fee_bps / 2.0,
            ProductMode::Delivery | ProductMode::CarryForward => self.fee_bps,
        };
        let fee = turnover * rate / 10_000.0 + 2.0 * self.flat_fee_per_leg;
        if fee.is_finite() {
            fee.max(0.0)
        } else {
            0.0
        }
    }
}
