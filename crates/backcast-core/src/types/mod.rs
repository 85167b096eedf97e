use serde::{Deserialize, Serialize};

/// One OHLCV observation. `timestamp` is epoch seconds (UTC).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    pub fn new(timestamp: i64, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// All prices and the volume are finite. A NaN volume would poison
    /// every volume-weighted indicator downstream.
    pub fn is_finite(&self) -> bool {
        self.open.is_finite()
            && self.high.is_finite()
            && self.low.is_finite()
            && self.close.is_finite()
            && self.volume.is_finite()
    }

    pub fn typical_price(&self) -> f64 {
        (self.high + self.low + self.close) / 3.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderKind {
    Market,
    Limit,
    StopMarket,
    StopLimit,
}

/// An order queued by a strategy and not yet filled.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingOrder {
    pub side: Side,
    pub kind: OrderKind,
    pub quantity: i64,
    pub limit_price: Option<f64>,
    pub trigger_price: Option<f64>,
    pub reason: String,
    /// Index of the bar during which the order was placed.
    pub placed_at: usize,
}

/// Direction of the exposure a trade closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PositionSide {
    Long,
    Short,
}

/// Account regime. Controls whether shorts may be opened.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductMode {
    /// Cash delivery; long only.
    #[default]
    Delivery,
    /// Leveraged same-session positions.
    Intraday,
    /// Leveraged positions carried across sessions (futures style).
    CarryForward,
}

impl ProductMode {
    pub fn allows_short(self) -> bool {
        !matches!(self, ProductMode::Delivery)
    }

    pub fn parse(value: &str) -> Result<Self, String> {
        match value.trim().to_lowercase().as_str() {
            "delivery" | "cnc" => Ok(ProductMode::Delivery),
            "intraday" | "mis" => Ok(ProductMode::Intraday),
            "carry_forward" | "carryforward" | "nrml" => Ok(ProductMode::CarryForward),
            other => Err(format!("unsupported product mode: {other}")),
        }
    }
}

/// A completed fill that closed or reduced an open position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub entry_timestamp: i64,
    pub exit_timestamp: i64,
    pub side: PositionSide,
    pub entry_price: f64,
    pub exit_price: f64,
    pub quantity: i64,
    pub pnl: f64,
    pub pnl_pct: f64,
    pub cost: f64,
    pub reason: String,
}

impl Trade {
    pub fn holding_days(&self) -> f64 {
        (self.exit_timestamp - self.entry_timestamp) as f64 / 86_400.0
    }

    pub fn is_win(&self) -> bool {
        self.pnl > 0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub timestamp: i64,
    pub value: f64,
}
