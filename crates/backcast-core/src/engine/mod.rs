pub mod backtest;
pub mod fill;
