pub mod context;
pub mod costs;
pub mod data;
pub mod engine;
pub mod error;
pub mod indicators;
pub mod metrics;
pub mod portfolio;
pub mod report;
pub mod strategy;
pub mod types;

pub use engine::backtest;
pub use engine::backtest::{BacktestResult, CancelToken, Engine, EngineConfig};
pub use error::BacktestError;

pub fn engine_name() -> &'static str {
    "backcast"
}
