use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BacktestError {
    /// Rejected before any simulation state was touched.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("backtest cancelled after {bars_processed} bars")]
    Cancelled { bars_processed: usize },
}
