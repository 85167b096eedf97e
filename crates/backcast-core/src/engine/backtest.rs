use crate::context::{ContextParams, SimulationContext};
use crate::costs::{CostModel, ZeroCost};
use crate::engine::fill::{apply_slippage, fill_price};
use crate::error::BacktestError;
use crate::metrics::{self, MetricsSummary};
use crate::portfolio::Fill;
use crate::strategy::Strategy;
use crate::types::{Bar, EquityPoint, ProductMode, Side, Trade};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::info_span;

pub const END_OF_BACKTEST: &str = "end of backtest";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Benchmark {
    pub name: String,
    pub bars: Vec<Bar>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub initial_capital: f64,
    /// Fractional price adjustment applied against every fill.
    pub slippage: f64,
    pub product: ProductMode,
    /// Annual rate used for Sharpe/Sortino excess returns.
    pub risk_free_rate: f64,
    /// Share of notional reserved as cash when opening a short.
    pub margin_rate: f64,
    pub benchmark: Option<Benchmark>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            initial_capital: 1_000_000.0,
            slippage: 0.001,
            product: ProductMode::Delivery,
            risk_free_rate: 0.065,
            margin_rate: 0.20,
            benchmark: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BenchmarkReturn {
    pub name: String,
    pub return_pct: f64,
    /// Strategy total return minus benchmark return, in percentage points.
    pub excess_return_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BacktestResult {
    pub strategy: String,
    pub ticker: String,
    pub start: i64,
    pub end: i64,
    pub bars_processed: usize,
    /// Equity snapshots taken while a position was open.
    pub bars_in_market: usize,
    pub initial_capital: f64,
    pub final_capital: f64,
    pub total_return: f64,
    pub total_return_pct: f64,
    pub trades: Vec<Trade>,
    pub equity_curve: Vec<EquityPoint>,
    pub metrics: MetricsSummary,
    pub benchmark: Option<BenchmarkReturn>,
}

impl BacktestResult {
    /// Hex SHA-256 of the JSON encoding. Identical runs hash identically.
    pub fn fingerprint(&self) -> Result<String, String> {
        let bytes = serde_json::to_vec(self)
            .map_err(|err| format!("failed to serialize result: {err}"))?;
        let digest = Sha256::digest(&bytes);
        Ok(digest.iter().map(|b| format!("{b:02x}")).collect())
    }
}

/// Cooperative cancellation flag, checked once per bar.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Replays bars through a strategy. Holds only read-only configuration, so
/// one engine can serve concurrent runs.
#[derive(Clone)]
pub struct Engine {
    config: EngineConfig,
    costs: Arc<dyn CostModel>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine").field("config", &self.config).finish_non_exhaustive()
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            costs: Arc::new(ZeroCost),
        }
    }

    pub fn with_cost_model(mut self, costs: impl CostModel + 'static) -> Self {
        self.costs = Arc::new(costs);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn run(
        &self,
        strategy: &mut dyn Strategy,
        ticker: &str,
        bars: &[Bar],
    ) -> Result<BacktestResult, BacktestError> {
        self.run_with_cancel(strategy, ticker, bars, &CancelToken::new())
    }

    pub fn run_with_cancel(
        &self,
        strategy: &mut dyn Strategy,
        ticker: &str,
        bars: &[Bar],
        cancel: &CancelToken,
    ) -> Result<BacktestResult, BacktestError> {
        validate_input(ticker, bars)?;

        let _span = info_span!(
            "run_backtest",
            strategy = %strategy.name(),
            ticker = %ticker,
            bars = bars.len()
        )
        .entered();
        let started = Instant::now();

        let mut sorted = bars.to_vec();
        sorted.sort_by_key(|bar| bar.timestamp);

        let mut ctx = SimulationContext::new(
            ticker,
            sorted,
            ContextParams {
                capital: self.config.initial_capital,
                slippage: self.config.slippage,
                product: self.config.product,
                risk_free_rate: self.config.risk_free_rate,
                margin_rate: self.config.margin_rate,
            },
        );

        strategy.init(&mut ctx);

        let mut trades = Vec::new();
        let mut equity_curve = Vec::with_capacity(ctx.bars().len());
        let mut bars_in_market = 0usize;

        for index in 0..ctx.bars().len() {
            if cancel.is_cancelled() {
                tracing::info!(bars_processed = index, "backtest cancelled");
                return Err(BacktestError::Cancelled {
                    bars_processed: index,
                });
            }

            ctx.set_index(index);
            let bar = ctx.bars()[index];

            self.process_pending(&mut ctx, &bar, &mut trades);
            strategy.on_bar(&mut ctx, &bar);

            if ctx.position() != 0 {
                bars_in_market += 1;
            }
            equity_curve.push(EquityPoint {
                timestamp: bar.timestamp,
                value: ctx.portfolio().equity(bar.close),
            });
        }
        ::metrics::counter!("backcast.engine.bars").increment(equity_curve.len() as u64);

        if let Some(trade) = self.force_close(&mut ctx) {
            trades.push(trade);
        }

        let sorted = ctx.bars();
        let first = sorted[0];
        let last = sorted[sorted.len() - 1];
        let initial_capital = self.config.initial_capital;
        let final_capital = ctx.portfolio().equity(last.close);
        let total_return = final_capital - initial_capital;
        let total_return_pct = if initial_capital > 0.0 {
            total_return / initial_capital * 100.0
        } else {
            0.0
        };

        let mut result = BacktestResult {
            strategy: strategy.name().to_string(),
            ticker: ticker.to_string(),
            start: first.timestamp,
            end: last.timestamp,
            bars_processed: equity_curve.len(),
            bars_in_market,
            initial_capital,
            final_capital,
            total_return,
            total_return_pct,
            trades,
            equity_curve,
            metrics: MetricsSummary::default(),
            benchmark: None,
        };
        metrics::compute(&mut result, self.config.risk_free_rate);
        result.benchmark = self
            .config
            .benchmark
            .as_ref()
            .and_then(|benchmark| benchmark_return(benchmark, total_return_pct));

        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        ::metrics::histogram!("backcast.engine.run_ms").record(elapsed_ms);
        tracing::info!(
            trades = result.trades.len(),
            final_capital = result.final_capital,
            total_return_pct = result.total_return_pct,
            sharpe = result.metrics.sharpe,
            elapsed_ms,
            "backtest complete"
        );

        Ok(result)
    }

    /// Tries every queued order against `bar` in placement order. Orders the
    /// bar does not reach stay queued; orders the account cannot afford are
    /// dropped.
    fn process_pending(&self, ctx: &mut SimulationContext, bar: &Bar, trades: &mut Vec<Trade>) {
        let orders = ctx.take_pending();
        if orders.is_empty() {
            return;
        }

        let index = ctx.current_index();
        let mut waiting = Vec::new();
        for order in orders {
            let Some(raw_price) = fill_price(&order, bar) else {
                waiting.push(order);
                continue;
            };
            let price = apply_slippage(raw_price, order.side, self.config.slippage);
            let fill = Fill {
                side: order.side,
                quantity: order.quantity,
                price,
                timestamp: bar.timestamp,
                bar_index: index,
                reason: &order.reason,
            };
            let report =
                ctx.portfolio_mut()
                    .apply_fill(&fill, self.config.product, self.costs.as_ref(), false);

            if report.filled > 0 {
                ::metrics::counter!("backcast.orders.filled").increment(1);
                tracing::debug!(
                    ts = bar.timestamp,
                    side = ?order.side,
                    kind = ?order.kind,
                    qty = report.filled,
                    price,
                    position = ctx.position(),
                    "order filled"
                );
            }
            if let Some(rejection) = report.rejected {
                ::metrics::counter!("backcast.orders.dropped", "reason" => rejection.label())
                    .increment(1);
                tracing::debug!(
                    ts = bar.timestamp,
                    side = ?order.side,
                    qty = order.quantity - report.filled,
                    reason = rejection.label(),
                    "order dropped"
                );
            }
            if let Some(trade) = report.trade {
                trades.push(trade);
            }
        }
        ctx.requeue(waiting);
    }

    fn force_close(&self, ctx: &mut SimulationContext) -> Option<Trade> {
        let position = ctx.position();
        if position == 0 {
            return None;
        }
        let last = ctx.bars()[ctx.bars().len() - 1];
        let side = if position > 0 { Side::Sell } else { Side::Buy };
        let fill = Fill {
            side,
            quantity: position.abs(),
            price: apply_slippage(last.close, side, self.config.slippage),
            timestamp: last.timestamp,
            bar_index: ctx.current_index(),
            reason: END_OF_BACKTEST,
        };
        let report =
            ctx.portfolio_mut()
                .apply_fill(&fill, self.config.product, self.costs.as_ref(), true);
        tracing::debug!(qty = fill.quantity, price = fill.price, "forced close at end of data");
        report.trade
    }
}

fn validate_input(ticker: &str, bars: &[Bar]) -> Result<(), BacktestError> {
    if ticker.trim().is_empty() {
        return Err(BacktestError::InvalidInput("ticker must not be empty".to_string()));
    }
    if bars.len() < 2 {
        return Err(BacktestError::InvalidInput(format!(
            "at least 2 bars required, got {}",
            bars.len()
        )));
    }
    if let Some(bad) = bars.iter().find(|bar| !bar.is_finite()) {
        return Err(BacktestError::InvalidInput(format!(
            "bar at ts={} has non-finite prices or volume",
            bad.timestamp
        )));
    }
    Ok(())
}

fn benchmark_return(benchmark: &Benchmark, strategy_return_pct: f64) -> Option<BenchmarkReturn> {
    let first = benchmark.bars.iter().min_by_key(|bar| bar.timestamp)?;
    let last = benchmark.bars.iter().max_by_key(|bar| bar.timestamp)?;
    if benchmark.bars.len() < 2 || first.close <= 0.0 {
        return None;
    }
    let return_pct = (last.close / first.close - 1.0) * 100.0;
    Some(BenchmarkReturn {
        name: benchmark.name.clone(),
        return_pct,
        excess_return_pct: strategy_return_pct - return_pct,
    })
}

#[cfg(test)]
mod tests {
    use super::{Benchmark, Engine, EngineConfig};
    use crate::context::SimulationContext;
    use crate::error::BacktestError;
    use crate::strategy::Strategy;
    use crate::types::Bar;

    struct DummyStrategy;

    impl Strategy for DummyStrategy {
        fn name(&self) -> &str {
            "dummy"
        }

        fn on_bar(&mut self, _ctx: &mut SimulationContext, _bar: &Bar) {}
    }

    fn flat_bar(ts: i64, px: f64) -> Bar {
        Bar::new(ts, px, px, px, px, 1.0)
    }

    #[test]
    fn run_counts_processed_bars() {
        let bars = vec![flat_bar(1, 1.0), flat_bar(2, 1.0)];
        let result = Engine::default()
            .run(&mut DummyStrategy, "BTCUSD", &bars)
            .expect("run succeeds");
        assert_eq!(result.bars_processed, 2);
        assert_eq!(result.equity_curve.len(), 2);
        assert_eq!(result.final_capital, 1_000_000.0);
    }

    #[test]
    fn rejects_short_input() {
        let err = Engine::default()
            .run(&mut DummyStrategy, "BTCUSD", &[flat_bar(1, 1.0)])
            .expect_err("one bar is not enough");
        assert!(matches!(err, BacktestError::InvalidInput(_)));
    }

    #[test]
    fn rejects_empty_ticker_and_nan_bars() {
        let bars = vec![flat_bar(1, 1.0), flat_bar(2, 1.0)];
        assert!(Engine::default().run(&mut DummyStrategy, " ", &bars).is_err());

        let bad = vec![flat_bar(1, 1.0), flat_bar(2, f64::NAN)];
        assert!(Engine::default().run(&mut DummyStrategy, "X", &bad).is_err());
    }

    #[test]
    fn rejects_nan_volume() {
        let bars = vec![flat_bar(1, 1.0), Bar::new(2, 1.0, 1.0, 1.0, 1.0, f64::NAN)];
        let err = Engine::default()
            .run(&mut DummyStrategy, "X", &bars)
            .expect_err("nan volume");
        assert!(matches!(err, BacktestError::InvalidInput(msg) if msg.contains("ts=2")));
    }

    #[test]
    fn benchmark_return_is_reported() {
        let config = EngineConfig {
            benchmark: Some(Benchmark {
                name: "INDEX".to_string(),
                bars: vec![flat_bar(2, 110.0), flat_bar(1, 100.0)],
            }),
            ..EngineConfig::default()
        };
        let bars = vec![flat_bar(1, 1.0), flat_bar(2, 1.0)];
        let result = Engine::new(config)
            .run(&mut DummyStrategy, "X", &bars)
            .expect("run succeeds");
        let benchmark = result.benchmark.expect("benchmark configured");
        assert_eq!(benchmark.name, "INDEX");
        assert!((benchmark.return_pct - 10.0).abs() < 1e-9);
        assert!((benchmark.excess_return_pct + 10.0).abs() < 1e-9);
    }
}
