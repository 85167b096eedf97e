//! Post-run statistics over the trade log and equity curve.
//!
//! Every figure degrades to zero on degenerate input (no trades, a flat or
//! too-short equity curve, non-positive capital) instead of failing.

use crate::engine::backtest::BacktestResult;
use crate::types::{EquityPoint, Trade};
use serde::Serialize;

pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;
const DAYS_PER_YEAR: f64 = 365.25;
const SECONDS_PER_DAY: f64 = 86_400.0;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSummary {
    pub total_trades: usize,
    pub wins: usize,
    pub losses: usize,
    /// Percentage of trades with positive PnL.
    pub win_rate: f64,
    pub avg_win: f64,
    /// Mean magnitude of losing trades (reported as a positive number).
    pub avg_loss: f64,
    pub profit_factor: f64,
    pub expectancy: f64,
    pub median_pnl: f64,
    pub longest_win_streak: usize,
    pub longest_loss_streak: usize,
    pub avg_holding_days: f64,
    pub total_cost: f64,
    /// Percent.
    pub cagr: f64,
    pub max_drawdown: f64,
    pub max_drawdown_pct: f64,
    pub sharpe: f64,
    pub sortino: f64,
    /// Annualised standard deviation of daily returns, percent.
    pub volatility: f64,
    pub calmar: f64,
    /// Share of bars with an open position, percent.
    pub exposure_pct: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TradeStats {
    pub wins: usize,
    pub losses: usize,
    pub win_rate: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub profit_factor: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Drawdown {
    pub max: f64,
    pub max_pct: f64,
}

/// Fills in `result.metrics` in place.
pub fn compute(result: &mut BacktestResult, risk_free_rate: f64) {
    result.metrics = compute_summary(result, risk_free_rate);
}

pub fn compute_summary(result: &BacktestResult, risk_free_rate: f64) -> MetricsSummary {
    summarize(
        &result.trades,
        &result.equity_curve,
        result.initial_capital,
        result.final_capital,
        Some(result.bars_in_market),
        risk_free_rate,
    )
}

/// Same figures as [`compute_summary`] from the raw parts of a run, e.g. a
/// trade log and equity curve read back from disk. Exposure is 0 when
/// `bars_in_market` is unknown.
pub fn summarize(
    trades: &[Trade],
    equity: &[EquityPoint],
    initial_capital: f64,
    final_capital: f64,
    bars_in_market: Option<usize>,
    risk_free_rate: f64,
) -> MetricsSummary {
    let stats = trade_stats(trades);
    let (longest_win_streak, longest_loss_streak) = longest_streaks(trades);
    let drawdown = max_drawdown(equity);
    let cagr = cagr(initial_capital, final_capital, span_days(equity));
    let excess = excess_returns(equity, risk_free_rate);

    let calmar = if drawdown.max_pct > 0.0 {
        cagr / drawdown.max_pct
    } else {
        0.0
    };
    let exposure_pct = match bars_in_market {
        Some(in_market) if !equity.is_empty() => {
            in_market as f64 / equity.len() as f64 * 100.0
        }
        _ => 0.0,
    };

    MetricsSummary {
        total_trades: trades.len(),
        wins: stats.wins,
        losses: stats.losses,
        win_rate: stats.win_rate,
        avg_win: stats.avg_win,
        avg_loss: stats.avg_loss,
        profit_factor: stats.profit_factor,
        expectancy: expectancy(trades),
        median_pnl: median_pnl(trades),
        longest_win_streak,
        longest_loss_streak,
        avg_holding_days: avg_holding_days(trades),
        total_cost: trades.iter().map(|t| t.cost).sum(),
        cagr,
        max_drawdown: drawdown.max,
        max_drawdown_pct: drawdown.max_pct,
        sharpe: sharpe(&excess),
        sortino: sortino(&excess),
        volatility: volatility(equity),
        calmar,
        exposure_pct,
    }
}

pub fn trade_stats(trades: &[Trade]) -> TradeStats {
    if trades.is_empty() {
        return TradeStats::default();
    }

    let mut stats = TradeStats::default();
    let mut total_wins = 0.0;
    let mut total_losses = 0.0;
    for trade in trades {
        if trade.pnl > 0.0 {
            stats.wins += 1;
            total_wins += trade.pnl;
        } else if trade.pnl < 0.0 {
            stats.losses += 1;
            total_losses += trade.pnl.abs();
        }
    }

    stats.win_rate = stats.wins as f64 / trades.len() as f64 * 100.0;
    if stats.wins > 0 {
        stats.avg_win = total_wins / stats.wins as f64;
    }
    if stats.losses > 0 {
        stats.avg_loss = total_losses / stats.losses as f64;
    }
    stats.profit_factor = if total_losses > 0.0 {
        total_wins / total_losses
    } else if total_wins > 0.0 {
        f64::INFINITY
    } else {
        0.0
    };
    stats
}

/// Compound annual growth rate in percent.
pub fn cagr(initial_capital: f64, final_capital: f64, days: f64) -> f64 {
    if days <= 0.0 || initial_capital <= 0.0 || final_capital <= 0.0 {
        return 0.0;
    }
    ((final_capital / initial_capital).powf(DAYS_PER_YEAR / days) - 1.0) * 100.0
}

pub fn span_days(equity: &[EquityPoint]) -> f64 {
    match (equity.first(), equity.last()) {
        (Some(first), Some(last)) => (last.timestamp - first.timestamp) as f64 / SECONDS_PER_DAY,
        _ => 0.0,
    }
}

pub fn max_drawdown(equity: &[EquityPoint]) -> Drawdown {
    let mut drawdown = Drawdown::default();
    let Some(first) = equity.first() else {
        return drawdown;
    };

    let mut peak = first.value;
    for point in equity {
        if point.value > peak {
            peak = point.value;
        }
        let dd = peak - point.value;
        if dd > drawdown.max {
            drawdown.max = dd;
        }
        if peak > 0.0 {
            let dd_pct = dd / peak * 100.0;
            if dd_pct > drawdown.max_pct {
                drawdown.max_pct = dd_pct;
            }
        }
    }
    drawdown
}

/// Simple returns between consecutive equity points.
pub fn daily_returns(equity: &[EquityPoint]) -> Vec<f64> {
    equity
        .windows(2)
        .filter(|pair| pair[0].value > 0.0)
        .map(|pair| pair[1].value / pair[0].value - 1.0)
        .collect()
}

pub fn excess_returns(equity: &[EquityPoint], annual_risk_free_rate: f64) -> Vec<f64> {
    let daily_rf = annual_risk_free_rate / TRADING_DAYS_PER_YEAR;
    daily_returns(equity)
        .into_iter()
        .map(|ret| ret - daily_rf)
        .collect()
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn sample_std(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let var = values
        .iter()
        .map(|v| {
            let diff = v - m;
            diff * diff
        })
        .sum::<f64>()
        / (values.len() as f64 - 1.0);
    var.sqrt()
}

pub fn sharpe(excess: &[f64]) -> f64 {
    if excess.len() < 2 {
        return 0.0;
    }
    let std = sample_std(excess);
    if !std.is_finite() || std < 1e-12 {
        return 0.0;
    }
    mean(excess) / std * TRADING_DAYS_PER_YEAR.sqrt()
}

/// Downside deviation divides by the full sample size, not the count of
/// negative observations.
pub fn sortino(excess: &[f64]) -> f64 {
    if excess.is_empty() {
        return 0.0;
    }
    let downside_sq: f64 = excess.iter().filter(|r| **r < 0.0).map(|r| r * r).sum();
    if downside_sq == 0.0 {
        return 0.0;
    }
    let downside_dev = (downside_sq / excess.len() as f64).sqrt();
    mean(excess) / downside_dev * TRADING_DAYS_PER_YEAR.sqrt()
}

pub fn volatility(equity: &[EquityPoint]) -> f64 {
    sample_std(&daily_returns(equity)) * TRADING_DAYS_PER_YEAR.sqrt() * 100.0
}

/// Longest runs of consecutive winning and losing trades.
pub fn longest_streaks(trades: &[Trade]) -> (usize, usize) {
    let mut best_win = 0;
    let mut best_loss = 0;
    let mut win = 0;
    let mut loss = 0;
    for trade in trades {
        if trade.pnl > 0.0 {
            win += 1;
            loss = 0;
        } else if trade.pnl < 0.0 {
            loss += 1;
            win = 0;
        } else {
            win = 0;
            loss = 0;
        }
        best_win = best_win.max(win);
        best_loss = best_loss.max(loss);
    }
    (best_win, best_loss)
}

/// Mean PnL per trade.
pub fn expectancy(trades: &[Trade]) -> f64 {
    if trades.is_empty() {
        return 0.0;
    }
    trades.iter().map(|t| t.pnl).sum::<f64>() / trades.len() as f64
}

pub fn median_pnl(trades: &[Trade]) -> f64 {
    if trades.is_empty() {
        return 0.0;
    }
    let mut pnls: Vec<f64> = trades.iter().map(|t| t.pnl).collect();
    pnls.sort_by(|a, b| a.total_cmp(b));
    let mid = pnls.len() / 2;
    if pnls.len() % 2 == 0 {
        (pnls[mid - 1] + pnls[mid]) / 2.0
    } else {
        pnls[mid]
    }
}

pub fn avg_holding_days(trades: &[Trade]) -> f64 {
    if trades.is_empty() {
        return 0.0;
    }
    trades.iter().map(Trade::holding_days).sum::<f64>() / trades.len() as f64
}
