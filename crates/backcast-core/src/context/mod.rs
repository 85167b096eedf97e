//! The strategy's view of one simulated account.
//!
//! Order placement methods only queue [`PendingOrder`]s. The engine drains the
//! queue at the start of the next bar, so nothing placed while handling bar
//! `i` can be filled with bar `i`'s prices.

mod scratch;

pub use scratch::{Scratch, StateKey};

use crate::portfolio::Portfolio;
use crate::types::{Bar, OrderKind, PendingOrder, ProductMode, Side};

#[derive(Debug)]
pub struct SimulationContext {
    ticker: String,
    capital: f64,
    slippage: f64,
    product: ProductMode,
    risk_free_rate: f64,
    bars: Vec<Bar>,
    index: usize,
    portfolio: Portfolio,
    pending: Vec<PendingOrder>,
    scratch: Scratch,
}

/// Parameters the engine seeds a fresh context with.
#[derive(Debug, Clone, Copy)]
pub struct ContextParams {
    pub capital: f64,
    pub slippage: f64,
    pub product: ProductMode,
    pub risk_free_rate: f64,
    pub margin_rate: f64,
}

impl SimulationContext {
    /// `bars` must already be sorted by timestamp.
    pub fn new(ticker: impl Into<String>, bars: Vec<Bar>, params: ContextParams) -> Self {
        Self {
            ticker: ticker.into(),
            capital: params.capital,
            slippage: params.slippage,
            product: params.product,
            risk_free_rate: params.risk_free_rate,
            bars,
            index: 0,
            portfolio: Portfolio::new_with_cash(params.capital, params.margin_rate),
            pending: Vec::new(),
            scratch: Scratch::new(),
        }
    }

    pub fn ticker(&self) -> &str {
        &self.ticker
    }

    pub fn capital(&self) -> f64 {
        self.capital
    }

    pub fn cash(&self) -> f64 {
        self.portfolio.cash()
    }

    pub fn position(&self) -> i64 {
        self.portfolio.position()
    }

    pub fn avg_price(&self) -> f64 {
        self.portfolio.avg_price()
    }

    pub fn slippage(&self) -> f64 {
        self.slippage
    }

    pub fn product(&self) -> ProductMode {
        self.product
    }

    pub fn risk_free_rate(&self) -> f64 {
        self.risk_free_rate
    }

    pub fn is_long(&self) -> bool {
        self.position() > 0
    }

    pub fn is_short(&self) -> bool {
        self.position() < 0
    }

    pub fn is_flat(&self) -> bool {
        self.position() == 0
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    pub fn current_index(&self) -> usize {
        self.index
    }

    pub fn current_bar(&self) -> Bar {
        self.bars.get(self.index).copied().unwrap_or_default()
    }

    /// Bars up to and including the current one.
    pub fn bars_so_far(&self) -> &[Bar] {
        let end = (self.index + 1).min(self.bars.len());
        &self.bars[..end]
    }

    pub fn closes(&self) -> impl Iterator<Item = f64> + '_ {
        self.bars_so_far().iter().map(|bar| bar.close)
    }

    /// The bar `n` steps before the current one, or a zeroed bar when that
    /// reaches before the start of the history.
    pub fn look_back(&self, n: usize) -> Bar {
        match self.index.checked_sub(n) {
            Some(idx) => self.bars.get(idx).copied().unwrap_or_default(),
            None => Bar::default(),
        }
    }

    pub fn bars_since_entry(&self) -> usize {
        self.portfolio
            .entry_index()
            .map(|entry| self.index.saturating_sub(entry))
            .unwrap_or(0)
    }

    pub fn portfolio_value(&self) -> f64 {
        self.portfolio.equity(self.current_bar().close)
    }

    pub fn position_value(&self) -> f64 {
        self.portfolio.position_value(self.current_bar().close)
    }

    pub fn unrealized_pnl(&self) -> f64 {
        self.portfolio.unrealized_pnl(self.current_bar().close)
    }

    pub fn scratch(&self) -> &Scratch {
        &self.scratch
    }

    pub fn scratch_mut(&mut self) -> &mut Scratch {
        &mut self.scratch
    }

    pub fn set<T: Send + 'static>(&mut self, key: StateKey<T>, value: T) {
        self.scratch.set(key, value);
    }

    pub fn get<T: 'static>(&self, key: StateKey<T>) -> Option<&T> {
        self.scratch.get(key)
    }

    pub fn get_or_default<T: Clone + Default + 'static>(&self, key: StateKey<T>) -> T {
        self.scratch.get_or_default(key)
    }

    pub fn pending_orders(&self) -> &[PendingOrder] {
        &self.pending
    }

    pub fn buy(&mut self, quantity: i64, reason: impl Into<String>) {
        self.enqueue(Side::Buy, OrderKind::Market, quantity, None, None, reason.into());
    }

    pub fn sell(&mut self, quantity: i64, reason: impl Into<String>) {
        self.enqueue(Side::Sell, OrderKind::Market, quantity, None, None, reason.into());
    }

    pub fn buy_limit(&mut self, quantity: i64, limit: f64, reason: impl Into<String>) {
        self.enqueue(Side::Buy, OrderKind::Limit, quantity, Some(limit), None, reason.into());
    }

    pub fn sell_limit(&mut self, quantity: i64, limit: f64, reason: impl Into<String>) {
        self.enqueue(Side::Sell, OrderKind::Limit, quantity, Some(limit), None, reason.into());
    }

    /// Stop order triggered when the bar trades at or above `trigger`.
    /// Without `limit` it becomes a stop-market order.
    pub fn buy_stop(
        &mut self,
        quantity: i64,
        trigger: f64,
        limit: Option<f64>,
        reason: impl Into<String>,
    ) {
        let kind = stop_kind(limit);
        self.enqueue(Side::Buy, kind, quantity, limit, Some(trigger), reason.into());
    }

    /// Stop order triggered when the bar trades at or below `trigger`.
    pub fn sell_stop(
        &mut self,
        quantity: i64,
        trigger: f64,
        limit: Option<f64>,
        reason: impl Into<String>,
    ) {
        let kind = stop_kind(limit);
        self.enqueue(Side::Sell, kind, quantity, limit, Some(trigger), reason.into());
    }

    /// Queues a market order that flattens the whole position.
    pub fn close_position(&mut self, reason: impl Into<String>) {
        let position = self.position();
        if position > 0 {
            self.sell(position, reason);
        } else if position < 0 {
            self.buy(position.abs(), reason);
        }
    }

    /// Drops every unfilled order and returns how many were discarded.
    pub fn cancel_pending(&mut self) -> usize {
        let dropped = self.pending.len();
        self.pending.clear();
        dropped
    }

    fn enqueue(
        &mut self,
        side: Side,
        kind: OrderKind,
        quantity: i64,
        limit_price: Option<f64>,
        trigger_price: Option<f64>,
        reason: String,
    ) {
        let prices_ok = limit_price.map_or(true, f64::is_finite)
            && trigger_price.map_or(true, f64::is_finite);
        if quantity <= 0 || !prices_ok {
            tracing::debug!(
                ticker = %self.ticker,
                ?side,
                ?kind,
                quantity,
                "ignoring malformed order"
            );
            return;
        }
        self.pending.push(PendingOrder {
            side,
            kind,
            quantity,
            limit_price,
            trigger_price,
            reason,
            placed_at: self.index,
        });
    }

    pub(crate) fn set_index(&mut self, index: usize) {
        self.index = index;
    }

    pub(crate) fn take_pending(&mut self) -> Vec<PendingOrder> {
        std::mem::take(&mut self.pending)
    }

    /// Puts unfilled orders back ahead of anything queued since they were taken.
    pub(crate) fn requeue(&mut self, mut orders: Vec<PendingOrder>) {
        orders.append(&mut self.pending);
        self.pending = orders;
    }

    pub(crate) fn portfolio(&self) -> &Portfolio {
        &self.portfolio
    }

    pub(crate) fn portfolio_mut(&mut self) -> &mut Portfolio {
        &mut self.portfolio
    }
}

fn stop_kind(limit: Option<f64>) -> OrderKind {
    if limit.is_some() {
        OrderKind::StopLimit
    } else {
        OrderKind::StopMarket
    }
}
