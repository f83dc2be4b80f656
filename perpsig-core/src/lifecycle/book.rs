//! Open positions keyed by symbol. At most one position per symbol.

use crate::domain::{ExitReason, Position, Symbol, Trade};
use crate::lifecycle::events::EventSink;
use crate::lifecycle::machine::{Lifecycle, Observation, Update};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error, PartialEq)]
pub enum BookError {
    #[error("{0} already has an open position")]
    AlreadyOpen(Symbol),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PositionBook {
    positions: BTreeMap<Symbol, Position>,
}

impl PositionBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from persisted positions. Later duplicates of a symbol are dropped.
    pub fn from_positions(positions: impl IntoIterator<Item = Position>) -> Self {
        let mut book = Self::new();
        for position in positions {
            if let Err(e) = book.insert(position) {
                warn!(error = %e, "dropping duplicate restored position");
            }
        }
        book
    }

    pub fn insert(&mut self, position: Position) -> Result<(), BookError> {
        if self.positions.contains_key(&position.symbol) {
            return Err(BookError::AlreadyOpen(position.symbol));
        }
        self.positions.insert(position.symbol.clone(), position);
        Ok(())
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.positions.contains_key(symbol)
    }

    pub fn get(&self, symbol: &str) -> Option<&Position> {
        self.positions.get(symbol)
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }

    pub fn symbols(&self) -> Vec<Symbol> {
        self.positions.keys().cloned().collect()
    }

    pub fn to_vec(&self) -> Vec<Position> {
        self.positions.values().cloned().collect()
    }

    pub fn margin_used(&self) -> f64 {
        self.positions.values().map(|p| p.margin_used).sum()
    }

    /// Equity not yet committed as margin.
    pub fn available_margin(&self, equity: f64) -> f64 {
        (equity - self.margin_used()).max(0.0)
    }

    /// Mark-to-market of every remaining slice, before exit costs.
    pub fn unrealized_pnl(&self, mut price_of: impl FnMut(&Position) -> Option<f64>) -> f64 {
        self.positions
            .values()
            .filter_map(|p| price_of(p).map(|price| p.unrealized_pnl(price)))
            .sum()
    }

    /// Run one lifecycle step for `symbol`. Returns the trade if it closed.
    pub fn update(
        &mut self,
        symbol: &str,
        obs: &Observation,
        lifecycle: &Lifecycle,
        sink: &mut dyn EventSink,
    ) -> Option<Trade> {
        let position = self.positions.remove(symbol)?;
        match lifecycle.update(position, obs, sink) {
            Update::Holding(position) => {
                self.positions.insert(symbol.to_string(), position);
                None
            }
            Update::Closed(trade) => Some(trade),
        }
    }

    pub fn close(
        &mut self,
        symbol: &str,
        at: DateTime<Utc>,
        price: f64,
        reason: ExitReason,
        lifecycle: &Lifecycle,
        sink: &mut dyn EventSink,
    ) -> Option<Trade> {
        let position = self.positions.remove(symbol)?;
        Some(lifecycle.force_close(position, at, price, reason, sink))
    }

    /// Force-close everything. Positions without a price close at their
    /// last observed close, or at entry if they never saw a candle.
    pub fn close_all(
        &mut self,
        at: DateTime<Utc>,
        mut price_of: impl FnMut(&Position) -> Option<f64>,
        reason: ExitReason,
        lifecycle: &Lifecycle,
        sink: &mut dyn EventSink,
    ) -> Vec<Trade> {
        let positions = std::mem::take(&mut self.positions);
        positions
            .into_values()
            .map(|position| {
                let price = price_of(&position).unwrap_or_else(|| {
                    let fallback = position.reference_price();
                    warn!(id = %position.id, fallback, "no closing price, using last observed close");
                    fallback
                });
                lifecycle.force_close(position, at, price, reason, sink)
            })
            .collect()
    }
}
