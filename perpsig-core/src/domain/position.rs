//! Open position state: direction, stop, take-profit ladder, fill bookkeeping.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::domain::fill::Fill;
use crate::domain::ids::PositionId;
use crate::domain::regime::Regime;

/// Percent values within this distance of each other are treated as equal.
pub const PERCENT_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Long => "long",
            Direction::Short => "short",
        }
    }

    /// +1 for long, -1 for short.
    pub fn sign(&self) -> f64 {
        match self {
            Direction::Long => 1.0,
            Direction::Short => -1.0,
        }
    }

    /// Price move from `from` to `to`, positive when it favours the position.
    pub fn favorable_move(&self, from: f64, to: f64) -> f64 {
        (to - from) * self.sign()
    }

    /// True if `candidate` is at least as tight as `current` (closer to or past entry).
    pub fn is_tighter_or_equal(&self, candidate: f64, current: f64) -> bool {
        match self {
            Direction::Long => candidate >= current,
            Direction::Short => candidate <= current,
        }
    }

    /// The tighter of two stop levels.
    pub fn tighter(&self, a: f64, b: f64) -> f64 {
        match self {
            Direction::Long => a.max(b),
            Direction::Short => a.min(b),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rung of the take-profit ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TpLevel {
    Tp1,
    Tp2,
    Tp3,
}

impl TpLevel {
    pub const ALL: [TpLevel; 3] = [TpLevel::Tp1, TpLevel::Tp2, TpLevel::Tp3];

    pub fn index(&self) -> usize {
        match self {
            TpLevel::Tp1 => 0,
            TpLevel::Tp2 => 1,
            TpLevel::Tp3 => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TpLevel::Tp1 => "tp1",
            TpLevel::Tp2 => "tp2",
            TpLevel::Tp3 => "tp3",
        }
    }
}

impl fmt::Display for TpLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TakeProfit {
    pub level: TpLevel,
    pub price: f64,
    /// Share of the original position closed at this level, in percent.
    pub close_percent: f64,
    pub risk_multiple: f64,
}

/// Three-level take-profit ladder.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TakeProfitLadder {
    levels: [TakeProfit; 3],
}

impl TakeProfitLadder {
    /// Build a ladder from `(price, close_percent, risk_multiple)` triples, tp1 first.
    pub fn new(levels: [(f64, f64, f64); 3]) -> Self {
        let mk = |i: usize| TakeProfit {
            level: TpLevel::ALL[i],
            price: levels[i].0,
            close_percent: levels[i].1,
            risk_multiple: levels[i].2,
        };
        Self {
            levels: [mk(0), mk(1), mk(2)],
        }
    }

    pub fn get(&self, level: TpLevel) -> &TakeProfit {
        &self.levels[level.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = &TakeProfit> {
        self.levels.iter()
    }

    pub fn total_close_percent(&self) -> f64 {
        self.levels.iter().map(|tp| tp.close_percent).sum()
    }

    /// Check that percents sum to 100 and prices step away from entry in order.
    pub fn validate(&self, direction: Direction, entry_price: f64) -> Result<(), PositionError> {
        let total = self.total_close_percent();
        if (total - 100.0).abs() > PERCENT_EPSILON {
            return Err(PositionError::LadderPercent(total));
        }
        let mut prev = entry_price;
        for tp in &self.levels {
            if tp.close_percent <= 0.0 || direction.favorable_move(prev, tp.price) <= 0.0 {
                return Err(PositionError::LadderOrder {
                    level: tp.level,
                    price: tp.price,
                });
            }
            prev = tp.price;
        }
        Ok(())
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum PositionError {
    #[error("entry price must be positive, got {0}")]
    InvalidEntry(f64),

    #[error("stop {stop} is on the wrong side of entry {entry} for a {direction} position")]
    StopSide {
        direction: Direction,
        entry: f64,
        stop: f64,
    },

    #[error("take-profit close percents sum to {0}, expected 100")]
    LadderPercent(f64),

    #[error("{level} at {price} does not step away from the previous level")]
    LadderOrder { level: TpLevel, price: f64 },

    #[error("contracts must be positive, got {0}")]
    InvalidContracts(f64),
}

/// Coarse lifecycle state of a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionState {
    Open,
    /// One or two take-profits filled.
    Partial,
    Closed,
}

/// Everything needed to open a position. Validated by [`Position::open`].
#[derive(Debug, Clone)]
pub struct OpenRequest {
    pub symbol: String,
    pub direction: Direction,
    pub entry_price: f64,
    pub entry_time: DateTime<Utc>,
    pub stop_loss: f64,
    pub take_profits: TakeProfitLadder,
    pub contracts: f64,
    pub margin_used: f64,
    pub leverage: f64,
    pub entry_fee: f64,
    pub regime: Regime,
    pub entry_atr: f64,
    pub score: u32,
    pub entry_reason: String,
}

/// Adaptive protection armed on a position.
///
/// `percent` of the original size exits if price comes back to `level`
/// (breakeven plus buffer); the rest keeps the position's own stop. The
/// re-armed check compares against `atr` and `regime` instead of entry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProtectionMark {
    pub at: DateTime<Utc>,
    pub atr: f64,
    pub regime: Regime,
    pub level: f64,
    pub percent: f64,
    pub filled: bool,
}

impl ProtectionMark {
    /// True while the protected slice is still waiting for its level.
    pub fn is_pending(&self) -> bool {
        !self.filled && self.percent > PERCENT_EPSILON
    }

    /// Whether a candle with this range trades back to the protected level.
    pub fn is_touched(&self, direction: Direction, high: f64, low: f64) -> bool {
        match direction {
            Direction::Long => low <= self.level,
            Direction::Short => high >= self.level,
        }
    }
}

/// An open position. Mutated only by the lifecycle update step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: PositionId,
    pub symbol: String,
    pub direction: Direction,
    pub entry_price: f64,
    pub entry_time: DateTime<Utc>,

    // ── Stops ──
    pub stop_loss: f64,
    pub original_stop_loss: f64,
    pub take_profits: TakeProfitLadder,

    // ── Size ──
    pub contracts: f64,
    pub margin_used: f64,
    pub leverage: f64,

    // ── Progress ──
    pub tp1_hit: bool,
    pub tp2_hit: bool,
    pub tp3_hit: bool,
    pub remaining_percent: f64,
    pub realized_pnl: f64,
    pub fees_paid: f64,
    pub fills: Vec<Fill>,
    pub best_price: f64,
    pub adaptive_stop_triggered: bool,
    pub partial_protection_active: bool,
    #[serde(default)]
    pub protection: Option<ProtectionMark>,
    /// Timestamp of the last candle or tick applied to this position.
    #[serde(default)]
    pub last_update: Option<DateTime<Utc>>,
    /// Close of that observation.
    #[serde(default)]
    pub last_price: Option<f64>,

    // ── Provenance ──
    pub regime: Regime,
    pub entry_atr: f64,
    pub score: u32,
    pub entry_reason: String,
}

impl Position {
    pub fn open(req: OpenRequest) -> Result<Self, PositionError> {
        if req.entry_price.is_nan() || req.entry_price <= 0.0 {
            return Err(PositionError::InvalidEntry(req.entry_price));
        }
        if req.direction.favorable_move(req.stop_loss, req.entry_price) <= 0.0 {
            return Err(PositionError::StopSide {
                direction: req.direction,
                entry: req.entry_price,
                stop: req.stop_loss,
            });
        }
        if req.contracts.is_nan() || req.contracts <= 0.0 {
            return Err(PositionError::InvalidContracts(req.contracts));
        }
        req.take_profits.validate(req.direction, req.entry_price)?;

        Ok(Self {
            id: PositionId::new(&req.symbol, req.direction, req.entry_time),
            symbol: req.symbol,
            direction: req.direction,
            entry_price: req.entry_price,
            entry_time: req.entry_time,
            stop_loss: req.stop_loss,
            original_stop_loss: req.stop_loss,
            take_profits: req.take_profits,
            contracts: req.contracts,
            margin_used: req.margin_used,
            leverage: req.leverage,
            tp1_hit: false,
            tp2_hit: false,
            tp3_hit: false,
            remaining_percent: 100.0,
            realized_pnl: -req.entry_fee,
            fees_paid: req.entry_fee,
            fills: Vec::new(),
            best_price: req.entry_price,
            adaptive_stop_triggered: false,
            partial_protection_active: false,
            protection: None,
            last_update: None,
            last_price: None,
            regime: req.regime,
            entry_atr: req.entry_atr,
            score: req.score,
            entry_reason: req.entry_reason,
        })
    }

    /// Initial risk per contract, the "1R" distance.
    pub fn risk_per_unit(&self) -> f64 {
        (self.entry_price - self.original_stop_loss).abs()
    }

    /// Profit at `price` expressed in R multiples.
    pub fn profit_r(&self, price: f64) -> f64 {
        let risk = self.risk_per_unit();
        if risk <= 0.0 {
            return 0.0;
        }
        self.direction.favorable_move(self.entry_price, price) / risk
    }

    pub fn is_hit(&self, level: TpLevel) -> bool {
        match level {
            TpLevel::Tp1 => self.tp1_hit,
            TpLevel::Tp2 => self.tp2_hit,
            TpLevel::Tp3 => self.tp3_hit,
        }
    }

    pub fn mark_hit(&mut self, level: TpLevel) {
        match level {
            TpLevel::Tp1 => self.tp1_hit = true,
            TpLevel::Tp2 => self.tp2_hit = true,
            TpLevel::Tp3 => self.tp3_hit = true,
        }
    }

    /// The lowest take-profit not yet filled. Levels fill strictly in order.
    pub fn next_target(&self) -> Option<TakeProfit> {
        TpLevel::ALL
            .iter()
            .find(|l| !self.is_hit(**l))
            .map(|l| *self.take_profits.get(*l))
    }

    pub fn remaining_contracts(&self) -> f64 {
        self.contracts * self.remaining_percent / 100.0
    }

    pub fn is_closed(&self) -> bool {
        self.remaining_percent <= PERCENT_EPSILON
    }

    pub fn state(&self) -> PositionState {
        if self.is_closed() {
            PositionState::Closed
        } else if self.tp1_hit {
            PositionState::Partial
        } else {
            PositionState::Open
        }
    }

    /// Move the stop to `candidate` if it is tighter. Returns true if the stop moved.
    ///
    /// This is the only way the stop changes after entry, so the stop is
    /// non-decreasing for longs and non-increasing for shorts.
    pub fn tighten_stop(&mut self, candidate: f64) -> bool {
        if candidate.is_nan() || !self.direction.is_tighter_or_equal(candidate, self.stop_loss) {
            return false;
        }
        let moved = candidate != self.stop_loss;
        self.stop_loss = candidate;
        moved
    }

    /// Track the most favourable price seen since entry.
    pub fn observe_extreme(&mut self, high: f64, low: f64) {
        let extreme = match self.direction {
            Direction::Long => high,
            Direction::Short => low,
        };
        self.best_price = self.direction.tighter(self.best_price, extreme);
    }

    /// Mark-to-market P&L of the remaining contracts at `price`, before exit costs.
    pub fn unrealized_pnl(&self, price: f64) -> f64 {
        self.direction.favorable_move(self.entry_price, price) * self.remaining_contracts()
    }

    /// Record the observation just applied.
    pub fn mark_observed(&mut self, at: DateTime<Utc>, close: f64) {
        self.last_update = Some(at);
        self.last_price = Some(close);
    }

    /// True if a candle at `at` is new to this position: at or after entry
    /// and strictly after the last observation applied.
    pub fn is_unseen(&self, at: DateTime<Utc>) -> bool {
        match self.last_update {
            Some(last) => at > last,
            None => at >= self.entry_time,
        }
    }

    /// Last observed close, or the entry price before any observation.
    pub fn reference_price(&self) -> f64 {
        self.last_price
            .filter(|p| p.is_finite() && *p > 0.0)
            .unwrap_or(self.entry_price)
    }

    /// Sum of fill percents recorded so far.
    pub fn filled_percent(&self) -> f64 {
        self.fills.iter().map(|f| f.percent).sum()
    }
}
