//! Trade: the immutable record a position becomes once fully closed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::fill::Fill;
use super::ids::PositionId;
use super::position::{Direction, Position};
use super::regime::Regime;

/// Why a position closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    /// All take-profit levels filled.
    Completed,
    Stopped,
    /// Closed after adaptive protection armed a breakeven exit slice.
    PartialProtection,
    BacktestEnd,
    Manual,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::Completed => "completed",
            ExitReason::Stopped => "stopped",
            ExitReason::PartialProtection => "partial_protection",
            ExitReason::BacktestEnd => "backtest_end",
            ExitReason::Manual => "manual",
        }
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A closed round trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    // ── Identification ──
    pub id: PositionId,
    pub symbol: String,
    pub direction: Direction,

    // ── Entry ──
    pub entry_time: DateTime<Utc>,
    pub entry_price: f64,

    // ── Exit ──
    pub exit_time: DateTime<Utc>,
    /// Price of the final fill.
    pub exit_price: f64,
    pub exit_reason: ExitReason,

    // ── Size ──
    pub contracts: f64,
    pub leverage: f64,

    // ── PnL ──
    /// Net of all fees, including the entry fee.
    pub pnl: f64,
    /// `pnl` relative to entry notional, in percent.
    pub pnl_percent: f64,
    pub fees: f64,
    pub fills: Vec<Fill>,

    // ── Provenance ──
    pub regime: Regime,
    pub score: u32,
    pub entry_reason: String,
    pub duration_hours: f64,
}

impl Trade {
    /// Freeze a fully closed position into a trade record.
    pub fn from_position(
        position: Position,
        exit_time: DateTime<Utc>,
        exit_price: f64,
        exit_reason: ExitReason,
    ) -> Self {
        let notional = position.entry_price * position.contracts;
        let pnl_percent = if notional > 0.0 {
            position.realized_pnl / notional * 100.0
        } else {
            0.0
        };
        let duration_hours =
            (exit_time - position.entry_time).num_seconds() as f64 / 3600.0;

        Self {
            id: position.id,
            symbol: position.symbol,
            direction: position.direction,
            entry_time: position.entry_time,
            entry_price: position.entry_price,
            exit_time,
            exit_price,
            exit_reason,
            contracts: position.contracts,
            leverage: position.leverage,
            pnl: position.realized_pnl,
            pnl_percent,
            fees: position.fees_paid,
            fills: position.fills,
            regime: position.regime,
            score: position.score,
            entry_reason: position.entry_reason,
            duration_hours,
        }
    }

    pub fn is_winner(&self) -> bool {
        self.pnl > 0.0
    }

    /// Sum of the fill percents; 100 for every trade the lifecycle produces.
    pub fn closed_percent(&self) -> f64 {
        self.fills.iter().map(|f| f.percent).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::position::test_support::{long_request, t0};
    use chrono::Duration;

    #[test]
    fn from_position_computes_percent_and_duration() {
        let mut pos = Position::open(long_request()).unwrap();
        pos.realized_pnl = 25.0;
        let exit = t0() + Duration::minutes(90);
        let trade = Trade::from_position(pos, exit, 103.0, ExitReason::Completed);
        // notional = 100 * 10 = 1000
        assert!((trade.pnl_percent - 2.5).abs() < 1e-12);
        assert!((trade.duration_hours - 1.5).abs() < 1e-12);
        assert!(trade.is_winner());
    }

    #[test]
    fn exit_reason_serde_names() {
        let json = serde_json::to_string(&ExitReason::BacktestEnd).unwrap();
        assert_eq!(json, "\"backtest_end\"");
        let json = serde_json::to_string(&ExitReason::PartialProtection).unwrap();
        assert_eq!(json, "\"partial_protection\"");
    }

    #[test]
    fn trade_serde_roundtrip() {
        let pos = Position::open(long_request()).unwrap();
        let trade = Trade::from_position(pos, t0(), 98.0, ExitReason::Stopped);
        let json = serde_json::to_string(&trade).unwrap();
        let back: Trade = serde_json::from_str(&json).unwrap();
        assert_eq!(back, trade);
    }
}
