//! Lifecycle events and the sinks that receive them.
//!
//! Publishing is fire-and-forget: a failing sink is logged and the
//! position carries on exactly as if the event had been delivered.

use crate::domain::{
    Direction, ExitReason, Fill, PositionId, Regime, TakeProfitLadder, TpLevel, Trade,
};
use crate::risk::PeriodReport;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

/// What tripped the adaptive stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdaptiveTrigger {
    VolatilitySpike,
    RegimeChange,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LifecycleEvent {
    Opened {
        id: PositionId,
        symbol: String,
        direction: Direction,
        at: DateTime<Utc>,
        entry_price: f64,
        stop_loss: f64,
        take_profits: TakeProfitLadder,
        contracts: f64,
        leverage: f64,
        margin_used: f64,
        score: u32,
        regime: Regime,
        reason: String,
    },
    TakeProfit {
        id: PositionId,
        symbol: String,
        level: TpLevel,
        fill: Fill,
        remaining_percent: f64,
        stop_loss: f64,
    },
    NearTakeProfit {
        id: PositionId,
        symbol: String,
        level: TpLevel,
        fill: Fill,
        best_price: f64,
        remaining_percent: f64,
        stop_loss: f64,
    },
    AdaptiveStop {
        id: PositionId,
        symbol: String,
        at: DateTime<Utc>,
        trigger: AdaptiveTrigger,
        old_stop: f64,
        new_stop: f64,
        /// Level at which the protected slice will exit, when one was armed.
        protected_level: Option<f64>,
        protection_fill: Option<Fill>,
    },
    /// The armed protection slice filled on a return to its level.
    ProtectionExit {
        id: PositionId,
        symbol: String,
        fill: Fill,
        remaining_percent: f64,
    },
    Closed {
        id: PositionId,
        symbol: String,
        at: DateTime<Utc>,
        reason: ExitReason,
        exit_price: f64,
        pnl: f64,
        pnl_percent: f64,
    },
    PeriodReport(PeriodReport),
}

impl LifecycleEvent {
    pub fn closed(trade: &Trade) -> Self {
        LifecycleEvent::Closed {
            id: trade.id.clone(),
            symbol: trade.symbol.clone(),
            at: trade.exit_time,
            reason: trade.exit_reason,
            exit_price: trade.exit_price,
            pnl: trade.pnl,
            pnl_percent: trade.pnl_percent,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            LifecycleEvent::Opened { .. } => "opened",
            LifecycleEvent::TakeProfit { .. } => "take_profit",
            LifecycleEvent::NearTakeProfit { .. } => "near_take_profit",
            LifecycleEvent::AdaptiveStop { .. } => "adaptive_stop",
            LifecycleEvent::ProtectionExit { .. } => "protection_exit",
            LifecycleEvent::Closed { .. } => "closed",
            LifecycleEvent::PeriodReport(_) => "period_report",
        }
    }
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("event serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("sink unavailable: {0}")]
    Unavailable(String),
}

/// Receiver of lifecycle events.
pub trait EventSink: Send {
    fn publish(&mut self, event: &LifecycleEvent) -> Result<(), SinkError>;
}

/// Publish `event`, logging instead of propagating a sink failure.
pub fn notify(sink: &mut dyn EventSink, event: LifecycleEvent) {
    if let Err(e) = sink.publish(&event) {
        warn!(event = event.name(), error = %e, "event sink failed");
    }
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn publish(&mut self, _event: &LifecycleEvent) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Renders events as `tracing` log lines.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn publish(&mut self, event: &LifecycleEvent) -> Result<(), SinkError> {
        match event {
            LifecycleEvent::Opened {
                symbol,
                direction,
                entry_price,
                stop_loss,
                contracts,
                leverage,
                score,
                regime,
                ..
            } => info!(
                %symbol, %direction, entry_price, stop_loss, contracts, leverage, score, %regime,
                "position opened"
            ),
            LifecycleEvent::TakeProfit {
                symbol,
                level,
                fill,
                remaining_percent,
                stop_loss,
                ..
            } => info!(
                %symbol, %level, price = fill.price, pnl = fill.pnl, remaining_percent, stop_loss,
                "take-profit filled"
            ),
            LifecycleEvent::NearTakeProfit {
                symbol,
                level,
                fill,
                best_price,
                ..
            } => info!(
                %symbol, %level, price = fill.price, best_price, pnl = fill.pnl,
                "near take-profit exit"
            ),
            LifecycleEvent::AdaptiveStop {
                symbol,
                trigger,
                old_stop,
                new_stop,
                protected_level,
                protection_fill,
                ..
            } => info!(
                %symbol, ?trigger, old_stop, new_stop, ?protected_level,
                closed_remainder = protection_fill.is_some(),
                "adaptive stop"
            ),
            LifecycleEvent::ProtectionExit {
                symbol,
                fill,
                remaining_percent,
                ..
            } => info!(
                %symbol, price = fill.price, percent = fill.percent, remaining_percent,
                "protection slice exited"
            ),
            LifecycleEvent::Closed {
                symbol,
                reason,
                exit_price,
                pnl,
                ..
            } => info!(%symbol, %reason, exit_price, pnl, "position closed"),
            LifecycleEvent::PeriodReport(report) => info!(
                kind = ?report.kind,
                start = %report.period_start,
                pnl = report.pnl,
                trades = report.trades,
                equity = report.equity,
                "period report"
            ),
        }
        Ok(())
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default, Clone)]
pub struct RecordingSink {
    events: Vec<LifecycleEvent>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> &[LifecycleEvent] {
        &self.events
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.events.iter().map(|e| e.name()).collect()
    }
}

impl EventSink for RecordingSink {
    fn publish(&mut self, event: &LifecycleEvent) -> Result<(), SinkError> {
        self.events.push(event.clone());
        Ok(())
    }
}

/// Forwards each event to every inner sink; one failure does not stop the rest.
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Box<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: impl EventSink + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }
}

impl EventSink for FanoutSink {
    fn publish(&mut self, event: &LifecycleEvent) -> Result<(), SinkError> {
        let mut first_err = None;
        for sink in &mut self.sinks {
            if let Err(e) = sink.publish(event) {
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}
